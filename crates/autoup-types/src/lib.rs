//! Core type system and error handling for autoup
//!
//! This crate provides the foundational types shared by every autoup crate:
//!
//! - **Error handling**: one error enum with kinds, severity levels and retry classification
//! - **Core types**: directory and file sync statuses, upload statistics
//! - **Traits**: the async [`Transport`] and [`Connector`] seams to the remote side
//! - **Configuration**: path styles of the local and remote hosts
//!
//! # Features
//!
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use autoup_types::{DirStatus, Result, UploadStats};
//!
//! fn example_operation() -> Result<UploadStats> {
//!     let mut stats = UploadStats::new();
//!     stats.files_uploaded = 10;
//!     assert_eq!(DirStatus::Add.code(), 2);
//!     Ok(stats)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::PathStyle;
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use traits::*;
pub use types::*;
