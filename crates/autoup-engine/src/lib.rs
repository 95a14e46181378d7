//! Sync orchestration for autoup
//!
//! A [`Project`] owns the snapshot and remote connection of one mirrored directory and runs the
//! periodic check → upload → persist cycle on its own worker task. The [`Supervisor`] opens one
//! project per enabled configured project and closes them together.
//!
//! # Examples
//!
//! ```rust,no_run
//! use autoup_config::ConfigLoader;
//! use autoup_engine::Supervisor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load_default()?;
//! let mut supervisor = Supervisor::start(&config).await;
//! println!("Running: {:?}", supervisor.project_names());
//! supervisor.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod project;
pub mod supervisor;

pub use project::{Project, ProjectSettings, ProjectState};
pub use supervisor::Supervisor;
