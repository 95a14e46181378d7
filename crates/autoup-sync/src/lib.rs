//! Snapshot tree, change detection and incremental upload for autoup
//!
//! This crate holds the state of one watched directory and everything that moves it forward:
//!
//! - **Tree**: [`SnapshotTree`], an arena of [`DirNode`]s keyed by absolute path
//! - **Scanning**: [`Scanner`] builds the initial snapshot of a directory
//! - **Diffing**: [`DiffEngine`] compares the tree with the disk and marks what changed
//! - **Uploading**: [`Syncer`] replays pending statuses against a [`autoup_types::Transport`]
//! - **Persistence**: [`snapshot`] saves and restores trees as JSON documents
//!
//! # Examples
//!
//! ```rust,no_run
//! use autoup_sync::{DiffEngine, Scanner};
//! use std::path::Path;
//!
//! # async fn example() -> autoup_types::Result<()> {
//! let mut tree = Scanner::default().build(Path::new("/srv/site")).await?;
//! let dirty = DiffEngine::default().check(&mut tree).await?;
//! println!("{} directories changed", dirty.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod diff;
pub mod scan;
pub mod snapshot;
pub mod tree;
pub mod upload;

pub use diff::DiffEngine;
pub use scan::{ScanOptions, Scanner, DEFAULT_SKIP_PREFIX};
pub use snapshot::{decode, encode, load, save, SnapshotDocument, FORMAT_VERSION};
pub use tree::{DirNode, FileEntry, SnapshotTree};
pub use upload::{RemotePathMapper, Syncer};
