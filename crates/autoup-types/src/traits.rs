//! Core traits for autoup operations
//!
//! The sync core talks to the remote side only through [`Transport`]. A [`Connector`] produces
//! fresh transports, which is how the orchestrator reconnects after a transport failure.

use crate::Result;
use async_trait::async_trait;
use std::path::Path;

/// Remote filesystem operations needed to mirror a directory tree
///
/// Remote paths are plain strings already joined with the remote separator. Every operation is
/// idempotent with respect to the remote end state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Upload a local file, creating or overwriting the remote file
    async fn put(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Create a remote directory; no-op if it already exists
    async fn mkdir(&mut self, remote: &str) -> Result<()>;

    /// Remove a remote file; no-op if it is absent
    async fn remove(&mut self, remote: &str) -> Result<()>;

    /// Remove a remote directory and everything below it, deepest entries first
    ///
    /// A missing directory is not an error.
    async fn remove_directory(&mut self, remote: &str) -> Result<()>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Factory for transport connections to one remote endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Human readable name of the endpoint, used in logs
    fn endpoint(&self) -> String;
}
