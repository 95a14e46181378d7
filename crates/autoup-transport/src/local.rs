//! Transport onto a mounted filesystem
//!
//! Remote paths are resolved below a root directory. Both `/` and `\` split remote paths into
//! components, so a mirror configured with a Windows-style remote still lands in the right place
//! when the share is mounted on a Unix host.

use async_trait::async_trait;
use autoup_types::{Connector, Error, Result, Transport};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// Transport writing into a local directory tree
#[derive(Debug)]
pub struct LocalTransport {
    root: PathBuf,
    closed: bool,
}

impl LocalTransport {
    /// Create a transport rooted at `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            closed: false,
        }
    }

    /// Map a remote path onto the local filesystem
    pub fn resolve(&self, remote: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in remote.split(['/', '\\']).filter(|c| !c.is_empty() && *c != ".") {
            path.push(component);
        }
        path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::transport(format!(
                "Connection to '{}' is closed",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let destination = self.resolve(remote);

        let metadata = fs::metadata(local).await.map_err(|e| Error::Io {
            message: format!("Failed to get metadata for '{}': {}", local.display(), e),
        })?;

        fs::copy(local, &destination).await.map_err(|e| {
            Error::transport(format!(
                "Failed to upload '{}' to '{}': {}",
                local.display(),
                destination.display(),
                e
            ))
        })?;

        if let Ok(modified) = metadata.modified() {
            filetime::set_file_mtime(&destination, filetime::FileTime::from_system_time(modified))
                .map_err(|e| {
                    Error::transport(format!(
                        "Failed to set modification time for '{}': {}",
                        destination.display(),
                        e
                    ))
                })?;
        }

        debug!("Uploaded: {} -> {}", local.display(), destination.display());
        Ok(())
    }

    async fn mkdir(&mut self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let destination = self.resolve(remote);

        fs::create_dir_all(&destination).await.map_err(|e| {
            Error::transport(format!(
                "Failed to create directory '{}': {}",
                destination.display(),
                e
            ))
        })?;

        debug!("Created directory: {}", destination.display());
        Ok(())
    }

    async fn remove(&mut self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let destination = self.resolve(remote);

        match fs::remove_file(&destination).await {
            Ok(()) => {
                debug!("Removed: {}", destination.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::transport(format!(
                "Failed to remove '{}': {}",
                destination.display(),
                e
            ))),
        }
    }

    async fn remove_directory(&mut self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let destination = self.resolve(remote);

        let target = destination.clone();
        tokio::task::spawn_blocking(move || remove_tree_blocking(&target))
            .await
            .map_err(|e| Error::transport(format!("Task join error: {}", e)))??;

        debug!("Removed directory: {}", destination.display());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Delete a directory tree, deepest entries first
fn remove_tree_blocking(root: &Path) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| {
            Error::transport(format!("Failed to walk '{}': {}", root.display(), e))
        })?;

        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::transport(format!(
                    "Failed to remove '{}': {}",
                    entry.path().display(),
                    e
                )))
            }
        }
    }

    Ok(())
}

/// Connector producing [`LocalTransport`]s
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    /// Create a connector for transports rooted at `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            Error::transport(format!(
                "Remote root '{}' is not reachable: {}",
                self.root.display(),
                e
            ))
        })?;
        if !metadata.is_dir() {
            return Err(Error::transport(format!(
                "Remote root '{}' is not a directory",
                self.root.display()
            )));
        }

        Ok(Box::new(LocalTransport::new(self.root.clone())))
    }

    fn endpoint(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
