//! Directory listing and initial traversal

use crate::tree::{DirNode, FileEntry, SnapshotTree};
use autoup_types::{DirStatus, Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// Default prefix of names that are never tracked
pub const DEFAULT_SKIP_PREFIX: &str = "skip_";

/// Options shared by the initial traversal and the differ
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Entries whose name starts with this prefix are ignored entirely
    pub skip_prefix: String,
    /// Whether symbolic links are followed instead of skipped
    pub follow_symlinks: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_prefix: DEFAULT_SKIP_PREFIX.to_string(),
            follow_symlinks: false,
        }
    }
}

impl ScanOptions {
    /// Options with a custom skip prefix
    pub fn with_skip_prefix<S: Into<String>>(prefix: S) -> Self {
        Self {
            skip_prefix: prefix.into(),
            ..Self::default()
        }
    }

    fn skips(&self, name: &str) -> bool {
        !self.skip_prefix.is_empty() && name.starts_with(&self.skip_prefix)
    }
}

/// Kind of a listed directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Dir,
    File(SystemTime),
}

/// One tracked entry of a directory listing
#[derive(Debug, Clone)]
pub(crate) struct Listed {
    pub name: String,
    pub kind: EntryKind,
}

type BuildFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Walks directories on disk and produces snapshot nodes
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    /// Create a scanner
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Build a complete snapshot of `root`; every node and file starts as `Add`
    pub async fn build(&self, root: &Path) -> Result<SnapshotTree> {
        let nodes = self.build_detached(root).await?;
        let files: usize = nodes.values().map(|node| node.files.len()).sum();
        info!(
            "Built snapshot of '{}': {} directories, {} files",
            root.display(),
            nodes.len(),
            files
        );
        Ok(SnapshotTree::from_parts(root.to_path_buf(), nodes))
    }

    /// Build the nodes of the subtree at `root` without attaching them anywhere
    pub(crate) async fn build_detached(&self, root: &Path) -> Result<HashMap<PathBuf, DirNode>> {
        if !root.is_absolute() {
            return Err(Error::path(root, "not an absolute path"));
        }

        let mut nodes = HashMap::new();
        self.build_recursive(root.to_path_buf(), &mut nodes).await?;
        Ok(nodes)
    }

    fn build_recursive<'a>(
        &'a self,
        path: PathBuf,
        nodes: &'a mut HashMap<PathBuf, DirNode>,
    ) -> BuildFuture<'a> {
        Box::pin(async move {
            let listing = self.list(&path).await?;
            let mut node = DirNode::new(path.clone(), DirStatus::Add);
            node.generation = 1;

            for entry in listing {
                let entry_path = path.join(&entry.name);
                match entry.kind {
                    EntryKind::Dir => {
                        self.build_recursive(entry_path.clone(), nodes).await?;
                        node.children.insert(entry.name);
                    }
                    EntryKind::File(modified) => {
                        node.files
                            .insert(entry.name, FileEntry::new(entry_path.clone(), modified));
                    }
                }
                node.seen.insert(entry_path, node.generation);
            }

            nodes.insert(path, node);
            Ok(())
        })
    }

    /// List the tracked entries of one directory, in name order
    ///
    /// Skipped names, symbolic links (unless followed), special files and names that are not
    /// valid UTF-8 are left out. Entries vanishing between listing and stat are left out too.
    pub(crate) async fn list(&self, path: &Path) -> Result<Vec<Listed>> {
        let mut entries = fs::read_dir(path).await.map_err(|e| Error::Io {
            message: format!("Failed to read directory '{}': {}", path.display(), e),
        })?;

        let mut listed = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::Io {
            message: format!("Failed to read entry of '{}': {}", path.display(), e),
        })? {
            let entry_path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping non UTF-8 name: {}", entry_path.display());
                continue;
            };
            if self.options.skips(&name) {
                debug!("Skipping: {}", entry_path.display());
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::Io {
                        message: format!(
                            "Failed to get metadata for '{}': {}",
                            entry_path.display(),
                            e
                        ),
                    })
                }
            };

            let metadata = if metadata.file_type().is_symlink() {
                if !self.options.follow_symlinks {
                    debug!("Skipping symlink: {}", entry_path.display());
                    continue;
                }
                match fs::metadata(&entry_path).await {
                    Ok(target) => target,
                    Err(e) => {
                        debug!("Skipping dangling symlink {}: {}", entry_path.display(), e);
                        continue;
                    }
                }
            } else {
                metadata
            };

            let kind = if metadata.is_dir() {
                EntryKind::Dir
            } else if metadata.is_file() {
                let modified = metadata.modified().map_err(|e| Error::Io {
                    message: format!(
                        "Failed to read modification time of '{}': {}",
                        entry_path.display(),
                        e
                    ),
                })?;
                EntryKind::File(modified)
            } else {
                debug!("Skipping special file: {}", entry_path.display());
                continue;
            };

            listed.push(Listed { name, kind });
        }

        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }
}
