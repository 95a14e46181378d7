//! Snapshot persistence
//!
//! A snapshot is stored as one JSON document holding the whole tree. Tombstones are never
//! written, every other status is kept so pending work survives a restart. Saving goes through
//! a temporary file in the target directory followed by a rename, so a crash mid-save leaves the
//! previous snapshot intact.
//!
//! Documents written before versioning was introduced are upgraded while loading. Version 0 is
//! the bare root record without the envelope. The older list layout keeps children in
//! `dir_child`/`file` arrays and gets its names from the entry paths.

use crate::tree::{DirNode, FileEntry, SnapshotTree};
use autoup_types::{DirStatus, Error, FileStatus, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Version written into every snapshot document
pub const FORMAT_VERSION: u32 = 1;

/// Top level of a persisted snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Layout version, see [`FORMAT_VERSION`]
    pub format_version: u32,
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
    /// The watched directory
    pub root: DirRecord,
}

/// Persisted directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirRecord {
    /// Absolute path
    pub dir_name: PathBuf,
    /// Child directories keyed by name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub dir_childs: BTreeMap<String, DirRecord>,
    /// Files keyed by name
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: BTreeMap<String, FileRecord>,
    /// Status code
    pub dir_status: u8,
}

/// Persisted file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path
    pub file_name: PathBuf,
    /// Last observed modification time
    pub modify_time: DateTime<Utc>,
    /// Status code
    pub file_status: u8,
}

/// Directory in the list layout that predates named children
#[derive(Debug, Deserialize)]
struct ListDirRecord {
    dir_name: PathBuf,
    #[serde(default, deserialize_with = "null_as_empty")]
    dir_child: Vec<ListDirRecord>,
    #[serde(default, deserialize_with = "null_as_empty")]
    file: Vec<ListFileRecord>,
    dir_status: u8,
}

#[derive(Debug, Deserialize)]
struct ListFileRecord {
    name: PathBuf,
    modify_time: DateTime<Utc>,
    file_status: u8,
}

impl ListDirRecord {
    fn into_record(self) -> Result<DirRecord> {
        let mut dir_childs = BTreeMap::new();
        for child in self.dir_child {
            dir_childs.insert(base_name(&child.dir_name)?, child.into_record()?);
        }

        let mut files = BTreeMap::new();
        for file in self.file {
            let record = FileRecord {
                modify_time: file.modify_time,
                file_status: file.file_status,
                file_name: file.name,
            };
            files.insert(base_name(&record.file_name)?, record);
        }

        Ok(DirRecord {
            dir_name: self.dir_name,
            dir_childs,
            files,
            dir_status: self.dir_status,
        })
    }
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::format(format!("Entry '{}' has no name", path.display())))
}

/// Maps written as `null` decode as empty
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Serialize a tree, leaving out tombstones
pub fn encode(tree: &SnapshotTree) -> Result<Vec<u8>> {
    let root = tree
        .node(tree.root())
        .ok_or_else(|| Error::format(format!("Root '{}' is not tracked", tree.root().display())))?;

    let document = SnapshotDocument {
        format_version: FORMAT_VERSION,
        saved_at: Utc::now(),
        root: encode_dir(tree, root),
    };

    serde_json::to_vec(&document)
        .map_err(|e| Error::format(format!("Failed to serialize snapshot: {}", e)))
}

fn encode_dir(tree: &SnapshotTree, node: &DirNode) -> DirRecord {
    let dir_childs = node
        .children
        .iter()
        .filter_map(|name| {
            tree.node(&node.child_path(name))
                .filter(|child| child.status.is_persistable())
                .map(|child| (name.clone(), encode_dir(tree, child)))
        })
        .collect();

    let files = node
        .files
        .iter()
        .filter(|(_, file)| file.status.is_persistable())
        .map(|(name, file)| {
            let record = FileRecord {
                file_name: file.path.clone(),
                modify_time: DateTime::<Utc>::from(file.modified),
                file_status: file.status.code(),
            };
            (name.clone(), record)
        })
        .collect();

    DirRecord {
        dir_name: node.path.clone(),
        dir_childs,
        files,
        dir_status: node.status.code(),
    }
}

/// Rebuild a tree from its serialized form
///
/// The document is checked as a whole: an unknown version, an unknown or transient status code,
/// a relative root, a root marked deleted or an entry whose path does not match its parent and
/// name all fail with a format error. Unversioned documents are upgraded first.
pub fn decode(bytes: &[u8]) -> Result<SnapshotTree> {
    let value: Value = serde_json::from_slice(bytes).map_err(parse_error)?;

    let record = if value.get("format_version").is_some() {
        let document: SnapshotDocument = serde_json::from_value(value).map_err(parse_error)?;
        if document.format_version != FORMAT_VERSION {
            return Err(Error::format(format!(
                "Unsupported snapshot format version {}",
                document.format_version
            )));
        }
        document.root
    } else {
        upgrade(value)?
    };

    let root = record.dir_name.clone();
    if !root.is_absolute() {
        return Err(Error::format(format!(
            "Snapshot root '{}' is not an absolute path",
            root.display()
        )));
    }

    let mut nodes = HashMap::new();
    decode_dir(record, &mut nodes)?;

    if nodes.get(&root).is_some_and(|node| !node.is_live()) {
        return Err(Error::format(format!(
            "Snapshot root '{}' is marked deleted",
            root.display()
        )));
    }

    let mut tree = SnapshotTree::from_parts(root, nodes);
    tree.rebuild_existence(1);
    Ok(tree)
}

fn parse_error(error: serde_json::Error) -> Error {
    Error::format(format!("Failed to parse snapshot: {}", error))
}

/// Bring an unversioned document to the current record layout
fn upgrade(value: Value) -> Result<DirRecord> {
    if value.get("dir_child").is_some() || value.get("file").is_some() {
        debug!("Upgrading list layout snapshot");
        let legacy: ListDirRecord = serde_json::from_value(value).map_err(parse_error)?;
        return legacy.into_record();
    }

    debug!("Upgrading unversioned snapshot");
    serde_json::from_value(value).map_err(parse_error)
}

fn decode_dir(record: DirRecord, nodes: &mut HashMap<PathBuf, DirNode>) -> Result<()> {
    let status = DirStatus::from_code(record.dir_status)
        .filter(|status| status.is_persistable())
        .ok_or_else(|| {
            Error::format(format!(
                "Invalid directory status {} for '{}'",
                record.dir_status,
                record.dir_name.display()
            ))
        })?;

    let mut node = DirNode::new(record.dir_name, status);

    for (name, file) in record.files {
        check_entry(&node.path, &name, &file.file_name)?;
        let status = FileStatus::from_code(file.file_status)
            .filter(|status| status.is_persistable())
            .ok_or_else(|| {
                Error::format(format!(
                    "Invalid file status {} for '{}'",
                    file.file_status,
                    file.file_name.display()
                ))
            })?;

        let mut entry = FileEntry::new(file.file_name, SystemTime::from(file.modify_time));
        entry.status = status;
        node.files.insert(name, entry);
    }

    for (name, child) in record.dir_childs {
        check_entry(&node.path, &name, &child.dir_name)?;
        node.children.insert(name);
        decode_dir(child, nodes)?;
    }

    nodes.insert(node.path.clone(), node);
    Ok(())
}

fn check_entry(parent: &Path, name: &str, path: &Path) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || path != parent.join(name) {
        return Err(Error::format(format!(
            "Entry '{}' does not match its parent '{}'",
            path.display(),
            parent.display()
        )));
    }
    Ok(())
}

/// Write a tree to `target`, replacing any previous snapshot atomically
pub async fn save(tree: &SnapshotTree, target: &Path) -> Result<()> {
    let bytes = encode(tree)?;

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| Error::Io {
            message: format!("Failed to create directory '{}': {}", parent.display(), e),
        })?;
    }

    let temp = temp_path(target);
    if let Err(e) = write_synced(&temp, &bytes).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }

    fs::rename(&temp, target).await.map_err(|e| Error::Io {
        message: format!(
            "Failed to move snapshot into place at '{}': {}",
            target.display(),
            e
        ),
    })?;

    info!(
        "Saved snapshot of '{}' to '{}' ({} bytes)",
        tree.root().display(),
        target.display(),
        bytes.len()
    );
    Ok(())
}

/// Read a snapshot from `path`; `None` when no snapshot exists yet
pub async fn load(path: &Path) -> Result<Option<SnapshotTree>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let tree = decode(&bytes)?;
            debug!(
                "Loaded snapshot of '{}' from '{}' ({} directories)",
                tree.root().display(),
                path.display(),
                tree.len()
            );
            Ok(Some(tree))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io {
            message: format!("Failed to read snapshot '{}': {}", path.display(), e),
        }),
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "snapshot".to_string(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |e: std::io::Error| Error::Io {
        message: format!("Failed to write snapshot '{}': {}", path.display(), e),
    };

    let mut file = fs::File::create(path).await.map_err(io_err)?;
    file.write_all(bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(())
}
