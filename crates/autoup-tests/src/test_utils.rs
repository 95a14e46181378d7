//! Shared helpers for autoup integration tests
//!
//! A [`MirrorFixture`] owns one temporary directory holding a local tree, a directory acting as
//! the remote side and the snapshot location. The comparison helpers flatten a directory into
//! `/`-separated relative paths so local and remote trees can be compared with `assert_eq!`.

use autoup_engine::ProjectSettings;
use autoup_transport::LocalConnector;
use autoup_types::Connector;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Remote base directory used by every fixture
pub const REMOTE_BASE: &str = "/mirror";

/// Write `content` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, content: &str) -> io::Result<PathBuf> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
    Ok(path)
}

/// Set a file's modification time to `secs` after the epoch
pub fn set_mtime(path: &Path, secs: u64) -> io::Result<()> {
    let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(time))
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Every file below `root` with its content, keyed by relative path
pub fn file_contents(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let key = relative(root, entry.path())?;
            let content = fs::read(entry.path()).ok()?;
            Some((key, content))
        })
        .collect()
}

/// Every directory below `root`, as relative paths
pub fn directories(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| relative(root, entry.path()))
        .collect()
}

/// A local tree mirrored into a directory standing in for the remote host
pub struct MirrorFixture {
    temp: TempDir,
    /// Watched directory
    pub local: PathBuf,
    /// Snapshot file location
    pub snapshot: PathBuf,
}

impl MirrorFixture {
    /// Create an empty fixture
    pub fn new() -> io::Result<Self> {
        let temp = TempDir::new()?;
        let local = temp.path().join("local");
        fs::create_dir_all(&local)?;
        fs::create_dir_all(temp.path().join("remote"))?;
        let snapshot = temp.path().join("state").join("snapshot.json");
        Ok(Self {
            temp,
            local,
            snapshot,
        })
    }

    /// Root of the remote side
    pub fn remote_root(&self) -> PathBuf {
        self.temp.path().join("remote")
    }

    /// Where the watched directory lands on the remote side
    pub fn remote_mirror(&self) -> PathBuf {
        self.remote_root().join(REMOTE_BASE.trim_start_matches('/'))
    }

    /// Connector writing into the remote side
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(LocalConnector::new(self.remote_root()))
    }

    /// Project settings with timers long enough to never fire during a test
    pub fn settings(&self, name: &str) -> ProjectSettings {
        ProjectSettings::new(name, &self.local, REMOTE_BASE, &self.snapshot)
            .with_intervals(Duration::from_secs(3600), Duration::from_secs(3600))
    }

    /// Write a file inside the watched directory
    pub fn write(&self, relative: &str, content: &str) -> io::Result<PathBuf> {
        write_file(&self.local, relative, content)
    }

    /// Assert that the remote side holds exactly the local files and directories
    pub fn assert_mirrored(&self) {
        assert_eq!(
            file_contents(&self.remote_mirror()),
            file_contents(&self.local),
            "remote files differ from local files"
        );
        assert_eq!(
            directories(&self.remote_mirror()),
            directories(&self.local),
            "remote directories differ from local directories"
        );
    }
}
