//! Status-driven incremental upload
//!
//! The [`Syncer`] walks the dirty directories reported by the differ and turns every pending
//! status into transport calls. Statuses advance as soon as the matching remote call succeeds,
//! so a batch that fails halfway can be re-run without transferring anything twice.

use crate::tree::SnapshotTree;
use autoup_types::{DirStatus, Error, FileStatus, PathStyle, Result, Transport, UploadStats};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, info};

type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Maps local absolute paths onto remote paths
///
/// The local base directory prefix is replaced by the remote base directory and the remainder is
/// re-joined with the remote separator.
#[derive(Debug, Clone)]
pub struct RemotePathMapper {
    local_base: PathBuf,
    remote_base: String,
    local_style: PathStyle,
    remote_style: PathStyle,
}

impl RemotePathMapper {
    /// Create a mapper
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        local_base: P,
        remote_base: S,
        local_style: PathStyle,
        remote_style: PathStyle,
    ) -> Self {
        Self {
            local_base: local_base.into(),
            remote_base: remote_base.into(),
            local_style,
            remote_style,
        }
    }

    /// Remote path of a local file or directory below the local base directory
    pub fn remote_path(&self, local: &Path) -> Result<String> {
        let local_sep = self.local_style.separator();
        let remote_sep = self.remote_style.separator();

        let local_str = local
            .to_str()
            .ok_or_else(|| Error::path(local, "not valid UTF-8"))?;
        let base = self
            .local_base
            .to_str()
            .ok_or_else(|| Error::path(&self.local_base, "not valid UTF-8"))?
            .trim_end_matches(local_sep);

        let rest = local_str
            .strip_prefix(base)
            .filter(|rest| rest.is_empty() || rest.starts_with(local_sep))
            .ok_or_else(|| {
                Error::path(
                    local,
                    format!("outside of base directory '{}'", self.local_base.display()),
                )
            })?;

        let mut remote = self.remote_base.trim_end_matches(remote_sep).to_string();
        for component in rest.split(local_sep).filter(|c| !c.is_empty()) {
            remote.push(remote_sep);
            remote.push_str(component);
        }
        if remote.is_empty() {
            remote.push(remote_sep);
        }
        Ok(remote)
    }
}

/// Uploads the pending parts of a snapshot tree
#[derive(Debug, Clone)]
pub struct Syncer {
    mapper: RemotePathMapper,
}

impl Syncer {
    /// Create a syncer
    pub fn new(mapper: RemotePathMapper) -> Self {
        Self { mapper }
    }

    /// Path mapper in use
    pub fn mapper(&self) -> &RemotePathMapper {
        &self.mapper
    }

    /// Upload every pending change below the given directories
    ///
    /// Paths that are no longer tracked, directories already `Same` and directories inside a
    /// subtree scheduled for removal are skipped. The first failing remote call aborts the batch
    /// and is returned; statuses that already advanced keep their new value. Tombstones are
    /// evicted afterwards whether the batch succeeded or not.
    pub async fn upload(
        &self,
        tree: &mut SnapshotTree,
        transport: &mut dyn Transport,
        dirty: &[PathBuf],
    ) -> Result<UploadStats> {
        let start = Instant::now();
        let mut stats = UploadStats::new();

        let result = self.upload_batch(tree, transport, dirty, &mut stats).await;

        let (dirs, files) = tree.evict_tombstones();
        if dirs + files > 0 {
            debug!("Evicted {} directories and {} files", dirs, files);
        }

        stats.duration = start.elapsed();
        result?;

        if stats.operations() > 0 {
            info!(
                "Upload finished: {} directories created, {} files uploaded, {} files removed, {} directories removed in {:?}",
                stats.directories_created,
                stats.files_uploaded,
                stats.files_removed,
                stats.directories_removed,
                stats.duration
            );
        }
        Ok(stats)
    }

    async fn upload_batch(
        &self,
        tree: &mut SnapshotTree,
        transport: &mut dyn Transport,
        dirty: &[PathBuf],
        stats: &mut UploadStats,
    ) -> Result<()> {
        for path in dirty {
            match tree.node(path) {
                None => {
                    debug!("Skipping evicted directory: {}", path.display());
                    continue;
                }
                Some(node) if node.status == DirStatus::Same => continue,
                Some(_) => {}
            }
            if tree.has_deleted_ancestor(path) {
                debug!("Skipping directory inside removed subtree: {}", path.display());
                continue;
            }

            self.dispatch(tree, transport, path.clone(), stats).await?;
        }
        Ok(())
    }

    fn dispatch<'a>(
        &'a self,
        tree: &'a mut SnapshotTree,
        transport: &'a mut dyn Transport,
        path: PathBuf,
        stats: &'a mut UploadStats,
    ) -> DispatchFuture<'a> {
        Box::pin(async move {
            let Some(node) = tree.node(&path) else {
                return Ok(());
            };
            let status = node.status;
            let children: Vec<PathBuf> = node
                .children
                .iter()
                .map(|name| node.child_path(name))
                .collect();
            let remote = self.mapper.remote_path(&path)?;

            match status {
                DirStatus::Same | DirStatus::ShiftDelete => return Ok(()),
                DirStatus::Delete => {
                    transport.remove_directory(&remote).await?;
                    stats.directories_removed += 1;
                    debug!("Removed remote directory: {}", remote);
                    set_dir_status(tree, &path, DirStatus::ShiftDelete);
                    return Ok(());
                }
                DirStatus::Add => {
                    transport.mkdir(&remote).await?;
                    stats.directories_created += 1;
                    debug!("Created remote directory: {}", remote);
                }
                DirStatus::Modify => {}
            }

            // Removals first, so a name that changed type is free before it is recreated
            for child in &children {
                if dir_status(tree, child) == Some(DirStatus::Delete) {
                    self.dispatch(tree, transport, child.clone(), stats).await?;
                }
            }
            self.remove_files(tree, transport, &path, stats).await?;

            for child in children {
                match dir_status(tree, &child) {
                    Some(DirStatus::Add | DirStatus::Modify) => {
                        self.dispatch(tree, transport, child, stats).await?;
                    }
                    _ => {}
                }
            }
            self.put_files(tree, transport, &path, stats).await?;

            set_dir_status(tree, &path, DirStatus::Same);
            Ok(())
        })
    }

    async fn remove_files(
        &self,
        tree: &mut SnapshotTree,
        transport: &mut dyn Transport,
        dir: &Path,
        stats: &mut UploadStats,
    ) -> Result<()> {
        for (name, path) in files_with(tree, dir, |status| status == FileStatus::Delete) {
            let remote = self.mapper.remote_path(&path)?;
            transport.remove(&remote).await?;
            stats.files_removed += 1;
            debug!("Removed remote file: {}", remote);
            set_file_status(tree, dir, &name, FileStatus::ShiftDelete);
        }
        Ok(())
    }

    async fn put_files(
        &self,
        tree: &mut SnapshotTree,
        transport: &mut dyn Transport,
        dir: &Path,
        stats: &mut UploadStats,
    ) -> Result<()> {
        for (name, path) in files_with(tree, dir, FileStatus::needs_transfer) {
            let remote = self.mapper.remote_path(&path)?;
            transport.put(&path, &remote).await?;
            stats.files_uploaded += 1;
            debug!("Uploaded file: {} -> {}", path.display(), remote);
            set_file_status(tree, dir, &name, FileStatus::Same);
        }
        Ok(())
    }
}

fn dir_status(tree: &SnapshotTree, path: &Path) -> Option<DirStatus> {
    tree.node(path).map(|node| node.status)
}

fn set_dir_status(tree: &mut SnapshotTree, path: &Path, status: DirStatus) {
    if let Some(node) = tree.node_mut(path) {
        node.status = status;
    }
}

fn files_with(
    tree: &SnapshotTree,
    dir: &Path,
    wanted: impl Fn(FileStatus) -> bool,
) -> Vec<(String, PathBuf)> {
    tree.node(dir)
        .map(|node| {
            node.files
                .iter()
                .filter(|(_, file)| wanted(file.status))
                .map(|(name, file)| (name.clone(), file.path.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn set_file_status(tree: &mut SnapshotTree, dir: &Path, name: &str, status: FileStatus) {
    if let Some(file) = tree
        .node_mut(dir)
        .and_then(|node| node.files.get_mut(name))
    {
        file.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffEngine;
    use crate::scan::Scanner;
    use autoup_transport::{MemoryConnector, MemoryRemote, OpKind, RemoteOp};
    use autoup_types::{Connector, ErrorKind};
    use proptest::prelude::*;
    use rstest::rstest;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn unix_mapper(local: &Path, remote: &str) -> RemotePathMapper {
        RemotePathMapper::new(local, remote, PathStyle::Unix, PathStyle::Unix)
    }

    fn set_mtime(path: &Path, secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(time)).unwrap();
    }

    async fn connect(remote: &MemoryRemote) -> Box<dyn Transport> {
        MemoryConnector::with_remote("test", remote.clone())
            .connect()
            .await
            .unwrap()
    }

    #[rstest]
    #[case("/srv/site", "/backup", "/srv/site", "/backup")]
    #[case("/srv/site", "/backup", "/srv/site/a/b.txt", "/backup/a/b.txt")]
    #[case("/srv/site/", "/backup/", "/srv/site/a", "/backup/a")]
    #[case("/srv/site", "/", "/srv/site/a", "/a")]
    #[case("/srv/site", "/", "/srv/site", "/")]
    fn test_remote_path_unix(
        #[case] local_base: &str,
        #[case] remote_base: &str,
        #[case] local: &str,
        #[case] expected: &str,
    ) {
        let mapper = unix_mapper(Path::new(local_base), remote_base);
        assert_eq!(mapper.remote_path(Path::new(local)).unwrap(), expected);
    }

    #[test]
    fn test_remote_path_to_windows() {
        let mapper = RemotePathMapper::new("/srv/site", r"D:\backup", PathStyle::Unix, PathStyle::Windows);
        assert_eq!(
            mapper.remote_path(Path::new("/srv/site/a/b.txt")).unwrap(),
            r"D:\backup\a\b.txt"
        );
    }

    #[test]
    fn test_remote_path_outside_base() {
        let mapper = unix_mapper(Path::new("/srv/site"), "/backup");
        let err = mapper.remote_path(Path::new("/srv/site2/a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Path);
        assert!(mapper.remote_path(Path::new("/etc/passwd")).is_err());
    }

    proptest! {
        #[test]
        fn test_remote_path_keeps_components(components in prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 0..6)) {
            let mapper = RemotePathMapper::new("/local/base", r"R:\remote", PathStyle::Unix, PathStyle::Windows);
            let mut local = PathBuf::from("/local/base");
            for component in &components {
                local.push(component);
            }
            let remote = mapper.remote_path(&local).unwrap();
            let mut expected = r"R:\remote".to_string();
            for component in &components {
                expected.push('\\');
                expected.push_str(component);
            }
            prop_assert_eq!(remote, expected);
        }
    }

    #[tokio::test]
    async fn test_add_then_modify_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("a");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("f1"), b"one").unwrap();
        set_mtime(&root.join("f1"), 100);

        let mut tree = Scanner::default().build(&root).await.unwrap();
        let syncer = Syncer::new(unix_mapper(&root, "/a"));
        let remote = MemoryRemote::new();
        let mut transport = connect(&remote).await;

        let stats = syncer
            .upload(&mut tree, transport.as_mut(), &[root.clone()])
            .await
            .unwrap();
        assert_eq!(stats.directories_created, 1);
        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(
            remote.ops(),
            vec![
                RemoteOp { kind: OpKind::Mkdir, path: "/a".to_string() },
                RemoteOp { kind: OpKind::Put, path: "/a/f1".to_string() },
            ]
        );
        let node = tree.node(&root).unwrap();
        assert_eq!(node.status, DirStatus::Same);
        assert_eq!(node.files["f1"].status, FileStatus::Same);

        std::fs::write(root.join("f1"), b"one more").unwrap();
        set_mtime(&root.join("f1"), 200);
        std::fs::write(root.join("f2"), b"two").unwrap();
        remote.clear_ops();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty, vec![root.clone()]);

        syncer.upload(&mut tree, transport.as_mut(), &dirty).await.unwrap();
        assert_eq!(remote.count(OpKind::Put, "/a/f1"), 1);
        assert_eq!(remote.count(OpKind::Put, "/a/f2"), 1);
        assert_eq!(remote.ops().len(), 2);
        assert_eq!(remote.file_content("/a/f1"), Some(b"one more".to_vec()));

        let node = tree.node(&root).unwrap();
        assert_eq!(node.status, DirStatus::Same);
        assert!(node.files.values().all(|f| f.status == FileStatus::Same));
    }

    #[tokio::test]
    async fn test_deleted_subdirectory_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("a");
        std::fs::create_dir_all(root.join("b/c")).unwrap();
        std::fs::write(root.join("b/c/x.txt"), b"x").unwrap();

        let mut tree = Scanner::default().build(&root).await.unwrap();
        let syncer = Syncer::new(unix_mapper(&root, "/a"));
        let remote = MemoryRemote::new();
        let mut transport = connect(&remote).await;
        syncer
            .upload(&mut tree, transport.as_mut(), &[root.clone()])
            .await
            .unwrap();
        assert!(remote.has_file("/a/b/c/x.txt"));

        std::fs::remove_dir_all(root.join("b")).unwrap();
        remote.clear_ops();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty, vec![root.clone()]);

        let stats = syncer.upload(&mut tree, transport.as_mut(), &dirty).await.unwrap();
        assert_eq!(stats.directories_removed, 1);
        assert_eq!(
            remote.ops(),
            vec![RemoteOp { kind: OpKind::RemoveDirectory, path: "/a/b".to_string() }]
        );
        assert!(!remote.has_file("/a/b/c/x.txt"));

        assert!(!tree.contains(&root.join("b")));
        assert!(!tree.contains(&root.join("b/c")));
        assert!(tree.node(&root).unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_duplicate_uploads() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("b.txt"), b"b").unwrap();

        let mut tree = Scanner::default().build(&root).await.unwrap();
        let syncer = Syncer::new(unix_mapper(&root, "/w"));
        let remote = MemoryRemote::new();
        remote.fail_on(OpKind::Put, "/w/b.txt", 1);
        let mut transport = connect(&remote).await;

        let err = syncer
            .upload(&mut tree, transport.as_mut(), &[root.clone()])
            .await
            .unwrap_err();
        assert!(err.needs_reconnect());
        let node = tree.node(&root).unwrap();
        assert_eq!(node.status, DirStatus::Add);
        assert_eq!(node.files["a.txt"].status, FileStatus::Same);
        assert_eq!(node.files["b.txt"].status, FileStatus::Add);

        syncer
            .upload(&mut tree, transport.as_mut(), &[root.clone()])
            .await
            .unwrap();
        assert_eq!(remote.count(OpKind::Put, "/w/a.txt"), 1);
        assert_eq!(remote.count(OpKind::Put, "/w/b.txt"), 1);
        assert_eq!(tree.node(&root).unwrap().status, DirStatus::Same);
    }

    #[tokio::test]
    async fn test_combined_change_in_one_pass() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("d");
        std::fs::create_dir_all(root.join("old/inner")).unwrap();
        std::fs::write(root.join("kept.txt"), b"1").unwrap();
        set_mtime(&root.join("kept.txt"), 100);

        let mut tree = Scanner::default().build(&root).await.unwrap();
        let syncer = Syncer::new(unix_mapper(&root, "/d"));
        let remote = MemoryRemote::new();
        let mut transport = connect(&remote).await;
        syncer
            .upload(&mut tree, transport.as_mut(), &[root.clone()])
            .await
            .unwrap();
        remote.clear_ops();

        std::fs::write(root.join("added.txt"), b"2").unwrap();
        set_mtime(&root.join("kept.txt"), 200);
        std::fs::remove_dir_all(root.join("old")).unwrap();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty, vec![root.clone()]);
        let node = tree.node(&root).unwrap();
        assert_eq!(node.files["added.txt"].status, FileStatus::Add);
        assert_eq!(node.files["kept.txt"].status, FileStatus::Update);
        assert_eq!(tree.node(&root.join("old")).unwrap().status, DirStatus::Delete);

        let stats = syncer.upload(&mut tree, transport.as_mut(), &dirty).await.unwrap();
        assert_eq!(stats.files_uploaded, 2);
        assert_eq!(stats.directories_removed, 1);
        assert_eq!(remote.ops()[0].kind, OpKind::RemoveDirectory);
        assert_eq!(tree.dirty_dirs(), Vec::<PathBuf>::new());
    }

    #[tokio::test]
    async fn test_deleted_file_removed_remotely() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("gone.txt"), b"x").unwrap();

        let mut tree = Scanner::default().build(&root).await.unwrap();
        let syncer = Syncer::new(unix_mapper(&root, "/w"));
        let remote = MemoryRemote::new();
        let mut transport = connect(&remote).await;
        syncer
            .upload(&mut tree, transport.as_mut(), &[root.clone()])
            .await
            .unwrap();

        std::fs::remove_file(root.join("gone.txt")).unwrap();
        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        let stats = syncer.upload(&mut tree, transport.as_mut(), &dirty).await.unwrap();

        assert_eq!(stats.files_removed, 1);
        assert!(!remote.has_file("/w/gone.txt"));
        assert!(tree.node(&root).unwrap().files.is_empty());
    }

    #[tokio::test]
    async fn test_skips_untracked_and_clean_paths() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        std::fs::create_dir(&root).unwrap();

        let mut tree = Scanner::default().build(&root).await.unwrap();
        tree.node_mut(&root).unwrap().status = DirStatus::Same;

        let syncer = Syncer::new(unix_mapper(&root, "/w"));
        let remote = MemoryRemote::new();
        let mut transport = connect(&remote).await;
        let stats = syncer
            .upload(&mut tree, transport.as_mut(), &[root.join("evicted"), root.clone()])
            .await
            .unwrap();
        assert_eq!(stats.operations(), 0);
        assert!(remote.ops().is_empty());
    }

    #[tokio::test]
    async fn test_nodes_below_deleted_subtree_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        std::fs::create_dir_all(root.join("x/y")).unwrap();

        let mut tree = Scanner::default().build(&root).await.unwrap();
        tree.node_mut(&root).unwrap().status = DirStatus::Modify;
        tree.node_mut(&root.join("x")).unwrap().status = DirStatus::Delete;

        let syncer = Syncer::new(unix_mapper(&root, "/w"));
        let remote = MemoryRemote::new();
        let mut transport = connect(&remote).await;
        syncer
            .upload(&mut tree, transport.as_mut(), &[root.join("x/y"), root.clone()])
            .await
            .unwrap();

        assert_eq!(
            remote.ops(),
            vec![RemoteOp { kind: OpKind::RemoveDirectory, path: "/w/x".to_string() }]
        );
        assert_eq!(tree.len(), 1);
    }
}
