//! Change detection against a snapshot tree
//!
//! The differ re-lists every live directory of a [`SnapshotTree`] and classifies each entry as
//! unchanged, added, updated or deleted by comparing it with what the tree tracks. Removals are
//! found through each node's existence index: every entry seen during a node's pass is tagged
//! with the node's next generation, and whatever still carries an older tag afterwards vanished
//! from disk.
//!
//! All fallible work for a node (listing, stat, building new subtrees, recursing into existing
//! children) runs before any of that node's own state is written. A failed pass therefore leaves
//! the node exactly as it was, while children that already completed keep their results.

use crate::scan::{EntryKind, ScanOptions, Scanner};
use crate::tree::{DirNode, FileEntry, SnapshotTree};
use autoup_types::{DirStatus, Error, FileStatus, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;
use tracing::{debug, info};

type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// What a node's pass decided, applied only once all fallible work succeeded
#[derive(Debug, Default)]
struct NodePlan {
    live: Vec<PathBuf>,
    built: HashMap<PathBuf, DirNode>,
    added_dirs: Vec<String>,
    recurse_dirs: Vec<String>,
    added_files: Vec<(String, SystemTime)>,
    updated_files: Vec<(String, SystemTime)>,
    files_turned_dirs: Vec<String>,
    dirs_turned_files: Vec<String>,
}

/// Engine for detecting changes between the disk and a snapshot
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    scanner: Scanner,
}

impl DiffEngine {
    /// Create a new diff engine
    pub fn new(options: ScanOptions) -> Self {
        Self {
            scanner: Scanner::new(options),
        }
    }

    /// Scanner used for listings and for building newly discovered subtrees
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Re-scan the whole tree and return the paths of directories that changed
    pub async fn check(&self, tree: &mut SnapshotTree) -> Result<Vec<PathBuf>> {
        let mut dirty = Vec::new();
        self.check_into(tree, &mut dirty).await?;
        Ok(dirty)
    }

    /// Re-scan the whole tree, appending changed directory paths to `dirty`
    ///
    /// On error, `dirty` still holds the paths of every directory whose pass completed, deepest
    /// first.
    pub async fn check_into(&self, tree: &mut SnapshotTree, dirty: &mut Vec<PathBuf>) -> Result<()> {
        let root = tree.root().to_path_buf();
        let before = dirty.len();
        self.check_node(tree, root, dirty).await?;

        let found = dirty.len() - before;
        if found > 0 {
            info!("Detected changes in {} directories", found);
        }
        Ok(())
    }

    fn check_node<'a>(
        &'a self,
        tree: &'a mut SnapshotTree,
        path: PathBuf,
        dirty: &'a mut Vec<PathBuf>,
    ) -> CheckFuture<'a> {
        Box::pin(async move {
            let (generation, known_dirs, known_files) = tracked_entries(tree, &path)?;

            let listing = self.scanner.list(&path).await?;
            let mut plan = NodePlan::default();

            for entry in listing {
                let entry_path = path.join(&entry.name);
                match entry.kind {
                    EntryKind::Dir => {
                        if known_files.get(&entry.name).is_some_and(|(_, live)| *live) {
                            plan.files_turned_dirs.push(entry.name.clone());
                        }
                        match known_dirs.get(&entry.name) {
                            Some(true) => {
                                plan.recurse_dirs.push(entry.name);
                                plan.live.push(entry_path);
                            }
                            // Removal still pending remotely; rediscovered after eviction
                            Some(false) => {}
                            None => {
                                let subtree = self.scanner.build_detached(&entry_path).await?;
                                plan.built.extend(subtree);
                                plan.added_dirs.push(entry.name);
                                plan.live.push(entry_path);
                            }
                        }
                    }
                    EntryKind::File(modified) => {
                        if known_dirs.get(&entry.name) == Some(&true) {
                            plan.dirs_turned_files.push(entry.name.clone());
                        }
                        match known_files.get(&entry.name) {
                            Some((stored, true)) => {
                                if modified > *stored {
                                    plan.updated_files.push((entry.name, modified));
                                }
                                plan.live.push(entry_path);
                            }
                            Some((_, false)) => {}
                            None => {
                                plan.added_files.push((entry.name, modified));
                                plan.live.push(entry_path);
                            }
                        }
                    }
                }
            }

            let mut child_changed = false;
            for name in &plan.recurse_dirs {
                if self.check_node(tree, path.join(name), dirty).await? {
                    child_changed = true;
                }
            }

            let changed = apply_plan(tree, &path, generation, plan) || child_changed;
            if changed {
                if let Some(node) = tree.node_mut(&path) {
                    node.touch();
                }
                dirty.push(path);
            }
            Ok(changed)
        })
    }
}

/// Next generation plus the node's tracked children and files with their liveness
#[allow(clippy::type_complexity)]
fn tracked_entries(
    tree: &SnapshotTree,
    path: &Path,
) -> Result<(u64, HashMap<String, bool>, HashMap<String, (SystemTime, bool)>)> {
    let node = tree
        .node(path)
        .ok_or_else(|| Error::path(path, "directory is not tracked"))?;

    let dirs = node
        .children
        .iter()
        .map(|name| {
            let live = tree
                .node(&node.child_path(name))
                .is_some_and(DirNode::is_live);
            (name.clone(), live)
        })
        .collect();
    let files = node
        .files
        .iter()
        .map(|(name, file)| (name.clone(), (file.modified, file.is_live())))
        .collect();

    Ok((node.generation + 1, dirs, files))
}

/// Write a completed pass into the node; returns whether the node itself changed
fn apply_plan(tree: &mut SnapshotTree, path: &Path, generation: u64, plan: NodePlan) -> bool {
    let mut changed = false;
    let mut deleted_dirs = plan.dirs_turned_files;

    tree.insert_nodes(plan.built);

    let Some(node) = tree.node_mut(path) else {
        return false;
    };
    node.generation = generation;
    for live in plan.live {
        node.seen.insert(live, generation);
    }

    for name in plan.files_turned_dirs {
        if let Some(file) = node.files.get_mut(&name) {
            debug!("File became a directory: {}", file.path.display());
            file.status = FileStatus::Delete;
            changed = true;
        }
    }
    for name in plan.added_dirs {
        debug!("Added directory: {}", path.join(&name).display());
        node.children.insert(name);
        changed = true;
    }
    for (name, modified) in plan.added_files {
        let file = FileEntry::new(path.join(&name), modified);
        debug!("Added file: {}", file.path.display());
        node.files.insert(name, file);
        changed = true;
    }
    for (name, modified) in plan.updated_files {
        if let Some(file) = node.files.get_mut(&name) {
            debug!("Updated file: {}", file.path.display());
            file.modified = modified;
            if file.status != FileStatus::Add {
                file.status = FileStatus::Update;
            }
            changed = true;
        }
    }

    let stale: Vec<PathBuf> = node
        .seen
        .iter()
        .filter(|(_, seen)| **seen != generation)
        .map(|(path, _)| path.clone())
        .collect();
    for stale_path in stale {
        node.seen.remove(&stale_path);
        let Some(name) = stale_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if node.children.contains(name) {
            deleted_dirs.push(name.to_string());
        }
        if let Some(file) = node.files.get_mut(name) {
            if file.is_live() {
                debug!("Deleted file: {}", file.path.display());
                file.status = FileStatus::Delete;
                changed = true;
            }
        }
    }

    for name in deleted_dirs {
        if let Some(child) = tree.node_mut(&path.join(&name)) {
            if child.is_live() {
                debug!("Deleted directory: {}", child.path.display());
                child.status = DirStatus::Delete;
                changed = true;
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Scanner;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(time)).unwrap();
    }

    /// Build a tree and mark every entry `Same`, as after a successful full upload
    async fn settled_tree(root: &Path) -> SnapshotTree {
        let mut tree = Scanner::default().build(root).await.unwrap();
        let paths: Vec<PathBuf> = tree.nodes().map(|n| n.path.clone()).collect();
        for path in paths {
            let node = tree.node_mut(&path).unwrap();
            node.status = DirStatus::Same;
            for file in node.files.values_mut() {
                file.status = FileStatus::Same;
            }
        }
        tree
    }

    #[tokio::test]
    async fn test_no_changes_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/a.txt"), b"a").unwrap();

        let mut tree = Scanner::default().build(root).await.unwrap();
        let engine = DiffEngine::default();

        assert!(engine.check(&mut tree).await.unwrap().is_empty());
        let before = tree.clone();
        assert!(engine.check(&mut tree).await.unwrap().is_empty());

        for node in before.nodes() {
            let after = tree.node(&node.path).unwrap();
            assert_eq!(after.status, node.status);
            assert_eq!(after.files, node.files);
        }
    }

    #[tokio::test]
    async fn test_added_and_updated_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("f1"), b"1").unwrap();
        set_mtime(&root.join("f1"), 100);

        let mut tree = settled_tree(root).await;

        set_mtime(&root.join("f1"), 200);
        std::fs::write(root.join("f2"), b"2").unwrap();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty, vec![root.to_path_buf()]);

        let node = tree.node(root).unwrap();
        assert_eq!(node.status, DirStatus::Modify);
        assert_eq!(node.files["f1"].status, FileStatus::Update);
        assert_eq!(
            node.files["f1"].modified,
            SystemTime::UNIX_EPOCH + Duration::from_secs(200)
        );
        assert_eq!(node.files["f2"].status, FileStatus::Add);
    }

    #[tokio::test]
    async fn test_older_mtime_is_not_an_update() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("f"), b"1").unwrap();
        set_mtime(&root.join("f"), 500);

        let mut tree = settled_tree(root).await;
        set_mtime(&root.join("f"), 400);

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert!(dirty.is_empty());
        assert_eq!(tree.node(root).unwrap().files["f"].status, FileStatus::Same);
    }

    #[tokio::test]
    async fn test_pending_add_stays_add_on_update() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("f"), b"1").unwrap();
        set_mtime(&root.join("f"), 100);

        let mut tree = Scanner::default().build(root).await.unwrap();
        set_mtime(&root.join("f"), 300);

        DiffEngine::default().check(&mut tree).await.unwrap();
        let node = tree.node(root).unwrap();
        assert_eq!(node.files["f"].status, FileStatus::Add);
        assert_eq!(node.status, DirStatus::Add);
    }

    #[tokio::test]
    async fn test_deleted_subtree_marks_only_its_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("b/c")).unwrap();
        std::fs::write(root.join("b/x.txt"), b"x").unwrap();
        std::fs::write(root.join("b/c/y.txt"), b"y").unwrap();

        let mut tree = settled_tree(root).await;
        std::fs::remove_dir_all(root.join("b")).unwrap();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty, vec![root.to_path_buf()]);

        assert_eq!(tree.node(root).unwrap().status, DirStatus::Modify);
        let b = tree.node(&root.join("b")).unwrap();
        assert_eq!(b.status, DirStatus::Delete);
        assert_eq!(b.files["x.txt"].status, FileStatus::Same);

        let c = tree.node(&root.join("b/c")).unwrap();
        assert_eq!(c.status, DirStatus::Same);
        assert_eq!(c.files["y.txt"].status, FileStatus::Same);
        assert!(!tree.node(root).unwrap().existence().contains_key(&root.join("b")));
    }

    #[tokio::test]
    async fn test_deleted_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("gone.txt"), b"x").unwrap();

        let mut tree = settled_tree(root).await;
        std::fs::remove_file(root.join("gone.txt")).unwrap();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(
            tree.node(root).unwrap().files["gone.txt"].status,
            FileStatus::Delete
        );

        // A second pass does not report the same deletion again
        assert!(DiffEngine::default().check(&mut tree).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_subdirectory_is_built_as_add() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let mut tree = settled_tree(root).await;

        std::fs::create_dir_all(root.join("n/m")).unwrap();
        std::fs::write(root.join("n/m/z.txt"), b"z").unwrap();

        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();
        assert_eq!(dirty, vec![root.to_path_buf()]);
        assert_eq!(tree.node(&root.join("n")).unwrap().status, DirStatus::Add);
        let m = tree.node(&root.join("n/m")).unwrap();
        assert_eq!(m.status, DirStatus::Add);
        assert_eq!(m.files["z.txt"].status, FileStatus::Add);
    }

    #[tokio::test]
    async fn test_nested_change_propagates_upwards() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("p/q")).unwrap();
        let mut tree = settled_tree(root).await;

        std::fs::write(root.join("p/q/new.txt"), b"n").unwrap();
        let dirty = DiffEngine::default().check(&mut tree).await.unwrap();

        assert_eq!(
            dirty,
            vec![root.join("p/q"), root.join("p"), root.to_path_buf()]
        );
        assert_eq!(tree.node(&root.join("p")).unwrap().status, DirStatus::Modify);
        assert_eq!(tree.node(root).unwrap().status, DirStatus::Modify);
    }

    #[tokio::test]
    async fn test_type_flip_file_to_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("thing"), b"x").unwrap();
        let mut tree = settled_tree(root).await;

        std::fs::remove_file(root.join("thing")).unwrap();
        std::fs::create_dir(root.join("thing")).unwrap();

        DiffEngine::default().check(&mut tree).await.unwrap();
        let node = tree.node(root).unwrap();
        assert_eq!(node.files["thing"].status, FileStatus::Delete);
        assert!(node.children.contains("thing"));
        assert_eq!(tree.node(&root.join("thing")).unwrap().status, DirStatus::Add);
    }

    #[tokio::test]
    async fn test_type_flip_directory_to_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("thing")).unwrap();
        let mut tree = settled_tree(root).await;

        std::fs::remove_dir(root.join("thing")).unwrap();
        std::fs::write(root.join("thing"), b"x").unwrap();

        DiffEngine::default().check(&mut tree).await.unwrap();
        let node = tree.node(root).unwrap();
        assert_eq!(node.files["thing"].status, FileStatus::Add);
        assert_eq!(
            tree.node(&root.join("thing")).unwrap().status,
            DirStatus::Delete
        );
    }

    #[tokio::test]
    async fn test_recreated_directory_waits_for_eviction() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("d")).unwrap();
        let mut tree = settled_tree(root).await;
        let engine = DiffEngine::default();

        std::fs::remove_dir(root.join("d")).unwrap();
        engine.check(&mut tree).await.unwrap();
        std::fs::create_dir(root.join("d")).unwrap();
        std::fs::write(root.join("d/new.txt"), b"n").unwrap();

        let dirty = engine.check(&mut tree).await.unwrap();
        assert!(dirty.is_empty());
        let d = tree.node(&root.join("d")).unwrap();
        assert_eq!(d.status, DirStatus::Delete);
        assert!(d.files.is_empty());
    }

    #[tokio::test]
    async fn test_failed_pass_leaves_node_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        let mut tree = settled_tree(root).await;
        let before = tree.node(root).unwrap().clone();

        std::fs::write(root.join("new.txt"), b"n").unwrap();
        std::fs::remove_dir_all(root).unwrap();

        let mut dirty = Vec::new();
        let err = DiffEngine::default()
            .check_into(&mut tree, &mut dirty)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), autoup_types::ErrorKind::Io);
        assert!(dirty.is_empty());
        assert_eq!(tree.node(root).unwrap(), &before);
    }

    /// Create a directory chain under `parent` whose absolute path exceeds `PATH_MAX`
    #[cfg(unix)]
    fn create_overlong_chain(parent: &Path) {
        let name = "n".repeat(200);
        let head: PathBuf = std::iter::repeat(name.as_str()).take(15).collect();
        std::fs::create_dir_all(parent.join(&head)).unwrap();

        let tail: PathBuf = std::iter::repeat(name.as_str()).take(10).collect();
        let status = std::process::Command::new("mkdir")
            .arg("-p")
            .arg(&tail)
            .current_dir(parent.join(&head))
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_child_keeps_parent_and_completed_siblings() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for name in ["a", "b", "c", "m", "y"] {
            std::fs::create_dir(root.join(name)).unwrap();
        }
        let mut tree = settled_tree(root).await;
        let root_before = tree.node(root).unwrap().clone();
        let m_before = tree.node(&root.join("m")).unwrap().clone();
        let y_before = tree.node(&root.join("y")).unwrap().clone();

        std::fs::write(root.join("new.txt"), b"n").unwrap();
        for name in ["a", "b", "c", "y"] {
            std::fs::write(root.join(name).join("x.txt"), b"x").unwrap();
        }
        create_overlong_chain(&root.join("m"));

        let mut dirty = Vec::new();
        let err = DiffEngine::default()
            .check_into(&mut tree, &mut dirty)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), autoup_types::ErrorKind::Io);

        // Siblings listed before `m` finished their pass and stay recorded
        let completed: Vec<PathBuf> = ["a", "b", "c"].iter().map(|n| root.join(n)).collect();
        assert_eq!(dirty, completed);
        for path in &completed {
            let node = tree.node(path).unwrap();
            assert_eq!(node.status, DirStatus::Modify);
            assert_eq!(node.files["x.txt"].status, FileStatus::Add);
            assert_eq!(node.generation(), 2);
            assert!(node.existence().contains_key(&path.join("x.txt")));
        }

        assert_eq!(tree.node(root).unwrap(), &root_before);
        assert_eq!(tree.node(&root.join("m")).unwrap(), &m_before);
        assert_eq!(tree.node(&root.join("y")).unwrap(), &y_before);
        assert!(!tree.contains(&root.join("m").join("n".repeat(200))));
    }

    #[tokio::test]
    async fn test_existence_index_holds_current_generation() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        let mut tree = settled_tree(root).await;
        let engine = DiffEngine::default();

        engine.check(&mut tree).await.unwrap();
        engine.check(&mut tree).await.unwrap();

        let node = tree.node(root).unwrap();
        assert_eq!(node.generation(), 3);
        assert_eq!(node.existence().len(), 2);
        assert!(node.existence().values().all(|g| *g == 3));
    }
}
