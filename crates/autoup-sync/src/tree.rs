//! In-memory snapshot of a watched directory hierarchy
//!
//! The tree is one arena of [`DirNode`]s keyed by absolute path. Parent/child relations are
//! stored as child names on the parent; a child's path is always its parent's path joined with
//! the name. The arena doubles as the path index used by the differ and the uploader.

use autoup_types::{DirStatus, FileStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A tracked regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path
    pub path: PathBuf,
    /// Last observed modification time
    pub modified: SystemTime,
    /// Sync status
    pub status: FileStatus,
}

impl FileEntry {
    /// Create an entry for a newly discovered file
    pub fn new(path: PathBuf, modified: SystemTime) -> Self {
        Self {
            path,
            modified,
            status: FileStatus::Add,
        }
    }

    /// Whether the file still exists locally as far as the tree knows
    pub fn is_live(&self) -> bool {
        !matches!(self.status, FileStatus::Delete | FileStatus::ShiftDelete)
    }
}

/// A tracked directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirNode {
    /// Absolute path, the node's identity
    pub path: PathBuf,
    /// Names of child directories
    pub children: BTreeSet<String>,
    /// Files directly inside this directory, keyed by name
    pub files: BTreeMap<String, FileEntry>,
    /// Sync status
    pub status: DirStatus,
    pub(crate) seen: HashMap<PathBuf, u64>,
    pub(crate) generation: u64,
}

impl DirNode {
    /// Create an empty node
    pub fn new(path: PathBuf, status: DirStatus) -> Self {
        Self {
            path,
            children: BTreeSet::new(),
            files: BTreeMap::new(),
            status,
            seen: HashMap::new(),
            generation: 0,
        }
    }

    /// Path of the child named `name`
    pub fn child_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Generation of the last completed scan of this node
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Existence index: live child and file paths tagged with the generation that last saw them
    pub fn existence(&self) -> &HashMap<PathBuf, u64> {
        &self.seen
    }

    /// Whether the directory still exists locally as far as the tree knows
    pub fn is_live(&self) -> bool {
        !matches!(self.status, DirStatus::Delete | DirStatus::ShiftDelete)
    }

    /// Mark the node changed unless it already carries a pending status
    pub(crate) fn touch(&mut self) {
        if self.status == DirStatus::Same {
            self.status = DirStatus::Modify;
        }
    }
}

/// Snapshot of one watched directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTree {
    root: PathBuf,
    nodes: HashMap<PathBuf, DirNode>,
}

impl SnapshotTree {
    /// Create a tree holding only an empty root node
    pub fn new(root: PathBuf, status: DirStatus) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root.clone(), DirNode::new(root.clone(), status));
        Self { root, nodes }
    }

    pub(crate) fn from_parts(root: PathBuf, nodes: HashMap<PathBuf, DirNode>) -> Self {
        Self { root, nodes }
    }

    /// Absolute path of the watched directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a node by absolute path
    pub fn node(&self, path: &Path) -> Option<&DirNode> {
        self.nodes.get(path)
    }

    /// Look up a node by absolute path, mutably
    pub fn node_mut(&mut self, path: &Path) -> Option<&mut DirNode> {
        self.nodes.get_mut(path)
    }

    /// Whether a directory is tracked
    pub fn contains(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    /// Number of tracked directories
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree tracks no directory at all
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over every tracked directory
    pub fn nodes(&self) -> impl Iterator<Item = &DirNode> {
        self.nodes.values()
    }

    /// Sorted paths of every directory whose status is not `Same`
    pub fn dirty_dirs(&self) -> Vec<PathBuf> {
        let mut dirty: Vec<PathBuf> = self
            .nodes
            .values()
            .filter(|node| node.status.is_pending())
            .map(|node| node.path.clone())
            .collect();
        dirty.sort();
        dirty
    }

    /// Attach detached nodes built by a scan
    pub(crate) fn insert_nodes(&mut self, nodes: HashMap<PathBuf, DirNode>) {
        self.nodes.extend(nodes);
    }

    /// Whether some proper ancestor of `path` is already scheduled for remote removal
    pub fn has_deleted_ancestor(&self, path: &Path) -> bool {
        path.ancestors()
            .skip(1)
            .take_while(|ancestor| ancestor.starts_with(&self.root))
            .filter_map(|ancestor| self.nodes.get(ancestor))
            .any(|node| !node.is_live())
    }

    /// Reset every node's existence index to its live children and files
    pub(crate) fn rebuild_existence(&mut self, generation: u64) {
        let indexes: Vec<(PathBuf, HashMap<PathBuf, u64>)> = self
            .nodes
            .values()
            .map(|node| {
                let mut seen = HashMap::new();
                for name in &node.children {
                    let child = node.child_path(name);
                    if self.nodes.get(&child).is_some_and(DirNode::is_live) {
                        seen.insert(child, generation);
                    }
                }
                for file in node.files.values().filter(|file| file.is_live()) {
                    seen.insert(file.path.clone(), generation);
                }
                (node.path.clone(), seen)
            })
            .collect();

        for (path, seen) in indexes {
            if let Some(node) = self.nodes.get_mut(&path) {
                node.seen = seen;
                node.generation = generation;
            }
        }
    }

    /// Detach every `ShiftDelete` directory and file
    ///
    /// Removed directories take every arena entry below them along. Returns the number of
    /// directories and files evicted.
    pub fn evict_tombstones(&mut self) -> (usize, usize) {
        let tombstones: Vec<PathBuf> = self
            .nodes
            .values()
            .filter(|node| node.status == DirStatus::ShiftDelete && node.path != self.root)
            .map(|node| node.path.clone())
            .collect();

        for path in &tombstones {
            let name = path.file_name().and_then(|name| name.to_str());
            if let (Some(parent), Some(name)) = (path.parent(), name) {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    parent.children.remove(name);
                }
            }
        }

        let mut files = 0;
        for node in self.nodes.values_mut() {
            let before = node.files.len();
            node.files
                .retain(|_, file| file.status != FileStatus::ShiftDelete);
            files += before - node.files.len();
        }

        if !tombstones.is_empty() {
            self.nodes
                .retain(|path, _| !tombstones.iter().any(|dead| path.starts_with(dead)));
        }

        (tombstones.len(), files)
    }

    /// Indented status dump of the subtree at `path`
    ///
    /// Each line is `name:code`. Lines below the queried directory are prefixed with two dashes
    /// per level and a `>`; files sit one level below their directory and precede its
    /// subdirectories. Returns `None` when the path is not a tracked directory.
    pub fn render_status(&self, path: &Path) -> Option<String> {
        let node = self.nodes.get(path)?;
        let mut out = String::new();
        self.render_node(node, 0, &mut out);
        Some(out)
    }

    fn render_node(&self, node: &DirNode, depth: usize, out: &mut String) {
        let name = node
            .path
            .file_name()
            .map_or_else(|| node.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        push_line(out, depth, &name, node.status.code());

        for (name, file) in &node.files {
            push_line(out, depth + 1, name, file.status.code());
        }
        for name in &node.children {
            if let Some(child) = self.nodes.get(&node.child_path(name)) {
                self.render_node(child, depth + 1, out);
            }
        }
    }
}

fn push_line(out: &mut String, depth: usize, name: &str, code: u8) {
    if depth > 0 {
        out.push_str(&"-".repeat(2 * depth));
        out.push('>');
    }
    out.push_str(&format!("{}:{}\n", name, code));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// /w with file f.txt, subdirectory sub holding g.txt, and subdirectory sub/deep
    fn sample_tree() -> SnapshotTree {
        let root = PathBuf::from("/w");
        let mut tree = SnapshotTree::new(root.clone(), DirStatus::Same);

        let sub = root.join("sub");
        let deep = sub.join("deep");
        let mut sub_node = DirNode::new(sub.clone(), DirStatus::Same);
        sub_node.children.insert("deep".to_string());
        sub_node.files.insert(
            "g.txt".to_string(),
            FileEntry::new(sub.join("g.txt"), at(10)),
        );

        let mut nodes = HashMap::new();
        nodes.insert(sub.clone(), sub_node);
        nodes.insert(deep.clone(), DirNode::new(deep, DirStatus::Add));
        tree.insert_nodes(nodes);

        let root_node = tree.node_mut(&root).unwrap();
        root_node.children.insert("sub".to_string());
        let mut file = FileEntry::new(root.join("f.txt"), at(5));
        file.status = FileStatus::Same;
        root_node.files.insert("f.txt".to_string(), file);
        tree
    }

    #[test]
    fn test_render_status_format() {
        let tree = sample_tree();
        let dump = tree.render_status(Path::new("/w")).unwrap();
        assert_eq!(dump, "w:0\n-->f.txt:0\n-->sub:0\n---->g.txt:2\n---->deep:2\n");

        let sub = tree.render_status(Path::new("/w/sub")).unwrap();
        assert_eq!(sub, "sub:0\n-->g.txt:2\n-->deep:2\n");
    }

    #[test]
    fn test_render_status_untracked() {
        let tree = sample_tree();
        assert!(tree.render_status(Path::new("/w/missing")).is_none());
        assert!(tree.render_status(Path::new("/w/f.txt")).is_none());
    }

    #[test]
    fn test_dirty_dirs_sorted() {
        let mut tree = sample_tree();
        tree.node_mut(Path::new("/w")).unwrap().status = DirStatus::Modify;
        assert_eq!(
            tree.dirty_dirs(),
            vec![PathBuf::from("/w"), PathBuf::from("/w/sub/deep")]
        );
    }

    #[test]
    fn test_has_deleted_ancestor() {
        let mut tree = sample_tree();
        assert!(!tree.has_deleted_ancestor(Path::new("/w/sub/deep")));

        tree.node_mut(Path::new("/w/sub")).unwrap().status = DirStatus::Delete;
        assert!(tree.has_deleted_ancestor(Path::new("/w/sub/deep")));
        assert!(!tree.has_deleted_ancestor(Path::new("/w/sub")));
    }

    #[test]
    fn test_evict_tombstones_purges_subtree() {
        let mut tree = sample_tree();
        tree.node_mut(Path::new("/w/sub")).unwrap().status = DirStatus::ShiftDelete;
        tree.node_mut(Path::new("/w"))
            .unwrap()
            .files
            .get_mut("f.txt")
            .unwrap()
            .status = FileStatus::ShiftDelete;

        let (dirs, files) = tree.evict_tombstones();
        assert_eq!((dirs, files), (1, 1));
        assert_eq!(tree.len(), 1);
        assert!(!tree.contains(Path::new("/w/sub/deep")));

        let root = tree.node(Path::new("/w")).unwrap();
        assert!(root.children.is_empty());
        assert!(root.files.is_empty());
    }

    #[test]
    fn test_evict_does_not_touch_sibling_prefixes() {
        let mut tree = sample_tree();
        let sibling = PathBuf::from("/w/sub2");
        let mut nodes = HashMap::new();
        nodes.insert(sibling.clone(), DirNode::new(sibling, DirStatus::Same));
        tree.insert_nodes(nodes);
        tree.node_mut(Path::new("/w"))
            .unwrap()
            .children
            .insert("sub2".to_string());

        tree.node_mut(Path::new("/w/sub")).unwrap().status = DirStatus::ShiftDelete;
        tree.evict_tombstones();
        assert!(tree.contains(Path::new("/w/sub2")));
    }

    #[test]
    fn test_rebuild_existence_skips_pending_deletes() {
        let mut tree = sample_tree();
        tree.node_mut(Path::new("/w/sub/deep")).unwrap().status = DirStatus::Delete;
        tree.rebuild_existence(7);

        let sub = tree.node(Path::new("/w/sub")).unwrap();
        assert_eq!(sub.generation(), 7);
        assert_eq!(sub.existence().len(), 1);
        assert_eq!(sub.existence().get(Path::new("/w/sub/g.txt")), Some(&7));

        let root = tree.node(Path::new("/w")).unwrap();
        assert_eq!(root.existence().len(), 2);
    }
}
