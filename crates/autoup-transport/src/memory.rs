//! In-memory remote
//!
//! [`MemoryRemote`] holds remote directories and file contents in process memory and logs every
//! successful operation. Faults can be armed per operation kind and path so that reconnect and
//! partial-failure behavior can be exercised without a network.

use async_trait::async_trait;
use autoup_types::{Connector, Error, Result, Transport};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Kind of a remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// File upload
    Put,
    /// Directory creation
    Mkdir,
    /// File removal
    Remove,
    /// Recursive directory removal
    RemoveDirectory,
}

/// One logged remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOp {
    /// Operation kind
    pub kind: OpKind,
    /// Remote path the operation targeted
    pub path: String,
}

#[derive(Debug)]
struct Fault {
    kind: OpKind,
    path: Option<String>,
    remaining: usize,
}

#[derive(Debug, Default)]
struct RemoteState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    ops: Vec<RemoteOp>,
    faults: Vec<Fault>,
    connect_failures: usize,
    connects: usize,
    closes: usize,
}

impl RemoteState {
    fn take_fault(&mut self, kind: OpKind, path: &str) -> bool {
        let hit = self.faults.iter_mut().find(|fault| {
            fault.kind == kind
                && fault.remaining > 0
                && fault.path.as_deref().map_or(true, |p| p == path)
        });
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                true
            }
            None => false,
        }
    }
}

/// Shared handle to an in-memory remote
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    /// Create an empty remote
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fail the next `times` operations of `kind`, on any path
    pub fn fail_next(&self, kind: OpKind, times: usize) {
        self.lock().faults.push(Fault {
            kind,
            path: None,
            remaining: times,
        });
    }

    /// Fail the next `times` operations of `kind` on exactly `path`
    pub fn fail_on(&self, kind: OpKind, path: &str, times: usize) {
        self.lock().faults.push(Fault {
            kind,
            path: Some(path.to_string()),
            remaining: times,
        });
    }

    /// Refuse the next `times` connection attempts
    pub fn fail_connects(&self, times: usize) {
        self.lock().connect_failures += times;
    }

    /// Whether a directory exists
    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    /// Whether a file exists
    pub fn has_file(&self, path: &str) -> bool {
        self.lock().files.contains_key(path)
    }

    /// Content of a remote file
    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// All remote directories, sorted
    pub fn dirs(&self) -> Vec<String> {
        self.lock().dirs.iter().cloned().collect()
    }

    /// All remote files, sorted
    pub fn files(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Successful operations in the order they happened
    pub fn ops(&self) -> Vec<RemoteOp> {
        self.lock().ops.clone()
    }

    /// Forget the operation log
    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Number of successful operations of `kind` on `path`
    pub fn count(&self, kind: OpKind, path: &str) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.kind == kind && op.path == path)
            .count()
    }

    /// Number of successful connections
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Number of closed connections
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn apply(&self, kind: OpKind, path: &str, content: Option<Vec<u8>>) -> Result<()> {
        let mut state = self.lock();
        if state.take_fault(kind, path) {
            return Err(Error::transport(format!(
                "Injected {:?} failure on '{}'",
                kind, path
            )));
        }

        match kind {
            OpKind::Put => {
                state
                    .files
                    .insert(path.to_string(), content.unwrap_or_default());
            }
            OpKind::Mkdir => {
                state.dirs.insert(path.to_string());
            }
            OpKind::Remove => {
                state.files.remove(path);
            }
            OpKind::RemoveDirectory => {
                state.dirs.retain(|dir| !is_within(dir, path));
                state.files.retain(|file, _| !is_within(file, path));
            }
        }

        state.ops.push(RemoteOp {
            kind,
            path: path.to_string(),
        });
        Ok(())
    }
}

/// Whether `path` equals `dir` or lies below it, for either separator
fn is_within(path: &str, dir: &str) -> bool {
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with(['/', '\\']))
}

/// Transport connected to a [`MemoryRemote`]
#[derive(Debug)]
pub struct MemoryTransport {
    remote: MemoryRemote,
    closed: bool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::transport("Connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.ensure_open()?;
        let content = tokio::fs::read(local).await.map_err(|e| Error::Io {
            message: format!("Failed to read '{}': {}", local.display(), e),
        })?;
        self.remote.apply(OpKind::Put, remote, Some(content))?;
        debug!("Uploaded: {} -> {}", local.display(), remote);
        Ok(())
    }

    async fn mkdir(&mut self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        self.remote.apply(OpKind::Mkdir, remote, None)
    }

    async fn remove(&mut self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        self.remote.apply(OpKind::Remove, remote, None)
    }

    async fn remove_directory(&mut self, remote: &str) -> Result<()> {
        self.ensure_open()?;
        self.remote.apply(OpKind::RemoveDirectory, remote, None)
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.remote.lock().closes += 1;
        }
        Ok(())
    }
}

/// Connector handing out transports onto one [`MemoryRemote`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    name: String,
    remote: MemoryRemote,
}

impl MemoryConnector {
    /// Create a connector with a fresh empty remote
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::with_remote(name, MemoryRemote::new())
    }

    /// Create a connector onto an existing remote
    pub fn with_remote<S: Into<String>>(name: S, remote: MemoryRemote) -> Self {
        Self {
            name: name.into(),
            remote,
        }
    }

    /// The remote this connector writes to
    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        {
            let mut state = self.remote.lock();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(Error::transport(format!(
                    "Connection to '{}' refused",
                    self.endpoint()
                )));
            }
            state.connects += 1;
        }

        Ok(Box::new(MemoryTransport {
            remote: self.remote.clone(),
            closed: false,
        }))
    }

    fn endpoint(&self) -> String {
        format!("memory://{}", self.name)
    }
}
