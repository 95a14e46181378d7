//! One managed directory: snapshot, connection and the periodic sync worker

use autoup_config::{ProjectConfig, ScheduleConfig};
use autoup_sync::{snapshot, DiffEngine, RemotePathMapper, ScanOptions, SnapshotTree, Syncer};
use autoup_types::{Connector, Error, PathStyle, Result, Transport, UploadStats};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Resolved settings of one project
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    /// Project name
    pub name: String,
    /// Watched local directory
    pub local_base_dir: PathBuf,
    /// Path style of the local host
    pub local_style: PathStyle,
    /// Remote directory mirroring `local_base_dir`
    pub remote_base_dir: String,
    /// Path style of the remote host
    pub remote_style: PathStyle,
    /// Where the snapshot is persisted
    pub snapshot_file: PathBuf,
    /// Scan options shared by the initial build and the differ
    pub scan: ScanOptions,
    /// Period of the check duty
    pub check_interval: Duration,
    /// Period of the persist duty
    pub save_interval: Duration,
}

impl ProjectSettings {
    /// Settings with default schedule and native path styles on both sides
    pub fn new<S, P, R, F>(name: S, local_base_dir: P, remote_base_dir: R, snapshot_file: F) -> Self
    where
        S: Into<String>,
        P: Into<PathBuf>,
        R: Into<String>,
        F: Into<PathBuf>,
    {
        let schedule = ScheduleConfig::default();
        Self {
            name: name.into(),
            local_base_dir: local_base_dir.into(),
            local_style: PathStyle::native(),
            remote_base_dir: remote_base_dir.into(),
            remote_style: PathStyle::native(),
            snapshot_file: snapshot_file.into(),
            scan: ScanOptions::default(),
            check_interval: schedule.check_interval(),
            save_interval: schedule.save_interval(),
        }
    }

    /// Settings of a configured project, falling back to the global schedule
    pub fn from_config(project: &ProjectConfig, defaults: &ScheduleConfig) -> Self {
        let schedule = project.schedule(defaults);
        Self {
            name: project.name.clone(),
            local_base_dir: project.local_base_dir.clone(),
            local_style: project.local_os,
            remote_base_dir: project.remote_base_dir.clone(),
            remote_style: project.remote_os,
            snapshot_file: project.snapshot_file.clone(),
            scan: ScanOptions::with_skip_prefix(project.skip_prefix.clone()),
            check_interval: schedule.check_interval(),
            save_interval: schedule.save_interval(),
        }
    }

    /// Override both duty periods
    #[must_use]
    pub fn with_intervals(mut self, check: Duration, save: Duration) -> Self {
        self.check_interval = check;
        self.save_interval = save;
        self
    }
}

/// Lifecycle state of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    /// Loading or building the snapshot
    Initializing,
    /// Worker running
    Running,
    /// Worker stopping, final persist pending
    Closing,
    /// Snapshot persisted and connection released
    Closed,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Mutable state guarded by the project lock
struct Session {
    tree: SnapshotTree,
    transport: Option<Box<dyn Transport>>,
    pending: BTreeSet<PathBuf>,
}

struct Shared {
    settings: ProjectSettings,
    connector: Arc<dyn Connector>,
    differ: DiffEngine,
    syncer: Syncer,
    session: Mutex<Session>,
}

/// A running project
///
/// Opening a project loads its snapshot (or builds and uploads a fresh one) and spawns one worker
/// task that runs the check and persist duties. Every duty takes the session lock, so scanning,
/// uploading and saving never overlap.
pub struct Project {
    shared: Arc<Shared>,
    state: ProjectState,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.shared.settings.name)
            .field("state", &self.state)
            .field("endpoint", &self.shared.connector.endpoint())
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Load or build the snapshot, bring the remote up to date and start the worker
    ///
    /// A snapshot that exists but cannot be decoded fails the startup.
    pub async fn open(settings: ProjectSettings, connector: Arc<dyn Connector>) -> Result<Self> {
        let span = info_span!("project", name = %settings.name);
        let shared = Self::initialize(settings, connector).instrument(span.clone()).await?;
        let shared = Arc::new(shared);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), shutdown_rx).instrument(span));

        info!("Project '{}' running", shared.settings.name);
        Ok(Self {
            shared,
            state: ProjectState::Running,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        })
    }

    async fn initialize(settings: ProjectSettings, connector: Arc<dyn Connector>) -> Result<Shared> {
        info!(
            "Initializing '{}' -> {} '{}'",
            settings.local_base_dir.display(),
            connector.endpoint(),
            settings.remote_base_dir
        );

        let differ = DiffEngine::new(settings.scan.clone());
        let syncer = Syncer::new(RemotePathMapper::new(
            settings.local_base_dir.clone(),
            settings.remote_base_dir.clone(),
            settings.local_style,
            settings.remote_style,
        ));

        let (tree, fresh) = match snapshot::load(&settings.snapshot_file).await? {
            Some(tree) => {
                if tree.root() != settings.local_base_dir {
                    return Err(Error::format(format!(
                        "Snapshot '{}' tracks '{}' instead of '{}'",
                        settings.snapshot_file.display(),
                        tree.root().display(),
                        settings.local_base_dir.display()
                    )));
                }
                info!(
                    "Restored snapshot from '{}' ({} directories)",
                    settings.snapshot_file.display(),
                    tree.len()
                );
                (tree, false)
            }
            None => {
                let tree = differ.scanner().build(&settings.local_base_dir).await?;
                (tree, true)
            }
        };

        let transport = match connector.connect().await {
            Ok(transport) => {
                info!("Connected to {}", connector.endpoint());
                Some(transport)
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", connector.endpoint(), e);
                None
            }
        };

        let pending = tree.dirty_dirs().into_iter().collect();
        let shared = Shared {
            settings,
            connector,
            differ,
            syncer,
            session: Mutex::new(Session {
                tree,
                transport,
                pending,
            }),
        };

        if fresh {
            let mut session = shared.session.lock().await;
            if let Err(e) = shared.upload_pending(&mut session).await {
                error!("Initial upload abandoned, will retry on the next check: {}", e);
            }
            if let Err(e) = shared.persist(&session.tree).await {
                warn!("Failed to persist initial snapshot: {}", e);
            }
        }

        Ok(shared)
    }

    /// Project name
    pub fn name(&self) -> &str {
        &self.shared.settings.name
    }

    /// Settings in effect
    pub fn settings(&self) -> &ProjectSettings {
        &self.shared.settings
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProjectState {
        self.state
    }

    /// Status dump of a tracked directory, `None` when the path is not tracked
    pub async fn status(&self, path: &Path) -> Option<String> {
        let session = self.shared.session.lock().await;
        session.tree.render_status(path)
    }

    /// Directories queued for the next upload
    pub async fn pending(&self) -> Vec<PathBuf> {
        let session = self.shared.session.lock().await;
        session.pending.iter().cloned().collect()
    }

    /// Run the check duty immediately
    pub async fn check_now(&self) -> Result<UploadStats> {
        let mut session = self.shared.session.lock().await;
        self.shared.check(&mut session).await
    }

    /// Run the persist duty immediately
    pub async fn save_now(&self) -> Result<()> {
        let session = self.shared.session.lock().await;
        self.shared.persist(&session.tree).await
    }

    /// Stop the worker, persist the snapshot and release the connection
    ///
    /// Waits for an in-flight duty to finish. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ProjectState::Closed {
            return Ok(());
        }
        self.state = ProjectState::Closing;
        let span = info_span!("project", name = %self.shared.settings.name);

        async {
            if let Some(shutdown_tx) = self.shutdown_tx.take() {
                let _ = shutdown_tx.send(()).await;
            }
            if let Some(worker) = self.worker.take() {
                if let Err(e) = worker.await {
                    warn!("Worker task ended abnormally: {}", e);
                }
            }

            let mut session = self.shared.session.lock().await;
            let result = self.shared.persist(&session.tree).await;
            if let Some(mut transport) = session.transport.take() {
                if let Err(e) = transport.close().await {
                    warn!("Failed to close connection: {}", e);
                }
            }

            self.state = ProjectState::Closed;
            info!("Project closed");
            result
        }
        .instrument(span)
        .await
    }
}

impl Shared {
    /// Diff the tree, then upload everything pending
    async fn check(&self, session: &mut Session) -> Result<UploadStats> {
        let mut dirty = Vec::new();
        if let Err(e) = self.differ.check_into(&mut session.tree, &mut dirty).await {
            warn!("Scan of '{}' failed: {}", self.settings.local_base_dir.display(), e);
        }
        if !dirty.is_empty() {
            debug!("{} directories changed", dirty.len());
        }
        session.pending.extend(dirty);

        if session.pending.is_empty() {
            return Ok(UploadStats::new());
        }
        self.upload_pending(session).await
    }

    /// Upload the pending set, retrying once on a fresh connection after a transport failure
    async fn upload_pending(&self, session: &mut Session) -> Result<UploadStats> {
        let batch: Vec<PathBuf> = session.pending.iter().cloned().collect();

        let result = match self.upload_once(session, &batch).await {
            Err(e) if e.needs_reconnect() => {
                warn!("Upload failed, retrying on a new connection: {}", e);
                self.disconnect(session).await;
                self.upload_once(session, &batch).await
            }
            other => other,
        };

        match result {
            Ok(stats) => {
                session.pending.clear();
                Ok(stats)
            }
            Err(e) => {
                if e.needs_reconnect() {
                    self.disconnect(session).await;
                }
                Err(e)
            }
        }
    }

    async fn upload_once(&self, session: &mut Session, batch: &[PathBuf]) -> Result<UploadStats> {
        if session.transport.is_none() {
            let transport = self.connector.connect().await?;
            info!("Connected to {}", self.connector.endpoint());
            session.transport = Some(transport);
        }
        let Some(transport) = session.transport.as_mut() else {
            return Err(Error::transport("No connection available"));
        };

        self.syncer
            .upload(&mut session.tree, &mut **transport, batch)
            .await
    }

    async fn disconnect(&self, session: &mut Session) {
        if let Some(mut transport) = session.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("Error while dropping broken connection: {}", e);
            }
        }
    }

    async fn persist(&self, tree: &SnapshotTree) -> Result<()> {
        snapshot::save(tree, &self.settings.snapshot_file).await
    }
}

async fn run_worker(shared: Arc<Shared>, mut shutdown_rx: mpsc::Receiver<()>) {
    let check_every = shared.settings.check_interval;
    let save_every = shared.settings.save_interval;

    let mut check = interval_at(Instant::now() + check_every, check_every);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut save = interval_at(Instant::now() + save_every, save_every);
    save.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        "Worker started: check every {:?}, persist every {:?}",
        check_every, save_every
    );

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("Shutdown requested");
                break;
            }
            _ = check.tick() => {
                let mut session = shared.session.lock().await;
                if let Err(e) = shared.check(&mut session).await {
                    error!("Upload abandoned, pending work kept for the next check: {}", e);
                }
            }
            _ = save.tick() => {
                let session = shared.session.lock().await;
                if let Err(e) = shared.persist(&session.tree).await {
                    warn!("Failed to persist snapshot: {}", e);
                }
            }
        }
    }
}
