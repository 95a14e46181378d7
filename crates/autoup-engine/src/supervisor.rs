//! Runs every enabled project of a configuration

use crate::project::{Project, ProjectSettings};
use autoup_config::{Config, RemoteConfig};
use autoup_types::{Connector, Error, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Owns one [`Project`] per enabled configured project
///
/// Projects start and stop independently: one that fails to open is reported through
/// [`Supervisor::failures`] while the others keep running.
#[derive(Debug, Default)]
pub struct Supervisor {
    projects: BTreeMap<String, Project>,
    failures: Vec<(String, Error)>,
}

impl Supervisor {
    /// Open every enabled project, resolving remotes by address scheme
    pub async fn start(config: &Config) -> Self {
        Self::start_with(config, autoup_transport::connector_for).await
    }

    /// Open every enabled project with a custom remote resolver
    pub async fn start_with<F>(config: &Config, resolve: F) -> Self
    where
        F: Fn(&RemoteConfig) -> Result<Arc<dyn Connector>>,
    {
        let opening = config.enabled_projects().map(|project| {
            let settings = ProjectSettings::from_config(project, &config.schedule);
            let connector = resolve(&project.remote);
            async move {
                let name = settings.name.clone();
                let result = match connector {
                    Ok(connector) => Project::open(settings, connector).await,
                    Err(e) => Err(e),
                };
                (name, result)
            }
        });

        let mut supervisor = Self::default();
        for (name, result) in join_all(opening).await {
            match result {
                Ok(project) => {
                    supervisor.projects.insert(name, project);
                }
                Err(e) => {
                    error!("Project '{}' failed to start: {}", name, e);
                    supervisor.failures.push((name, e));
                }
            }
        }

        info!(
            "{} projects running, {} failed",
            supervisor.projects.len(),
            supervisor.failures.len()
        );
        supervisor
    }

    /// Names of the running projects, sorted
    pub fn project_names(&self) -> Vec<&str> {
        self.projects.keys().map(String::as_str).collect()
    }

    /// Look up a running project
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.get(name)
    }

    /// Projects that failed to start, with the reason
    pub fn failures(&self) -> &[(String, Error)] {
        &self.failures
    }

    /// Number of running projects
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Whether no project is running
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Status dump of `path` inside project `name`
    pub async fn status(&self, name: &str, path: &Path) -> Option<String> {
        match self.projects.get(name) {
            Some(project) => project.status(path).await,
            None => None,
        }
    }

    /// Close every project concurrently
    ///
    /// All projects are closed even when some fail; the first error is returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down {} projects", self.projects.len());

        let closing = self.projects.iter_mut().map(|(name, project)| async move {
            let result = project.close().await;
            if let Err(e) = &result {
                error!("Project '{}' did not close cleanly: {}", name, e);
            }
            result
        });

        join_all(closing)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()
            .map(|_| ())
    }
}
