//! Configuration management system for autoup
//!
//! This crate loads the list of mirrored projects together with logging and scheduling settings.
//!
//! # Features
//!
//! - **Multiple formats**: YAML, TOML and JSON configuration files
//! - **Validation**: unique project names and snapshot files, absolute local directories, positive
//!   intervals
//! - **Environment overrides**: override values with `AUTOUP__SECTION__KEY` variables
//! - **Defaults**: sensible defaults for every optional setting
//!
//! # Examples
//!
//! ```rust,no_run
//! use autoup_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .file("autoup.yaml")
//!     .env("AUTOUP")
//!     .set("logging.level", "debug")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! for project in config.enabled_projects() {
//!     println!("{} -> {}", project.name, project.remote.address);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use autoup_types::PathStyle;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Skip prefix applied when a project does not configure one
pub const DEFAULT_SKIP_PREFIX: &str = "skip_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for autoup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default timer settings for every project
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Mirrored directories
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Config {
    /// Projects whose `enabled` switch is on
    pub fn enabled_projects(&self) -> impl Iterator<Item = &ProjectConfig> {
        self.projects.iter().filter(|project| project.enabled)
    }

    /// Look up a project by name
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }

        self.schedule.validate("schedule")?;

        let mut names = HashSet::new();
        let mut snapshots = HashSet::new();
        for (index, project) in self.projects.iter().enumerate() {
            project.validate(index)?;
            if !names.insert(project.name.as_str()) {
                return Err(ConfigError::validation(format!(
                    "Duplicate project name '{}'",
                    project.name
                )));
            }
            if !snapshots.insert(project.snapshot_file.as_path()) {
                return Err(ConfigError::validation(format!(
                    "Project '{}' shares snapshot file '{}' with another project",
                    project.name,
                    project.snapshot_file.display()
                )));
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable file logging
    pub enable_file_logging: bool,
    /// Log file path
    pub log_file: Option<PathBuf>,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_file_logging: false,
            log_file: None,
            json_format: false,
            colored_output: true,
        }
    }
}

/// Timer configuration of the check and persist duties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between two change checks
    pub check_interval_secs: u64,
    /// Seconds between two periodic snapshot saves
    pub save_interval_secs: u64,
}

impl ScheduleConfig {
    /// Interval of the check duty
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Interval of the persist duty
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    fn validate(&self, key: &str) -> ConfigResult<()> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                format!("{}.check_interval_secs", key),
                "must be greater than 0",
            ));
        }
        if self.save_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                format!("{}.save_interval_secs", key),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 2,
            save_interval_secs: 30 * 60,
        }
    }
}

/// Connection settings of a remote endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote address; the scheme selects the transport
    pub address: String,
    /// Login user
    #[serde(default)]
    pub user: String,
    /// Login password
    #[serde(default)]
    pub password: Option<String>,
}

/// One mirrored directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Unique project name
    pub name: String,
    /// Whether the project is started
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Absolute local directory to mirror
    pub local_base_dir: PathBuf,
    /// Path style of the local host
    #[serde(default)]
    pub local_os: PathStyle,
    /// Remote endpoint
    pub remote: RemoteConfig,
    /// Remote directory receiving the mirror
    pub remote_base_dir: String,
    /// Path style of the remote host
    #[serde(default)]
    pub remote_os: PathStyle,
    /// Where the snapshot of this project is persisted
    pub snapshot_file: PathBuf,
    /// Entries whose name starts with this prefix are never tracked
    #[serde(default = "default_skip_prefix")]
    pub skip_prefix: String,
    /// Overrides `schedule.check_interval_secs`
    #[serde(default)]
    pub check_interval_secs: Option<u64>,
    /// Overrides `schedule.save_interval_secs`
    #[serde(default)]
    pub save_interval_secs: Option<u64>,
}

impl ProjectConfig {
    /// Effective schedule of this project
    pub fn schedule(&self, defaults: &ScheduleConfig) -> ScheduleConfig {
        ScheduleConfig {
            check_interval_secs: self
                .check_interval_secs
                .unwrap_or(defaults.check_interval_secs),
            save_interval_secs: self
                .save_interval_secs
                .unwrap_or(defaults.save_interval_secs),
        }
    }

    fn validate(&self, index: usize) -> ConfigResult<()> {
        let key = |field: &str| format!("projects[{}].{}", index, field);

        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_value(key("name"), "must not be empty"));
        }
        if !self.local_base_dir.is_absolute() {
            return Err(ConfigError::invalid_value(
                key("local_base_dir"),
                format!(
                    "'{}' must be an absolute path",
                    self.local_base_dir.display()
                ),
            ));
        }
        if self.remote.address.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                key("remote.address"),
                "must not be empty",
            ));
        }
        if self.remote_base_dir.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                key("remote_base_dir"),
                "must not be empty",
            ));
        }
        if self.snapshot_file.as_os_str().is_empty() {
            return Err(ConfigError::invalid_value(
                key("snapshot_file"),
                "must not be empty",
            ));
        }
        if self.check_interval_secs == Some(0) || self.save_interval_secs == Some(0) {
            return Err(ConfigError::invalid_value(
                key("interval"),
                "intervals must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_skip_prefix() -> String {
    DEFAULT_SKIP_PREFIX.to_string()
}
