//! Configuration loader utilities

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "AUTOUP";

/// Configuration loader with common loading patterns
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the first default location that exists
    pub fn load_default() -> ConfigResult<Config> {
        let mut builder = ConfigBuilder::new();
        if let Some(path) = Self::config_exists() {
            builder = builder.file(path);
        }
        builder.env(ENV_PREFIX).build()
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Config> {
        ConfigBuilder::new()
            .required_file(path)
            .env(ENV_PREFIX)
            .build()
    }

    /// Serialize a configuration in the format matching the file extension (YAML by default)
    pub fn render(config: &Config, path: Option<&Path>) -> ConfigResult<String> {
        let extension = path.and_then(|p| p.extension()).and_then(|ext| ext.to_str());
        match extension {
            Some("toml") => {
                toml::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                    message: format!("Failed to serialize to TOML: {}", e),
                })
            }
            Some("json") => {
                serde_json::to_string_pretty(config).map_err(|e| ConfigError::Serialization {
                    message: format!("Failed to serialize to JSON: {}", e),
                })
            }
            _ => serde_yaml::to_string(config).map_err(|e| ConfigError::Serialization {
                message: format!("Failed to serialize to YAML: {}", e),
            }),
        }
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(config: &Config, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = Self::render(config, Some(path))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Default configuration file paths in order of preference
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("autoup.yaml"),
            PathBuf::from("autoup.yml"),
            PathBuf::from("autoup.toml"),
            PathBuf::from("autoup.json"),
        ];

        #[cfg(unix)]
        {
            paths.push(PathBuf::from("/etc/autoup/config.yaml"));
            paths.push(PathBuf::from("/etc/autoup/config.toml"));
        }

        paths
    }

    /// First configuration file found in the default locations
    pub fn config_exists() -> Option<PathBuf> {
        Self::default_config_paths()
            .into_iter()
            .find(|path| path.exists())
    }
}
