//! Layered configuration sources
//!
//! Layers are merged in a fixed order, later ones winning: the built-in defaults, configuration
//! files in the order they were added, `PREFIX__SECTION__KEY` environment variables and finally
//! explicit key overrides. Project lists are replaced as a whole by the layer that sets them.

use crate::{Config, ConfigError, ConfigResult};
use config::{Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Separator between the environment prefix, sections and keys
pub const ENV_SEPARATOR: &str = "__";

/// Builder merging configuration layers into a validated [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    files: Vec<FileLayer>,
    env_prefix: Option<String>,
    overrides: Vec<(String, String)>,
}

#[derive(Debug)]
struct FileLayer {
    path: PathBuf,
    required: bool,
}

impl ConfigBuilder {
    /// Start from the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer a file if it exists
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files.push(FileLayer {
            path: path.as_ref().to_path_buf(),
            required: false,
        });
        self
    }

    /// Layer a file that must exist
    pub fn required_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.files.push(FileLayer {
            path: path.as_ref().to_path_buf(),
            required: true,
        });
        self
    }

    /// Read overrides such as `AUTOUP__LOGGING__LEVEL` from the environment
    pub fn env<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Force a dotted key, e.g. `schedule.check_interval_secs`
    pub fn set<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Merge every layer and validate the result
    pub fn build(self) -> ConfigResult<Config> {
        let mut layers =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        for layer in self.files {
            if !layer.path.exists() {
                if layer.required {
                    return Err(ConfigError::Io {
                        path: layer.path,
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Configuration file not found",
                        ),
                    });
                }
                continue;
            }
            let format = file_format(&layer.path);
            layers = layers.add_source(File::from(layer.path).format(format));
        }

        if let Some(prefix) = self.env_prefix {
            layers = layers.add_source(
                Environment::with_prefix(&prefix)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        for (key, value) in self.overrides {
            layers = layers.set_override(key, value)?;
        }

        let config: Config = layers.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// File format by extension, YAML unless `.toml` or `.json`
pub(crate) fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoup_types::PathStyle;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::Builder;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    const SITE_PROJECT: &str = r#"
projects:
  - name: site
    local_base_dir: /srv/site
    local_os: LINUX
    remote:
      address: sftp://backup.lan:2222
      user: deploy
    remote_base_dir: 'D:\backup\site'
    remote_os: Windows
    snapshot_file: /var/lib/autoup/site.json
"#;

    #[test]
    fn test_defaults_only() {
        let config = ConfigBuilder::new().build().unwrap();
        assert!(config.projects.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.log_file, None);
        assert_eq!(config.schedule.check_interval_secs, 2);
        assert_eq!(config.schedule.save_interval_secs, 1800);
    }

    #[test]
    fn test_yaml_project() {
        let file = write_config(".yaml", SITE_PROJECT);
        let config = ConfigBuilder::new().file(file.path()).build().unwrap();

        assert_eq!(config.schedule.check_interval_secs, 2);
        let project = &config.projects[0];
        assert!(project.enabled);
        assert_eq!(project.local_os, PathStyle::Unix);
        assert_eq!(project.remote_os, PathStyle::Windows);
        assert_eq!(project.remote_base_dir, r"D:\backup\site");
        assert_eq!(project.remote.user, "deploy");
        assert_eq!(project.skip_prefix, "skip_");
        assert_eq!(project.remote.password, None);
    }

    #[test]
    fn test_later_file_wins() {
        let base = write_config(".yaml", "logging:\n  level: warn\nschedule:\n  save_interval_secs: 60\n");
        let local = write_config(".toml", "[logging]\nlevel = \"debug\"\n");

        let config = ConfigBuilder::new()
            .file(base.path())
            .file(local.path())
            .build()
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.schedule.save_interval_secs, 60);
    }

    #[test]
    fn test_json_project() {
        let file = write_config(
            ".json",
            r#"{
  "projects": [{
    "name": "docs",
    "enabled": false,
    "local_base_dir": "/srv/docs",
    "remote": { "address": "memory://docs" },
    "remote_base_dir": "/docs",
    "snapshot_file": "/tmp/docs.json",
    "skip_prefix": "tmp_",
    "check_interval_secs": 10
  }]
}"#,
        );

        let config = ConfigBuilder::new().file(file.path()).build().unwrap();

        let project = &config.projects[0];
        assert!(!project.enabled);
        assert_eq!(project.skip_prefix, "tmp_");
        assert_eq!(project.check_interval_secs, Some(10));
        assert_eq!(config.enabled_projects().count(), 0);
    }

    #[test]
    fn test_override_beats_file() {
        let file = write_config(".yaml", "logging:\n  level: warn\n");
        let config = ConfigBuilder::new()
            .file(file.path())
            .set("logging.level", "trace")
            .set("schedule.check_interval_secs", "5")
            .build()
            .unwrap();

        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.schedule.check_interval_secs, 5);
    }

    #[rstest]
    #[case::zero_interval("schedule:\n  check_interval_secs: 0\n", "schedule.check_interval_secs")]
    #[case::bad_level("logging:\n  level: loud\n", "Log level")]
    fn test_invalid_values_rejected(#[case] content: &str, #[case] message: &str) {
        let file = write_config(".yaml", content);
        let err = ConfigBuilder::new().file(file.path()).build().unwrap_err();
        assert!(err.to_string().contains(message), "{}", err);
    }

    #[test]
    fn test_unknown_os_rejected() {
        let file = write_config(".yaml", &SITE_PROJECT.replace("LINUX", "beos"));
        assert!(ConfigBuilder::new().file(file.path()).build().is_err());
    }

    #[test]
    fn test_missing_optional_file_is_ignored() {
        let config = ConfigBuilder::new()
            .file("/nonexistent/autoup.yaml")
            .build()
            .unwrap();
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_missing_required_file_is_io_error() {
        let err = ConfigBuilder::new()
            .required_file("/nonexistent/autoup.yaml")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[rstest]
    #[case("autoup.toml", FileFormat::Toml)]
    #[case("autoup.json", FileFormat::Json)]
    #[case("autoup.yml", FileFormat::Yaml)]
    #[case("autoup", FileFormat::Yaml)]
    fn test_file_format(#[case] name: &str, #[case] expected: FileFormat) {
        assert_eq!(file_format(Path::new(name)), expected);
    }
}
