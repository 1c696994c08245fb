//! Configuration loading from disk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::EgoConfig;
use crate::config::store::ConfigSnapshot;
use crate::config::validation::{validate_config, ValidationError};

/// Config file used when neither `--config` nor `EGO_CONFIG_PATH` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/local.toml";

/// Error type for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", ValidationErrors(.0))]
    Validation(Vec<ValidationError>),

    #[error("invalid config at `{key}`: {source}")]
    Key {
        key: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config watcher error: {0}")]
    Watch(#[from] notify::Error),
}

struct ValidationErrors<'a>(&'a [ValidationError]);

impl fmt::Display for ValidationErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Where the config path came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named by `--config` or `EGO_CONFIG_PATH`; must exist.
    Explicit(PathBuf),
    /// The fallback path; a missing file means "use defaults".
    Default(PathBuf),
}

impl ConfigSource {
    pub fn resolve(flag: Option<&Path>, env: Option<&str>) -> Self {
        match (flag, env) {
            (Some(path), _) => ConfigSource::Explicit(path.to_path_buf()),
            (None, Some(path)) if !path.is_empty() => ConfigSource::Explicit(PathBuf::from(path)),
            _ => ConfigSource::Default(PathBuf::from(DEFAULT_CONFIG_PATH)),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Explicit(path) | ConfigSource::Default(path) => path,
        }
    }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ConfigSnapshot, ConfigError> {
    let raw: toml::Table = content.parse()?;
    let config: EgoConfig = toml::Value::Table(raw.clone()).try_into()?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(ConfigSnapshot {
        config,
        raw,
        source: None,
    })
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut snapshot = parse_config(&content)?;
    snapshot.source = Some(path.to_path_buf());
    Ok(snapshot)
}

/// Load the config named by `source`, falling back to defaults when the
/// default file is absent.
pub fn load_source(source: &ConfigSource) -> Result<ConfigSnapshot, ConfigError> {
    match source {
        ConfigSource::Default(path) if !path.exists() => {
            tracing::debug!(target: "ego", path = %path.display(), "No config file, using defaults");
            Ok(ConfigSnapshot::default())
        }
        _ => load_config(source.path()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file_and_keeps_raw_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logger]
level = "debug"

[server.http]
port = 9091
"#
        )
        .unwrap();

        let snapshot = load_config(file.path()).unwrap();
        assert_eq!(snapshot.config.logger.level, "debug");
        assert_eq!(snapshot.source.as_deref(), Some(file.path()));
        assert!(snapshot.raw.contains_key("server"));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = parse_config("[logger]\nformat = \"xml\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("logger.format"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let source = ConfigSource::resolve(Some(Path::new("/nonexistent/ego.toml")), None);
        assert!(matches!(load_source(&source), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn flag_wins_over_env() {
        let source = ConfigSource::resolve(Some(Path::new("a.toml")), Some("b.toml"));
        assert_eq!(source, ConfigSource::Explicit(PathBuf::from("a.toml")));

        let source = ConfigSource::resolve(None, Some("b.toml"));
        assert_eq!(source, ConfigSource::Explicit(PathBuf::from("b.toml")));

        let source = ConfigSource::resolve(None, None);
        assert_eq!(source, ConfigSource::Default(PathBuf::from(DEFAULT_CONFIG_PATH)));
    }
}
