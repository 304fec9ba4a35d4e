//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values taken from the command line or environment, applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub upstream_url: Option<String>,
    pub store_path: Option<PathBuf>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(url) = &self.upstream_url {
            config.upstream.base_url = url.clone();
        }
        if let Some(path) = &self.store_path {
            config.store.path = path.clone();
        }
    }
}

/// Load a configuration from an optional TOML file, apply overrides, then validate.
///
/// Without a file every section takes its defaults.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = load_config(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.listener.port, 8080);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[listener]\nport = 9000\n\n[upstream]\nbase_url = \"http://a.example/\""
        )
        .unwrap();

        let overrides = ConfigOverrides {
            port: Some(7000),
            upstream_url: Some("http://b.example/".into()),
            store_path: Some("audit.jsonl".into()),
        };
        let config = load_config(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.listener.port, 7000);
        assert_eq!(config.upstream.base_url, "http://b.example/");
        assert_eq!(config.store.path, PathBuf::from("audit.jsonl"));
    }

    #[test]
    fn test_invalid_upstream_is_fatal() {
        let overrides = ConfigOverrides {
            upstream_url: Some("::nope::".into()),
            ..Default::default()
        };
        let err = load_config(None, &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().starts_with("Validation failed: upstream.base_url"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(
            Some(Path::new("/definitely/not/here.toml")),
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener\nport = ").unwrap();
        let err = load_config(Some(file.path()), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
