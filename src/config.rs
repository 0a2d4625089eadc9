//! Configuration management for the resumable uploads server

use std::env;
use std::path::PathBuf;

/// Default mount point of the upload routes
pub const DEFAULT_BASE_PATH: &str = "/uploads";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path the upload routes are mounted under, without trailing slash.
    /// Empty means the server root.
    pub base_path: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid SERVER_PORT: {0}")]
    InvalidPort(String),

    #[error("Unknown UPLOAD_STORE backend: {0}")]
    UnknownBackend(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                base_path: DEFAULT_BASE_PATH.to_string(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                path: default_upload_dir(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("SERVER_PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 3000,
        };

        let backend = match lookup("UPLOAD_STORE").as_deref().map(str::trim) {
            None | Some("") | Some("local") | Some("fs") => StorageBackend::Local,
            Some("memory") => StorageBackend::Memory,
            Some(other) => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
                base_path: normalize_base_path(
                    &lookup("UPLOAD_BASE_PATH").unwrap_or_else(|| DEFAULT_BASE_PATH.to_string()),
                ),
            },
            storage: StorageConfig {
                backend,
                path: lookup("UPLOAD_DIR")
                    .filter(|dir| !dir.trim().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(default_upload_dir),
            },
        })
    }
}

/// `<temp dir>/resumable_uploads`
pub fn default_upload_dir() -> PathBuf {
    env::temp_dir().join("resumable_uploads")
}

/// Ensure a leading slash and strip trailing ones; `/` becomes empty
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.base_path, "/uploads");
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.storage.path, env::temp_dir().join("resumable_uploads"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SERVER_PORT", "8080"),
            ("UPLOAD_DIR", "/var/lib/uploads"),
            ("UPLOAD_BASE_PATH", "files/"),
            ("UPLOAD_STORE", "memory"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.base_path, "/files");
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/uploads"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("SERVER_PORT", "http")])),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("UPLOAD_STORE", "s3")])),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path("/uploads/"), "/uploads");
        assert_eq!(normalize_base_path("a/b"), "/a/b");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path(""), "");
    }
}
