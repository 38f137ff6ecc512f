/// Configuration management for the chatway gateway and embedded engine
///
/// Everything is read from the process environment so the same binary runs
/// unchanged on a laptop and in a container. Only the engine credential is
/// mandatory; every other setting has a default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP gateway configuration
    pub server: ServerConfig,
    /// Orchestration engine connection settings
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Engine connection and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine endpoint in `host:port` form
    pub host_port: String,
    /// Namespace that scopes every persisted instance
    pub namespace: String,
    /// Static API key credential; never logged
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Task queue the worker polls and new instances are started on
    pub task_queue: String,
    /// Whether the engine connection is TLS-protected
    pub tls_enabled: bool,
    /// Durable storage for instance snapshots
    pub storage: StorageConfig,
    /// Per-attempt activity time budget
    pub activity_timeout: Duration,
}

/// Storage configuration for the engine's snapshot database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one SQLite file per namespace: {namespace}.db
    pub data_dir: String,
}

impl StorageConfig {
    /// Full path of the database file for a namespace
    pub fn database_path(&self, namespace: &str) -> PathBuf {
        PathBuf::from(&self.data_dir).join(format!("{}.db", namespace))
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Empty values are treated the same as unset ones, so `FOO=` falls back
    /// to the default instead of producing an empty setting.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let api_key = get("TEMPORAL_API_KEY")
            .ok_or(ConfigError::MissingVar("TEMPORAL_API_KEY"))?;

        let host_port = get_or("TEMPORAL_HOST_PORT", "localhost:7233");
        validate_host_port(&host_port)?;

        let port_raw = get_or("SERVER_PORT", "3000");
        let port = port_raw.parse::<u16>().map_err(|_| ConfigError::InvalidVar {
            name: "SERVER_PORT",
            value: port_raw.clone(),
        })?;

        let timeout_raw = get_or("CHATWAY_ACTIVITY_TIMEOUT_SECS", "10");
        let timeout_secs = timeout_raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ConfigError::InvalidVar {
                name: "CHATWAY_ACTIVITY_TIMEOUT_SECS",
                value: timeout_raw.clone(),
            })?;

        Ok(Self {
            server: ServerConfig {
                host: get_or("SERVER_HOST", "0.0.0.0"),
                port,
            },
            engine: EngineConfig {
                host_port,
                namespace: get_or("TEMPORAL_NAMESPACE", "default"),
                api_key,
                task_queue: get_or("TEMPORAL_TASK_QUEUE", "my-task-queue"),
                tls_enabled: get("TEMPORAL_TLS_ENABLED")
                    .and_then(|raw| parse_bool(&raw))
                    .unwrap_or(false),
                storage: StorageConfig {
                    data_dir: get_or("CHATWAY_DATA_DIR", "data"),
                },
                activity_timeout: Duration::from_secs(timeout_secs),
            },
        })
    }
}

/// Accepts the same spellings as Go's strconv.ParseBool
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn validate_host_port(host_port: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidVar {
        name: "TEMPORAL_HOST_PORT",
        value: host_port.to_string(),
    };

    let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}

/// Load a `.env` file into the process environment, if there is one
///
/// Variables already set in the process keep their values. Returns whether
/// the file was loaded.
pub fn load_env_file(path: &Path) -> bool {
    match dotenvy::from_path(path) {
        Ok(()) => {
            tracing::info!("Loaded environment from {}", path.display());
            true
        }
        Err(e) if e.not_found() => {
            tracing::warn!("{} not found, using process environment only", path.display());
            false
        }
        Err(e) => {
            tracing::warn!("Ignoring unreadable env file {}: {}", path.display(), e);
            false
        }
    }
}
