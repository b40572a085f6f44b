//! Layered TOML configuration for the tether bridge.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

mod error;

pub use error::ConfigError;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_mcp::ChildCommand;

/// Default listen address for the HTTP transport.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8931";

/// Default endpoint path for the HTTP transport.
pub const DEFAULT_PATH: &str = "/mcp";

/// Default deadline for the startup handshake.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 10_000;

/// Default time the child gets to exit on shutdown before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default time a session may go unused before it is closed.
pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: u64 = 30 * 60 * 1000;

pub const ENV_CHILD_COMMAND: &str = "TETHER_CHILD_COMMAND";
pub const ENV_LISTEN: &str = "TETHER_LISTEN";
pub const ENV_PATH: &str = "TETHER_PATH";
pub const ENV_AUTH_TOKEN: &str = "TETHER_AUTH_TOKEN";

/// Resolved configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub child: ChildCommand,
    pub listen: SocketAddr,
    pub path: String,
    pub discovery_timeout: Duration,
    pub shutdown_grace: Duration,
    /// `None` keeps sessions open until they are deleted.
    pub session_idle_timeout: Option<Duration>,
    pub auth_token: Option<String>,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub bridge: BridgeSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Child command line, split on whitespace.
    pub command: Option<String>,
    pub listen: Option<String>,
    pub path: Option<String>,
    pub discovery_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    /// 0 disables idle expiry.
    pub session_idle_timeout_ms: Option<u64>,
    pub auth_token: Option<String>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub command: Option<String>,
    pub listen: Option<String>,
    pub path: Option<String>,
    pub auth_token: Option<String>,
    /// Read this file instead of `<config_dir>/config.toml`.
    pub config_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Load configuration from all sources, applying precedence rules.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = match &overrides.config_file {
            Some(path) => read_settings_file(path)?,
            None => load_settings_file(&config_dir.join("config.toml")),
        };
        Self::resolve(overrides, settings, |key| std::env::var(key).ok())
    }

    /// Apply precedence over already-gathered sources.
    ///
    /// `env` looks up an environment variable by name.
    pub fn resolve(
        overrides: CliOverrides,
        settings: SettingsFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = settings.bridge;

        // Child command: CLI > env > config file, no default
        let command_line = overrides
            .command
            .or_else(|| env(ENV_CHILD_COMMAND))
            .or(file.command)
            .ok_or_else(|| ConfigError::MissingKey {
                key: format!("child command (pass --command, set {ENV_CHILD_COMMAND}, or add bridge.command to config.toml)"),
            })?;
        let child = ChildCommand::parse(&command_line).map_err(|e| ConfigError::InvalidValue {
            key: "command".into(),
            message: e.to_string(),
        })?;

        let listen = overrides
            .listen
            .or_else(|| env(ENV_LISTEN))
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen: SocketAddr = listen.parse().map_err(|e| ConfigError::InvalidValue {
            key: "listen".into(),
            message: format!("'{listen}': {e}"),
        })?;

        let path = overrides
            .path
            .or_else(|| env(ENV_PATH))
            .or(file.path)
            .unwrap_or_else(|| DEFAULT_PATH.to_string());
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "path".into(),
                message: format!("'{path}' must start with '/'"),
            });
        }

        let auth_token = overrides
            .auth_token
            .or_else(|| env(ENV_AUTH_TOKEN))
            .or(file.auth_token)
            .filter(|t| !t.trim().is_empty());

        let discovery_timeout = Duration::from_millis(
            file.discovery_timeout_ms
                .unwrap_or(DEFAULT_DISCOVERY_TIMEOUT_MS),
        );
        if discovery_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "discovery_timeout_ms".into(),
                message: "must be greater than zero".into(),
            });
        }

        let shutdown_grace =
            Duration::from_millis(file.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS));

        let session_idle_timeout = match file
            .session_idle_timeout_ms
            .unwrap_or(DEFAULT_SESSION_IDLE_TIMEOUT_MS)
        {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Ok(BridgeConfig {
            child,
            listen,
            path,
            discovery_timeout,
            shutdown_grace,
            session_idle_timeout,
            auth_token,
        })
    }
}

/// Get the tether config directory path (~/.tether/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

/// Read an explicitly requested settings file; any failure is an error.
fn read_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
