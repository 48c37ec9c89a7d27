//! Server configuration management

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "MCPLINK";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name, sent as `serverInfo.name`
    pub name: String,
    /// Server version, sent as `serverInfo.version`
    pub version: String,
    /// Usage hints returned from `initialize`
    pub instructions: Option<String>,
    /// Address the HTTP transport binds to
    pub bind_address: String,
    /// Timeout for server-initiated requests, in milliseconds
    pub request_timeout_ms: u64,
    /// Reject methods missing from the capability table
    pub strict_capabilities: bool,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Additional configuration
    pub additional: HashMap<String, serde_json::Value>,
}

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration
///
/// Logs always go to stderr: stdout carries the protocol for stdio servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `mcplink_core=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Include the event target (module path)
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: crate::SERVER_NAME.to_string(),
            version: crate::SERVER_VERSION.to_string(),
            instructions: None,
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_ms: mcplink_protocol::DEFAULT_REQUEST_TIMEOUT_MS,
            strict_capabilities: false,
            logging: LoggingConfig::default(),
            additional: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),
}

impl ServerConfig {
    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The format follows the extension. Environment variables with the
    /// `MCPLINK_` prefix override file settings, with `__` separating nested
    /// keys: `MCPLINK_LOGGING__LEVEL=debug`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mcplink_server::ServerConfig;
    ///
    /// let config = ServerConfig::from_file("mcplink.toml")?;
    /// # Ok::<(), mcplink_server::ConfigError>(())
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };
        let source = path.to_str().ok_or(ConfigError::UnsupportedFormat)?;

        let config = Config::builder()
            .add_source(File::new(source, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Timeout for server-initiated requests
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
