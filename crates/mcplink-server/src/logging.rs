//! Logging initialization for MCP servers
//!
//! For stdio servers stdout is the protocol channel, so every preset here
//! writes to stderr.
//!
//! ```rust,no_run
//! use mcplink_server::LoggingConfig;
//!
//! LoggingConfig::stderr_minimal().init()?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

impl LoggingConfig {
    /// Errors only, human-readable
    pub fn stderr_minimal() -> Self {
        Self {
            level: "error".to_string(),
            format: LogFormat::Pretty,
            with_target: false,
        }
    }

    /// Everything from the mcplink crates at debug level
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }

    /// Structured JSON at info level, for log collectors
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            with_target: true,
        }
    }

    /// The filter this configuration installs: `RUST_LOG` when set,
    /// otherwise `level`
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Install the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already set.
    pub fn init(&self) -> io::Result<()> {
        let subscriber = tracing_subscriber::registry().with(self.filter());

        match self.format {
            LogFormat::Pretty => subscriber
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(self.with_target)
                        .with_writer(io::stderr),
                )
                .try_init()
                .map_err(|e| io::Error::other(e.to_string())),
            LogFormat::Json => subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(self.with_target)
                        .with_writer(io::stderr),
                )
                .try_init()
                .map_err(|e| io::Error::other(e.to_string())),
        }
    }
}
