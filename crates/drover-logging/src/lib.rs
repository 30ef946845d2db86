//! Structured logging setup for drover binaries
//!
//! Library crates only emit `tracing` events; this crate installs the global
//! subscriber that formats them.
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines, the default console format
//! - **Pretty Console**: human-readable output for development
//! - **File Rotation**: daily, hourly or single-file output via tracing-appender
//! - **Filtering**: `RUST_LOG`, a default level, per-target levels and excluded crates
//!
//! # Quick Start
//!
//! ```ignore
//! use drover_logging::{DroverSubscriberBuilder, LogConfig};
//!
//! // Keep the guard alive until exit so file output is flushed
//! let _guard = DroverSubscriberBuilder::new()
//!     .with_config(LogConfig::production("/var/log/drover"))
//!     .try_init()?;
//! ```

pub mod config;
pub mod error;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use error::{LoggingError, LoggingResult};

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

use crate::layers::BoxedLayer;

/// Keeps background log writers alive
///
/// Dropping it flushes and stops file output.
#[must_use = "dropping the guard stops file output"]
pub struct LogGuard {
    guards: Vec<WorkerGuard>,
}

impl LogGuard {
    /// Whether a file writer is attached
    pub fn has_file_output(&self) -> bool {
        !self.guards.is_empty()
    }
}

/// Builder for configuring and installing the drover subscriber
pub struct DroverSubscriberBuilder {
    config: LogConfig,
    use_env: bool,
}

impl DroverSubscriberBuilder {
    /// Builder with default configuration (JSONL on stderr at `info`)
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            use_env: true,
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Whether `RUST_LOG` overrides the configured filter (default `true`)
    pub fn with_env_override(mut self, enabled: bool) -> Self {
        self.use_env = enabled;
        self
    }

    /// Configuration that will be applied
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    pub fn build(self) -> LoggingResult<(impl Subscriber + Send + Sync + 'static, LogGuard)> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) if self.use_env => filter,
            _ => layers::parse_filter(&self.config.directives())?,
        };

        let mut output: Vec<BoxedLayer<Registry>> = Vec::new();
        let mut guards = Vec::new();

        if self.config.console.enabled {
            output.push(layers::console_layer(&self.config.console, &self.config.jsonl)?);
        }
        if let Some(file) = &self.config.file {
            let (writer, guard) = layers::file_writer(file)?;
            guards.push(guard);
            output.push(layers::jsonl_layer(&self.config.jsonl, writer));
        }

        let subscriber = Registry::default().with(output).with(filter);
        Ok((subscriber, LogGuard { guards }))
    }

    /// Install the subscriber globally
    ///
    /// Fails if a global subscriber is already set.
    pub fn try_init(self) -> LoggingResult<LogGuard> {
        let (subscriber, guard) = self.build()?;
        subscriber
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;
        Ok(guard)
    }
}

impl Default for DroverSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a subscriber for `config`
pub fn init(config: LogConfig) -> LoggingResult<LogGuard> {
    DroverSubscriberBuilder::new().with_config(config).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = DroverSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert!(!builder.config().console.pretty);
        assert!(builder.use_env);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = DroverSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(false)
            .with_env_override(false);
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
        assert!(!builder.use_env);
    }

    #[test]
    fn test_console_only_build_has_no_file_guard() {
        let (_subscriber, guard) = DroverSubscriberBuilder::new()
            .with_env_override(false)
            .build()
            .unwrap();
        assert!(!guard.has_file_output());
    }

    #[test]
    fn test_invalid_level_fails_build() {
        let result = DroverSubscriberBuilder::new()
            .with_env_override(false)
            .with_level("drover=loud")
            .build();
        assert!(matches!(result, Err(LoggingError::Filter(_))));
    }
}
