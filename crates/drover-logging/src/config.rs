//! Logging settings, loadable from the `[log]` table of a config file

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a drover binary logs
///
/// Every table is optional when loaded from TOML; missing keys fall back to
/// [`LogConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level (overridden by `RUST_LOG` when set)
    pub default_level: String,

    /// Console sink
    pub console: ConsoleConfig,

    /// Optional log file sink
    pub file: Option<FileConfig>,

    /// JSONL formatting shared by console and file output
    pub jsonl: JsonlConfig,

    /// Per-target filtering
    pub filters: FilterConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

impl LogConfig {
    /// Verbose, human-readable console output
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
                stderr: true,
                level: Some("debug".to_string()),
            },
            ..Default::default()
        }
    }

    /// JSONL written to daily rolling files under `log_dir`, no console
    pub fn production(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig {
                enabled: false,
                ..ConsoleConfig::default()
            },
            file: Some(FileConfig {
                directory: log_dir.into(),
                rotation: RotationStrategy::Daily,
                max_files: Some(30),
                ..FileConfig::default()
            }),
            ..Default::default()
        }
    }

    /// Warnings only, plain console output
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: false,
                stderr: true,
                level: Some("warn".to_string()),
            },
            ..Default::default()
        }
    }

    /// Filter directives for the global `EnvFilter`
    ///
    /// The default level comes first, then explicit target levels, then
    /// excluded crates which are switched off entirely.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.default_level.clone()];
        for (target, level) in &self.filters.targets {
            directives.push(format!("{}={}", target, level));
        }
        for target in &self.filters.exclude_crates {
            directives.push(format!("{}=off", target));
        }
        directives.join(",")
    }
}

/// Console sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Whether to log to the console
    pub enabled: bool,
    /// Human-readable format instead of JSONL
    pub pretty: bool,
    /// Include ANSI colors (pretty format only)
    pub ansi: bool,
    /// Write to stderr instead of stdout
    pub stderr: bool,
    /// Console-only level, narrower than the default level
    pub level: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
            stderr: true,
            level: None,
        }
    }
}

/// Log file sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Where log files are written
    pub directory: PathBuf,
    /// Log file name prefix, before the date suffix
    pub prefix: String,
    /// Rotation strategy
    pub rotation: RotationStrategy,
    /// Rotated files to retain; `None` keeps them all
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "drover".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: Some(7),
        }
    }
}

impl FileConfig {
    /// File output into `directory` with default naming and rotation
    pub fn in_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Set the rotation strategy
    pub fn with_rotation(mut self, rotation: RotationStrategy) -> Self {
        self.rotation = rotation;
        self
    }

    /// Path of the single log file used by [`RotationStrategy::Never`]
    pub fn single_file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.prefix))
    }
}

/// When a new log file is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated at startup
    Never,
}

/// Fields written into each JSONL line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Flatten event fields to the root object
    pub flatten_events: bool,
    /// Include the list of entered spans
    pub include_spans: bool,
    /// Include thread ids and names
    pub include_thread_info: bool,
    /// Include file and line
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_thread_info: false,
            include_location: true,
        }
    }
}

/// Target levels applied on top of the default level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Crates whose output is dropped
    pub exclude_crates: Vec<String>,
    /// Explicit levels per target, e.g. `drover_pipeline = "trace"`
    pub targets: BTreeMap<String, String>,
}
