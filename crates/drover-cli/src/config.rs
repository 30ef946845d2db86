//! Command-line arguments and the TOML configuration file

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use drover_logging::LogConfig;
use drover_pipeline::PipelineConfig;
use drover_transport::HttpSenderConfig;

#[derive(Parser)]
#[command(name = "drover", version, about = "Durable client-side event pipeline")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding per-owner event files (overrides `pipeline.base_dir`)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record JSON events for an owner
    Record {
        /// Owner the events belong to
        #[arg(long)]
        owner: String,
        /// One JSON value per argument
        #[arg(required = true)]
        events: Vec<String>,
    },
    /// Seal the working file and attempt delivery
    Flush {
        #[arg(long)]
        owner: String,
    },
    /// Print the local state of an owner's pipeline
    Status {
        #[arg(long)]
        owner: String,
    },
    /// Print every element of a durable log file
    Inspect {
        /// Working or sealed event file
        file: PathBuf,
    },
    /// Delete an owner's local files
    Disable {
        #[arg(long)]
        owner: String,
    },
}

/// Contents of the configuration file
///
/// Every table is optional. Without a `[transport]` endpoint nothing is
/// uploaded and sealed files stay on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub pipeline: PipelineConfig,
    pub transport: Option<HttpSenderConfig>,
    pub log: LogConfig,
}

impl DroverConfig {
    /// Load `path`, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply command-line overrides
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.data_dir {
            self.pipeline.base_dir = dir.clone();
        }
    }

    /// Transport settings when an endpoint is configured
    pub fn endpoint(&self) -> Option<&HttpSenderConfig> {
        self.transport
            .as_ref()
            .filter(|transport| !transport.endpoint.trim().is_empty())
    }
}
