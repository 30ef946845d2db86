//! Pipeline configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use drover_storage::{DurableLogConfig, EventStorageConfig};

/// Shortest periodic seal interval the scheduler accepts
pub const MIN_SEAL_INTERVAL: Duration = Duration::from_millis(10);

/// Write-path and retention limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Bytes the working file may hold before it is sealed
    pub max_file_size: u64,
    /// Sealed files kept on disk when delivery keeps failing
    pub max_sealed_files: usize,
    /// First field of sealed file names
    pub file_prefix: String,
    /// Extension of sealed file names, including the dot
    pub file_extension: String,
    /// Working log file name inside the owner directory
    pub working_file_name: String,
    /// Roll-over directory name inside the owner directory
    pub rollover_dir: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size: 8000,
            max_sealed_files: 100,
            file_prefix: "events".to_string(),
            file_extension: ".tap".to_string(),
            working_file_name: "events_working.tap".to_string(),
            rollover_dir: "rollover".to_string(),
        }
    }
}

/// Delivery scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Whether pipelines start with delivery enabled
    pub enabled: bool,
    /// Seconds between time-based seals while events keep arriving
    pub seal_interval_secs: f64,
    /// Sealed files per send attempt
    pub batch_size: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seal_interval_secs: 600.0,
            batch_size: 1,
        }
    }
}

impl DeliveryConfig {
    /// Periodic seal interval, clamped to a usable minimum
    pub fn seal_interval(&self) -> Duration {
        if !self.seal_interval_secs.is_finite() || self.seal_interval_secs <= 0.0 {
            return MIN_SEAL_INTERVAL;
        }
        Duration::from_secs_f64(self.seal_interval_secs.min(u32::MAX as f64)).max(MIN_SEAL_INTERVAL)
    }

    /// Batch size, at least one file
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Configuration shared by every pipeline of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one sub-directory per owner
    pub base_dir: PathBuf,
    /// Write-path and retention limits
    pub files: FilesConfig,
    /// Delivery scheduling
    pub delivery: DeliveryConfig,
    /// Durable log settings for working files
    pub log: DurableLogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./drover-data"),
            files: FilesConfig::default(),
            delivery: DeliveryConfig::default(),
            log: DurableLogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration rooted at `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Set the write-path limits
    pub fn with_files(mut self, files: FilesConfig) -> Self {
        self.files = files;
        self
    }

    /// Set the delivery scheduling
    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    /// Set the durable log settings
    pub fn with_log(mut self, log: DurableLogConfig) -> Self {
        self.log = log;
        self
    }

    /// Set the working file size cap
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.files.max_file_size = bytes;
        self
    }

    /// Set the sealed file retention cap
    pub fn with_max_sealed_files(mut self, count: usize) -> Self {
        self.files.max_sealed_files = count;
        self
    }

    /// Set the periodic seal interval
    pub fn with_seal_interval(mut self, interval: Duration) -> Self {
        self.delivery.seal_interval_secs = interval.as_secs_f64();
        self
    }

    /// Set the number of sealed files per send attempt
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.delivery.batch_size = batch_size;
        self
    }

    /// Start pipelines disabled
    pub fn disabled(mut self) -> Self {
        self.delivery.enabled = false;
        self
    }

    /// Directory holding one owner's working and sealed files
    pub fn owner_dir(&self, owner_id: &str) -> PathBuf {
        owner_dir(&self.base_dir, owner_id)
    }

    /// Storage layout for one owner
    pub fn storage_config(&self) -> EventStorageConfig {
        EventStorageConfig {
            working_file_name: self.files.working_file_name.clone(),
            rollover_dir: self.files.rollover_dir.clone(),
            log: self.log.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // The header alone takes 32 bytes
        if self.files.max_file_size <= drover_storage::HEADER_LEN {
            warnings.push(ConfigWarning::MaxFileSizeTooSmall);
        }
        if self.files.max_sealed_files == 0 {
            warnings.push(ConfigWarning::NoSealedFilesRetained);
        }

        // Timestamp parsing depends on exactly three name fields
        if self.files.file_prefix.is_empty()
            || self.files.file_prefix.contains('_')
            || self.files.file_prefix.contains('.')
        {
            warnings.push(ConfigWarning::BadFilePrefix);
        }
        if !self.files.file_extension.is_empty() && !self.files.file_extension.starts_with('.') {
            warnings.push(ConfigWarning::BadFileExtension);
        }

        if !self.delivery.seal_interval_secs.is_finite() || self.delivery.seal_interval_secs <= 0.0
        {
            warnings.push(ConfigWarning::BadSealInterval);
        }
        if self.delivery.batch_size == 0 {
            warnings.push(ConfigWarning::ZeroBatchSize);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Owner directory under `base_dir`, hex-encoded so any owner id is a safe path
pub fn owner_dir(base_dir: &Path, owner_id: &str) -> PathBuf {
    base_dir.join(hex::encode(owner_id.as_bytes()))
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Working file cap does not leave room past the header
    MaxFileSizeTooSmall,
    /// Retention cap of zero evicts every sealed file
    NoSealedFilesRetained,
    /// Prefix is empty or contains `_` or `.`
    BadFilePrefix,
    /// Extension does not start with `.`
    BadFileExtension,
    /// Seal interval is not a positive number
    BadSealInterval,
    /// Batch size of zero
    ZeroBatchSize,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MaxFileSizeTooSmall => {
                write!(f, "max_file_size must exceed the 32-byte log header")
            }
            ConfigWarning::NoSealedFilesRetained => {
                write!(f, "max_sealed_files is 0, undelivered files are evicted at once")
            }
            ConfigWarning::BadFilePrefix => {
                write!(f, "file_prefix must be non-empty and contain no '_' or '.'")
            }
            ConfigWarning::BadFileExtension => {
                write!(f, "file_extension must start with '.'")
            }
            ConfigWarning::BadSealInterval => {
                write!(f, "seal_interval_secs must be a positive number")
            }
            ConfigWarning::ZeroBatchSize => write!(f, "batch_size is 0, using 1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.files.max_file_size, 8000);
        assert_eq!(config.files.max_sealed_files, 100);
        assert_eq!(config.delivery.batch_size, 1);
        assert_eq!(config.delivery.seal_interval(), Duration::from_secs(600));
        assert!(config.is_valid());
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::with_base_dir("/tmp/drover")
            .with_max_file_size(250)
            .with_max_sealed_files(10)
            .with_seal_interval(Duration::from_millis(1500))
            .with_batch_size(3);
        assert_eq!(config.files.max_file_size, 250);
        assert_eq!(config.files.max_sealed_files, 10);
        assert_eq!(config.delivery.seal_interval(), Duration::from_millis(1500));
        assert_eq!(config.delivery.batch_size, 3);
    }

    #[test]
    fn test_owner_dir_is_hex() {
        let config = PipelineConfig::with_base_dir("/data");
        assert_eq!(config.owner_dir("ab/.."), PathBuf::from("/data/61622f2e2e"));
    }

    #[test]
    fn test_seal_interval_is_clamped() {
        let mut delivery = DeliveryConfig {
            seal_interval_secs: 0.0,
            ..Default::default()
        };
        assert_eq!(delivery.seal_interval(), MIN_SEAL_INTERVAL);
        delivery.seal_interval_secs = f64::NAN;
        assert_eq!(delivery.seal_interval(), MIN_SEAL_INTERVAL);
        delivery.seal_interval_secs = 0.001;
        assert_eq!(delivery.seal_interval(), MIN_SEAL_INTERVAL);
    }

    #[test]
    fn test_validate_catches_problems() {
        let mut config = PipelineConfig::default();
        config.files.max_file_size = 10;
        config.files.file_prefix = "my_events".to_string();
        config.files.file_extension = "tap".to_string();
        config.delivery.seal_interval_secs = -1.0;
        config.delivery.batch_size = 0;
        config.files.max_sealed_files = 0;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 6);
        assert!(warnings.contains(&ConfigWarning::BadFilePrefix));
        assert!(warnings.contains(&ConfigWarning::ZeroBatchSize));
        assert!(!config.is_valid());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{"files": {"max_file_size": 500}, "delivery": {"enabled": false}}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.files.max_file_size, 500);
        assert_eq!(config.files.file_prefix, "events");
        assert!(!config.delivery.enabled);
        assert_eq!(config.delivery.batch_size, 1);
    }
}
