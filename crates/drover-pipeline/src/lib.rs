//! # Drover Pipeline
//!
//! Durable, at-least-once event delivery, one pipeline per owner.
//!
//! Events flow producer → [`FilesManager`] (serialize, append, seal when the
//! working file is full) → [`DeliveryStrategy`] (periodic seals, batched
//! sends, delete on success, evict on persistent failure).
//!
//! ## Features
//!
//! - **PipelineRegistry**: lazily creates one pipeline per owner id
//! - **Pipeline**: serialized worker per owner, fire-and-forget or awaited calls
//! - **BatchSender**: injected upload seam; files are deleted only on success
//! - **Retention**: oldest sealed files are evicted when nothing can be sent
//! - **Disable**: deletes an owner's files and turns future writes into no-ops
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use drover_pipeline::{JsonSerializer, OfflineSender, PipelineConfig, PipelineRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = PipelineRegistry::new(
//!         PipelineConfig::with_base_dir("./telemetry"),
//!         Arc::new(JsonSerializer),
//!         Arc::new(OfflineSender),
//!         tokio::runtime::Handle::current(),
//!     );
//!
//!     registry.record_event("user-42", serde_json::json!({"name": "app_open"}));
//!     let status = registry.pipeline("user-42").status().await.unwrap();
//!     println!("{} events pending", status.working_file_events);
//! }
//! ```

pub mod config;
pub mod error;
pub mod files_manager;
pub mod mock;
pub mod pipeline;
pub mod registry;
mod scheduler;
pub mod sender;
pub mod serializer;
pub mod strategy;

// Re-exports
pub use config::{ConfigWarning, DeliveryConfig, FilesConfig, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use files_manager::{FilesManager, RolloverListener, SealOutcome};
pub use pipeline::{Pipeline, PipelineStatus};
pub use registry::PipelineRegistry;
pub use sender::{BatchSender, OfflineSender};
pub use serializer::{EventSerializer, JsonSerializer};
pub use strategy::{
    DeliveryReport, DeliveryStrategy, DeliveryTotals, DisabledStrategy, EnabledStrategy,
    PeriodicSeal,
};

pub use drover_storage::SealedFile;
