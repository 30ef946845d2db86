//! # Drover Transport
//!
//! Delivers sealed event files to a remote collector.
//!
//! [`HttpBatchSender`] implements the pipeline's
//! [`BatchSender`](drover_pipeline::BatchSender): it decodes each element of
//! a batch as JSON, POSTs one JSON array, and maps the response status to a
//! [`DeliveryOutcome`] through a configurable [`StatusPolicy`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use drover_transport::{HttpBatchSender, HttpSenderConfig};
//!
//! let sender = HttpBatchSender::new(
//!     HttpSenderConfig::with_endpoint("https://collector.example/v1/events")
//!         .with_bearer_token("token"),
//! )?;
//! let registry =
//!     PipelineRegistry::new(config, Arc::new(JsonSerializer), Arc::new(sender), handle);
//! ```

pub mod error;
pub mod http;
pub mod policy;

// Re-exports
pub use error::{TransportError, TransportResult};
pub use http::{HttpBatchSender, HttpSenderConfig};
pub use policy::{DeliveryOutcome, StatusPolicy};
