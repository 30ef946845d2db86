//! # Drover Storage
//!
//! Local persistence for the drover event pipeline.
//!
//! ## Features
//!
//! - **DurableLog**: crash-safe ring-buffered file of length-prefixed elements
//! - **EventStorage**: one working log plus a roll-over directory of sealed files
//! - **SealedFile**: naming and parsing of `{prefix}_{uuid}_{millis}{ext}` files
//!
//! ## Example
//!
//! ```rust,ignore
//! use drover_storage::{EventStorage, EventStorageConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut storage = EventStorage::open("./data/owner", EventStorageConfig::default())
//!         .await
//!         .unwrap();
//!
//!     storage.add(br#"{"name":"app_open"}"#).await.unwrap();
//!     let sealed = storage.seal_to("events_1b4e_1700000000000.tap").await.unwrap();
//!     println!("sealed {}", sealed.display());
//! }
//! ```

pub mod durable_log;
pub mod error;
pub mod event_storage;
pub mod sealed;

// Re-exports
pub use durable_log::{DurableLog, DurableLogConfig, ELEMENT_HEADER_LEN, HEADER_LEN};
pub use error::{StorageError, StorageResult};
pub use event_storage::{EventStorage, EventStorageConfig};
pub use sealed::SealedFile;
