//! Subcommand implementations
//!
//! Each command works against a [`PipelineRegistry`] of JSON events and
//! returns plain data; `main` decides how to print it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::info;

use drover_pipeline::{
    BatchSender, DeliveryTotals, JsonSerializer, OfflineSender, PipelineRegistry, PipelineStatus,
    SealOutcome, SealedFile,
};
use drover_transport::HttpBatchSender;

use crate::config::DroverConfig;

/// Registry of JSON event pipelines for this process
pub type EventRegistry = PipelineRegistry<Value>;

/// Result of `flush`
#[derive(Debug)]
pub struct FlushSummary {
    pub seal: SealOutcome,
    /// Every send pass the command triggered, including ones queued by the seal
    pub delivery: DeliveryTotals,
    pub status: PipelineStatus,
}

/// HTTP sender when an endpoint is configured, offline otherwise
pub fn build_sender(config: &DroverConfig) -> anyhow::Result<Arc<dyn BatchSender>> {
    match config.endpoint() {
        Some(transport) => {
            let sender = HttpBatchSender::new(transport.clone())
                .context("configuring HTTP transport")?;
            info!(endpoint = %transport.endpoint, "Delivering to collector");
            Ok(Arc::new(sender))
        }
        None => {
            info!("No collector endpoint configured, sealed files stay local");
            Ok(Arc::new(OfflineSender))
        }
    }
}

/// Registry whose workers run on the current runtime
pub fn build_registry(config: &DroverConfig) -> anyhow::Result<EventRegistry> {
    let sender = build_sender(config)?;
    Ok(registry_with_sender(config, sender))
}

fn registry_with_sender(config: &DroverConfig, sender: Arc<dyn BatchSender>) -> EventRegistry {
    PipelineRegistry::new(
        config.pipeline.clone(),
        Arc::new(JsonSerializer),
        sender,
        Handle::current(),
    )
}

/// Parse every argument as JSON, then record them in order
///
/// Nothing is recorded if any argument fails to parse.
pub async fn record(
    registry: &EventRegistry,
    owner: &str,
    events: &[String],
) -> anyhow::Result<usize> {
    let values = events
        .iter()
        .enumerate()
        .map(|(i, text)| {
            serde_json::from_str::<Value>(text)
                .with_context(|| format!("event {} is not valid JSON", i + 1))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pipeline = registry.pipeline(owner);
    for value in values {
        pipeline.record_event_sync(value).await?;
    }
    Ok(events.len())
}

/// Seal the working file and run a delivery pass
///
/// Opening the files and sealing each queue a pass of their own ahead of the
/// explicit one, so delivery is reported as the change in the worker's
/// totals over the whole command.
pub async fn flush(registry: &EventRegistry, owner: &str) -> anyhow::Result<FlushSummary> {
    let pipeline = registry.pipeline(owner);
    let before = pipeline.status().await?.delivery;
    let seal = pipeline.flush_sync().await?;
    pipeline.send_and_cleanup().await?;
    let status = pipeline.status().await?;
    Ok(FlushSummary {
        seal,
        delivery: status.delivery.since(&before),
        status,
    })
}

pub async fn status(registry: &EventRegistry, owner: &str) -> anyhow::Result<PipelineStatus> {
    Ok(registry.pipeline(owner).status().await?)
}

pub async fn disable(registry: &EventRegistry, owner: &str) -> anyhow::Result<PipelineStatus> {
    registry.disable(owner).await?;
    status(registry, owner).await
}

/// Render every element of a durable log file, one line each
///
/// Elements that are not UTF-8 are shown lossily. The file is only read.
pub async fn inspect(path: &Path, max_element_size: usize) -> anyhow::Result<Vec<String>> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }
    let elements = SealedFile::from_path(path)
        .with_max_element_size(max_element_size)
        .read_elements()
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    Ok(elements
        .iter()
        .enumerate()
        .map(|(i, element)| format!("{}\t{}", i, String::from_utf8_lossy(element)))
        .collect())
}
