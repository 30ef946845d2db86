//! Integration tests for per-owner pipelines
//!
//! Each test drives a real worker through a registry, with a scripted mock
//! sender standing in for the collector. Awaiting `status()` waits for every
//! command queued before it, including send passes queued by seals.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Handle;

use drover_pipeline::mock::{MockBatchSender, MockOutcome};
use drover_pipeline::{
    EventSerializer, PipelineConfig, PipelineError, PipelineRegistry, PipelineResult,
    PipelineStatus, SealOutcome, Pipeline,
};
use drover_storage::DurableLog;

const OWNER: &str = "user-42";

/// Stores a byte vector as-is; empty vectors fail to serialize
struct RawSerializer;

impl EventSerializer<Vec<u8>> for RawSerializer {
    fn serialize(&self, event: &Vec<u8>) -> PipelineResult<Vec<u8>> {
        if event.is_empty() {
            return Err(PipelineError::Serialization("empty event".to_string()));
        }
        Ok(event.clone())
    }
}

fn create_registry(
    config: PipelineConfig,
    sender: Arc<MockBatchSender>,
) -> PipelineRegistry<Vec<u8>> {
    PipelineRegistry::new(config, Arc::new(RawSerializer), sender, Handle::current())
}

fn rollover_dir(config: &PipelineConfig) -> std::path::PathBuf {
    config.owner_dir(OWNER).join(&config.files.rollover_dir)
}

fn sealed_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

async fn wait_for_status<F>(pipeline: &Pipeline<Vec<u8>>, mut done: F) -> PipelineStatus
where
    F: FnMut(&PipelineStatus) -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = pipeline.status().await.unwrap();
        if done(&status) || std::time::Instant::now() > deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until no worker holds the sender any more
async fn wait_for_workers_to_stop(sender: &Arc<MockBatchSender>) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while Arc::strong_count(sender) > 1 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Arc::strong_count(sender), 1, "worker still running");
}

async fn seal_one(pipeline: &Pipeline<Vec<u8>>, payload: &[u8]) -> String {
    pipeline.record_event_sync(payload.to_vec()).await.unwrap();
    let outcome = pipeline.flush_sync().await.unwrap();
    // Wait for the send pass the seal queued
    pipeline.status().await.unwrap();
    outcome.sealed().unwrap().name.clone()
}

#[tokio::test]
async fn test_third_event_past_cap_seals_first_two() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path()).with_max_file_size(250);
    let registry = create_registry(config.clone(), sender.clone());
    let pipeline = registry.pipeline(OWNER);

    for i in 1..=3u8 {
        pipeline.record_event_sync(vec![i; 100]).await.unwrap();
    }

    let status = pipeline.status().await.unwrap();
    assert_eq!(status.sealed_files, 1);
    assert_eq!(status.working_file_events, 1);
    assert!(status.last_seal_millis.is_some());

    // The seal queued exactly one send attempt, holding the first two events
    let batches = sender.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].elements, vec![vec![1u8; 100], vec![2u8; 100]]);
    assert_eq!(sealed_names(&rollover_dir(&config)), batches[0].files);
}

#[tokio::test]
async fn test_failed_batch_is_kept_and_retried_first() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path());
    let registry = create_registry(config.clone(), sender.clone());
    let pipeline = registry.pipeline(OWNER);

    let file_a = seal_one(&pipeline, b"a").await;
    // Distinct creation timestamps
    tokio::time::sleep(Duration::from_millis(5)).await;
    let file_b = seal_one(&pipeline, b"b").await;
    assert_eq!(pipeline.status().await.unwrap().sealed_files, 2);

    sender.push_outcome(MockOutcome::Accept);
    sender.push_outcome(MockOutcome::Reject);
    let report = pipeline.send_and_cleanup().await.unwrap();
    assert_eq!(report.batches_attempted, 2);
    assert_eq!(report.files_sent, 1);
    assert!(report.stopped_on_failure);

    assert_eq!(sealed_names(&rollover_dir(&config)), vec![file_b.clone()]);

    let batches = sender.batches();
    let n = batches.len();
    assert_eq!(batches[n - 2].files, vec![file_a]);
    assert_eq!(batches[n - 1].files, vec![file_b.clone()]);

    // Next pass starts with the file that failed
    pipeline.send_and_cleanup().await.unwrap();
    assert_eq!(sender.batches().last().unwrap().files, vec![file_b]);
}

#[tokio::test]
async fn test_persistent_failure_evicts_oldest_over_cap() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path()).with_max_sealed_files(10);

    // Twelve files left behind by an earlier run
    let dir = rollover_dir(&config);
    std::fs::create_dir_all(&dir).unwrap();
    for ts in 1..=12i64 {
        let path = dir.join(format!("events_file{:02}_{}.tap", ts, 1_700_000_000_000 + ts));
        let mut log = DurableLog::open(&path).await.unwrap();
        log.add(format!(r#"{{"seq":{}}}"#, ts).as_bytes()).await.unwrap();
        log.close().await.unwrap();
    }

    let registry = create_registry(config.clone(), sender.clone());
    let pipeline = registry.pipeline(OWNER);
    let report = pipeline.send_and_cleanup().await.unwrap();
    assert_eq!(report.files_sent, 0);
    assert_eq!(report.files_evicted, 2);

    let remaining = sealed_names(&dir);
    assert_eq!(remaining.len(), 10);
    assert!(!remaining.iter().any(|n| n.starts_with("events_file01_")));
    assert!(!remaining.iter().any(|n| n.starts_with("events_file02_")));
    assert!(remaining.iter().any(|n| n.starts_with("events_file03_")));

    // At the cap, further failures evict nothing
    assert_eq!(pipeline.send_and_cleanup().await.unwrap().files_evicted, 0);
    assert_eq!(pipeline.status().await.unwrap().sealed_files, 10);
}

#[tokio::test]
async fn test_errors_and_panics_in_sender_keep_files() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path());
    let registry = create_registry(config, sender.clone());
    let pipeline = registry.pipeline(OWNER);

    seal_one(&pipeline, br#"{"name":"purchase"}"#).await;

    sender.push_outcome(MockOutcome::Error("connection reset".to_string()));
    let report = pipeline.send_and_cleanup().await.unwrap();
    assert!(report.stopped_on_failure);
    assert_eq!(pipeline.status().await.unwrap().sealed_files, 1);

    // A panicking sender fails the batch, not the worker
    sender.push_outcome(MockOutcome::Panic);
    let report = pipeline.send_and_cleanup().await.unwrap();
    assert!(report.stopped_on_failure);
    assert_eq!(pipeline.status().await.unwrap().sealed_files, 1);

    sender.push_outcome(MockOutcome::Accept);
    let report = pipeline.send_and_cleanup().await.unwrap();
    assert_eq!(report.files_sent, 1);
    assert_eq!(pipeline.status().await.unwrap().sealed_files, 0);

    // Delivered at least once, byte for byte
    assert_eq!(
        sender.delivered_elements(),
        vec![br#"{"name":"purchase"}"#.to_vec()]
    );
}

#[tokio::test]
async fn test_serialization_error_reaches_sync_caller() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::accepting());
    let registry = create_registry(PipelineConfig::with_base_dir(temp.path()), sender);
    let pipeline = registry.pipeline(OWNER);

    let err = pipeline.record_event_sync(Vec::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Serialization(_)));

    // Fire-and-forget failures are only logged; the pipeline keeps working
    pipeline.record_event(Vec::new());
    pipeline.record_event(b"ok".to_vec());
    let status = pipeline.status().await.unwrap();
    assert_eq!(status.working_file_events, 1);
}

#[tokio::test]
async fn test_disable_deletes_files_and_drops_writes() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path());
    let registry = create_registry(config.clone(), sender.clone());

    let pipeline = registry.pipeline(OWNER);
    seal_one(&pipeline, b"one").await;
    pipeline.record_event_sync(b"two".to_vec()).await.unwrap();

    registry.disable(OWNER).await.unwrap();

    let status = pipeline.status().await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.sealed_files, 0);
    assert_eq!(status.working_file_events, 0);
    assert!(!status.periodic_seal_armed);
    assert!(sealed_names(&rollover_dir(&config)).is_empty());

    // Writes and flushes are now no-ops
    let sends_before = sender.send_count();
    pipeline.record_event_sync(b"three".to_vec()).await.unwrap();
    assert_eq!(pipeline.flush_sync().await.unwrap(), SealOutcome::Empty);
    let status = pipeline.status().await.unwrap();
    assert_eq!(status.working_file_events, 0);
    assert_eq!(sender.send_count(), sends_before);
}

#[tokio::test]
async fn test_disabled_config_starts_disabled() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::accepting());
    let config = PipelineConfig::with_base_dir(temp.path()).disabled();
    let registry = create_registry(config, sender.clone());

    registry.record_event_sync(OWNER, b"ignored".to_vec()).await.unwrap();
    let status = registry.pipeline(OWNER).status().await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.working_file_events, 0);
    assert_eq!(sender.send_count(), 0);
}

#[tokio::test]
async fn test_periodic_seal_fires_then_cancels_when_idle() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path())
        .with_seal_interval(Duration::from_millis(50));
    let registry = create_registry(config, sender.clone());
    let pipeline = registry.pipeline(OWNER);

    pipeline.record_event_sync(b"tick".to_vec()).await.unwrap();
    pipeline.record_event_sync(b"tock".to_vec()).await.unwrap();
    assert!(pipeline.status().await.unwrap().periodic_seal_armed);

    // First tick seals the two events
    let status = wait_for_status(&pipeline, |s| s.sealed_files == 1).await;
    assert_eq!(status.sealed_files, 1);
    assert_eq!(status.working_file_events, 0);

    // Next tick finds nothing to seal and stops the timer
    let status = wait_for_status(&pipeline, |s| !s.periodic_seal_armed).await;
    assert!(!status.periodic_seal_armed);
    assert_eq!(status.sealed_files, 1);

    // A new event re-arms it
    pipeline.record_event_sync(b"again".to_vec()).await.unwrap();
    assert!(pipeline.status().await.unwrap().periodic_seal_armed);
}

#[tokio::test]
async fn test_flush_with_empty_working_file_retries_old_files() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let registry = create_registry(PipelineConfig::with_base_dir(temp.path()), sender.clone());
    let pipeline = registry.pipeline(OWNER);

    seal_one(&pipeline, b"stuck").await;
    let sends = sender.send_count();

    sender.push_outcome(MockOutcome::Accept);
    assert_eq!(pipeline.flush_sync().await.unwrap(), SealOutcome::Empty);
    let status = pipeline.status().await.unwrap();
    assert_eq!(status.sealed_files, 0);
    assert_eq!(sender.send_count(), sends + 1);
}

#[tokio::test]
async fn test_batches_group_oldest_files() {
    let temp = TempDir::new().unwrap();
    let sender = Arc::new(MockBatchSender::rejecting());
    let config = PipelineConfig::with_base_dir(temp.path()).with_batch_size(2);
    let registry = create_registry(config, sender.clone());
    let pipeline = registry.pipeline(OWNER);

    let mut names = Vec::new();
    for payload in [b"1", b"2", b"3"] {
        names.push(seal_one(&pipeline, payload).await);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    sender.push_outcome(MockOutcome::Accept);
    sender.push_outcome(MockOutcome::Accept);
    let report = pipeline.send_and_cleanup().await.unwrap();
    assert_eq!(report.batches_attempted, 2);
    assert_eq!(report.files_sent, 3);

    let batches = sender.batches();
    let n = batches.len();
    assert_eq!(batches[n - 2].files, names[..2].to_vec());
    assert_eq!(batches[n - 1].files, names[2..].to_vec());
}

#[tokio::test]
async fn test_restart_recovers_and_delivers_leftovers() {
    let temp = TempDir::new().unwrap();
    let config = PipelineConfig::with_base_dir(temp.path());

    {
        let registry = create_registry(config.clone(), Arc::new(MockBatchSender::rejecting()));
        let pipeline = registry.pipeline(OWNER);
        seal_one(&pipeline, b"sealed earlier").await;
        pipeline.record_event_sync(b"pending".to_vec()).await.unwrap();
    }

    let sender = Arc::new(MockBatchSender::accepting());
    let registry = create_registry(config, sender.clone());
    let pipeline = registry.pipeline(OWNER);

    let status = pipeline.status().await.unwrap();
    assert_eq!(status.working_file_events, 1);

    // Opening queued a send pass for the leftover sealed file
    let status = wait_for_status(&pipeline, |s| s.sealed_files == 0).await;
    assert_eq!(status.sealed_files, 0);
    assert_eq!(sender.delivered_elements(), vec![b"sealed earlier".to_vec()]);
}

#[tokio::test]
async fn test_surviving_handle_outlives_registry() {
    let temp = TempDir::new().unwrap();
    let registry = create_registry(
        PipelineConfig::with_base_dir(temp.path()),
        Arc::new(MockBatchSender::accepting()),
    );
    let pipeline = registry.pipeline(OWNER);
    pipeline.record_event_sync(b"x".to_vec()).await.unwrap();

    drop(registry);
    assert!(!pipeline.is_closed());
    pipeline.status().await.unwrap();
}

#[tokio::test]
async fn test_last_handle_dropped_stops_worker() {
    let temp = TempDir::new().unwrap();
    let config = PipelineConfig::with_base_dir(temp.path());
    let sender = Arc::new(MockBatchSender::accepting());
    let registry = create_registry(config.clone(), sender.clone());
    let pipeline = registry.pipeline(OWNER);
    pipeline.record_event_sync(b"kept".to_vec()).await.unwrap();
    assert!(pipeline.status().await.unwrap().periodic_seal_armed);

    drop(pipeline);
    drop(registry);
    wait_for_workers_to_stop(&sender).await;

    // Closed cleanly with the pending event still in the working file
    let path = config.owner_dir(OWNER).join(&config.files.working_file_name);
    let mut log = DurableLog::open(&path).await.unwrap();
    assert_eq!(log.read_all().await.unwrap()[0].as_ref(), &b"kept"[..]);
}

#[tokio::test]
async fn test_sealed_file_with_large_element_is_delivered() {
    let temp = TempDir::new().unwrap();
    let mut config = PipelineConfig::with_base_dir(temp.path()).with_max_file_size(64 << 20);
    config.log.max_element_size = 32 << 20;
    let sender = Arc::new(MockBatchSender::accepting());
    let registry = create_registry(config, sender.clone());
    let pipeline = registry.pipeline(OWNER);

    // Larger than the default element limit
    let event = vec![7u8; 11 << 20];
    pipeline.record_event_sync(event.clone()).await.unwrap();
    assert!(pipeline.flush_sync().await.unwrap().occurred());

    let status = pipeline.status().await.unwrap();
    assert_eq!(status.sealed_files, 0);
    assert_eq!(status.delivery.files_sent, 1);
    assert_eq!(status.delivery.failed_passes, 0);
    assert_eq!(sender.delivered_elements(), vec![event]);
}

#[tokio::test]
async fn test_disable_after_failed_open_deletes_files_later() {
    let temp = TempDir::new().unwrap();
    let config = PipelineConfig::with_base_dir(temp.path());

    {
        let sender = Arc::new(MockBatchSender::rejecting());
        let registry = create_registry(config.clone(), sender.clone());
        let pipeline = registry.pipeline(OWNER);
        seal_one(&pipeline, b"left behind").await;
        drop(pipeline);
        drop(registry);
        wait_for_workers_to_stop(&sender).await;
    }
    assert_eq!(sealed_names(&rollover_dir(&config)).len(), 1);

    // Unreadable working file makes the next open fail
    let working = config.owner_dir(OWNER).join(&config.files.working_file_name);
    std::fs::write(&working, b"garbage").unwrap();

    let sender = Arc::new(MockBatchSender::accepting());
    let registry = create_registry(config.clone(), sender.clone());
    let pipeline = registry.pipeline(OWNER);
    assert!(pipeline.disable().await.is_err());

    std::fs::remove_file(&working).unwrap();
    let status = pipeline.status().await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.sealed_files, 0);
    assert!(sealed_names(&rollover_dir(&config)).is_empty());
    assert_eq!(sender.send_count(), 0);
}
