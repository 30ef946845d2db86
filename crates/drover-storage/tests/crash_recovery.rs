//! Crash recovery tests for the durable log
//!
//! Each test simulates the on-disk state a crash would leave behind by
//! editing the file directly, then checks what a reopen recovers.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::TempDir;

use drover_storage::{
    DurableLog, DurableLogConfig, ELEMENT_HEADER_LEN, EventStorage, EventStorageConfig,
    HEADER_LEN, SealedFile, StorageError,
};

fn patch_file(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

async fn write_two_elements(path: &Path) -> u64 {
    let mut log = DurableLog::open(path).await.unwrap();
    log.add(b"first").await.unwrap();
    log.add(b"second").await.unwrap();
    let used = log.used_bytes();
    log.close().await.unwrap();
    used
}

#[tokio::test]
async fn test_uncommitted_element_is_invisible_after_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    let used = write_two_elements(&path).await;

    // Element bytes landed but the header was never rewritten
    let mut torn = (100u32).to_be_bytes().to_vec();
    torn.extend_from_slice(&[0xAB; 100]);
    patch_file(&path, used, &torn);

    let mut log = DurableLog::open(&path).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log.used_bytes(), used);

    // The next append overwrites the torn bytes
    log.add(b"third").await.unwrap();
    let elements = log.read_all().await.unwrap();
    assert_eq!(elements.len(), 3);
    assert_eq!(elements[2].as_ref(), b"third");
}

#[tokio::test]
async fn test_interrupted_expansion_keeps_old_ring() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    write_two_elements(&path).await;

    // File was grown but the header still records the old length
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(8192).unwrap();
    drop(file);

    let mut log = DurableLog::open(&path).await.unwrap();
    assert_eq!(log.file_length(), 4096);
    let elements = log.read_all().await.unwrap();
    assert_eq!(elements[0].as_ref(), b"first");
    assert_eq!(elements[1].as_ref(), b"second");
}

#[tokio::test]
async fn test_bad_magic_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    write_two_elements(&path).await;

    patch_file(&path, 0, &[0xDE, 0xAD, 0xBE, 0xEF]);

    let err = DurableLog::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt(_)));
}

#[tokio::test]
async fn test_header_length_beyond_file_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    write_two_elements(&path).await;

    patch_file(&path, 4, &(1_000_000u64).to_be_bytes());

    let err = DurableLog::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt(_)));
}

#[tokio::test]
async fn test_garbage_element_length_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    write_two_elements(&path).await;

    patch_file(&path, HEADER_LEN, &u32::MAX.to_be_bytes());

    let err = DurableLog::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt(_)));
}

#[tokio::test]
async fn test_truncated_header_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    std::fs::write(&path, [0u8; 10]).unwrap();

    let err = DurableLog::open(&path).await.unwrap_err();
    assert!(matches!(err, StorageError::Corrupt(_)));
}

#[tokio::test]
async fn test_leftover_init_file_does_not_block_creation() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("working.tap");
    std::fs::write(temp.path().join("working.tap.init"), b"half written").unwrap();

    let mut log = DurableLog::open(&path).await.unwrap();
    assert!(log.is_empty());
    log.add(b"event").await.unwrap();
    assert!(!temp.path().join("working.tap.init").exists());
}

#[tokio::test]
async fn test_sealed_file_round_trip_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    let config = EventStorageConfig {
        log: DurableLogConfig {
            initial_length: 64,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut storage = EventStorage::open(temp.path(), config).await.unwrap();

    let payloads: Vec<Vec<u8>> = (0..20u8)
        .map(|i| format!(r#"{{"seq":{},"pad":"{}"}}"#, i, "x".repeat(i as usize)).into_bytes())
        .collect();
    for payload in &payloads {
        storage.add(payload).await.unwrap();
    }
    let expected_used = HEADER_LEN
        + payloads
            .iter()
            .map(|p| ELEMENT_HEADER_LEN + p.len() as u64)
            .sum::<u64>();
    assert_eq!(storage.working_used_bytes(), expected_used);

    let name = SealedFile::generate_name("events", ".tap", 1_700_000_000_000);
    let sealed = SealedFile::from_path(storage.seal_to(&name).await.unwrap());
    assert_eq!(sealed.created_at_millis, 1_700_000_000_000);
    assert!(!storage.working_path().exists() || storage.working_is_empty());

    let mut read_back = Vec::new();
    let visited = sealed
        .for_each_element(|data| {
            read_back.push(data.to_vec());
            true
        })
        .await
        .unwrap();
    assert_eq!(visited, payloads.len());
    assert_eq!(read_back, payloads);
}
