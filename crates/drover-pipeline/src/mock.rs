//! Mock batch sender for testing
//!
//! Records every batch it is handed (file names and decoded elements) and
//! answers from a script, falling back to a default outcome once the script
//! runs out.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use drover_pipeline::mock::{MockBatchSender, MockOutcome};
//!
//! let sender = MockBatchSender::accepting();
//! sender.push_outcome(MockOutcome::Reject);
//! // first batch is kept, every later batch is delivered
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use drover_storage::SealedFile;

use crate::error::{PipelineError, PipelineResult};
use crate::sender::BatchSender;

/// Scripted answer for one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Report the batch delivered
    Accept,
    /// Report a transient failure
    Reject,
    /// Return a delivery error
    Error(String),
    /// Panic inside the sender
    Panic,
}

/// A batch as the mock saw it
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    /// Sealed file names in the batch
    pub files: Vec<String>,
    /// Every element of every file, in order
    pub elements: Vec<Vec<u8>>,
    /// What the mock answered
    pub outcome: MockOutcome,
}

/// In-memory [`BatchSender`] with scripted outcomes
#[derive(Debug)]
pub struct MockBatchSender {
    script: Mutex<VecDeque<MockOutcome>>,
    default_outcome: MockOutcome,
    delay: Option<Duration>,
    batches: Mutex<Vec<RecordedBatch>>,
}

impl MockBatchSender {
    /// Create a mock answering `default_outcome` once the script is empty
    pub fn new(default_outcome: MockOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_outcome,
            delay: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// A mock that delivers everything
    pub fn accepting() -> Self {
        Self::new(MockOutcome::Accept)
    }

    /// A mock that never delivers
    pub fn rejecting() -> Self {
        Self::new(MockOutcome::Reject)
    }

    /// Sleep this long inside every send
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the answer for the next unanswered send
    pub fn push_outcome(&self, outcome: MockOutcome) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    /// Every batch seen so far
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Number of sends so far
    pub fn send_count(&self) -> usize {
        self.batches.lock().map(|b| b.len()).unwrap_or_default()
    }

    /// Elements of every batch that was reported delivered
    pub fn delivered_elements(&self) -> Vec<Vec<u8>> {
        self.batches()
            .into_iter()
            .filter(|b| b.outcome == MockOutcome::Accept)
            .flat_map(|b| b.elements)
            .collect()
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

#[async_trait]
impl BatchSender for MockBatchSender {
    async fn send(&self, batch: &[SealedFile]) -> PipelineResult<bool> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut elements = Vec::new();
        for file in batch {
            for element in file.read_elements().await? {
                elements.push(element.to_vec());
            }
        }

        let outcome = self.next_outcome();
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(RecordedBatch {
                files: batch.iter().map(|f| f.name.clone()).collect(),
                elements,
                outcome: outcome.clone(),
            });
        }

        match outcome {
            MockOutcome::Accept => Ok(true),
            MockOutcome::Reject => Ok(false),
            MockOutcome::Error(message) => Err(PipelineError::Delivery(message)),
            MockOutcome::Panic => panic!("mock sender panicked"),
        }
    }
}
