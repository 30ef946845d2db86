//! Mapping collector responses to delivery outcomes

use serde::{Deserialize, Serialize};

/// What a collector response means for the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Durably accepted; delete the files
    Accepted,
    /// Permanently rejected; delete the files so they cannot stall the queue
    Consumed,
    /// Transient failure; keep the files for the next pass
    Retry,
}

impl DeliveryOutcome {
    /// Whether the batch's files may be deleted
    pub fn is_final(self) -> bool {
        !matches!(self, DeliveryOutcome::Retry)
    }
}

/// Status codes that end a batch's life
///
/// Anything listed in neither set is retried. The default treats 400 and
/// 500 as consumed: a batch the collector rejects outright would otherwise
/// be resent forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    /// Codes meaning the batch was accepted
    pub success: Vec<u16>,
    /// Codes meaning the batch was rejected for good
    pub consumed: Vec<u16>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            success: vec![200],
            consumed: vec![400, 500],
        }
    }
}

impl StatusPolicy {
    /// Retry everything except the success codes
    pub fn strict() -> Self {
        Self {
            success: vec![200],
            consumed: Vec::new(),
        }
    }

    /// Classify one response status
    pub fn classify(&self, status: u16) -> DeliveryOutcome {
        if self.success.contains(&status) {
            DeliveryOutcome::Accepted
        } else if self.consumed.contains(&status) {
            DeliveryOutcome::Consumed
        } else {
            DeliveryOutcome::Retry
        }
    }
}
