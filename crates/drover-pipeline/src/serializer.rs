//! Turning events into stored bytes

use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};

/// Converts an application event into the bytes stored for it
///
/// A failure drops the event; nothing is written.
pub trait EventSerializer<E>: Send + Sync {
    /// Serialize one event
    fn serialize(&self, event: &E) -> PipelineResult<Vec<u8>>;
}

/// Serializes any `serde::Serialize` event as a compact JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<E: Serialize> EventSerializer<E> for JsonSerializer {
    fn serialize(&self, event: &E) -> PipelineResult<Vec<u8>> {
        let bytes = serde_json::to_vec(event)?;
        if bytes.is_empty() {
            return Err(PipelineError::Serialization("empty event".to_string()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Tap {
        name: &'static str,
        count: u32,
    }

    #[test]
    fn test_json_serializer() {
        let bytes = JsonSerializer
            .serialize(&Tap {
                name: "app_open",
                count: 2,
            })
            .unwrap();
        assert_eq!(bytes, br#"{"name":"app_open","count":2}"#);
    }

    #[test]
    fn test_unserializable_map_key() {
        // JSON object keys must be strings
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], "value");
        let err = JsonSerializer.serialize(&map).unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }
}
