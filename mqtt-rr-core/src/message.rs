//! The unit of capture and playback.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

/// One captured MQTT publish.
///
/// Field names on the wire are `Millis`, `Topic` and `Payload`, keeping the
/// file format stable across recorder versions.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMessage {
    /// Epoch milliseconds, assigned by the recorder at local receipt time
    #[serde(rename = "Millis")]
    pub captured_at_millis: i64,
    /// Fully resolved topic the message arrived on
    #[serde(rename = "Topic")]
    pub topic: String,
    /// Opaque payload, may be empty
    #[serde_as(as = "Bytes")]
    #[serde(rename = "Payload")]
    pub payload: Vec<u8>,
}

impl RecordedMessage {
    pub fn new(captured_at_millis: i64, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            captured_at_millis,
            topic: topic.into(),
            payload,
        }
    }
}
