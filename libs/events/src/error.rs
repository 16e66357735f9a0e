//! Error types for event decoding.

use thiserror::Error;

/// Errors that can occur when decoding channel deliveries.
#[derive(Debug, Error)]
pub enum EventError {
    /// The delivery was not valid JSON for any known event shape.
    #[error("failed to decode event: {0}")]
    Decode(#[from] serde_json::Error),

    /// The delivery named an event type this client does not know.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}
