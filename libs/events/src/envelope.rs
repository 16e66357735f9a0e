//! Event envelope - the common wrapper for all channel deliveries.

use blockplan_id::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SyncEvent;

/// Where a delivery originated, relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Committed by this client and echoed outward.
    Local,
    /// Committed by another client and pushed to us.
    #[default]
    Remote,
}

impl std::fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOrigin::Local => write!(f, "local"),
            EventOrigin::Remote => write!(f, "remote"),
        }
    }
}

/// The envelope around a [`SyncEvent`].
///
/// `event_id` is assigned by the channel in delivery order; consumers apply
/// envelopes in the order received and never reorder or coalesce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Channel-assigned delivery sequence number.
    pub event_id: i64,

    /// When the change was committed.
    pub occurred_at: DateTime<Utc>,

    /// Which side of the channel produced this delivery.
    pub origin: EventOrigin,

    /// Correlation ID of the request that committed the change.
    pub request_id: RequestId,

    /// The change itself.
    pub event: SyncEvent,
}

impl SyncEnvelope {
    /// Wraps an event, stamping the current time.
    pub fn new(event_id: i64, origin: EventOrigin, request_id: RequestId, event: SyncEvent) -> Self {
        Self {
            event_id,
            occurred_at: Utc::now(),
            origin,
            request_id,
            event,
        }
    }
}
