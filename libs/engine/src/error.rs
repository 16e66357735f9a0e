//! Error taxonomy for allocation operations.
//!
//! Every failure is recovered locally by the engine (rollback to the last
//! consistent state); these variants tell the caller what happened and
//! whether it deserves a user-facing message.

use blockplan_events::SchedulingContext;
use blockplan_id::BlockId;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::persistence::PersistenceError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during allocation operations.
///
/// `Ok` from an operation is the committed outcome; an `Err` carries the
/// reason the operation was reverted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// The block or allocation id is unknown (stale UI action).
    #[error("block not found: {0}")]
    NotFound(BlockId),

    /// Another operation for the same block has not settled yet.
    #[error("operation already in flight for block {0}")]
    AlreadyInFlight(BlockId),

    /// The candidate interval overlaps an existing allocation in the same
    /// scheduling context.
    #[error("interval [{start}, {end}) conflicts with block {other} in {context}")]
    ConflictDetected {
        other: BlockId,
        context: SchedulingContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// The proposed interval is not a well-formed time range.
    #[error("invalid interval: {reason}")]
    InvalidInterval { reason: String },

    /// The persistence collaborator rejected the change or timed out.
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// True for errors that indicate a stale UI action and should revert
    /// without disruptive messaging.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::AlreadyInFlight(_)
        )
    }

    /// True for transient infrastructure failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }

    /// True when the business rule (non-overlap) rejected the operation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::ConflictDetected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let id = BlockId::new();
        assert!(EngineError::NotFound(id).is_silent());
        assert!(EngineError::AlreadyInFlight(id).is_silent());
        assert!(!EngineError::InvalidInterval {
            reason: "end before start".to_string()
        }
        .is_silent());

        let persistence =
            EngineError::Persistence(PersistenceError::Rejected("boom".to_string()));
        assert!(persistence.is_retryable());
        assert!(!persistence.is_silent());
    }

    #[test]
    fn test_conflict_message_names_both_blocks() {
        let other = BlockId::new();
        let room = blockplan_id::RoomId::new();
        let err = EngineError::ConflictDetected {
            other,
            context: SchedulingContext::Room(room),
            start: chrono::Utc::now(),
            end: chrono::Utc::now(),
        };
        let msg = err.to_string();
        assert!(msg.contains(&other.to_string()));
        assert!(msg.contains("room:"));
        assert!(err.is_conflict());
    }
}
