//! The persistence collaborator seam.
//!
//! The engine never talks to a concrete database or HTTP client; it hands
//! each committed change to a [`PersistenceClient`] and treats rejection
//! and timeout identically — both trigger the rollback path.

use async_trait::async_trait;
use blockplan_events::{ClassType, SchedulingContext};
use blockplan_id::{BlockId, GroupId, RoomId, TeacherId, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::{Allocation, Block};

/// Errors surfaced by the persistence collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The service rejected the change.
    #[error("persistence call rejected: {0}")]
    Rejected(String),

    /// The call did not settle within the caller-supplied timeout.
    #[error("persistence call timed out after {0:?}")]
    Timeout(Duration),

    /// The service could not be reached at all.
    #[error("persistence service unavailable: {0}")]
    Unavailable(String),
}

/// The durable shape of one block's placement.
///
/// `start`/`end` are present for an allocation and absent when the change
/// clears the block's interval (a removal persists as an update with no
/// interval, matching the backing store's single block row per block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPayload {
    pub block_id: BlockId,
    pub unit_id: UnitId,
    pub class_type: ClassType,
    pub teacher_id: TeacherId,
    pub room_id: RoomId,
    pub group_id: GroupId,
    pub slot_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_weeks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<SchedulingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl AllocationPayload {
    /// Payload for committing an allocation.
    pub fn allocated(allocation: &Allocation) -> Self {
        Self {
            block_id: allocation.block.id,
            unit_id: allocation.block.unit_id,
            class_type: allocation.block.class_type,
            teacher_id: allocation.block.teacher_id,
            room_id: allocation.block.room_id,
            group_id: allocation.block.group_id,
            slot_count: allocation.block.slot_count,
            repeat_weeks: allocation.block.repeat_weeks,
            context: Some(allocation.context),
            start: Some(allocation.start),
            end: Some(allocation.end),
        }
    }

    /// Payload for clearing a block's interval (removal).
    pub fn cleared(block: &Block) -> Self {
        Self {
            block_id: block.id,
            unit_id: block.unit_id,
            class_type: block.class_type,
            teacher_id: block.teacher_id,
            room_id: block.room_id,
            group_id: block.group_id,
            slot_count: block.slot_count,
            repeat_weeks: block.repeat_weeks,
            context: None,
            start: None,
            end: None,
        }
    }
}

/// The external service that makes allocation changes durable.
#[async_trait]
pub trait PersistenceClient: Send + Sync + 'static {
    /// Creates or updates the durable row for one block.
    async fn create_or_update_allocation(
        &self,
        id: BlockId,
        payload: &AllocationPayload,
    ) -> Result<(), PersistenceError>;

    /// Clears every allocation in one call (the bulk grid reset).
    async fn clear_allocations(&self) -> Result<(), PersistenceError>;
}

/// Runs a persistence call under a timeout, folding the elapsed case into
/// [`PersistenceError::Timeout`] so both failure shapes take the same
/// rollback path.
pub async fn persist_with_timeout<P: PersistenceClient + ?Sized>(
    client: &P,
    id: BlockId,
    payload: &AllocationPayload,
    timeout: Duration,
) -> Result<(), PersistenceError> {
    match tokio::time::timeout(timeout, client.create_or_update_allocation(id, payload)).await {
        Ok(result) => result,
        Err(_) => Err(PersistenceError::Timeout(timeout)),
    }
}
