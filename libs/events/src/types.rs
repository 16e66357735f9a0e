//! Event type definitions for the synchronization channel.
//!
//! Each event carries a full snapshot of the block it names, so a consumer
//! can apply it without a read back to the persistence service.

use blockplan_id::{BlockId, GroupId, RoomId, TeacherId, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    pub const BLOCK_ADDED: &str = "block.added";
    pub const BLOCK_REMOVED: &str = "block.removed";
    pub const BLOCK_UPDATED: &str = "block.updated";
}

// =============================================================================
// Shared Domain Vocabulary
// =============================================================================

/// The kind of teaching a block delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassType {
    Lecture,
    Practical,
    Lab,
}

impl std::fmt::Display for ClassType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassType::Lecture => write!(f, "lecture"),
            ClassType::Practical => write!(f, "practical"),
            ClassType::Lab => write!(f, "lab"),
        }
    }
}

/// The partition of the grid an allocation is checked against.
///
/// Overlap is only meaningful within one context: the same half-hour can
/// hold a lecture in Room A and another in Room B, but not two in Room A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SchedulingContext {
    Room(RoomId),
    Teacher(TeacherId),
    Group(GroupId),
}

impl std::fmt::Display for SchedulingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingContext::Room(id) => write!(f, "room:{id}"),
            SchedulingContext::Teacher(id) => write!(f, "teacher:{id}"),
            SchedulingContext::Group(id) => write!(f, "group:{id}"),
        }
    }
}

// =============================================================================
// Wire Records
// =============================================================================

/// A committed allocation as it travels on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub block_id: BlockId,
    pub unit: String,
    pub unit_id: UnitId,
    pub class_type: ClassType,
    pub teacher: String,
    pub teacher_id: TeacherId,
    pub room: String,
    pub room_id: RoomId,
    pub group_id: GroupId,
    pub slot_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_weeks: Option<u32>,
    pub school: String,
    pub course: String,
    pub semester: u8,
    pub context: SchedulingContext,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A block as it travels on the channel, allocated or not.
///
/// `start`/`end` are both present (the block sits somewhere on the grid)
/// or both absent (the block is back in the catalog). A removal event
/// without an interval is the only thing that returns a block to the
/// catalog on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_id: BlockId,
    pub unit: String,
    pub unit_id: UnitId,
    pub class_type: ClassType,
    pub teacher: String,
    pub teacher_id: TeacherId,
    pub room: String,
    pub room_id: RoomId,
    pub group_id: GroupId,
    pub slot_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_weeks: Option<u32>,
    pub school: String,
    pub course: String,
    pub semester: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<SchedulingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl BlockRecord {
    /// True when the record carries no interval, i.e. the block is
    /// genuinely unallocated rather than relocated.
    pub fn is_unallocated(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

// =============================================================================
// Sync Events
// =============================================================================

/// A change committed by some client, pushed to every other viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncEvent {
    /// An allocation was committed somewhere else.
    #[serde(rename = "block.added")]
    BlockAdded(AllocationRecord),
    /// A block left the grid. Without an interval the block returns to
    /// the catalog; with one it was merely relocated.
    #[serde(rename = "block.removed")]
    BlockRemoved(BlockRecord),
    /// An allocated block changed fields or interval.
    #[serde(rename = "block.updated")]
    BlockUpdated(AllocationRecord),
}

impl SyncEvent {
    /// The wire name of this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::BlockAdded(_) => event_types::BLOCK_ADDED,
            SyncEvent::BlockRemoved(_) => event_types::BLOCK_REMOVED,
            SyncEvent::BlockUpdated(_) => event_types::BLOCK_UPDATED,
        }
    }

    /// The block this event names.
    pub fn block_id(&self) -> BlockId {
        match self {
            SyncEvent::BlockAdded(rec) | SyncEvent::BlockUpdated(rec) => rec.block_id,
            SyncEvent::BlockRemoved(rec) => rec.block_id,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
