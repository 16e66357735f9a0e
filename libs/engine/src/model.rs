//! Domain model: blocks, allocations, and the collections that hold them.
//!
//! A [`Block`] lives in the [`Catalog`] while unallocated. Placing it on
//! the grid turns it into an [`Allocation`] in the [`AllocationStore`];
//! removing the allocation returns the block to the catalog with its
//! interval cleared. The same `BlockId` identifies the block through the
//! whole cycle.

use std::collections::HashMap;

use blockplan_events::{AllocationRecord, BlockRecord, ClassType, SchedulingContext};
use blockplan_id::{BlockId, GroupId, RoomId, TeacherId, UnitId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A teaching block awaiting placement.
///
/// Duration is expressed as a count of fixed slots (the slot unit is
/// engine configuration, 30 minutes by default). Fields are immutable once
/// created except through an explicit update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub unit: String,
    pub unit_id: UnitId,
    pub class_type: ClassType,
    pub teacher: String,
    pub teacher_id: TeacherId,
    pub room: String,
    pub room_id: RoomId,
    pub group_id: GroupId,
    /// Number of slot units this block occupies. Always >= 1.
    pub slot_count: u32,
    /// How many consecutive weeks the block repeats, when it does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_weeks: Option<u32>,
    pub school: String,
    pub course: String,
    pub semester: u8,
}

impl Block {
    /// Total duration of this block for a given slot unit.
    ///
    /// Returns `None` if the multiplication overflows.
    pub fn duration(&self, slot_unit: TimeDelta) -> Option<TimeDelta> {
        let slots = i32::try_from(self.slot_count).ok()?;
        slot_unit.checked_mul(slots)
    }

    /// The block as it travels on the synchronization channel,
    /// unallocated.
    pub fn to_record(&self) -> BlockRecord {
        BlockRecord {
            block_id: self.id,
            unit: self.unit.clone(),
            unit_id: self.unit_id,
            class_type: self.class_type,
            teacher: self.teacher.clone(),
            teacher_id: self.teacher_id,
            room: self.room.clone(),
            room_id: self.room_id,
            group_id: self.group_id,
            slot_count: self.slot_count,
            repeat_weeks: self.repeat_weeks,
            school: self.school.clone(),
            course: self.course.clone(),
            semester: self.semester,
            context: None,
            start: None,
            end: None,
        }
    }

    /// Rebuilds a catalog block from a channel record, dropping any
    /// interval the record carried.
    pub fn from_record(record: &BlockRecord) -> Self {
        Self {
            id: record.block_id,
            unit: record.unit.clone(),
            unit_id: record.unit_id,
            class_type: record.class_type,
            teacher: record.teacher.clone(),
            teacher_id: record.teacher_id,
            room: record.room.clone(),
            room_id: record.room_id,
            group_id: record.group_id,
            slot_count: record.slot_count,
            repeat_weeks: record.repeat_weeks,
            school: record.school.clone(),
            course: record.course.clone(),
            semester: record.semester,
        }
    }
}

/// A block bound to a concrete half-open interval in one scheduling
/// context.
///
/// `end` is always derived from the block's duration; it is never set
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub block: Block,
    pub context: SchedulingContext,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Allocation {
    /// The id shared with the underlying block.
    pub fn id(&self) -> BlockId {
        self.block.id
    }

    /// Half-open intersection test against a candidate interval.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }

    /// The allocation as it travels on the synchronization channel.
    pub fn to_record(&self) -> AllocationRecord {
        AllocationRecord {
            block_id: self.block.id,
            unit: self.block.unit.clone(),
            unit_id: self.block.unit_id,
            class_type: self.block.class_type,
            teacher: self.block.teacher.clone(),
            teacher_id: self.block.teacher_id,
            room: self.block.room.clone(),
            room_id: self.block.room_id,
            group_id: self.block.group_id,
            slot_count: self.block.slot_count,
            repeat_weeks: self.block.repeat_weeks,
            school: self.block.school.clone(),
            course: self.block.course.clone(),
            semester: self.block.semester,
            context: self.context,
            start: self.start,
            end: self.end,
        }
    }

    /// Rebuilds an allocation from a channel record.
    pub fn from_record(record: &AllocationRecord) -> Self {
        Self {
            block: Block {
                id: record.block_id,
                unit: record.unit.clone(),
                unit_id: record.unit_id,
                class_type: record.class_type,
                teacher: record.teacher.clone(),
                teacher_id: record.teacher_id,
                room: record.room.clone(),
                room_id: record.room_id,
                group_id: record.group_id,
                slot_count: record.slot_count,
                repeat_weeks: record.repeat_weeks,
                school: record.school.clone(),
                course: record.course.clone(),
                semester: record.semester,
            },
            context: record.context,
            start: record.start,
            end: record.end,
        }
    }
}

/// Unallocated blocks, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    blocks: HashMap<BlockId, Block>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a catalog from a list of blocks. Later duplicates win.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        Self {
            blocks: blocks.into_iter().map(|b| (b.id, b)).collect(),
        }
    }

    pub fn insert(&mut self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    pub fn remove(&mut self, id: BlockId) -> Option<Block> {
        self.blocks.remove(&id)
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks, sorted by id for a stable snapshot.
    pub fn snapshot(&self) -> Vec<Block> {
        let mut blocks: Vec<_> = self.blocks.values().cloned().collect();
        blocks.sort_by_key(|b| b.id);
        blocks
    }

    /// Blocks matching the school/course/semester picker.
    pub fn filtered(&self, school: &str, course: &str, semester: u8) -> Vec<&Block> {
        let mut blocks: Vec<_> = self
            .blocks
            .values()
            .filter(|b| b.school == school && b.course == course && b.semester == semester)
            .collect();
        blocks.sort_by_key(|b| b.id);
        blocks
    }
}

/// Placed allocations, keyed by block id.
#[derive(Debug, Clone, Default)]
pub struct AllocationStore {
    allocations: HashMap<BlockId, Allocation>,
}

impl AllocationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store from existing allocations. Later duplicates win.
    pub fn from_allocations(allocations: impl IntoIterator<Item = Allocation>) -> Self {
        Self {
            allocations: allocations.into_iter().map(|a| (a.id(), a)).collect(),
        }
    }

    pub fn insert(&mut self, allocation: Allocation) {
        self.allocations.insert(allocation.id(), allocation);
    }

    pub fn remove(&mut self, id: BlockId) -> Option<Allocation> {
        self.allocations.remove(&id)
    }

    pub fn get(&self, id: BlockId) -> Option<&Allocation> {
        self.allocations.get(&id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut Allocation> {
        self.allocations.get_mut(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.allocations.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Iterates over every allocation, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }

    /// Iterates over the allocations of one scheduling context.
    pub fn in_context(
        &self,
        context: SchedulingContext,
    ) -> impl Iterator<Item = &Allocation> {
        self.allocations
            .values()
            .filter(move |a| a.context == context)
    }

    /// Drains every allocation out of the store.
    pub fn drain(&mut self) -> Vec<Allocation> {
        self.allocations.drain().map(|(_, a)| a).collect()
    }

    /// All allocations, sorted by start then id for a stable snapshot.
    pub fn snapshot(&self) -> Vec<Allocation> {
        let mut allocations: Vec<_> = self.allocations.values().cloned().collect();
        allocations.sort_by_key(|a| (a.start, a.id()));
        allocations
    }
}
