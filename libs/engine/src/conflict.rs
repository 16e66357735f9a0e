//! Pure conflict detection over half-open intervals.
//!
//! A candidate interval conflicts with an existing allocation iff both sit
//! in the same scheduling context and
//! `existing.start < candidate_end && candidate_start < existing.end`.
//! Bounds are half-open: an allocation ending exactly when another starts
//! is not a conflict. The scan is O(n) over the allocations of one
//! context, which is plenty for a weekly grid.

use blockplan_events::SchedulingContext;
use blockplan_id::BlockId;
use chrono::{DateTime, Utc};

use crate::model::Allocation;

/// Finds the first allocation in `context` that overlaps the candidate
/// interval, skipping `exclude` (the candidate itself when re-checking a
/// move).
pub fn first_conflict<'a, I>(
    candidate_start: DateTime<Utc>,
    candidate_end: DateTime<Utc>,
    context: SchedulingContext,
    allocations: I,
    exclude: Option<BlockId>,
) -> Option<&'a Allocation>
where
    I: IntoIterator<Item = &'a Allocation>,
{
    allocations.into_iter().find(|existing| {
        existing.context == context
            && exclude != Some(existing.id())
            && existing.overlaps(candidate_start, candidate_end)
    })
}

/// True iff the candidate interval overlaps any same-context allocation.
pub fn has_conflict<'a, I>(
    candidate_start: DateTime<Utc>,
    candidate_end: DateTime<Utc>,
    context: SchedulingContext,
    allocations: I,
    exclude: Option<BlockId>,
) -> bool
where
    I: IntoIterator<Item = &'a Allocation>,
{
    first_conflict(candidate_start, candidate_end, context, allocations, exclude).is_some()
}
