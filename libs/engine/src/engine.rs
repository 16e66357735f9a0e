//! The allocation engine: optimistic mutation, rollback, and remote
//! reconciliation.
//!
//! Every mutating operation is split in two phases around the persistence
//! call. `begin_*` validates against a consistent snapshot, applies the
//! optimistic local change, and marks the block pending; `complete_*`
//! settles the operation once persistence answers, committing or rolling
//! back. Both phases are synchronous, so a caller that runs them on one
//! task queue gets the serialized timeline the invariant needs while
//! persistence calls for distinct blocks overlap freely in between.

use std::collections::HashMap;

use blockplan_events::{SchedulingContext, SyncEvent};
use blockplan_id::BlockId;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};

use crate::conflict::first_conflict;
use crate::error::{EngineError, EngineResult};
use crate::model::{Allocation, AllocationStore, Block, Catalog};
use crate::persistence::{AllocationPayload, PersistenceError};

/// What happened to a remote event when it was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event changed local state.
    Applied,
    /// The event was a duplicate or named state we never held.
    Ignored,
}

impl ReconcileOutcome {
    /// Returns true if the event changed local state.
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied)
    }
}

/// Rollback bookkeeping for one in-flight operation.
#[derive(Debug, Clone)]
enum PendingOp {
    /// Receive: on failure the provisional allocation is dropped and the
    /// block returns to the catalog.
    Receive,
    /// Move: on failure the allocation snaps back to its prior interval.
    Move {
        prior_start: DateTime<Utc>,
        prior_end: DateTime<Utc>,
    },
    /// Remove: on failure the allocation is reinstated as it was.
    Remove { allocation: Allocation },
}

/// The block-allocation and conflict-resolution engine.
///
/// Owns the catalog, the allocation store, and an explicit per-block
/// pending map — there is no ambient state. One instance expects to be
/// driven from a single task; see [`crate::EngineRuntime`] for the
/// serialized loop.
#[derive(Debug)]
pub struct AllocationEngine {
    catalog: Catalog,
    store: AllocationStore,
    pending: HashMap<BlockId, PendingOp>,
    clear_in_flight: bool,
    slot_unit: TimeDelta,
}

impl AllocationEngine {
    /// Creates an empty engine with the given slot unit.
    pub fn new(slot_unit: TimeDelta) -> Self {
        Self::with_state(slot_unit, Catalog::new(), AllocationStore::new())
    }

    /// Creates an engine seeded with existing state, e.g. the initial
    /// fetch from the persistence service.
    pub fn with_state(slot_unit: TimeDelta, catalog: Catalog, store: AllocationStore) -> Self {
        Self {
            catalog,
            store,
            pending: HashMap::new(),
            clear_in_flight: false,
            slot_unit,
        }
    }

    /// The catalog of unallocated blocks.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The store of placed allocations.
    pub fn allocations(&self) -> &AllocationStore {
        &self.store
    }

    /// True while an operation for this block has not settled.
    pub fn is_pending(&self, id: BlockId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Number of unsettled operations.
    pub fn pending_count(&self) -> usize {
        self.pending.len() + usize::from(self.clear_in_flight)
    }

    /// Scans every context for two overlapping allocations.
    ///
    /// The engine never lets this return `Some`; tests call it after every
    /// operation sequence.
    pub fn overlapping_pair(&self) -> Option<(BlockId, BlockId)> {
        let allocations: Vec<_> = self.store.iter().collect();
        for (i, a) in allocations.iter().enumerate() {
            for b in &allocations[i + 1..] {
                if a.context == b.context && a.overlaps(b.start, b.end) {
                    return Some((a.id(), b.id()));
                }
            }
        }
        None
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Phase one of receiving a catalog block onto the grid.
    ///
    /// On success the block has left the catalog, a provisional allocation
    /// is visible, and the returned payload must be handed to the
    /// persistence collaborator; the settlement goes to
    /// [`complete_receive`](Self::complete_receive).
    #[instrument(skip(self), fields(block_id = %block_id, context = %context, start = %start))]
    pub fn begin_receive(
        &mut self,
        block_id: BlockId,
        context: SchedulingContext,
        start: DateTime<Utc>,
    ) -> EngineResult<AllocationPayload> {
        self.ensure_not_pending(block_id)?;

        let Some(block) = self.catalog.get(block_id).cloned() else {
            debug!("receive for a block not in the catalog");
            return Err(EngineError::NotFound(block_id));
        };

        let end = self.derive_end(&block, start)?;

        if let Some(existing) = first_conflict(start, end, context, self.store.iter(), None) {
            debug!(other = %existing.id(), "receive rejected: interval conflict");
            return Err(EngineError::ConflictDetected {
                other: existing.id(),
                context,
                start,
                end,
            });
        }

        self.catalog.remove(block_id);
        let allocation = Allocation {
            block,
            context,
            start,
            end,
        };
        let payload = AllocationPayload::allocated(&allocation);
        self.store.insert(allocation);
        self.pending.insert(block_id, PendingOp::Receive);
        debug!("receive accepted, awaiting persistence");
        Ok(payload)
    }

    /// Phase two of a receive: commit on success, roll back on failure.
    #[instrument(skip(self, result), fields(block_id = %block_id, ok = result.is_ok()))]
    pub fn complete_receive(
        &mut self,
        block_id: BlockId,
        result: Result<(), PersistenceError>,
    ) -> EngineResult<Allocation> {
        self.take_pending(block_id, |op| matches!(op, PendingOp::Receive))?;

        match result {
            Ok(()) => {
                let allocation = self
                    .store
                    .get(block_id)
                    .cloned()
                    .ok_or(EngineError::NotFound(block_id))?;
                info!("allocation committed");
                Ok(allocation)
            }
            Err(e) => {
                if let Some(allocation) = self.store.remove(block_id) {
                    self.catalog.insert(allocation.block);
                }
                warn!(error = %e, "persistence failed, receive rolled back");
                Err(EngineError::Persistence(e))
            }
        }
    }

    // =========================================================================
    // Move
    // =========================================================================

    /// Phase one of moving an allocation to a new start.
    ///
    /// The end is recomputed from the block's duration; the conflict check
    /// excludes the allocation itself, so a no-op move succeeds trivially.
    #[instrument(skip(self), fields(block_id = %block_id, new_start = %new_start))]
    pub fn begin_move(
        &mut self,
        block_id: BlockId,
        new_start: DateTime<Utc>,
    ) -> EngineResult<AllocationPayload> {
        self.ensure_not_pending(block_id)?;

        let (context, prior_start, prior_end, new_end) = {
            let Some(current) = self.store.get(block_id) else {
                debug!("move for an unknown allocation");
                return Err(EngineError::NotFound(block_id));
            };
            let new_end = self.derive_end(&current.block, new_start)?;
            (current.context, current.start, current.end, new_end)
        };

        if let Some(existing) =
            first_conflict(new_start, new_end, context, self.store.iter(), Some(block_id))
        {
            debug!(other = %existing.id(), "move rejected: interval conflict");
            return Err(EngineError::ConflictDetected {
                other: existing.id(),
                context,
                start: new_start,
                end: new_end,
            });
        }

        let allocation = self
            .store
            .get_mut(block_id)
            .ok_or(EngineError::NotFound(block_id))?;
        allocation.start = new_start;
        allocation.end = new_end;
        let payload = AllocationPayload::allocated(allocation);
        self.pending.insert(
            block_id,
            PendingOp::Move {
                prior_start,
                prior_end,
            },
        );
        debug!("move accepted, awaiting persistence");
        Ok(payload)
    }

    /// Phase two of a move: commit, or snap back to the prior interval.
    #[instrument(skip(self, result), fields(block_id = %block_id, ok = result.is_ok()))]
    pub fn complete_move(
        &mut self,
        block_id: BlockId,
        result: Result<(), PersistenceError>,
    ) -> EngineResult<Allocation> {
        let op = self.take_pending(block_id, |op| matches!(op, PendingOp::Move { .. }))?;

        match result {
            Ok(()) => {
                let allocation = self
                    .store
                    .get(block_id)
                    .cloned()
                    .ok_or(EngineError::NotFound(block_id))?;
                info!("move committed");
                Ok(allocation)
            }
            Err(e) => {
                if let PendingOp::Move {
                    prior_start,
                    prior_end,
                } = op
                {
                    if let Some(allocation) = self.store.get_mut(block_id) {
                        allocation.start = prior_start;
                        allocation.end = prior_end;
                    }
                }
                warn!(error = %e, "persistence failed, move rolled back");
                Err(EngineError::Persistence(e))
            }
        }
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Phase one of removing an allocation back to the catalog.
    #[instrument(skip(self), fields(block_id = %block_id))]
    pub fn begin_remove(&mut self, block_id: BlockId) -> EngineResult<AllocationPayload> {
        self.ensure_not_pending(block_id)?;

        let Some(allocation) = self.store.remove(block_id) else {
            debug!("remove for an unknown allocation");
            return Err(EngineError::NotFound(block_id));
        };

        let payload = AllocationPayload::cleared(&allocation.block);
        self.catalog.insert(allocation.block.clone());
        self.pending
            .insert(block_id, PendingOp::Remove { allocation });
        debug!("remove accepted, awaiting persistence");
        Ok(payload)
    }

    /// Phase two of a remove: commit, or reinstate the allocation.
    ///
    /// On success the returned block is back in the catalog with its
    /// interval cleared.
    #[instrument(skip(self, result), fields(block_id = %block_id, ok = result.is_ok()))]
    pub fn complete_remove(
        &mut self,
        block_id: BlockId,
        result: Result<(), PersistenceError>,
    ) -> EngineResult<Block> {
        let op = self.take_pending(block_id, |op| matches!(op, PendingOp::Remove { .. }))?;

        match result {
            Ok(()) => {
                let block = self
                    .catalog
                    .get(block_id)
                    .cloned()
                    .ok_or(EngineError::NotFound(block_id))?;
                info!("removal committed, block returned to catalog");
                Ok(block)
            }
            Err(e) => {
                if let PendingOp::Remove { allocation } = op {
                    self.catalog.remove(block_id);
                    self.store.insert(allocation);
                }
                warn!(error = %e, "persistence failed, remove rolled back");
                Err(EngineError::Persistence(e))
            }
        }
    }

    // =========================================================================
    // Clear
    // =========================================================================

    /// Phase one of the bulk grid reset.
    ///
    /// Nothing is mutated locally until persistence confirms; the reset is
    /// refused while any other operation is unsettled.
    #[instrument(skip(self))]
    pub fn begin_clear(&mut self) -> EngineResult<()> {
        if let Some(id) = self.pending.keys().next().copied() {
            debug!(block_id = %id, "clear refused: operation in flight");
            return Err(EngineError::AlreadyInFlight(id));
        }
        if self.clear_in_flight {
            if let Some(existing) = self.store.iter().next() {
                return Err(EngineError::AlreadyInFlight(existing.id()));
            }
        }
        self.clear_in_flight = true;
        Ok(())
    }

    /// Phase two of the bulk reset: on success every allocation's block
    /// returns to the catalog; on failure nothing local changed.
    #[instrument(skip(self, result), fields(ok = result.is_ok()))]
    pub fn complete_clear(
        &mut self,
        result: Result<(), PersistenceError>,
    ) -> EngineResult<Vec<Block>> {
        self.clear_in_flight = false;

        match result {
            Ok(()) => {
                let mut blocks: Vec<Block> = self
                    .store
                    .drain()
                    .into_iter()
                    .map(|allocation| allocation.block)
                    .collect();
                blocks.sort_by_key(|b| b.id);
                for block in &blocks {
                    self.catalog.insert(block.clone());
                }
                info!(count = blocks.len(), "all allocations cleared");
                Ok(blocks)
            }
            Err(e) => {
                warn!(error = %e, "persistence failed, clear abandoned");
                Err(EngineError::Persistence(e))
            }
        }
    }

    // =========================================================================
    // Remote reconciliation
    // =========================================================================

    /// Applies a change committed by another client.
    ///
    /// Events are applied in delivery order on the same timeline as local
    /// operations. Application is idempotent by block id: a duplicate
    /// `block.added` is dropped, and a `block.removed` only re-enters the
    /// catalog when the event carries no interval — a relocation is not a
    /// removal.
    #[instrument(skip(self, event), fields(event_type = event.event_type(), block_id = %event.block_id()))]
    pub fn reconcile_remote(&mut self, event: &SyncEvent) -> ReconcileOutcome {
        match event {
            SyncEvent::BlockAdded(record) => {
                if self.store.contains(record.block_id) {
                    debug!("duplicate added event dropped");
                    return ReconcileOutcome::Ignored;
                }
                self.catalog.remove(record.block_id);
                self.store.insert(Allocation::from_record(record));
                debug!("remote allocation applied");
                ReconcileOutcome::Applied
            }
            SyncEvent::BlockRemoved(record) => {
                let removed = self.store.remove(record.block_id);
                if record.is_unallocated() {
                    let block = removed
                        .map(|allocation| allocation.block)
                        .unwrap_or_else(|| Block::from_record(record));
                    self.catalog.insert(block);
                    debug!("remote removal applied, block back in catalog");
                    ReconcileOutcome::Applied
                } else if removed.is_some() {
                    // Relocated elsewhere; the matching update follows.
                    debug!("remote relocation removed local copy");
                    ReconcileOutcome::Applied
                } else {
                    ReconcileOutcome::Ignored
                }
            }
            SyncEvent::BlockUpdated(record) => {
                self.catalog.remove(record.block_id);
                self.store.insert(Allocation::from_record(record));
                debug!("remote update applied");
                ReconcileOutcome::Applied
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_not_pending(&self, id: BlockId) -> EngineResult<()> {
        if self.pending.contains_key(&id) || self.clear_in_flight {
            debug!(block_id = %id, "operation refused: already in flight");
            return Err(EngineError::AlreadyInFlight(id));
        }
        Ok(())
    }

    /// Removes the pending entry for `id` if it matches the expected
    /// operation kind; restores it otherwise.
    fn take_pending(
        &mut self,
        id: BlockId,
        expected: impl Fn(&PendingOp) -> bool,
    ) -> EngineResult<PendingOp> {
        match self.pending.remove(&id) {
            Some(op) if expected(&op) => Ok(op),
            Some(op) => {
                self.pending.insert(id, op);
                warn!(block_id = %id, "settlement did not match the pending operation");
                Err(EngineError::NotFound(id))
            }
            None => {
                warn!(block_id = %id, "settlement for a block with nothing pending");
                Err(EngineError::NotFound(id))
            }
        }
    }

    fn derive_end(&self, block: &Block, start: DateTime<Utc>) -> EngineResult<DateTime<Utc>> {
        if block.slot_count == 0 {
            return Err(EngineError::InvalidInterval {
                reason: "slot count must be positive".to_string(),
            });
        }
        let duration = block
            .duration(self.slot_unit)
            .filter(|d| *d > TimeDelta::zero())
            .ok_or_else(|| EngineError::InvalidInterval {
                reason: format!("duration overflows for {} slots", block.slot_count),
            })?;
        start
            .checked_add_signed(duration)
            .ok_or_else(|| EngineError::InvalidInterval {
                reason: "start is out of the representable time range".to_string(),
            })
    }
}
