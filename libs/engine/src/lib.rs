//! # blockplan-engine
//!
//! Block allocation and conflict resolution for a weekly teaching
//! timetable.
//!
//! The engine owns two collections: a [`Catalog`] of unallocated teaching
//! blocks and an [`AllocationStore`] of blocks placed on the grid. Every
//! placement is checked against the non-overlap invariant: within one
//! scheduling context (a room, a teacher, or a class group), no two
//! allocations may intersect in time. Intervals are half-open, so a block
//! ending at 10:00 does not collide with one starting at 10:00.
//!
//! ## Operation model
//!
//! Mutations are optimistic. A receive/move/remove is accepted locally,
//! the block is marked pending, and the change is handed to an external
//! persistence service. Confirmation commits the change; rejection or
//! timeout rolls the engine back to its prior state. While a block is
//! pending, further operations on the same block are refused with
//! [`EngineError::AlreadyInFlight`] — operations on distinct blocks may be
//! in flight concurrently.
//!
//! ## Synchronization
//!
//! Other viewers edit the same grid. Their committed changes arrive as
//! [`blockplan_events::SyncEvent`]s and are applied, in delivery order, on
//! the same serialized loop that handles local operations, so conflict
//! checks always observe a consistent snapshot. Application is idempotent:
//! duplicate deliveries and reconnect replays are dropped by block id.

mod config;
mod conflict;
mod engine;
mod error;
mod model;
mod persistence;
mod runtime;

pub use config::EngineConfig;
pub use conflict::{first_conflict, has_conflict};
pub use engine::{AllocationEngine, ReconcileOutcome};
pub use error::{EngineError, EngineResult};
pub use model::{Allocation, AllocationStore, Block, Catalog};
pub use persistence::{
    persist_with_timeout, AllocationPayload, PersistenceClient, PersistenceError,
};
pub use runtime::{EngineHandle, EngineRuntime};

/// Re-export the shared vocabulary so consumers need a single import.
pub use blockplan_events::{ClassType, SchedulingContext, SyncEnvelope, SyncEvent};
