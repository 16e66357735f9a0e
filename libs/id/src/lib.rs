//! # blockplan-id
//!
//! Stable ID types, parsing, and validation for the blockplan timetable
//! engine.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; display names are user-controlled
//!   labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed so a room can never be handed where a teacher is expected
//!
//! ## ID Format
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `blk_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `room_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `tch_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! This format provides:
//! - Type safety (prefix indicates resource type)
//! - Sortability (ULID is time-ordered)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
