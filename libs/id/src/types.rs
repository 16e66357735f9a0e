//! Typed ID definitions for all timetable resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Teaching Blocks
// =============================================================================

// A block keeps its ID for its whole lifecycle: the same `blk_…` identifies
// the catalog entry and the allocation it becomes once placed on the grid.
define_id!(BlockId, "blk");

// =============================================================================
// Scheduling Resources
// =============================================================================

define_id!(RoomId, "room");
define_id!(TeacherId, "tch");
define_id!(GroupId, "grp");
define_id!(UnitId, "unit");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_roundtrip() {
        let id = BlockId::new();
        let s = id.to_string();
        let parsed: BlockId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_block_id_prefix() {
        let id = BlockId::new();
        let s = id.to_string();
        assert!(s.starts_with("blk_"));
    }

    #[test]
    fn test_block_id_invalid_prefix() {
        let result: Result<BlockId, _> = "room_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_block_id_missing_separator() {
        let result: Result<BlockId, _> = "blk01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_block_id_empty() {
        let result: Result<BlockId, _> = "".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_block_id_invalid_ulid() {
        let result: Result<BlockId, _> = "blk_invalid".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_block_id_json_roundtrip() {
        let id = BlockId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: BlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_block_id_sortable() {
        let id1 = BlockId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = BlockId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = vec![
            BlockId::PREFIX,
            RoomId::PREFIX,
            TeacherId::PREFIX,
            GroupId::PREFIX,
            UnitId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
