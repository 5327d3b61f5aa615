// ============================================================================
// Undo Records
// ============================================================================
//
// Each record captures what a transaction touched before touching it, so
// that abort can walk the log backwards and restore the pre-transaction
// image of the pool.
//
// ============================================================================

use crate::core::Handle;
use crate::pool::PmemObject;
use crate::storage::layout::Root;

#[derive(Debug, Clone)]
pub enum UndoRecord {
    /// Root contents before its first mutation in the scope
    Root(Root),

    /// Object contents before its first mutation in the scope
    Object { handle: Handle, before: PmemObject },

    /// Object allocated inside the scope; undone by releasing the slot
    Allocated(Handle),

    /// Object freed inside the scope; undone by putting it back
    Freed { handle: Handle, before: PmemObject },
}

impl UndoRecord {
    /// Whether undoing this record changes slot occupancy
    pub fn is_structural(&self) -> bool {
        matches!(self, UndoRecord::Allocated(_) | UndoRecord::Freed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_classification() {
        let handle = Handle::new(9, 1);
        let alloc = UndoRecord::Allocated(handle);
        assert!(alloc.is_structural());
        let freed = UndoRecord::Freed {
            handle,
            before: PmemObject::Bytes(b"v".to_vec()),
        };
        assert!(freed.is_structural());

        let root = UndoRecord::Root(Root::default());
        assert!(!root.is_structural());
    }
}
