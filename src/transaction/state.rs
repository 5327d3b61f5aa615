// ============================================================================
// Scope Lifecycle
// ============================================================================
//
// A scope is Active until it either commits or rolls back, exactly once.
// Dropping an Active scope counts as a rollback.
//
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Process-wide sequence number of a transaction scope, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        TransactionId(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-tx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    /// Undo log replayed, pool restored to its pre-scope image
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}
