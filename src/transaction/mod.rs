// ============================================================================
// Transaction Module
// ============================================================================
//
// Undo-logged transaction scopes over the persistent pool.
//
// Design Patterns Used:
// - State Pattern: scope lifecycle (Active, Committed, RolledBack)
// - Command Pattern: undo records replayed backwards on abort
// - RAII: an uncommitted scope rolls back when dropped
//
// ============================================================================

pub mod scope;
pub mod state;
pub mod undo;

pub use scope::Transaction;
pub use state::{TransactionId, TransactionState};
pub use undo::UndoRecord;
