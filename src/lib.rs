// ============================================================================
// RustPmemKV Library
// ============================================================================
//
// Persistent-memory tier for a key-value server: a transactional object
// pool, the doubly-linked entry store, the double-buffered command log,
// the victim pipeline with its eviction policies, and startup
// reconstruction of the in-memory index.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod facade;
pub mod index;
pub mod pool;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::TierConfig;
pub use core::{Handle, PmemError, Result};
pub use facade::{BufferSelector, LogFlusher, PmemTier, TierHandle, TierStatus};
pub use index::{IndexEntry, KeyIndex, MemoryIndex};
pub use pool::{PmemPool, PoolOptions, PoolStats};
pub use storage::{
    BufferSlot, ChainKind, Direction, DurabilityMode, EvictionPolicy, LoggedCommand, PolicyKind,
    ReconstructReport,
};
pub use transaction::Transaction;
