// ============================================================================
// Persistent Entry Store
// ============================================================================
//
// Doubly-linked list of live key/value nodes, newest (or most recently
// touched) first. Every function taking a `Transaction` must be called
// inside a scope; the caller decides when to commit.
//
// ============================================================================

use super::chain::{self, ChainIter, Direction};
use crate::core::{Handle, Result};
use crate::pool::{PmemObject, PmemPool};
use crate::storage::layout::{ChainKind, EntryNode};
use crate::transaction::Transaction;

/// Allocate a node for `key`/`value` and link it as the new head.
///
/// Returns the node handle for the caller to keep as a back-reference.
pub fn insert_front(tx: &mut Transaction<'_>, key: Handle, value: Handle) -> Result<Handle> {
    let node = tx.alloc(PmemObject::Entry(EntryNode::new(key, value)))?;
    chain::link_front(tx, ChainKind::Entries, node)?;
    tx.root_mut()?.entry_count += 1;
    Ok(node)
}

/// Point an existing node at a new value payload.
///
/// Linkage and counters are untouched. Returns the previous value handle,
/// which the caller usually frees in the same scope.
pub fn update_value(tx: &mut Transaction<'_>, node: Handle, new_value: Handle) -> Result<Handle> {
    let entry = tx.entry_mut(node)?;
    Ok(std::mem::replace(&mut entry.value, new_value))
}

/// Remove a node from the store and free it together with its payloads
pub fn unlink_and_free(tx: &mut Transaction<'_>, node: Handle) -> Result<()> {
    unlink_detached(tx, node)?;
    let (key, value) = {
        let entry = tx.entry(node)?;
        (entry.key, entry.value)
    };
    tx.free(key)?;
    tx.free(value)?;
    tx.free(node)
}

/// Remove a node from the store without freeing anything.
///
/// The node keeps its key and value handles so it can be relinked
/// elsewhere.
pub fn unlink_detached(tx: &mut Transaction<'_>, node: Handle) -> Result<()> {
    chain::splice_out(tx, ChainKind::Entries, node)?;
    let root = tx.root_mut()?;
    chain::decrement(&mut root.entry_count, 1, "entry_count")
}

/// Move a node to the head of the store, marking it most recently used
pub fn promote(tx: &mut Transaction<'_>, node: Handle) -> Result<()> {
    if tx.root().entry_first == Some(node) {
        return Ok(());
    }
    chain::splice_out(tx, ChainKind::Entries, node)?;
    chain::link_front(tx, ChainKind::Entries, node)
}

/// Walk the store head-to-tail or tail-to-head.
///
/// Restartable: every call starts a fresh walk. An empty store yields
/// nothing.
pub fn iterate(pool: &PmemPool, direction: Direction) -> ChainIter<'_> {
    ChainIter::new(pool, ChainKind::Entries, direction)
}

/// Resolve a node's key and value payloads
pub fn read_pair(pool: &PmemPool, node: Handle) -> Result<(&[u8], &[u8])> {
    let entry = pool.entry(node)?;
    Ok((pool.bytes(entry.key)?, pool.bytes(entry.value)?))
}
