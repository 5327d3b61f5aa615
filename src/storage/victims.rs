// ============================================================================
// Victim Pipeline
// ============================================================================
//
// Nodes evicted from the entry store wait here, newest-evicted first, until
// they are flushed to the disk tier and reclaimed. Eviction relinks the
// node itself; payloads are never copied.
//
// ============================================================================

use super::chain::{self, ChainIter, Direction};
use crate::core::{Handle, PmemError, Result};
use crate::pool::PmemPool;
use crate::storage::layout::ChainKind;
use crate::transaction::Transaction;

/// Move one node from the entry store to the head of the victim pipeline
pub fn evict_one(tx: &mut Transaction<'_>, node: Handle) -> Result<()> {
    chain::splice_out(tx, ChainKind::Entries, node)?;
    chain::link_front(tx, ChainKind::Victims, node)?;
    let root = tx.root_mut()?;
    chain::decrement(&mut root.entry_count, 1, "entry_count")?;
    root.victim_count += 1;
    Ok(())
}

/// Move a run of nodes in one scope, adjusting both counters once.
///
/// Nodes are relinked in the order given, so the last one ends up at the
/// head of the pipeline.
pub fn evict_batch(tx: &mut Transaction<'_>, nodes: &[Handle]) -> Result<usize> {
    for &node in nodes {
        chain::splice_out(tx, ChainKind::Entries, node)?;
        chain::link_front(tx, ChainKind::Victims, node)?;
    }
    let moved = nodes.len() as u64;
    let root = tx.root_mut()?;
    chain::decrement(&mut root.entry_count, moved, "entry_count")?;
    root.victim_count += moved;
    Ok(nodes.len())
}

/// Reclaim every victim from `head` to the end of the pipeline.
///
/// Frees key, value and node for each. If `head` was the pipeline head the
/// root slot is nulled, otherwise the chain is cut after `head`'s
/// predecessor. Returns the number of nodes reclaimed.
pub fn flush_victim_chain(tx: &mut Transaction<'_>, head: Handle) -> Result<u64> {
    let predecessor = tx.entry(head)?.prev;
    let mut flushed = 0u64;
    let mut cursor = Some(head);

    while let Some(handle) = cursor {
        let (key, value, next, member_of) = {
            let node = tx.entry(handle)?;
            (node.key, node.value, node.next, node.chain)
        };
        if member_of != ChainKind::Victims {
            return Err(PmemError::CorruptChain(format!(
                "node {} in the victim pipeline is tagged {}",
                handle, member_of
            )));
        }
        tx.free(key)?;
        tx.free(value)?;
        tx.free(handle)?;
        let root = tx.root_mut()?;
        chain::decrement(&mut root.victim_count, 1, "victim_count")?;
        flushed += 1;
        cursor = next;
    }

    if tx.root().victim_first == Some(head) {
        tx.root_mut()?.victim_first = None;
    } else if let Some(predecessor) = predecessor {
        tx.entry_mut(predecessor)?.next = None;
    }
    Ok(flushed)
}

/// Take a single node out of the pipeline and free it.
///
/// Used when a key is rewritten or deleted while its old node is still
/// waiting to be flushed.
pub fn remove_victim(tx: &mut Transaction<'_>, node: Handle) -> Result<()> {
    chain::splice_out(tx, ChainKind::Victims, node)?;
    let (key, value) = {
        let entry = tx.entry(node)?;
        (entry.key, entry.value)
    };
    tx.free(key)?;
    tx.free(value)?;
    tx.free(node)?;
    let root = tx.root_mut()?;
    chain::decrement(&mut root.victim_count, 1, "victim_count")
}

/// Newest-evicted-first walk over the pipeline
pub fn iterate(pool: &PmemPool) -> ChainIter<'_> {
    ChainIter::new(pool, ChainKind::Victims, Direction::Forward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolOptions;
    use crate::storage::entries;

    fn insert(pool: &mut PmemPool, key: &str) -> Handle {
        pool.transaction(|tx| {
            let key = tx.alloc_bytes(key.as_bytes())?;
            let value = tx.alloc_bytes(b"v")?;
            entries::insert_front(tx, key, value)
        })
        .unwrap()
    }

    #[test]
    fn test_evict_one_relinks_without_copy() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a");
        let b = insert(&mut pool, "b");
        let before = pool.stats().live_objects;

        pool.transaction(|tx| evict_one(tx, a)).unwrap();

        assert_eq!(pool.root().entry_count, 1);
        assert_eq!(pool.root().entry_first, Some(b));
        assert_eq!(pool.root().entry_last, Some(b));
        assert_eq!(pool.root().victim_first, Some(a));
        assert_eq!(pool.root().victim_count, 1);
        assert_eq!(pool.entry(a).unwrap().chain, ChainKind::Victims);
        assert_eq!(pool.stats().live_objects, before);
    }

    #[test]
    fn test_evict_batch_adjusts_counters_once() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a");
        let b = insert(&mut pool, "b");
        let c = insert(&mut pool, "c");

        let moved = pool.transaction(|tx| evict_batch(tx, &[a, b])).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(pool.root().entry_count, 1);
        assert_eq!(pool.root().entry_last, Some(c));
        assert_eq!(pool.root().victim_count, 2);
        assert_eq!(iterate(&pool).collect::<Vec<_>>(), vec![b, a]);
    }

    #[test]
    fn test_flush_partial_chain_detaches_predecessor() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a");
        let b = insert(&mut pool, "b");
        let c = insert(&mut pool, "c");
        pool.transaction(|tx| evict_batch(tx, &[a, b, c])).unwrap();
        // Pipeline is now c -> b -> a.

        let flushed = pool.transaction(|tx| flush_victim_chain(tx, b)).unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(pool.root().victim_first, Some(c));
        assert_eq!(pool.entry(c).unwrap().next, None);
        assert_eq!(pool.root().victim_count, 1);
        assert!(pool.entry(a).is_err());
        assert!(pool.entry(b).is_err());
    }

    #[test]
    fn test_remove_victim_from_middle() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a");
        let b = insert(&mut pool, "b");
        let c = insert(&mut pool, "c");
        pool.transaction(|tx| evict_batch(tx, &[a, b, c])).unwrap();

        pool.transaction(|tx| remove_victim(tx, b)).unwrap();
        assert_eq!(iterate(&pool).collect::<Vec<_>>(), vec![c, a]);
        assert_eq!(pool.entry(a).unwrap().prev, Some(c));
        assert_eq!(pool.root().victim_count, 2);
    }

    #[test]
    fn test_evicting_a_victim_again_aborts() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a");
        pool.transaction(|tx| evict_one(tx, a)).unwrap();

        let err = pool.transaction(|tx| evict_one(tx, a)).unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(pool.root().victim_count, 1);
        assert_eq!(pool.root().entry_count, 0);
    }
}
