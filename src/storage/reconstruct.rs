// ============================================================================
// Startup Reconstruction
// ============================================================================
//
// Runs once, single-threaded, before any command is served. Rebuilds the
// in-memory index from the persistent structures and drains whatever the
// previous process left pending. A chain that does not match its root
// counters is fatal: the substrate itself is corrupt.
//
// ============================================================================

use super::chain::walk_validated;
use super::{log_buffer as log, victims};
use crate::core::{PmemError, Result};
use crate::index::KeyIndex;
use crate::pool::PmemPool;
use crate::storage::layout::ChainKind;
use tracing::{Level, event, info_span};

/// Destination for work drained during reconstruction
pub trait LogReplayer {
    /// Apply one logged command. Commands arrive oldest first, the older
    /// buffer generation before the newer one.
    fn replay(&mut self, command: &[u8], index: &mut dyn KeyIndex) -> Result<()>;

    /// Durably record a victim entry that is about to be reclaimed
    fn persist_victim(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Make everything handed over so far durable
    fn sync(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructReport {
    pub entries: usize,
    pub victims: usize,
    pub replayed_commands: usize,
}

fn corrupt(err: PmemError) -> PmemError {
    match err {
        PmemError::CorruptChain(_) => err,
        other => PmemError::CorruptChain(other.to_string()),
    }
}

/// Insert every entry-store node into `index` with its back-reference.
///
/// Returns the number of entries inserted.
pub fn reconstruct_entries(pool: &PmemPool, index: &mut dyn KeyIndex) -> Result<usize> {
    let span = info_span!("reconstruct_entries", entry_count = pool.root().entry_count);
    let _enter = span.enter();

    let nodes = walk_validated(pool, ChainKind::Entries)?;
    index.reserve(nodes.len());
    for &node in &nodes {
        let (key, value) = super::entries::read_pair(pool, node).map_err(corrupt)?;
        index.insert(key.to_vec(), value.to_vec(), Some(node));
    }
    event!(Level::INFO, entries = nodes.len(), "entry store reconstructed");
    Ok(nodes.len())
}

/// Replay both log buffers into `replayer`, then clear them.
///
/// The replayer is synced before the buffers are cleared, so a crash in
/// between only causes the same suffix to be replayed again.
pub fn reconstruct_log(
    pool: &mut PmemPool,
    index: &mut dyn KeyIndex,
    replayer: &mut dyn LogReplayer,
) -> Result<usize> {
    let span = info_span!("reconstruct_log", log_count = pool.root().log_count);
    let _enter = span.enter();

    let older = log::pending_commands(pool, log::other_head(pool))?;
    let newer = log::pending_commands(pool, log::current_head(pool))?;
    let replayed = older.len() + newer.len();
    for command in older.iter().chain(newer.iter()) {
        replayer.replay(command, index)?;
    }
    replayer.sync()?;

    pool.transaction(|tx| {
        let current = log::current_head(tx);
        log::clear(tx, current)?;
        let other = log::other_head(tx);
        log::clear(tx, other)?;
        Ok(())
    })?;
    event!(Level::INFO, replayed, "log buffers drained");
    Ok(replayed)
}

/// Full startup procedure: victims, pending log, then the entry store.
///
/// Victims are indexed, handed to the replayer for durable storage and
/// reclaimed. The pending log is drained after them. Finally the entry
/// store is indexed with back-references. Afterwards the log and
/// the victim pipeline are both empty.
pub fn reconstruct_with_victims(
    pool: &mut PmemPool,
    index: &mut dyn KeyIndex,
    replayer: &mut dyn LogReplayer,
) -> Result<ReconstructReport> {
    let span = info_span!(
        "reconstruct",
        pool_id = pool.pool_id(),
        entry_count = pool.root().entry_count,
        victim_count = pool.root().victim_count,
        log_count = pool.root().log_count
    );
    let _enter = span.enter();

    let root = pool.root();
    index.reserve((root.entry_count + root.victim_count) as usize);

    let pending = walk_validated(pool, ChainKind::Victims)?;
    let mut victim_pairs = Vec::with_capacity(pending.len());
    // Oldest eviction first, so a later eviction of the same key wins.
    for &node in pending.iter().rev() {
        let (key, value) = super::entries::read_pair(pool, node).map_err(corrupt)?;
        index.insert(key.to_vec(), value.to_vec(), None);
        victim_pairs.push((key.to_vec(), value.to_vec()));
    }

    // Victims reach the replayer before the log, so logged commands on a
    // victim key stay newer on every later start too.
    if let Some(head) = pool.root().victim_first {
        for (key, value) in &victim_pairs {
            replayer.persist_victim(key, value)?;
        }
        replayer.sync()?;
        pool.transaction(|tx| victims::flush_victim_chain(tx, head))?;
        event!(Level::INFO, victims = victim_pairs.len(), "victim pipeline flushed");
    }

    let replayed_commands = reconstruct_log(pool, index, replayer)?;

    let entries = reconstruct_entries(pool, index)?;
    Ok(ReconstructReport {
        entries,
        victims: victim_pairs.len(),
        replayed_commands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Handle;
    use crate::index::MemoryIndex;
    use crate::pool::PoolOptions;
    use crate::storage::entries;

    #[derive(Default)]
    struct Recorder {
        replayed: Vec<Vec<u8>>,
        persisted: Vec<(Vec<u8>, Vec<u8>)>,
        syncs: usize,
    }

    impl LogReplayer for Recorder {
        fn replay(&mut self, command: &[u8], _index: &mut dyn KeyIndex) -> Result<()> {
            self.replayed.push(command.to_vec());
            Ok(())
        }

        fn persist_victim(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
            self.persisted.push((key.to_vec(), value.to_vec()));
            Ok(())
        }

        fn sync(&mut self) -> Result<()> {
            self.syncs += 1;
            Ok(())
        }
    }

    fn insert(pool: &mut PmemPool, key: &str, value: &str) -> Handle {
        pool.transaction(|tx| {
            let key = tx.alloc_bytes(key.as_bytes())?;
            let value = tx.alloc_bytes(value.as_bytes())?;
            entries::insert_front(tx, key, value)
        })
        .unwrap()
    }

    #[test]
    fn test_reconstruct_entries_sets_back_references() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a", "1");
        let b = insert(&mut pool, "b", "2");

        let mut index = MemoryIndex::new();
        assert_eq!(reconstruct_entries(&pool, &mut index).unwrap(), 2);
        assert_eq!(index.get(b"a").unwrap().node, Some(a));
        assert_eq!(index.get(b"b").unwrap().value, b"2");
        assert_eq!(index.get(b"b").unwrap().node, Some(b));
    }

    #[test]
    fn test_cycle_is_corrupt() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a", "1");
        let b = insert(&mut pool, "b", "2");
        // Point the tail back at the head.
        let mut tx = pool.begin();
        tx.entry_mut(a).unwrap().next = Some(b);
        tx.commit().unwrap();

        let mut index = MemoryIndex::new();
        let err = reconstruct_entries(&pool, &mut index).unwrap_err();
        assert!(matches!(err, PmemError::CorruptChain(_)));
    }

    #[test]
    fn test_counter_mismatch_is_corrupt() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        insert(&mut pool, "a", "1");
        let mut tx = pool.begin();
        tx.root_mut().unwrap().entry_count = 3;
        tx.commit().unwrap();

        let mut index = MemoryIndex::new();
        assert!(matches!(
            reconstruct_entries(&pool, &mut index),
            Err(PmemError::CorruptChain(_))
        ));
    }

    #[test]
    fn test_reconstruct_log_replays_older_generation_first() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        pool.transaction(|tx| log::append(tx, b"one")).unwrap();
        pool.transaction(|tx| log::append(tx, b"two")).unwrap();
        pool.transaction(log::switch).unwrap();
        pool.transaction(|tx| log::append(tx, b"three")).unwrap();

        let mut index = MemoryIndex::new();
        let mut recorder = Recorder::default();
        let replayed = reconstruct_log(&mut pool, &mut index, &mut recorder).unwrap();

        assert_eq!(replayed, 3);
        assert_eq!(
            recorder.replayed,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        assert_eq!(pool.root().log_count, 0);
        assert_eq!(log::current_head(&pool), None);
        assert_eq!(log::other_head(&pool), None);
    }

    #[test]
    fn test_reconstruct_with_victims_drains_everything() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let a = insert(&mut pool, "a", "1");
        insert(&mut pool, "b", "2");
        pool.transaction(|tx| victims::evict_one(tx, a)).unwrap();
        pool.transaction(|tx| log::append(tx, b"cmd")).unwrap();

        let mut index = MemoryIndex::new();
        let mut recorder = Recorder::default();
        let report = reconstruct_with_victims(&mut pool, &mut index, &mut recorder).unwrap();

        assert_eq!(
            report,
            ReconstructReport {
                entries: 1,
                victims: 1,
                replayed_commands: 1
            }
        );
        assert_eq!(recorder.persisted, vec![(b"a".to_vec(), b"1".to_vec())]);
        assert_eq!(recorder.syncs, 2);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(b"a").unwrap().node, None);
        assert_eq!(pool.root().victim_count, 0);
        assert_eq!(pool.root().victim_first, None);
        assert_eq!(pool.root().log_count, 0);
    }
}
