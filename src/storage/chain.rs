//! Splicing primitives shared by the entry store and the victim pipeline.
//!
//! Both chains are made of [`EntryNode`]s linked through handle-valued
//! `prev`/`next` fields; only the root slots differ. The entry store has a
//! head and a tail slot, the victim pipeline only a head.

use crate::core::{Handle, PmemError, Result};
use crate::pool::PmemPool;
use crate::storage::layout::{ChainKind, Root};
use crate::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Head to tail
    #[default]
    Forward,
    /// Tail to head
    Backward,
}

pub(crate) fn first(root: &Root, chain: ChainKind) -> Option<Handle> {
    match chain {
        ChainKind::Entries => root.entry_first,
        ChainKind::Victims => root.victim_first,
    }
}

fn set_first(root: &mut Root, chain: ChainKind, head: Option<Handle>) {
    match chain {
        ChainKind::Entries => root.entry_first = head,
        ChainKind::Victims => root.victim_first = head,
    }
}

pub(crate) fn recorded_len(root: &Root, chain: ChainKind) -> u64 {
    match chain {
        ChainKind::Entries => root.entry_count,
        ChainKind::Victims => root.victim_count,
    }
}

/// Subtract from a root counter, refusing to wrap below zero
pub(crate) fn decrement(counter: &mut u64, by: u64, what: &str) -> Result<()> {
    let current = *counter;
    *counter = current.checked_sub(by).ok_or_else(|| {
        PmemError::CorruptChain(format!(
            "{} would drop below zero ({} - {})",
            what, current, by
        ))
    })?;
    Ok(())
}

/// Link `node` as the new head of `chain`. Counters are left alone.
pub(crate) fn link_front(tx: &mut Transaction<'_>, chain: ChainKind, node: Handle) -> Result<()> {
    let old_first = first(tx.root(), chain);
    {
        let entry = tx.entry_mut(node)?;
        entry.next = old_first;
        entry.prev = None;
        entry.chain = chain;
    }
    match old_first {
        Some(old) => tx.entry_mut(old)?.prev = Some(node),
        None if chain == ChainKind::Entries => tx.root_mut()?.entry_last = Some(node),
        None => {}
    }
    set_first(tx.root_mut()?, chain, Some(node));
    Ok(())
}

/// Detach `node` from `chain` by joining its neighbours.
///
/// Handles the sole, head, tail and interior cases. The node keeps its
/// key and value handles; counters are left alone.
pub(crate) fn splice_out(tx: &mut Transaction<'_>, chain: ChainKind, node: Handle) -> Result<()> {
    let (prev, next, member_of) = {
        let entry = tx.entry(node)?;
        (entry.prev, entry.next, entry.chain)
    };
    if member_of != chain {
        return Err(PmemError::CorruptChain(format!(
            "node {} belongs to the {}, not the {}",
            node, member_of, chain
        )));
    }

    match prev {
        Some(prev) => tx.entry_mut(prev)?.next = next,
        None => {
            if first(tx.root(), chain) != Some(node) {
                return Err(PmemError::CorruptChain(format!(
                    "node {} has no predecessor but is not the head of the {}",
                    node, chain
                )));
            }
            set_first(tx.root_mut()?, chain, next);
        }
    }

    match next {
        Some(next) => tx.entry_mut(next)?.prev = prev,
        None if chain == ChainKind::Entries => {
            if tx.root().entry_last != Some(node) {
                return Err(PmemError::CorruptChain(format!(
                    "node {} has no successor but is not the tail of the {}",
                    node, chain
                )));
            }
            tx.root_mut()?.entry_last = prev;
        }
        None => {}
    }

    let entry = tx.entry_mut(node)?;
    entry.next = None;
    entry.prev = None;
    Ok(())
}

/// Lazy walk over a chain.
///
/// Never fails: an unreadable node ends the walk, and the walk never yields
/// more nodes than the chain's recorded count, so a cycle cannot spin it
/// forever.
#[derive(Clone)]
pub struct ChainIter<'p> {
    pool: &'p PmemPool,
    cursor: Option<Handle>,
    direction: Direction,
    remaining: u64,
}

impl<'p> ChainIter<'p> {
    pub(crate) fn new(pool: &'p PmemPool, chain: ChainKind, direction: Direction) -> Self {
        let root = pool.root();
        let cursor = match direction {
            Direction::Forward => first(root, chain),
            // The victim pipeline keeps no tail slot.
            Direction::Backward if chain == ChainKind::Entries => root.entry_last,
            Direction::Backward => None,
        };
        Self {
            pool,
            cursor,
            direction,
            remaining: recorded_len(root, chain),
        }
    }
}

impl Iterator for ChainIter<'_> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.cursor?;
        let Ok(node) = self.pool.entry(current) else {
            self.cursor = None;
            return None;
        };
        self.cursor = match self.direction {
            Direction::Forward => node.next,
            Direction::Backward => node.prev,
        };
        self.remaining -= 1;
        Some(current)
    }
}

/// Walk a whole chain checking every link against the root.
///
/// Fails with `CorruptChain` on a dangling handle, a broken back-link, a
/// node tagged with the wrong chain, a walk longer than the recorded count
/// (which is how a cycle shows up), a count mismatch, or a walk that does
/// not end at the recorded tail.
pub fn walk_validated(pool: &PmemPool, chain: ChainKind) -> Result<Vec<Handle>> {
    let root = pool.root();
    let expected = recorded_len(root, chain);
    let mut nodes = Vec::with_capacity(expected as usize);
    let mut prev = None;
    let mut cursor = first(root, chain);

    while let Some(handle) = cursor {
        if nodes.len() as u64 >= expected {
            return Err(PmemError::CorruptChain(format!(
                "{} holds more than its recorded {} nodes",
                chain, expected
            )));
        }
        let node = pool.entry(handle).map_err(|err| {
            PmemError::CorruptChain(format!("{} node {} unreadable: {}", chain, handle, err))
        })?;
        if node.prev != prev {
            return Err(PmemError::CorruptChain(format!(
                "{} node {} back-link does not match its predecessor",
                chain, handle
            )));
        }
        if node.chain != chain {
            return Err(PmemError::CorruptChain(format!(
                "node {} reached from the {} is tagged {}",
                handle, chain, node.chain
            )));
        }
        nodes.push(handle);
        prev = Some(handle);
        cursor = node.next;
    }

    if nodes.len() as u64 != expected {
        return Err(PmemError::CorruptChain(format!(
            "{} has {} reachable nodes but records {}",
            chain,
            nodes.len(),
            expected
        )));
    }
    if chain == ChainKind::Entries && root.entry_last != prev {
        return Err(PmemError::CorruptChain(format!(
            "{} walk did not end at the recorded tail",
            chain
        )));
    }
    Ok(nodes)
}
