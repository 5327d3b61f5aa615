// ============================================================================
// Double-Buffered Command Log
// ============================================================================
//
// Two singly-linked chains of logged commands hang off the root. Appends go
// to the "current" chain; the "other" chain is the generation being drained.
// Switching generations is a single root field flip, so producers never wait
// for a drain to finish.
//
// ============================================================================

use super::chain;
use crate::core::{Handle, PmemError, Result};
use crate::pool::{PmemObject, PmemPool};
use crate::storage::layout::{BufferSlot, LogNode};
use crate::transaction::Transaction;
use log::debug;

pub fn current_head(pool: &PmemPool) -> Option<Handle> {
    let root = pool.root();
    root.buffer_head(root.active_buffer)
}

pub fn other_head(pool: &PmemPool) -> Option<Handle> {
    let root = pool.root();
    root.buffer_head(root.active_buffer.flipped())
}

pub fn set_current_head(tx: &mut Transaction<'_>, head: Option<Handle>) -> Result<()> {
    let root = tx.root_mut()?;
    let slot = root.active_buffer;
    root.set_buffer_head(slot, head);
    Ok(())
}

pub fn set_other_head(tx: &mut Transaction<'_>, head: Option<Handle>) -> Result<()> {
    let root = tx.root_mut()?;
    let slot = root.active_buffer.flipped();
    root.set_buffer_head(slot, head);
    Ok(())
}

/// Store `command` and link it at the head of the current buffer
pub fn append(tx: &mut Transaction<'_>, command: &[u8]) -> Result<Handle> {
    let payload = tx.alloc_bytes(command)?;
    let node = tx.alloc(PmemObject::Log(LogNode::new(payload)))?;

    let head = current_head(tx);
    tx.log_node_mut(node)?.next = head;
    if let Some(head) = head {
        tx.log_node_mut(head)?.prev = Some(node);
    }
    set_current_head(tx, Some(node))?;
    tx.root_mut()?.log_count += 1;
    Ok(node)
}

/// Swap the roles of the two buffers. Returns the slot that is now current.
pub fn switch(tx: &mut Transaction<'_>) -> Result<BufferSlot> {
    let root = tx.root_mut()?;
    root.active_buffer = root.active_buffer.flipped();
    debug!("Log buffer {} is now current", root.active_buffer);
    Ok(root.active_buffer)
}

/// Free every command from `head` to the end of its chain and null the
/// root slot that held `head`. Returns the number of commands freed.
///
/// `head` must be one of the two buffer heads; a null head clears nothing.
pub fn clear(tx: &mut Transaction<'_>, head: Option<Handle>) -> Result<u64> {
    let clearing_current = head == current_head(tx);
    if !clearing_current && head != other_head(tx) {
        return Err(match head {
            Some(handle) => PmemError::NotABufferHead(handle),
            None => PmemError::CorruptChain("null log head matches no buffer".to_string()),
        });
    }

    let budget = tx.root().log_count;
    let mut freed = 0u64;
    let mut cursor = head;
    while let Some(handle) = cursor {
        if freed >= budget {
            return Err(PmemError::CorruptChain(format!(
                "log chain is longer than the recorded {} commands",
                budget
            )));
        }
        let (command, next) = {
            let node = tx.log_node(handle)?;
            (node.command, node.next)
        };
        tx.free(command)?;
        tx.free(handle)?;
        freed += 1;
        cursor = next;
    }

    if clearing_current {
        set_current_head(tx, None)?;
    } else {
        set_other_head(tx, None)?;
    }
    let root = tx.root_mut()?;
    chain::decrement(&mut root.log_count, freed, "log_count")?;
    Ok(freed)
}

/// Lazy newest-first walk over one buffer, yielding log node handles.
///
/// Bounded by the recorded command count; an unreadable node ends it.
pub fn commands(pool: &PmemPool, head: Option<Handle>) -> LogIter<'_> {
    LogIter {
        pool,
        cursor: head,
        remaining: pool.root().log_count,
    }
}

/// Payloads of one buffer, oldest first, for replay.
///
/// Unlike [`commands`] this is strict: a chain that cannot be read in full
/// is reported as corrupt.
pub fn pending_commands(pool: &PmemPool, head: Option<Handle>) -> Result<Vec<Vec<u8>>> {
    let budget = pool.root().log_count;
    let mut payloads = Vec::new();
    let mut cursor = head;
    while let Some(handle) = cursor {
        if payloads.len() as u64 >= budget {
            return Err(PmemError::CorruptChain(format!(
                "log chain is longer than the recorded {} commands",
                budget
            )));
        }
        let node = pool
            .log_node(handle)
            .map_err(|err| PmemError::CorruptChain(format!("log node {}: {}", handle, err)))?;
        let payload = pool
            .bytes(node.command)
            .map_err(|err| PmemError::CorruptChain(format!("log payload {}: {}", handle, err)))?;
        payloads.push(payload.to_vec());
        cursor = node.next;
    }
    payloads.reverse();
    Ok(payloads)
}

pub struct LogIter<'p> {
    pool: &'p PmemPool,
    cursor: Option<Handle>,
    remaining: u64,
}

impl<'p> LogIter<'p> {
    /// Map each node to its command payload
    pub fn payloads(self) -> impl Iterator<Item = &'p [u8]> {
        let pool = self.pool;
        self.filter_map(move |handle| {
            let node = pool.log_node(handle).ok()?;
            pool.bytes(node.command).ok()
        })
    }
}

impl Iterator for LogIter<'_> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.cursor?;
        let Ok(node) = self.pool.log_node(current) else {
            self.cursor = None;
            return None;
        };
        self.cursor = node.next;
        self.remaining -= 1;
        Some(current)
    }
}
