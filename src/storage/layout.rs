// ============================================================================
// Persistent Layouts
// ============================================================================
//
// Everything the tier keeps in persistent memory. The Root is the only
// durable entry point; every other object is reachable by following the
// handles stored here.
//
// ============================================================================

use crate::core::Handle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two log chains receives appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSlot {
    #[default]
    A,
    B,
}

impl BufferSlot {
    pub fn flipped(self) -> Self {
        match self {
            BufferSlot::A => BufferSlot::B,
            BufferSlot::B => BufferSlot::A,
        }
    }
}

impl fmt::Display for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferSlot::A => write!(f, "A"),
            BufferSlot::B => write!(f, "B"),
        }
    }
}

/// Pool-wide root object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub entry_first: Option<Handle>,
    pub entry_last: Option<Handle>,
    pub victim_first: Option<Handle>,
    pub log_buffer_a: Option<Handle>,
    pub log_buffer_b: Option<Handle>,
    pub active_buffer: BufferSlot,
    pub entry_count: u64,
    pub victim_count: u64,
    pub log_count: u64,
}

impl Root {
    pub fn buffer_head(&self, slot: BufferSlot) -> Option<Handle> {
        match slot {
            BufferSlot::A => self.log_buffer_a,
            BufferSlot::B => self.log_buffer_b,
        }
    }

    pub fn set_buffer_head(&mut self, slot: BufferSlot, head: Option<Handle>) {
        match slot {
            BufferSlot::A => self.log_buffer_a = head,
            BufferSlot::B => self.log_buffer_b = head,
        }
    }
}

/// The chain a key/value node is currently linked into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainKind {
    #[default]
    Entries,
    Victims,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Entries => write!(f, "entry store"),
            ChainKind::Victims => write!(f, "victim pipeline"),
        }
    }
}

/// One key/value pair resident in persistent memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryNode {
    pub key: Handle,
    pub value: Handle,
    pub next: Option<Handle>,
    pub prev: Option<Handle>,
    pub chain: ChainKind,
}

impl EntryNode {
    pub fn new(key: Handle, value: Handle) -> Self {
        Self {
            key,
            value,
            next: None,
            prev: None,
            chain: ChainKind::Entries,
        }
    }
}

/// One buffered command awaiting replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogNode {
    pub command: Handle,
    pub next: Option<Handle>,
    /// Only kept current for the chain head.
    pub prev: Option<Handle>,
}

impl LogNode {
    pub fn new(command: Handle) -> Self {
        Self {
            command,
            next: None,
            prev: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_slot_flip_is_involutive() {
        assert_eq!(BufferSlot::A.flipped(), BufferSlot::B);
        assert_eq!(BufferSlot::A.flipped().flipped(), BufferSlot::A);
    }

    #[test]
    fn test_root_buffer_heads() {
        let mut root = Root::default();
        let head = Handle::new(1, 5);
        root.set_buffer_head(BufferSlot::B, Some(head));
        assert_eq!(root.buffer_head(BufferSlot::B), Some(head));
        assert_eq!(root.buffer_head(BufferSlot::A), None);
    }
}
