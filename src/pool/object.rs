use crate::storage::layout::{EntryNode, LogNode};
use serde::{Deserialize, Serialize};

/// Typed contents of one pool slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmemObject {
    Entry(EntryNode),
    Log(LogNode),
    Bytes(Vec<u8>),
}

impl PmemObject {
    pub fn kind(&self) -> &'static str {
        match self {
            PmemObject::Entry(_) => "entry node",
            PmemObject::Log(_) => "log node",
            PmemObject::Bytes(_) => "byte payload",
        }
    }

    /// Approximate bytes this object occupies in the pool
    pub fn footprint(&self) -> usize {
        match self {
            PmemObject::Entry(_) => std::mem::size_of::<EntryNode>(),
            PmemObject::Log(_) => std::mem::size_of::<LogNode>(),
            PmemObject::Bytes(bytes) => bytes.len(),
        }
    }
}
