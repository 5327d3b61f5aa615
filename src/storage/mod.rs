pub mod aof;
pub mod chain;
pub mod entries;
pub mod layout;
pub mod log_buffer;
pub mod policy;
pub mod reconstruct;
pub mod victims;

pub use aof::{AppendOnlyFile, DurabilityMode, LoggedCommand};
pub use chain::{ChainIter, Direction, walk_validated};
pub use layout::{BufferSlot, ChainKind, EntryNode, LogNode, Root};
pub use policy::{EvictionPolicy, PolicyKind, VictimSelector};
pub use reconstruct::{LogReplayer, ReconstructReport};
