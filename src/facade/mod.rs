pub mod dispatcher;
pub mod tier;

pub use dispatcher::{LogFlusher, TierHandle};
pub use tier::{BufferSelector, LogDrain, PmemTier, TierStatus};
