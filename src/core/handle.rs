use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable reference to an object living in a persistent pool.
///
/// A handle pairs the owning pool's identifier with the object's offset
/// inside that pool. It carries no address: turning it into a usable
/// reference always goes through [`PmemPool::resolve`](crate::pool::PmemPool::resolve),
/// which also rejects handles minted by a different pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pool_id: u64,
    offset: u64,
}

impl Handle {
    pub(crate) fn new(pool_id: u64, offset: u64) -> Self {
        Self { pool_id, offset }
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{}", self.pool_id, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        let handle = Handle::new(0xab, 7);
        assert_eq!(handle.to_string(), "00000000000000ab:7");
    }

    #[test]
    fn test_handle_serde() {
        let handle = Handle::new(42, 3);
        let bytes = rmp_serde::to_vec(&handle).unwrap();
        let decoded: Handle = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, handle);
    }
}
