//! Victim selection policies.
//!
//! The policy is picked once from configuration; callers only talk to the
//! [`VictimSelector`] capability.

use super::chain::Direction;
use super::entries;
use crate::core::{Handle, PmemError, Result};
use crate::pool::PmemPool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

pub trait VictimSelector {
    /// Next node to evict, or `None` when the store is empty
    fn select_victim(&mut self, pool: &PmemPool) -> Result<Option<Handle>>;

    /// Up to `k` nodes to evict in one batch, in eviction order
    fn select_victims(&mut self, pool: &PmemPool, k: usize) -> Result<Vec<Handle>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Lru,
    Random,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" | "allkeys-lru" => Ok(PolicyKind::Lru),
            "random" | "allkeys-random" => Ok(PolicyKind::Random),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Lru => write!(f, "lru"),
            PolicyKind::Random => write!(f, "random"),
        }
    }
}

/// Evicts the least recently used node: always the store's tail
#[derive(Debug, Default)]
pub struct LruSelector;

impl VictimSelector for LruSelector {
    fn select_victim(&mut self, pool: &PmemPool) -> Result<Option<Handle>> {
        Ok(pool.root().entry_last)
    }

    fn select_victims(&mut self, pool: &PmemPool, k: usize) -> Result<Vec<Handle>> {
        Ok(entries::iterate(pool, Direction::Backward).take(k).collect())
    }
}

/// Evicts a uniformly random node
#[derive(Debug)]
pub struct RandomSelector {
    rng: StdRng,
}

impl RandomSelector {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl VictimSelector for RandomSelector {
    fn select_victim(&mut self, pool: &PmemPool) -> Result<Option<Handle>> {
        let count = pool.root().entry_count;
        if count == 0 {
            return Ok(None);
        }
        let target = self.rng.gen_range(0..count);
        let mut cursor = pool.root().entry_first;
        for _ in 0..target {
            let current = cursor.ok_or_else(|| {
                PmemError::CorruptChain(format!(
                    "entry store ends before index {} of {}",
                    target, count
                ))
            })?;
            cursor = pool.entry(current)?.next;
        }
        match cursor {
            Some(victim) => Ok(Some(victim)),
            None => Err(PmemError::CorruptChain(format!(
                "entry store ends before index {} of {}",
                target, count
            ))),
        }
    }

    fn select_victims(&mut self, _pool: &PmemPool, k: usize) -> Result<Vec<Handle>> {
        Err(PmemError::PolicyUnsupported(format!(
            "random policy cannot select a batch of {} victims; evict one at a time",
            k
        )))
    }
}

/// The configured policy
#[derive(Debug)]
pub enum EvictionPolicy {
    Lru(LruSelector),
    Random(RandomSelector),
}

impl EvictionPolicy {
    pub fn new(kind: PolicyKind, seed: Option<u64>) -> Self {
        match kind {
            PolicyKind::Lru => EvictionPolicy::Lru(LruSelector),
            PolicyKind::Random => EvictionPolicy::Random(RandomSelector::new(seed)),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            EvictionPolicy::Lru(_) => PolicyKind::Lru,
            EvictionPolicy::Random(_) => PolicyKind::Random,
        }
    }

    /// Whether reads and writes should move a node to the head of the store
    pub fn tracks_recency(&self) -> bool {
        matches!(self, EvictionPolicy::Lru(_))
    }

    pub fn supports_batches(&self) -> bool {
        matches!(self, EvictionPolicy::Lru(_))
    }
}

impl VictimSelector for EvictionPolicy {
    fn select_victim(&mut self, pool: &PmemPool) -> Result<Option<Handle>> {
        match self {
            EvictionPolicy::Lru(selector) => selector.select_victim(pool),
            EvictionPolicy::Random(selector) => selector.select_victim(pool),
        }
    }

    fn select_victims(&mut self, pool: &PmemPool, k: usize) -> Result<Vec<Handle>> {
        match self {
            EvictionPolicy::Lru(selector) => selector.select_victims(pool, k),
            EvictionPolicy::Random(selector) => selector.select_victims(pool, k),
        }
    }
}
