use crate::pool::{LatencyModel, PoolOptions};
use crate::storage::{DurabilityMode, PolicyKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent-tier configuration
///
/// Built with chained setters, checked with [`TierConfig::validate`].
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Pool image file (None keeps the pool in volatile memory)
    pub pool_path: Option<PathBuf>,

    /// Append-only file for the disk tier (None disables it)
    pub aof_path: Option<PathBuf>,

    /// When pool commits and AOF appends reach stable storage
    pub durability: DurabilityMode,

    /// How eviction victims are chosen
    pub eviction_policy: PolicyKind,

    /// Entry-store size that triggers automatic eviction
    pub max_entries: Option<usize>,

    /// Victims moved per automatic eviction round
    pub evict_batch_size: usize,

    /// Victim count that triggers an automatic flush to the AOF
    pub victim_flush_threshold: usize,

    /// Period of the dispatcher's log flush task
    pub log_flush_interval: Duration,

    /// Emulated media latency per handle resolution
    pub read_latency: Duration,

    /// Emulated media latency per allocation, free or undo record
    pub write_latency: Duration,

    /// Seed for the random eviction policy
    pub random_seed: Option<u64>,
}

impl TierConfig {
    /// Volatile configuration: nothing touches disk
    pub fn new() -> Self {
        Self {
            pool_path: None,
            aof_path: None,
            durability: DurabilityMode::Sync,
            eviction_policy: PolicyKind::Lru,
            max_entries: None,
            evict_batch_size: 16,
            victim_flush_threshold: 64,
            log_flush_interval: Duration::from_secs(1),
            read_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
            random_seed: None,
        }
    }

    /// Keep the pool image and the AOF side by side in `data_dir`
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref();
        Self::new()
            .pool_path(data_dir.join("rustpmemkv.pool"))
            .aof_path(data_dir.join("rustpmemkv.aof"))
    }

    pub fn pool_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pool_path = Some(path.into());
        self
    }

    pub fn aof_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.aof_path = Some(path.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn eviction_policy(mut self, policy: PolicyKind) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn evict_batch_size(mut self, size: usize) -> Self {
        self.evict_batch_size = size;
        self
    }

    pub fn victim_flush_threshold(mut self, threshold: usize) -> Self {
        self.victim_flush_threshold = threshold;
        self
    }

    pub fn log_flush_interval(mut self, interval: Duration) -> Self {
        self.log_flush_interval = interval;
        self
    }

    pub fn latency(mut self, read: Duration, write: Duration) -> Self {
        self.read_latency = read;
        self.write_latency = write;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            durability: self.durability,
            latency: LatencyModel::new(self.read_latency, self.write_latency),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.evict_batch_size == 0 {
            return Err("evict_batch_size must be > 0".to_string());
        }

        if self.victim_flush_threshold == 0 {
            return Err("victim_flush_threshold must be > 0".to_string());
        }

        if self.max_entries == Some(0) {
            return Err("max_entries must be > 0 when set".to_string());
        }

        if self.log_flush_interval.is_zero() {
            return Err("log_flush_interval must be > 0".to_string());
        }

        if self.durability != DurabilityMode::None
            && self.pool_path.is_some()
            && self.pool_path == self.aof_path
        {
            return Err("pool_path and aof_path must differ".to_string());
        }

        Ok(())
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TierConfig::default();
        assert!(config.pool_path.is_none());
        assert_eq!(config.eviction_policy, PolicyKind::Lru);
        assert_eq!(config.durability, DurabilityMode::Sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TierConfig::in_dir("/var/lib/tier")
            .eviction_policy(PolicyKind::Random)
            .max_entries(100)
            .evict_batch_size(4)
            .random_seed(9);

        assert_eq!(config.pool_path, Some(PathBuf::from("/var/lib/tier/rustpmemkv.pool")));
        assert_eq!(config.aof_path, Some(PathBuf::from("/var/lib/tier/rustpmemkv.aof")));
        assert_eq!(config.max_entries, Some(100));
        assert_eq!(config.evict_batch_size, 4);
        assert_eq!(config.random_seed, Some(9));
    }

    #[test]
    fn test_pool_options_carry_latency() {
        let config = TierConfig::new().latency(Duration::from_nanos(300), Duration::from_nanos(900));
        let options = config.pool_options();
        assert_eq!(options.latency.read, Duration::from_nanos(300));
        assert_eq!(options.latency.write, Duration::from_nanos(900));
    }

    #[test]
    fn test_validate() {
        assert!(TierConfig::new().evict_batch_size(0).validate().is_err());
        assert!(TierConfig::new().victim_flush_threshold(0).validate().is_err());
        assert!(TierConfig::new().max_entries(0).validate().is_err());
        assert!(
            TierConfig::new()
                .pool_path("same")
                .aof_path("same")
                .validate()
                .is_err()
        );
    }
}
