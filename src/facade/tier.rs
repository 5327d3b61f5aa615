use crate::config::TierConfig;
use crate::core::{Handle, PmemError, Result};
use crate::index::{KeyIndex, MemoryIndex};
use crate::pool::{PmemPool, PoolStats};
use crate::storage::layout::{BufferSlot, ChainKind};
use crate::storage::reconstruct::{self, LogReplayer, ReconstructReport};
use crate::storage::{
    AppendOnlyFile, Direction, EvictionPolicy, LoggedCommand, PolicyKind, VictimSelector,
    entries, log_buffer, victims,
};
use crate::transaction::Transaction;
use log::{debug, info, warn};
use serde::Serialize;

/// Which log buffer to inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSelector {
    Current,
    Other,
}

/// Point-in-time summary of the tier
#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    pub indexed_keys: usize,
    pub entry_count: u64,
    pub victim_count: u64,
    pub log_count: u64,
    pub current_buffer: String,
    pub eviction_policy: String,
    pub aof_records_since_rewrite: usize,
    pub pool: PoolStats,
}

/// A buffer generation taken out of service, waiting to reach the AOF
#[derive(Debug)]
pub struct LogDrain {
    head: Option<Handle>,
    commands: Vec<Vec<u8>>,
}

impl LogDrain {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Replays drained log commands into the index and the AOF
struct AofReplayer<'a> {
    aof: &'a mut AppendOnlyFile,
}

impl LogReplayer for AofReplayer<'_> {
    fn replay(&mut self, command: &[u8], index: &mut dyn KeyIndex) -> Result<()> {
        let decoded = LoggedCommand::decode(command)?;
        apply(index, decoded);
        self.aof.append_encoded(command)
    }

    fn persist_victim(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.aof.append(&LoggedCommand::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn sync(&mut self) -> Result<()> {
        self.aof.sync()
    }
}

/// Apply a logged command to keys that live only in the index
fn apply(index: &mut dyn KeyIndex, command: LoggedCommand) {
    match command {
        LoggedCommand::Set { key, value } => index.insert(key, value, None),
        LoggedCommand::Del { key } => {
            index.remove(&key);
        }
    }
}

fn insert_new(tx: &mut Transaction<'_>, key: &[u8], value: &[u8]) -> Result<Handle> {
    let key = tx.alloc_bytes(key)?;
    let value = tx.alloc_bytes(value)?;
    entries::insert_front(tx, key, value)
}

/// The persistent-memory tier of the key-value server.
///
/// Owns the pool, the in-memory index, the AOF and the eviction policy.
/// Every write is logged to the current log buffer and applied to the
/// entry store in the same pool transaction, so the two never disagree
/// after a crash. Single writer; share it through
/// [`TierHandle`](super::TierHandle).
pub struct PmemTier {
    config: TierConfig,
    pool: PmemPool,
    index: MemoryIndex,
    aof: AppendOnlyFile,
    policy: EvictionPolicy,
    report: ReconstructReport,
}

impl PmemTier {
    /// Open (or create) the tier and run startup reconstruction.
    ///
    /// The AOF is loaded into the index first. Then pending victims are
    /// persisted, the leftover log generations are replayed and the entry
    /// store is indexed with back-references.
    pub fn open(config: TierConfig) -> Result<Self> {
        config.validate().map_err(PmemError::Config)?;

        let options = config.pool_options();
        let mut pool = match &config.pool_path {
            Some(path) => PmemPool::open(path, options)?,
            None => PmemPool::in_memory(options),
        };
        let mut aof = match &config.aof_path {
            Some(path) => AppendOnlyFile::open(path, config.durability)?,
            None => AppendOnlyFile::disabled(),
        };

        let mut index = MemoryIndex::new();
        let loaded = aof.read_all()?;
        let aof_records = loaded.len();
        for command in loaded {
            apply(&mut index, command);
        }
        debug!("Loaded {} AOF records into the index", aof_records);

        let report = {
            let mut replayer = AofReplayer { aof: &mut aof };
            reconstruct::reconstruct_with_victims(&mut pool, &mut index, &mut replayer)?
        };
        let policy = EvictionPolicy::new(config.eviction_policy, config.random_seed);

        info!(
            "Persistent tier ready: {} keys ({} in pmem), {} victims flushed, {} commands replayed",
            index.len(),
            report.entries,
            report.victims,
            report.replayed_commands
        );

        Ok(Self {
            config,
            pool,
            index,
            aof,
            policy,
            report,
        })
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn pool(&self) -> &PmemPool {
        &self.pool
    }

    /// Mutable pool access, for maintenance and fault injection
    pub fn pool_mut(&mut self) -> &mut PmemPool {
        &mut self.pool
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    /// What startup reconstruction found
    pub fn reconstruct_report(&self) -> ReconstructReport {
        self.report
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Store `value` under `key`.
    ///
    /// An existing entry-store node is updated in place (and promoted under
    /// LRU). A node still waiting in the victim pipeline is dropped and the
    /// key re-enters the entry store at the head. An error means nothing was
    /// written; a failed automatic eviction afterwards is only logged.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let command = LoggedCommand::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        }
        .encode()?;
        let resident = self.resident_node(key)?;
        let promote = self.policy.tracks_recency();

        let node = self.pool.transaction(|tx| {
            log_buffer::append(tx, &command)?;
            match resident {
                Some((node, ChainKind::Entries)) => {
                    let new_value = tx.alloc_bytes(value)?;
                    let old_value = entries::update_value(tx, node, new_value)?;
                    tx.free(old_value)?;
                    if promote {
                        entries::promote(tx, node)?;
                    }
                    Ok(node)
                }
                Some((node, ChainKind::Victims)) => {
                    victims::remove_victim(tx, node)?;
                    insert_new(tx, key, value)
                }
                None => insert_new(tx, key, value),
            }
        })?;

        self.index.insert(key.to_vec(), value.to_vec(), Some(node));
        // The write is committed; eviction catches up on a later write.
        if let Err(err) = self.maybe_evict() {
            warn!("Automatic eviction after a committed write failed: {}", err);
        }
        Ok(())
    }

    /// Look up `key`, promoting its node under LRU
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.index.get(key) else {
            return Ok(None);
        };
        let value = entry.value.clone();

        if self.policy.tracks_recency() {
            if let Some((node, ChainKind::Entries)) = self.resident_node(key)? {
                if self.pool.root().entry_first != Some(node) {
                    self.pool.transaction(|tx| entries::promote(tx, node))?;
                }
            }
        }
        Ok(Some(value))
    }

    /// Remove `key` from both tiers. Returns false if it was not present.
    pub fn del(&mut self, key: &[u8]) -> Result<bool> {
        if self.index.get(key).is_none() {
            return Ok(false);
        }
        let command = LoggedCommand::Del { key: key.to_vec() }.encode()?;
        let resident = self.resident_node(key)?;

        self.pool.transaction(|tx| {
            log_buffer::append(tx, &command)?;
            match resident {
                Some((node, ChainKind::Entries)) => entries::unlink_and_free(tx, node),
                Some((node, ChainKind::Victims)) => victims::remove_victim(tx, node),
                None => Ok(()),
            }
        })?;

        self.index.remove(key);
        Ok(true)
    }

    fn resident_node(&self, key: &[u8]) -> Result<Option<(Handle, ChainKind)>> {
        match self.index.get(key).and_then(|entry| entry.node) {
            Some(node) => Ok(Some((node, self.pool.entry(node)?.chain))),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Log Buffers
    // ========================================================================

    /// Log a command without applying it.
    ///
    /// It takes effect once its generation is drained into the AOF and the
    /// AOF is loaded again at startup.
    pub fn append_command(&mut self, command: &LoggedCommand) -> Result<Handle> {
        let encoded = command.encode()?;
        self.pool
            .transaction(|tx| log_buffer::append(tx, &encoded))
    }

    /// Swap current and other. Returns the slot that is now current.
    pub fn switch_buffers(&mut self) -> Result<BufferSlot> {
        self.pool.transaction(log_buffer::switch)
    }

    /// Free every command in the current buffer
    pub fn clear_current_buffer(&mut self) -> Result<u64> {
        self.pool.transaction(|tx| {
            let head = log_buffer::current_head(tx);
            log_buffer::clear(tx, head)
        })
    }

    /// Commands in one buffer, newest first
    pub fn buffer_commands(&self, which: BufferSelector) -> Result<Vec<LoggedCommand>> {
        let head = match which {
            BufferSelector::Current => log_buffer::current_head(&self.pool),
            BufferSelector::Other => log_buffer::other_head(&self.pool),
        };
        log_buffer::commands(&self.pool, head)
            .payloads()
            .map(LoggedCommand::decode)
            .collect()
    }

    /// Take a log generation out of service.
    ///
    /// If the other buffer still holds an unfinished generation, that one is
    /// returned. Otherwise the buffers are switched and the generation that
    /// was current is returned. Appends made before
    /// [`complete_log_drain`](Self::complete_log_drain) land in the new
    /// current buffer and are untouched by it.
    pub fn begin_log_drain(&mut self) -> Result<LogDrain> {
        if log_buffer::other_head(&self.pool).is_none() {
            self.pool.transaction(log_buffer::switch)?;
        }
        let head = log_buffer::other_head(&self.pool);
        let commands = log_buffer::pending_commands(&self.pool, head)?;
        Ok(LogDrain { head, commands })
    }

    /// Write a drained generation to the AOF, sync it, then free it
    pub fn complete_log_drain(&mut self, drain: LogDrain) -> Result<usize> {
        if drain.head != log_buffer::other_head(&self.pool) {
            return Err(PmemError::CorruptChain(
                "log generation changed while it was being drained".to_string(),
            ));
        }
        for command in &drain.commands {
            self.aof.append_encoded(command)?;
        }
        self.aof.sync()?;
        self.pool
            .transaction(|tx| log_buffer::clear(tx, drain.head))?;
        Ok(drain.commands.len())
    }

    /// Move everything logged so far into the AOF.
    ///
    /// Returns the number of commands written.
    pub fn flush_log(&mut self) -> Result<usize> {
        let mut written = 0;
        // At most one leftover generation plus the current one.
        for _ in 0..2 {
            if self.pool.root().log_count == 0 {
                break;
            }
            let drain = self.begin_log_drain()?;
            written += self.complete_log_drain(drain)?;
        }
        if written > 0 {
            debug!("Drained {} logged commands to the AOF", written);
        }
        Ok(written)
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Move one policy-chosen entry to the victim pipeline.
    ///
    /// Returns the evicted key, or None if the entry store is empty.
    pub fn evict_one(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(node) = self.policy.select_victim(&self.pool)? else {
            return Ok(None);
        };
        self.pool.transaction(|tx| victims::evict_one(tx, node))?;
        let key = self.pool.bytes(self.pool.entry(node)?.key)?.to_vec();
        debug!("Evicted one entry under {}", self.policy.kind());
        Ok(Some(key))
    }

    /// Move up to `count` policy-chosen entries in one transaction
    pub fn evict_batch(&mut self, count: usize) -> Result<usize> {
        let nodes = self.policy.select_victims(&self.pool, count)?;
        if nodes.is_empty() {
            return Ok(0);
        }
        let moved = self
            .pool
            .transaction(|tx| victims::evict_batch(tx, &nodes))?;
        debug!("Evicted {} entries under {}", moved, self.policy.kind());
        Ok(moved)
    }

    /// Persist every victim to the AOF, then reclaim the pipeline.
    ///
    /// Returns the number of victims flushed.
    pub fn flush_victims(&mut self) -> Result<usize> {
        let Some(head) = self.pool.root().victim_first else {
            return Ok(0);
        };
        let pending = victims::iterate(&self.pool)
            .map(|node| {
                let (key, value) = entries::read_pair(&self.pool, node)?;
                Ok((node, key.to_vec(), value.to_vec()))
            })
            .collect::<Result<Vec<_>>>()?;

        // Oldest eviction first.
        for (_, key, value) in pending.iter().rev() {
            self.aof.append(&LoggedCommand::Set {
                key: key.clone(),
                value: value.clone(),
            })?;
        }
        self.aof.sync()?;

        let flushed = self
            .pool
            .transaction(|tx| victims::flush_victim_chain(tx, head))?;
        for (node, key, _) in &pending {
            self.index.clear_node(key, *node);
        }
        info!("Flushed {} victims to the AOF", flushed);
        Ok(flushed as usize)
    }

    /// Enforce `max_entries` and the victim flush threshold
    fn maybe_evict(&mut self) -> Result<()> {
        if let Some(max) = self.config.max_entries {
            loop {
                let count = self.pool.root().entry_count as usize;
                if count <= max {
                    break;
                }
                let moved = if self.policy.supports_batches() {
                    self.evict_batch((count - max).max(self.config.evict_batch_size))?
                } else {
                    usize::from(self.evict_one()?.is_some())
                };
                if moved == 0 {
                    warn!("Entry store over its limit but nothing could be evicted");
                    break;
                }
            }
        }

        if self.pool.root().victim_count as usize >= self.config.victim_flush_threshold {
            self.flush_victims()?;
        }
        Ok(())
    }

    // ========================================================================
    // Inspection & Maintenance
    // ========================================================================

    pub fn status(&self) -> TierStatus {
        let root = self.pool.root();
        TierStatus {
            indexed_keys: self.index.len(),
            entry_count: root.entry_count,
            victim_count: root.victim_count,
            log_count: root.log_count,
            current_buffer: root.active_buffer.to_string(),
            eviction_policy: self.policy.kind().to_string(),
            aof_records_since_rewrite: self.aof.records_since_rewrite(),
            pool: self.pool.stats(),
        }
    }

    pub fn eviction_policy(&self) -> PolicyKind {
        self.policy.kind()
    }

    /// Entry-store contents in chain order
    pub fn entries(&self, direction: Direction) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        entries::iterate(&self.pool, direction)
            .map(|node| {
                let (key, value) = entries::read_pair(&self.pool, node)?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }

    /// Keys of the victim pipeline, newest eviction first
    pub fn victim_keys(&self) -> Result<Vec<Vec<u8>>> {
        victims::iterate(&self.pool)
            .map(|node| Ok(self.pool.bytes(self.pool.entry(node)?.key)?.to_vec()))
            .collect()
    }

    /// Every key and value in the index, sorted by key
    pub fn dump(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut pairs: Vec<_> = self
            .index
            .iter()
            .map(|(key, entry)| (key.to_vec(), entry.value.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    /// Rewrite the AOF as one `Set` per indexed key.
    ///
    /// The log is drained first so nothing older than the rewrite is
    /// replayed on top of it.
    pub fn compact_aof(&mut self) -> Result<usize> {
        self.flush_log()?;
        let commands: Vec<LoggedCommand> = self
            .dump()
            .into_iter()
            .map(|(key, value)| LoggedCommand::Set { key, value })
            .collect();
        let written = self.aof.rewrite(&commands)?;
        info!("AOF rewritten with {} records", written);
        Ok(written)
    }

    /// Make the pool image and the AOF durable
    pub fn checkpoint(&mut self) -> Result<()> {
        self.aof.sync()?;
        self.pool.checkpoint()
    }
}
