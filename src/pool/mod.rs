//! Transactional persistent-memory pool.
//!
//! The pool is an arena of typed slots addressed by [`Handle`]s plus the
//! single [`Root`] object. All mutation goes through a
//! [`Transaction`]; the pool itself only exposes reads publicly.
//! A pool may be volatile (tests, scratch use) or backed by an image file
//! that is rewritten atomically whenever a transaction commits.

mod image;
mod latency;
mod object;

pub use image::POOL_FORMAT_VERSION;
pub use latency::LatencyModel;
pub use object::PmemObject;

use crate::core::{Handle, PmemError, Result};
use crate::storage::DurabilityMode;
use crate::storage::layout::{EntryNode, LogNode, Root};
use crate::transaction::Transaction;
use image::{ImageFile, PoolImageRef};
use log::{debug, info};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    pub durability: DurabilityMode,
    pub latency: LatencyModel,
}

/// Object counts and payload footprint of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub live_objects: usize,
    pub entry_nodes: usize,
    pub log_nodes: usize,
    pub payloads: usize,
    pub used_bytes: usize,
    pub free_slots: usize,
}

pub struct PmemPool {
    pool_id: u64,
    root: Root,
    slots: Vec<Option<PmemObject>>,
    free_slots: Vec<u64>,
    image: Option<ImageFile>,
    options: PoolOptions,
    fault_after_writes: Option<usize>,
}

impl PmemPool {
    /// Create a pool that lives only as long as this value
    pub fn in_memory(options: PoolOptions) -> Self {
        Self {
            pool_id: fresh_pool_id(),
            root: Root::default(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            image: None,
            options,
            fault_after_writes: None,
        }
    }

    /// Open the pool image at `path`, creating an empty pool if none exists.
    ///
    /// Under `DurabilityMode::None` the path is ignored and the pool is
    /// memory-only.
    pub fn open<P: AsRef<Path>>(path: P, options: PoolOptions) -> Result<Self> {
        if options.durability == DurabilityMode::None {
            debug!("Durability disabled, pool stays in memory");
            return Ok(Self::in_memory(options));
        }
        let image = ImageFile::new(path);
        match image.load()? {
            Some(loaded) => {
                info!(
                    "Opened pool {:016x} from {} ({} slots)",
                    loaded.pool_id,
                    image.path().display(),
                    loaded.slots.len()
                );
                Ok(Self {
                    pool_id: loaded.pool_id,
                    root: loaded.root,
                    slots: loaded.slots,
                    free_slots: loaded.free_slots,
                    image: Some(image),
                    options,
                    fault_after_writes: None,
                })
            }
            None => {
                let mut pool = Self::in_memory(options);
                info!(
                    "Creating pool {:016x} at {}",
                    pool.pool_id,
                    image.path().display()
                );
                pool.image = Some(image);
                pool.write_image()?;
                Ok(pool)
            }
        }
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn backing_path(&self) -> Option<&Path> {
        self.image.as_ref().map(|image| image.path())
    }

    /// Open a transaction scope. Dropping it without `commit` rolls back.
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction::begin(self)
    }

    /// Run `op` in its own transaction scope.
    ///
    /// Commits on `Ok`. On `Err` the scope is rolled back and the error is
    /// surfaced as `TransactionAborted`.
    pub fn transaction<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = self.begin();
        match op(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.abort();
                Err(err.into_aborted())
            }
        }
    }

    /// Resolve a handle to the object it names
    pub fn resolve(&self, handle: Handle) -> Result<&PmemObject> {
        self.options.latency.on_read();
        let index = self.slot_index(handle)?;
        self.slots[index]
            .as_ref()
            .ok_or(PmemError::InvalidHandle(handle))
    }

    pub fn entry(&self, handle: Handle) -> Result<&EntryNode> {
        match self.resolve(handle)? {
            PmemObject::Entry(node) => Ok(node),
            _ => Err(PmemError::TypeMismatch {
                handle,
                expected: "entry node",
            }),
        }
    }

    pub fn log_node(&self, handle: Handle) -> Result<&LogNode> {
        match self.resolve(handle)? {
            PmemObject::Log(node) => Ok(node),
            _ => Err(PmemError::TypeMismatch {
                handle,
                expected: "log node",
            }),
        }
    }

    pub fn bytes(&self, handle: Handle) -> Result<&[u8]> {
        match self.resolve(handle)? {
            PmemObject::Bytes(bytes) => Ok(bytes),
            _ => Err(PmemError::TypeMismatch {
                handle,
                expected: "byte payload",
            }),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            free_slots: self.free_slots.len(),
            ..PoolStats::default()
        };
        for object in self.slots.iter().flatten() {
            stats.live_objects += 1;
            stats.used_bytes += object.footprint();
            match object {
                PmemObject::Entry(_) => stats.entry_nodes += 1,
                PmemObject::Log(_) => stats.log_nodes += 1,
                PmemObject::Bytes(_) => stats.payloads += 1,
            }
        }
        stats
    }

    /// Let `n` more pool writes through, then fail the next one with
    /// `TransactionAborted`.
    ///
    /// One-shot; used to exercise crash-abort behaviour.
    pub fn inject_fault_after_writes(&mut self, n: usize) {
        self.fault_after_writes = Some(n);
    }

    pub fn clear_fault(&mut self) {
        self.fault_after_writes = None;
    }

    /// Write the current image regardless of durability mode
    pub fn checkpoint(&self) -> Result<()> {
        if self.image.is_some() {
            self.write_image()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Substrate internals, reachable only through `Transaction`
    // ------------------------------------------------------------------

    pub(crate) fn charge_write(&mut self) -> Result<()> {
        if let Some(remaining) = self.fault_after_writes.as_mut() {
            if *remaining == 0 {
                self.fault_after_writes = None;
                return Err(PmemError::TransactionAborted(
                    "injected pool write fault".to_string(),
                ));
            }
            *remaining -= 1;
        }
        self.options.latency.on_write();
        Ok(())
    }

    pub(crate) fn root_mut(&mut self) -> &mut Root {
        &mut self.root
    }

    pub(crate) fn object_mut(&mut self, handle: Handle) -> Result<&mut PmemObject> {
        let index = self.slot_index(handle)?;
        self.slots[index]
            .as_mut()
            .ok_or(PmemError::InvalidHandle(handle))
    }

    pub(crate) fn place(&mut self, object: PmemObject) -> Handle {
        match self.free_slots.pop() {
            Some(offset) => {
                self.slots[(offset - 1) as usize] = Some(object);
                Handle::new(self.pool_id, offset)
            }
            None => {
                self.slots.push(Some(object));
                Handle::new(self.pool_id, self.slots.len() as u64)
            }
        }
    }

    pub(crate) fn take(&mut self, handle: Handle) -> Result<PmemObject> {
        let index = self.slot_index(handle)?;
        self.slots[index]
            .take()
            .ok_or(PmemError::InvalidHandle(handle))
    }

    pub(crate) fn restore(&mut self, handle: Handle, object: PmemObject) {
        if let Ok(index) = self.slot_index(handle) {
            self.slots[index] = Some(object);
        }
    }

    /// Undo an allocation: empty the slot and make it reusable
    pub(crate) fn discard(&mut self, handle: Handle) {
        if let Ok(index) = self.slot_index(handle) {
            self.slots[index] = None;
            self.free_slots.push(handle.offset());
        }
    }

    pub(crate) fn release_all(&mut self, offsets: &[u64]) {
        self.free_slots.extend_from_slice(offsets);
    }

    pub(crate) fn unrelease(&mut self, count: usize) {
        let keep = self.free_slots.len().saturating_sub(count);
        self.free_slots.truncate(keep);
    }

    pub(crate) fn make_durable(&self) -> Result<()> {
        match self.options.durability {
            DurabilityMode::Sync if self.image.is_some() => self.write_image(),
            _ => Ok(()),
        }
    }

    fn write_image(&self) -> Result<()> {
        let Some(image) = self.image.as_ref() else {
            return Ok(());
        };
        image.save(&PoolImageRef {
            version: POOL_FORMAT_VERSION,
            pool_id: self.pool_id,
            root: &self.root,
            slots: &self.slots,
            free_slots: &self.free_slots,
        })?;
        debug!("Pool {:016x} image written", self.pool_id);
        Ok(())
    }

    fn slot_index(&self, handle: Handle) -> Result<usize> {
        if handle.pool_id() != self.pool_id
            || handle.offset() == 0
            || handle.offset() > self.slots.len() as u64
        {
            return Err(PmemError::InvalidHandle(handle));
        }
        Ok((handle.offset() - 1) as usize)
    }
}

impl Drop for PmemPool {
    fn drop(&mut self) {
        if self.options.durability == DurabilityMode::Async {
            if let Err(err) = self.checkpoint() {
                log::error!("Failed to checkpoint pool on close: {}", err);
            }
        }
    }
}

fn fresh_pool_id() -> u64 {
    Uuid::new_v4().as_u128() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_foreign_handle_rejected() {
        let mut first = PmemPool::in_memory(PoolOptions::default());
        let second = PmemPool::in_memory(PoolOptions::default());
        let handle = first.transaction(|tx| tx.alloc_bytes(b"k")).unwrap();
        assert!(matches!(
            second.resolve(handle),
            Err(PmemError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        let handle = pool.transaction(|tx| tx.alloc_bytes(b"k")).unwrap();
        assert!(matches!(
            pool.entry(handle),
            Err(PmemError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_injected_fault_aborts_scope() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        pool.inject_fault_after_writes(1);
        let err = pool
            .transaction(|tx| {
                tx.alloc_bytes(b"one")?;
                tx.alloc_bytes(b"two")
            })
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(pool.stats().live_objects, 0);

        // One-shot: the next scope succeeds.
        assert!(pool.transaction(|tx| tx.alloc_bytes(b"three")).is_ok());
    }

    #[test]
    fn test_image_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tier.pool");

        let (pool_id, handle) = {
            let mut pool = PmemPool::open(&path, PoolOptions::default()).unwrap();
            let handle = pool
                .transaction(|tx| {
                    let handle = tx.alloc_bytes(b"durable")?;
                    tx.root_mut()?.log_count = 3;
                    Ok(handle)
                })
                .unwrap();
            (pool.pool_id(), handle)
        };

        let pool = PmemPool::open(&path, PoolOptions::default()).unwrap();
        assert_eq!(pool.pool_id(), pool_id);
        assert_eq!(pool.root().log_count, 3);
        assert_eq!(pool.bytes(handle).unwrap(), b"durable");
    }

    #[test]
    fn test_no_durability_never_writes_an_image() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scratch.pool");
        let options = PoolOptions {
            durability: DurabilityMode::None,
            ..PoolOptions::default()
        };

        let mut pool = PmemPool::open(&path, options).unwrap();
        pool.transaction(|tx| tx.alloc_bytes(b"volatile")).unwrap();
        pool.checkpoint().unwrap();
        assert!(pool.backing_path().is_none());
        drop(pool);
        assert!(!path.exists());
    }

    #[test]
    fn test_stats_count_objects() {
        let mut pool = PmemPool::in_memory(PoolOptions::default());
        pool.transaction(|tx| {
            tx.alloc_bytes(b"abc")?;
            tx.alloc_bytes(b"de")
        })
        .unwrap();
        let stats = pool.stats();
        assert_eq!(stats.live_objects, 2);
        assert_eq!(stats.payloads, 2);
        assert_eq!(stats.used_bytes, 5);
    }
}
