// ============================================================================
// Transaction Scope
// ============================================================================
//
// A `Transaction` borrows the pool mutably for its whole lifetime, so no
// other mutation can interleave with it. Reads go through `Deref` to the
// pool; writes must go through the scope, which records an undo image of
// each object before its first mutation. Dropping an uncommitted scope
// rolls everything back.
//
// ============================================================================

use super::{TransactionId, TransactionState, UndoRecord};
use crate::core::{Handle, PmemError, Result};
use crate::pool::{PmemObject, PmemPool};
use crate::storage::layout::{EntryNode, LogNode, Root};
use log::{debug, warn};
use std::collections::HashSet;
use std::ops::Deref;

pub struct Transaction<'p> {
    id: TransactionId,
    state: TransactionState,
    pool: &'p mut PmemPool,
    undo: Vec<UndoRecord>,
    recorded: HashSet<Handle>,
    root_recorded: bool,
    pending_free: Vec<u64>,
}

impl<'p> Transaction<'p> {
    pub(crate) fn begin(pool: &'p mut PmemPool) -> Self {
        let id = TransactionId::next();
        debug!("{} begin on pool {:016x}", id, pool.pool_id());
        Self {
            id,
            state: TransactionState::Active,
            pool,
            undo: Vec::new(),
            recorded: HashSet::new(),
            root_recorded: false,
            pending_free: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of undo records captured so far
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Snapshot an object so that a later abort restores it.
    ///
    /// Must precede any direct mutation of the object. Recording the same
    /// object twice in one scope is a no-op.
    pub fn record_for_undo(&mut self, handle: Handle) -> Result<()> {
        if self.recorded.contains(&handle) {
            return Ok(());
        }
        self.pool.charge_write()?;
        let before = self.pool.resolve(handle)?.clone();
        self.undo.push(UndoRecord::Object { handle, before });
        self.recorded.insert(handle);
        Ok(())
    }

    /// Mutable access to an object previously recorded for undo
    pub fn direct_mut(&mut self, handle: Handle) -> Result<&mut PmemObject> {
        if !self.recorded.contains(&handle) {
            return Err(PmemError::UnloggedWrite(handle));
        }
        self.pool.object_mut(handle)
    }

    pub fn entry_mut(&mut self, handle: Handle) -> Result<&mut EntryNode> {
        self.record_for_undo(handle)?;
        match self.direct_mut(handle)? {
            PmemObject::Entry(node) => Ok(node),
            _ => Err(PmemError::TypeMismatch {
                handle,
                expected: "entry node",
            }),
        }
    }

    pub fn log_node_mut(&mut self, handle: Handle) -> Result<&mut LogNode> {
        self.record_for_undo(handle)?;
        match self.direct_mut(handle)? {
            PmemObject::Log(node) => Ok(node),
            _ => Err(PmemError::TypeMismatch {
                handle,
                expected: "log node",
            }),
        }
    }

    pub fn root_mut(&mut self) -> Result<&mut Root> {
        if !self.root_recorded {
            self.pool.charge_write()?;
            self.undo.push(UndoRecord::Root(self.pool.root().clone()));
            self.root_recorded = true;
        }
        Ok(self.pool.root_mut())
    }

    /// Allocate a new object inside the scope
    pub fn alloc(&mut self, object: PmemObject) -> Result<Handle> {
        self.pool.charge_write()?;
        let handle = self.pool.place(object);
        self.undo.push(UndoRecord::Allocated(handle));
        // Fresh objects are rolled back wholesale, no snapshot needed.
        self.recorded.insert(handle);
        Ok(handle)
    }

    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Handle> {
        self.alloc(PmemObject::Bytes(bytes.to_vec()))
    }

    /// Free an object. Its slot is only reusable once the scope commits.
    pub fn free(&mut self, handle: Handle) -> Result<()> {
        self.pool.charge_write()?;
        let before = self.pool.take(handle)?;
        self.undo.push(UndoRecord::Freed { handle, before });
        self.recorded.remove(&handle);
        self.pending_free.push(handle.offset());
        Ok(())
    }

    /// Make every mutation of the scope durable.
    ///
    /// If the pool image cannot be written the scope is rolled back and
    /// `TransactionAborted` is returned.
    pub fn commit(mut self) -> Result<()> {
        let released = self.pending_free.len();
        self.pool.release_all(&self.pending_free);
        if let Err(err) = self.pool.make_durable() {
            self.pool.unrelease(released);
            self.rollback();
            return Err(PmemError::TransactionAborted(format!(
                "{} could not be made durable: {}",
                self.id, err
            )));
        }
        self.state = TransactionState::Committed;
        debug!("{} committed ({} undo records)", self.id, self.undo.len());
        Ok(())
    }

    /// Discard every mutation of the scope
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if !self.state.is_active() {
            return;
        }
        let structural = self.undo.iter().filter(|r| r.is_structural()).count();
        warn!(
            "{} aborted, rolling back {} undo records ({} allocations/frees)",
            self.id,
            self.undo.len(),
            structural
        );
        while let Some(record) = self.undo.pop() {
            match record {
                UndoRecord::Root(root) => *self.pool.root_mut() = root,
                UndoRecord::Object { handle, before } | UndoRecord::Freed { handle, before } => {
                    self.pool.restore(handle, before)
                }
                UndoRecord::Allocated(handle) => self.pool.discard(handle),
            }
        }
        self.pending_free.clear();
        self.recorded.clear();
        self.state = TransactionState::RolledBack;
    }
}

impl Deref for Transaction<'_> {
    type Target = PmemPool;

    fn deref(&self) -> &PmemPool {
        self.pool
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
