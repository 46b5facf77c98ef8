use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::error::StoreError;
use super::message::{OutboxId, OutboxMessage, OutboxStatus};
use super::store::{OutboxStore, PendingPage, StoreTransaction};

struct Inner {
    rows: RwLock<BTreeMap<OutboxId, OutboxMessage>>,
    seq: AtomicU64,
    available: AtomicBool,
    fail_next_commit: AtomicBool,
}

/// In-memory outbox table for tests and single-process deployments.
///
/// Cloning creates another handle to the same table, so the producer, the
/// scanner and confirm callbacks can each hold one.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(BTreeMap::new()),
                seq: AtomicU64::new(1),
                available: AtomicBool::new(true),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Start id allocation at `first`. Useful to reproduce a known id in tests.
    pub fn starting_at(first: u64) -> Self {
        let store = Self::new();
        store.inner.seq.store(first, Ordering::SeqCst);
        store
    }

    /// Simulate the database going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Make the next commit fail, as if the database aborted the transaction.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of rows in the table, whatever their status.
    pub fn len(&self) -> usize {
        self.inner.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every row.
    pub fn rows(&self) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StoreError::LockPoisoned("rows"))?;
        Ok(rows.values().cloned().collect())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }
}

/// Transaction over [`InMemoryOutboxStore`]: rows are staged locally and
/// written under one write lock on commit.
pub struct InMemoryTransaction {
    store: InMemoryOutboxStore,
    staged: Vec<OutboxMessage>,
}

impl InMemoryTransaction {
    pub fn staged(&self) -> &[OutboxMessage] {
        &self.staged
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn commit(self) -> Result<(), StoreError> {
        self.store.ensure_available()?;
        if self.store.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::CommitFailed("injected commit failure".into()));
        }

        let mut rows = self
            .store
            .inner
            .rows
            .write()
            .map_err(|_| StoreError::LockPoisoned("commit"))?;

        if let Some(dup) = self.staged.iter().find(|row| rows.contains_key(&row.id)) {
            return Err(StoreError::DuplicateId(dup.id.get()));
        }
        for row in self.staged {
            rows.insert(row.id, row);
        }
        Ok(())
    }

    fn rollback(self) {}
}

impl OutboxStore for InMemoryOutboxStore {
    type Transaction = InMemoryTransaction;

    fn begin(&self) -> Result<Self::Transaction, StoreError> {
        self.ensure_available()?;
        Ok(InMemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
        })
    }

    fn next_id(&self) -> Result<OutboxId, StoreError> {
        self.ensure_available()?;
        Ok(OutboxId(self.inner.seq.fetch_add(1, Ordering::SeqCst)))
    }

    fn insert(&self, tx: &mut Self::Transaction, row: OutboxMessage) -> Result<(), StoreError> {
        self.ensure_available()?;
        if tx.staged.iter().any(|staged| staged.id == row.id) {
            return Err(StoreError::DuplicateId(row.id.get()));
        }
        tx.staged.push(row);
        Ok(())
    }

    fn delete(&self, id: OutboxId) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut rows = self
            .inner
            .rows
            .write()
            .map_err(|_| StoreError::LockPoisoned("delete"))?;
        Ok(rows.remove(&id).is_some())
    }

    fn mark_sent(&self, id: OutboxId) -> Result<bool, StoreError> {
        self.ensure_available()?;
        let mut rows = self
            .inner
            .rows
            .write()
            .map_err(|_| StoreError::LockPoisoned("mark_sent"))?;
        match rows.get_mut(&id) {
            Some(row) if row.status == OutboxStatus::Pending => {
                row.status = OutboxStatus::Sent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn query_pending(&self, page: PendingPage) -> Result<Vec<OutboxMessage>, StoreError> {
        self.ensure_available()?;
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StoreError::LockPoisoned("query_pending"))?;
        let lower = match page.after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(rows
            .range((lower, Bound::Unbounded))
            .map(|(_, row)| row)
            .filter(|row| row.is_pending())
            .take(page.limit)
            .cloned()
            .collect())
    }

    fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError> {
        self.ensure_available()?;
        let rows = self
            .inner
            .rows
            .read()
            .map_err(|_| StoreError::LockPoisoned("get"))?;
        Ok(rows.get(&id).cloned())
    }
}
