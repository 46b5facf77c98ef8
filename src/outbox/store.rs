use serde::{Deserialize, Serialize};

use super::error::StoreError;
use super::message::{OutboxId, OutboxMessage};

/// What to do with a row once the broker confirms its publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Remove the row.
    #[default]
    Delete,
    /// Keep the row for auditing but flip it to `Sent`.
    MarkSent,
}

/// One page of a pending-row scan.
///
/// `after` is an exclusive cursor on the row id. Ascending id order is only a
/// pagination device; nothing downstream may rely on it as delivery order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPage {
    pub after: Option<OutboxId>,
    pub limit: usize,
}

impl PendingPage {
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }

    pub fn after(id: OutboxId, limit: usize) -> Self {
        Self {
            after: Some(id),
            limit,
        }
    }
}

/// A store transaction. Rows inserted through it become visible only on commit.
pub trait StoreTransaction: Send {
    /// Commit everything staged in this transaction.
    fn commit(self) -> Result<(), StoreError>;

    /// Discard everything staged in this transaction.
    fn rollback(self);
}

/// Persistence for outbox rows.
///
/// Implementations must be safe to share between the producer, the resend
/// scanner and broker confirm callbacks running on other threads.
pub trait OutboxStore: Send + Sync {
    type Transaction: StoreTransaction;

    /// Open a new transaction.
    fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Allocate the next row id. Ids are unique and increase monotonically.
    fn next_id(&self) -> Result<OutboxId, StoreError>;

    /// Stage a row inside `tx`.
    fn insert(&self, tx: &mut Self::Transaction, row: OutboxMessage) -> Result<(), StoreError>;

    /// Remove a row. Returns `Ok(false)` if it was already gone.
    fn delete(&self, id: OutboxId) -> Result<bool, StoreError>;

    /// Flip a row to `Sent`. Returns `Ok(false)` if it was absent or already sent.
    fn mark_sent(&self, id: OutboxId) -> Result<bool, StoreError>;

    /// Pending rows after the page cursor, at most `page.limit` of them.
    fn query_pending(&self, page: PendingPage) -> Result<Vec<OutboxMessage>, StoreError>;

    /// Look up a single row regardless of status.
    fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError>;

    /// Settle a confirmed row according to `policy`. Idempotent.
    fn settle(&self, id: OutboxId, policy: AckPolicy) -> Result<bool, StoreError> {
        match policy {
            AckPolicy::Delete => self.delete(id),
            AckPolicy::MarkSent => self.mark_sent(id),
        }
    }
}

impl<S: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<S> {
    type Transaction = S::Transaction;

    fn begin(&self) -> Result<Self::Transaction, StoreError> {
        (**self).begin()
    }

    fn next_id(&self) -> Result<OutboxId, StoreError> {
        (**self).next_id()
    }

    fn insert(&self, tx: &mut Self::Transaction, row: OutboxMessage) -> Result<(), StoreError> {
        (**self).insert(tx, row)
    }

    fn delete(&self, id: OutboxId) -> Result<bool, StoreError> {
        (**self).delete(id)
    }

    fn mark_sent(&self, id: OutboxId) -> Result<bool, StoreError> {
        (**self).mark_sent(id)
    }

    fn query_pending(&self, page: PendingPage) -> Result<Vec<OutboxMessage>, StoreError> {
        (**self).query_pending(page)
    }

    fn get(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError> {
        (**self).get(id)
    }
}
