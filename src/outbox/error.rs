use thiserror::Error;

/// Error type for outbox store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The underlying lock was poisoned during the named operation.
    #[error("outbox store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    /// The store cannot be reached.
    #[error("outbox store unavailable: {0}")]
    Unavailable(String),
    /// A row with this id already exists.
    #[error("outbox row {0} already exists")]
    DuplicateId(u64),
    /// The transaction could not be committed; nothing it staged is visible.
    #[error("commit failed: {0}")]
    CommitFailed(String),
}
