use thiserror::Error;

use crate::outbox::StoreError;

/// Why a message could not be durably accepted.
///
/// Broker failures never show up here: once the row is committed the send
/// has succeeded, and publishing is the resend scanner's problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("outbox persistence failed: {0}")]
    Store(#[from] StoreError),
}
