use thiserror::Error;

/// Error type for broker gateway operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// Publish targeted an exchange that was never declared.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    /// Consume targeted a queue that was never declared.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    /// Redeclaration with incompatible settings.
    #[error("topology conflict: {0}")]
    TopologyConflict(String),
    /// Ack/nack for a tag that is not outstanding (never delivered or already settled).
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
    /// A correlation token that does not name an outbox row.
    #[error("invalid correlation token: {0:?}")]
    InvalidCorrelation(String),
    /// Consumer parameters out of range.
    #[error("invalid consumer spec: {0}")]
    InvalidSpec(String),
    /// The underlying lock was poisoned during the named operation.
    #[error("broker lock poisoned during {0}")]
    LockPoisoned(&'static str),
}
