use thiserror::Error;

/// Error type for dedup cache operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache cannot be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    /// `incr` on a value that is not an integer.
    #[error("value at {0:?} is not an integer")]
    NotAnInteger(String),
    /// A typed object could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
    /// The underlying lock was poisoned during the named operation.
    #[error("cache lock poisoned during {0}")]
    LockPoisoned(&'static str),
}
