use std::sync::Arc;
use std::time::Duration;

use super::error::CacheError;

/// Key-value store used for consumer dedup records and retry counters.
///
/// The contract follows Redis string semantics closely enough that a Redis
/// client can implement it directly.
pub trait DedupCache: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, CacheError>;

    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value`, replacing any previous value and TTL. `None` never expires.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Increment an integer value and return the new value.
    ///
    /// A missing key is created with value 1 and no TTL. An existing TTL is
    /// preserved.
    fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, CacheError>;

    /// Remove `key`. Returns whether it was present.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

impl<C: DedupCache + ?Sized> DedupCache for Arc<C> {
    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        (**self).exists(key)
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        (**self).set(key, value, ttl)
    }

    fn incr(&self, key: &str) -> Result<i64, CacheError> {
        (**self).incr(key)
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool, CacheError> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        (**self).delete(key)
    }
}

/// Dedup record key for a processed message.
pub fn dedup_key(queue: &str, message_id: &str) -> String {
    format!("{queue}_{message_id}")
}

/// Retry counter key for a failing message.
pub fn retry_key(queue: &str, message_id: &str) -> String {
    format!("retry_{queue}_{message_id}")
}
