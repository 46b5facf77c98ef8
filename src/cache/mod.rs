//! Dedup cache - consumer bookkeeping store
//!
//! The consumer engine keeps two kinds of records here:
//!
//! ```text
//! "{queue}_{message_id}"        dedup record, written after successful
//!                               processing, expires after the dedup TTL
//! "retry_{queue}_{message_id}"  retry counter, created on the first failure
//!                               and incremented on each later one
//! ```
//!
//! [`DedupCache`] is the storage contract, [`InMemoryDedupCache`] the included
//! implementation. [`ObjectCache`] layers a typed object store over any of them.

mod dedup;
mod error;
mod in_memory;
mod object;

pub use dedup::{dedup_key, retry_key, DedupCache};
pub use error::CacheError;
pub use in_memory::InMemoryDedupCache;
pub use object::{ObjectCache, ObjectKey};
