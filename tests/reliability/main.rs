//! Reliability integration tests.
//!
//! Exercises the outbox producer, the resend scanner and the consumer engine
//! against the in-memory store, cache and broker:
//! - durable sends and confirm settlement
//! - recovery of publishes lost to crashes, nacks and broker outages
//! - dedup, bounded retry and exactly-once settlement on the consumer side

mod producer;
mod scanner;
mod consumer;
mod end_to_end;
#[cfg(feature = "http")]
mod http;
