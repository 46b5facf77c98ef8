//! Reliable messaging over a message broker.
//!
//! - [`producer`]: transactional outbox producer. A message is durable once the
//!   surrounding transaction commits; publishing happens after the commit.
//! - [`scanner`]: the resend scanner, which republishes rows whose publish was
//!   never confirmed.
//! - [`consumer`]: idempotent consumer engine with dedup and bounded retry.
//!
//! Storage, cache and broker are traits ([`OutboxStore`], [`DedupCache`],
//! [`BrokerGateway`]) with in-memory implementations included.
//!
//! ```
//! use reliable_mq::{
//!     ConsumeTarget, ConsumerEngine, HandlerError, InMemoryBroker, InMemoryDedupCache,
//!     InMemoryOutboxStore, OutboxProducer,
//! };
//!
//! let store = InMemoryOutboxStore::new();
//! let broker = InMemoryBroker::new();
//! let engine = ConsumerEngine::new(InMemoryDedupCache::new()).with_concurrency(1);
//!
//! let consumer = engine
//!     .consume(
//!         &broker,
//!         ConsumeTarget::new("orders", "order.*", "orders.q"),
//!         |_: &serde_json::Value| -> Result<bool, HandlerError> { Ok(true) },
//!     )
//!     .unwrap();
//!
//! let producer = OutboxProducer::new(store, broker);
//! assert!(producer.send("orders", "order.create", r#"{"id":1}"#));
//! consumer.stop();
//! ```

pub mod broker;
pub mod cache;
pub mod config;
pub mod consumer;
#[cfg(feature = "http")]
pub mod http;
pub mod logging;
pub mod outbox;
pub mod producer;
pub mod scanner;

pub use broker::{BrokerError, BrokerGateway, InMemoryBroker};
pub use cache::{CacheError, DedupCache, InMemoryDedupCache, ObjectCache};
pub use config::{ConfigError, ReliabilityConfig};
pub use consumer::{Action, ConsumeTarget, ConsumerEngine, HandlerError, MessageHandler};
pub use outbox::{
    AckPolicy, InMemoryOutboxStore, OutboxId, OutboxMessage, OutboxStore, StoreError, UnitOfWork,
};
pub use producer::{OutboxProducer, SendError};
pub use scanner::{ResendScanner, ResendScannerThread};
