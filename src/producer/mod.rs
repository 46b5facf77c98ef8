//! Outbox producer
//!
//! ```text
//! caller ──send()──▶ UnitOfWork ──insert──▶ OutboxStore (Pending)
//!                        │
//!                     commit
//!                        │ after_commit
//!                        ▼
//!                   RowPublisher ──publish(correlation = row id)──▶ BrokerGateway
//!                                                                       │ confirm
//!                        OutboxStore ◀──delete / mark sent── ConfirmSettler
//! ```
//!
//! A nack, a missing confirm, a broker error or a crash between commit and
//! publish all leave the row pending; the resend scanner picks it up.

mod error;
#[allow(clippy::module_inception)]
mod producer;
mod publish;

pub use error::SendError;
pub use producer::{OutboxDraft, OutboxProducer};
pub use publish::RowPublisher;
