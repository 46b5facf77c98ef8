//! Transactional outbox
//!
//! An outbound message is first written as a row in the same transaction as
//! the state change that produced it. Publishing happens only after that
//! transaction commits, and the row is removed (or marked sent) only once the
//! broker confirms the publish. A row that is still pending is therefore the
//! single record of "accepted but not yet confirmed".
//!
//! ## Lifecycle
//!
//! ```text
//!   send()                   commit                 broker ack
//!     │                        │                        │
//!     ▼                        ▼                        ▼
//! ┌────────┐  insert(tx)  ┌─────────┐  after_commit  ┌────────────────┐
//! │ caller │────────────▶│ Pending │──── publish ──▶│ deleted / Sent │
//! └────────┘              └─────────┘                └────────────────┘
//!                             ▲  │
//!                  nack / no  │  │ ResendScanner
//!                  confirm    └──┘ republishes
//! ```
//!
//! - [`OutboxStore`] persists rows; [`InMemoryOutboxStore`] is included.
//! - [`UnitOfWork`] holds a store transaction and the actions to run after it commits.
//! - [`ConfirmSettler`] turns publisher confirms into row settlement.

mod commit;
mod confirm;
mod error;
mod in_memory;
mod message;
mod store;

pub use commit::{CommitReport, UnitOfWork};
pub use confirm::{ConfirmSettler, ConfirmStats};
pub use error::StoreError;
pub use in_memory::{InMemoryOutboxStore, InMemoryTransaction};
pub use message::{ExchangeType, OutboxId, OutboxMessage, OutboxStatus};
pub use store::{AckPolicy, OutboxStore, PendingPage, StoreTransaction};
