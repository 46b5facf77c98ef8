//! Broker gateway - message broker abstraction
//!
//! The producer, resend scanner and consumer engine talk to the broker only
//! through [`BrokerGateway`]. It covers the three things they need:
//! topology declaration, publishing with publisher confirms, and consuming
//! with manual acknowledgement.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐
//! │   Producer   │  │ResendScanner │  │    ConsumerEngine    │
//! └──────────────┘  └──────────────┘  └──────────────────────┘
//!        │ publish + confirm │                │ ack / nack(requeue)
//!        ▼                   ▼                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BrokerGateway trait                       │
//! │  declare_topology / publish(msg, on_confirm) /              │
//! │  start_consumer(spec, on_message)                           │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                  │
//!          ▼                                  ▼
//! ┌──────────────────┐            ┌──────────────────────────┐
//! │  InMemoryBroker  │            │  AMQP gateway            │
//! │   (included)     │            │  (external)              │
//! └──────────────────┘            └──────────────────────────┘
//! ```
//!
//! Confirms carry a [`CorrelationId`] naming the outbox row that was
//! published, so an ack can be matched back to the row it settles.

mod error;
mod gateway;
mod in_memory;
pub mod topic;

pub use error::BrokerError;
pub use gateway::{
    BrokerGateway, Confirm, ConfirmCallback, ConfirmOutcome, ConsumerHandle, ConsumerSpec,
    CorrelationId, Delivery, DeliveryCallback, DeliveryChannel, DeliveryTag, OutboundMessage,
    Topology,
};
pub use in_memory::{
    ConfirmMode, DeadLetter, InMemoryBroker, PublishedRecord, Settlement, SettlementRecord,
};
