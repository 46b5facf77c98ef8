//! Idempotent consumer engine
//!
//! Wraps a [`MessageHandler`] with deduplication and bounded retry, and turns
//! every delivery into exactly one ack or nack:
//!
//! ```text
//!  delivery ──▶ message id? ──no──────────────────────────────▶ Reject
//!                  │ yes
//!                  ▼
//!              valid JSON? ──no───────────────────────────────▶ Reject
//!                  │ yes
//!                  ▼
//!           dedup record? ──yes───────────────────────────────▶ Accept
//!                  │ no
//!                  ▼
//!              handler ──Ok(true)──▶ write dedup record ──────▶ Accept
//!                  │ ──Err / panic────────────────────────────▶ Reject
//!                  │ Ok(false)
//!                  ▼
//!         retry count >= max? ──yes───────────────────────────▶ Reject
//!                  │ no
//!                  └──▶ bump retry counter ───────────────────▶ Retry
//! ```
//!
//! Accept acks, Retry nacks with requeue, Reject nacks without requeue.
//! Any cache failure along the way resolves to Reject.

mod action;
mod engine;
mod handler;

pub use action::Action;
pub use engine::{ConsumeTarget, ConsumerEngine, ConsumerStats};
pub use handler::{HandlerError, MessageHandler};
