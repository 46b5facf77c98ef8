//! Resend scanner
//!
//! The recovery half of the outbox. A single periodic task walks every
//! pending row and republishes it with its row id as confirm correlation:
//!
//! ```text
//! ┌───────────────────────┐  every interval   ┌─────────────────────┐
//! │ ResendScannerThread   │──── scan_once ───▶│ ResendScanner        │
//! └───────────────────────┘                   │  query_pending(page) │
//!                                             │  declare + publish   │
//!                                             └─────────────────────┘
//! ```
//!
//! Pages are bounded by `batch_size` and walked by id cursor, so a large
//! backlog never has to fit in memory at once.

#[allow(clippy::module_inception)]
mod scanner;
mod thread;

pub use scanner::{ResendScanner, ScanReport};
pub use thread::{ResendScannerThread, ScannerStats};
