//! Message handler contract.

use serde_json::Value;
use thiserror::Error;

/// Error raised by a message handler.
///
/// Any `Err` is treated as non-transient: the message is rejected, not
/// retried. Return `Ok(false)` for failures worth retrying.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload is well-formed JSON but not what the handler expects.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// Business logic refused the message.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("handler error: {0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

/// Processes one decoded message.
///
/// `Ok(true)` means processed; `Ok(false)` means a transient failure that
/// should be retried.
///
/// Closures with the matching signature are handlers:
///
/// ```
/// use reliable_mq::consumer::{HandlerError, MessageHandler};
///
/// let handler = |payload: &serde_json::Value| -> Result<bool, HandlerError> {
///     Ok(payload.get("id").is_some())
/// };
/// assert!(handler.process(&serde_json::json!({ "id": 1 })).unwrap());
/// ```
pub trait MessageHandler: Send + Sync {
    fn process(&self, payload: &Value) -> Result<bool, HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Value) -> Result<bool, HandlerError> + Send + Sync,
{
    fn process(&self, payload: &Value) -> Result<bool, HandlerError> {
        self(payload)
    }
}
