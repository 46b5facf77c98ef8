use std::fmt;

use crate::broker::{BrokerError, DeliveryChannel, DeliveryTag};

/// What to tell the broker about a delivery.
///
/// Defaults to `Retry`, so a delivery whose processing never reached a
/// decision is requeued rather than dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Action {
    /// Ack.
    Accept,
    /// Nack with requeue.
    #[default]
    Retry,
    /// Nack without requeue. The broker drops or dead-letters the message.
    Reject,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Retry => "retry",
            Action::Reject => "reject",
        }
    }

    /// Send the matching ack or nack for `tag`.
    pub fn apply(self, channel: &dyn DeliveryChannel, tag: DeliveryTag) -> Result<(), BrokerError> {
        match self {
            Action::Accept => channel.ack(tag),
            Action::Retry => channel.nack(tag, true),
            Action::Reject => channel.nack(tag, false),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
