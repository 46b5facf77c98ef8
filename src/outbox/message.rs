use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::broker::Topology;

/// Row identifier, assigned by [`OutboxStore::next_id`](super::OutboxStore::next_id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutboxId(pub u64);

impl OutboxId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutboxId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(OutboxId)
    }
}

/// Status of an outbox row.
///
/// A row is `Pending` until its publish is confirmed. Depending on the
/// [`AckPolicy`](super::AckPolicy) a confirmed row is either deleted
/// or flipped to `Sent`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Sent,
}

/// Exchange kinds understood by the broker gateway.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    Fanout,
    #[default]
    Topic,
    Headers,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durably accepted outbound message.
///
/// The row exists exactly as long as its publish has not been confirmed by
/// the broker. `message_id` travels with the published message and is what
/// consumers deduplicate on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxId,
    pub message_id: String,
    pub payload: String,
    pub created_at: SystemTime,
    pub exchange: String,
    pub routing_key: String,
    pub queue_name: Option<String>,
    pub exchange_type: ExchangeType,
    pub app_type: Option<String>,
    pub status: OutboxStatus,
}

impl OutboxMessage {
    /// Create a new pending row.
    pub fn pending(
        id: OutboxId,
        message_id: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id,
            message_id: message_id.into(),
            payload: payload.into(),
            created_at: SystemTime::now(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue_name: None,
            exchange_type: ExchangeType::default(),
            app_type: None,
            status: OutboxStatus::Pending,
        }
    }

    pub fn with_queue_name(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    pub fn with_app_type(mut self, app_type: impl Into<String>) -> Self {
        self.app_type = Some(app_type.into());
        self
    }

    pub fn with_exchange_type(mut self, exchange_type: ExchangeType) -> Self {
        self.exchange_type = exchange_type;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    /// How long ago the row was created. A clock that went backwards reads as zero.
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }

    /// Topology the row must be published into.
    ///
    /// Includes the queue binding when the row names a queue.
    pub fn topology(&self) -> Topology {
        Topology {
            exchange: self.exchange.clone(),
            exchange_type: self.exchange_type,
            queue: self.queue_name.clone(),
            routing_key: self.routing_key.clone(),
        }
    }
}
