//! Core broker gateway contract.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::error::BrokerError;
use crate::outbox::{ExchangeType, OutboxId};

/// Typed correlation token carried from a publish to its confirm.
///
/// Wraps the id of the outbox row being published, so a confirm can be
/// matched back to the row it settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(OutboxId);

impl CorrelationId {
    pub fn for_row(id: OutboxId) -> Self {
        Self(id)
    }

    pub fn row_id(&self) -> OutboxId {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a correlation token from a text-carrying wire format.
impl FromStr for CorrelationId {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<OutboxId>()
            .map(CorrelationId)
            .map_err(|_| BrokerError::InvalidCorrelation(s.to_string()))
    }
}

/// Exchange, optional queue and the binding between them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topology {
    pub exchange: String,
    pub exchange_type: ExchangeType,
    pub queue: Option<String>,
    pub routing_key: String,
}

impl Topology {
    /// Exchange only, the way a producer needs it.
    pub fn exchange(name: impl Into<String>, exchange_type: ExchangeType) -> Self {
        Self {
            exchange: name.into(),
            exchange_type,
            queue: None,
            routing_key: String::new(),
        }
    }

    /// Exchange, queue, and a binding with `routing_key`.
    pub fn bound(
        exchange: impl Into<String>,
        exchange_type: ExchangeType,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            exchange_type,
            queue: Some(queue.into()),
            routing_key: routing_key.into(),
        }
    }
}

/// A message on its way to the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    /// Consumer-side dedup key.
    pub message_id: String,
    pub payload: Vec<u8>,
    /// `None` for fire-and-forget publishes.
    pub correlation: Option<CorrelationId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Ack,
    Nack { reason: String },
}

/// Publisher confirm for one publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirm {
    pub correlation: Option<CorrelationId>,
    pub outcome: ConfirmOutcome,
}

impl Confirm {
    pub fn ack(correlation: Option<CorrelationId>) -> Self {
        Self {
            correlation,
            outcome: ConfirmOutcome::Ack,
        }
    }

    pub fn nack(correlation: Option<CorrelationId>, reason: impl Into<String>) -> Self {
        Self {
            correlation,
            outcome: ConfirmOutcome::Nack {
                reason: reason.into(),
            },
        }
    }

    pub fn is_ack(&self) -> bool {
        self.outcome == ConfirmOutcome::Ack
    }
}

/// Invoked exactly once per accepted publish, possibly on another thread.
pub type ConfirmCallback = Box<dyn FnOnce(Confirm) + Send + 'static>;

/// Broker-assigned handle for one delivery, used to ack or nack it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
    /// Set when the broker has handed this message out before.
    pub redelivered: bool,
}

impl Delivery {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Manual acknowledgement for deliveries.
pub trait DeliveryChannel: Send + Sync {
    fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Negative acknowledgement. With `requeue` the broker redelivers the
    /// message; without it the message is dropped or dead-lettered.
    fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;
}

/// Called once per delivery by a consumer worker.
pub type DeliveryCallback = Arc<dyn Fn(Delivery, &dyn DeliveryChannel) + Send + Sync + 'static>;

/// Queue consumption parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerSpec {
    pub queue: String,
    /// Number of independent workers.
    pub concurrency: usize,
    /// Unacknowledged deliveries a single worker may hold.
    pub prefetch: usize,
}

/// Running consumer. Stops its workers on [`stop`](Self::stop) or drop.
pub struct ConsumerHandle {
    queue: String,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn new(queue: impl Into<String>, stop: Arc<AtomicBool>, workers: Vec<JoinHandle<()>>) -> Self {
        Self {
            queue: queue.into(),
            stop,
            workers,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Signal the workers to stop without waiting.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Signal the workers to stop and wait for them. A worker busy with a
    /// delivery finishes (and settles) it first.
    pub fn stop(mut self) {
        self.signal_stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Abstraction over the message broker.
///
/// Implementations might include:
/// - `InMemoryBroker` - for tests and single-process use
/// - an AMQP 0.9.1 gateway with publisher confirms enabled
pub trait BrokerGateway: Send + Sync {
    /// Declare exchange, queue and binding. Repeated calls are safe.
    fn declare_topology(&self, topology: &Topology) -> Result<(), BrokerError>;

    /// Publish with a publisher confirm.
    ///
    /// On `Ok`, `on_confirm` is invoked exactly once, possibly on another
    /// thread. On `Err`, `on_confirm` is dropped without being invoked.
    fn publish(&self, message: OutboundMessage, on_confirm: ConfirmCallback) -> Result<(), BrokerError>;

    /// Start `spec.concurrency` workers on `spec.queue` with manual acknowledgement.
    fn start_consumer(
        &self,
        spec: ConsumerSpec,
        on_message: DeliveryCallback,
    ) -> Result<ConsumerHandle, BrokerError>;
}

impl<G: BrokerGateway + ?Sized> BrokerGateway for Arc<G> {
    fn declare_topology(&self, topology: &Topology) -> Result<(), BrokerError> {
        (**self).declare_topology(topology)
    }

    fn publish(&self, message: OutboundMessage, on_confirm: ConfirmCallback) -> Result<(), BrokerError> {
        (**self).publish(message, on_confirm)
    }

    fn start_consumer(
        &self,
        spec: ConsumerSpec,
        on_message: DeliveryCallback,
    ) -> Result<ConsumerHandle, BrokerError> {
        (**self).start_consumer(spec, on_message)
    }
}
