//! In-memory broker for testing and single-process scenarios.
//!
//! Implements the full [`BrokerGateway`] contract without external services:
//! - exchanges, queues and bindings with direct/fanout/topic routing
//! - publisher confirms, inline (`Ack`/`Nack`) or held until settled (`Manual`)
//! - manual acknowledgement with per-worker prefetch
//! - requeue on `nack(requeue = true)`, dead-lettering on `nack(requeue = false)`
//! - an availability switch to simulate the broker going away

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::error::BrokerError;
use super::gateway::{
    BrokerGateway, Confirm, ConfirmCallback, ConsumerHandle, ConsumerSpec, CorrelationId,
    Delivery, DeliveryCallback, DeliveryChannel, DeliveryTag, OutboundMessage, Topology,
};
use super::topic;
use crate::outbox::ExchangeType;

/// How the broker answers publisher confirms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Ack every publish before `publish` returns.
    #[default]
    Ack,
    /// Nack every publish before `publish` returns.
    Nack,
    /// Hold confirms until [`InMemoryBroker::settle_confirms`] is called.
    Manual,
}

/// How a delivery was settled by its consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
    Reject,
}

/// One accepted publish, kept for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedRecord {
    pub exchange: String,
    pub routing_key: String,
    pub message_id: String,
    pub correlation: Option<CorrelationId>,
    pub routed_to: Vec<String>,
}

/// One settled delivery, kept for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementRecord {
    pub tag: DeliveryTag,
    pub queue: String,
    pub message_id: Option<String>,
    pub settlement: Settlement,
}

/// A message rejected without requeue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug)]
struct Envelope {
    exchange: String,
    routing_key: String,
    message_id: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    unacked: HashMap<DeliveryTag, (usize, Envelope)>,
    dead_letters: Vec<Envelope>,
}

impl QueueState {
    fn held_by(&self, worker: usize) -> usize {
        self.unacked.values().filter(|(owner, _)| *owner == worker).count()
    }
}

struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, ExchangeType>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
}

type HeldConfirm = (Option<CorrelationId>, ConfirmCallback);

struct Inner {
    state: Mutex<State>,
    wake: Condvar,
    next_tag: AtomicU64,
    next_worker: AtomicUsize,
    available: AtomicBool,
    confirm_mode: Mutex<ConfirmMode>,
    held_confirms: Mutex<Vec<HeldConfirm>>,
    published: Mutex<Vec<PublishedRecord>>,
    settlements: Mutex<Vec<SettlementRecord>>,
}

/// In-memory broker.
///
/// Cloning creates another handle to the same broker.
///
/// ```
/// use reliable_mq::broker::{BrokerGateway, InMemoryBroker, OutboundMessage, Topology};
/// use reliable_mq::outbox::ExchangeType;
///
/// let broker = InMemoryBroker::new();
/// broker
///     .declare_topology(&Topology::bound("orders", ExchangeType::Topic, "orders.q", "order.*"))
///     .unwrap();
///
/// let message = OutboundMessage {
///     exchange: "orders".into(),
///     routing_key: "order.create".into(),
///     message_id: "m-1".into(),
///     payload: br#"{"id":1}"#.to_vec(),
///     correlation: None,
/// };
/// broker.publish(message, Box::new(|confirm| assert!(confirm.is_ack()))).unwrap();
/// assert_eq!(broker.queue_depth("orders.q"), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

const IDLE_WAIT: Duration = Duration::from_millis(20);

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
                next_tag: AtomicU64::new(1),
                next_worker: AtomicUsize::new(0),
                available: AtomicBool::new(true),
                confirm_mode: Mutex::new(ConfirmMode::default()),
                held_confirms: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                settlements: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_confirm_mode(self, mode: ConfirmMode) -> Self {
        self.set_confirm_mode(mode);
        self
    }

    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        if let Ok(mut current) = self.inner.confirm_mode.lock() {
            *current = mode;
        }
    }

    /// Simulate the broker becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Fire every held confirm with an ack (or a nack), from the calling thread.
    /// Returns how many confirms fired.
    pub fn settle_confirms(&self, ack: bool) -> usize {
        let held = match self.inner.held_confirms.lock() {
            Ok(mut held) => std::mem::take(&mut *held),
            Err(_) => return 0,
        };
        let count = held.len();
        for (correlation, callback) in held {
            let confirm = if ack {
                Confirm::ack(correlation)
            } else {
                Confirm::nack(correlation, "nacked by broker")
            };
            callback(confirm);
        }
        count
    }

    /// Drop every held confirm without firing it, as if the connection died
    /// before the broker answered.
    pub fn lose_confirms(&self) -> usize {
        match self.inner.held_confirms.lock() {
            Ok(mut held) => held.drain(..).count(),
            Err(_) => 0,
        }
    }

    pub fn held_confirms(&self) -> usize {
        self.inner.held_confirms.lock().map(|held| held.len()).unwrap_or(0)
    }

    /// Every accepted publish, in order.
    pub fn published(&self) -> Vec<PublishedRecord> {
        self.inner
            .published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    /// Accepted publishes carrying `message_id`.
    pub fn publish_count(&self, message_id: &str) -> usize {
        self.published()
            .iter()
            .filter(|record| record.message_id == message_id)
            .count()
    }

    /// Every settled delivery, in order.
    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.inner
            .settlements
            .lock()
            .map(|settlements| settlements.clone())
            .unwrap_or_default()
    }

    /// Messages waiting to be delivered.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    /// Delivered messages not yet acked or nacked.
    pub fn unacked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked.len())
    }

    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.with_queue(queue, |q| {
            q.dead_letters
                .iter()
                .map(|env| DeadLetter {
                    message_id: env.message_id.clone(),
                    payload: env.payload.clone(),
                })
                .collect()
        })
    }

    /// Put a message straight onto a declared queue, bypassing exchanges.
    /// Lets tests deliver messages a well-behaved producer would never send.
    pub fn enqueue_raw(
        &self,
        queue: &str,
        message_id: Option<&str>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), BrokerError> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("enqueue_raw"))?;
        let target = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        target.ready.push_back(Envelope {
            exchange: String::new(),
            routing_key: queue.to_string(),
            message_id: message_id.map(str::to_string),
            payload: payload.into(),
            redelivered: false,
        });
        self.inner.wake.notify_all();
        Ok(())
    }

    fn with_queue<T: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        let Ok(state) = self.inner.state.lock() else {
            return T::default();
        };
        state.queues.get(queue).map(f).unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker switched off".into()))
        }
    }

    fn confirm_mode(&self) -> ConfirmMode {
        self.inner
            .confirm_mode
            .lock()
            .map(|mode| *mode)
            .unwrap_or_default()
    }

    fn record_settlement(&self, queue: &str, tag: DeliveryTag, env: &Envelope, settlement: Settlement) {
        if let Ok(mut settlements) = self.inner.settlements.lock() {
            settlements.push(SettlementRecord {
                tag,
                queue: queue.to_string(),
                message_id: env.message_id.clone(),
                settlement,
            });
        }
    }

    /// Block until a delivery is available for `worker` or the consumer stops.
    fn next_delivery(
        &self,
        queue: &str,
        worker: usize,
        prefetch: usize,
        stop: &AtomicBool,
    ) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("next_delivery"))?;
        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if self.inner.available.load(Ordering::SeqCst) {
                if let Some(q) = state.queues.get_mut(queue) {
                    if q.held_by(worker) < prefetch {
                        if let Some(env) = q.ready.pop_front() {
                            let tag = DeliveryTag(self.inner.next_tag.fetch_add(1, Ordering::SeqCst));
                            let delivery = Delivery {
                                tag,
                                queue: queue.to_string(),
                                exchange: env.exchange.clone(),
                                routing_key: env.routing_key.clone(),
                                message_id: env.message_id.clone(),
                                payload: env.payload.clone(),
                                redelivered: env.redelivered,
                            };
                            q.unacked.insert(tag, (worker, env));
                            return Ok(Some(delivery));
                        }
                    }
                }
            }
            let (guard, _) = self
                .inner
                .wake
                .wait_timeout(state, IDLE_WAIT)
                .map_err(|_| BrokerError::LockPoisoned("next_delivery wait"))?;
            state = guard;
        }
    }

    /// Requeue whatever `worker` still holds, as a broker does when a
    /// consumer's channel dies with unacked messages.
    fn recover_worker(&self, queue: &str, worker: usize) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if let Some(q) = state.queues.get_mut(queue) {
            let orphaned: Vec<DeliveryTag> = q
                .unacked
                .iter()
                .filter(|(_, (owner, _))| *owner == worker)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in orphaned {
                if let Some((_, mut env)) = q.unacked.remove(&tag) {
                    env.redelivered = true;
                    q.ready.push_front(env);
                }
            }
        }
        self.inner.wake.notify_all();
    }

    fn settle(&self, queue: &str, tag: DeliveryTag, settlement: Settlement) -> Result<(), BrokerError> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("settle"))?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        let (_, mut env) = q
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag.0))?;

        self.record_settlement(queue, tag, &env, settlement);
        match settlement {
            Settlement::Ack => {}
            Settlement::Requeue => {
                env.redelivered = true;
                q.ready.push_front(env);
            }
            Settlement::Reject => q.dead_letters.push(env),
        }
        self.inner.wake.notify_all();
        Ok(())
    }
}

/// Per-consumer acknowledgement channel.
struct InMemoryChannel {
    broker: InMemoryBroker,
    queue: String,
}

impl DeliveryChannel for InMemoryChannel {
    fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.broker.settle(&self.queue, tag, Settlement::Ack)
    }

    fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let settlement = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Reject
        };
        self.broker.settle(&self.queue, tag, settlement)
    }
}

impl BrokerGateway for InMemoryBroker {
    fn declare_topology(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("declare_topology"))?;

        match state.exchanges.get(&topology.exchange) {
            Some(existing) if *existing != topology.exchange_type => {
                return Err(BrokerError::TopologyConflict(format!(
                    "exchange {} already declared as {}, not {}",
                    topology.exchange, existing, topology.exchange_type
                )));
            }
            Some(_) => {}
            None => {
                state
                    .exchanges
                    .insert(topology.exchange.clone(), topology.exchange_type);
            }
        }

        if let Some(queue) = &topology.queue {
            state.queues.entry(queue.clone()).or_default();
            let bound = state.bindings.iter().any(|b| {
                b.exchange == topology.exchange && b.queue == *queue && b.pattern == topology.routing_key
            });
            if !bound {
                state.bindings.push(Binding {
                    exchange: topology.exchange.clone(),
                    queue: queue.clone(),
                    pattern: topology.routing_key.clone(),
                });
            }
        }
        Ok(())
    }

    fn publish(&self, message: OutboundMessage, on_confirm: ConfirmCallback) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let routed_to = {
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| BrokerError::LockPoisoned("publish"))?;
            let exchange_type = *state
                .exchanges
                .get(&message.exchange)
                .ok_or_else(|| BrokerError::UnknownExchange(message.exchange.clone()))?;

            let mut targets: Vec<String> = state
                .bindings
                .iter()
                .filter(|b| b.exchange == message.exchange)
                .filter(|b| topic::routes(exchange_type, &b.pattern, &message.routing_key))
                .map(|b| b.queue.clone())
                .collect();
            targets.sort();
            targets.dedup();

            for queue in &targets {
                if let Some(q) = state.queues.get_mut(queue) {
                    q.ready.push_back(Envelope {
                        exchange: message.exchange.clone(),
                        routing_key: message.routing_key.clone(),
                        message_id: Some(message.message_id.clone()),
                        payload: message.payload.clone(),
                        redelivered: false,
                    });
                }
            }
            self.inner.wake.notify_all();
            targets
        };

        if routed_to.is_empty() {
            debug!(exchange = %message.exchange, routing_key = %message.routing_key, "published message matched no binding");
        }
        if let Ok(mut published) = self.inner.published.lock() {
            published.push(PublishedRecord {
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                message_id: message.message_id.clone(),
                correlation: message.correlation,
                routed_to,
            });
        }

        match self.confirm_mode() {
            ConfirmMode::Ack => on_confirm(Confirm::ack(message.correlation)),
            ConfirmMode::Nack => on_confirm(Confirm::nack(message.correlation, "nacked by broker")),
            ConfirmMode::Manual => {
                let mut held = self
                    .inner
                    .held_confirms
                    .lock()
                    .map_err(|_| BrokerError::LockPoisoned("hold confirm"))?;
                held.push((message.correlation, on_confirm));
            }
        }
        Ok(())
    }

    fn start_consumer(
        &self,
        spec: ConsumerSpec,
        on_message: DeliveryCallback,
    ) -> Result<ConsumerHandle, BrokerError> {
        self.ensure_available()?;
        if spec.concurrency == 0 {
            return Err(BrokerError::InvalidSpec("concurrency must be at least 1".into()));
        }
        if spec.prefetch == 0 {
            return Err(BrokerError::InvalidSpec("prefetch must be at least 1".into()));
        }
        {
            let state = self
                .inner
                .state
                .lock()
                .map_err(|_| BrokerError::LockPoisoned("start_consumer"))?;
            if !state.queues.contains_key(&spec.queue) {
                return Err(BrokerError::UnknownQueue(spec.queue.clone()));
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(spec.concurrency);
        for _ in 0..spec.concurrency {
            let worker = self.inner.next_worker.fetch_add(1, Ordering::SeqCst);
            let broker = self.clone();
            let stop = Arc::clone(&stop);
            let on_message = Arc::clone(&on_message);
            let queue = spec.queue.clone();
            let prefetch = spec.prefetch;

            let handle = thread::Builder::new()
                .name(format!("consumer-{queue}-{worker}"))
                .spawn(move || {
                    let channel = InMemoryChannel {
                        broker: broker.clone(),
                        queue: queue.clone(),
                    };
                    loop {
                        match broker.next_delivery(&queue, worker, prefetch, &stop) {
                            Ok(Some(delivery)) => {
                                let tag = delivery.tag;
                                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                    on_message(delivery, &channel)
                                }));
                                if outcome.is_err() {
                                    warn!(queue = %queue, tag = %tag, "consumer callback panicked; requeueing its deliveries");
                                    broker.recover_worker(&queue, worker);
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                error!(queue = %queue, error = %err, "consumer worker stopping");
                                break;
                            }
                        }
                    }
                    broker.recover_worker(&queue, worker);
                })
                .map_err(|err| BrokerError::Unavailable(format!("spawn consumer worker: {err}")))?;
            workers.push(handle);
        }

        Ok(ConsumerHandle::new(spec.queue, stop, workers))
    }
}
