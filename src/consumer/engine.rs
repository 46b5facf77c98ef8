use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::action::Action;
use super::handler::MessageHandler;
use crate::broker::{
    BrokerError, BrokerGateway, ConsumerHandle, ConsumerSpec, Delivery, DeliveryCallback,
    DeliveryChannel, DeliveryTag, Topology,
};
use crate::cache::{dedup_key, retry_key, DedupCache};
use crate::config::{default_concurrency, ConsumerConfig};
use crate::outbox::ExchangeType;

/// Where a consumer reads from: the exchange, the binding key and the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumeTarget {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub exchange_type: ExchangeType,
}

impl ConsumeTarget {
    /// Topic exchange target.
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
            exchange_type: ExchangeType::Topic,
        }
    }

    pub fn with_exchange_type(mut self, exchange_type: ExchangeType) -> Self {
        self.exchange_type = exchange_type;
        self
    }

    pub fn topology(&self) -> Topology {
        Topology::bound(
            self.exchange.clone(),
            self.exchange_type,
            self.queue.clone(),
            self.routing_key.clone(),
        )
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    retried: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
}

/// Decisions taken by an engine, across all of its workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub accepted: u64,
    pub retried: u64,
    pub rejected: u64,
    /// Accepted deliveries that were duplicates; the handler was not called.
    pub duplicates: u64,
}

/// Settles one delivery exactly once.
///
/// Holds the current action (initially `Retry`) and applies it when dropped,
/// so every exit path, unwinding included, produces one ack or nack.
struct SettleGuard<'a> {
    channel: Option<&'a dyn DeliveryChannel>,
    tag: DeliveryTag,
    action: Action,
}

impl<'a> SettleGuard<'a> {
    fn new(channel: &'a dyn DeliveryChannel, tag: DeliveryTag) -> Self {
        Self {
            channel: Some(channel),
            tag,
            action: Action::default(),
        }
    }

    fn settle(&mut self) -> Option<Result<(), BrokerError>> {
        self.channel
            .take()
            .map(|channel| self.action.apply(channel, self.tag))
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if let Some(Err(err)) = self.settle() {
            error!(tag = %self.tag, action = %self.action, error = %err, "failed to settle delivery");
        }
    }
}

/// Idempotent, bounded-retry message processing.
///
/// For each delivery the engine decides [`Action::Accept`], [`Action::Retry`]
/// or [`Action::Reject`]:
///
/// 1. no message id, or a payload that is not JSON: reject
/// 2. dedup record `{queue}_{message_id}` present: accept without calling the handler
/// 3. handler `Ok(true)`: write the dedup record, accept
/// 4. handler `Ok(false)`: retry until the retry counter reaches `max_retries`, then reject
/// 5. handler `Err`, handler panic, or cache failure: reject
///
/// Cloning shares the cache handle and the counters.
pub struct ConsumerEngine<C> {
    cache: C,
    max_retries: u32,
    dedup_ttl: Duration,
    retry_counter_ttl: Option<Duration>,
    concurrency: Option<usize>,
    prefetch: usize,
    counters: Arc<Counters>,
}

impl<C: Clone> Clone for ConsumerEngine<C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            max_retries: self.max_retries,
            dedup_ttl: self.dedup_ttl,
            retry_counter_ttl: self.retry_counter_ttl,
            concurrency: self.concurrency,
            prefetch: self.prefetch,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<C> ConsumerEngine<C>
where
    C: DedupCache + Clone + 'static,
{
    pub fn new(cache: C) -> Self {
        Self::from_config(cache, &ConsumerConfig::default())
    }

    pub fn from_config(cache: C, config: &ConsumerConfig) -> Self {
        Self {
            cache,
            max_retries: config.max_retries,
            dedup_ttl: config.dedup_ttl(),
            retry_counter_ttl: config.retry_counter_ttl(),
            concurrency: config.concurrency,
            prefetch: config.prefetch.max(1),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Failures tolerated before a message is rejected.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// How long a processed message is remembered. This bounds, but does not
    /// close, the window in which a late redelivery is processed again.
    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    pub fn with_retry_counter_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.retry_counter_ttl = ttl;
        self
    }

    /// Default worker count for [`consume`](Self::consume).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency.max(1));
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            accepted: self.counters.accepted.load(Ordering::SeqCst),
            retried: self.counters.retried.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            duplicates: self.counters.duplicates.load(Ordering::SeqCst),
        }
    }

    /// Decide what to do with `delivery`. Never panics; a panic inside the
    /// handler or the bookkeeping is a reject.
    pub fn decide(&self, delivery: &Delivery, handler: &dyn MessageHandler) -> Action {
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_decide(delivery, handler))) {
            Ok(action) => action,
            Err(_) => {
                error!(queue = %delivery.queue, message_id = ?delivery.message_id, "message processing panicked; rejecting");
                Action::Reject
            }
        }
    }

    /// Decide and settle one delivery: exactly one ack or nack, whatever happens.
    pub fn on_delivery(
        &self,
        delivery: Delivery,
        channel: &dyn DeliveryChannel,
        handler: &dyn MessageHandler,
    ) -> Action {
        let mut guard = SettleGuard::new(channel, delivery.tag);
        guard.action = self.decide(&delivery, handler);
        let action = guard.action;

        let counter = match action {
            Action::Accept => &self.counters.accepted,
            Action::Retry => &self.counters.retried,
            Action::Reject => &self.counters.rejected,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        debug!(
            queue = %delivery.queue,
            message_id = ?delivery.message_id,
            tag = %delivery.tag,
            redelivered = delivery.redelivered,
            %action,
            "delivery decided"
        );
        drop(guard);
        action
    }

    /// Declare `target` and start consuming it with the configured worker count.
    pub fn consume<G, H>(
        &self,
        gateway: &G,
        target: ConsumeTarget,
        handler: H,
    ) -> Result<ConsumerHandle, BrokerError>
    where
        G: BrokerGateway + ?Sized,
        H: MessageHandler + 'static,
    {
        let concurrency = self.concurrency.unwrap_or_else(default_concurrency);
        self.consume_with_concurrency(gateway, target, handler, concurrency)
    }

    /// [`consume`](Self::consume) with an explicit worker count.
    pub fn consume_with_concurrency<G, H>(
        &self,
        gateway: &G,
        target: ConsumeTarget,
        handler: H,
        concurrency: usize,
    ) -> Result<ConsumerHandle, BrokerError>
    where
        G: BrokerGateway + ?Sized,
        H: MessageHandler + 'static,
    {
        gateway.declare_topology(&target.topology())?;

        let engine = self.clone();
        let handler = Arc::new(handler);
        let on_message: DeliveryCallback =
            Arc::new(move |delivery: Delivery, channel: &dyn DeliveryChannel| {
                engine.on_delivery(delivery, channel, handler.as_ref());
            });

        let spec = ConsumerSpec {
            queue: target.queue.clone(),
            concurrency,
            prefetch: self.prefetch,
        };
        let handle = gateway.start_consumer(spec, on_message)?;
        info!(
            exchange = %target.exchange,
            routing_key = %target.routing_key,
            queue = %target.queue,
            workers = handle.worker_count(),
            prefetch = self.prefetch,
            "consumer started"
        );
        Ok(handle)
    }

    fn try_decide(&self, delivery: &Delivery, handler: &dyn MessageHandler) -> Action {
        let queue = delivery.queue.as_str();
        let Some(message_id) = delivery.message_id.as_deref().filter(|id| !id.trim().is_empty()) else {
            warn!(queue, tag = %delivery.tag, "delivery has no message id; rejecting");
            return Action::Reject;
        };

        let payload: Value = match serde_json::from_slice(&delivery.payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(queue, message_id, error = %err, "payload is not valid JSON; rejecting");
                return Action::Reject;
            }
        };

        let dedup = dedup_key(queue, message_id);
        match self.cache.exists(&dedup) {
            Ok(true) => {
                self.counters.duplicates.fetch_add(1, Ordering::SeqCst);
                info!(queue, message_id, "duplicate delivery; acking without processing");
                return Action::Accept;
            }
            Ok(false) => {}
            Err(err) => {
                error!(queue, message_id, error = %err, "dedup check failed; rejecting");
                return Action::Reject;
            }
        }

        match handler.process(&payload) {
            Ok(true) => {
                if let Err(err) = self.cache.set(&dedup, message_id, Some(self.dedup_ttl)) {
                    error!(queue, message_id, error = %err, "processed, but the dedup record was not written");
                }
                Action::Accept
            }
            Ok(false) => self.on_failure(queue, message_id),
            Err(err) => {
                warn!(queue, message_id, error = %err, "handler error; rejecting");
                Action::Reject
            }
        }
    }

    /// Bookkeeping for a transient failure: retry until the counter reaches
    /// `max_retries`, then reject.
    fn on_failure(&self, queue: &str, message_id: &str) -> Action {
        let key = retry_key(queue, message_id);
        let current = match self.cache.get(&key) {
            Ok(None) => None,
            Ok(Some(value)) => match value.trim().parse::<i64>() {
                Ok(count) => Some(count),
                Err(_) => {
                    error!(queue, message_id, value = %value, "retry counter is not a number; rejecting");
                    return Action::Reject;
                }
            },
            Err(err) => {
                error!(queue, message_id, error = %err, "retry counter read failed; rejecting");
                return Action::Reject;
            }
        };

        if current.unwrap_or(0) >= i64::from(self.max_retries) {
            warn!(queue, message_id, retries = current.unwrap_or(0), "retries exhausted; rejecting");
            return Action::Reject;
        }

        let count = match current {
            None => match self.cache.set_if_absent(&key, "1", self.retry_counter_ttl) {
                Ok(true) => Ok(1),
                // Another worker created it first.
                Ok(false) => self.cache.incr(&key),
                Err(err) => Err(err),
            },
            Some(_) => self.cache.incr(&key),
        };

        match count {
            Ok(count) => {
                debug!(queue, message_id, count, "handler failed; requeueing");
                Action::Retry
            }
            Err(err) => {
                error!(queue, message_id, error = %err, "retry counter update failed; rejecting");
                Action::Reject
            }
        }
    }
}
