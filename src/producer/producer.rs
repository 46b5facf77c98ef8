use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::SendError;
use super::publish::RowPublisher;
use crate::broker::{BrokerGateway, Confirm, ConfirmOutcome, OutboundMessage, Topology};
use crate::config::ProducerConfig;
use crate::outbox::{
    AckPolicy, ConfirmSettler, ConfirmStats, ExchangeType, OutboxId, OutboxMessage, OutboxStore,
    UnitOfWork,
};

/// Everything needed to write one outbox row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxDraft {
    pub exchange: String,
    pub routing_key: String,
    pub payload: String,
    pub queue_name: Option<String>,
    /// `None` uses the producer's default exchange type.
    pub exchange_type: Option<ExchangeType>,
    pub app_type: Option<String>,
}

impl OutboxDraft {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload: payload.into(),
            queue_name: None,
            exchange_type: None,
            app_type: None,
        }
    }

    pub fn with_queue_name(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    pub fn with_exchange_type(mut self, exchange_type: ExchangeType) -> Self {
        self.exchange_type = Some(exchange_type);
        self
    }

    pub fn with_app_type(mut self, app_type: impl Into<String>) -> Self {
        self.app_type = Some(app_type.into());
        self
    }
}

/// Transactional outbox producer.
///
/// `send` writes the message as an outbox row and commits; the publish runs
/// after the commit and is confirmed asynchronously. The caller-visible
/// guarantee is durability: once `send` returns `true` the message will be
/// published eventually, by this producer or by the resend scanner.
///
/// ```
/// use reliable_mq::broker::InMemoryBroker;
/// use reliable_mq::outbox::{InMemoryOutboxStore, OutboxStore, PendingPage};
/// use reliable_mq::producer::OutboxProducer;
///
/// let store = InMemoryOutboxStore::new();
/// let broker = InMemoryBroker::new();
/// let producer = OutboxProducer::new(store.clone(), broker.clone());
///
/// assert!(producer.send("orders", "order.create", r#"{"id":1}"#));
/// // The in-memory broker confirms inline, so the row is already settled.
/// assert!(store.query_pending(PendingPage::first(10)).unwrap().is_empty());
/// assert_eq!(broker.published().len(), 1);
/// ```
pub struct OutboxProducer<S, G> {
    store: S,
    publisher: RowPublisher<S, G>,
    exchange_type: ExchangeType,
}

impl<S: Clone, G: Clone> Clone for OutboxProducer<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            exchange_type: self.exchange_type,
        }
    }
}

impl<S, G> OutboxProducer<S, G>
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
{
    pub fn new(store: S, gateway: G) -> Self {
        let settler = ConfirmSettler::new(store.clone(), AckPolicy::default());
        Self {
            store,
            publisher: RowPublisher::new(gateway, settler),
            exchange_type: ExchangeType::default(),
        }
    }

    pub fn from_config(store: S, gateway: G, config: &ProducerConfig) -> Self {
        Self::new(store, gateway)
            .with_ack_policy(config.ack_policy)
            .with_exchange_type(config.exchange_type)
    }

    pub fn with_ack_policy(self, policy: AckPolicy) -> Self {
        let settler = ConfirmSettler::new(self.store.clone(), policy);
        Self {
            publisher: RowPublisher::new(self.publisher.gateway().clone(), settler),
            ..self
        }
    }

    /// Exchange type for sends that do not name one.
    pub fn with_exchange_type(mut self, exchange_type: ExchangeType) -> Self {
        self.exchange_type = exchange_type;
        self
    }

    /// Share the confirm settler (and its counters) with another component.
    pub fn with_settler(self, settler: ConfirmSettler<S>) -> Self {
        Self {
            publisher: RowPublisher::new(self.publisher.gateway().clone(), settler),
            ..self
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        self.publisher.gateway()
    }

    pub fn settler(&self) -> &ConfirmSettler<S> {
        self.publisher.settler()
    }

    pub fn confirm_stats(&self) -> ConfirmStats {
        self.publisher.settler().stats()
    }

    /// Durably accept a message. Returns `false` only if persistence failed.
    pub fn send(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> bool {
        self.send_with(OutboxDraft::new(exchange, routing_key, payload))
    }

    /// [`send`](Self::send) for a fully specified draft.
    pub fn send_with(&self, draft: OutboxDraft) -> bool {
        match self.try_send_with(draft) {
            Ok(_) => true,
            Err(err) => {
                error!(error = %err, "send failed; message not accepted");
                false
            }
        }
    }

    /// Durably accept a message in a transaction of its own.
    pub fn try_send(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<OutboxId, SendError> {
        self.try_send_with(OutboxDraft::new(exchange, routing_key, payload))
    }

    pub fn try_send_with(&self, draft: OutboxDraft) -> Result<OutboxId, SendError> {
        let mut uow = UnitOfWork::begin(&self.store)?;
        let id = self.send_in_with(&mut uow, draft)?;
        uow.commit()?;
        Ok(id)
    }

    /// Stage a message inside the caller's unit of work.
    ///
    /// Nothing is published unless the caller commits `uow`. If it rolls back,
    /// the row and the publish both vanish.
    pub fn send_in(
        &self,
        uow: &mut UnitOfWork<S::Transaction>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<OutboxId, SendError> {
        self.send_in_with(uow, OutboxDraft::new(exchange, routing_key, payload))
    }

    pub fn send_in_with(
        &self,
        uow: &mut UnitOfWork<S::Transaction>,
        draft: OutboxDraft,
    ) -> Result<OutboxId, SendError> {
        let id = self.store.next_id()?;
        let mut row = OutboxMessage::pending(
            id,
            Uuid::new_v4().to_string(),
            draft.exchange,
            draft.routing_key,
            draft.payload,
        )
        .with_exchange_type(draft.exchange_type.unwrap_or(self.exchange_type));
        row.queue_name = draft.queue_name;
        row.app_type = draft.app_type;

        self.store.insert(uow.transaction_mut(), row.clone())?;
        debug!(outbox_id = %id, message_id = %row.message_id, "outbox row staged");

        let publisher = self.publisher.clone();
        uow.after_commit(move || {
            publisher.publish_row_logged(&row);
        });
        Ok(id)
    }

    /// Fire-and-forget publish: no outbox row, no delivery guarantee.
    ///
    /// Returns whether the broker accepted the publish call. A later nack is
    /// only logged.
    pub fn send_simple(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<String>,
    ) -> bool {
        let exchange = exchange.into();
        let gateway = self.publisher.gateway();
        if let Err(err) = gateway.declare_topology(&Topology::exchange(exchange.clone(), self.exchange_type)) {
            warn!(exchange = %exchange, error = %err, "fire-and-forget declare failed");
            return false;
        }

        let message = OutboundMessage {
            exchange: exchange.clone(),
            routing_key: routing_key.into(),
            message_id: Uuid::new_v4().to_string(),
            payload: payload.into().into_bytes(),
            correlation: None,
        };
        let message_id = message.message_id.clone();
        let on_confirm = Box::new(move |confirm: Confirm| {
            if let ConfirmOutcome::Nack { reason } = confirm.outcome {
                warn!(message_id = %message_id, %reason, "fire-and-forget message nacked");
            }
        });

        match gateway.publish(message, on_confirm) {
            Ok(()) => {
                info!(exchange = %exchange, "fire-and-forget message published");
                true
            }
            Err(err) => {
                warn!(exchange = %exchange, error = %err, "fire-and-forget publish failed");
                false
            }
        }
    }
}
