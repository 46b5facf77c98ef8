use tracing::{debug, warn};

use crate::broker::{BrokerError, BrokerGateway, CorrelationId, OutboundMessage};
use crate::outbox::{ConfirmSettler, OutboxMessage, OutboxStore};

/// Publishes outbox rows with their row id as confirm correlation.
///
/// Shared by the producer's after-commit publish and the resend scanner, so a
/// row is published the same way whichever path gets to it first.
pub struct RowPublisher<S, G> {
    gateway: G,
    settler: ConfirmSettler<S>,
}

impl<S: Clone, G: Clone> Clone for RowPublisher<S, G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            settler: self.settler.clone(),
        }
    }
}

impl<S, G> RowPublisher<S, G>
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway,
{
    pub fn new(gateway: G, settler: ConfirmSettler<S>) -> Self {
        Self { gateway, settler }
    }

    pub fn settler(&self) -> &ConfirmSettler<S> {
        &self.settler
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Declare the row's topology and publish it. The row is settled later,
    /// by the confirm callback.
    pub fn publish_row(&self, row: &OutboxMessage) -> Result<(), BrokerError> {
        self.gateway.declare_topology(&row.topology())?;
        let message = OutboundMessage {
            exchange: row.exchange.clone(),
            routing_key: row.routing_key.clone(),
            message_id: row.message_id.clone(),
            payload: row.payload.clone().into_bytes(),
            correlation: Some(CorrelationId::for_row(row.id)),
        };
        self.gateway
            .publish(message, self.settler.callback_for(row.id))?;
        debug!(outbox_id = %row.id, message_id = %row.message_id, exchange = %row.exchange, "outbox row published");
        Ok(())
    }

    /// [`publish_row`](Self::publish_row), logging instead of returning the error.
    pub fn publish_row_logged(&self, row: &OutboxMessage) -> bool {
        match self.publish_row(row) {
            Ok(()) => true,
            Err(err) => {
                warn!(outbox_id = %row.id, message_id = %row.message_id, error = %err, "publish failed; row stays pending for the resend scanner");
                false
            }
        }
    }
}
