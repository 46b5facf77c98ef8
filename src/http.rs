//! HTTP trigger endpoints for manual testing.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `POST /example/send` - enqueue a demo order through the outbox producer.
//! - `POST /example/consume` - start a consumer on the demo queue that logs what it receives.
//!
//! Both answer `{ "result": "0", "msg": ... }` on success and `"result": "1"` on failure.
//!
//! ## Example
//!
//! ```ignore
//! let state = TriggerState::new(producer, ConsumerEngine::new(cache));
//! reliable_mq::http::serve(state, "0.0.0.0:3000").await?;
//! ```

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::broker::{BrokerError, BrokerGateway, ConsumerHandle};
use crate::cache::DedupCache;
use crate::consumer::{ConsumeTarget, ConsumerEngine, HandlerError};
use crate::outbox::OutboxStore;
use crate::producer::OutboxProducer;

pub const DEMO_EXCHANGE: &str = "crm";
pub const DEMO_ROUTING_KEY: &str = "crm.order.create";
pub const DEMO_QUEUE: &str = "crm.order";

/// Shared state of the trigger endpoints.
pub struct TriggerState<S, G, C> {
    producer: OutboxProducer<S, G>,
    engine: ConsumerEngine<C>,
    target: ConsumeTarget,
    consumers: Arc<Mutex<Vec<ConsumerHandle>>>,
}

impl<S: Clone, G: Clone, C: Clone> Clone for TriggerState<S, G, C> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            engine: self.engine.clone(),
            target: self.target.clone(),
            consumers: Arc::clone(&self.consumers),
        }
    }
}

impl<S, G, C> TriggerState<S, G, C>
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
    C: DedupCache + Clone + 'static,
{
    pub fn new(producer: OutboxProducer<S, G>, engine: ConsumerEngine<C>) -> Self {
        Self {
            producer,
            engine,
            target: ConsumeTarget::new(DEMO_EXCHANGE, DEMO_ROUTING_KEY, DEMO_QUEUE),
            consumers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_target(mut self, target: ConsumeTarget) -> Self {
        self.target = target;
        self
    }

    pub fn target(&self) -> &ConsumeTarget {
        &self.target
    }

    /// Consumers started through `/example/consume`.
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Stop every consumer started through `/example/consume`.
    pub fn stop_consumers(&self) {
        if let Ok(mut consumers) = self.consumers.lock() {
            for handle in consumers.drain(..) {
                handle.stop();
            }
        }
    }
}

/// Build an axum `Router` serving the trigger endpoints.
pub fn router<S, G, C>(state: TriggerState<S, G, C>) -> Router
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
    C: DedupCache + Clone + 'static,
{
    Router::new()
        .route("/example/send", post(send_handler::<S, G, C>))
        .route("/example/consume", post(consume_handler::<S, G, C>))
        .with_state(state)
}

/// Serve the trigger endpoints at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve<S, G, C>(state: TriggerState<S, G, C>, addr: &str) -> Result<(), std::io::Error>
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
    C: DedupCache + Clone + 'static,
{
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "trigger endpoints listening");
    axum::serve(listener, app).await
}

/// Random alphanumeric string of `len` characters.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// The demo order message: current time in millis plus a random order number.
pub fn demo_order() -> Value {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    json!({ "id": millis, "orderNum": random_string(12) })
}

fn reply(status: StatusCode, result: &str, msg: impl Into<Value>) -> axum::response::Response {
    (status, Json(json!({ "result": result, "msg": msg.into() }))).into_response()
}

async fn send_handler<S, G, C>(State(state): State<TriggerState<S, G, C>>) -> impl IntoResponse
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
    C: DedupCache + Clone + 'static,
{
    let order = demo_order().to_string();
    let payload = order.clone();
    // The commit runs the publish inline against the gateway.
    let sent = tokio::task::spawn_blocking(move || {
        let target = &state.target;
        state
            .producer
            .send(target.exchange.clone(), target.routing_key.clone(), payload)
    })
    .await;

    match sent {
        Ok(true) => reply(StatusCode::OK, "0", order),
        Ok(false) => reply(StatusCode::INTERNAL_SERVER_ERROR, "1", "message not accepted"),
        Err(err) => {
            error!(error = %err, "send task failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "1", "send task failed")
        }
    }
}

async fn consume_handler<S, G, C>(State(state): State<TriggerState<S, G, C>>) -> impl IntoResponse
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
    C: DedupCache + Clone + 'static,
{
    let started = tokio::task::spawn_blocking(move || -> Result<Option<usize>, BrokerError> {
        let handler = |payload: &Value| -> Result<bool, HandlerError> {
            info!(%payload, "demo consumer received message");
            Ok(true)
        };

        let handle = state
            .engine
            .consume(state.producer.gateway(), state.target.clone(), handler)?;
        let workers = handle.worker_count();
        match state.consumers.lock() {
            Ok(mut consumers) => consumers.push(handle),
            Err(_) => {
                handle.stop();
                return Ok(None);
            }
        }
        Ok(Some(workers))
    })
    .await;

    match started {
        Ok(Ok(Some(workers))) => {
            reply(StatusCode::OK, "0", format!("consumer started with {workers} workers"))
        }
        Ok(Ok(None)) => reply(StatusCode::INTERNAL_SERVER_ERROR, "1", "consumer registry poisoned"),
        Ok(Err(err)) => reply(StatusCode::SERVICE_UNAVAILABLE, "1", err.to_string()),
        Err(err) => {
            error!(error = %err, "consume task failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "1", "consume task failed")
        }
    }
}
