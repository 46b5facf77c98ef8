//! Trigger endpoints over a real socket.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use reliable_mq::broker::{
    BrokerError, BrokerGateway, ConfirmCallback, ConsumerHandle, ConsumerSpec, DeliveryCallback,
    InMemoryBroker, OutboundMessage, Settlement, Topology,
};
use reliable_mq::http::{router, TriggerState, DEMO_QUEUE};
use reliable_mq::{ConsumerEngine, InMemoryDedupCache, InMemoryOutboxStore, OutboxProducer};
use tokio::net::TcpListener;

use crate::support::{wait_secs, Harness};

#[tokio::test]
async fn consume_then_send_roundtrip() {
    let h = Harness::new();
    let state = TriggerState::new(h.producer(), h.engine());
    let app = router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/example/consume", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "0");
    assert_eq!(state.consumer_count(), 1);

    let resp = client
        .post(format!("http://{}/example/send", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "0");
    let order: serde_json::Value =
        serde_json::from_str(body["msg"].as_str().unwrap()).unwrap();
    assert_eq!(order["orderNum"].as_str().unwrap().len(), 12);

    assert!(wait_secs(2, || h
        .broker
        .settlements()
        .iter()
        .any(|s| s.queue == DEMO_QUEUE && s.settlement == Settlement::Ack)));
    assert!(h.pending().is_empty());
    state.stop_consumers();
}

#[tokio::test]
async fn send_reports_failure_when_store_is_down() {
    let h = Harness::new();
    let state = TriggerState::new(h.producer(), h.engine());
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    h.store.set_available(false);
    let resp = reqwest::Client::new()
        .post(format!("http://{}/example/send", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "1");
}

/// Broker whose publish blocks until `parties` publishes are in flight at once.
#[derive(Clone)]
struct RendezvousBroker {
    inner: InMemoryBroker,
    parties: usize,
    gate: Arc<(Mutex<usize>, Condvar)>,
    met: Arc<Mutex<Vec<bool>>>,
}

impl RendezvousBroker {
    fn new(parties: usize) -> Self {
        Self {
            inner: InMemoryBroker::new(),
            parties,
            gate: Arc::new((Mutex::new(0), Condvar::new())),
            met: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl BrokerGateway for RendezvousBroker {
    fn declare_topology(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.inner.declare_topology(topology)
    }

    fn publish(&self, message: OutboundMessage, on_confirm: ConfirmCallback) -> Result<(), BrokerError> {
        let (lock, cvar) = &*self.gate;
        let mut arrived = lock.lock().unwrap();
        *arrived += 1;
        cvar.notify_all();
        let (arrived, timeout) = cvar
            .wait_timeout_while(arrived, Duration::from_secs(2), |n| *n < self.parties)
            .unwrap();
        drop(arrived);
        self.met.lock().unwrap().push(!timeout.timed_out());
        self.inner.publish(message, on_confirm)
    }

    fn start_consumer(
        &self,
        spec: ConsumerSpec,
        on_message: DeliveryCallback,
    ) -> Result<ConsumerHandle, BrokerError> {
        self.inner.start_consumer(spec, on_message)
    }
}

#[tokio::test(flavor = "current_thread")]
async fn blocking_publishes_do_not_stall_the_runtime() {
    let broker = RendezvousBroker::new(2);
    let store = InMemoryOutboxStore::new();
    let producer = OutboxProducer::new(store.clone(), broker.clone());
    let state = TriggerState::new(producer, ConsumerEngine::new(InMemoryDedupCache::new()));
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let url = format!("http://{}/example/send", addr);
    let (first, second) = tokio::join!(client.post(&url).send(), client.post(&url).send());
    assert_eq!(first.unwrap().status(), 200);
    assert_eq!(second.unwrap().status(), 200);

    assert_eq!(*broker.met.lock().unwrap(), vec![true, true]);
    assert!(store.is_empty());
}
