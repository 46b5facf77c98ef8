//! Producer, scanner and consumer together.

use std::time::Duration;

use reliable_mq::broker::{ConfirmMode, Settlement};
use reliable_mq::scanner::ResendScannerThread;

use crate::support::{orders_target, wait_secs, Harness, ScriptedHandler, Step, EXCHANGE, QUEUE, ROUTING_KEY};

#[test]
fn sent_message_is_processed_once() {
    let h = Harness::new();
    let handler = ScriptedHandler::always(Step::Succeed);
    let consumer = h.engine().consume(&h.broker, orders_target(), handler.clone()).unwrap();

    assert!(h.producer().send(EXCHANGE, ROUTING_KEY, "{\"id\":1}"));
    assert!(wait_secs(2, || handler.calls() == 1));
    consumer.stop();

    assert_eq!(handler.seen(), vec![serde_json::json!({ "id": 1 })]);
    assert!(h.pending().is_empty());
}

#[test]
fn lost_confirm_causes_duplicate_that_consumer_absorbs() {
    let h = Harness::new();
    h.broker.set_confirm_mode(ConfirmMode::Manual);
    let handler = ScriptedHandler::always(Step::Succeed);
    let engine = h.engine();
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();

    let id = h.producer().try_send(EXCHANGE, ROUTING_KEY, "{\"id\":7}").unwrap();
    assert!(wait_secs(2, || handler.calls() == 1));
    // The broker got the message but the confirm never made it back.
    h.broker.lose_confirms();
    assert_eq!(h.pending_ids(), vec![id]);

    h.broker.set_confirm_mode(ConfirmMode::Ack);
    let scanner = ResendScannerThread::spawn(h.scanner(), Duration::from_millis(10));
    assert!(wait_secs(2, || h.pending().is_empty()));
    scanner.stop();

    let message_id = h.broker.published()[0].message_id.clone();
    assert!(wait_secs(2, || h.settlements_of(&message_id).len() == 2));
    consumer.stop();

    assert_eq!(handler.calls(), 1);
    assert_eq!(h.settlements_of(&message_id), vec![Settlement::Ack, Settlement::Ack]);
    assert_eq!(engine.stats().duplicates, 1);
}

#[test]
fn crash_between_commit_and_publish_is_recovered() {
    let h = Harness::new();
    let handler = ScriptedHandler::always(Step::Succeed);
    let consumer = h.engine().consume(&h.broker, orders_target(), handler.clone()).unwrap();

    h.commit_unpublished("crashed-1", "{\"id\":42}");
    assert!(h.broker.published().is_empty());

    let scanner = ResendScannerThread::spawn(h.scanner(), Duration::from_millis(10));
    assert!(wait_secs(2, || handler.calls() == 1));
    assert!(wait_secs(2, || h.pending().is_empty()));
    let stats = scanner.stop();
    consumer.stop();

    assert_eq!(stats.republished, 1);
    assert_eq!(h.settlements_of("crashed-1"), vec![Settlement::Ack]);
}

#[test]
fn broker_outage_during_send_is_delivered_after_recovery() {
    let h = Harness::new();
    h.declare_orders_queue();
    let handler = ScriptedHandler::always(Step::Succeed);

    h.broker.set_available(false);
    let producer = h.producer();
    for i in 0..3 {
        assert!(producer.send(EXCHANGE, ROUTING_KEY, format!("{{\"id\":{i}}}")));
    }
    assert_eq!(h.pending().len(), 3);

    h.broker.set_available(true);
    let consumer = h.engine().consume(&h.broker, orders_target(), handler.clone()).unwrap();
    let scanner = ResendScannerThread::spawn(h.scanner(), Duration::from_millis(10));

    assert!(wait_secs(2, || handler.calls() == 3));
    assert!(wait_secs(2, || h.pending().is_empty()));
    scanner.stop();
    consumer.stop();
    assert_eq!(h.broker.queue_depth(QUEUE), 0);
}
