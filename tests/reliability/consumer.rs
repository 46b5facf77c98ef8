//! Consumer engine: dedup, bounded retry and exactly-once settlement.

use std::collections::HashMap;

use reliable_mq::broker::Settlement;
use reliable_mq::config::ConsumerConfig;
use reliable_mq::consumer::{Action, ConsumerEngine};

use crate::support::{orders_target, wait_secs, Harness, ScriptedHandler, Step, QUEUE};

#[test]
fn duplicate_delivery_is_acked_without_calling_handler() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::always(Step::Succeed);
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();

    h.broker.enqueue_raw(QUEUE, Some("abc"), "{\"id\":1}").unwrap();
    assert!(wait_secs(2, || h.settlements_of("abc").len() == 1));
    h.broker.enqueue_raw(QUEUE, Some("abc"), "{\"id\":1}").unwrap();
    assert!(wait_secs(2, || h.settlements_of("abc").len() == 2));
    consumer.stop();

    assert_eq!(handler.calls(), 1);
    assert_eq!(h.settlements_of("abc"), vec![Settlement::Ack, Settlement::Ack]);
    assert_eq!(engine.stats().duplicates, 1);
    assert!(h.cache.ttl("orders_abc").is_some());
}

#[test]
fn four_failures_retry_three_times_then_reject() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::always(Step::Fail);
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();

    h.broker.enqueue_raw(QUEUE, Some("abc"), "{}").unwrap();
    assert!(wait_secs(2, || h.broker.dead_letters(QUEUE).len() == 1));
    consumer.stop();

    assert_eq!(handler.calls(), 4);
    assert_eq!(
        h.settlements_of("abc"),
        vec![
            Settlement::Requeue,
            Settlement::Requeue,
            Settlement::Requeue,
            Settlement::Reject
        ]
    );
    assert_eq!(h.broker.queue_depth(QUEUE), 0);
}

#[test]
fn transient_failure_then_success_is_accepted() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::new([Step::Fail, Step::Fail, Step::Succeed]);
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();

    h.broker.enqueue_raw(QUEUE, Some("m-1"), "{}").unwrap();
    assert!(wait_secs(2, || h.settlements_of("m-1").contains(&Settlement::Ack)));
    consumer.stop();

    assert_eq!(
        h.settlements_of("m-1"),
        vec![Settlement::Requeue, Settlement::Requeue, Settlement::Ack]
    );
    assert!(h.broker.dead_letters(QUEUE).is_empty());
}

#[test]
fn poison_messages_are_rejected_without_retry() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::always(Step::Succeed);
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();

    h.broker.enqueue_raw(QUEUE, Some("bad-json"), "{oops").unwrap();
    h.broker.enqueue_raw(QUEUE, None, "{}").unwrap();
    assert!(wait_secs(2, || h.broker.dead_letters(QUEUE).len() == 2));
    consumer.stop();

    assert_eq!(handler.calls(), 0);
    assert_eq!(h.settlements_of("bad-json"), vec![Settlement::Reject]);
}

#[test]
fn handler_errors_and_panics_reject() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::new([Step::Error, Step::Panic]);
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();

    h.broker.enqueue_raw(QUEUE, Some("err"), "{}").unwrap();
    h.broker.enqueue_raw(QUEUE, Some("panic"), "{}").unwrap();
    assert!(wait_secs(2, || h.broker.dead_letters(QUEUE).len() == 2));
    consumer.stop();

    assert_eq!(h.settlements_of("err"), vec![Settlement::Reject]);
    assert_eq!(h.settlements_of("panic"), vec![Settlement::Reject]);
}

#[test]
fn cache_outage_resolves_to_reject() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::always(Step::Succeed);
    let consumer = engine.consume(&h.broker, orders_target(), handler.clone()).unwrap();
    h.cache.set_available(false);

    h.broker.enqueue_raw(QUEUE, Some("m-1"), "{}").unwrap();
    assert!(wait_secs(2, || h.settlements_of("m-1").len() == 1));
    consumer.stop();

    assert_eq!(h.settlements_of("m-1"), vec![Settlement::Reject]);
    assert_eq!(handler.calls(), 0);
}

#[test]
fn every_delivery_is_settled_exactly_once() {
    let h = Harness::new();
    let engine = h.engine().with_max_retries(1);
    let handler = ScriptedHandler::new(
        [Step::Succeed, Step::Fail, Step::Error, Step::Panic]
            .into_iter()
            .cycle()
            .take(400),
    );
    let consumer = engine
        .consume_with_concurrency(&h.broker, orders_target(), handler.clone(), 4)
        .unwrap();
    assert_eq!(consumer.worker_count(), 4);

    for i in 0..40 {
        h.broker
            .enqueue_raw(QUEUE, Some(&format!("m-{i}")), "{}")
            .unwrap();
    }
    // Every message ends acked or dead-lettered; requeues come back around.
    assert!(wait_secs(5, || {
        let settlements = h.broker.settlements();
        let finished = settlements
            .iter()
            .filter(|s| s.settlement != Settlement::Requeue)
            .count();
        finished == 40
    }));
    consumer.stop();

    let settlements = h.broker.settlements();
    let mut tags = std::collections::HashSet::new();
    for record in &settlements {
        assert!(tags.insert(record.tag), "delivery {} settled twice", record.tag);
    }
    assert_eq!(settlements.len() as u64, {
        let stats = engine.stats();
        stats.accepted + stats.retried + stats.rejected
    });
    assert_eq!(h.broker.unacked(QUEUE), 0);
    assert_eq!(h.broker.queue_depth(QUEUE), 0);

    let mut finals: HashMap<String, Settlement> = HashMap::new();
    for record in settlements {
        if record.settlement != Settlement::Requeue {
            let id = record.message_id.unwrap();
            assert!(finals.insert(id, record.settlement).is_none());
        }
    }
    assert_eq!(finals.len(), 40);
}

#[test]
fn concurrency_defaults_follow_config() {
    let h = Harness::new();
    let config = ConsumerConfig {
        concurrency: Some(3),
        ..ConsumerConfig::default()
    };
    let engine = ConsumerEngine::from_config(h.cache.clone(), &config);
    let handler = ScriptedHandler::always(Step::Succeed);

    let consumer = engine.consume(&h.broker, orders_target(), handler).unwrap();
    assert_eq!(consumer.worker_count(), 3);
    assert_eq!(consumer.queue(), QUEUE);
    consumer.stop();
}

#[test]
fn decide_is_usable_without_a_broker() {
    let h = Harness::new();
    let engine = h.engine();
    let handler = ScriptedHandler::always(Step::Fail);
    let delivery = reliable_mq::broker::Delivery {
        tag: reliable_mq::broker::DeliveryTag(1),
        queue: QUEUE.into(),
        exchange: "orders".into(),
        routing_key: "order.create".into(),
        message_id: Some("abc".into()),
        payload: b"{}".to_vec(),
        redelivered: false,
    };

    let decisions: Vec<Action> = (0..4).map(|_| engine.decide(&delivery, &handler)).collect();
    assert_eq!(
        decisions,
        vec![Action::Retry, Action::Retry, Action::Retry, Action::Reject]
    );
}
