//! Outbox producer: durability first, publish after commit, settle on confirm.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use reliable_mq::broker::{ConfirmMode, CorrelationId};
use reliable_mq::outbox::{AckPolicy, OutboxId, OutboxStatus, OutboxStore, UnitOfWork};
use reliable_mq::producer::OutboxDraft;

use crate::support::{Harness, EXCHANGE, QUEUE, ROUTING_KEY};

#[test]
fn confirmed_row_disappears_from_pending() {
    let h = Harness::starting_at(42);
    h.broker.set_confirm_mode(ConfirmMode::Manual);
    let producer = h.producer();

    assert!(producer.send(EXCHANGE, ROUTING_KEY, "{\"id\":1}"));
    assert_eq!(h.pending_ids(), vec![OutboxId(42)]);

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].correlation, Some(CorrelationId::for_row(OutboxId(42))));
    assert_eq!(published[0].message_id, h.pending()[0].message_id);

    assert_eq!(h.broker.settle_confirms(true), 1);
    assert!(h.pending_ids().is_empty());
    assert!(h.store.get(OutboxId(42)).unwrap().is_none());
}

#[test]
fn nack_and_lost_confirm_leave_row_pending() {
    let h = Harness::new();
    h.broker.set_confirm_mode(ConfirmMode::Manual);
    let producer = h.producer();

    let nacked = producer.try_send(EXCHANGE, ROUTING_KEY, "{}").unwrap();
    h.broker.settle_confirms(false);
    let lost = producer.try_send(EXCHANGE, ROUTING_KEY, "{}").unwrap();
    h.broker.lose_confirms();

    assert_eq!(h.pending_ids(), vec![nacked, lost]);
    assert_eq!(producer.confirm_stats().nacks, 1);
}

#[test]
fn every_durable_send_is_published_or_still_pending() {
    let h = Harness::new();
    let producer = h.producer();
    let mut accepted = Vec::new();

    for i in 0..30 {
        match i % 3 {
            0 => h.broker.set_available(false),
            1 => {
                h.broker.set_available(true);
                h.broker.set_confirm_mode(ConfirmMode::Nack);
            }
            _ => h.broker.set_confirm_mode(ConfirmMode::Ack),
        }
        accepted.push(producer.try_send(EXCHANGE, ROUTING_KEY, format!("{{\"n\":{i}}}")).unwrap());
    }

    let published: HashSet<OutboxId> = h
        .broker
        .published()
        .into_iter()
        .filter_map(|record| record.correlation.map(|c| c.row_id()))
        .collect();
    let pending: HashSet<OutboxId> = h.pending_ids().into_iter().collect();

    for id in accepted {
        assert!(
            published.contains(&id) || pending.contains(&id),
            "row {id} was neither published nor left pending"
        );
    }
    // Unavailable and nacked sends (20 of them) must still be pending.
    assert_eq!(pending.len(), 20);
}

#[test]
fn callers_transaction_controls_the_publish() {
    let h = Harness::new();
    let producer = h.producer();

    let mut rolled_back = UnitOfWork::begin(&h.store).unwrap();
    producer
        .send_in(&mut rolled_back, EXCHANGE, ROUTING_KEY, "{\"keep\":false}")
        .unwrap();
    rolled_back.rollback();

    let mut committed = UnitOfWork::begin(&h.store).unwrap();
    let first = producer.send_in(&mut committed, EXCHANGE, ROUTING_KEY, "{\"n\":1}").unwrap();
    let second = producer.send_in(&mut committed, EXCHANGE, ROUTING_KEY, "{\"n\":2}").unwrap();
    assert_eq!(committed.pending_actions(), 2);
    assert!(h.broker.published().is_empty());

    let report = committed.commit().unwrap();
    assert_eq!(report.actions_run, 2);

    let published: Vec<OutboxId> = h
        .broker
        .published()
        .into_iter()
        .filter_map(|record| record.correlation.map(|c| c.row_id()))
        .collect();
    assert_eq!(published, vec![first, second]);
    assert!(h.store.is_empty());
}

#[test]
fn persistence_failure_returns_false_and_publishes_nothing() {
    let h = Harness::new();
    let producer = h.producer();

    h.store.fail_next_commit();
    assert!(!producer.send(EXCHANGE, ROUTING_KEY, "{}"));
    h.store.set_available(false);
    assert!(!producer.send(EXCHANGE, ROUTING_KEY, "{}"));
    h.store.set_available(true);

    assert!(h.store.is_empty());
    assert!(h.broker.published().is_empty());
}

#[test]
fn mark_sent_policy_keeps_rows_out_of_pending() {
    let h = Harness::new();
    let producer = h.producer().with_ack_policy(AckPolicy::MarkSent);

    let id = producer.try_send(EXCHANGE, ROUTING_KEY, "{}").unwrap();
    assert_eq!(h.store.get(id).unwrap().unwrap().status, OutboxStatus::Sent);
    assert!(h.pending().is_empty());
}

#[test]
fn rows_name_their_queue_for_redeclaration() {
    let h = Harness::new();
    let producer = h.producer();

    producer
        .try_send_with(OutboxDraft::new(EXCHANGE, ROUTING_KEY, "{}").with_queue_name(QUEUE))
        .unwrap();

    // The publish declared the queue and its binding too.
    assert_eq!(h.broker.queue_depth(QUEUE), 1);
}

#[test]
fn concurrent_sends_get_unique_ids() {
    let h = Harness::new();
    let producer = Arc::new(h.producer());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let producer = Arc::clone(&producer);
            thread::spawn(move || {
                (0..25)
                    .map(|_| producer.try_send(EXCHANGE, ROUTING_KEY, "{}").unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: HashSet<OutboxId> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    assert_eq!(ids.len(), 100);
    assert_eq!(h.broker.published().len(), 100);
    assert!(h.store.is_empty());
}
