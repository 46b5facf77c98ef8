//! Resend scanner: the recovery path for publishes that never completed.

use std::time::Duration;

use reliable_mq::broker::{ConfirmMode, CorrelationId};
use reliable_mq::config::ReliabilityConfig;
use reliable_mq::outbox::{OutboxId, OutboxStatus, OutboxStore};
use reliable_mq::scanner::{ResendScanner, ResendScannerThread};

use crate::support::{wait_secs, Harness};

#[test]
fn first_tick_after_restart_republishes_committed_row() {
    let h = Harness::starting_at(42);
    let id = h.commit_unpublished("m-42", "{\"id\":1}");
    assert_eq!(id, OutboxId(42));
    assert!(h.broker.published().is_empty());

    // "Restart": a fresh scanner over the same store.
    let report = h.scanner().scan_once().unwrap();

    assert_eq!(report.found, 1);
    assert_eq!(report.republished, 1);
    let published = h.broker.published();
    assert_eq!(published[0].correlation, Some(CorrelationId::for_row(OutboxId(42))));
    assert_eq!(published[0].message_id, "m-42");
    assert!(h.pending().is_empty());
}

#[test]
fn nacked_rows_are_picked_up_again_next_pass() {
    let h = Harness::new();
    h.commit_unpublished("m-1", "{}");
    h.broker.set_confirm_mode(ConfirmMode::Nack);
    let scanner = h.scanner();

    scanner.scan_once().unwrap();
    scanner.scan_once().unwrap();
    assert_eq!(h.pending().len(), 1);
    assert_eq!(h.broker.publish_count("m-1"), 2);

    h.broker.set_confirm_mode(ConfirmMode::Ack);
    scanner.scan_once().unwrap();
    assert!(h.pending().is_empty());
    assert_eq!(h.broker.publish_count("m-1"), 3);
}

#[test]
fn broker_outage_is_survived_and_recovered() {
    let h = Harness::new();
    for i in 0..5 {
        h.commit_unpublished(&format!("m-{i}"), "{}");
    }
    h.broker.set_available(false);

    let thread = ResendScannerThread::spawn(h.scanner(), Duration::from_millis(10));
    assert!(wait_secs(2, || h.broker.published().is_empty() && h.pending().len() == 5));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.pending().len(), 5);

    h.broker.set_available(true);
    assert!(wait_secs(2, || h.pending().is_empty()));
    let stats = thread.stop();

    assert!(stats.broker_unavailable >= 1);
    assert_eq!(stats.republished, 5);
    assert_eq!(stats.errors, 0);
}

#[test]
fn large_backlog_is_drained_in_pages() {
    let h = Harness::new();
    for i in 0..250 {
        h.commit_unpublished(&format!("m-{i}"), "{}");
    }

    let report = h.scanner().with_batch_size(40).scan_once().unwrap();

    assert_eq!(report.found, 250);
    assert_eq!(report.republished, 250);
    assert_eq!(report.pages, 7);
    assert!(h.store.is_empty());
}

#[test]
fn config_drives_policy_and_paging() {
    let h = Harness::new();
    let id = h.commit_unpublished("m-1", "{}");
    let config = ReliabilityConfig::from_json_str(
        r#"{ "producer": { "ack_policy": "mark_sent" }, "scanner": { "batch_size": 5 } }"#,
    )
    .unwrap();

    let scanner = ResendScanner::from_config(h.store.clone(), h.broker.clone(), &config);
    assert_eq!(scanner.batch_size(), 5);
    scanner.scan_once().unwrap();

    assert_eq!(h.store.get(id).unwrap().unwrap().status, OutboxStatus::Sent);
    assert!(h.pending().is_empty());
}

#[test]
fn scanner_and_producer_racing_publish_twice_at_most_harmlessly() {
    let h = Harness::new();
    h.broker.set_confirm_mode(ConfirmMode::Manual);
    let producer = h.producer();

    let id = producer.try_send("orders", "order.create", "{}").unwrap();
    // The producer's publish is in flight; the scanner sees the row too.
    h.scanner().scan_once().unwrap();

    let message_id = h.store.get(id).unwrap().unwrap().message_id;
    assert_eq!(h.broker.publish_count(&message_id), 2);

    // Both confirms arrive; the second settlement is a no-op.
    assert_eq!(h.broker.settle_confirms(true), 2);
    assert!(h.store.get(id).unwrap().is_none());
}
