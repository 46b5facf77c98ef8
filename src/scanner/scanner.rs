use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::{BrokerError, BrokerGateway};
use crate::config::ReliabilityConfig;
use crate::outbox::{AckPolicy, ConfirmSettler, OutboxStore, PendingPage, StoreError};
use crate::producer::RowPublisher;

/// Outcome of one [`ResendScanner::scan_once`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub pages: usize,
    /// Pending rows seen.
    pub found: usize,
    pub republished: usize,
    pub failed: usize,
    /// Rows skipped because they were younger than the minimum age.
    pub skipped_young: usize,
    /// The pass ended early because the broker could not be reached.
    pub broker_unavailable: bool,
}

/// Republishes outbox rows whose publish was never confirmed.
///
/// This is the only recovery path for a crash between commit and publish, a
/// nack, or a confirm that never arrived. A row may be published twice if the
/// scanner races the producer's own publish; consumers deduplicate.
pub struct ResendScanner<S, G> {
    store: S,
    publisher: RowPublisher<S, G>,
    batch_size: usize,
    min_age: Duration,
}

impl<S, G> ResendScanner<S, G>
where
    S: OutboxStore + Clone + 'static,
    G: BrokerGateway + Clone + 'static,
{
    pub fn new(store: S, gateway: G) -> Self {
        let settler = ConfirmSettler::new(store.clone(), AckPolicy::default());
        Self {
            store,
            publisher: RowPublisher::new(gateway, settler),
            batch_size: 100,
            min_age: Duration::ZERO,
        }
    }

    /// Scanner settings plus the producer's ack policy, so both paths settle
    /// rows the same way.
    pub fn from_config(store: S, gateway: G, config: &ReliabilityConfig) -> Self {
        Self::new(store, gateway)
            .with_ack_policy(config.producer.ack_policy)
            .with_batch_size(config.scanner.batch_size)
            .with_min_age(config.scanner.min_age())
    }

    /// Rows fetched per page. Clamped to at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Leave rows younger than `min_age` to the producer's own publish.
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    pub fn with_ack_policy(self, policy: AckPolicy) -> Self {
        let settler = ConfirmSettler::new(self.store.clone(), policy);
        self.with_settler(settler)
    }

    pub fn with_settler(self, settler: ConfirmSettler<S>) -> Self {
        Self {
            publisher: RowPublisher::new(self.publisher.gateway().clone(), settler),
            ..self
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn settler(&self) -> &ConfirmSettler<S> {
        self.publisher.settler()
    }

    /// Walk every pending row page by page and republish it.
    ///
    /// Row order is not meaningful. Only a store failure is an error; broker
    /// trouble is logged and reported.
    pub fn scan_once(&self) -> Result<ScanReport, StoreError> {
        let mut report = ScanReport::default();
        let mut page = PendingPage::first(self.batch_size);

        loop {
            let rows = self.store.query_pending(page)?;
            report.pages += 1;
            let Some(last) = rows.last().map(|row| row.id) else {
                break;
            };
            let short = rows.len() < self.batch_size;

            for row in rows {
                report.found += 1;
                if row.age() < self.min_age {
                    report.skipped_young += 1;
                    continue;
                }
                match self.publisher.publish_row(&row) {
                    Ok(()) => report.republished += 1,
                    Err(BrokerError::Unavailable(reason)) => {
                        report.failed += 1;
                        report.broker_unavailable = true;
                        warn!(outbox_id = %row.id, %reason, "broker unreachable; ending scan pass early");
                        return Ok(report);
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(outbox_id = %row.id, error = %err, "republish failed; will retry next pass");
                    }
                }
            }

            if short {
                break;
            }
            page = PendingPage::after(last, self.batch_size);
        }

        if report.found > 0 {
            info!(
                found = report.found,
                republished = report.republished,
                failed = report.failed,
                "resend scan pass finished"
            );
        } else {
            debug!("resend scan pass found nothing pending");
        }
        Ok(report)
    }
}
