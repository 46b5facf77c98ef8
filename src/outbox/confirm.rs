use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::message::OutboxId;
use super::store::{AckPolicy, OutboxStore};
use crate::broker::{Confirm, ConfirmCallback, ConfirmOutcome};

#[derive(Default)]
struct Counters {
    acks: AtomicU64,
    nacks: AtomicU64,
    anomalies: AtomicU64,
    settle_failures: AtomicU64,
}

/// Snapshot of what a [`ConfirmSettler`] has seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfirmStats {
    /// Acks that matched their row and were settled.
    pub acks: u64,
    /// Nacks; the row was left pending.
    pub nacks: u64,
    /// Confirms carrying a missing or unexpected correlation.
    pub anomalies: u64,
    /// Acks whose store settlement failed; the row stays pending.
    pub settle_failures: u64,
}

/// Turns publisher confirms into outbox row settlement.
///
/// Each publish gets its own callback from [`callback_for`](Self::callback_for).
/// The callback owns the correlation for that publish and is consumed when the
/// confirm fires. Cloning shares the counters.
pub struct ConfirmSettler<S> {
    store: S,
    policy: AckPolicy,
    counters: Arc<Counters>,
}

impl<S: Clone> Clone for ConfirmSettler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<S> ConfirmSettler<S>
where
    S: OutboxStore + Clone + 'static,
{
    pub fn new(store: S, policy: AckPolicy) -> Self {
        Self {
            store,
            policy,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn policy(&self) -> AckPolicy {
        self.policy
    }

    pub fn stats(&self) -> ConfirmStats {
        ConfirmStats {
            acks: self.counters.acks.load(Ordering::SeqCst),
            nacks: self.counters.nacks.load(Ordering::SeqCst),
            anomalies: self.counters.anomalies.load(Ordering::SeqCst),
            settle_failures: self.counters.settle_failures.load(Ordering::SeqCst),
        }
    }

    /// Build the confirm callback for a publish of row `id`.
    pub fn callback_for(&self, id: OutboxId) -> ConfirmCallback {
        let settler = self.clone();
        Box::new(move |confirm| settler.handle(id, confirm))
    }

    /// Apply one confirm for a publish of row `expected`.
    pub fn handle(&self, expected: OutboxId, confirm: Confirm) {
        let Some(correlation) = confirm.correlation else {
            self.counters.anomalies.fetch_add(1, Ordering::SeqCst);
            warn!(outbox_id = %expected, "confirm arrived without a correlation; ignoring");
            return;
        };
        if correlation.row_id() != expected {
            self.counters.anomalies.fetch_add(1, Ordering::SeqCst);
            warn!(
                outbox_id = %expected,
                correlation = %correlation,
                "confirm correlation does not match the published row; ignoring"
            );
            return;
        }

        match confirm.outcome {
            ConfirmOutcome::Ack => match self.store.settle(expected, self.policy) {
                Ok(settled) => {
                    self.counters.acks.fetch_add(1, Ordering::SeqCst);
                    if settled {
                        info!(outbox_id = %expected, policy = ?self.policy, "publish confirmed; row settled");
                    } else {
                        debug!(outbox_id = %expected, "publish confirmed; row already settled");
                    }
                }
                Err(err) => {
                    self.counters.settle_failures.fetch_add(1, Ordering::SeqCst);
                    error!(outbox_id = %expected, error = %err, "failed to settle confirmed row; scanner will republish it");
                }
            },
            ConfirmOutcome::Nack { reason } => {
                self.counters.nacks.fetch_add(1, Ordering::SeqCst);
                warn!(outbox_id = %expected, %reason, "publish nacked; row stays pending");
            }
        }
    }
}
