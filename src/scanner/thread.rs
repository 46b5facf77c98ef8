use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

use super::scanner::ResendScanner;
use crate::broker::BrokerGateway;
use crate::outbox::OutboxStore;

/// Totals over the scanner thread's lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScannerStats {
    pub ticks: usize,
    pub republished: usize,
    pub failed: usize,
    /// Passes that ended early because the broker was unreachable.
    pub broker_unavailable: usize,
    /// Passes that failed on the store or panicked.
    pub errors: usize,
}

/// The resend scanner as a single dedicated background thread.
///
/// Runs one pass, waits one fixed interval, and repeats. There is no backoff:
/// an empty outbox and a failing broker are both simply retried next tick.
/// A pass that panics is logged and counted as an error; the thread lives on.
///
/// ```ignore
/// let scanner = ResendScanner::new(store.clone(), broker.clone());
/// let thread = ResendScannerThread::spawn(scanner, Duration::from_secs(1));
/// // ...
/// let stats = thread.stop();
/// println!("republished {} rows", stats.republished);
/// ```
pub struct ResendScannerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ScannerStats>>,
}

impl ResendScannerThread {
    pub fn spawn<S, G>(scanner: ResendScanner<S, G>, interval: Duration) -> Self
    where
        S: OutboxStore + Clone + 'static,
        G: BrokerGateway + Clone + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = ScannerStats::default();
            info!(interval_ms = interval.as_millis() as u64, "resend scanner started");

            loop {
                stats.ticks += 1;
                match panic::catch_unwind(AssertUnwindSafe(|| scanner.scan_once())) {
                    Ok(Ok(report)) => {
                        stats.republished += report.republished;
                        stats.failed += report.failed;
                        if report.broker_unavailable {
                            stats.broker_unavailable += 1;
                        }
                    }
                    Ok(Err(err)) => {
                        stats.errors += 1;
                        error!(error = %err, "resend scan pass failed on the store");
                    }
                    Err(_) => {
                        stats.errors += 1;
                        error!(tick = stats.ticks, "resend scan pass panicked; retrying next tick");
                    }
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(ticks = stats.ticks, republished = stats.republished, "resend scanner stopped");
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the scanner to stop and wait for it to finish.
    /// Returns the scanner statistics.
    pub fn stop(mut self) -> ScannerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!("resend scanner thread panicked; stats lost");
                ScannerStats::default()
            }),
            None => ScannerStats::default(),
        }
    }

    /// Signal the scanner to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ResendScannerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
