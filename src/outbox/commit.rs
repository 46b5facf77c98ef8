use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use super::error::StoreError;
use super::store::StoreTransaction;

type DeferredAction = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a successful [`UnitOfWork::commit`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    /// Deferred actions that ran to completion.
    pub actions_run: usize,
    /// Deferred actions that panicked. They are not retried.
    pub actions_failed: usize,
}

/// A store transaction plus the actions that must run once it commits.
///
/// Deferred actions registered with [`after_commit`](Self::after_commit) run
/// exactly once, strictly after the transaction commits, in registration
/// order. If the commit fails, or the unit of work is rolled back or dropped,
/// they are discarded without running.
///
/// ```ignore
/// let mut uow = UnitOfWork::begin(&store)?;
/// store.insert(uow.transaction_mut(), row)?;
/// uow.after_commit(move || publish(row_id));
/// uow.commit()?; // publish runs here, after the row is durable
/// ```
pub struct UnitOfWork<T: StoreTransaction> {
    tx: Option<T>,
    deferred: Vec<DeferredAction>,
}

impl<T: StoreTransaction> UnitOfWork<T> {
    /// Wrap an already open transaction.
    pub fn new(tx: T) -> Self {
        Self {
            tx: Some(tx),
            deferred: Vec::new(),
        }
    }

    /// Open a transaction on `store` and wrap it.
    pub fn begin<S>(store: &S) -> Result<Self, StoreError>
    where
        S: super::OutboxStore<Transaction = T> + ?Sized,
    {
        Ok(Self::new(store.begin()?))
    }

    /// The wrapped transaction.
    pub fn transaction_mut(&mut self) -> &mut T {
        match self.tx.as_mut() {
            Some(tx) => tx,
            None => unreachable!("transaction is only taken by commit/rollback, which consume self"),
        }
    }

    /// Register an action to run after a successful commit.
    pub fn after_commit<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.deferred.push(Box::new(action));
    }

    /// Number of actions waiting for the commit.
    pub fn pending_actions(&self) -> usize {
        self.deferred.len()
    }

    /// Commit the transaction, then run every deferred action once.
    ///
    /// A panicking action is logged and counted; the remaining actions still run.
    pub fn commit(mut self) -> Result<CommitReport, StoreError> {
        let deferred = std::mem::take(&mut self.deferred);
        let Some(tx) = self.tx.take() else {
            return Ok(CommitReport::default());
        };
        tx.commit()?;

        let mut report = CommitReport::default();
        for action in deferred {
            match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(()) => report.actions_run += 1,
                Err(_) => {
                    report.actions_failed += 1;
                    error!("after-commit action panicked; it will not be re-run");
                }
            }
        }
        Ok(report)
    }

    /// Roll back the transaction and discard the deferred actions.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        let dropped = self.deferred.len();
        self.deferred.clear();
        if let Some(tx) = self.tx.take() {
            tx.rollback();
            if dropped > 0 {
                debug!(dropped, "transaction rolled back; after-commit actions discarded");
            }
        }
    }
}

impl<T: StoreTransaction> Drop for UnitOfWork<T> {
    fn drop(&mut self) {
        self.discard();
    }
}
