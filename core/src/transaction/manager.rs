//! Transaction manager
//!
//! Drives steps against the platform handler. Every step captures the
//! interface's address before mutating it and records a
//! [`RollbackAction`](super::RollbackAction). On failure the manager unwinds
//! applied steps in strict reverse order, continuing past restores that fail
//! and reporting them, since no backend offers a multi-step primitive.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::types::{
    OperationKind, RollbackAction, RollbackFailure, RollbackReport, StepStatus, Transaction,
    TransactionStatus, TransactionStep,
};
use crate::error::{SpoofError, SpoofResult};
use crate::history::TransactionLog;
use crate::locks::{InterfaceGuard, InterfaceLocks};
use crate::mac::MacAddress;
use crate::platform::PlatformHandler;
use crate::verify::Verifier;

/// Per-transaction behaviour
#[derive(Debug, Clone, Copy)]
pub struct TxOptions {
    /// Unwind applied steps automatically when a step fails
    pub auto_rollback: bool,
    /// Read back every write
    pub verify: bool,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            verify: true,
        }
    }
}

/// An in-flight transaction. Holds the locks of every interface it may touch
/// until [`TransactionManager::finish`] consumes it.
#[derive(Debug)]
pub struct PendingTransaction {
    record: Transaction,
    options: TxOptions,
    failed: bool,
    guards: Vec<InterfaceGuard>,
}

impl PendingTransaction {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &Transaction {
        &self.record
    }

    pub fn status(&self) -> TransactionStatus {
        self.record.status
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn set_recovers(&mut self, transaction_id: impl Into<String>) {
        self.record.recovers = Some(transaction_id.into());
    }

    fn holds(&self, interface_id: &str) -> bool {
        self.guards.iter().any(|g| g.interface() == interface_id)
    }

    fn record_failure(&mut self, step: TransactionStep) {
        if self.record.error.is_none() {
            self.record.error = step.error.clone();
        }
        self.record.steps.push(step);
        self.failed = true;
    }
}

pub struct TransactionManager {
    handler: Arc<dyn PlatformHandler>,
    log: Arc<dyn TransactionLog>,
    locks: InterfaceLocks,
}

impl TransactionManager {
    pub fn new(
        handler: Arc<dyn PlatformHandler>,
        log: Arc<dyn TransactionLog>,
        locks: InterfaceLocks,
    ) -> Self {
        Self { handler, log, locks }
    }

    pub fn handler(&self) -> &Arc<dyn PlatformHandler> {
        &self.handler
    }

    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }

    /// Open a transaction over `interfaces`, locking all of them before
    /// anything is read. Fails with `Contention` without touching the OS.
    pub async fn begin<S: AsRef<str>>(
        &self,
        kind: OperationKind,
        interfaces: &[S],
        options: TxOptions,
    ) -> SpoofResult<PendingTransaction> {
        let guards = self.locks.acquire_all(interfaces).await?;
        let record = Transaction::new(kind, self.handler.name());
        info!(tx = %record.id, kind = kind.as_str(), interfaces = guards.len(), "transaction opened");
        Ok(PendingTransaction {
            record,
            options,
            failed: false,
            guards,
        })
    }

    /// Apply one address change. On error the step is recorded as failed and
    /// the transaction is marked failed; deciding to unwind is left to
    /// [`fail`](Self::fail) or [`finish`](Self::finish).
    #[instrument(skip(self, tx), fields(tx = %tx.record.id))]
    pub async fn execute_step(
        &self,
        tx: &mut PendingTransaction,
        interface_id: &str,
        requested: MacAddress,
    ) -> SpoofResult<()> {
        if tx.record.status != TransactionStatus::Open {
            return Err(SpoofError::InvalidState(format!(
                "transaction {} is {}",
                tx.record.id, tx.record.status
            )));
        }
        if !tx.holds(interface_id) {
            return Err(SpoofError::InvalidState(format!(
                "interface {} is not locked by transaction {}",
                interface_id, tx.record.id
            )));
        }

        let mut step = TransactionStep::pending(interface_id, requested);

        let previous = match self.handler.read_mac(interface_id).await {
            Ok(mac) => mac,
            Err(e) => {
                error!(interface = interface_id, error = %e, "could not read current address");
                step.fail(&e);
                tx.record_failure(step);
                return Err(e);
            }
        };
        step.capture(previous);

        if previous == requested {
            info!(interface = interface_id, mac = %requested, "address already set, nothing to change");
            step.status = StepStatus::Verified;
            step.verified = true;
            tx.record.steps.push(step);
            return Ok(());
        }

        if let Err(e) = self.handler.set_mac(interface_id, requested).await {
            // A backend can fail after the write landed (link restore); unwind then too.
            // An unreadable address is treated as changed.
            let unreadable = match self.handler.read_mac(interface_id).await {
                Ok(now) => {
                    step.changed = now != previous;
                    None
                }
                Err(read_err) => {
                    step.changed = true;
                    Some(read_err)
                }
            };
            error!(interface = interface_id, error = %e, changed = step.changed, "set_mac failed");
            step.fail(&e);
            if let (Some(read_err), Some(detail)) = (unreadable, step.error.as_mut()) {
                detail.message = format!("{}; address unreadable afterwards: {}", detail.message, read_err);
            }
            tx.record_failure(step);
            return Err(e);
        }
        step.changed = true;
        step.status = StepStatus::Applied;

        let verifier = Verifier::new(tx.options.verify);
        match verifier.verify(self.handler.as_ref(), interface_id, requested).await {
            Ok(true) => {
                step.status = StepStatus::Verified;
                step.verified = true;
            }
            Ok(false) => {}
            Err(e) => {
                error!(interface = interface_id, error = %e, "verification failed");
                step.fail(&e);
                tx.record_failure(step);
                return Err(e);
            }
        }

        info!(interface = interface_id, from = %previous, to = %requested, "step applied");
        tx.record.steps.push(step);
        Ok(())
    }

    /// Mark the transaction committed. Refused when any step failed.
    pub fn commit(&self, tx: &mut PendingTransaction) -> SpoofResult<()> {
        if tx.record.status != TransactionStatus::Open {
            return Err(SpoofError::InvalidState(format!(
                "cannot commit transaction {} in state {}",
                tx.record.id, tx.record.status
            )));
        }
        if tx.failed {
            return Err(SpoofError::InvalidState(format!(
                "transaction {} has failed steps",
                tx.record.id
            )));
        }
        tx.record.status = TransactionStatus::Committed;
        info!(tx = %tx.record.id, steps = tx.record.steps.len(), "transaction committed");
        Ok(())
    }

    /// Unwind every applied step in reverse order. Restores that fail are
    /// recorded and the unwind continues.
    pub async fn rollback(&self, tx: &mut PendingTransaction) -> SpoofResult<RollbackReport> {
        if !matches!(
            tx.record.status,
            TransactionStatus::Open | TransactionStatus::Failed
        ) {
            return Err(SpoofError::InvalidState(format!(
                "cannot roll back transaction {} in state {}",
                tx.record.id, tx.record.status
            )));
        }

        let mut report = RollbackReport::default();
        let verifier = Verifier::new(tx.options.verify);

        for step in tx.record.steps.iter_mut().rev() {
            if !step.needs_unwind() {
                continue;
            }
            let Some(RollbackAction::RestoreMac { interface_id, mac }) = step.rollback.clone() else {
                continue;
            };
            report.attempted.push(interface_id.clone());
            warn!(tx = %tx.record.id, interface = %interface_id, mac = %mac, "rolling back step");

            let restored = match self.handler.set_mac(&interface_id, mac).await {
                Ok(()) => verifier
                    .verify(self.handler.as_ref(), &interface_id, mac)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };

            match restored {
                Ok(()) => {
                    step.status = StepStatus::RolledBack;
                    report.restored.push(interface_id);
                }
                Err(e) => {
                    error!(interface = %interface_id, error = %e, "restore failed, continuing unwind");
                    step.status = StepStatus::RolledBackFailed;
                    step.rollback_error = Some((&e).into());
                    report.failed.push(RollbackFailure {
                        interface_id,
                        mac,
                        error: (&e).into(),
                    });
                }
            }
        }

        tx.record.status = if report.is_complete() {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::Partial
        };
        info!(
            tx = %tx.record.id,
            restored = report.restored.len(),
            failed = report.failed.len(),
            "rollback finished"
        );
        tx.record.rollback = Some(report.clone());
        Ok(report)
    }

    /// Apply the failure policy: unwind when auto-rollback is on, otherwise
    /// leave the transaction `failed` for manual recovery.
    pub async fn fail(&self, tx: &mut PendingTransaction) -> SpoofResult<()> {
        tx.failed = true;
        if tx.record.status == TransactionStatus::Open {
            tx.record.status = TransactionStatus::Failed;
        }
        if tx.options.auto_rollback {
            self.rollback(tx).await?;
        } else {
            warn!(tx = %tx.record.id, "auto-rollback disabled, leaving transaction failed");
        }
        Ok(())
    }

    /// Finalise, append to the log and release the interface locks
    pub async fn finish(&self, mut tx: PendingTransaction) -> Transaction {
        if tx.record.status == TransactionStatus::Open {
            let outcome = if tx.failed {
                self.fail(&mut tx).await
            } else {
                self.commit(&mut tx)
            };
            if let Err(e) = outcome {
                error!(tx = %tx.record.id, error = %e, "could not finalise transaction");
                tx.record.status = TransactionStatus::Failed;
            }
        }

        tx.record.finished_at = Some(chrono::Utc::now());
        tx.record.summary = tx.record.describe();

        if let Err(e) = self.log.append(&tx.record) {
            error!(tx = %tx.record.id, error = %e, "could not append transaction to log");
            tx.record.log_error = Some((&e).into());
        }
        info!(tx = %tx.record.id, status = %tx.record.status, "{}", tx.record.summary);

        let PendingTransaction { record, guards, .. } = tx;
        drop(guards);
        record
    }
}
