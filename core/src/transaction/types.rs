//! Transaction records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SpoofError, SpoofResult, StepError};
use crate::mac::MacAddress;

/// Step lifecycle: `pending -> applied -> {verified, failed}`, and
/// `applied | verified | failed -> rolled_back | rolled_back_failed` through a
/// manager-driven unwind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Applied,
    Verified,
    Failed,
    RolledBack,
    RolledBackFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Applied => "applied",
            StepStatus::Verified => "verified",
            StepStatus::Failed => "failed",
            StepStatus::RolledBack => "rolled_back",
            StepStatus::RolledBackFailed => "rolled_back_failed",
        }
    }
}

/// Transaction lifecycle: `open -> {committed, failed}`, `failed -> {rolled_back, partial}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    Committed,
    /// Failed and left as is (auto-rollback off)
    Failed,
    /// Failed and every unwind succeeded
    RolledBack,
    /// Failed and at least one restore failed
    Partial,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Open => "open",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Open)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TransactionStatus::Open),
            "committed" => Ok(TransactionStatus::Committed),
            "failed" => Ok(TransactionStatus::Failed),
            "rolled_back" | "rolledback" => Ok(TransactionStatus::RolledBack),
            "partial" => Ok(TransactionStatus::Partial),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

/// The operation a transaction was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Spoof,
    Batch,
    Generate,
    Restore,
    RestoreOriginal,
    Recover,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Spoof => "spoof",
            OperationKind::Batch => "batch",
            OperationKind::Generate => "generate",
            OperationKind::Restore => "restore",
            OperationKind::RestoreOriginal => "restore_original",
            OperationKind::Recover => "recover",
        }
    }
}

/// Compensating action recorded when a step captures its pre-change state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackAction {
    RestoreMac { interface_id: String, mac: MacAddress },
}

impl RollbackAction {
    pub fn interface_id(&self) -> &str {
        match self {
            RollbackAction::RestoreMac { interface_id, .. } => interface_id,
        }
    }
}

impl std::fmt::Display for RollbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackAction::RestoreMac { interface_id, mac } => {
                write!(f, "restore {} to {}", interface_id, mac)
            }
        }
    }
}

/// One reversible MAC change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStep {
    pub interface_id: String,
    /// Address read before mutating; `None` only when that read failed
    pub previous_mac: Option<MacAddress>,
    pub requested_mac: MacAddress,
    pub status: StepStatus,
    /// The OS address was changed by this step
    pub changed: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<StepError>,
    pub started_at: DateTime<Utc>,
}

impl TransactionStep {
    pub fn pending(interface_id: impl Into<String>, requested_mac: MacAddress) -> Self {
        Self {
            interface_id: interface_id.into(),
            previous_mac: None,
            requested_mac,
            status: StepStatus::Pending,
            changed: false,
            verified: false,
            rollback: None,
            error: None,
            rollback_error: None,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn capture(&mut self, previous: MacAddress) {
        self.previous_mac = Some(previous);
        self.rollback = Some(RollbackAction::RestoreMac {
            interface_id: self.interface_id.clone(),
            mac: previous,
        });
    }

    pub(crate) fn fail(&mut self, err: &SpoofError) {
        self.status = StepStatus::Failed;
        self.error = Some(err.into());
    }

    /// Touched the OS and has not been unwound yet
    pub fn needs_unwind(&self) -> bool {
        self.changed
            && self.rollback.is_some()
            && matches!(
                self.status,
                StepStatus::Applied | StepStatus::Verified | StepStatus::Failed
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackFailure {
    pub interface_id: String,
    pub mac: MacAddress,
    pub error: StepError,
}

/// Outcome of a LIFO unwind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Interfaces in the order their restore was attempted
    pub attempted: Vec<String>,
    pub restored: Vec<String>,
    pub failed: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A finalised or in-flight MAC change operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: OperationKind,
    pub status: TransactionStatus,
    /// Backend that executed the steps
    pub backend: String,
    pub steps: Vec<TransactionStep>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Human-readable log line
    #[serde(default)]
    pub summary: String,
    /// First step failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
    /// Transaction this one recovers, for `recover` operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovers: Option<String>,
    /// The record could not be appended to the history log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_error: Option<StepError>,
}

impl Transaction {
    pub fn new(kind: OperationKind, backend: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: TransactionStatus::Open,
            backend: backend.into(),
            steps: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            summary: String::new(),
            error: None,
            rollback: None,
            recovers: None,
            log_error: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }

    /// Committed and recorded in the history log
    pub fn succeeded(&self) -> bool {
        self.is_committed() && self.log_error.is_none()
    }

    /// Any terminal outcome other than `committed`
    pub fn is_failed(&self) -> bool {
        self.status.is_terminal() && !self.is_committed()
    }

    pub fn step(&self, interface_id: &str) -> Option<&TransactionStep> {
        self.steps.iter().find(|s| s.interface_id == interface_id)
    }

    pub fn interfaces(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.interface_id.as_str()).collect()
    }

    pub fn touches(&self, interface_id: &str) -> bool {
        self.steps.iter().any(|s| s.interface_id == interface_id)
    }

    /// Convert a non-committed outcome into an error, for callers that want `?`
    pub fn ensure_committed(&self) -> SpoofResult<()> {
        match self.status {
            TransactionStatus::Committed => match &self.log_error {
                None => Ok(()),
                Some(err) => Err(SpoofError::TransactionFailed {
                    transaction_id: self.id.clone(),
                    reason: format!("changes applied but not recorded in history: {}", err),
                }),
            },
            TransactionStatus::Partial => Err(SpoofError::PartialRollbackFailure {
                transaction_id: self.id.clone(),
                interfaces: self
                    .rollback
                    .as_ref()
                    .map(|r| r.failed.iter().map(|f| f.interface_id.clone()).collect())
                    .unwrap_or_default(),
            }),
            _ => Err(SpoofError::TransactionFailed {
                transaction_id: self.id.clone(),
                reason: self
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| self.status.to_string()),
            }),
        }
    }

    pub(crate) fn describe(&self) -> String {
        let changes: Vec<String> = self
            .steps
            .iter()
            .map(|s| {
                let previous = s
                    .previous_mac
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "?".to_string());
                format!("{} {} -> {} ({})", s.interface_id, previous, s.requested_mac, s.status.as_str())
            })
            .collect();

        let mut line = format!("{} {}: {}", self.kind.as_str(), self.status, changes.join("; "));
        if let Some(err) = &self.error {
            line.push_str(&format!("; error: {}", err));
        }
        if let Some(report) = &self.rollback {
            if !report.attempted.is_empty() {
                line.push_str(&format!("; unwound {}", report.attempted.join(", ")));
            }
            if !report.failed.is_empty() {
                let failed: Vec<&str> = report.failed.iter().map(|f| f.interface_id.as_str()).collect();
                line.push_str(&format!("; could not restore {}", failed.join(", ")));
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("rolled_back".parse::<TransactionStatus>().unwrap(), TransactionStatus::RolledBack);
        assert_eq!(TransactionStatus::Partial.to_string(), "partial");
        assert!("weird".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_step_capture_binds_rollback_action() {
        let mut step = TransactionStep::pending("eth0", mac("02:00:00:00:00:01"));
        step.capture(mac("00:11:22:33:44:55"));
        assert_eq!(
            step.rollback,
            Some(RollbackAction::RestoreMac {
                interface_id: "eth0".into(),
                mac: mac("00:11:22:33:44:55"),
            })
        );
        assert!(!step.needs_unwind());
        step.changed = true;
        step.status = StepStatus::Verified;
        assert!(step.needs_unwind());
    }

    #[test]
    fn test_rollback_action_serializes_tagged() {
        let action = RollbackAction::RestoreMac {
            interface_id: "eth0".into(),
            mac: mac("00:11:22:33:44:55"),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "restore_mac");
        assert_eq!(json["mac"], "00:11:22:33:44:55");
    }

    #[test]
    fn test_ensure_committed() {
        let mut tx = Transaction::new(OperationKind::Spoof, "fake");
        tx.status = TransactionStatus::Committed;
        assert!(tx.ensure_committed().is_ok());

        tx.status = TransactionStatus::Partial;
        tx.rollback = Some(RollbackReport {
            attempted: vec!["eth0".into()],
            restored: vec![],
            failed: vec![RollbackFailure {
                interface_id: "eth0".into(),
                mac: mac("00:11:22:33:44:55"),
                error: StepError {
                    kind: ErrorKind::ToolFailure,
                    message: "busy".into(),
                },
            }],
        });
        assert!(matches!(
            tx.ensure_committed(),
            Err(SpoofError::PartialRollbackFailure { interfaces, .. }) if interfaces == vec!["eth0".to_string()]
        ));
        assert!(tx.is_failed());
    }

    #[test]
    fn test_unrecorded_commit_is_not_a_success() {
        let mut tx = Transaction::new(OperationKind::Spoof, "fake");
        tx.status = TransactionStatus::Committed;
        assert!(tx.succeeded());

        tx.log_error = Some(StepError {
            kind: ErrorKind::Json,
            message: "expected value".into(),
        });
        assert!(!tx.succeeded());
        assert!(matches!(
            tx.ensure_committed(),
            Err(SpoofError::TransactionFailed { reason, .. }) if reason.contains("not recorded")
        ));
    }

    #[test]
    fn test_open_transaction_is_neither_committed_nor_failed() {
        let tx = Transaction::new(OperationKind::Batch, "fake");
        assert!(!tx.is_committed());
        assert!(!tx.is_failed());
        assert_eq!(tx.id.len(), 36);
    }
}
