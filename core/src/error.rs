//! Error types for the mutation engine
//!
//! Every failure a platform backend, the transaction manager or the
//! orchestrator can produce is a [`SpoofError`]. Errors that end up inside a
//! [`Transaction`](crate::transaction::Transaction) record are flattened into a
//! serialisable [`StepError`] so the record stays JSON friendly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the mutation engine and its collaborators
#[derive(Error, Debug)]
pub enum SpoofError {
    /// Malformed MAC text, interface id or request shape
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The interface does not exist
    #[error("interface not found: {interface}")]
    NotFound { interface: String },

    /// The process lacks the privilege to perform the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The driver or adapter refuses address changes
    #[error("driver for {interface} does not support MAC changes: {detail}")]
    UnsupportedDriver { interface: String, detail: String },

    /// A required OS tool is not installed or not in PATH
    #[error("required tool not available: {tool}")]
    ToolUnavailable { tool: String },

    /// An OS tool exited unsuccessfully
    #[error("{tool} failed (exit code {code}): {stderr}")]
    ToolFailure {
        /// Program name
        tool: String,
        /// Exit code, -1 when killed by a signal
        code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// An OS tool did not finish in time
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// The OS accepted the write but read-back disagrees
    #[error("verification failed on {interface}: expected {expected}, found {actual}")]
    VerificationMismatch {
        interface: String,
        expected: String,
        actual: String,
    },

    /// One or more restores failed while unwinding a transaction
    #[error("transaction {transaction_id} could not restore: {}", interfaces.join(", "))]
    PartialRollbackFailure {
        transaction_id: String,
        interfaces: Vec<String>,
    },

    /// The interface is held by another transaction
    #[error("interface {interface} is locked by another transaction")]
    Contention { interface: String },

    /// No committed change exists to restore from
    #[error("no committed change recorded for {interface}")]
    NothingToRestore { interface: String },

    /// Operation not valid for the current transaction or record state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The running OS has no backend
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A transaction could not complete
    #[error("transaction {transaction_id} failed: {reason}")]
    TransactionFailed {
        transaction_id: String,
        reason: String,
    },

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type SpoofResult<T> = Result<T, SpoofError>;

/// Coarse classification of a [`SpoofError`], stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    PermissionDenied,
    UnsupportedDriver,
    ToolUnavailable,
    ToolFailure,
    Timeout,
    VerificationMismatch,
    PartialRollbackFailure,
    Contention,
    NothingToRestore,
    InvalidState,
    UnsupportedPlatform,
    TransactionFailed,
    Config,
    Io,
    Json,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::UnsupportedDriver => "unsupported_driver",
            ErrorKind::ToolUnavailable => "tool_unavailable",
            ErrorKind::ToolFailure => "tool_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::VerificationMismatch => "verification_mismatch",
            ErrorKind::PartialRollbackFailure => "partial_rollback_failure",
            ErrorKind::Contention => "contention",
            ErrorKind::NothingToRestore => "nothing_to_restore",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::UnsupportedPlatform => "unsupported_platform",
            ErrorKind::TransactionFailed => "transaction_failed",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Json => "json",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SpoofError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpoofError::InvalidInput(_) => ErrorKind::InvalidInput,
            SpoofError::NotFound { .. } => ErrorKind::NotFound,
            SpoofError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SpoofError::UnsupportedDriver { .. } => ErrorKind::UnsupportedDriver,
            SpoofError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            SpoofError::ToolFailure { .. } => ErrorKind::ToolFailure,
            SpoofError::Timeout { .. } => ErrorKind::Timeout,
            SpoofError::VerificationMismatch { .. } => ErrorKind::VerificationMismatch,
            SpoofError::PartialRollbackFailure { .. } => ErrorKind::PartialRollbackFailure,
            SpoofError::Contention { .. } => ErrorKind::Contention,
            SpoofError::NothingToRestore { .. } => ErrorKind::NothingToRestore,
            SpoofError::InvalidState(_) => ErrorKind::InvalidState,
            SpoofError::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            SpoofError::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            SpoofError::Config(_) => ErrorKind::Config,
            SpoofError::Io(_) => ErrorKind::Io,
            SpoofError::Json(_) => ErrorKind::Json,
        }
    }

    /// Errors that mean the backend can never perform the operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SpoofError::ToolUnavailable { .. }
                | SpoofError::UnsupportedDriver { .. }
                | SpoofError::UnsupportedPlatform(_)
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SpoofError::InvalidInput(msg.into())
    }
}

/// Serialisable error carried inside transaction records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SpoofError> for StepError {
    fn from(err: &SpoofError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
