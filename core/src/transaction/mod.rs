//! Transactions: records and the manager that drives them

mod manager;
mod types;

pub use manager::{PendingTransaction, TransactionManager, TxOptions};
pub use types::{
    OperationKind, RollbackAction, RollbackFailure, RollbackReport, StepStatus, Transaction,
    TransactionStatus, TransactionStep,
};
