//! Transactional MAC address changes with rollback
//!
//! Every change runs inside a [`Transaction`]: the previous address of each
//! interface is captured before it is touched, every write is read back, and
//! when a step fails the already-applied steps are restored in reverse order.
//! [`MacAddressSpoofer`] is the entry point; the CLI, the scheduler and the
//! MCP server all go through it.

pub mod config;
pub mod error;
pub mod filter;
pub mod generator;
pub mod history;
pub mod interface;
pub mod locks;
pub mod mac;
pub mod platform;
pub mod profile;
pub mod scheduler;
pub mod spoofer;
pub mod telemetry;
pub mod transaction;
pub mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use config::SpooferConfig;
pub use error::{ErrorKind, SpoofError, SpoofResult, StepError};
pub use filter::InterfaceFilter;
pub use history::{HistoryFilter, HistoryStats, JsonFileLog, MemoryLog, TransactionLog};
pub use interface::{LinkStatus, NetworkInterface};
pub use mac::{MacAddress, MacReport, MacValidator};
pub use platform::{CommandRunner, PlatformHandler, PrivilegeProbe};
pub use profile::{Profile, ProfileEntry, ProfileStore};
pub use scheduler::{Frequency, ScheduleAction, ScheduleStore, ScheduledTask, Scheduler};
pub use spoofer::{MacAddressSpoofer, MacStrategy, SpoofOptions, SpooferBuilder};
pub use transaction::{
    OperationKind, RollbackReport, StepStatus, Transaction, TransactionManager, TransactionStatus,
    TransactionStep,
};
pub use verify::Verifier;
