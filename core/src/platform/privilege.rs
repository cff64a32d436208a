//! Privilege probe used as a precondition before any mutation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::command::CommandRunner;

#[async_trait]
pub trait PrivilegeProbe: Send + Sync {
    /// True when the process may change interface addresses
    async fn is_elevated(&self) -> bool;
}

/// Checks the privilege of the running process
pub struct ProcessPrivilege {
    #[cfg_attr(not(windows), allow(dead_code))]
    runner: Arc<dyn CommandRunner>,
}

impl ProcessPrivilege {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PrivilegeProbe for ProcessPrivilege {
    #[cfg(unix)]
    async fn is_elevated(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        let euid = unsafe { libc::geteuid() };
        debug!(euid, "effective uid");
        euid == 0
    }

    #[cfg(windows)]
    async fn is_elevated(&self) -> bool {
        // `net session` only succeeds from an elevated prompt
        match self.runner.run("net", &["session"]).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(error = %e, "net session probe failed");
                false
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    async fn is_elevated(&self) -> bool {
        debug!("no privilege probe for this platform");
        false
    }
}

/// Fixed answer, for tests and for callers that check privilege themselves
#[derive(Debug, Clone, Copy)]
pub struct StaticPrivilege(pub bool);

#[async_trait]
impl PrivilegeProbe for StaticPrivilege {
    async fn is_elevated(&self) -> bool {
        self.0
    }
}
