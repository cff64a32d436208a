//! Platform backends
//!
//! One [`PlatformHandler`] is selected at startup by [`detect`] and injected
//! into the orchestrator. Callers never branch on the platform.
//!
//! Every backend applies an address as one handler-internal unit: bring the
//! link down if it was up, write the address, then put the link back the way
//! it was, even when the write failed.

pub mod command;
pub mod linux;
pub mod macos;
pub mod privilege;
pub mod windows;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{SpoofError, SpoofResult};
use crate::interface::NetworkInterface;
use crate::mac::MacAddress;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use linux::LinuxHandler;
pub use macos::MacOsHandler;
pub use privilege::{PrivilegeProbe, ProcessPrivilege, StaticPrivilege};
pub use windows::WindowsHandler;

#[async_trait]
pub trait PlatformHandler: Send + Sync {
    /// Backend name for logs and records
    fn name(&self) -> &'static str;

    async fn list_interfaces(&self) -> SpoofResult<Vec<NetworkInterface>>;

    /// Look up one interface by its platform-native identifier
    async fn interface(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        self.list_interfaces()
            .await?
            .into_iter()
            .find(|iface| iface.name == interface_id)
            .ok_or_else(|| SpoofError::NotFound {
                interface: interface_id.to_string(),
            })
    }

    async fn read_mac(&self, interface_id: &str) -> SpoofResult<MacAddress>;

    /// Write `mac`, cycling the link around the write when it is up
    async fn set_mac(&self, interface_id: &str, mac: MacAddress) -> SpoofResult<()>;

    async fn set_link_state(&self, interface_id: &str, up: bool) -> SpoofResult<()>;
}

/// Pick the backend for the running OS
pub fn detect(runner: Arc<dyn CommandRunner>) -> SpoofResult<Arc<dyn PlatformHandler>> {
    for_os(std::env::consts::OS, runner)
}

pub fn for_os(os: &str, runner: Arc<dyn CommandRunner>) -> SpoofResult<Arc<dyn PlatformHandler>> {
    let handler: Arc<dyn PlatformHandler> = match os {
        "linux" => Arc::new(LinuxHandler::new(runner)),
        "macos" => Arc::new(MacOsHandler::new(runner)),
        "windows" => Arc::new(WindowsHandler::new(runner)),
        other => return Err(SpoofError::UnsupportedPlatform(other.to_string())),
    };
    debug!(backend = handler.name(), "selected platform backend");
    Ok(handler)
}

pub(crate) fn missing_address(interface_id: &str) -> SpoofError {
    SpoofError::UnsupportedDriver {
        interface: interface_id.to_string(),
        detail: "interface has no hardware address".to_string(),
    }
}

/// Run `apply` with the link taken down first when `was_up`, and restore the
/// link afterwards regardless of the outcome. When both the write and the
/// restore fail, the restore error is appended to the write error.
pub(crate) async fn cycle_link<H, F>(
    handler: &H,
    interface_id: &str,
    was_up: bool,
    apply: F,
) -> SpoofResult<()>
where
    H: PlatformHandler + ?Sized,
    F: Future<Output = SpoofResult<()>> + Send,
{
    if was_up {
        handler.set_link_state(interface_id, false).await?;
    }

    let result = apply.await;

    if was_up {
        if let Err(e) = handler.set_link_state(interface_id, true).await {
            return match result {
                Ok(()) => Err(e),
                Err(write_err) => {
                    warn!(interface = interface_id, error = %e, "could not bring link back up after failed write");
                    Err(with_link_detail(write_err, &e))
                }
            };
        }
    }

    result
}

/// Keep the kind of `err` where it carries free text, append the link error
fn with_link_detail(err: SpoofError, link_err: &SpoofError) -> SpoofError {
    let note = format!("link left down: {}", link_err);
    match err {
        SpoofError::ToolFailure { tool, code, stderr } => SpoofError::ToolFailure {
            tool,
            code,
            stderr: format!("{}; {}", stderr, note),
        },
        SpoofError::UnsupportedDriver { interface, detail } => SpoofError::UnsupportedDriver {
            interface,
            detail: format!("{}; {}", detail, note),
        },
        SpoofError::PermissionDenied(msg) => SpoofError::PermissionDenied(format!("{}; {}", msg, note)),
        SpoofError::InvalidInput(msg) => SpoofError::InvalidInput(format!("{}; {}", msg, note)),
        SpoofError::InvalidState(msg) => SpoofError::InvalidState(format!("{}; {}", msg, note)),
        other => SpoofError::ToolFailure {
            tool: "link".to_string(),
            code: -1,
            stderr: format!("{}; {}", other, note),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFailure, FakePlatform, PlatformCall, ScriptedRunner};

    fn write_failure() -> SpoofError {
        SpoofError::ToolFailure {
            tool: "ip".to_string(),
            code: 2,
            stderr: "RTNETLINK answers: Cannot assign requested address".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_link_restores_after_failed_write() {
        let fake = FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55");
        let err = cycle_link(&fake, "eth0", true, async { Err(write_failure()) })
            .await
            .unwrap_err();
        assert!(matches!(err, SpoofError::ToolFailure { code: 2, .. }));
        assert_eq!(fake.is_up("eth0"), Some(true));
        assert_eq!(
            fake.calls(),
            vec![
                PlatformCall::SetLinkState { interface: "eth0".into(), up: false },
                PlatformCall::SetLinkState { interface: "eth0".into(), up: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_cycle_link_reports_both_failures() {
        let fake = FakePlatform::new().with_interface("eth0", "00:11:22:33:44:55");
        fake.fail_link_up("eth0", FakeFailure::Tool("device busy".into()));

        let err = cycle_link(&fake, "eth0", true, async { Err(write_failure()) })
            .await
            .unwrap_err();
        match err {
            SpoofError::ToolFailure { tool, code, stderr } => {
                assert_eq!((tool.as_str(), code), ("ip", 2));
                assert!(stderr.contains("Cannot assign requested address"));
                assert!(stderr.contains("link left down"));
                assert!(stderr.contains("device busy"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fake.is_up("eth0"), Some(false));

        let err = cycle_link(&fake, "eth0", true, async {
            Err(SpoofError::Timeout { tool: "ip".into(), secs: 5 })
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out") && err.to_string().contains("device busy"));

        // a successful write still surfaces the link error on its own
        let err = cycle_link(&fake, "eth0", true, async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, SpoofError::ToolFailure { ref stderr, .. } if stderr == "device busy"));
    }

    #[test]
    fn test_for_os_selects_backend() {
        let runner: Arc<dyn CommandRunner> = Arc::new(ScriptedRunner::new());
        assert_eq!(for_os("linux", runner.clone()).unwrap().name(), "linux");
        assert_eq!(for_os("macos", runner.clone()).unwrap().name(), "macos");
        assert_eq!(for_os("windows", runner.clone()).unwrap().name(), "windows");
        assert!(matches!(
            for_os("plan9", runner),
            Err(SpoofError::UnsupportedPlatform(_))
        ));
    }
}
