//! In-memory test doubles
//!
//! [`FakePlatform`] stands in for a whole OS backend. [`ScriptedRunner`]
//! replays canned tool output so the real backends can be exercised without
//! touching the host. Both record every call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SpoofError, SpoofResult};
use crate::interface::{LinkStatus, NetworkInterface};
use crate::mac::MacAddress;
use crate::platform::{CommandOutput, CommandRunner, PlatformHandler};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ListInterfaces,
    ReadMac { interface: String },
    SetMac { interface: String, mac: MacAddress },
    SetLinkState { interface: String, up: bool },
}

/// Error a fake operation should produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeFailure {
    PermissionDenied,
    NotFound,
    Unsupported,
    Tool(String),
    ToolUnavailable,
}

impl FakeFailure {
    fn to_error(&self, interface: &str) -> SpoofError {
        match self {
            FakeFailure::PermissionDenied => {
                SpoofError::PermissionDenied(format!("fake: operation not permitted on {}", interface))
            }
            FakeFailure::NotFound => SpoofError::NotFound {
                interface: interface.to_string(),
            },
            FakeFailure::Unsupported => SpoofError::UnsupportedDriver {
                interface: interface.to_string(),
                detail: "fake driver refuses address changes".to_string(),
            },
            FakeFailure::Tool(stderr) => SpoofError::ToolFailure {
                tool: "fake".to_string(),
                code: 1,
                stderr: stderr.clone(),
            },
            FakeFailure::ToolUnavailable => SpoofError::ToolUnavailable {
                tool: "fake".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct FakeInterface {
    mac: MacAddress,
    up: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    interfaces: BTreeMap<String, FakeInterface>,
    /// Any write to the interface fails
    set_failures: HashMap<String, FakeFailure>,
    /// Writes of one specific address fail
    targeted_failures: HashMap<(String, MacAddress), FakeFailure>,
    /// The write lands, then the call reports an error
    late_failures: HashMap<(String, MacAddress), FakeFailure>,
    read_failures: HashMap<String, FakeFailure>,
    /// Armed into `read_failures` by the next write that lands
    pending_read_failures: HashMap<String, FakeFailure>,
    /// Bringing the link up fails
    link_up_failures: HashMap<String, FakeFailure>,
    /// Requested address → address that actually lands
    substitutions: HashMap<(String, MacAddress), MacAddress>,
    calls: Vec<PlatformCall>,
}

/// Backend holding interfaces in memory
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    delay: Mutex<Option<Duration>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interface that is up. Panics on a malformed address.
    pub fn with_interface(self, name: &str, mac: &str) -> Self {
        let mac: MacAddress = mac.parse().expect("fake interface address");
        lock(&self.state)
            .interfaces
            .insert(name.to_string(), FakeInterface { mac, up: true });
        self
    }

    /// Every write to `name` fails without changing anything
    pub fn fail_set(self, name: &str, failure: FakeFailure) -> Self {
        lock(&self.state).set_failures.insert(name.to_string(), failure);
        self
    }

    /// Writes of `mac` to `name` fail without changing anything
    pub fn fail_set_to(&self, name: &str, mac: MacAddress, failure: FakeFailure) {
        lock(&self.state)
            .targeted_failures
            .insert((name.to_string(), mac), failure);
    }

    /// Writes of `mac` to `name` land but the call still reports `failure`
    pub fn fail_after_write(&self, name: &str, mac: MacAddress, failure: FakeFailure) {
        lock(&self.state)
            .late_failures
            .insert((name.to_string(), mac), failure);
    }

    pub fn fail_read(&self, name: &str, failure: FakeFailure) {
        lock(&self.state).read_failures.insert(name.to_string(), failure);
    }

    /// Reads of `name` start failing once the next write to it lands
    pub fn fail_read_after_write(&self, name: &str, failure: FakeFailure) {
        lock(&self.state)
            .pending_read_failures
            .insert(name.to_string(), failure);
    }

    /// Bringing `name` up fails, leaving it down
    pub fn fail_link_up(&self, name: &str, failure: FakeFailure) {
        lock(&self.state)
            .link_up_failures
            .insert(name.to_string(), failure);
    }

    /// Writing `requested` to `name` silently applies `actual` instead
    pub fn ignore_writes_to(&self, name: &str, requested: MacAddress, actual: MacAddress) {
        lock(&self.state)
            .substitutions
            .insert((name.to_string(), requested), actual);
    }

    /// Sleep inside every `set_mac`
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn mac_of(&self, name: &str) -> Option<MacAddress> {
        lock(&self.state).interfaces.get(name).map(|i| i.mac)
    }

    pub fn is_up(&self, name: &str) -> Option<bool> {
        lock(&self.state).interfaces.get(name).map(|i| i.up)
    }
}

#[async_trait]
impl PlatformHandler for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list_interfaces(&self) -> SpoofResult<Vec<NetworkInterface>> {
        let mut state = lock(&self.state);
        state.calls.push(PlatformCall::ListInterfaces);
        Ok(state
            .interfaces
            .iter()
            .map(|(name, iface)| {
                let status = if iface.up { LinkStatus::Up } else { LinkStatus::Down };
                let mut entry = NetworkInterface::new(name.clone(), Some(iface.mac), status);
                entry.driver = Some("fake".to_string());
                entry
            })
            .collect())
    }

    async fn read_mac(&self, interface_id: &str) -> SpoofResult<MacAddress> {
        let mut state = lock(&self.state);
        state.calls.push(PlatformCall::ReadMac {
            interface: interface_id.to_string(),
        });
        if let Some(failure) = state.read_failures.get(interface_id) {
            return Err(failure.to_error(interface_id));
        }
        state
            .interfaces
            .get(interface_id)
            .map(|i| i.mac)
            .ok_or_else(|| SpoofError::NotFound {
                interface: interface_id.to_string(),
            })
    }

    async fn set_mac(&self, interface_id: &str, mac: MacAddress) -> SpoofResult<()> {
        lock(&self.state).calls.push(PlatformCall::SetMac {
            interface: interface_id.to_string(),
            mac,
        });

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if !state.interfaces.contains_key(interface_id) {
            return Err(SpoofError::NotFound {
                interface: interface_id.to_string(),
            });
        }
        let key = (interface_id.to_string(), mac);
        if let Some(failure) = state
            .set_failures
            .get(interface_id)
            .or_else(|| state.targeted_failures.get(&key))
        {
            return Err(failure.to_error(interface_id));
        }

        let applied = state.substitutions.get(&key).copied().unwrap_or(mac);
        if let Some(iface) = state.interfaces.get_mut(interface_id) {
            iface.mac = applied;
        }
        if let Some(failure) = state.pending_read_failures.remove(interface_id) {
            state.read_failures.insert(interface_id.to_string(), failure);
        }
        match state.late_failures.get(&key) {
            Some(failure) => Err(failure.to_error(interface_id)),
            None => Ok(()),
        }
    }

    async fn set_link_state(&self, interface_id: &str, up: bool) -> SpoofResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(PlatformCall::SetLinkState {
            interface: interface_id.to_string(),
            up,
        });
        if up {
            if let Some(failure) = state.link_up_failures.get(interface_id) {
                return Err(failure.to_error(interface_id));
            }
        }
        let iface = state
            .interfaces
            .get_mut(interface_id)
            .ok_or_else(|| SpoofError::NotFound {
                interface: interface_id.to_string(),
            })?;
        iface.up = up;
        Ok(())
    }
}

/// Command runner answering from a table keyed by the full command line.
/// Unscripted commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, CommandOutput>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command_line: &str, output: CommandOutput) {
        lock(&self.responses).insert(command_line.to_string(), output);
    }

    /// Make every invocation of `program` fail as if it were not installed
    pub fn missing_tool(&self, program: &str) {
        lock(&self.missing).insert(program.to_string());
    }

    /// Command lines in invocation order, `program arg1 arg2 ...`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> SpoofResult<CommandOutput> {
        let command_line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        lock(&self.calls).push(command_line.clone());

        if lock(&self.missing).contains(program) {
            return Err(SpoofError::ToolUnavailable {
                tool: program.to_string(),
            });
        }
        Ok(lock(&self.responses)
            .get(&command_line)
            .cloned()
            .unwrap_or_default())
    }
}
