//! macOS backend (`ifconfig`)

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::command::{run_checked, CommandRunner};
use super::{cycle_link, missing_address, PlatformHandler};
use crate::error::{SpoofError, SpoofResult};
use crate::interface::{attach_ip_addresses, LinkStatus, NetworkInterface};
use crate::mac::MacAddress;

const IFCONFIG: &str = "ifconfig";

pub struct MacOsHandler {
    runner: Arc<dyn CommandRunner>,
}

impl MacOsHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn query(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        let stdout = run_checked(self.runner.as_ref(), interface_id, IFCONFIG, &[interface_id]).await?;
        parse_ifconfig(&stdout)
            .into_iter()
            .find(|iface| iface.name == interface_id)
            .ok_or_else(|| SpoofError::NotFound {
                interface: interface_id.to_string(),
            })
    }
}

#[async_trait]
impl PlatformHandler for MacOsHandler {
    fn name(&self) -> &'static str {
        "macos"
    }

    async fn list_interfaces(&self) -> SpoofResult<Vec<NetworkInterface>> {
        let stdout = run_checked(self.runner.as_ref(), "*", IFCONFIG, &[]).await?;
        let mut interfaces = parse_ifconfig(&stdout);
        attach_ip_addresses(&mut interfaces);
        Ok(interfaces)
    }

    async fn interface(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        self.query(interface_id).await
    }

    async fn read_mac(&self, interface_id: &str) -> SpoofResult<MacAddress> {
        self.query(interface_id)
            .await?
            .mac
            .ok_or_else(|| missing_address(interface_id))
    }

    async fn set_mac(&self, interface_id: &str, mac: MacAddress) -> SpoofResult<()> {
        let current = self.query(interface_id).await?;
        let mac_text = mac.to_string();
        let args = [interface_id, "ether", mac_text.as_str()];

        cycle_link(self, interface_id, current.status.is_up(), async {
            run_checked(self.runner.as_ref(), interface_id, IFCONFIG, &args).await?;
            info!(interface = interface_id, mac = %mac, "address written");
            Ok(())
        })
        .await
    }

    async fn set_link_state(&self, interface_id: &str, up: bool) -> SpoofResult<()> {
        let state = if up { "up" } else { "down" };
        run_checked(self.runner.as_ref(), interface_id, IFCONFIG, &[interface_id, state]).await?;
        Ok(())
    }
}

/// Parse `ifconfig` output into one interface per block
pub fn parse_ifconfig(output: &str) -> Vec<NetworkInterface> {
    let mut interfaces: Vec<NetworkInterface> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            // "en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500"
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let flags = rest
                .find('<')
                .and_then(|s| rest[s + 1..].find('>').map(|e| &rest[s + 1..s + 1 + e]))
                .unwrap_or("");
            let status = if flags.split(',').any(|f| f == "UP") {
                LinkStatus::Up
            } else {
                LinkStatus::Down
            };
            interfaces.push(NetworkInterface::new(name.trim(), None, status));
            continue;
        }

        let Some(current) = interfaces.last_mut() else {
            continue;
        };
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("ether") | Some("lladdr") => {
                current.mac = tokens.next().and_then(|m| m.parse().ok());
            }
            Some("media:") => {
                let media: Vec<&str> = tokens.collect();
                if !media.is_empty() {
                    current.description = Some(media.join(" "));
                }
            }
            _ => {}
        }
    }

    interfaces
}
