//! Windows backend (PowerShell `NetAdapter` cmdlets)
//!
//! Adapters are addressed by their `Name`. The address override lives in the
//! driver's `NetworkAddress` advanced property; adapters whose driver does not
//! expose that keyword cannot be changed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::command::{run_checked, CommandRunner};
use super::{cycle_link, missing_address, PlatformHandler};
use crate::error::{SpoofError, SpoofResult};
use crate::interface::{attach_ip_addresses, LinkStatus, NetworkInterface};
use crate::mac::MacAddress;

const POWERSHELL: &str = "powershell";
const ADAPTER_FIELDS: &str = "Name,InterfaceDescription,MacAddress,Status,DriverDescription";

pub struct WindowsHandler {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn powershell(&self, interface_id: &str, script: &str) -> SpoofResult<String> {
        run_checked(
            self.runner.as_ref(),
            interface_id,
            POWERSHELL,
            &["-NoProfile", "-NonInteractive", "-Command", script],
        )
        .await
    }

    async fn query(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        let stdout = self.powershell(interface_id, &read_script(interface_id)).await?;
        parse_adapters(&stdout)?
            .into_iter()
            .next()
            .ok_or_else(|| SpoofError::NotFound {
                interface: interface_id.to_string(),
            })
    }
}

#[async_trait]
impl PlatformHandler for WindowsHandler {
    fn name(&self) -> &'static str {
        "windows"
    }

    async fn list_interfaces(&self) -> SpoofResult<Vec<NetworkInterface>> {
        let stdout = self.powershell("*", &list_script()).await?;
        let mut interfaces = parse_adapters(&stdout)?;
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
        let script = set_address_script(interface_id, &mac);

        cycle_link(self, interface_id, current.status.is_up(), async {
            self.powershell(interface_id, &script).await?;
            info!(interface = interface_id, mac = %mac, "NetworkAddress written");
            Ok(())
        })
        .await
    }

    async fn set_link_state(&self, interface_id: &str, up: bool) -> SpoofResult<()> {
        self.powershell(interface_id, &link_script(interface_id, up)).await?;
        Ok(())
    }
}

/// PowerShell ends a single-quoted literal on any of these
const SINGLE_QUOTES: [char; 5] = ['\'', '\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}'];

/// Quote a value as a PowerShell single-quoted literal
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if SINGLE_QUOTES.contains(&c) {
            quoted.push(c);
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

pub fn list_script() -> String {
    format!(
        "Get-NetAdapter | Select-Object {} | ConvertTo-Json -Compress",
        ADAPTER_FIELDS
    )
}

pub fn read_script(interface_id: &str) -> String {
    format!(
        "Get-NetAdapter -Name {} -ErrorAction Stop | Select-Object {} | ConvertTo-Json -Compress",
        quote(interface_id),
        ADAPTER_FIELDS
    )
}

pub fn set_address_script(interface_id: &str, mac: &MacAddress) -> String {
    format!(
        "Set-NetAdapterAdvancedProperty -Name {} -RegistryKeyword NetworkAddress -RegistryValue {} -NoRestart -ErrorAction Stop",
        quote(interface_id),
        quote(&mac.to_registry_value())
    )
}

pub fn link_script(interface_id: &str, up: bool) -> String {
    if up {
        format!("Enable-NetAdapter -Name {} -ErrorAction Stop", quote(interface_id))
    } else {
        format!(
            "Disable-NetAdapter -Name {} -Confirm:$false -ErrorAction Stop",
            quote(interface_id)
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AdapterRecord {
    name: String,
    #[serde(default)]
    interface_description: Option<String>,
    #[serde(default)]
    mac_address: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    driver_description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<AdapterRecord>),
    One(AdapterRecord),
}

/// Parse `ConvertTo-Json` output, which is a bare object for a single adapter
pub fn parse_adapters(output: &str) -> SpoofResult<Vec<NetworkInterface>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let records = match serde_json::from_str::<OneOrMany>(trimmed)? {
        OneOrMany::Many(records) => records,
        OneOrMany::One(record) => vec![record],
    };

    Ok(records
        .into_iter()
        .map(|r| {
            // "Disabled" is the only administratively down state; "Disconnected" is enabled
            let status = match r.status.as_deref() {
                Some("Disabled") => LinkStatus::Down,
                Some("Up") | Some("Disconnected") => LinkStatus::Up,
                _ => LinkStatus::Unknown,
            };
            let mut iface = NetworkInterface::new(
                r.name,
                r.mac_address.as_deref().and_then(|m| m.parse().ok()),
                status,
            );
            iface.description = r.interface_description;
            iface.driver = r.driver_description;
            iface
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CommandOutput;
    use crate::testing::ScriptedRunner;

    fn ps(script: &str) -> String {
        format!("powershell -NoProfile -NonInteractive -Command {}", script)
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("Ethernet"), "'Ethernet'");
        assert_eq!(quote("Bob's NIC"), "'Bob''s NIC'");
    }

    #[test]
    fn test_quote_escapes_typographic_quotes() {
        assert_eq!(quote("a\u{2019}b"), "'a\u{2019}\u{2019}b'");
        assert_eq!(quote("\u{2018}x\u{201A}\u{201B}"), "'\u{2018}\u{2018}x\u{201A}\u{201A}\u{201B}\u{201B}'");

        let injected = quote("x\u{2019}; Remove-Item C:\\ #");
        assert_eq!(injected, "'x\u{2019}\u{2019}; Remove-Item C:\\ #'");
        // every quote character inside the literal is paired
        let inner = &injected[1..injected.len() - 1];
        let lone = inner
            .split(|c| !SINGLE_QUOTES.contains(&c))
            .any(|run| run.chars().count() % 2 == 1);
        assert!(!lone);
    }

    #[test]
    fn test_parse_single_and_many() {
        let one = r#"{"Name":"Ethernet","InterfaceDescription":"Intel(R) Ethernet Connection","MacAddress":"00-1B-21-AA-BB-CC","Status":"Up","DriverDescription":"Intel(R) Ethernet Connection"}"#;
        let ifaces = parse_adapters(one).unwrap();
        assert_eq!(ifaces.len(), 1);
        assert_eq!(ifaces[0].mac.unwrap().to_string(), "00:1b:21:aa:bb:cc");
        assert_eq!(ifaces[0].status, LinkStatus::Up);

        let many = r#"[{"Name":"Ethernet","MacAddress":"00-1B-21-AA-BB-CC","Status":"Disconnected"},{"Name":"Wi-Fi","MacAddress":"3C-97-0E-00-00-01","Status":"Disabled"}]"#;
        let ifaces = parse_adapters(many).unwrap();
        assert_eq!(ifaces[0].status, LinkStatus::Up);
        assert_eq!(ifaces[1].status, LinkStatus::Down);
        assert!(parse_adapters("").unwrap().is_empty());
    }

    #[test]
    fn test_set_script_uses_registry_form() {
        let mac: MacAddress = "02:00:5e:10:00:00".parse().unwrap();
        let script = set_address_script("Wi-Fi", &mac);
        assert!(script.contains("-Name 'Wi-Fi'"));
        assert!(script.contains("-RegistryValue '02005E100000'"));
    }

    #[tokio::test]
    async fn test_set_mac_disables_then_enables() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            &ps(&read_script("Ethernet")),
            CommandOutput::ok(r#"{"Name":"Ethernet","MacAddress":"00-1B-21-AA-BB-CC","Status":"Up"}"#),
        );
        let handler = WindowsHandler::new(runner.clone());
        let mac: MacAddress = "02:00:5e:10:00:00".parse().unwrap();

        handler.set_mac("Ethernet", mac).await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                ps(&read_script("Ethernet")),
                ps(&link_script("Ethernet", false)),
                ps(&set_address_script("Ethernet", &mac)),
                ps(&link_script("Ethernet", true)),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_adapter_is_not_found() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            &ps(&read_script("Nope")),
            CommandOutput::failed(
                1,
                "Get-NetAdapter : No MSFT_NetAdapter objects found with property 'Name' equal to 'Nope'.",
            ),
        );
        let handler = WindowsHandler::new(runner);
        let err = handler.read_mac("Nope").await.unwrap_err();
        assert!(matches!(err, SpoofError::NotFound { .. }));
    }
}
