//! Linux backend (`ip`, `ethtool`)

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::command::{run_checked, CommandRunner};
use super::{cycle_link, missing_address, PlatformHandler};
use crate::error::{SpoofError, SpoofResult};
use crate::interface::{attach_ip_addresses, LinkStatus, NetworkInterface};
use crate::mac::MacAddress;

const IP: &str = "ip";
const ETHTOOL: &str = "ethtool";

pub struct LinuxHandler {
    runner: Arc<dyn CommandRunner>,
}

impl LinuxHandler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn query(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        let stdout = run_checked(
            self.runner.as_ref(),
            interface_id,
            IP,
            &["-o", "link", "show", "dev", interface_id],
        )
        .await?;

        parse_ip_link(&stdout)
            .into_iter()
            .next()
            .ok_or_else(|| SpoofError::NotFound {
                interface: interface_id.to_string(),
            })
    }

    /// Driver name from `ethtool -i`; absent tool or virtual devices give `None`
    async fn driver(&self, interface_id: &str) -> Option<String> {
        match self.runner.run(ETHTOOL, &["-i", interface_id]).await {
            Ok(out) if out.success() => parse_ethtool_driver(&out.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!(interface = interface_id, error = %e, "ethtool unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl PlatformHandler for LinuxHandler {
    fn name(&self) -> &'static str {
        "linux"
    }

    async fn list_interfaces(&self) -> SpoofResult<Vec<NetworkInterface>> {
        let stdout = run_checked(self.runner.as_ref(), "*", IP, &["-o", "link", "show"]).await?;
        let mut interfaces = parse_ip_link(&stdout);
        for iface in interfaces.iter_mut() {
            iface.driver = self.driver(&iface.name).await;
        }
        attach_ip_addresses(&mut interfaces);
        Ok(interfaces)
    }

    async fn interface(&self, interface_id: &str) -> SpoofResult<NetworkInterface> {
        let mut iface = self.query(interface_id).await?;
        iface.driver = self.driver(interface_id).await;
        Ok(iface)
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
        let args = ["link", "set", "dev", interface_id, "address", mac_text.as_str()];

        cycle_link(self, interface_id, current.status.is_up(), async {
            run_checked(self.runner.as_ref(), interface_id, IP, &args).await?;
            info!(interface = interface_id, mac = %mac, "address written");
            Ok(())
        })
        .await
    }

    async fn set_link_state(&self, interface_id: &str, up: bool) -> SpoofResult<()> {
        let state = if up { "up" } else { "down" };
        run_checked(
            self.runner.as_ref(),
            interface_id,
            IP,
            &["link", "set", "dev", interface_id, state],
        )
        .await?;
        Ok(())
    }
}

/// Parse `ip -o link show` output, one interface per line
pub fn parse_ip_link(output: &str) -> Vec<NetworkInterface> {
    output.lines().filter_map(parse_ip_link_line).collect()
}

fn parse_ip_link_line(line: &str) -> Option<NetworkInterface> {
    // "2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 ... link/ether 00:11:22:33:44:55 brd ..."
    let mut parts = line.splitn(3, ": ");
    parts.next()?.trim().parse::<u32>().ok()?;
    let raw_name = parts.next()?.trim();
    let rest = parts.next()?;

    let name = raw_name.split('@').next().unwrap_or(raw_name).to_string();

    let flags = rest
        .find('<')
        .and_then(|start| rest[start + 1..].find('>').map(|end| &rest[start + 1..start + 1 + end]))
        .unwrap_or("");
    let status = if flags.split(',').any(|f| f == "UP") {
        LinkStatus::Up
    } else {
        LinkStatus::Down
    };

    let mut tokens = rest.split_whitespace();
    let mut mac = None;
    while let Some(token) = tokens.next() {
        if token == "link/ether" || token == "link/loopback" {
            mac = tokens.next().and_then(|m| m.parse::<MacAddress>().ok());
            break;
        }
    }

    Some(NetworkInterface::new(name, mac, status))
}

pub fn parse_ethtool_driver(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.strip_prefix("driver:")
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::CommandOutput;
    use crate::testing::ScriptedRunner;

    const LINK_OUTPUT: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP mode DEFAULT group default qlen 1000\\    link/ether 00:11:22:33:44:55 brd ff:ff:ff:ff:ff:ff
3: wlan0: <NO-CARRIER,BROADCAST,MULTICAST> mtu 1500 qdisc noop state DOWN mode DORMANT group default qlen 1000\\    link/ether 3c:97:0e:aa:bb:cc brd ff:ff:ff:ff:ff:ff
4: veth1@if5: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP mode DEFAULT group default\\    link/ether 02:42:ac:11:00:02 brd ff:ff:ff:ff:ff:ff link-netnsid 0
5: tun0: <POINTOPOINT,MULTICAST,NOARP,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UNKNOWN mode DEFAULT group default qlen 500\\    link/none
";

    fn eth0_line(flags: &str) -> String {
        format!(
            "2: eth0: <{flags}> mtu 1500 qdisc fq_codel state UP\\    link/ether 00:11:22:33:44:55 brd ff:ff:ff:ff:ff:ff\n"
        )
    }

    #[test]
    fn test_parse_ip_link() {
        let ifaces = parse_ip_link(LINK_OUTPUT);
        assert_eq!(ifaces.len(), 5);

        assert_eq!(ifaces[1].name, "eth0");
        assert_eq!(ifaces[1].mac.unwrap().to_string(), "00:11:22:33:44:55");
        assert_eq!(ifaces[1].status, LinkStatus::Up);

        assert_eq!(ifaces[2].status, LinkStatus::Down);
        assert_eq!(ifaces[3].name, "veth1");
        assert!(ifaces[4].mac.is_none());
    }

    #[test]
    fn test_lower_up_alone_is_not_up() {
        let ifaces = parse_ip_link(&eth0_line("BROADCAST,MULTICAST,LOWER_UP"));
        assert_eq!(ifaces[0].status, LinkStatus::Down);
    }

    #[test]
    fn test_parse_ethtool_driver() {
        let out = "driver: e1000e\nversion: 5.15.0\nfirmware-version: 0.13-4\n";
        assert_eq!(parse_ethtool_driver(out), Some("e1000e".to_string()));
        assert_eq!(parse_ethtool_driver("version: 1\n"), None);
    }

    #[tokio::test]
    async fn test_set_mac_cycles_link_when_up() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "ip -o link show dev eth0",
            CommandOutput::ok(eth0_line("BROADCAST,MULTICAST,UP,LOWER_UP")),
        );
        let handler = LinuxHandler::new(runner.clone());

        handler
            .set_mac("eth0", "02:00:5e:10:00:00".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "ip -o link show dev eth0",
                "ip link set dev eth0 down",
                "ip link set dev eth0 address 02:00:5e:10:00:00",
                "ip link set dev eth0 up",
            ]
        );
    }

    #[tokio::test]
    async fn test_set_mac_leaves_down_link_down() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "ip -o link show dev eth0",
            CommandOutput::ok(eth0_line("BROADCAST,MULTICAST")),
        );
        let handler = LinuxHandler::new(runner.clone());

        handler
            .set_mac("eth0", "02:00:5e:10:00:00".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "ip -o link show dev eth0",
                "ip link set dev eth0 address 02:00:5e:10:00:00",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_write_still_restores_link() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "ip -o link show dev eth0",
            CommandOutput::ok(eth0_line("BROADCAST,MULTICAST,UP,LOWER_UP")),
        );
        runner.respond(
            "ip link set dev eth0 address 02:00:5e:10:00:00",
            CommandOutput::failed(2, "RTNETLINK answers: Cannot assign requested address"),
        );
        let handler = LinuxHandler::new(runner.clone());

        let err = handler
            .set_mac("eth0", "02:00:5e:10:00:00".parse().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, SpoofError::UnsupportedDriver { .. }));
        assert_eq!(runner.calls().last().unwrap(), "ip link set dev eth0 up");
    }

    #[tokio::test]
    async fn test_read_mac_missing_device() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "ip -o link show dev eth9",
            CommandOutput::failed(1, "Device \"eth9\" does not exist."),
        );
        let handler = LinuxHandler::new(runner);
        let err = handler.read_mac("eth9").await.unwrap_err();
        assert!(matches!(err, SpoofError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_ip_tool() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.missing_tool("ip");
        let handler = LinuxHandler::new(runner);
        let err = handler.read_mac("eth0").await.unwrap_err();
        assert!(matches!(err, SpoofError::ToolUnavailable { .. }));
    }
}
