//! Plain text and JSON rendering
//!
//! Results go to stdout; logs go to stderr through tracing.

use std::collections::BTreeMap;

use serde::Serialize;

use macspoof_core::history::HistoryStats;
use macspoof_core::mac::{MacAddress, MacReport};
use macspoof_core::scheduler::{ScheduledTask, TaskRun};
use macspoof_core::{NetworkInterface, Profile, Transaction, TransactionStatus};

#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// JSON when requested, otherwise the text produced by `plain`
    pub fn emit<T: Serialize + ?Sized>(&self, value: &T, plain: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            let text = plain();
            if !text.is_empty() {
                println!("{}", text.trim_end());
            }
        }
        Ok(())
    }
}

pub fn interfaces(list: &[NetworkInterface]) -> String {
    if list.is_empty() {
        return "No interfaces matched.".to_string();
    }
    let width = list.iter().map(|i| i.name.len()).max().unwrap_or(4).max(4);
    let mut out = format!("{:<width$}  {:<17}  {:<7}  {}\n", "NAME", "MAC", "STATUS", "DRIVER");
    for iface in list {
        let mac = iface.mac.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<width$}  {:<17}  {:<7}  {}\n",
            iface.name,
            mac,
            iface.status.as_str(),
            iface.driver.as_deref().unwrap_or("-"),
        ));
    }
    out
}

pub fn duplicates(shared: &BTreeMap<MacAddress, Vec<String>>) -> String {
    if shared.is_empty() {
        return "No duplicate addresses.".to_string();
    }
    shared
        .iter()
        .map(|(mac, names)| format!("{}  {}", mac, names.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn interface_detail(iface: &NetworkInterface) -> String {
    let mut out = format!("{}\n", iface.name);
    let mac = iface.mac.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string());
    out.push_str(&format!("  mac:     {}\n", mac));
    out.push_str(&format!("  status:  {}\n", iface.status.as_str()));
    if let Some(driver) = &iface.driver {
        out.push_str(&format!("  driver:  {}\n", driver));
    }
    if let Some(description) = &iface.description {
        out.push_str(&format!("  about:   {}\n", description));
    }
    for ip in &iface.ip_addresses {
        out.push_str(&format!("  ip:      {}\n", ip));
    }
    out
}

pub fn mac_report(report: &MacReport) -> String {
    format!(
        "{}\n  vendor:  {}\n  unicast: {}\n  locally administered: {}",
        report.mac,
        report.vendor.as_deref().unwrap_or("unknown"),
        report.unicast,
        report.locally_administered,
    )
}

pub fn transaction(tx: &Transaction) -> String {
    let mut out = format!("Transaction {} [{}] {}\n", short_id(&tx.id), tx.kind.as_str(), tx.status);
    for step in &tx.steps {
        let previous = step
            .previous_mac
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".to_string());
        out.push_str(&format!(
            "  {}: {} -> {} ({})\n",
            step.interface_id,
            previous,
            step.requested_mac,
            step.status.as_str()
        ));
        if let Some(err) = &step.error {
            out.push_str(&format!("    error: {}\n", err));
        }
        if let Some(err) = &step.rollback_error {
            out.push_str(&format!("    restore failed: {}\n", err));
        }
    }
    if let Some(report) = &tx.rollback {
        if !report.attempted.is_empty() {
            out.push_str(&format!("  rolled back: {}\n", report.attempted.join(", ")));
        }
        if !report.failed.is_empty() {
            let failed: Vec<String> = report
                .failed
                .iter()
                .map(|f| format!("{} (wanted {})", f.interface_id, f.mac))
                .collect();
            out.push_str(&format!("  NOT restored: {}\n", failed.join(", ")));
        }
    }
    if let Some(err) = &tx.log_error {
        out.push_str(&format!("  NOT recorded in history: {}\n", err));
    }
    if tx.status == TransactionStatus::Failed {
        out.push_str(&format!(
            "  applied steps were left in place; run `macspoof recover {}` to undo them\n",
            short_id(&tx.id)
        ));
    }
    out
}

pub fn history(entries: &[Transaction]) -> String {
    if entries.is_empty() {
        return "No transactions recorded.".to_string();
    }
    entries
        .iter()
        .map(|tx| {
            format!(
                "{}  {}  {:<11}  {}",
                short_id(&tx.id),
                tx.started_at.format("%Y-%m-%d %H:%M:%S"),
                tx.status.as_str(),
                tx.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn stats(stats: &HistoryStats) -> String {
    let mut out = format!("Transactions: {}\n", stats.total);
    for (status, count) in &stats.by_status {
        out.push_str(&format!("  {:<11} {}\n", status, count));
    }
    if !stats.interfaces.is_empty() {
        out.push_str(&format!("Interfaces: {}\n", stats.interfaces.join(", ")));
    }
    if let (Some(first), Some(last)) = (stats.first_at, stats.last_at) {
        out.push_str(&format!("Span: {} .. {}\n", first.to_rfc3339(), last.to_rfc3339()));
    }
    out
}

pub fn profiles(list: &[Profile]) -> String {
    if list.is_empty() {
        return "No profiles saved.".to_string();
    }
    list.iter()
        .map(|p| {
            let mut line = format!("{} ({} interfaces)", p.name, p.entries.len());
            if !p.description.is_empty() {
                line.push_str(&format!(" - {}", p.description));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn profile_detail(profile: &Profile) -> String {
    let mut out = format!("{}\n", profile.name);
    if !profile.description.is_empty() {
        out.push_str(&format!("  {}\n", profile.description));
    }
    if !profile.tags.is_empty() {
        out.push_str(&format!("  tags: {}\n", profile.tags.join(", ")));
    }
    for entry in &profile.entries {
        out.push_str(&format!("  {} = {}\n", entry.interface, entry.mac));
    }
    out
}

pub fn tasks(list: &[ScheduledTask]) -> String {
    if list.is_empty() {
        return "No scheduled tasks.".to_string();
    }
    list.iter()
        .map(|t| {
            let next = t
                .next_run
                .map(|n| n.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            let state = if !t.enabled {
                "disabled"
            } else if t.is_exhausted() {
                "done"
            } else {
                "active"
            };
            let last = t
                .last_outcome
                .as_ref()
                .map(|o| format!(", last {}", o.status))
                .unwrap_or_default();
            format!(
                "{} [{}] {} on {}, runs {}, next {}{}",
                t.name,
                state,
                t.action.as_str(),
                t.interface,
                t.run_count,
                next,
                last
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn task_runs(runs: &[TaskRun]) -> String {
    if runs.is_empty() {
        return "No tasks due.".to_string();
    }
    runs.iter()
        .map(|r| {
            let mut line = format!("{} on {}: {}", r.task, r.interface, r.outcome.status);
            if let Some(message) = &r.outcome.message {
                line.push_str(&format!(" ({})", message));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
