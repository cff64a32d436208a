//! Parameter definitions for macspoof-mcp tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use macspoof_core::SpoofOptions;

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListInterfacesParams {
    #[schemars(description = "Only names containing this text (case-insensitive)")]
    #[serde(default)]
    pub name: Option<String>,
    #[schemars(description = "Only names matching this regular expression")]
    #[serde(default)]
    pub regex: Option<String>,
    #[schemars(description = "Link status: up, down or unknown")]
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[schemars(description = "Vendor of the current MAC contains this text (case-insensitive)")]
    #[serde(default)]
    pub vendor: Option<String>,
    #[schemars(description = "true: only interfaces with an IP address, false: only without")]
    #[serde(default)]
    pub has_ip: Option<bool>,
    #[serde(default)]
    pub include_loopback: Option<bool>,
    #[schemars(description = "Free-text search over name, MAC, driver and description")]
    #[serde(default)]
    pub search: Option<String>,
    #[schemars(description = "Order by name, mac, status, driver, vendor or ip")]
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub reverse: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidateMacParams {
    #[schemars(description = "MAC address in colon, dash, dotted or bare-hex form")]
    pub mac: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GenerateMacParams {
    #[schemars(description = "realistic (vendor prefix) or random (locally administered)")]
    #[serde(default)]
    pub mode: Option<String>,
    #[schemars(description = "Use a prefix of this vendor, e.g. intel or apple")]
    #[serde(default)]
    pub vendor: Option<String>,
    #[schemars(description = "How many addresses to generate (1-100)")]
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct HistoryParams {
    #[schemars(description = "Return one transaction by ID or prefix (min 8 chars)")]
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[schemars(description = "committed, failed, rolled_back or partial")]
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[schemars(description = "Return aggregate counts instead of entries")]
    #[serde(default)]
    pub stats: Option<bool>,
}

// ============================================================================
// Mutations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpoofMacParams {
    pub interface: String,
    pub mac: String,
    #[schemars(description = "Read the address back after writing (default from config)")]
    #[serde(default)]
    pub verify: Option<bool>,
    #[schemars(description = "Undo applied steps on failure (default from config)")]
    #[serde(default)]
    pub auto_rollback: Option<bool>,
    #[schemars(description = "Accept multicast and unknown-vendor addresses")]
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchEntry {
    pub interface: String,
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpoofBatchParams {
    #[schemars(description = "Changes applied in order as one all-or-nothing transaction")]
    pub entries: Vec<BatchEntry>,
    #[serde(default)]
    pub verify: Option<bool>,
    #[serde(default)]
    pub auto_rollback: Option<bool>,
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpoofRandomParams {
    pub interface: String,
    #[schemars(description = "realistic (vendor prefix) or random (locally administered)")]
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub verify: Option<bool>,
    #[serde(default)]
    pub auto_rollback: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RestoreMacParams {
    pub interface: String,
    #[schemars(description = "Restore the address from before the first recorded change")]
    #[serde(default)]
    pub original: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecoverParams {
    #[schemars(description = "ID or prefix (min 8 chars) of a failed transaction")]
    pub transaction_id: String,
}

/// Per-call overrides on top of the configured defaults
pub fn options(
    defaults: SpoofOptions,
    verify: Option<bool>,
    auto_rollback: Option<bool>,
    force: Option<bool>,
) -> SpoofOptions {
    SpoofOptions {
        verify: verify.unwrap_or(defaults.verify),
        auto_rollback: auto_rollback.unwrap_or(defaults.auto_rollback),
        force: force.unwrap_or(defaults.force),
    }
}
