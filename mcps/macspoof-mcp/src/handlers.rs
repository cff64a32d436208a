//! Handler implementations for macspoof-mcp tools
//!
//! Each handler parses tool params into engine types, calls the spoofer and
//! converts the outcome. Refusals (bad input, missing privilege, contention)
//! become MCP errors; a transaction that ran but did not commit is returned
//! in full with the error flag set.

use rmcp::{model::CallToolResult, ErrorData as McpError};
use serde_json::json;

use macspoof_core::filter::{self, InterfaceFilter, SortField};
use macspoof_core::history::HistoryFilter;
use macspoof_core::{MacAddress, MacAddressSpoofer, MacStrategy, SpoofError};

use crate::params::*;
use crate::result::{json_success, transaction_result};

const MAX_GENERATE: usize = 100;
const DEFAULT_HISTORY_LIMIT: usize = 20;

pub fn spoof_error_to_mcp(e: SpoofError) -> McpError {
    let data = Some(json!({ "kind": e.kind() }));
    match e {
        SpoofError::InvalidInput(_)
        | SpoofError::NotFound { .. }
        | SpoofError::NothingToRestore { .. }
        | SpoofError::InvalidState(_) => McpError::invalid_params(e.to_string(), data),
        SpoofError::PermissionDenied(_) | SpoofError::Contention { .. } => {
            McpError::invalid_request(e.to_string(), data)
        }
        _ => McpError::internal_error(e.to_string(), data),
    }
}

fn parse_mac(text: &str) -> Result<MacAddress, McpError> {
    text.parse().map_err(spoof_error_to_mcp)
}

fn parse_strategy(
    mode: Option<&str>,
    vendor: Option<String>,
    default: &MacStrategy,
) -> Result<MacStrategy, McpError> {
    if let Some(vendor) = vendor {
        return Ok(MacStrategy::Vendor(vendor));
    }
    match mode.map(str::to_lowercase).as_deref() {
        None => Ok(default.clone()),
        Some("realistic") => Ok(MacStrategy::Realistic),
        Some("random") => Ok(MacStrategy::Random),
        Some(other) => Err(McpError::invalid_params(
            format!("Invalid mode '{}': expected realistic or random", other),
            None,
        )),
    }
}

// ============================================================================
// Queries
// ============================================================================

pub async fn list_interfaces(
    spoofer: &MacAddressSpoofer,
    params: ListInterfacesParams,
) -> Result<CallToolResult, McpError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| McpError::invalid_params(e, None))?;
    let criteria = InterfaceFilter {
        name: params.name,
        regex: params.regex,
        status,
        driver: params.driver,
        vendor: params.vendor,
        has_ip: params.has_ip,
        exclude_loopback: !params.include_loopback.unwrap_or(false),
    };
    let sort: SortField = params
        .sort
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| McpError::invalid_params(e, None))?
        .unwrap_or_default();

    let mut interfaces = spoofer
        .list_interfaces(&criteria)
        .await
        .map_err(spoof_error_to_mcp)?;
    if let Some(keyword) = params.search {
        interfaces = filter::search(interfaces, &keyword);
    }
    filter::sort_by(&mut interfaces, sort, params.reverse.unwrap_or(false));

    json_success(&json!({
        "count": interfaces.len(),
        "interfaces": interfaces,
        "duplicates": filter::duplicate_macs(&interfaces),
    }))
}

pub fn validate_mac(
    spoofer: &MacAddressSpoofer,
    params: ValidateMacParams,
) -> Result<CallToolResult, McpError> {
    match spoofer.validate(&params.mac) {
        Ok(mac) => json_success(&json!({
            "valid": true,
            "report": spoofer.describe(&mac),
        })),
        Err(e) => json_success(&json!({
            "valid": false,
            "reason": e.to_string(),
        })),
    }
}

pub fn generate_mac(
    spoofer: &MacAddressSpoofer,
    default: &MacStrategy,
    params: GenerateMacParams,
) -> Result<CallToolResult, McpError> {
    let count = params.count.unwrap_or(1);
    if count == 0 || count > MAX_GENERATE {
        return Err(McpError::invalid_params(
            format!("count must be between 1 and {}", MAX_GENERATE),
            None,
        ));
    }
    let strategy = parse_strategy(params.mode.as_deref(), params.vendor, default)?;

    let reports = (0..count)
        .map(|_| strategy.generate().map(|mac| spoofer.describe(&mac)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(spoof_error_to_mcp)?;
    json_success(&reports)
}

pub fn transaction_history(
    spoofer: &MacAddressSpoofer,
    params: HistoryParams,
) -> Result<CallToolResult, McpError> {
    if let Some(id) = params.transaction_id {
        return match spoofer.transaction(&id).map_err(spoof_error_to_mcp)? {
            Some(tx) => json_success(&tx),
            None => Err(McpError::invalid_params(
                format!("No transaction matches '{}'", id),
                None,
            )),
        };
    }
    if params.stats.unwrap_or(false) {
        return json_success(&spoofer.history_stats().map_err(spoof_error_to_mcp)?);
    }

    let status = params
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| McpError::invalid_params(e, None))?;
    let entries = spoofer
        .history(&HistoryFilter {
            interface: params.interface,
            status,
            kind: None,
            limit: Some(params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
        })
        .map_err(spoof_error_to_mcp)?;
    json_success(&json!({
        "count": entries.len(),
        "transactions": entries,
    }))
}

// ============================================================================
// Mutations
// ============================================================================

pub async fn spoof_mac(
    spoofer: &MacAddressSpoofer,
    params: SpoofMacParams,
) -> Result<CallToolResult, McpError> {
    let mac = parse_mac(&params.mac)?;
    let opts = options(spoofer.defaults(), params.verify, params.auto_rollback, params.force);
    let tx = spoofer
        .spoof_with(&params.interface, mac, opts)
        .await
        .map_err(spoof_error_to_mcp)?;
    transaction_result(&tx)
}

pub async fn spoof_batch(
    spoofer: &MacAddressSpoofer,
    params: SpoofBatchParams,
) -> Result<CallToolResult, McpError> {
    let mappings = params
        .entries
        .iter()
        .map(|e| parse_mac(&e.mac).map(|mac| (e.interface.clone(), mac)))
        .collect::<Result<Vec<_>, _>>()?;
    let opts = options(spoofer.defaults(), params.verify, params.auto_rollback, params.force);
    let tx = spoofer
        .spoof_batch_with(&mappings, opts)
        .await
        .map_err(spoof_error_to_mcp)?;
    transaction_result(&tx)
}

pub async fn spoof_random(
    spoofer: &MacAddressSpoofer,
    default: &MacStrategy,
    params: SpoofRandomParams,
) -> Result<CallToolResult, McpError> {
    let strategy = parse_strategy(params.mode.as_deref(), params.vendor, default)?;
    let opts = options(spoofer.defaults(), params.verify, params.auto_rollback, None);
    let tx = spoofer
        .generate_and_spoof_with(&params.interface, &strategy, opts)
        .await
        .map_err(spoof_error_to_mcp)?;
    transaction_result(&tx)
}

pub async fn restore_mac(
    spoofer: &MacAddressSpoofer,
    params: RestoreMacParams,
) -> Result<CallToolResult, McpError> {
    let tx = if params.original.unwrap_or(false) {
        spoofer.restore_original(&params.interface).await
    } else {
        spoofer.restore(&params.interface).await
    }
    .map_err(spoof_error_to_mcp)?;
    transaction_result(&tx)
}

pub async fn recover_transaction(
    spoofer: &MacAddressSpoofer,
    params: RecoverParams,
) -> Result<CallToolResult, McpError> {
    let tx = spoofer
        .recover(&params.transaction_id)
        .await
        .map_err(spoof_error_to_mcp)?;
    transaction_result(&tx)
}
