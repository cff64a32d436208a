//! Result helpers for tool responses

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

use macspoof_core::Transaction;

pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// The full record either way; flagged as an error unless it committed and
/// reached the history log
pub fn transaction_result(tx: &Transaction) -> Result<CallToolResult, McpError> {
    if tx.succeeded() {
        return json_success(tx);
    }
    let json = serde_json::to_string_pretty(tx)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::error(vec![Content::text(json)]))
}
