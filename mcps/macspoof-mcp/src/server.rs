//! MCP Server implementation for MAC address changes
//!
//! Tools delegate to the handlers module. Every mutation goes through one
//! shared [`MacAddressSpoofer`], so concurrent tool calls on the same
//! interface are serialised by its interface locks.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use macspoof_core::{MacAddressSpoofer, MacStrategy, SpooferConfig};

use crate::handlers;
use crate::params::*;

#[derive(Clone)]
pub struct MacSpoofMcpServer {
    spoofer: Arc<MacAddressSpoofer>,
    strategy: MacStrategy,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Tool Router - Each tool delegates to its handler
// ============================================================================

#[tool_router]
impl MacSpoofMcpServer {
    /// Real backend, configured from the usual config search path
    pub fn new() -> anyhow::Result<Self> {
        let config = SpooferConfig::load();
        let spoofer = MacAddressSpoofer::from_config(&config)?;
        Ok(Self::with_spoofer(Arc::new(spoofer), config.default_strategy()))
    }

    pub fn with_spoofer(spoofer: Arc<MacAddressSpoofer>, strategy: MacStrategy) -> Self {
        Self {
            spoofer,
            strategy,
            tool_router: Self::tool_router(),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[tool(description = "List network interfaces with MAC address, link status and driver. Supports name/regex/status/driver filters and free-text search.")]
    async fn list_interfaces(
        &self,
        Parameters(params): Parameters<ListInterfacesParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::list_interfaces(&self.spoofer, params).await
    }

    #[tool(description = "Check a MAC address against the configured policy and report vendor, unicast and locally-administered bits")]
    async fn validate_mac(
        &self,
        Parameters(params): Parameters<ValidateMacParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::validate_mac(&self.spoofer, params)
    }

    #[tool(description = "Generate MAC addresses without applying them")]
    async fn generate_mac(
        &self,
        Parameters(params): Parameters<GenerateMacParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::generate_mac(&self.spoofer, &self.strategy, params)
    }

    #[tool(description = "Transaction log, newest first. Pass transaction_id for one record or stats=true for counts.")]
    async fn transaction_history(
        &self,
        Parameters(params): Parameters<HistoryParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::transaction_history(&self.spoofer, params)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    #[tool(description = "Set an interface's MAC address in a transaction. The previous address is captured and restored automatically if the change fails.")]
    async fn spoof_mac(
        &self,
        Parameters(params): Parameters<SpoofMacParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::spoof_mac(&self.spoofer, params).await
    }

    #[tool(description = "Apply several interface changes in order as one all-or-nothing transaction; on failure the applied ones are restored in reverse order")]
    async fn spoof_batch(
        &self,
        Parameters(params): Parameters<SpoofBatchParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::spoof_batch(&self.spoofer, params).await
    }

    #[tool(description = "Generate an address (realistic vendor prefix, random, or a named vendor) and apply it")]
    async fn spoof_random(
        &self,
        Parameters(params): Parameters<SpoofRandomParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::spoof_random(&self.spoofer, &self.strategy, params).await
    }

    #[tool(description = "Undo the most recent committed change to an interface, or with original=true go back to the address before the first recorded change")]
    async fn restore_mac(
        &self,
        Parameters(params): Parameters<RestoreMacParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::restore_mac(&self.spoofer, params).await
    }

    #[tool(description = "Restore the applied steps of a failed transaction that was run without auto-rollback")]
    async fn recover_transaction(
        &self,
        Parameters(params): Parameters<RecoverParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::recover_transaction(&self.spoofer, params).await
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for MacSpoofMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Transactional MAC address changes. Every change captures the previous address, \
                 verifies the write and rolls back on failure. Mutating tools need root or \
                 administrator privileges; a result with the error flag set still carries the \
                 full transaction record."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
