//! MacSpoof MCP - transactional MAC address changes over stdio

use macspoof_mcp::MacSpoofMcpServer;
use rmcp::{transport::io::stdio, ServiceExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    macspoof_core::telemetry::init_tracing("macspoof_mcp", false)?;

    tracing::info!("Starting MacSpoof MCP server");

    let server = MacSpoofMcpServer::new()?;
    let service = server.serve(stdio()).await?;

    tracing::info!("MacSpoof MCP server running");

    service.waiting().await?;

    tracing::info!("MacSpoof MCP server stopped");

    Ok(())
}
