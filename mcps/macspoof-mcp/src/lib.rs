//! MacSpoof MCP Library
//!
//! Exposes the transactional MAC address engine as MCP tools.
//!
//! ```rust,ignore
//! use macspoof_mcp::MacSpoofMcpServer;
//!
//! let server = MacSpoofMcpServer::new()?;
//! ```

pub mod handlers;
pub mod params;
pub mod result;
pub mod server;

pub use server::MacSpoofMcpServer;
