//! MCP Client — JSON-RPC over stdio transport for a single MCP server.
//!
//! This module handles:
//! - Line framing and request/response correlation over process stdio
//! - Spawning, watching and terminating server child processes
//! - The `initialize` handshake and tool/resource/prompt discovery
//! - Keeping discovered lists current on `*/list_changed` notifications
//!
//! The fleet-level view (many servers, routing, restarts) lives in
//! [`crate::manager`].

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{ClientEvent, McpClient};
pub use errors::McpError;
pub use lifecycle::ExitInfo;
pub use types::{
    CapabilityKind, CapabilitySnapshot, ConnectionState, OperationResult, Prompt, Resource,
    ServerCapabilities, ServerInfo, Tool,
};
