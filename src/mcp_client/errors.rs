//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client and fleet operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake or initial discovery failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (serialization, I/O, closed stream).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No response arrived within the request timeout.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        timeout_ms: u64,
    },

    /// Server process exited while requests were outstanding.
    #[error("server '{name}' crashed: {reason}")]
    ServerCrashed {
        name: String,
        reason: String,
    },

    /// The client was disconnected while the request was in flight.
    #[error("server '{name}' is disconnecting")]
    Disconnecting {
        name: String,
    },

    /// An operation was routed to a server without a connected client.
    #[error("server '{name}' is not connected")]
    NotConnected {
        name: String,
    },

    /// No connected server exposes the requested tool.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Configuration error (unknown server id, disabled server, bad config file).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },

    /// All restart attempts exhausted for a server.
    #[error("server '{name}' failed after {attempts} restart attempts")]
    RestartExhausted {
        name: String,
        attempts: u32,
    },
}

impl McpError {
    /// Whether this error came from the transport layer rather than the server.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::TransportError { .. }
                | McpError::ServerCrashed { .. }
                | McpError::Disconnecting { .. }
        )
    }
}
