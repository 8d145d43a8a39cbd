//! mcp-fleet — supervisor for a fleet of stdio MCP servers.
//!
//! Each configured server runs as a child process speaking JSON-RPC over its
//! stdin/stdout. [`ServerManager`] starts, watches and restarts them and
//! exposes their combined tools, resources and prompts as one surface.
//!
//! ```no_run
//! # async fn run() -> Result<(), mcp_fleet::McpError> {
//! use mcp_fleet::{ConfigSource, ServerManager};
//!
//! let manager = ServerManager::new(ConfigSource::default_candidates());
//! manager.initialize().await?;
//! let result = manager
//!     .call_tool_by_name("echo", serde_json::json!({"text": "hi"}))
//!     .await;
//! println!("{:?}", result.content);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod manager;
pub mod mcp_client;

pub use config::{ConfigSource, FleetConfig, HealthCheckConfig, ServerConfig, Settings};
pub use manager::{EventBus, FleetEvent, ServerManager, ServerStatus, ToolEntry};
pub use mcp_client::{McpClient, McpError, OperationResult};
