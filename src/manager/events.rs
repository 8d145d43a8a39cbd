//! Fleet event stream.
//!
//! Every observable state change of the fleet is published as a [`FleetEvent`]
//! on an in-process broadcast bus. Consumers subscribe once and filter by
//! variant (or by [`FleetEvent::name`]).

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::mcp_client::types::ServerInfo;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_BUS_CAPACITY: usize = 256;

/// Events published by the server manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum FleetEvent {
    /// A server finished its handshake and discovery.
    #[serde(rename = "server:connected")]
    ServerConnected {
        server_id: String,
        server_info: Option<ServerInfo>,
        tools: usize,
        resources: usize,
        prompts: usize,
    },

    /// A server left the fleet (explicit stop or crash).
    #[serde(rename = "server:disconnected")]
    ServerDisconnected { server_id: String, reason: String },

    /// Start failure, crash, or exhausted restarts.
    #[serde(rename = "server:error")]
    ServerError { server_id: String, error: String },

    /// A tool call finished. `server_id` is `None` when no server had the tool.
    #[serde(rename = "tool:called")]
    ToolCalled {
        server_id: Option<String>,
        tool: String,
        success: bool,
        duration_ms: u64,
    },

    #[serde(rename = "resource:read")]
    ResourceRead {
        server_id: String,
        uri: String,
        success: bool,
        duration_ms: u64,
    },

    #[serde(rename = "prompt:executed")]
    PromptExecuted {
        server_id: String,
        prompt: String,
        success: bool,
        duration_ms: u64,
    },

    /// Result of one periodic liveness probe.
    #[serde(rename = "health:check")]
    HealthCheck { server_id: String, healthy: bool },

    /// A server notification the client did not consume itself.
    #[serde(rename = "notification")]
    Notification {
        server_id: String,
        method: String,
        params: Option<Value>,
    },
}

impl FleetEvent {
    /// The wire name of the event, e.g. `"server:connected"`.
    pub fn name(&self) -> &'static str {
        match self {
            FleetEvent::ServerConnected { .. } => "server:connected",
            FleetEvent::ServerDisconnected { .. } => "server:disconnected",
            FleetEvent::ServerError { .. } => "server:error",
            FleetEvent::ToolCalled { .. } => "tool:called",
            FleetEvent::ResourceRead { .. } => "resource:read",
            FleetEvent::PromptExecuted { .. } => "prompt:executed",
            FleetEvent::HealthCheck { .. } => "health:check",
            FleetEvent::Notification { .. } => "notification",
        }
    }

    /// The server the event is about, if any.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            FleetEvent::ServerConnected { server_id, .. }
            | FleetEvent::ServerDisconnected { server_id, .. }
            | FleetEvent::ServerError { server_id, .. }
            | FleetEvent::ResourceRead { server_id, .. }
            | FleetEvent::PromptExecuted { server_id, .. }
            | FleetEvent::HealthCheck { server_id, .. }
            | FleetEvent::Notification { server_id, .. } => Some(server_id),
            FleetEvent::ToolCalled { server_id, .. } => server_id.as_deref(),
        }
    }
}

/// In-process event bus using a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: FleetEvent) {
        tracing::trace!(event = event.name(), server = ?event.server_id(), "fleet event");
        // Send to broadcast channel (ignore if no receivers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = FleetEvent::HealthCheck {
            server_id: "echo".into(),
            healthy: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "health:check");
        assert_eq!(json["server_id"], "echo");
        assert_eq!(json["healthy"], true);
        assert_eq!(event.name(), "health:check");
    }

    #[test]
    fn test_unrouted_tool_call_has_no_server() {
        let event = FleetEvent::ToolCalled {
            server_id: None,
            tool: "missing".into(),
            success: false,
            duration_ms: 0,
        };
        assert_eq!(event.server_id(), None);
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], "tool:called");
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(FleetEvent::ServerError {
            server_id: "x".into(),
            error: "boom".into(),
        });

        assert_eq!(a.recv().await.unwrap().name(), "server:error");
        assert_eq!(b.recv().await.unwrap().server_id(), Some("x"));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(FleetEvent::ServerDisconnected {
            server_id: "x".into(),
            reason: "stopped".into(),
        });
    }
}
