//! Server Manager — supervises a fleet of MCP servers.
//!
//! The manager owns one [`McpClient`] per running server id and provides:
//! - Lifecycle control (start, stop, restart, reload, shutdown)
//! - Crash recovery with a fixed backoff and a bounded number of restarts
//! - Periodic health checks (see [`health`])
//! - Tool routing by server id or by tool name across the fleet
//! - A single typed event stream for everything above (see [`events`])

pub mod events;
pub mod health;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{ConfigSource, FleetConfig, ServerConfig, Settings};
use crate::mcp_client::client::{ClientEvent, McpClient};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::lifecycle::ExitInfo;
use crate::mcp_client::types::{
    ConnectionState, OperationResult, ServerCapabilities, ServerInfo, Tool,
};

pub use events::{EventBus, FleetEvent};

// ─── Public Types ────────────────────────────────────────────────────────────

/// Point-in-time view of one configured or running server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub status: ConnectionState,
    pub server_info: Option<ServerInfo>,
    pub capabilities: ServerCapabilities,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Crash restarts since the last explicit stop or healthy probe.
    pub restarts: u32,
    pub pid: Option<u32>,
    pub health_check: bool,
}

/// A tool together with the server that provides it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEntry {
    pub server_id: String,
    pub tool: Tool,
}

// ─── ServerManager ───────────────────────────────────────────────────────────

/// Handle to the fleet. Cheap to clone; all clones share one fleet.
#[derive(Clone)]
pub struct ServerManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    source: ConfigSource,
    config: RwLock<FleetConfig>,
    settings: RwLock<Arc<Settings>>,
    clients: Mutex<BTreeMap<String, Arc<McpClient>>>,
    health: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Background restarts (crash backoff or failed health check) by id.
    pending_restarts: Mutex<HashMap<String, JoinHandle<()>>>,
    restarts: Mutex<HashMap<String, u32>>,
    shutting_down: AtomicBool,
    events: EventBus,
}

impl ServerManager {
    /// Create a manager that reads its configuration from `source` on
    /// [`initialize`](Self::initialize) and [`reload_configuration`](Self::reload_configuration).
    pub fn new(source: ConfigSource) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                source,
                config: RwLock::new(FleetConfig::default()),
                settings: RwLock::new(Arc::new(Settings::default())),
                clients: Mutex::new(BTreeMap::new()),
                health: Mutex::new(HashMap::new()),
                pending_restarts: Mutex::new(HashMap::new()),
                restarts: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                events: EventBus::new(),
            }),
        }
    }

    /// Create a manager over a fixed in-memory configuration.
    pub fn with_config(config: FleetConfig) -> Self {
        let manager = Self::new(ConfigSource::Inline(config.clone()));
        manager.inner.install_config(config);
        manager
    }

    /// Receive every fleet event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.inner.events.subscribe()
    }

    /// Current process-wide settings.
    pub fn settings(&self) -> Arc<Settings> {
        self.inner.settings()
    }

    /// Load the configuration and start every enabled auto-start server.
    ///
    /// Servers are started concurrently; a server that fails to start is
    /// logged and does not stop the others. Only an unreadable or malformed
    /// configuration file is an error.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let config = self.inner.source.load()?;
        self.inner.install_config(config);
        self.inner.shutting_down.store(false, Ordering::Release);

        let ids = self.inner.auto_start_ids();
        tracing::info!(server_count = ids.len(), "starting configured servers");

        let results = join_all(
            ids.iter()
                .map(|id| ManagerInner::start_boxed(Arc::clone(&self.inner), id.clone())),
        )
        .await;

        let mut started = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(()) => started += 1,
                Err(e) => tracing::error!(server = %id, error = %e, "failed to start server"),
            }
        }
        tracing::info!(started, total = ids.len(), "fleet initialized");
        Ok(())
    }

    /// Start one configured server. A warned no-op when it is already running.
    ///
    /// Unknown and disabled ids are configuration errors. A server that still
    /// fails after the configured retries returns the last connect error.
    pub async fn start_server(&self, id: &str) -> Result<(), McpError> {
        self.inner.start(id).await
    }

    /// Stop one server and forget its client. Also cancels a restart that is
    /// still waiting out its backoff.
    pub async fn stop_server(&self, id: &str) -> Result<(), McpError> {
        self.inner.stop(id).await
    }

    /// Stop, then start.
    pub async fn restart_server(&self, id: &str) -> Result<(), McpError> {
        ManagerInner::restart_boxed(Arc::clone(&self.inner), id.to_string()).await
    }

    /// Disconnect every server and cancel every timer and pending restart.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Re-read the configuration, restart running servers and start new ones.
    ///
    /// Servers no longer listed keep running unless `prune_on_reload` is set.
    pub async fn reload_configuration(&self) -> Result<(), McpError> {
        self.inner.reload().await
    }

    // ─── Operations ──────────────────────────────────────────────────────

    /// Call `tool` on a specific server.
    pub async fn call_tool(&self, server_id: &str, tool: &str, arguments: Value) -> OperationResult {
        let result = match self.inner.client(server_id) {
            Some(client) => client.call_tool(tool, arguments).await,
            None => not_connected(server_id),
        };
        self.inner.events.publish(FleetEvent::ToolCalled {
            server_id: Some(server_id.to_string()),
            tool: tool.to_string(),
            success: result.success,
            duration_ms: result.duration_ms,
        });
        result
    }

    /// Call the first connected server (by id order) that exposes `tool`.
    pub async fn call_tool_by_name(&self, tool: &str, arguments: Value) -> OperationResult {
        let Some(client) = self.inner.client_for_tool(tool) else {
            tracing::debug!(tool, "no connected server provides tool");
            let result = OperationResult::failure(
                McpError::UnknownTool {
                    name: tool.to_string(),
                }
                .to_string(),
                0,
            );
            self.inner.events.publish(FleetEvent::ToolCalled {
                server_id: None,
                tool: tool.to_string(),
                success: false,
                duration_ms: 0,
            });
            return result;
        };

        let result = client.call_tool(tool, arguments).await;
        self.inner.events.publish(FleetEvent::ToolCalled {
            server_id: Some(client.server_id().to_string()),
            tool: tool.to_string(),
            success: result.success,
            duration_ms: result.duration_ms,
        });
        result
    }

    pub async fn read_resource(&self, server_id: &str, uri: &str) -> OperationResult {
        let result = match self.inner.client(server_id) {
            Some(client) => client.read_resource(uri).await,
            None => not_connected(server_id),
        };
        self.inner.events.publish(FleetEvent::ResourceRead {
            server_id: server_id.to_string(),
            uri: uri.to_string(),
            success: result.success,
            duration_ms: result.duration_ms,
        });
        result
    }

    pub async fn execute_prompt(&self, server_id: &str, prompt: &str, arguments: Value) -> OperationResult {
        let result = match self.inner.client(server_id) {
            Some(client) => client.execute_prompt(prompt, arguments).await,
            None => not_connected(server_id),
        };
        self.inner.events.publish(FleetEvent::PromptExecuted {
            server_id: server_id.to_string(),
            prompt: prompt.to_string(),
            success: result.success,
            duration_ms: result.duration_ms,
        });
        result
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    /// Status of a configured or running server; `None` for unknown ids.
    pub fn get_server_status(&self, id: &str) -> Option<ServerStatus> {
        let client = self.inner.client(id);
        let config = read(&self.inner.config).servers.get(id).cloned();
        if client.is_none() && config.is_none() {
            return None;
        }
        Some(self.inner.status(id, client.as_deref(), config.as_ref()))
    }

    /// Status of every configured or running server, ordered by id.
    pub fn get_all_server_statuses(&self) -> Vec<ServerStatus> {
        let mut ids: Vec<String> = read(&self.inner.config).servers.keys().cloned().collect();
        ids.extend(lock(&self.inner.clients).keys().cloned());
        ids.sort();
        ids.dedup();
        ids.iter()
            .filter_map(|id| self.get_server_status(id))
            .collect()
    }

    /// Every tool of every connected server, ordered by server id.
    pub fn get_all_tools(&self) -> Vec<ToolEntry> {
        self.inner
            .connected_clients()
            .into_iter()
            .flat_map(|client| {
                let server_id = client.server_id().to_string();
                client.tools().into_iter().map(move |tool| ToolEntry {
                    server_id: server_id.clone(),
                    tool,
                })
            })
            .collect()
    }

    /// The tool `call_tool_by_name` would route to.
    pub fn find_tool(&self, name: &str) -> Option<ToolEntry> {
        let client = self.inner.client_for_tool(name)?;
        let tool = client.find_tool(name)?;
        Some(ToolEntry {
            server_id: client.server_id().to_string(),
            tool,
        })
    }

    /// Ids with a live client, ordered.
    pub fn running_servers(&self) -> Vec<String> {
        lock(&self.inner.clients).keys().cloned().collect()
    }
}

fn not_connected(server_id: &str) -> OperationResult {
    let err = McpError::NotConnected {
        name: server_id.to_string(),
    };
    OperationResult::failure(err.to_string(), 0)
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

impl ManagerInner {
    fn settings(&self) -> Arc<Settings> {
        Arc::clone(&read(&self.settings))
    }

    fn install_config(&self, config: FleetConfig) {
        *write(&self.settings) = Arc::new(config.settings.clone());
        *write(&self.config) = config;
    }

    fn auto_start_ids(&self) -> Vec<String> {
        read(&self.config)
            .servers
            .iter()
            .filter(|(_, config)| config.starts_automatically())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn is_configured(&self, id: &str) -> bool {
        read(&self.config).servers.contains_key(id)
    }

    /// Launch settings for `id`, rejecting unknown and disabled servers.
    fn launch_config(&self, id: &str) -> Result<ServerConfig, McpError> {
        match read(&self.config).servers.get(id) {
            None => Err(McpError::ConfigError {
                reason: format!("unknown server '{id}'"),
            }),
            Some(config) if !config.enabled => Err(McpError::ConfigError {
                reason: format!("server '{id}' is disabled"),
            }),
            Some(config) => Ok(config.clone()),
        }
    }

    fn client(&self, id: &str) -> Option<Arc<McpClient>> {
        lock(&self.clients).get(id).cloned()
    }

    fn connected_clients(&self) -> Vec<Arc<McpClient>> {
        lock(&self.clients)
            .values()
            .filter(|client| client.is_connected())
            .cloned()
            .collect()
    }

    fn client_for_tool(&self, tool: &str) -> Option<Arc<McpClient>> {
        self.connected_clients()
            .into_iter()
            .find(|client| client.find_tool(tool).is_some())
    }

    /// Whether `client` is still the registered client for `id`.
    fn is_registered(&self, id: &str, client: &Arc<McpClient>) -> bool {
        lock(&self.clients)
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, client))
    }

    /// Remove `client` from the live map, unless another client replaced it.
    fn remove_if_registered(&self, id: &str, client: &Arc<McpClient>) -> bool {
        let mut clients = lock(&self.clients);
        if clients
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, client))
        {
            clients.remove(id);
            true
        } else {
            false
        }
    }

    fn cancel_health_check(&self, id: &str) {
        if let Some(timer) = lock(&self.health).remove(id) {
            timer.abort();
        }
    }

    fn install_health_check(self: &Arc<Self>, id: &str, config: &ServerConfig) {
        let Some(interval) = config.health_check_interval() else {
            return;
        };
        let timer = health::spawn_health_check(Arc::downgrade(self), id.to_string(), interval);
        if let Some(previous) = lock(&self.health).insert(id.to_string(), timer) {
            previous.abort();
        }
        tracing::debug!(server = %id, interval_ms = interval.as_millis() as u64, "health check installed");
    }

    /// Run `restart` in the background where `stop_server` and `shutdown` can
    /// cancel it. Ignored once shutdown has begun.
    pub(crate) fn spawn_restart<F>(&self, id: &str, restart: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = lock(&self.pending_restarts);
        if self.is_shutting_down() {
            tracing::debug!(server = %id, "shutting down, restart not scheduled");
            return;
        }
        // A replaced handle belongs to a restart that already ran.
        pending.insert(id.to_string(), tokio::spawn(restart));
    }

    fn cancel_pending_restart(&self, id: &str) {
        if let Some(task) = lock(&self.pending_restarts).remove(id) {
            if !task.is_finished() {
                tracing::info!(server = %id, "cancelled pending restart");
            }
            task.abort();
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn restart_count(&self, id: &str) -> u32 {
        lock(&self.restarts).get(id).copied().unwrap_or(0)
    }

    pub(crate) fn reset_restarts(&self, id: &str) {
        lock(&self.restarts).remove(id);
    }

    pub(crate) fn publish(&self, event: FleetEvent) {
        self.events.publish(event);
    }

    pub(crate) fn start_boxed(
        inner: Arc<ManagerInner>,
        id: String,
    ) -> BoxFuture<'static, Result<(), McpError>> {
        async move { inner.start(&id).await }.boxed()
    }

    pub(crate) fn restart_boxed(
        inner: Arc<ManagerInner>,
        id: String,
    ) -> BoxFuture<'static, Result<(), McpError>> {
        async move {
            tracing::info!(server = %id, "restarting server");
            inner.stop_keeping_restarts(&id).await?;
            inner.start(&id).await
        }
        .boxed()
    }

    async fn start(self: &Arc<Self>, id: &str) -> Result<(), McpError> {
        let config = self.launch_config(id)?;
        let settings = self.settings();

        // Check and insert under one lock so concurrent starts spawn one process.
        let client = {
            let mut clients = lock(&self.clients);
            if let Some(existing) = clients.get(id) {
                tracing::warn!(
                    server = %id,
                    state = %existing.state(),
                    "server already running, ignoring start"
                );
                return Ok(());
            }
            let client = Arc::new(McpClient::new(id, config.clone(), Arc::clone(&settings)));
            clients.insert(id.to_string(), Arc::clone(&client));
            client
        };
        self.forward_events(id, &client);

        let mut attempt = 0;
        loop {
            match client.connect().await {
                Ok(()) => break,
                Err(e) => {
                    if attempt >= settings.retry_attempts || !self.is_registered(id, &client) {
                        self.remove_if_registered(id, &client);
                        return Err(e);
                    }
                    attempt += 1;
                    tracing::warn!(
                        server = %id,
                        attempt,
                        max_attempts = settings.retry_attempts,
                        delay_ms = settings.retry_delay_ms,
                        error = %e,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(settings.retry_delay()).await;
                    if !self.is_registered(id, &client) {
                        return Err(e);
                    }
                }
            }
        }

        if !self.is_registered(id, &client) {
            // Stopped while the handshake was running.
            client.disconnect().await;
            return Err(McpError::Disconnecting {
                name: id.to_string(),
            });
        }

        self.install_health_check(id, &config);
        let snapshot = client.snapshot();
        self.events.publish(FleetEvent::ServerConnected {
            server_id: id.to_string(),
            server_info: snapshot.server_info.clone(),
            tools: snapshot.tools.len(),
            resources: snapshot.resources.len(),
            prompts: snapshot.prompts.len(),
        });
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), McpError> {
        self.cancel_pending_restart(id);
        self.reset_restarts(id);
        self.stop_keeping_restarts(id).await
    }

    async fn stop_keeping_restarts(&self, id: &str) -> Result<(), McpError> {
        self.cancel_health_check(id);
        let client = lock(&self.clients).remove(id);

        match client {
            Some(client) => {
                client.disconnect().await;
                self.events.publish(FleetEvent::ServerDisconnected {
                    server_id: id.to_string(),
                    reason: "stopped".into(),
                });
                tracing::info!(server = %id, "server stopped");
                Ok(())
            }
            None if self.is_configured(id) => {
                tracing::warn!(server = %id, "server is not running, nothing to stop");
                Ok(())
            }
            None => Err(McpError::ConfigError {
                reason: format!("unknown server '{id}'"),
            }),
        }
    }

    async fn reload(self: &Arc<Self>) -> Result<(), McpError> {
        let config = self.source.load()?;
        let prune = config.settings.prune_on_reload;
        let removed: Vec<String> = lock(&self.clients)
            .keys()
            .filter(|id| !config.servers.contains_key(*id))
            .cloned()
            .collect();
        self.install_config(config);

        let ids = self.auto_start_ids();
        let tasks = ids.iter().map(|id| {
            let inner = Arc::clone(self);
            let id = id.clone();
            if inner.client(&id).is_some() {
                Self::restart_boxed(inner, id)
            } else {
                Self::start_boxed(inner, id)
            }
        });
        let results = join_all(tasks).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(server = %id, error = %e, "failed to start server after reload");
            }
        }

        if prune {
            for id in &removed {
                if let Err(e) = self.stop(id).await {
                    tracing::warn!(server = %id, error = %e, "failed to stop removed server");
                }
            }
        } else if !removed.is_empty() {
            tracing::info!(servers = ?removed, "servers removed from configuration keep running");
        }

        tracing::info!(servers = ids.len(), "configuration reloaded");
        Ok(())
    }

    async fn shutdown(&self) {
        let restarts: Vec<_> = {
            let mut pending = lock(&self.pending_restarts);
            self.shutting_down.store(true, Ordering::Release);
            pending.drain().map(|(_, task)| task).collect()
        };
        for task in restarts {
            task.abort();
        }

        let timers: Vec<_> = lock(&self.health).drain().map(|(_, timer)| timer).collect();
        for timer in timers {
            timer.abort();
        }
        lock(&self.restarts).clear();

        let clients = std::mem::take(&mut *lock(&self.clients));
        tracing::info!(server_count = clients.len(), "shutting down fleet");

        join_all(clients.values().map(|client| client.disconnect())).await;
        for id in clients.keys() {
            self.events.publish(FleetEvent::ServerDisconnected {
                server_id: id.clone(),
                reason: "shutdown".into(),
            });
        }
    }

    fn status(&self, id: &str, client: Option<&McpClient>, config: Option<&ServerConfig>) -> ServerStatus {
        let health_check = config.is_some_and(|c| c.health_check_interval().is_some());
        let restarts = self.restart_count(id);
        match client {
            Some(client) => {
                let snapshot = client.snapshot();
                ServerStatus {
                    id: id.to_string(),
                    status: client.state(),
                    server_info: snapshot.server_info,
                    capabilities: snapshot.capabilities,
                    tools: snapshot.tools.len(),
                    resources: snapshot.resources.len(),
                    prompts: snapshot.prompts.len(),
                    connected_at: client.connected_at(),
                    last_error: client.last_error(),
                    restarts,
                    pid: client.pid(),
                    health_check,
                }
            }
            None => ServerStatus {
                id: id.to_string(),
                status: ConnectionState::Disconnected,
                server_info: None,
                capabilities: ServerCapabilities::default(),
                tools: 0,
                resources: 0,
                prompts: 0,
                connected_at: None,
                last_error: None,
                restarts,
                pid: None,
                health_check,
            },
        }
    }
}

// ─── Client Events ───────────────────────────────────────────────────────────

impl ManagerInner {
    /// Republish a client's events on the fleet bus and react to crashes.
    ///
    /// The forwarder holds only weak references, so it ends once the client
    /// is dropped.
    fn forward_events(self: &Arc<Self>, id: &str, client: &Arc<McpClient>) {
        let mut rx = client.subscribe();
        let manager = Arc::downgrade(self);
        let client = Arc::downgrade(client);
        let id = id.to_string();

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(server = %id, skipped, "client event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.on_client_event(&id, &client, event);
            }
        });
    }

    fn on_client_event(self: &Arc<Self>, id: &str, client: &Weak<McpClient>, event: ClientEvent) {
        match event {
            ClientEvent::Error { message } => {
                self.events.publish(FleetEvent::ServerError {
                    server_id: id.to_string(),
                    error: message,
                });
            }
            ClientEvent::Exit {
                exit,
                expected: false,
            } => {
                if let Some(client) = client.upgrade() {
                    self.on_unexpected_exit(id, client, exit);
                }
            }
            ClientEvent::Exit { exit, .. } => {
                tracing::debug!(server = %id, exit = %exit, "server process exited after stop");
            }
            ClientEvent::Notification { method, params } => {
                self.events.publish(FleetEvent::Notification {
                    server_id: id.to_string(),
                    method,
                    params,
                });
            }
            ClientEvent::CapabilitiesRefreshed { kind, count } => {
                tracing::debug!(server = %id, kind = %kind, count, "capabilities refreshed");
            }
            ClientEvent::Connected { .. } | ClientEvent::Disconnected => {}
        }
    }

    fn on_unexpected_exit(self: &Arc<Self>, id: &str, client: Arc<McpClient>, exit: ExitInfo) {
        if !self.remove_if_registered(id, &client) {
            return;
        }
        self.cancel_health_check(id);

        self.events.publish(FleetEvent::ServerError {
            server_id: id.to_string(),
            error: format!("process exited unexpectedly ({exit})"),
        });
        self.events.publish(FleetEvent::ServerDisconnected {
            server_id: id.to_string(),
            reason: format!("process exited ({exit})"),
        });

        // Release pipes and reader tasks of the dead process.
        tokio::spawn(async move { client.disconnect().await });

        if !exit.is_failure() {
            tracing::info!(server = %id, "server exited cleanly, not restarting");
            return;
        }
        let auto_start = read(&self.config)
            .servers
            .get(id)
            .is_some_and(|config| config.starts_automatically());
        if !auto_start {
            return;
        }

        let settings = self.settings();
        let attempt = {
            let mut restarts = lock(&self.restarts);
            let count = restarts.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt > settings.retry_attempts {
            let err = McpError::RestartExhausted {
                name: id.to_string(),
                attempts: settings.retry_attempts,
            };
            tracing::error!(server = %id, error = %err, "giving up on crashed server");
            self.events.publish(FleetEvent::ServerError {
                server_id: id.to_string(),
                error: err.to_string(),
            });
            return;
        }

        tracing::warn!(
            server = %id,
            attempt,
            delay_ms = settings.retry_delay_ms,
            "server crashed, scheduling restart"
        );
        let manager = Arc::downgrade(self);
        let server_id = id.to_string();
        let delay = settings.retry_delay();
        self.spawn_restart(id, async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if manager.is_shutting_down() {
                return;
            }
            if let Err(e) = Self::start_boxed(manager, server_id.clone()).await {
                tracing::error!(server = %server_id, error = %e, "restart after crash failed");
            }
        });
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
