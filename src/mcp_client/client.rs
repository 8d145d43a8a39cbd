//! MCP Client — owns one server process and its protocol conversation.
//!
//! A client spawns its server, performs the `initialize` handshake, discovers
//! tools/resources/prompts, keeps that snapshot current when the server
//! announces list changes, and exposes tool calls, resource reads and prompt
//! execution as [`OperationResult`]s.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::lifecycle::{self, ExitInfo, ProcessHandle};
use super::transport::{decode_line, into_reply, LineFramer, StdioTransport};
use super::types::{
    error_codes, CapabilityKind, CapabilitySnapshot, ConnectionState, Incoming,
    InitializeResult, JsonRpcError, OperationResult, Prompt, Resource, ServerCapabilities,
    ServerInfo, Tool, CLIENT_NAME, PROTOCOL_VERSION,
};
use crate::config::{ServerConfig, Settings};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Size of each stdout read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on `nextCursor` pages followed by one discovery call.
const MAX_LIST_PAGES: usize = 64;

/// Buffered client events per subscriber.
const EVENT_CAPACITY: usize = 64;

// ─── Events ──────────────────────────────────────────────────────────────────

/// Lifecycle and protocol events published by a single client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake and discovery finished.
    Connected { server_info: Option<ServerInfo> },
    /// `disconnect()` completed.
    Disconnected,
    /// Spawn, handshake or discovery failed.
    Error { message: String },
    /// The process ended. `expected` is false only when a connected server
    /// died on its own.
    Exit { exit: ExitInfo, expected: bool },
    /// A server notification the client does not handle itself.
    Notification { method: String, params: Option<Value> },
    /// A list-changed notification refreshed one capability list.
    CapabilitiesRefreshed { kind: CapabilityKind, count: usize },
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// Client for exactly one MCP server.
pub struct McpClient {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    server_id: String,
    config: ServerConfig,
    settings: Arc<Settings>,
    state: RwLock<ConnectionState>,
    transport: RwLock<Option<Arc<StdioTransport>>>,
    process: RwLock<Option<Arc<ProcessHandle>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    snapshot: RwLock<CapabilitySnapshot>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    stopping: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl McpClient {
    /// Create a disconnected client for `server_id`.
    pub fn new(server_id: &str, config: ServerConfig, settings: Arc<Settings>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(ClientShared {
                server_id: server_id.to_string(),
                config,
                settings,
                state: RwLock::new(ConnectionState::Disconnected),
                transport: RwLock::new(None),
                process: RwLock::new(None),
                tasks: Mutex::new(Vec::new()),
                snapshot: RwLock::new(CapabilitySnapshot::default()),
                connected_at: RwLock::new(None),
                last_error: RwLock::new(None),
                stopping: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Receive this client's events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Cheap liveness probe: connected, with a process that is neither killed
    /// nor exited.
    pub fn is_active(&self) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }
        read(&self.shared.process)
            .as_ref()
            .is_some_and(|p| !p.is_killed() && !p.has_exited())
    }

    pub fn pid(&self) -> Option<u32> {
        read(&self.shared.process).as_ref().and_then(|p| p.pid())
    }

    pub fn snapshot(&self) -> CapabilitySnapshot {
        read(&self.shared.snapshot).clone()
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        read(&self.shared.snapshot).capabilities
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        read(&self.shared.snapshot).server_info.clone()
    }

    pub fn tools(&self) -> Vec<Tool> {
        read(&self.shared.snapshot).tools.clone()
    }

    pub fn resources(&self) -> Vec<Resource> {
        read(&self.shared.snapshot).resources.clone()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        read(&self.shared.snapshot).prompts.clone()
    }

    /// Find a discovered tool by name.
    pub fn find_tool(&self, name: &str) -> Option<Tool> {
        read(&self.shared.snapshot)
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *read(&self.shared.connected_at)
    }

    pub fn last_error(&self) -> Option<String> {
        read(&self.shared.last_error).clone()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        read(&self.shared.transport)
            .as_ref()
            .map_or(0, |t| t.pending_count())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the server process, perform the handshake and discover its
    /// capabilities.
    ///
    /// A no-op (with a warning) when already starting or connected.
    pub async fn connect(&self) -> Result<(), McpError> {
        if !self.shared.begin_connect() {
            return Ok(());
        }

        let result = self.spawn_and_handshake().await;
        self.shared.finish_connect(result).await
    }

    /// Run the handshake over an existing byte stream instead of a process.
    ///
    /// Such a client has no process handle, so [`is_active`] stays false.
    ///
    /// [`is_active`]: McpClient::is_active
    pub async fn connect_stream<R, W>(&self, reader: R, writer: W) -> Result<(), McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        if !self.shared.begin_connect() {
            return Ok(());
        }

        self.shared.attach(reader, writer);
        let result = self.shared.handshake().await;
        self.shared.finish_connect(result).await
    }

    async fn spawn_and_handshake(&self) -> Result<(), McpError> {
        let shared = &self.shared;
        let spawned = lifecycle::spawn_process(&shared.server_id, &shared.config)?;

        let weak = Arc::downgrade(shared);
        let handle = Arc::new(ProcessHandle::watch(
            &shared.server_id,
            spawned.child,
            move |exit| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_process_exit(exit);
                }
            },
        ));
        *write(&shared.process) = Some(Arc::clone(&handle));

        if let Some(stderr) = spawned.stderr {
            lock(&shared.tasks).push(lifecycle::log_stderr(&shared.server_id, stderr));
        }
        shared.attach(spawned.stdout, spawned.stdin);

        tokio::time::sleep(lifecycle::STARTUP_GRACE).await;
        if let Some(exit) = handle.exit_info() {
            return Err(McpError::SpawnFailed {
                name: shared.server_id.clone(),
                reason: format!("process exited during startup ({exit})"),
            });
        }

        shared.handshake().await
    }

    /// Reject outstanding requests, stop the process and mark the client
    /// disconnected. Idempotent.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        {
            let mut state = write(&shared.state);
            if *state == ConnectionState::Stopping {
                return;
            }
            let has_resources =
                read(&shared.transport).is_some() || read(&shared.process).is_some();
            if *state == ConnectionState::Disconnected && !has_resources {
                tracing::debug!(server = %shared.server_id, "already disconnected");
                return;
            }
            *state = ConnectionState::Stopping;
        }
        shared.stopping.store(true, Ordering::Release);

        let rejected = shared.teardown().await;
        if rejected > 0 {
            tracing::info!(
                server = %shared.server_id,
                rejected,
                "rejected outstanding requests on disconnect"
            );
        }

        *write(&shared.snapshot) = CapabilitySnapshot::default();
        *write(&shared.connected_at) = None;
        shared.set_state(ConnectionState::Disconnected);
        tracing::info!(server = %shared.server_id, "server disconnected");
        shared.emit(ClientEvent::Disconnected);
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Send a raw JSON-RPC request and wait for its result.
    ///
    /// Allowed while starting (handshake) or connected.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match self.state() {
            ConnectionState::Starting | ConnectionState::Connected => {
                self.shared.request(method, params).await
            }
            _ => Err(McpError::NotConnected {
                name: self.shared.server_id.clone(),
            }),
        }
    }

    /// Invoke a tool. Never fails; errors are reported in the result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> OperationResult {
        let params = json!({ "name": name, "arguments": arguments });
        self.run_operation("tools/call", params, OperationResult::from_tool_result)
            .await
    }

    /// Read a resource by URI. Never fails; errors are reported in the result.
    pub async fn read_resource(&self, uri: &str) -> OperationResult {
        self.run_operation(
            "resources/read",
            json!({ "uri": uri }),
            OperationResult::from_resource_result,
        )
        .await
    }

    /// Render a prompt template. Never fails; errors are reported in the result.
    pub async fn execute_prompt(&self, name: &str, arguments: Value) -> OperationResult {
        let params = json!({ "name": name, "arguments": arguments });
        self.run_operation("prompts/get", params, OperationResult::payload)
            .await
    }

    async fn run_operation(
        &self,
        method: &str,
        params: Value,
        convert: fn(Value, u64) -> OperationResult,
    ) -> OperationResult {
        let start = Instant::now();
        if !self.is_connected() {
            let err = McpError::NotConnected {
                name: self.shared.server_id.clone(),
            };
            return OperationResult::failure(err.to_string(), elapsed_ms(start));
        }

        match self.shared.request(method, Some(params)).await {
            Ok(result) => convert(result, elapsed_ms(start)),
            Err(e) => {
                if e.is_transport() {
                    tracing::warn!(
                        server = %self.shared.server_id,
                        method,
                        error = %e,
                        "operation lost its connection"
                    );
                } else {
                    tracing::debug!(
                        server = %self.shared.server_id,
                        method,
                        error = %e,
                        "operation failed"
                    );
                }
                OperationResult::failure(e.to_string(), elapsed_ms(start))
            }
        }
    }

    /// Re-run discovery for one capability. On failure the previous list is kept.
    pub async fn refresh(&self, kind: CapabilityKind) -> Result<usize, McpError> {
        self.shared.refresh(kind).await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        for task in lock(&self.shared.tasks).drain(..) {
            task.abort();
        }
    }
}

// ─── Shared State ────────────────────────────────────────────────────────────

impl ClientShared {
    fn state(&self) -> ConnectionState {
        *read(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *write(&self.state) = state;
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn request_timeout(&self) -> Duration {
        self.config
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.settings.request_timeout())
    }

    fn transport(&self) -> Result<Arc<StdioTransport>, McpError> {
        read(&self.transport)
            .clone()
            .ok_or_else(|| McpError::NotConnected {
                name: self.server_id.clone(),
            })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let transport = self.transport()?;
        transport.request(method, params, self.request_timeout()).await
    }

    /// Move into `Starting`. Returns false when a connect is already underway
    /// or done.
    fn begin_connect(&self) -> bool {
        let mut state = write(&self.state);
        if matches!(*state, ConnectionState::Starting | ConnectionState::Connected) {
            tracing::warn!(
                server = %self.server_id,
                state = %*state,
                "connect requested while already {}, ignoring",
                *state
            );
            return false;
        }
        *state = ConnectionState::Starting;
        self.stopping.store(false, Ordering::Release);
        *write(&self.last_error) = None;
        true
    }

    async fn finish_connect(&self, result: Result<(), McpError>) -> Result<(), McpError> {
        // A disconnect that raced the handshake owns teardown.
        if self.state() != ConnectionState::Starting {
            return match result {
                Ok(()) => Err(McpError::Disconnecting {
                    name: self.server_id.clone(),
                }),
                Err(e) => Err(e),
            };
        }

        match result {
            Ok(()) => {
                let snapshot = read(&self.snapshot).clone();
                *write(&self.connected_at) = Some(Utc::now());
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    server = %self.server_id,
                    tools = snapshot.tools.len(),
                    resources = snapshot.resources.len(),
                    prompts = snapshot.prompts.len(),
                    "server connected"
                );
                self.emit(ClientEvent::Connected {
                    server_info: snapshot.server_info,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(server = %self.server_id, error = %e, "failed to connect server");
                self.stopping.store(true, Ordering::Release);
                self.teardown().await;
                *write(&self.snapshot) = CapabilitySnapshot::default();
                *write(&self.last_error) = Some(e.to_string());
                self.set_state(ConnectionState::Error);
                self.emit(ClientEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Install the transport over `writer` and start the reader over `reader`.
    fn attach<R, W>(self: &Arc<Self>, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Arc::new(StdioTransport::new(&self.server_id, writer));
        *write(&self.transport) = Some(Arc::clone(&transport));

        let task = tokio::spawn(read_loop(
            self.server_id.clone(),
            Arc::downgrade(self),
            transport,
            reader,
        ));
        lock(&self.tasks).push(task);
    }

    /// `initialize` → `notifications/initialized` → discovery, bounded by the
    /// connection timeout.
    async fn handshake(self: &Arc<Self>) -> Result<(), McpError> {
        let timeout = self.settings.connection_timeout();
        match tokio::time::timeout(timeout, self.initialize_and_discover()).await {
            Ok(result) => result,
            Err(_) => Err(McpError::InitFailed {
                name: self.server_id.clone(),
                reason: format!("handshake timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    async fn initialize_and_discover(self: &Arc<Self>) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let init_failed = |reason: String| McpError::InitFailed {
            name: self.server_id.clone(),
            reason,
        };

        let result = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| init_failed(e.to_string()))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| init_failed(format!("failed to parse initialize response: {e}")))?;

        let capabilities = ServerCapabilities::from_value(&init.capabilities);
        {
            let mut snapshot = write(&self.snapshot);
            snapshot.capabilities = capabilities;
            snapshot.server_info = init.server_info.clone();
            snapshot.protocol_version = init.protocol_version.clone();
        }
        tracing::debug!(
            server = %self.server_id,
            protocol_version = ?init.protocol_version,
            server_info = ?init.server_info,
            capabilities = ?capabilities,
            "initialize handshake complete"
        );

        self.transport()?
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| init_failed(e.to_string()))?;

        for kind in CapabilityKind::ALL {
            let items = if capabilities.supports(kind) {
                match self.list_all(kind).await {
                    Ok(items) => items,
                    Err(e) => {
                        tracing::warn!(
                            server = %self.server_id,
                            kind = %kind,
                            error = %e,
                            "capability discovery failed, continuing with an empty list"
                        );
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };
            write(&self.snapshot).apply(kind, items);
        }

        Ok(())
    }

    /// Issue `*/list` for `kind`, following `nextCursor` pagination.
    async fn list_all(&self, kind: CapabilityKind) -> Result<Vec<Value>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(kind.list_method(), params).await?;

            if let Some(page) = result.get(kind.result_key()).and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }
            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(String::from);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        tracing::warn!(
            server = %self.server_id,
            kind = %kind,
            pages = MAX_LIST_PAGES,
            "stopped following list pagination"
        );
        Ok(items)
    }

    async fn refresh(&self, kind: CapabilityKind) -> Result<usize, McpError> {
        match self.list_all(kind).await {
            Ok(items) => {
                let count = write(&self.snapshot).apply(kind, items);
                tracing::info!(server = %self.server_id, kind = %kind, count, "capability list refreshed");
                self.emit(ClientEvent::CapabilitiesRefreshed { kind, count });
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(
                    server = %self.server_id,
                    kind = %kind,
                    error = %e,
                    "capability refresh failed, keeping previous list"
                );
                Err(e)
            }
        }
    }

    /// Route one decoded message from the server.
    fn dispatch(self: &Arc<Self>, transport: &Arc<StdioTransport>, incoming: Incoming) {
        match incoming {
            Incoming::Response { id, result, error } => {
                if !transport.resolve(id, into_reply(result, error)) {
                    tracing::debug!(server = %self.server_id, id, "dropping response with no pending request");
                }
            }
            Incoming::Notification { method, params } => self.handle_notification(method, params),
            Incoming::Request { id, method, params: _ } => {
                let reply = match method.as_str() {
                    "ping" => Ok(json!({})),
                    _ => Err(JsonRpcError {
                        code: error_codes::METHOD_NOT_FOUND,
                        message: format!("method not supported by client: {method}"),
                        data: None,
                    }),
                };
                let transport = Arc::clone(transport);
                let server_id = self.server_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.respond(id, reply).await {
                        tracing::debug!(server = %server_id, method = %method, error = %e, "failed to answer server request");
                    }
                });
            }
            Incoming::Invalid(reason) => {
                tracing::warn!(server = %self.server_id, reason = %reason, "dropping invalid message");
            }
        }
    }

    fn handle_notification(self: &Arc<Self>, method: String, params: Option<Value>) {
        if let Some(kind) = CapabilityKind::from_list_changed(&method) {
            let shared = Arc::clone(self);
            tokio::spawn(async move {
                let _ = shared.refresh(kind).await;
            });
            return;
        }

        tracing::debug!(server = %self.server_id, method = %method, "server notification");
        self.emit(ClientEvent::Notification { method, params });
    }

    /// Only a process that dies while connected is reported as unexpected; a
    /// death during startup surfaces as the connect error instead.
    fn on_process_exit(&self, exit: ExitInfo) {
        let expected = {
            let mut state = write(&self.state);
            let unexpected =
                !self.stopping.load(Ordering::Acquire) && *state == ConnectionState::Connected;
            if unexpected {
                *state = if exit.is_failure() {
                    ConnectionState::Error
                } else {
                    ConnectionState::Disconnected
                };
            }
            !unexpected
        };

        if !expected {
            *write(&self.last_error) = Some(format!("process exited ({exit})"));
            tracing::warn!(
                server = %self.server_id,
                code = ?exit.code,
                signal = ?exit.signal,
                "server process exited unexpectedly"
            );
            if let Some(transport) = read(&self.transport).clone() {
                transport.reject_all(|| McpError::ServerCrashed {
                    name: self.server_id.clone(),
                    reason: format!("process exited ({exit})"),
                });
            }
        }
        self.emit(ClientEvent::Exit { exit, expected });
    }

    /// EOF on a stream connection. Process-backed clients learn about the end
    /// of the conversation from the exit watcher instead.
    fn on_stream_closed(&self) {
        if read(&self.process).is_some() || self.stopping.load(Ordering::Acquire) {
            return;
        }
        {
            let mut state = write(&self.state);
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Error;
        }
        let message = "server closed its output stream".to_string();
        tracing::warn!(server = %self.server_id, "{message}");
        *write(&self.last_error) = Some(message.clone());
        self.emit(ClientEvent::Error { message });
    }

    /// Release the transport, process and tasks. Returns how many pending
    /// requests were rejected.
    async fn teardown(&self) -> usize {
        let transport = write(&self.transport).take();
        let mut rejected = 0;
        if let Some(transport) = transport {
            // Closing stdin is the graceful stop signal for stdio servers.
            rejected = transport
                .shutdown(|| McpError::Disconnecting {
                    name: self.server_id.clone(),
                })
                .await;
        }

        let process = write(&self.process).take();
        if let Some(process) = process {
            process.terminate(&self.server_id, lifecycle::SHUTDOWN_GRACE).await;
        }

        // Aborting the reader drops its partially filled frame buffer.
        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        rejected
    }
}

/// Single reader per connection: frames stdout and dispatches every message.
async fn read_loop<R>(
    server_id: String,
    shared: Weak<ClientShared>,
    transport: Arc<StdioTransport>,
    mut reader: R,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "failed to read server output");
                break;
            }
        };

        for line in framer.push(&chunk[..n]) {
            let message = match decode_line(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        server = %server_id,
                        error = %e,
                        line = %String::from_utf8_lossy(&line),
                        "dropping malformed message"
                    );
                    continue;
                }
            };
            let Some(shared) = shared.upgrade() else {
                return;
            };
            shared.dispatch(&transport, message.classify());
        }
    }

    let rejected = transport.reject_all(|| McpError::TransportError {
        server: server_id.clone(),
        reason: "server closed its output stream".into(),
    });
    tracing::debug!(server = %server_id, rejected, "server output closed");
    if let Some(shared) = shared.upgrade() {
        shared.on_stream_closed();
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
