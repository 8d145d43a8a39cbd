//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with MCP server child processes:
//! - Line framing of the raw stdout byte stream (one JSON object per line)
//! - Writing JSON-RPC requests and notifications to stdin
//! - Correlating responses with in-flight requests by id, with per-request timeouts

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use super::errors::McpError;
use super::types::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

// ─── Framing ─────────────────────────────────────────────────────────────────

/// Splits a byte stream into newline-delimited frames.
///
/// Bytes are appended as they arrive; every complete line is returned and the
/// trailing partial line stays buffered until the next chunk.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// A trailing `\r` is stripped and whitespace-only lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line);
            }
        }
        lines
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Serialize a message as a single newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one framed line.
pub fn decode_line(line: &[u8]) -> Result<JsonRpcMessage, serde_json::Error> {
    serde_json::from_slice(line)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// How long `shutdown` waits for the writer before giving up on a clean EOF.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Reply = Result<Value, McpError>;
type PendingMap = HashMap<u64, oneshot::Sender<Reply>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half of a JSON-RPC connection plus the table of in-flight requests.
///
/// Responses are delivered by the connection's reader through [`resolve`];
/// the transport never reads on its own.
///
/// [`resolve`]: StdioTransport::resolve
pub struct StdioTransport {
    server_name: String,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
    torn: AtomicBool,
    next_id: AtomicU64,
}

impl StdioTransport {
    /// Create a new transport writing to `writer` (usually the child's stdin).
    pub fn new<W>(server_name: &str, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            torn: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next request id. Ids are strictly increasing per transport.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Resolves with the `result` value, or rejects with the server's error,
    /// a timeout, or the reason the transport was shut down.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let (tx, mut rx) = oneshot::channel();

        {
            let mut pending = self.lock_pending();
            if self.closed.load(Ordering::Acquire) {
                return Err(self.closed_error());
            }
            pending.insert(id, tx);
        }
        // Removes the entry on every exit path, including caller cancellation.
        let _guard = PendingGuard { transport: self, id };

        let line = encode_line(&JsonRpcRequest::new(id, method, params)).map_err(|e| {
            McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize request: {e}"),
            }
        })?;
        // One deadline covers the write too; a server that stops reading its
        // stdin must not outlast the timeout.
        let exchange = async {
            tokio::select! {
                biased;
                // Rejected by `shutdown` before the line was fully written.
                early = &mut rx => return self.received(early),
                written = self.write_line(&line) => written?,
            }
            self.received(rx.await)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(
                    server = %self.server_name,
                    method,
                    id,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = encode_line(&JsonRpcNotification::new(method, params)).map_err(|e| {
            McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize notification: {e}"),
            }
        })?;
        self.write_line(&line).await
    }

    /// Answer a server-initiated request.
    pub async fn respond(&self, id: Value, reply: Result<Value, JsonRpcError>) -> Result<(), McpError> {
        let response = match reply {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        };
        let line = encode_line(&response).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to serialize response: {e}"),
        })?;
        self.write_line(&line).await
    }

    /// Hand a response to the request waiting for `id`.
    ///
    /// Returns `false` when nothing is waiting (late reply after a timeout, or
    /// an id we never issued); the reply is dropped in that case.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        let waiter = self.lock_pending().remove(&id);
        match waiter {
            Some(tx) => {
                // The receiver may have been dropped by a cancelled caller.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Reject every outstanding request. Returns how many were rejected.
    pub fn reject_all(&self, error: impl Fn() -> McpError) -> usize {
        let drained = std::mem::take(&mut *self.lock_pending());
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error()));
        }
        count
    }

    /// Refuse new requests, reject the outstanding ones and close the write
    /// half (EOF on the server's stdin). Returns how many requests were rejected.
    pub async fn shutdown(&self, error: impl Fn() -> McpError) -> usize {
        let rejected = {
            let mut pending = self.lock_pending();
            self.closed.store(true, Ordering::Release);
            let drained = std::mem::take(&mut *pending);
            let count = drained.len();
            for (_, tx) in drained {
                let _ = tx.send(Err(error()));
            }
            count
        };

        // A write stuck on a full pipe holds the writer; leave it to be
        // dropped with the transport rather than wait on it.
        let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
        })
        .await;
        if closed.is_err() {
            tracing::warn!(
                server = %self.server_name,
                "stdin is blocked, leaving it to close with the process"
            );
        }
        rejected
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.closed_error())?;
        if self.torn.load(Ordering::Acquire) {
            return Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: "an earlier write was interrupted mid-line".into(),
            });
        }

        // Stays set if this future is dropped before the line is complete.
        self.torn.store(true, Ordering::Release);
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })?;
        self.torn.store(false, Ordering::Release);
        Ok(())
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn received(&self, reply: Result<Reply, oneshot::error::RecvError>) -> Reply {
        reply.unwrap_or_else(|_| {
            Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: "response channel closed".into(),
            })
        })
    }

    fn closed_error(&self) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: "transport is closed".into(),
        }
    }
}

struct PendingGuard<'a> {
    transport: &'a StdioTransport,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.transport.lock_pending().remove(&self.id);
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Turn the payload of a response into a reply, converting errors to `McpError`.
///
/// A response without `error` resolves, with `null` when `result` is absent.
pub fn into_reply(result: Option<Value>, error: Option<JsonRpcError>) -> Reply {
    match error {
        Some(err) => Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }),
        None => Ok(result.unwrap_or(Value::Null)),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
