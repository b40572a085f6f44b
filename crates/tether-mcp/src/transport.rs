//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and owns its stdio exclusively. A writer task puts
//! one complete line at a time onto stdin, a reader task de-frames stdout and
//! routes responses to their waiters by id, and a supervisor task waits for the
//! process to exit. When stdout closes or the process exits, every pending
//! request is rejected and no new request is accepted.

use crate::command::ChildCommand;
use crate::error::McpError;
use crate::framing::{FrameReader, encode_line};
use crate::jsonrpc::{
    JsonRpcError, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, METHOD_NOT_FOUND, Message,
    RequestId,
};
use crate::pending::{Outcome, PendingRequests};
use serde::Serialize;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const WRITE_QUEUE: usize = 64;
const NOTIFICATION_BUFFER: usize = 64;

/// How long to wait for a killed child to be reaped.
pub const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// A notification pushed by the child (no id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Copy)]
struct ChildExit {
    code: Option<i32>,
}

/// Async JSON-RPC client over a child process's stdin/stdout.
///
/// Safe to share behind an `Arc`: request ids come from one atomic counter and
/// all writes go through a single writer task.
pub struct StdioClient {
    program: String,
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: Arc<PendingRequests>,
    notifications: broadcast::Sender<ServerNotification>,
    exit_rx: watch::Receiver<Option<ChildExit>>,
    stdin_close: CancellationToken,
    kill: CancellationToken,
}

impl StdioClient {
    /// Spawn the child process and start the background reader, writer and
    /// supervisor tasks.
    pub fn spawn(command: &ChildCommand) -> Result<Self, McpError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            command: command.to_string(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpError::Protocol("child stdio was not captured".to_string()));
        };

        let program = command.program_name().to_string();
        let pending = Arc::new(PendingRequests::default());
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let (exit_tx, exit_rx) = watch::channel(None);
        let stdin_close = CancellationToken::new();
        let kill = CancellationToken::new();

        // Writer task: the only owner of the child's stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(WRITE_QUEUE);
        {
            let close = stdin_close.clone();
            let program = program.clone();
            tokio::spawn(async move {
                let mut stdin = stdin;
                loop {
                    let line = tokio::select! {
                        _ = close.cancelled() => break,
                        line = write_rx.recv() => match line {
                            Some(line) => line,
                            None => break,
                        },
                    };
                    if let Err(e) = write_line(&mut stdin, &line).await {
                        tracing::warn!("Failed to write to MCP server '{program}': {e}");
                        break;
                    }
                }
                // Dropping stdin delivers EOF to the child
            });
        }

        // Reader task: the single de-framing loop for stdout
        {
            let pending = Arc::clone(&pending);
            let notifications = notifications.clone();
            let reply_tx = write_tx.clone();
            let program = program.clone();
            tokio::spawn(async move {
                let mut frames = FrameReader::new(stdout);
                loop {
                    match frames.next_frame().await {
                        Ok(Some(line)) => {
                            dispatch_line(&program, &line, &pending, &notifications, &reply_tx)
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Error reading from MCP server '{program}': {e}");
                            break;
                        }
                    }
                }
                let rejected = pending.close(None);
                if rejected > 0 {
                    tracing::warn!(
                        "MCP server '{program}' closed its output with {rejected} requests pending"
                    );
                }
            });
        }

        // Stderr task: child diagnostics become debug events
        {
            let program = program.clone();
            tokio::spawn(async move {
                let mut frames = FrameReader::new(stderr);
                while let Ok(Some(line)) = frames.next_frame().await {
                    tracing::debug!(target: "tether_mcp::child", server = %program, "{line}");
                }
            });
        }

        // Supervisor task: reaps the child and publishes its exit code
        {
            let pending = Arc::clone(&pending);
            let kill = kill.clone();
            let program = program.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!("Kill of MCP server '{program}' failed: {e}");
                        }
                        child.wait().await
                    }
                };
                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!("Failed to wait for MCP server '{program}': {e}");
                        None
                    }
                };
                tracing::info!(server = %program, ?code, "MCP server exited");
                pending.close(code);
                let _ = exit_tx.send(Some(ChildExit { code }));
            });
        }

        tracing::debug!("Spawned MCP server: {command}");

        Ok(Self {
            program,
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            notifications,
            exit_rx,
            stdin_close,
            kill,
        })
    }

    /// Send a JSON-RPC request and wait for its result.
    ///
    /// There is no timeout: the call completes when the child answers or
    /// terminates. An error reply from the child becomes [`McpError::JsonRpc`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode_line(&JsonRpcRequest::new(id, method, params))?;

        let rx = self
            .pending
            .register(id, method)
            .map_err(|e| self.with_exit_code(e))?;

        if self.write_tx.send(line).await.is_err() {
            self.pending.forget(id);
            return Err(self.terminated());
        }

        let outcome: Outcome = rx.await.unwrap_or_else(|_| Err(self.terminated()));
        outcome.map_err(|e| self.with_exit_code(e))
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.pending.is_closed() {
            return Err(self.terminated());
        }
        let line = encode_line(&JsonRpcNotification::new(method, params))?;
        self.write_tx
            .send(line)
            .await
            .map_err(|_| self.terminated())
    }

    /// Receive notifications the child pushes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }

    /// Name of the child program, for logging.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the connection has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Number of requests still waiting for the child.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether the child process has been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait until the child process has exited and return its exit code.
    pub async fn wait_for_exit(&self) -> Option<i32> {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => {
                let exit: Option<ChildExit> = *state;
                exit.and_then(|e| e.code)
            }
            Err(_) => None,
        }
    }

    /// Exit code of the child, waiting at most `wait` for it to be reaped.
    pub async fn exit_code(&self, wait: Duration) -> Option<i32> {
        tokio::time::timeout(wait, self.wait_for_exit())
            .await
            .ok()
            .flatten()
    }

    /// Terminate the child immediately.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Close stdin, give the child `grace` to exit, then kill it.
    ///
    /// Returns true if the child exited within the grace period. Calling this
    /// again after the child is gone returns immediately.
    pub async fn close(&self, grace: Duration) -> bool {
        self.close_by(Instant::now() + grace).await
    }

    /// [`close`](Self::close) with an absolute deadline, for callers sharing
    /// one grace period across several shutdown steps.
    ///
    /// The kill is sent at `deadline`; reaping a killed child is then bounded
    /// by [`KILL_REAP_TIMEOUT`].
    pub async fn close_by(&self, deadline: Instant) -> bool {
        self.stdin_close.cancel();
        if tokio::time::timeout_at(deadline, self.wait_for_exit())
            .await
            .is_ok()
        {
            return true;
        }
        tracing::warn!(
            "MCP server '{}' did not exit within the grace period, killing",
            self.program
        );
        self.kill.cancel();
        if tokio::time::timeout(KILL_REAP_TIMEOUT, self.wait_for_exit())
            .await
            .is_err()
        {
            tracing::warn!("MCP server '{}' was not reaped after kill", self.program);
        }
        false
    }

    fn exit_code_now(&self) -> Option<i32> {
        let exit: Option<ChildExit> = *self.exit_rx.borrow();
        exit.and_then(|e| e.code)
    }

    fn terminated(&self) -> McpError {
        McpError::ChildExited {
            code: self.exit_code_now(),
        }
    }

    fn with_exit_code(&self, err: McpError) -> McpError {
        match err {
            McpError::ChildExited { code: None } => self.terminated(),
            other => other,
        }
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        self.stdin_close.cancel();
        self.kill.cancel();
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Route one line from the child's stdout.
fn dispatch_line(
    program: &str,
    line: &str,
    pending: &PendingRequests,
    notifications: &broadcast::Sender<ServerNotification>,
    reply_tx: &mpsc::Sender<String>,
) {
    let message = match Message::parse(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Discarding output from '{program}' ({e}): {line}");
            return;
        }
    };

    match message {
        Message::Response { id, result } => route_response(pending, &id, Ok(result)),
        Message::ErrorResponse { id, error } => route_response(
            pending,
            &id,
            Err(McpError::JsonRpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
        ),
        Message::Notification { method, params } => {
            // No subscribers is fine
            let _ = notifications.send(ServerNotification { method, params });
        }
        Message::Request { id, method, .. } => {
            tracing::debug!("MCP server '{program}' sent unsupported request '{method}'");
            reject_server_request(reply_tx, id, &method);
        }
    }
}

fn route_response(pending: &PendingRequests, id: &RequestId, outcome: Outcome) {
    let delivered = id.as_u64().is_some_and(|id| pending.resolve(id, outcome));
    if !delivered {
        tracing::debug!("Discarding response for unknown request id {id:?}");
    }
}

fn reject_server_request(reply_tx: &mpsc::Sender<String>, id: RequestId, method: &str) {
    let reply = JsonRpcReply::err(
        Some(id),
        JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
    );
    match encode_line(&reply) {
        Ok(line) => {
            if reply_tx.try_send(line).is_err() {
                tracing::debug!("Dropped reply to server request '{method}'");
            }
        }
        Err(e) => tracing::warn!("Failed to encode reply: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_server, mock_server_with};
    use std::collections::HashSet;

    async fn initialized(command: &ChildCommand) -> StdioClient {
        let client = StdioClient::spawn(command).unwrap();
        client
            .request("initialize", Some(serde_json::json!({})))
            .await
            .unwrap();
        client
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let command = ChildCommand::parse("this_command_does_not_exist_xyz123").unwrap();
        match StdioClient::spawn(&command) {
            Err(McpError::SpawnFailed { command, .. }) => {
                assert_eq!(command, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected SpawnFailed, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip_with_mock() {
        let client = StdioClient::spawn(&mock_server()).unwrap();
        let result = client
            .request("initialize", Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(result["serverInfo"]["name"], "mock");
        assert_eq!(client.pending_count(), 0);
        assert!(client.close(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let client = StdioClient::spawn(&ChildCommand::parse("cat").unwrap()).unwrap();
        let result = client.notify("notifications/initialized", None).await;
        assert!(result.is_ok());
        assert!(client.close(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn error_reply_becomes_jsonrpc_error() {
        let client = initialized(&mock_server()).await;
        let err = client.request("resources/list", None).await.unwrap_err();
        assert_eq!(err.rpc_code(), Some(METHOD_NOT_FOUND));
        client.close(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn concurrent_requests_resolve_to_their_own_ids() {
        let client = Arc::new(initialized(&mock_server()).await);

        let mut handles = Vec::new();
        for n in 0..50u64 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let result = client
                    .request(
                        "tools/call",
                        Some(serde_json::json!({"name": "echo", "arguments": {"n": n}})),
                    )
                    .await
                    .unwrap();
                assert_eq!(result["echo"]["arguments"]["n"], n);
                result["requestId"].as_u64().unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()), "request id reused");
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(client.pending_count(), 0);
        client.close(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn noisy_output_is_discarded() {
        let client = initialized(&mock_server_with("noisy", None)).await;
        let result = client.request("tools/list", None).await.unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 2);
        client.close(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn child_exit_rejects_every_pending_request() {
        let client = Arc::new(initialized(&mock_server()).await);

        let mut hung = Vec::new();
        for _ in 0..3 {
            let client = Arc::clone(&client);
            hung.push(tokio::spawn(async move {
                client
                    .request("tools/call", Some(serde_json::json!({"name": "hang"})))
                    .await
            }));
        }
        // Let the hung requests reach the child before it dies
        while client.pending_count() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let die = client
            .request("tools/call", Some(serde_json::json!({"name": "die"})))
            .await;
        assert!(matches!(die, Err(McpError::ChildExited { .. })));

        for handle in hung {
            let result = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("pending request hung after child exit")
                .unwrap();
            assert!(matches!(result, Err(McpError::ChildExited { .. })));
        }

        assert_eq!(client.wait_for_exit().await, Some(1));
        assert!(client.is_closed());
        let after = client.request("tools/list", None).await;
        assert!(matches!(after, Err(McpError::ChildExited { code: Some(1) })));
        assert!(client.notify("notifications/cancelled", None).await.is_err());
    }

    #[tokio::test]
    async fn server_notifications_are_broadcast() {
        let client = initialized(&mock_server()).await;
        let mut rx = client.subscribe();
        client
            .request("tools/call", Some(serde_json::json!({"name": "notify"})))
            .await
            .unwrap();
        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.method, "notifications/message");
        client.close(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn server_requests_get_method_not_found() {
        let client = initialized(&mock_server()).await;
        let result = client
            .request("tools/call", Some(serde_json::json!({"name": "ask"})))
            .await
            .unwrap();
        assert_eq!(result["reply"]["id"], "srv-1");
        assert_eq!(result["reply"]["error"]["code"], METHOD_NOT_FOUND);
        client.close(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn close_kills_a_child_that_ignores_eof() {
        let command = ChildCommand::parse("sleep 30").unwrap();
        let client = StdioClient::spawn(&command).unwrap();
        assert!(!client.close(Duration::from_millis(200)).await);
        assert!(client.has_exited());
        // Second close is a no-op
        assert!(client.close(Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn close_by_kills_at_the_deadline() {
        let command = ChildCommand::parse("sleep 30").unwrap();
        let client = StdioClient::spawn(&command).unwrap();
        let started = Instant::now();
        assert!(!client.close_by(started + Duration::from_millis(300)).await);
        assert!(client.has_exited());
        assert!(started.elapsed() < Duration::from_millis(300) + KILL_REAP_TIMEOUT);
    }
}
