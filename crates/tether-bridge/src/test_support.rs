//! In-memory upstream for unit tests.

use crate::upstream::Upstream;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tether_mcp::jsonrpc::METHOD_NOT_FOUND;
use tether_mcp::{McpError, ServerNotification};
use tokio::sync::broadcast;

/// Canned replies by method; anything unlisted is method-not-found.
pub(crate) struct MockUpstream {
    replies: HashMap<String, Result<Value, i64>>,
    exited: Option<Option<i32>>,
    calls: Mutex<Vec<String>>,
    notifications: broadcast::Sender<ServerNotification>,
}

impl MockUpstream {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(16);
        Self {
            replies: HashMap::new(),
            exited: None,
            calls: Mutex::new(Vec::new()),
            notifications,
        }
    }

    pub fn respond(mut self, method: &str, result: Value) -> Self {
        self.replies.insert(method.to_string(), Ok(result));
        self
    }

    pub fn fail(mut self, method: &str, code: i64) -> Self {
        self.replies.insert(method.to_string(), Err(code));
        self
    }

    /// Every request fails as if the child had exited with `code`.
    pub fn dead(mut self, code: Option<i32>) -> Self {
        self.exited = Some(code);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn push_notification(&self, method: &str) {
        let _ = self.notifications.send(ServerNotification {
            method: method.to_string(),
            params: None,
        });
    }
}

impl Upstream for MockUpstream {
    fn request<'a>(
        &'a self,
        method: &'a str,
        _params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, McpError>> + Send + 'a>> {
        self.calls.lock().unwrap().push(method.to_string());
        let outcome = match (self.exited, self.replies.get(method)) {
            (Some(code), _) => Err(McpError::ChildExited { code }),
            (None, Some(Ok(value))) => Ok(value.clone()),
            (None, Some(Err(code))) => Err(McpError::JsonRpc {
                code: *code,
                message: format!("{method} failed"),
                data: None,
            }),
            (None, None) => Err(McpError::JsonRpc {
                code: METHOD_NOT_FOUND,
                message: "Method not found".to_string(),
                data: None,
            }),
        };
        Box::pin(async move { outcome })
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }
}
