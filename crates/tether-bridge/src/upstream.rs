//! The seam between sessions and the shared child connection.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tether_mcp::{McpError, ServerNotification, StdioClient};
use tokio::sync::broadcast;

/// Something that answers JSON-RPC requests on behalf of every session.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility so sessions can hold an
/// `Arc<dyn Upstream>`.
pub trait Upstream: Send + Sync {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, McpError>> + Send + 'a>>;

    /// Notifications pushed by the child from now on.
    fn subscribe(&self) -> broadcast::Receiver<ServerNotification>;
}

impl Upstream for StdioClient {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, McpError>> + Send + 'a>> {
        Box::pin(StdioClient::request(self, method, params))
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerNotification> {
        StdioClient::subscribe(self)
    }
}
