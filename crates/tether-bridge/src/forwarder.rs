//! Per-session capability surface.
//!
//! A [`Forwarder`] holds nothing but its session id and a handle to the shared
//! upstream. Every method delegates; what happens to an upstream error is
//! decided per method by [`ErrorPolicy`], never by a blanket catch.

use crate::upstream::Upstream;
use serde_json::{Value, json};
use std::sync::Arc;
use tether_mcp::McpError;
use tether_mcp::jsonrpc::{INTERNAL_ERROR, JsonRpcError, METHOD_NOT_FOUND};

/// How a forwarded method treats an error from the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Surface the error to the caller unchanged.
    Propagate,
    /// A tool failure becomes a normal result flagged `isError`. The child
    /// not implementing the method at all, or dying, still propagates.
    ToolResult,
    /// The child may not implement this; answer `{key: []}` instead.
    BestEffortEmpty(&'static str),
}

const FORWARDED_METHODS: &[(&str, ErrorPolicy)] = &[
    ("tools/list", ErrorPolicy::Propagate),
    ("tools/call", ErrorPolicy::ToolResult),
    ("resources/list", ErrorPolicy::BestEffortEmpty("resources")),
    (
        "resources/templates/list",
        ErrorPolicy::BestEffortEmpty("resourceTemplates"),
    ),
    ("resources/read", ErrorPolicy::Propagate),
    ("prompts/list", ErrorPolicy::BestEffortEmpty("prompts")),
    ("prompts/get", ErrorPolicy::Propagate),
];

/// Policy for a method the bridge forwards, or `None` if it does not.
pub fn policy_for(method: &str) -> Option<ErrorPolicy> {
    FORWARDED_METHODS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, policy)| *policy)
}

pub struct Forwarder {
    session_id: String,
    upstream: Arc<dyn Upstream>,
}

impl Forwarder {
    pub fn new(session_id: impl Into<String>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            session_id: session_id.into(),
            upstream,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Forward `method` to the child and apply its error policy.
    ///
    /// Methods outside the capability surface fail with method-not-found
    /// without reaching the child.
    pub async fn forward(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let Some(policy) = policy_for(method) else {
            return Err(McpError::JsonRpc {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            });
        };

        tracing::debug!(session = %self.session_id, method, "Forwarding");
        let outcome = self.upstream.request(method, params).await;
        apply_policy(policy, method, outcome)
    }

    pub async fn list_tools(&self) -> Result<Value, McpError> {
        self.forward("tools/list", None).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.forward(
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }

    pub async fn list_resources(&self) -> Result<Value, McpError> {
        self.forward("resources/list", None).await
    }

    pub async fn list_resource_templates(&self) -> Result<Value, McpError> {
        self.forward("resources/templates/list", None).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value, McpError> {
        self.forward("resources/read", Some(json!({"uri": uri})))
            .await
    }

    pub async fn list_prompts(&self) -> Result<Value, McpError> {
        self.forward("prompts/list", None).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.forward(
            "prompts/get",
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }
}

fn apply_policy(
    policy: ErrorPolicy,
    method: &str,
    outcome: Result<Value, McpError>,
) -> Result<Value, McpError> {
    let err = match outcome {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    match (policy, err) {
        (ErrorPolicy::ToolResult, McpError::JsonRpc { code, message, .. })
            if code != METHOD_NOT_FOUND =>
        {
            tracing::debug!(method, code, "Tool error returned as result");
            Ok(json!({
                "content": [{"type": "text", "text": message}],
                "isError": true,
            }))
        }
        (ErrorPolicy::BestEffortEmpty(key), McpError::JsonRpc { code, .. }) => {
            tracing::debug!(method, code, "Child does not support method, returning empty");
            let mut empty = serde_json::Map::new();
            empty.insert(key.to_string(), Value::Array(Vec::new()));
            Ok(Value::Object(empty))
        }
        (_, err) => Err(err),
    }
}

/// Translate an error into the JSON-RPC error sent back to an HTTP client.
pub fn to_rpc_error(err: &McpError) -> JsonRpcError {
    match err {
        McpError::JsonRpc {
            code,
            message,
            data,
        } => JsonRpcError {
            code: *code,
            message: message.clone(),
            data: data.clone(),
        },
        other => JsonRpcError::new(INTERNAL_ERROR, other.to_string()),
    }
}
