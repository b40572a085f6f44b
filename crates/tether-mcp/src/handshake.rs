//! Handshake controller: `initialize` → `notifications/initialized` →
//! `tools/list`, bounded by a discovery deadline.

use crate::command::ChildCommand;
use crate::error::McpError;
use crate::transport::StdioClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// MCP protocol version we request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Default time allowed for the whole handshake.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

const EXIT_CODE_WAIT: Duration = Duration::from_millis(500);
const DISCOVERY_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Where the handshake is. `Ready` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    AwaitingTools,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    pub deadline: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DISCOVERY_TIMEOUT,
            client_name: "tether".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A tool as advertised by the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Name and version the child reports for itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// The child's `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdentity {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: ServerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Everything learned from a completed handshake.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub server: ServerIdentity,
    pub tools: Vec<DiscoveredTool>,
}

impl Discovery {
    /// A child with no tools has nothing to bridge.
    pub fn ensure_tools(self) -> Result<Self, McpError> {
        if self.tools.is_empty() {
            return Err(McpError::NoToolsDiscovered);
        }
        Ok(self)
    }
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Drives the bootstrap exchange on a freshly spawned client.
///
/// Runs at most once; a failed handshake is never retried.
pub struct Handshake<'a> {
    client: &'a StdioClient,
    options: HandshakeOptions,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    pub fn new(client: &'a StdioClient, options: HandshakeOptions) -> Self {
        Self {
            client,
            options,
            state: HandshakeState::Init,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake to `Ready`, or fail.
    ///
    /// If the deadline passes first the child is killed.
    pub async fn run(&mut self) -> Result<Discovery, McpError> {
        if self.state != HandshakeState::Init {
            return Err(McpError::Protocol("handshake already ran".to_string()));
        }

        let deadline = self.options.deadline;
        let outcome = tokio::time::timeout(deadline, self.exchange()).await;

        match outcome {
            Ok(Ok(discovery)) => {
                self.state = HandshakeState::Ready;
                tracing::info!(
                    "MCP server '{}' ready with {} tools",
                    self.client.program(),
                    discovery.tools.len()
                );
                Ok(discovery)
            }
            Ok(Err(err)) => {
                self.state = HandshakeState::Failed;
                Err(self.explain(err).await)
            }
            Err(_) => {
                self.state = HandshakeState::Failed;
                self.client.kill();
                Err(McpError::HandshakeTimeout {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    async fn exchange(&mut self) -> Result<Discovery, McpError> {
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            }
        });

        let init = self.client.request("initialize", Some(init_params)).await?;
        let server: ServerIdentity = serde_json::from_value(init).map_err(|e| {
            McpError::Protocol(format!("Failed to parse initialize response: {e}"))
        })?;

        self.client
            .notify("notifications/initialized", None)
            .await?;
        self.state = HandshakeState::AwaitingTools;

        let listed = self.client.request("tools/list", None).await?;
        let list: ToolsListResult = serde_json::from_value(listed).map_err(|e| {
            McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
        })?;

        let tools = list
            .tools
            .into_iter()
            .map(|t| DiscoveredTool {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            })
            .collect();

        Ok(Discovery { server, tools })
    }

    async fn explain(&self, err: McpError) -> McpError {
        match err {
            McpError::ChildExited { code } => {
                let code = match code {
                    Some(code) => Some(code),
                    None => self.client.exit_code(EXIT_CODE_WAIT).await,
                };
                McpError::ExitedBeforeDiscovery { code }
            }
            other => other,
        }
    }
}

/// One-shot discovery: spawn, handshake, require at least one tool, close.
pub async fn discover(
    command: &ChildCommand,
    options: HandshakeOptions,
) -> Result<Discovery, McpError> {
    let client = StdioClient::spawn(command)?;
    let result = Handshake::new(&client, options)
        .run()
        .await
        .and_then(Discovery::ensure_tools);
    client.close(DISCOVERY_CLOSE_GRACE).await;
    result
}
