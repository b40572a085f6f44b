//! Error types for MCP operations.

use thiserror::Error;

/// Errors from communicating with a stdio MCP child process.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP server did not finish discovery within {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    #[error("MCP server exited before discovery completed ({})", describe_exit(.code))]
    ExitedBeforeDiscovery { code: Option<i32> },

    #[error("MCP server terminated ({})", describe_exit(.code))]
    ChildExited { code: Option<i32> },

    #[error("JSON-RPC error (code {code}): {message}")]
    JsonRpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("MCP server advertised no tools")]
    NoToolsDiscovered,

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// The JSON-RPC error code, if the child reported one.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            McpError::JsonRpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

/// A line from the child that is not a recognizable JSON-RPC envelope.
///
/// Never fatal: the reader logs it and moves on.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("not JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("unrecognized envelope: {0}")]
    Unrecognized(&'static str),
}
