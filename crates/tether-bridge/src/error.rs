use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tether_mcp::McpError;
use thiserror::Error;

/// Errors from the bridge runtime.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Missing mcp-session-id header")]
    MissingSessionId,

    #[error("Unknown session '{0}'")]
    SessionNotFound(String),

    #[error("Bridge is shutting down")]
    ShuttingDown,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// HTTP status for errors that reach a client.
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::MissingSessionId | BridgeError::SessionNotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
