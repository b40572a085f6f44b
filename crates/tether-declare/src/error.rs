use tether_mcp::McpError;
use thiserror::Error;

/// Errors from the generation flow.
#[derive(Debug, Error)]
pub enum DeclareError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("All tools were excluded; nothing to declare")]
    AllToolsExcluded,

    #[error("Unsupported child runtime '{program}' (expected node, npx, npm, bun, python, uv, uvx or pipx)")]
    UnsupportedRuntime { program: String },

    #[error("Discovery failed: {0}")]
    Discovery(#[from] McpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
