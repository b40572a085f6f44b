//! Helpers for tests that need a live child process.

use crate::command::ChildCommand;

const MOCK_SERVER: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../testdata/mock_mcp_server.sh"
);

/// The mock MCP server in its default mode.
pub(crate) fn mock_server() -> ChildCommand {
    mock_server_with("normal", None)
}

/// The mock MCP server with a mode and an optional tools/list payload.
pub(crate) fn mock_server_with(mode: &str, tools: Option<&str>) -> ChildCommand {
    let mut command = ChildCommand {
        program: "bash".to_string(),
        args: vec![MOCK_SERVER.to_string()],
        env: Default::default(),
    }
    .with_env("MOCK_MODE", mode);
    if let Some(tools) = tools {
        command = command.with_env("MOCK_TOOLS", tools);
    }
    command
}
