//! Which language runtime the child command needs.

use crate::error::DeclareError;
use tether_mcp::ChildCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRuntime {
    Node,
    Python,
}

impl ChildRuntime {
    /// Detect the runtime from the child's executable name.
    pub fn detect(command: &ChildCommand) -> Result<Self, DeclareError> {
        let program = command.program_name();
        let program = program.strip_suffix(".exe").unwrap_or(program);
        match program {
            "node" | "npx" | "npm" | "bun" | "bunx" => Ok(ChildRuntime::Node),
            "python" | "python3" | "uv" | "uvx" | "pipx" => Ok(ChildRuntime::Python),
            _ => Err(DeclareError::UnsupportedRuntime {
                program: command.program.clone(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChildRuntime::Node => "node",
            ChildRuntime::Python => "python",
        }
    }

    /// Base image for the wrapper's container build file.
    pub fn base_image(&self) -> &'static str {
        match self {
            ChildRuntime::Node => "node:20-slim",
            ChildRuntime::Python => "python:3.12-slim",
        }
    }
}

/// The package the child command launches, if it names one.
///
/// `npx -y @scope/server@1.2 /data` → `@scope/server@1.2`,
/// `uvx mcp-server-fetch` → `mcp-server-fetch`,
/// `python -m my_server` → `my_server`. Plain scripts (`node server.js`) name
/// no package.
pub fn launched_package(command: &ChildCommand) -> Option<String> {
    let program = command.program_name();
    let program = program.strip_suffix(".exe").unwrap_or(program);
    let mut args = command.args.iter().map(String::as_str);

    match program {
        "npx" | "bunx" | "uvx" => first_positional(args),
        "npm" | "pipx" => {
            // npm exec <pkg>, pipx run <pkg>
            args.find(|a| matches!(*a, "exec" | "x" | "run"))?;
            first_positional(args)
        }
        "uv" => {
            // uv run <pkg>, uv tool run <pkg>
            args.find(|a| *a == "run")?;
            first_positional(args)
        }
        "python" | "python3" => {
            args.find(|a| *a == "-m")?;
            args.next().map(str::to_string)
        }
        _ => None,
    }
}

fn first_positional<'a>(mut args: impl Iterator<Item = &'a str>) -> Option<String> {
    args.find(|a| !a.starts_with('-')).map(str::to_string)
}

/// Split `name@version` for npm packages, keeping a leading scope `@`.
pub fn split_npm_version(spec: &str) -> (&str, Option<&str>) {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(pos) => {
            let at = search_from + pos;
            (&spec[..at], Some(&spec[at + 1..]))
        }
        None => (spec, None),
    }
}
