//! The child process command line.

use crate::error::McpError;
use std::collections::HashMap;
use std::fmt;

/// Program, arguments and extra environment for the child MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ChildCommand {
    /// Split a single configuration string on whitespace: the first token is the
    /// executable, the rest are its arguments.
    pub fn parse(command_line: &str) -> Result<Self, McpError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| McpError::Protocol("child command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            env: HashMap::new(),
        })
    }

    /// Add an environment variable for the spawned process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// File name of the program, without any leading directories.
    pub fn program_name(&self) -> &str {
        self.program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.program)
    }
}

impl fmt::Display for ChildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
