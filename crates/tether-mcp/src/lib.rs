//! Client side of the MCP stdio protocol.
//!
//! A child MCP server is spawned and spoken to over newline-delimited
//! JSON-RPC 2.0 on its stdin/stdout. [`StdioClient`] owns the process and
//! correlates responses by id; [`Handshake`] brings a fresh connection to the
//! point where its tools are known.

pub mod command;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod jsonrpc;
mod pending;
mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use command::ChildCommand;
pub use error::{FrameError, McpError};
pub use handshake::{
    DEFAULT_DISCOVERY_TIMEOUT, DiscoveredTool, Discovery, Handshake, HandshakeOptions,
    HandshakeState, PROTOCOL_VERSION, ServerIdentity, ServerInfo, discover,
};
pub use jsonrpc::{JsonRpcError, JsonRpcReply, Message, RequestId};
pub use transport::{KILL_REAP_TIMEOUT, ServerNotification, StdioClient};
