//! Runtime half of tether: one child MCP server shared by many HTTP sessions.
//!
//! [`Bridge`] launches the child, waits for its handshake, then serves the
//! session transport. Each session gets a [`Forwarder`] that delegates every
//! call to the single shared [`Upstream`].

pub mod error;
pub mod forwarder;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::BridgeError;
pub use forwarder::{ErrorPolicy, Forwarder, policy_for};
pub use http::{AppState, SESSION_HEADER, router};
pub use lifecycle::{Bridge, ShutdownOutcome};
pub use registry::{Activity, Session, SessionRegistry};
pub use upstream::Upstream;
