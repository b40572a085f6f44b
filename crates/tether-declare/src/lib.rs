//! Generation-time half of tether.
//!
//! Takes the tools a child advertised during discovery, tags them with the
//! access scopes they appear to need, lets an operator (or a script) review
//! the result, and writes a declaration plus a runnable wrapper scaffold.

pub mod classify;
pub mod declaration;
pub mod error;
pub mod review;
pub mod runtime;
pub mod scaffold;

pub use classify::{
    ClassifiedTool, SCOPE_FILESYSTEM_READ, SCOPE_FILESYSTEM_WRITE, SCOPE_NETWORK_OUTBOUND,
    classify, classify_all, scope_label,
};
pub use declaration::{Declaration, DeclarationMeta};
pub use error::DeclareError;
pub use review::{AcceptAll, ReviewDecider, ReviewDecision, ScriptedDecider, parse_scopes, review};
pub use runtime::ChildRuntime;
pub use scaffold::write_scaffold;
