//! Outstanding requests awaiting a response from the child.
//!
//! Every registered id leaves the map exactly once: on its matching response,
//! on a failed write, or when the connection is closed.

use crate::error::McpError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;

pub(crate) type Outcome = Result<Value, McpError>;

struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<u64, PendingRequest>,
    closed: bool,
}

/// Map of request id to the waiter for its response.
#[derive(Default)]
pub(crate) struct PendingRequests {
    inner: Mutex<Inner>,
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `id`. Fails once the connection is closed.
    pub fn register(&self, id: u64, method: &str) -> Result<oneshot::Receiver<Outcome>, McpError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(McpError::ChildExited { code: None });
        }
        if inner.entries.contains_key(&id) {
            return Err(McpError::Protocol(format!("request id {id} already pending")));
        }
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Deliver the outcome for `id`. Returns false for unknown (stale or
    /// duplicate) ids.
    pub fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        let Some(entry) = self.lock().entries.remove(&id) else {
            return false;
        };
        tracing::trace!(
            id,
            method = %entry.method,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "MCP response"
        );
        // The caller may have given up waiting; that is fine.
        let _ = entry.tx.send(outcome);
        true
    }

    /// Drop the entry for `id` without delivering anything.
    pub fn forget(&self, id: u64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    /// Refuse new registrations and reject every outstanding request.
    pub fn close(&self, code: Option<i32>) -> usize {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.entries.drain().collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(id, method = %entry.method, "Rejecting pending MCP request");
            let _ = entry.tx.send(Err(McpError::ChildExited { code }));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }
}
