//! Session registry: session id → forwarder, all sharing one upstream.
//!
//! Removing a session only cancels that session's own transport; the shared
//! upstream is never touched. Sessions nobody has used for a while can be
//! swept with [`SessionRegistry::expire_idle`].

use crate::error::BridgeError;
use crate::forwarder::Forwarder;
use crate::upstream::Upstream;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One client conversation.
pub struct Session {
    id: String,
    opened_at: DateTime<Utc>,
    forwarder: Forwarder,
    closed: CancellationToken,
    last_used: Mutex<Instant>,
    active: AtomicUsize,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Cancelled when the session is torn down; ends its event stream.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the session was last looked up or last finished a request.
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Mark the session busy until the returned guard is dropped. A busy
    /// session never expires.
    pub fn activity(self: &Arc<Self>) -> Activity {
        self.active.fetch_add(1, Ordering::AcqRel);
        Activity {
            session: Arc::clone(self),
        }
    }

    fn is_idle(&self, max_idle: Duration) -> bool {
        self.active.load(Ordering::Acquire) == 0 && self.idle_for() >= max_idle
    }
}

/// An in-flight request or open event stream on a session.
pub struct Activity {
    session: Arc<Session>,
}

impl Drop for Activity {
    fn drop(&mut self) {
        self.session.touch();
        self.session.active.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    accepting: bool,
}

pub struct SessionRegistry {
    upstream: Arc<dyn Upstream>,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                accepting: true,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    /// Open a session under a fresh random id.
    pub fn create(&self) -> Result<Arc<Session>, BridgeError> {
        let mut inner = self.lock();
        if !inner.accepting {
            return Err(BridgeError::ShuttingDown);
        }

        let mut id = Uuid::new_v4().to_string();
        while inner.sessions.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        let session = Arc::new(Session {
            forwarder: Forwarder::new(id.clone(), Arc::clone(&self.upstream)),
            id: id.clone(),
            opened_at: Utc::now(),
            closed: CancellationToken::new(),
            last_used: Mutex::new(Instant::now()),
            active: AtomicUsize::new(0),
        });
        inner.sessions.insert(id.clone(), Arc::clone(&session));
        tracing::info!(session = %id, open = inner.sessions.len(), "Session opened");
        Ok(session)
    }

    /// Look up a session. A successful lookup counts as use.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, BridgeError> {
        let session = self
            .lock()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        session.touch();
        Ok(session)
    }

    /// Deregister a session and close its transport. Unknown ids are an error.
    pub fn remove(&self, id: &str) -> Result<Arc<Session>, BridgeError> {
        let session = self
            .lock()
            .sessions
            .remove(id)
            .ok_or_else(|| BridgeError::SessionNotFound(id.to_string()))?;
        session.closed.cancel();
        tracing::info!(
            session = %id,
            age_ms = (Utc::now() - session.opened_at).num_milliseconds(),
            "Session closed"
        );
        Ok(session)
    }

    /// Close and deregister every session idle for at least `max_idle`.
    /// Returns how many expired.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let mut expired = Vec::new();
        self.lock().sessions.retain(|_, session| {
            if session.is_idle(max_idle) {
                expired.push(Arc::clone(session));
                false
            } else {
                true
            }
        });
        for session in &expired {
            session.closed.cancel();
            tracing::info!(
                session = %session.id,
                idle_ms = session.idle_for().as_millis() as u64,
                "Session expired"
            );
        }
        expired.len()
    }

    /// Refuse new sessions from now on.
    pub fn stop_accepting(&self) {
        self.lock().accepting = false;
    }

    /// Close and deregister every session. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut inner = self.lock();
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &drained {
            session.closed.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
