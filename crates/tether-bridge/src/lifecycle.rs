//! Lifecycle controller: launch the child, handshake, serve; and an idempotent,
//! bounded shutdown.

use crate::error::BridgeError;
use crate::http::{AppState, router};
use crate::registry::SessionRegistry;
use crate::upstream::Upstream;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tether_config::BridgeConfig;
use tether_mcp::{Discovery, Handshake, HandshakeOptions, ServerIdentity, StdioClient};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// How a call to [`Bridge::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Sessions closed, the child exited and the server stopped in time.
    Completed,
    /// Something was still running when the grace period ran out.
    GraceElapsed,
    /// Another shutdown was already under way; nothing was done.
    AlreadyInProgress,
}

/// Upper bound on how often idle sessions are swept.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A running bridge.
pub struct Bridge {
    client: Arc<StdioClient>,
    registry: Arc<SessionRegistry>,
    discovery: Discovery,
    local_addr: SocketAddr,
    path: String,
    grace: Duration,
    stop_serving: CancellationToken,
    server: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    shutting_down: AtomicBool,
}

impl Bridge {
    /// Spawn the child, run its handshake, and only then start accepting
    /// HTTP connections.
    pub async fn start(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let client = StdioClient::spawn(&config.child)?;

        let options = HandshakeOptions {
            deadline: config.discovery_timeout,
            ..HandshakeOptions::default()
        };
        let discovery = match Handshake::new(&client, options)
            .run()
            .await
            .and_then(Discovery::ensure_tools)
        {
            Ok(discovery) => discovery,
            Err(e) => {
                client.close(config.shutdown_grace).await;
                return Err(e.into());
            }
        };

        let listener = match TcpListener::bind(config.listen).await {
            Ok(listener) => listener,
            Err(source) => {
                client.close(config.shutdown_grace).await;
                return Err(BridgeError::Bind {
                    addr: config.listen,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr()?;

        let client = Arc::new(client);
        let upstream: Arc<dyn Upstream> = client.clone();
        let registry = Arc::new(SessionRegistry::new(upstream));
        let state = AppState {
            registry: Arc::clone(&registry),
            identity: Arc::new(discovery.server.clone()),
            auth_token: config.auth_token.as_deref().map(Arc::from),
        };
        let app = router(state, &config.path);

        let stop_serving = CancellationToken::new();
        let server = {
            let stop = stop_serving.clone();
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(stop.cancelled_owned())
                    .await
            })
        };

        if let Some(max_idle) = config.session_idle_timeout {
            tokio::spawn(sweep_idle_sessions(
                Arc::clone(&registry),
                max_idle,
                stop_serving.clone(),
            ));
        }

        tracing::info!(
            addr = %local_addr,
            path = %config.path,
            tools = discovery.tools.len(),
            "Bridge listening"
        );

        Ok(Self {
            client,
            registry,
            discovery,
            local_addr,
            path: config.path.clone(),
            grace: config.shutdown_grace,
            stop_serving,
            server: Mutex::new(Some(server)),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Full URL of the session endpoint.
    pub fn url(&self) -> String {
        format!("http://{}{}", self.local_addr, self.path)
    }

    pub fn server_identity(&self) -> &ServerIdentity {
        &self.discovery.server
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Requests forwarded to the child and not yet answered, across sessions.
    pub fn pending_requests(&self) -> usize {
        self.client.pending_count()
    }

    /// Resolves with the exit code once the child process has exited.
    ///
    /// Outside of [`shutdown`](Self::shutdown) this means the child died; every
    /// pending request has already been rejected.
    pub async fn child_exited(&self) -> Option<i32> {
        self.client.wait_for_exit().await
    }

    /// Stop accepting sessions, close every session, close the child and
    /// stop the server, all within one grace period. A second call while one
    /// is under way does nothing.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown already in progress");
            return ShutdownOutcome::AlreadyInProgress;
        }
        let deadline = Instant::now() + self.grace;

        self.registry.stop_accepting();
        let closed = self.registry.close_all();
        tracing::info!(sessions = closed, "Shutting down");

        self.stop_serving.cancel();
        let child_exited = self.client.close_by(deadline).await;

        let server = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let server_stopped = match server {
            Some(handle) => match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(()))) => true,
                Ok(Ok(Err(e))) => {
                    tracing::warn!("HTTP server error: {e}");
                    true
                }
                Ok(Err(e)) => {
                    tracing::warn!("HTTP server task failed: {e}");
                    true
                }
                Err(_) => false,
            },
            None => true,
        };

        if child_exited && server_stopped {
            tracing::info!("Shutdown complete");
            ShutdownOutcome::Completed
        } else {
            tracing::warn!(child_exited, server_stopped, "Shutdown grace period elapsed");
            ShutdownOutcome::GraceElapsed
        }
    }
}

async fn sweep_idle_sessions(
    registry: Arc<SessionRegistry>,
    max_idle: Duration,
    stop: CancellationToken,
) {
    let mut ticks = tokio::time::interval((max_idle / 2).min(MAX_SWEEP_INTERVAL));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticks.tick() => {
                let expired = registry.expire_idle(max_idle);
                if expired > 0 {
                    tracing::debug!(expired, open = registry.len(), "Swept idle sessions");
                }
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop_serving.cancel();
        self.client.kill();
    }
}
