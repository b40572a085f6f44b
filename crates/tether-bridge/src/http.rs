//! HTTP session transport: POST, GET and DELETE on one path.
//!
//! POST without an `mcp-session-id` header opens a session and handles the
//! request on it. GET streams the child's notifications to a known session as
//! server-sent events. DELETE ends a known session. Unknown or missing
//! session ids are client errors and never create a session.

use crate::error::BridgeError;
use crate::forwarder::to_rpc_error;
use crate::registry::{Activity, Session, SessionRegistry};
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures_util::Stream;
use futures_util::stream;
use serde_json::{Value, json};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tether_mcp::jsonrpc::{INVALID_PARAMS, INVALID_REQUEST, JsonRpcNotification, PARSE_ERROR};
use tether_mcp::{JsonRpcError, JsonRpcReply, McpError, Message, RequestId, ServerIdentity};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Answer to `initialize`, captured once from the child's handshake.
    pub identity: Arc<ServerIdentity>,
    pub auth_token: Option<Arc<str>>,
}

pub fn router(state: AppState, path: &str) -> Router {
    let mut routes = Router::new().route(path, post(http_post).get(http_get).delete(http_delete));
    if let Some(token) = state.auth_token.clone() {
        routes = routes.layer(middleware::from_fn_with_state(token, require_auth));
    }
    routes.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn http_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let value: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            let error = JsonRpcError {
                code: PARSE_ERROR,
                message: "Parse error".to_string(),
                data: Some(json!({ "detail": e.to_string() })),
            };
            return jsonrpc_http_response(&JsonRpcReply::err(None, error), None);
        }
    };

    if value.is_array() {
        let error = JsonRpcError::new(INVALID_REQUEST, "Batch requests are not supported");
        return jsonrpc_http_response(&JsonRpcReply::err(None, error), None);
    }

    let message = match Message::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            let error = JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {e}"));
            return jsonrpc_http_response(&JsonRpcReply::err(None, error), None);
        }
    };

    let session = match session_for_post(&state.registry, &headers) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    let _activity = session.activity();

    match message {
        Message::Request { id, method, params } => {
            let reply = handle_request(&state, &session, id, &method, params).await;
            jsonrpc_http_response(&reply, Some(session.id()))
        }
        Message::Notification { method, .. } => {
            // The child was initialized once at startup; client notifications
            // are not relayed
            tracing::debug!(session = %session.id(), %method, "Client notification accepted");
            accepted(session.id())
        }
        Message::Response { .. } | Message::ErrorResponse { .. } => accepted(session.id()),
    }
}

/// The session named by the header, or a new one if there is no header.
fn session_for_post(
    registry: &SessionRegistry,
    headers: &HeaderMap,
) -> Result<Arc<Session>, BridgeError> {
    match header_str(headers, SESSION_HEADER) {
        Some(id) => registry.get(id),
        None => registry.create(),
    }
}

async fn handle_request(
    state: &AppState,
    session: &Session,
    id: RequestId,
    method: &str,
    params: Option<Value>,
) -> JsonRpcReply {
    if params.as_ref().is_some_and(|p| !p.is_object() && !p.is_array()) {
        let error = JsonRpcError::new(INVALID_PARAMS, "params must be an object or array");
        return JsonRpcReply::err(Some(id), error);
    }

    let outcome = match method {
        "initialize" => serde_json::to_value(state.identity.as_ref()).map_err(McpError::from),
        "ping" => Ok(json!({})),
        _ => session.forwarder().forward(method, params).await,
    };
    match outcome {
        Ok(result) => JsonRpcReply::ok(id, result),
        Err(e) => JsonRpcReply::err(Some(id), to_rpc_error(&e)),
    }
}

async fn http_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, BridgeError> {
    let id = header_str(&headers, SESSION_HEADER).ok_or(BridgeError::MissingSessionId)?;
    let session = state.registry.get(id)?;
    let events = session_events(Arc::clone(&state.registry), &session);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn http_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, BridgeError> {
    let id = header_str(&headers, SESSION_HEADER).ok_or(BridgeError::MissingSessionId)?;
    state.registry.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deregisters the session if its event stream is dropped while the session
/// is still open, i.e. the client went away.
struct DisconnectGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
    closed: CancellationToken,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.closed.is_cancelled() && self.registry.remove(&self.session_id).is_ok() {
            tracing::debug!(session = %self.session_id, "Event stream dropped, session removed");
        }
    }
}

struct EventFeed {
    notifications: broadcast::Receiver<tether_mcp::ServerNotification>,
    closed: CancellationToken,
    _guard: DisconnectGuard,
    // An open stream keeps the session from expiring
    _activity: Activity,
}

/// Child notifications as `message` events until the session closes.
fn session_events(
    registry: Arc<SessionRegistry>,
    session: &Arc<Session>,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send + 'static + use<> {
    let feed = EventFeed {
        notifications: registry.upstream().subscribe(),
        closed: session.closed(),
        _guard: DisconnectGuard {
            registry,
            session_id: session.id().to_string(),
            closed: session.closed(),
        },
        _activity: session.activity(),
    };

    stream::unfold(feed, |mut feed| async move {
        loop {
            let received = tokio::select! {
                _ = feed.closed.cancelled() => return None,
                received = feed.notifications.recv() => received,
            };
            match received {
                Ok(notification) => {
                    let event = Event::default().event("message").json_data(
                        JsonRpcNotification::new(notification.method, notification.params),
                    );
                    return Some((event, feed));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event stream lagged, {skipped} notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

async fn require_auth(
    State(auth_token): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|presented| presented.as_bytes().ct_eq(auth_token.as_bytes()).into())
        .unwrap_or(false);

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "missing or invalid authorization").into_response();
    }

    next.run(request).await
}

fn jsonrpc_http_response(reply: &JsonRpcReply, session_id: Option<&str>) -> Response {
    let body = match serde_json::to_string(reply) {
        Ok(body) => body,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json");

    if let Some(v) = session_id.and_then(|sid| HeaderValue::from_str(sid).ok()) {
        builder = builder.header(SESSION_HEADER, v);
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn accepted(session_id: &str) -> Response {
    match HeaderValue::from_str(session_id) {
        Ok(v) => (StatusCode::ACCEPTED, [(SESSION_HEADER, v)]).into_response(),
        Err(_) => StatusCode::ACCEPTED.into_response(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}
