//! End-to-end tests: a real bridge over the mock MCP server, driven by HTTP
//! clients.

use serde_json::{Value, json};
use std::time::Duration;
use tether_bridge::{Bridge, BridgeError, SESSION_HEADER, ShutdownOutcome};
use tether_config::BridgeConfig;
use tether_mcp::{ChildCommand, KILL_REAP_TIMEOUT, McpError};

const MOCK_SERVER: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../testdata/mock_mcp_server.sh"
);

fn config(mode: &str) -> BridgeConfig {
    BridgeConfig {
        child: ChildCommand {
            program: "bash".to_string(),
            args: vec![MOCK_SERVER.to_string()],
            env: Default::default(),
        }
        .with_env("MOCK_MODE", mode),
        listen: "127.0.0.1:0".parse().unwrap(),
        path: "/mcp".to_string(),
        discovery_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(2),
        session_idle_timeout: None,
        auth_token: None,
    }
}

struct Reply {
    status: u16,
    session: Option<String>,
    body: Value,
}

struct Harness {
    bridge: Bridge,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(config("normal")).await
    }

    async fn start_with(config: BridgeConfig) -> Self {
        Self {
            bridge: Bridge::start(&config).await.unwrap(),
            http: reqwest::Client::new(),
        }
    }

    async fn post_raw(&self, session: Option<&str>, body: String) -> Reply {
        let mut request = self
            .http
            .post(self.bridge.url())
            .header("content-type", "application/json")
            .body(body);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Reply {
            status,
            session,
            body,
        }
    }

    async fn post(&self, session: Option<&str>, body: Value) -> Reply {
        self.post_raw(session, body.to_string()).await
    }

    async fn call(&self, session: &str, id: u64, method: &str, params: Value) -> Value {
        let reply = self
            .post(
                Some(session),
                json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}),
            )
            .await;
        assert_eq!(reply.status, 200, "{method} failed: {:?}", reply.body);
        reply.body
    }

    /// `initialize` without a session header opens a session.
    async fn open_session(&self) -> String {
        let reply = self
            .post(
                None,
                json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}),
            )
            .await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["result"]["serverInfo"]["name"], "mock");
        reply.session.expect("session header")
    }

    async fn delete(&self, session: Option<&str>) -> u16 {
        let mut request = self.http.delete(self.bridge.url());
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        request.send().await.unwrap().status().as_u16()
    }
}

fn tool_names(list: &Value) -> Vec<String> {
    list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn two_sessions_share_one_child_without_cross_talk() {
    let h = Harness::start().await;
    let s1 = h.open_session().await;
    let s2 = h.open_session().await;
    assert_ne!(s1, s2);
    assert_eq!(h.bridge.session_count(), 2);

    let (l1, l2) = tokio::join!(
        h.call(&s1, 1, "tools/list", json!({})),
        h.call(&s2, 1, "tools/list", json!({}))
    );
    assert_eq!(tool_names(&l1), vec!["read_file", "execute_shell"]);
    assert_eq!(tool_names(&l1), tool_names(&l2));

    let calls = (0..10u64).flat_map(|n| {
        [(s1.clone(), "s1", n), (s2.clone(), "s2", n)]
    });
    let results = futures_util::future::join_all(calls.map(|(sid, tag, n)| {
        let h = &h;
        async move {
            let reply = h
                .call(
                    &sid,
                    100 + n,
                    "tools/call",
                    json!({"name": "echo", "arguments": {"from": tag, "n": n}}),
                )
                .await;
            (tag, n, reply)
        }
    }))
    .await;

    for (tag, n, reply) in results {
        assert_eq!(reply["id"], 100 + n);
        assert_eq!(reply["result"]["echo"]["arguments"]["from"], tag);
        assert_eq!(reply["result"]["echo"]["arguments"]["n"], n);
    }

    assert_eq!(h.bridge.shutdown().await, ShutdownOutcome::Completed);
}

#[tokio::test]
async fn killed_child_rejects_every_outstanding_request() {
    let h = Harness::start().await;
    let s1 = h.open_session().await;
    let s2 = h.open_session().await;

    let hung = [(s1.clone(), 1), (s1.clone(), 2), (s2.clone(), 3)].map(|(sid, id)| {
        let http = h.http.clone();
        let url = h.bridge.url();
        tokio::spawn(async move {
            http.post(url)
                .header(SESSION_HEADER, sid)
                .json(&json!({
                    "jsonrpc": "2.0", "id": id, "method": "tools/call",
                    "params": {"name": "hang", "arguments": {}}
                }))
                .send()
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        })
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.bridge.pending_requests() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hung requests never reached the child");

    let die = h
        .call(&s2, 9, "tools/call", json!({"name": "die", "arguments": {}}))
        .await;
    assert!(die["error"]["message"].as_str().unwrap().contains("terminated"));

    for handle in hung {
        let reply = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("request hung after the child died")
            .unwrap();
        assert_eq!(reply["error"]["code"], -32603);
        assert!(reply["error"]["message"].as_str().unwrap().contains("terminated"));
    }

    assert_eq!(h.bridge.child_exited().await, Some(1));
    assert_eq!(h.bridge.pending_requests(), 0);
}

#[tokio::test]
async fn get_without_session_is_rejected_and_creates_nothing() {
    let h = Harness::start().await;

    let status = h.http.get(h.bridge.url()).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 400);

    let status = h
        .http
        .get(h.bridge.url())
        .header(SESSION_HEADER, "not-a-session")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 400);

    assert_eq!(h.bridge.session_count(), 0);
}

#[tokio::test]
async fn delete_ends_one_session_only() {
    let h = Harness::start().await;
    let s1 = h.open_session().await;
    let s2 = h.open_session().await;

    assert_eq!(h.delete(Some(&s1)).await, 204);
    assert_eq!(h.delete(Some(&s1)).await, 400);
    assert_eq!(h.delete(Some("unknown")).await, 400);
    assert_eq!(h.delete(None).await, 400);

    let reply = h
        .post(
            Some(&s1),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await;
    assert_eq!(reply.status, 400);

    let list = h.call(&s2, 2, "tools/list", json!({})).await;
    assert_eq!(tool_names(&list).len(), 2);
    assert_eq!(h.bridge.session_count(), 1);
}

#[tokio::test]
async fn error_policies_per_method() {
    let h = Harness::start().await;
    let s = h.open_session().await;

    let boom = h
        .call(&s, 1, "tools/call", json!({"name": "boom", "arguments": {}}))
        .await;
    assert_eq!(boom["result"]["isError"], true);
    assert_eq!(boom["result"]["content"][0]["text"], "tool exploded");

    let fail = h
        .call(&s, 2, "tools/call", json!({"name": "fail", "arguments": {}}))
        .await;
    assert_eq!(fail["result"]["isError"], true);

    let resources = h.call(&s, 3, "resources/list", json!({})).await;
    assert_eq!(resources["result"], json!({"resources": []}));
    let prompts = h.call(&s, 4, "prompts/list", json!({})).await;
    assert_eq!(prompts["result"], json!({"prompts": []}));

    let read = h
        .call(&s, 5, "resources/read", json!({"uri": "file:///missing"}))
        .await;
    assert_eq!(read["error"]["code"], -32002);

    let unknown = h.call(&s, 6, "sampling/createMessage", json!({})).await;
    assert_eq!(unknown["error"]["code"], -32601);

    let ping = h.call(&s, 7, "ping", json!({})).await;
    assert_eq!(ping["result"], json!({}));
}

#[tokio::test]
async fn malformed_posts_create_no_session() {
    let h = Harness::start().await;

    let reply = h.post_raw(None, "this is not json".to_string()).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["error"]["code"], -32700);
    assert_eq!(reply.body["id"], Value::Null);
    assert!(reply.session.is_none());

    let reply = h
        .post(None, json!([{"jsonrpc": "2.0", "id": 1, "method": "ping"}]))
        .await;
    assert_eq!(reply.body["error"]["code"], -32600);

    let reply = h.post(None, json!({"id": 1, "method": "ping"})).await;
    assert_eq!(reply.body["error"]["code"], -32600);

    assert_eq!(h.bridge.session_count(), 0);
}

#[tokio::test]
async fn client_notifications_are_accepted() {
    let h = Harness::start().await;
    let s = h.open_session().await;
    let reply = h
        .post(
            Some(&s),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
    assert_eq!(reply.status, 202);
    assert_eq!(reply.session.as_deref(), Some(s.as_str()));
}

#[tokio::test]
async fn event_stream_delivers_child_notifications() {
    let h = Harness::start().await;
    let s = h.open_session().await;

    let mut stream = h
        .http
        .get(h.bridge.url())
        .header(SESSION_HEADER, &s)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status().as_u16(), 200);
    assert!(
        stream.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    h.call(&s, 1, "tools/call", json!({"name": "notify", "arguments": {}}))
        .await;

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut text = String::new();
        while let Some(chunk) = stream.chunk().await.unwrap() {
            text.push_str(&String::from_utf8_lossy(&chunk));
            if text.contains("notifications/message") {
                break;
            }
        }
        text
    })
    .await
    .expect("no event received");
    assert!(received.contains("event: message"));

    // Deleting the session ends its stream
    assert_eq!(h.delete(Some(&s)).await, 204);
    let end = tokio::time::timeout(Duration::from_secs(5), async {
        while stream.chunk().await.unwrap().is_some() {}
    })
    .await;
    assert!(end.is_ok(), "stream did not end after DELETE");
}

#[tokio::test]
async fn bearer_token_is_enforced() {
    let mut cfg = config("normal");
    cfg.auth_token = Some("s3cret".to_string());
    let h = Harness::start_with(cfg).await;
    let body = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});

    let denied = h.http.post(h.bridge.url()).json(&body).send().await.unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let wrong = h
        .http
        .post(h.bridge.url())
        .bearer_auth("nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 401);
    assert_eq!(h.bridge.session_count(), 0);

    let allowed = h
        .http
        .post(h.bridge.url())
        .bearer_auth("s3cret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status().as_u16(), 200);
    assert_eq!(h.bridge.session_count(), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let h = Harness::start().await;
    h.open_session().await;

    let (first, second) = tokio::join!(h.bridge.shutdown(), h.bridge.shutdown());
    let mut outcomes = [first, second];
    outcomes.sort_by_key(|o| *o != ShutdownOutcome::Completed);
    assert_eq!(
        outcomes,
        [ShutdownOutcome::Completed, ShutdownOutcome::AlreadyInProgress]
    );
    assert_eq!(h.bridge.session_count(), 0);
    assert_eq!(h.bridge.shutdown().await, ShutdownOutcome::AlreadyInProgress);
    assert!(
        tokio::time::timeout(Duration::from_secs(1), h.bridge.child_exited())
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn stubborn_child_is_killed_when_grace_elapses() {
    let grace = Duration::from_millis(300);
    let mut cfg = config("stubborn");
    cfg.shutdown_grace = grace;
    let h = Harness::start_with(cfg).await;
    let session = h.open_session().await;
    let list = h.call(&session, 1, "tools/list", json!({})).await;
    assert_eq!(tool_names(&list).len(), 2);

    let started = std::time::Instant::now();
    assert_eq!(h.bridge.shutdown().await, ShutdownOutcome::GraceElapsed);
    // One grace period for everything, plus the bounded reap after the kill
    assert!(started.elapsed() < grace + KILL_REAP_TIMEOUT);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), h.bridge.child_exited())
            .await
            .is_ok()
    );
    assert_eq!(h.bridge.session_count(), 0);
}

#[tokio::test]
async fn unused_sessions_expire() {
    let mut cfg = config("normal");
    cfg.session_idle_timeout = Some(Duration::from_millis(200));
    let h = Harness::start_with(cfg).await;
    let stale = h.open_session().await;
    let fresh = h.open_session().await;

    for id in 1..=6 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.call(&fresh, id, "tools/list", json!({})).await;
    }

    let reply = h
        .post(
            Some(&stale),
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}),
        )
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(h.bridge.session_count(), 1);
    h.call(&fresh, 8, "tools/list", json!({})).await;
}

#[tokio::test]
async fn silent_child_fails_startup() {
    let mut cfg = config("silent");
    cfg.discovery_timeout = Duration::from_millis(300);
    match Bridge::start(&cfg).await {
        Err(BridgeError::Mcp(McpError::HandshakeTimeout { timeout_ms })) => {
            assert_eq!(timeout_ms, 300)
        }
        Err(other) => panic!("Expected HandshakeTimeout, got: {other:?}"),
        Ok(_) => panic!("Expected startup to fail"),
    }
}

#[tokio::test]
async fn child_without_tools_fails_startup() {
    let mut cfg = config("normal");
    cfg.child = cfg.child.with_env("MOCK_TOOLS", "[]");
    assert!(matches!(
        Bridge::start(&cfg).await,
        Err(BridgeError::Mcp(McpError::NoToolsDiscovered))
    ));
}
