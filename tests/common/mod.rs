// In-process backend: the REST permission endpoints plus the event socket

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use permsync::cache::CachedPermissionSource;
use permsync::config::ApiConfig;
use permsync::api::HttpPermissionsApi;
use permsync::sync::policy::RecordingPolicy;
use permsync::transport::backoff::ReconnectPolicy;
use permsync::transport::TransportOptions;
use permsync::PermissionSyncManager;

enum Control {
    Text(String),
    Close(u16),
}

#[derive(Default)]
struct Backend {
    /// token -> `data` payload of the permissions endpoint
    users: Mutex<HashMap<String, Value>>,
    rest_calls: AtomicUsize,
    ws_connects: AtomicUsize,
    pings: AtomicUsize,
    sockets: Mutex<Vec<mpsc::UnboundedSender<Control>>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub ws_url: String,
    backend: Arc<Backend>,
}

pub fn permission(id: i64, codename: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Can {}", codename.replace('_', " ")),
        "codename": codename,
        "content_type": {"app_label": "properties", "model": "property"}
    })
}

pub fn permission_list(codenames: &[&str]) -> Value {
    Value::Array(
        codenames
            .iter()
            .enumerate()
            .map(|(i, c)| permission(i as i64 + 1, c))
            .collect(),
    )
}

/// Route library logs through the test harness; `RUST_LOG=permsync=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        init_tracing();
        let backend = Arc::new(Backend::default());
        let app = Router::new()
            .route("/api/users/me/permissions/", get(me_permissions))
            .route("/api/groups/:id/permissions/", get(group_permissions))
            .route("/ws/permissions/", get(ws_permissions))
            .with_state(Arc::clone(&backend));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{}", addr),
            ws_url: format!("ws://{}/ws/permissions/", addr),
            backend,
        })
    }

    /// Register `token` with the given codenames and groups
    pub fn set_user(&self, token: &str, codenames: &[&str], groups: Value) {
        self.backend.users.lock().insert(
            token.to_string(),
            json!({"direct_permissions": permission_list(codenames), "groups": groups}),
        );
    }

    /// Send a text message to every open socket
    pub fn push(&self, message: Value) {
        let text = message.to_string();
        for socket in self.backend.sockets.lock().iter() {
            let _ = socket.send(Control::Text(text.clone()));
        }
    }

    pub fn close_sockets(&self, code: u16) {
        for socket in self.backend.sockets.lock().drain(..) {
            let _ = socket.send(Control::Close(code));
        }
    }

    pub fn live_sockets(&self) -> usize {
        self.backend.sockets.lock().iter().filter(|s| !s.is_closed()).count()
    }

    pub fn rest_calls(&self) -> usize {
        self.backend.rest_calls.load(Ordering::SeqCst)
    }

    pub fn ws_connects(&self) -> usize {
        self.backend.ws_connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.backend.pings.load(Ordering::SeqCst)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.base_url.clone(),
            permissions_path: "/api/users/me/permissions/".to_string(),
            group_permissions_path: "/api/groups/{id}/permissions/".to_string(),
            request_timeout_secs: 5,
        }
    }

    /// Short timers so reconnects and heartbeats happen within a test
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            url: self.ws_url.clone(),
            heartbeat_interval: Duration::from_millis(100),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(400),
                max_attempts: 5,
            },
            auth_rejected_code: 4001,
        }
    }

    pub fn manager(&self, policy: Arc<RecordingPolicy>) -> Result<PermissionSyncManager> {
        let api = Arc::new(HttpPermissionsApi::new(&self.api_config())?);
        let source = Arc::new(CachedPermissionSource::new(api, Duration::from_secs(300)));
        Ok(PermissionSyncManager::builder(source)
            .transport_options(self.transport_options())
            .refresh_debounce(Duration::from_millis(200))
            .failure_policy(policy)
            .build())
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": true, "message": "Invalid token", "code": "TOKEN_INVALID"})),
    )
}

async fn me_permissions(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.rest_calls.fetch_add(1, Ordering::SeqCst);
    let data = bearer(&headers).and_then(|token| backend.users.lock().get(&token).cloned());
    match data {
        Some(data) => (StatusCode::OK, Json(json!({"error": false, "data": data}))),
        None => unauthorized(),
    }
}

async fn group_permissions(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let known = bearer(&headers).is_some_and(|token| backend.users.lock().contains_key(&token));
    if !known {
        return unauthorized();
    }
    match id {
        1 => (
            StatusCode::OK,
            Json(json!({"error": false, "data": {"permissions": permission_list(&["view_property", "view_owner"])}})),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": true, "message": "Group not found"})),
        ),
    }
}

async fn ws_permissions(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(backend): State<Arc<Backend>>,
) -> Response {
    let token = params.get("token").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| socket_session(socket, token, backend))
}

async fn socket_session(mut socket: WebSocket, token: String, backend: Arc<Backend>) {
    backend.ws_connects.fetch_add(1, Ordering::SeqCst);

    let known = backend.users.lock().contains_key(&token);
    if !known {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 4001,
                reason: "Invalid token".into(),
            })))
            .await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    backend.sockets.lock().push(tx);

    let hello = json!({"type": "connection_success", "message": "Connected", "user_id": 1});
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            control = rx.recv() => match control {
                Some(Control::Text(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Control::Close(code)) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame { code, reason: "".into() })))
                        .await;
                    break;
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let is_ping = serde_json::from_str::<Value>(&text)
                        .map(|v| v["type"] == "ping")
                        .unwrap_or(false);
                    if is_ping {
                        backend.pings.fetch_add(1, Ordering::SeqCst);
                        let pong = json!({"type": "pong"});
                        let _ = socket.send(Message::Text(pong.to_string())).await;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}
