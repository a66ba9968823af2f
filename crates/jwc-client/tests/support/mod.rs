//! Test fixtures: a mock audio node serving the REST surface and the
//! `/v4/websocket` event socket, recording every request it sees.

// not every test binary exercises every helper
#![allow(dead_code)]

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum ServerFrame {
    Text(String),
    Close(u16),
}

struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    frames: broadcast::Sender<ServerFrame>,
    connections: AtomicUsize,
    auto_ready: Mutex<Option<String>>,
}

/// One fake audio node on an ephemeral port.
pub struct MockNode {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockNode {
    pub async fn start() -> Self {
        let (frames, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            requests: Mutex::new(Vec::new()),
            frames,
            connections: AtomicUsize::new(0),
            auto_ready: Mutex::new(None),
        });

        let app = Router::new()
            .route("/v4/websocket", any(ws_handler))
            .fallback(rest_handler)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, server }
    }

    /// Sends a `ready` frame automatically on every socket connect, the way
    /// a real node completes its handshake.
    pub fn auto_ready(&self, session_id: &str) {
        *self.state.auto_ready.lock().unwrap() = Some(session_id.to_string());
    }

    pub fn send_frame(&self, frame: Value) {
        let _ = self.state.frames.send(ServerFrame::Text(frame.to_string()));
    }

    /// Closes every live socket from the server side with `code`.
    pub fn close_sockets(&self, code: u16) {
        let _ = self.state.frames.send(ServerFrame::Close(code));
    }

    /// Stops listening and closes live sockets; subsequent reconnects get
    /// connection-refused.
    pub fn shutdown(&self, close_code: u16) {
        let _ = self.state.frames.send(ServerFrame::Close(close_code));
        self.server.abort();
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, method: &str, path_prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(path_prefix))
            .collect()
    }

    /// Polls until a matching request shows up.
    pub async fn wait_for_request(
        &self,
        method: &str,
        path_prefix: &str,
        timeout: Duration,
    ) -> RecordedRequest {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(request) = self.requests_matching(method, path_prefix).into_iter().next()
            {
                return request;
            }
            if Instant::now() > deadline {
                panic!("no {method} {path_prefix} request within {timeout:?}; saw {:#?}", self.requests());
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

async fn ws_handler(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_ws(socket, state))
}

async fn serve_ws(mut socket: WebSocket, state: Arc<MockState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);

    let ready = state.auto_ready.lock().unwrap().clone();
    if let Some(session_id) = ready {
        let frame = json!({"op": "ready", "resumed": false, "sessionId": session_id});
        if socket
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    let mut frames = state.frames.subscribe();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(ServerFrame::Text(text)) => {
                    if socket.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(ServerFrame::Close(code)) => {
                    let _ = socket
                        .send(WsMessage::Close(Some(CloseFrame { code, reason: "".into() })))
                        .await;
                    break;
                }
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

async fn rest_handler(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let authorization = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let body: Option<Value> = serde_json::from_slice(&bytes).ok();

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query,
        authorization,
        body: body.clone(),
        at: Instant::now(),
    });

    if path == "/v4/info" {
        return json_response(200, info_body());
    }
    if path == "/v4/loadtracks" {
        return json_response(200, json!({"loadType": "empty"}));
    }
    if path.starts_with("/v4/sessions/") {
        let guild_id = path.rsplit('/').next().unwrap_or("0").to_string();
        return match method.as_str() {
            "DELETE" => empty_response(204),
            "PATCH" => json_response(200, player_body(&guild_id, body.as_ref())),
            "GET" => json_response(
                404,
                json!({
                    "timestamp": 0,
                    "status": 404,
                    "error": "Not Found",
                    "message": "Player not found",
                    "path": path,
                }),
            ),
            _ => empty_response(405),
        };
    }
    empty_response(404)
}

fn player_body(guild_id: &str, update: Option<&Value>) -> Value {
    let field = |name: &str, fallback: Value| -> Value {
        update
            .and_then(|u| u.get(name))
            .cloned()
            .unwrap_or(fallback)
    };
    let mut player = json!({
        "guildId": guild_id,
        "track": null,
        "volume": field("volume", json!(100)),
        "paused": field("paused", json!(false)),
        "state": {"time": 0, "position": 0, "connected": false, "ping": -1},
        "voice": field("voice", json!({"token": "", "endpoint": "", "sessionId": ""})),
    });
    if let Some(filters) = update.and_then(|u| u.get("filters")) {
        player["filters"] = filters.clone();
    }
    player
}

fn info_body() -> Value {
    json!({
        "version": {"semver": "4.0.0", "major": 4, "minor": 0, "patch": 0},
        "buildTime": 0,
        "git": {"branch": "master", "commit": "0000000", "commitTime": 0},
        "jvm": "18.0.2.1",
        "lavaplayer": "1.3.98",
        "sourceManagers": ["youtube"],
        "filters": ["volume"],
        "plugins": [],
    })
}

fn json_response(status: u16, body: Value) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn empty_response(status: u16) -> Response {
    Response::builder()
        .status(status)
        .body(axum::body::Body::empty())
        .unwrap()
}

// ----------------------------------------------------------------------
// Client-side helpers
// ----------------------------------------------------------------------

use jwc_client::client::{Member, VoiceGateway};
use jwc_client::config::NodeConfig;
use jwc_client::events::NodeEvent;
use jwc_client::region::RegionGroup;
use std::sync::atomic::AtomicBool;

// "123456789" base64-encoded, plus two stub segments
pub const TOKEN: &str = "MTIzNDU2Nzg5.stub.token";

/// Gateway stub with a switchable in-channel answer.
pub struct TestGateway {
    pub in_channel: AtomicBool,
    pub connects: Mutex<Vec<(u64, u64)>>,
    pub disconnects: Mutex<Vec<u64>>,
}

impl TestGateway {
    pub fn new(in_channel: bool) -> Arc<Self> {
        Arc::new(Self {
            in_channel: AtomicBool::new(in_channel),
            connects: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
        })
    }
}

impl VoiceGateway for TestGateway {
    fn in_audio_channel(&self, _member: &Member) -> bool {
        self.in_channel.load(Ordering::SeqCst)
    }

    fn connect(&self, guild_id: u64, channel_id: u64) {
        self.connects.lock().unwrap().push((guild_id, channel_id));
    }

    fn disconnect(&self, guild_id: u64) {
        self.disconnects.lock().unwrap().push(guild_id);
    }
}

pub fn node_config(mock: &MockNode, name: &str, pool: &str) -> NodeConfig {
    NodeConfig::builder()
        .name(name)
        .host("127.0.0.1")
        .port(mock.addr.port())
        .password("youshallnotpass")
        .pool(pool)
        .region_group(RegionGroup::Europe)
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Blocks until the named node reports ready on the client event stream.
pub async fn wait_for_ready(
    events: &mut tokio::sync::broadcast::Receiver<NodeEvent>,
    node_name: &str,
) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(NodeEvent::Ready { node, session_id, .. }) if node == node_name => {
                    return session_id;
                }
                Ok(_) => {}
                Err(error) => panic!("event stream ended early: {error}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("node {node_name} did not become ready within {deadline:?}"))
}

/// Blocks until the named node reports a disconnect.
pub async fn wait_for_disconnect(
    events: &mut tokio::sync::broadcast::Receiver<NodeEvent>,
    node_name: &str,
) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match events.recv().await {
                Ok(NodeEvent::Disconnected { node }) if node == node_name => return,
                Ok(_) => {}
                Err(error) => panic!("event stream ended early: {error}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("node {node_name} did not disconnect within {deadline:?}"))
}
