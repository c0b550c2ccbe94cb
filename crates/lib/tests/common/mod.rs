//! In-process realtime chat server for integration tests.
//!
//! Speaks just enough of the protocol: handshake, ping/pong, `login`, a few methods,
//! `sub`/`unsub` on room streams, and pushed `changed` frames. Tests can push room
//! messages or raw frames, refuse the handshake, and force-close every open socket.

#![allow(dead_code)]

use async_trait::async_trait;
use chatbridge::channels::{ApiError, ChatApi, Session};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A room the server refuses to subscribe.
pub const FORBIDDEN_ROOM: &str = "forbidden";

enum Ctl {
    Push { room: String, frame: String },
    Raw(String),
    Close,
}

#[derive(Default)]
struct ServerState {
    conns: Vec<mpsc::UnboundedSender<Ctl>>,
    connections: usize,
    logins: usize,
    reject_logins: bool,
    fail_handshake: bool,
    /// Every frame received from clients, in arrival order.
    frames: Vec<Value>,
    subscribe_requests: Vec<String>,
    methods: Vec<(String, Value)>,
}

pub struct MockServer {
    pub url: String,
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let port = listener.local_addr().expect("local_addr").port();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_conn(stream, accept_state.clone()));
            }
        });
        Self {
            url: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }

    pub fn subscribe_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribe_requests.clone()
    }

    /// Calls received for `method`, as their params.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .methods
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn set_reject_logins(&self, reject: bool) {
        self.state.lock().unwrap().reject_logins = reject;
    }

    /// Answer `connect` with `failed` instead of `connected`.
    pub fn set_fail_handshake(&self, fail: bool) {
        self.state.lock().unwrap().fail_handshake = fail;
    }

    /// Frames received from clients whose `msg` is `kind`.
    pub fn frames(&self, kind: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .frames
            .iter()
            .filter(|f| f.get("msg").and_then(Value::as_str) == Some(kind))
            .cloned()
            .collect()
    }

    /// Send `text` verbatim to every open connection.
    pub fn push_raw(&self, text: &str) {
        let s = self.state.lock().unwrap();
        for c in &s.conns {
            let _ = c.send(Ctl::Raw(text.to_string()));
        }
    }

    /// Close every open socket from the server side.
    pub fn drop_connections(&self) {
        let mut s = self.state.lock().unwrap();
        for c in s.conns.drain(..) {
            let _ = c.send(Ctl::Close);
        }
    }

    /// Push a new message to every connection subscribed to `room`.
    pub fn push_message(&self, room: &str, message_id: &str, sender: &str, body: &str) {
        self.push_payload(
            room,
            json!({
                "_id": message_id,
                "rid": room,
                "msg": body,
                "u": { "_id": format!("id-{}", sender), "username": sender }
            }),
        );
    }

    pub fn push_payload(&self, room: &str, payload: Value) {
        let frame = json!({
            "msg": "changed",
            "collection": "stream-room-messages",
            "id": "id",
            "fields": { "eventName": room, "args": [payload] }
        })
        .to_string();
        let s = self.state.lock().unwrap();
        for c in &s.conns {
            let _ = c.send(Ctl::Push {
                room: room.to_string(),
                frame: frame.clone(),
            });
        }
    }
}

async fn serve_conn(stream: TcpStream, state: Arc<Mutex<ServerState>>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let mut s = state.lock().unwrap();
        s.conns.push(tx);
        s.connections += 1;
    }
    // subscription id -> room
    let mut subs: HashMap<String, String> = HashMap::new();
    loop {
        tokio::select! {
            ctl = rx.recv() => match ctl {
                Some(Ctl::Push { room, frame }) => {
                    if subs.values().any(|r| *r == room) {
                        let _ = ws.send(Message::Text(frame)).await;
                    }
                }
                Some(Ctl::Raw(text)) => {
                    let _ = ws.send(Message::Text(text)).await;
                }
                Some(Ctl::Close) | None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                    state.lock().unwrap().frames.push(frame.clone());
                    for reply in respond(&frame, &mut subs, &state) {
                        if ws.send(Message::Text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn respond(frame: &Value, subs: &mut HashMap<String, String>, state: &Mutex<ServerState>) -> Vec<Value> {
    let id = frame.get("id").cloned().unwrap_or(Value::Null);
    match frame.get("msg").and_then(Value::as_str) {
        Some("connect") if state.lock().unwrap().fail_handshake => {
            vec![json!({ "msg": "failed", "version": "1" })]
        }
        Some("connect") => vec![json!({ "msg": "connected", "session": "s1" })],
        Some("ping") => {
            let mut pong = json!({ "msg": "pong" });
            if !id.is_null() {
                pong["id"] = id;
            }
            vec![pong]
        }
        Some("method") => {
            let method = frame.get("method").and_then(Value::as_str).unwrap_or("");
            let params = frame.get("params").cloned().unwrap_or(Value::Null);
            let mut s = state.lock().unwrap();
            s.methods.push((method.to_string(), params.clone()));
            match method {
                "login" if s.reject_logins => vec![json!({
                    "msg": "result", "id": id,
                    "error": { "error": 403, "reason": "User not found" }
                })],
                "login" => {
                    s.logins += 1;
                    vec![json!({ "msg": "result", "id": id, "result": { "id": "u1", "token": "t1" } })]
                }
                "echo" => vec![json!({ "msg": "result", "id": id, "result": params })],
                // Succeeds only for rooms this socket is subscribed to.
                "room.history" => {
                    let room = params.get(0).and_then(Value::as_str).unwrap_or("");
                    if subs.values().any(|r| r == room) {
                        vec![json!({ "msg": "result", "id": id, "result": [] })]
                    } else {
                        vec![json!({ "msg": "result", "id": id, "error": { "reason": "not subscribed" } })]
                    }
                }
                "hang" => Vec::new(),
                _ => vec![json!({ "msg": "result", "id": id })],
            }
        }
        Some("sub") => {
            let room = frame
                .pointer("/params/0")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            state.lock().unwrap().subscribe_requests.push(room.clone());
            if room == FORBIDDEN_ROOM {
                return vec![json!({ "msg": "nosub", "id": id, "error": { "reason": "forbidden" } })];
            }
            let sub_id = id.as_str().unwrap_or("").to_string();
            subs.insert(sub_id.clone(), room);
            vec![json!({ "msg": "ready", "subs": [sub_id] })]
        }
        Some("unsub") => {
            if let Some(sub_id) = id.as_str() {
                subs.remove(sub_id);
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// In-memory REST collaborator.
#[derive(Default)]
pub struct MockApi {
    pub sent: Mutex<Vec<(String, String, String, Option<String>)>>,
    pub direct_rooms: Vec<String>,
}

#[async_trait]
impl ChatApi for MockApi {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        if password.is_empty() {
            return Err(ApiError::Api("empty password".to_string()));
        }
        Ok(Session {
            user_id: format!("id-{}", username),
            token: "t1".to_string(),
        })
    }

    async fn send_message(
        &self,
        session: &Session,
        room_id: &str,
        text: &str,
        thread_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((
            session.user_id.clone(),
            room_id.to_string(),
            text.to_string(),
            thread_id.map(str::to_string),
        ));
        Ok(format!("msg-{}", sent.len()))
    }

    async fn list_existing_rooms(&self, _session: &Session) -> Result<Vec<String>, ApiError> {
        Ok(self.direct_rooms.clone())
    }

    async fn lookup_group(&self, _session: &Session, name: &str) -> Result<String, ApiError> {
        Ok(format!("room-{}", name))
    }
}

pub fn fast_options() -> chatbridge::realtime::ConnectionOptions {
    chatbridge::realtime::ConnectionOptions {
        keepalive: Duration::from_secs(10),
        reconnect_min: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        max_auth_failures: None,
    }
}

/// Poll `check` until it holds or 5s pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
