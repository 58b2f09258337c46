/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use rand::{distributions::Alphanumeric, Rng};
use roomdrop_protocol::{ClientEvent, ServerEvent, Signal};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, info_span, warn};

use crate::directory::RoomDirectory;
use crate::{AllowedOrigins, RelayConfig};

const PEER_ID_LEN: usize = 20;

#[derive(Clone)]
pub(crate) struct AppState {
    pub relay: Arc<Relay>,
    pub cfg: Arc<RelayConfig>,
}

/// Room membership plus one outbound queue per live connection.
///
/// Every handler takes the lock, mutates, enqueues and returns; nothing awaits while
/// holding it, so a slow socket never stalls another connection.
pub(crate) struct Relay {
    inner: Mutex<RelayInner>,
    outbound_queue: usize,
}

#[derive(Default)]
struct RelayInner {
    directory: RoomDirectory,
    connections: HashMap<String, mpsc::Sender<ServerEvent>>,
}

fn new_peer_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PEER_ID_LEN)
        .map(char::from)
        .collect()
}

impl Relay {
    pub fn new(outbound_queue: usize) -> Self {
        Self {
            inner: Mutex::new(RelayInner::default()),
            outbound_queue: outbound_queue.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocates an id for a new connection. The returned queue already holds the
    /// `connected` announcement.
    pub fn connect(&self) -> (String, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        let mut inner = self.lock();
        let id = loop {
            let id = new_peer_id();
            if !inner.connections.contains_key(&id) {
                break id;
            }
        };
        let _ = tx.try_send(ServerEvent::Connected { id: id.clone() });
        inner.connections.insert(id.clone(), tx);
        (id, rx)
    }

    pub fn join(&self, peer_id: &str, room: &str, name: &str, public_key: Option<String>) {
        let mut inner = self.lock();
        if let Some(previous) = inner.directory.join(peer_id, room, name, public_key) {
            info!(peer = %peer_id, from = %previous, to = %room, "peer switched room");
            inner.broadcast_room(&previous);
        }
        info!(peer = %peer_id, %room, %name, "peer joined room");
        inner.broadcast_room(room);
    }

    /// Delivers `signal` from `sender` to `target`. A target that is not connected is a
    /// silent miss; the sender is never told.
    pub fn forward(&self, sender: &str, target: &str, signal: Signal) -> bool {
        let inner = self.lock();
        let kind = signal.kind;
        if !inner.connections.contains_key(target) {
            debug!(%sender, %target, ?kind, "forward target not connected, dropped");
            return false;
        }
        inner.deliver(target, signal.relayed_from(sender.to_string())) == Delivery::Sent
    }

    pub fn disconnect(&self, peer_id: &str) {
        let mut inner = self.lock();
        inner.connections.remove(peer_id);
        if let Some(room) = inner.directory.leave(peer_id) {
            info!(peer = %peer_id, %room, "peer left room");
            inner.broadcast_room(&room);
        }
    }

    pub fn stats(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.directory.room_count(), inner.connections.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Full,
    Gone,
}

impl RelayInner {
    /// Sends the room snapshot to every member. A member whose queue cannot take it
    /// is cut loose: its queue closes and the writer ends the socket, since a client
    /// that misses a roster never learns about that change.
    fn broadcast_room(&mut self, room: &str) {
        let members = self.directory.members(room);
        for member in &members {
            if self.deliver(&member.id, ServerEvent::RoomUsers(members.clone())) == Delivery::Full {
                warn!(peer = %member.id, %room, "roster undeliverable, closing lagging connection");
                self.connections.remove(&member.id);
            }
        }
    }

    fn deliver(&self, peer_id: &str, event: ServerEvent) -> Delivery {
        let Some(tx) = self.connections.get(peer_id) else {
            return Delivery::Gone;
        };
        match tx.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(peer = %peer_id, "outbound queue full, message dropped");
                Delivery::Full
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer = %peer_id, "connection closing, message dropped");
                Delivery::Gone
            }
        }
    }
}

pub(crate) fn router(state: AppState) -> Router {
    let cors = match &state.cfg.allowed_origins {
        AllowedOrigins::Any => CorsLayer::new().allow_origin(Any),
        AllowedOrigins::List(list) => CorsLayer::new().allow_origin(AllowOrigin::list(
            list.iter().filter_map(|o| HeaderValue::from_str(o).ok()),
        )),
    }
    .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/stats", get(stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
            info_span!("http", method = %req.method(), uri = %req.uri())
        }))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let (rooms, peers) = state.relay.stats();
    Json(serde_json::json!({ "rooms": rooms, "peers": peers }))
}

async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.cfg.allowed_origins.admits(origin) {
        warn!(%remote, ?origin, "websocket rejected: origin not allowed");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(state.relay, remote, socket))
}

async fn handle_socket(relay: Arc<Relay>, remote: SocketAddr, socket: WebSocket) {
    let (peer_id, mut outbound) = relay.connect();
    info!(peer = %peer_id, %remote, "connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer_peer = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(e) => {
                    warn!(peer = %writer_peer, "serialize event failed: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
        // Queue dropped by the relay: the peer fell too far behind.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_text(&relay, &peer_id, &text),
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => warn!(peer = %peer_id, "binary frame ignored"),
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer_id, "read failed: {e}");
                break;
            }
        }
    }

    relay.disconnect(&peer_id);
    writer.abort();
    info!(peer = %peer_id, "connection closed");
}

fn handle_text(relay: &Relay, peer_id: &str, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(peer = %peer_id, "malformed event ignored: {e}");
            return;
        }
    };
    match event {
        ClientEvent::JoinRoom { room, name, public_key } => {
            relay.join(peer_id, &room, &name, public_key);
        }
        other => {
            if let Some((target, signal)) = other.into_signal() {
                relay.forward(peer_id, &target, signal);
            }
        }
    }
}
