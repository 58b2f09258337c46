/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! WebSocket client for the signaling relay.

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, Stream, StreamExt};
use roomdrop_protocol::{ClientEvent, ServerEvent, Signal};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Outbound half. Cloning is cheap; sends never block.
#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl RelaySender {
    pub fn send(&self, event: ClientEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("relay connection closed"))
    }

    pub fn join(&self, room: &str, name: &str, public_key: Option<String>) -> Result<()> {
        self.send(ClientEvent::JoinRoom {
            room: room.to_string(),
            name: name.to_string(),
            public_key,
        })
    }

    pub fn signal(&self, target: &str, signal: Signal) -> Result<()> {
        self.send(signal.addressed_to(target.to_string()))
    }
}

pub struct RelayConnection {
    /// Id the relay assigned to this connection.
    pub local_id: String,
    pub sender: RelaySender,
    /// Every event after `connected`. Ends when the socket closes.
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

async fn await_greeting<S>(ws_rx: &mut S) -> Result<String>
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg? {
            tungstenite::Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::Connected { id }) => return Ok(id),
                Ok(other) => debug!(?other, "event before greeting ignored"),
                Err(e) => warn!("bad relay frame: {e}"),
            },
            tungstenite::Message::Close(_) => break,
            _ => {}
        }
    }
    bail!("relay closed before greeting")
}

/// Connects and waits for the relay's `connected` greeting.
pub async fn connect(url: &str) -> Result<RelayConnection> {
    info!(%url, "connecting to relay");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("connect {url}"))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let local_id = tokio::time::timeout(HELLO_TIMEOUT, await_greeting(&mut ws_rx))
        .await
        .context("timed out waiting for relay greeting")??;
    info!(id = %local_id, "relay connected");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;
        loop {
            tokio::select! {
                out = out_rx.recv() => {
                    let Some(event) = out else {
                        let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                        break;
                    };
                    let json = match serde_json::to_string(&event) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("encode relay event: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(tungstenite::Message::Text(json)).await {
                        warn!("relay send failed: {e}");
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(tungstenite::Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    let Some(msg) = msg else { break };
                    let msg = match msg {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("relay read failed: {e}");
                            break;
                        }
                    };
                    match msg {
                        tungstenite::Message::Text(text) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    if in_tx.send(event).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("bad relay frame: {e}"),
                            }
                        }
                        tungstenite::Message::Ping(p) => {
                            let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        }
                        tungstenite::Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }
        info!("relay connection closed");
    });

    Ok(RelayConnection {
        local_id,
        sender: RelaySender { tx: out_tx },
        events: in_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomdrop_protocol::{RoomMember, SignalKind};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn fake_relay() -> (String, tokio::task::JoinHandle<Vec<ClientEvent>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let hello = serde_json::to_string(&ServerEvent::Connected { id: "abc".into() }).unwrap();
            ws.send(tungstenite::Message::Text(hello)).await.unwrap();

            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let tungstenite::Message::Text(text) = msg else { continue };
                let event: ClientEvent = serde_json::from_str(&text).unwrap();
                if let ClientEvent::JoinRoom { room, name, .. } = &event {
                    let roster = ServerEvent::RoomUsers(vec![RoomMember {
                        id: "abc".into(),
                        name: name.clone(),
                        public_key: None,
                    }]);
                    assert_eq!(room, "abc12");
                    ws.send(tungstenite::Message::Text(serde_json::to_string(&roster).unwrap()))
                        .await
                        .unwrap();
                }
                received.push(event);
                if received.len() == 2 {
                    break;
                }
            }
            received
        });
        (url, handle)
    }

    #[tokio::test]
    async fn greets_joins_and_signals() {
        let (url, server) = fake_relay().await;
        let mut conn = connect(&url).await.unwrap();
        assert_eq!(conn.local_id, "abc");

        conn.sender.join("abc12", "Alice", None).unwrap();
        match conn.events.recv().await.unwrap() {
            ServerEvent::RoomUsers(members) => assert_eq!(members[0].name, "Alice"),
            other => panic!("unexpected {other:?}"),
        }

        conn.sender
            .signal("xyz", Signal::new(SignalKind::Offer, json!({"sdp": "v=0"})))
            .unwrap();
        let received = server.await.unwrap();
        assert_eq!(
            received[1],
            ClientEvent::Offer {
                target: "xyz".into(),
                offer: json!({"sdp": "v=0"}),
            }
        );
    }

    #[tokio::test]
    async fn connect_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(connect(&format!("ws://{addr}")).await.is_err());
    }
}
