/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! One WebRTC peer connection per remote peer, with its `file-transfer` channel.
//!
//! Callbacks do no work themselves: they forward [`LinkEvent`]s to the room task,
//! which owns every link.

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::channel::RtcChannel;
use crate::negotiator::Role;
use crate::registry::TransferRegistry;
use crate::transfer::InboundChannel;

pub const DATA_CHANNEL_LABEL: &str = "file-transfer";

pub(crate) enum LinkEvent {
    LocalCandidate { peer_id: String, candidate: Value },
    ChannelOpen { peer_id: String, dc: Arc<RTCDataChannel> },
    Message { peer_id: String, msg: DataChannelMessage },
    ChannelClosed { peer_id: String },
    Failed { peer_id: String },
}

pub(crate) struct PeerLink {
    pub peer_id: String,
    pc: Arc<RTCPeerConnection>,
    pub channel: Option<Arc<RtcChannel>>,
    pub inbound: InboundChannel,
    /// Held for the whole of one outgoing transfer; the receiver accepts one at a time.
    pub send_lock: Arc<tokio::sync::Mutex<()>>,
}

async fn new_peer_connection(ice_servers: Vec<RTCIceServer>) -> Result<Arc<RTCPeerConnection>> {
    let api = APIBuilder::new().build();
    let pc = api
        .new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await
        .context("new peer connection")?;
    Ok(Arc::new(pc))
}

fn wire_channel(peer_id: &str, dc: &Arc<RTCDataChannel>, events: &mpsc::UnboundedSender<LinkEvent>) {
    {
        let events = events.clone();
        let peer_id = peer_id.to_string();
        let dc2 = dc.clone();
        dc.on_open(Box::new(move || {
            let _ = events.send(LinkEvent::ChannelOpen { peer_id, dc: dc2 });
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        let peer_id = peer_id.to_string();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = events.send(LinkEvent::Message {
                peer_id: peer_id.clone(),
                msg,
            });
            Box::pin(async {})
        }));
    }
    {
        let events = events.clone();
        let peer_id = peer_id.to_string();
        dc.on_close(Box::new(move || {
            let _ = events.send(LinkEvent::ChannelClosed {
                peer_id: peer_id.clone(),
            });
            Box::pin(async {})
        }));
    }
}

impl PeerLink {
    /// Creates the peer connection and hooks its callbacks to `events`. An offerer
    /// also creates the data channel here, before the offer is generated.
    pub async fn open(
        peer_id: &str,
        role: Role,
        ice_servers: Vec<RTCIceServer>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Self> {
        let pc = new_peer_connection(ice_servers).await?;

        {
            let events = events.clone();
            let peer_id = peer_id.to_string();
            pc.on_ice_candidate(Box::new(move |cand| {
                let events = events.clone();
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    let Some(cand) = cand else { return };
                    match cand.to_json() {
                        Ok(init) => {
                            let candidate = serde_json::to_value(&init).unwrap_or(Value::Null);
                            let _ = events.send(LinkEvent::LocalCandidate { peer_id, candidate });
                        }
                        Err(e) => warn!(peer = %peer_id, "candidate to_json failed: {e:#}"),
                    }
                })
            }));
        }

        {
            let events = events.clone();
            let peer_id = peer_id.to_string();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!(peer = %peer_id, %state, "peer connection state");
                if state == RTCPeerConnectionState::Failed {
                    let _ = events.send(LinkEvent::Failed {
                        peer_id: peer_id.clone(),
                    });
                }
                Box::pin(async {})
            }));
        }

        match role {
            Role::Offerer => {
                let dc = pc
                    .create_data_channel(DATA_CHANNEL_LABEL, None)
                    .await
                    .map_err(|e| anyhow!("create datachannel failed: {e:#}"))?;
                wire_channel(peer_id, &dc, &events);
            }
            Role::Answerer => {
                let events = events.clone();
                let peer_id = peer_id.to_string();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    if dc.label() == DATA_CHANNEL_LABEL {
                        wire_channel(&peer_id, &dc, &events);
                    } else {
                        warn!(peer = %peer_id, label = %dc.label(), "unexpected data channel ignored");
                    }
                    Box::pin(async {})
                }));
            }
        }

        Ok(Self {
            peer_id: peer_id.to_string(),
            pc,
            channel: None,
            inbound: InboundChannel::new(peer_id),
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Offer path: generate an offer and make it the local description.
    pub async fn create_offer(&self) -> Result<Value> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| anyhow!("create_offer failed: {e:#}"))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| anyhow!("set_local_description failed: {e:#}"))?;
        Ok(serde_json::to_value(&offer)?)
    }

    /// Answer path: apply the remote offer, then generate and apply our answer.
    pub async fn accept_offer(&self, offer: Value) -> Result<Value> {
        let offer: RTCSessionDescription = serde_json::from_value(offer).context("parse offer")?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| anyhow!("set_remote_description failed: {e:#}"))?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| anyhow!("create_answer failed: {e:#}"))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| anyhow!("set_local_description failed: {e:#}"))?;
        Ok(serde_json::to_value(&answer)?)
    }

    pub async fn apply_answer(&self, answer: Value) -> Result<()> {
        let answer: RTCSessionDescription = serde_json::from_value(answer).context("parse answer")?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| anyhow!("set_remote_description failed: {e:#}"))
    }

    pub async fn add_candidate(&self, candidate: Value) -> Result<()> {
        let candidate: RTCIceCandidateInit =
            serde_json::from_value(candidate).context("parse candidate")?;
        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| anyhow!("add_ice_candidate failed: {e:#}"))
    }

    /// Channel is usable for sending.
    pub fn ready_channel(&self) -> Option<Arc<RtcChannel>> {
        use crate::channel::DataChannel;
        self.channel.as_ref().filter(|c| c.is_open()).cloned()
    }

    /// Closes the connection and fails every unfinished session with this peer.
    pub async fn close(mut self, registry: &TransferRegistry) {
        self.inbound.abandon(registry);
        let failed = registry.fail_peer(&self.peer_id);
        if let Err(e) = self.pc.close().await {
            debug!(peer = %self.peer_id, "peer connection close: {e:#}");
        }
        info!(peer = %self.peer_id, failed, "peer link closed");
    }
}
