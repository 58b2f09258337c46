/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Room membership and the task that owns every peer link of one client.
//!
//! Relay events, peer connection callbacks and API commands are all funnelled into
//! one task, so links and the negotiator are never touched concurrently.

use anyhow::{anyhow, Context, Result};
use roomdrop_protocol::{RoomMember, ServerEvent, Signal, SignalKind};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::channel::RtcChannel;
use crate::config::{ClientConfig, TransferTuning};
use crate::negotiator::{Negotiator, Role, Step};
use crate::peer_link::{LinkEvent, PeerLink};
use crate::registry::{TransferId, TransferRegistry};
use crate::signaling::{self, RelaySender};
use crate::transfer::{fallback_peer_name, save_artifact, send_file, OutgoingFile};

enum Command {
    SendFile {
        file: OutgoingFile,
        reply: oneshot::Sender<Vec<TransferId>>,
    },
    OpenPeers {
        reply: oneshot::Sender<Vec<RoomMember>>,
    },
    Leave,
}

/// A joined room. Dropping the handle leaves the room.
pub struct RoomHandle {
    local_id: String,
    registry: TransferRegistry,
    roster: watch::Receiver<Vec<RoomMember>>,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl RoomHandle {
    /// Connects to the relay from `cfg`, joins `room` as `name` and starts
    /// negotiating with everyone already there.
    pub async fn join(cfg: &ClientConfig, room: &str, name: &str) -> Result<Self> {
        Self::join_with_key(cfg, room, name, None).await
    }

    pub async fn join_with_key(
        cfg: &ClientConfig,
        room: &str,
        name: &str,
        public_key: Option<String>,
    ) -> Result<Self> {
        let conn = signaling::connect(&cfg.relay_url()).await?;
        conn.sender
            .join(room, name, public_key)
            .context("send join-room")?;
        info!(room = %room, name = %name, id = %conn.local_id, "joined room");

        let registry = TransferRegistry::new();
        let (roster_tx, roster) = watch::channel(Vec::new());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let actor = RoomActor {
            relay: conn.sender,
            negotiator: Negotiator::new(conn.local_id.clone()),
            links: HashMap::new(),
            roster: roster_tx,
            registry: registry.clone(),
            tuning: cfg.tuning(),
            ice_servers: cfg.ice_servers(),
            download_dir: cfg.download_dir.clone(),
            link_tx,
        };
        let task = tokio::spawn(actor.run(conn.events, link_rx, command_rx));

        Ok(Self {
            local_id: conn.local_id,
            registry,
            roster,
            commands,
            task: Some(task),
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Latest `room-users` snapshot, including ourselves.
    pub fn roster(&self) -> watch::Receiver<Vec<RoomMember>> {
        self.roster.clone()
    }

    /// Starts one upload per peer with an open channel. Returns their session ids;
    /// empty if nobody is connected yet.
    pub async fn send_file(&self, file: OutgoingFile) -> Result<Vec<TransferId>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SendFile { file, reply })
            .map_err(|_| anyhow!("room closed"))?;
        rx.await.map_err(|_| anyhow!("room closed"))
    }

    /// Members we currently hold an open data channel with.
    pub async fn open_peers(&self) -> Result<Vec<RoomMember>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::OpenPeers { reply })
            .map_err(|_| anyhow!("room closed"))?;
        rx.await.map_err(|_| anyhow!("room closed"))
    }

    /// Closes every link and the relay connection.
    pub async fn leave(mut self) -> Result<()> {
        let _ = self.commands.send(Command::Leave);
        if let Some(task) = self.task.take() {
            task.await.context("room task")?;
        }
        Ok(())
    }
}

impl Drop for RoomHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Leave);
    }
}

fn display_name(roster: &[RoomMember], peer_id: &str) -> String {
    roster
        .iter()
        .find(|m| m.id == peer_id)
        .map(|m| m.name.clone())
        .unwrap_or_else(|| fallback_peer_name(peer_id))
}

struct RoomActor {
    relay: RelaySender,
    negotiator: Negotiator,
    links: HashMap<String, PeerLink>,
    roster: watch::Sender<Vec<RoomMember>>,
    registry: TransferRegistry,
    tuning: TransferTuning,
    ice_servers: Vec<RTCIceServer>,
    download_dir: Option<PathBuf>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
}

impl RoomActor {
    async fn run(
        mut self,
        mut relay_events: mpsc::UnboundedReceiver<ServerEvent>,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                ev = relay_events.recv() => {
                    let Some(ev) = ev else {
                        warn!("relay connection lost");
                        break;
                    };
                    self.on_relay_event(ev).await;
                }
                Some(ev) = link_events.recv() => self.on_link_event(ev).await,
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Leave) => break,
                    Some(cmd) => self.on_command(cmd),
                },
            }
        }

        for (_, link) in self.links.drain() {
            link.close(&self.registry).await;
        }
        info!(id = %self.negotiator.local_id(), "left room");
    }

    fn peer_name(&self, peer_id: &str) -> String {
        display_name(&self.roster.borrow(), peer_id)
    }

    async fn on_relay_event(&mut self, ev: ServerEvent) {
        match ev {
            ServerEvent::Connected { id } => debug!(%id, "duplicate greeting ignored"),
            ServerEvent::RoomUsers(members) => {
                debug!(count = members.len(), "room roster");
                let steps = self.negotiator.on_roster(&members);
                self.roster.send_replace(members);
                self.execute(steps).await;
            }
            other => {
                if let Some((sender, signal)) = other.into_signal() {
                    let steps = self.negotiator.on_signal(&sender, signal);
                    self.execute(steps).await;
                }
            }
        }
    }

    async fn on_link_event(&mut self, ev: LinkEvent) {
        match ev {
            LinkEvent::LocalCandidate { peer_id, candidate } => {
                if !self.links.contains_key(&peer_id) {
                    return;
                }
                let signal = Signal::new(SignalKind::IceCandidate, candidate);
                if let Err(e) = self.relay.signal(&peer_id, signal) {
                    warn!(peer = %peer_id, "send candidate failed: {e:#}");
                }
            }
            LinkEvent::ChannelOpen { peer_id, dc } => {
                let Some(link) = self.links.get_mut(&peer_id) else { return };
                link.channel = Some(std::sync::Arc::new(RtcChannel::new(dc)));
                self.negotiator.channel_open(&peer_id);
                info!(peer = %peer_id, "data channel open");
            }
            LinkEvent::Message { peer_id, msg } => self.on_channel_message(&peer_id, msg),
            LinkEvent::ChannelClosed { peer_id } | LinkEvent::Failed { peer_id } => {
                if self.links.contains_key(&peer_id) {
                    warn!(peer = %peer_id, "peer transport closed");
                    let steps = self.negotiator.link_failed(&peer_id);
                    self.execute(steps).await;
                }
            }
        }
    }

    fn on_channel_message(
        &mut self,
        peer_id: &str,
        msg: webrtc::data_channel::data_channel_message::DataChannelMessage,
    ) {
        let peer_name = self.peer_name(peer_id);
        let Some(link) = self.links.get_mut(peer_id) else { return };
        if !msg.is_string {
            link.inbound.on_binary(msg.data, &self.registry);
            return;
        }
        let text = String::from_utf8_lossy(&msg.data);
        match link.inbound.on_text(&text, &peer_name, &self.registry) {
            Ok(Some((id, artifact))) => {
                let Some(dir) = self.download_dir.clone() else { return };
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    match save_artifact(&dir, &artifact).await {
                        Ok(path) => {
                            info!(transfer = %id, path = %path.display(), "download saved");
                            registry.mark_saved(&id, path);
                        }
                        Err(e) => warn!(transfer = %id, "save download failed: {e:#}"),
                    }
                });
            }
            Ok(None) => {}
            Err(e) => warn!(peer = %peer_id, "control message rejected: {e:#}"),
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::SendFile { file, reply } => {
                let ids = self.start_uploads(file);
                let _ = reply.send(ids);
            }
            Command::OpenPeers { reply } => {
                let roster = self.roster.borrow();
                let open = self
                    .links
                    .values()
                    .filter(|l| l.ready_channel().is_some())
                    .map(|l| {
                        roster
                            .iter()
                            .find(|m| m.id == l.peer_id)
                            .cloned()
                            .unwrap_or_else(|| RoomMember {
                                id: l.peer_id.clone(),
                                name: fallback_peer_name(&l.peer_id),
                                public_key: None,
                            })
                    })
                    .collect();
                let _ = reply.send(open);
            }
            Command::Leave => {}
        }
    }

    fn start_uploads(&mut self, file: OutgoingFile) -> Vec<TransferId> {
        let mut ids = Vec::new();
        for link in self.links.values() {
            let Some(channel) = link.ready_channel() else { continue };
            let id = TransferId::outgoing(&file.file_id, &link.peer_id);
            let peer_name = display_name(&self.roster.borrow(), &link.peer_id);
            if !self.registry.open(id.clone(), &peer_name, &file.name, file.size()) {
                continue;
            }
            ids.push(id.clone());

            let lock = link.send_lock.clone();
            let registry = self.registry.clone();
            let tuning = self.tuning;
            let file = file.clone();
            tokio::spawn(async move {
                let _guard = lock.lock().await;
                if let Err(e) = send_file(channel.as_ref(), &file, &id, &registry, &tuning).await {
                    warn!(transfer = %id, "upload failed: {e:#}");
                    registry.fail(&id);
                }
            });
        }
        if ids.is_empty() {
            warn!(file = %file.name, "no connected peers to send to");
        }
        ids
    }

    /// Performs negotiator steps in order, including any they give rise to.
    async fn execute(&mut self, steps: Vec<Step>) {
        let mut queue: VecDeque<Step> = steps.into();
        while let Some(step) = queue.pop_front() {
            let peer_id = step_peer(&step).to_string();
            match self.perform(step).await {
                Ok(follow_up) => queue.extend(follow_up),
                Err(e) => {
                    warn!(peer = %peer_id, "negotiation step failed: {e:#}");
                    queue.extend(self.negotiator.link_failed(&peer_id));
                }
            }
        }
    }

    async fn perform(&mut self, step: Step) -> Result<Vec<Step>> {
        match step {
            Step::Open { peer_id, role } => {
                let link =
                    PeerLink::open(&peer_id, role, self.ice_servers.clone(), self.link_tx.clone()).await?;
                let offer = if role == Role::Offerer {
                    Some(link.create_offer().await)
                } else {
                    None
                };
                self.links.insert(peer_id.clone(), link);
                if let Some(offer) = offer {
                    self.relay.signal(&peer_id, Signal::new(SignalKind::Offer, offer?))?;
                    debug!(peer = %peer_id, "offer sent");
                }
                Ok(Vec::new())
            }
            Step::Answer { peer_id, offer } => {
                let link = self.link(&peer_id)?;
                let answer = link.accept_offer(offer).await?;
                self.relay.signal(&peer_id, Signal::new(SignalKind::Answer, answer))?;
                debug!(peer = %peer_id, "answer sent");
                Ok(self.negotiator.remote_description_applied(&peer_id))
            }
            Step::ApplyAnswer { peer_id, answer } => {
                self.link(&peer_id)?.apply_answer(answer).await?;
                Ok(self.negotiator.remote_description_applied(&peer_id))
            }
            Step::AddCandidate { peer_id, candidate } => {
                if let Err(e) = self.link(&peer_id)?.add_candidate(candidate).await {
                    // A bad candidate does not doom the link.
                    warn!(peer = %peer_id, "{e:#}");
                }
                Ok(Vec::new())
            }
            Step::Close { peer_id } => {
                if let Some(link) = self.links.remove(&peer_id) {
                    link.close(&self.registry).await;
                } else {
                    self.registry.fail_peer(&peer_id);
                }
                Ok(Vec::new())
            }
        }
    }

    fn link(&self, peer_id: &str) -> Result<&PeerLink> {
        self.links
            .get(peer_id)
            .ok_or_else(|| anyhow!("no peer link for {peer_id}"))
    }
}

fn step_peer(step: &Step) -> &str {
    match step {
        Step::Open { peer_id, .. }
        | Step::Answer { peer_id, .. }
        | Step::ApplyAnswer { peer_id, .. }
        | Step::AddCandidate { peer_id, .. }
        | Step::Close { peer_id } => peer_id,
    }
}
