/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-peer negotiation state machine.
//!
//! The negotiator does no I/O. Roster updates, relayed signals and transport events
//! go in; [`Step`]s come out, and the caller performs them against the real peer
//! connection in order.

use roomdrop_protocol::{RoomMember, Signal, SignalKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// The smaller id offers. Both sides compute the same answer with no extra messages.
pub fn role_for(local_id: &str, remote_id: &str) -> Role {
    if local_id < remote_id {
        Role::Offerer
    } else {
        Role::Answerer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Negotiating,
    Connected,
    Closed,
}

/// Work the caller must carry out against the peer connection for `peer_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Create the peer connection. An offerer also creates the data channel and
    /// sends an offer.
    Open { peer_id: String, role: Role },
    /// Apply a remote offer, then create, apply and send the answer.
    Answer { peer_id: String, offer: Value },
    ApplyAnswer { peer_id: String, answer: Value },
    AddCandidate { peer_id: String, candidate: Value },
    /// Tear the connection down and abandon its transfers.
    Close { peer_id: String },
}

#[derive(Debug)]
struct LinkState {
    role: Role,
    phase: LinkPhase,
    remote_described: bool,
    answered: bool,
    pending_candidates: Vec<Value>,
}

impl LinkState {
    fn new(role: Role) -> Self {
        Self {
            role,
            phase: LinkPhase::Negotiating,
            remote_described: false,
            answered: false,
            pending_candidates: Vec::new(),
        }
    }
}

pub struct Negotiator {
    local_id: String,
    links: BTreeMap<String, LinkState>,
    /// Candidates from peers we hold no link for yet.
    orphan_candidates: HashMap<String, Vec<Value>>,
}

impl Negotiator {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            links: BTreeMap::new(),
            orphan_candidates: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn phase(&self, peer_id: &str) -> Option<LinkPhase> {
        self.links.get(peer_id).map(|l| l.phase)
    }

    pub fn role(&self, peer_id: &str) -> Option<Role> {
        self.links.get(peer_id).map(|l| l.role)
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    fn open_link(&mut self, peer_id: &str, role: Role) -> Step {
        let mut link = LinkState::new(role);
        if let Some(early) = self.orphan_candidates.remove(peer_id) {
            link.pending_candidates = early;
        }
        self.links.insert(peer_id.to_string(), link);
        debug!(peer = %peer_id, ?role, "peer link opened");
        Step::Open {
            peer_id: peer_id.to_string(),
            role,
        }
    }

    /// Reconciles links against a fresh room snapshot: opens links for new members
    /// and closes links whose peer is gone.
    pub fn on_roster(&mut self, members: &[RoomMember]) -> Vec<Step> {
        let mut steps = Vec::new();
        for member in members {
            if member.id == self.local_id || self.links.contains_key(&member.id) {
                continue;
            }
            let role = role_for(&self.local_id, &member.id);
            steps.push(self.open_link(&member.id, role));
        }

        let gone: Vec<String> = self
            .links
            .keys()
            .filter(|id| !members.iter().any(|m| &m.id == *id))
            .cloned()
            .collect();
        for peer_id in gone {
            if let Some(link) = self.links.remove(&peer_id) {
                if link.phase != LinkPhase::Closed {
                    steps.push(Step::Close { peer_id });
                }
            }
        }
        self.orphan_candidates
            .retain(|id, _| members.iter().any(|m| &m.id == id));
        steps
    }

    /// Routes a relayed negotiation message from `sender`.
    pub fn on_signal(&mut self, sender: &str, signal: Signal) -> Vec<Step> {
        if sender == self.local_id {
            warn!("ignoring signal addressed from ourselves");
            return Vec::new();
        }
        match signal.kind {
            SignalKind::Offer => self.on_offer(sender, signal.payload),
            SignalKind::Answer => self.on_answer(sender, signal.payload),
            SignalKind::IceCandidate => self.on_candidate(sender, signal.payload),
        }
    }

    fn on_offer(&mut self, sender: &str, offer: Value) -> Vec<Step> {
        let mut steps = Vec::new();
        if !self.links.contains_key(sender) {
            // Offer outran the roster update.
            steps.push(self.open_link(sender, Role::Answerer));
        }
        let Some(link) = self.links.get_mut(sender) else {
            return steps;
        };
        if link.role == Role::Offerer {
            warn!(peer = %sender, "offer received on the offering side; ignoring");
            return steps;
        }
        if link.phase == LinkPhase::Closed || link.answered {
            debug!(peer = %sender, "duplicate offer ignored");
            return steps;
        }
        link.answered = true;
        steps.push(Step::Answer {
            peer_id: sender.to_string(),
            offer,
        });
        steps
    }

    fn on_answer(&mut self, sender: &str, answer: Value) -> Vec<Step> {
        match self.links.get_mut(sender) {
            Some(link)
                if link.role == Role::Offerer
                    && link.phase == LinkPhase::Negotiating
                    && !link.answered =>
            {
                link.answered = true;
                vec![Step::ApplyAnswer {
                    peer_id: sender.to_string(),
                    answer,
                }]
            }
            _ => {
                warn!(peer = %sender, "unexpected answer ignored");
                Vec::new()
            }
        }
    }

    fn on_candidate(&mut self, sender: &str, candidate: Value) -> Vec<Step> {
        let Some(link) = self.links.get_mut(sender) else {
            self.orphan_candidates
                .entry(sender.to_string())
                .or_default()
                .push(candidate);
            return Vec::new();
        };
        if link.phase == LinkPhase::Closed {
            return Vec::new();
        }
        if link.remote_described {
            vec![Step::AddCandidate {
                peer_id: sender.to_string(),
                candidate,
            }]
        } else {
            link.pending_candidates.push(candidate);
            Vec::new()
        }
    }

    /// Call once the remote description is set; releases buffered candidates.
    pub fn remote_description_applied(&mut self, peer_id: &str) -> Vec<Step> {
        let Some(link) = self.links.get_mut(peer_id) else {
            return Vec::new();
        };
        link.remote_described = true;
        link.pending_candidates
            .drain(..)
            .map(|candidate| Step::AddCandidate {
                peer_id: peer_id.to_string(),
                candidate,
            })
            .collect()
    }

    pub fn channel_open(&mut self, peer_id: &str) {
        if let Some(link) = self.links.get_mut(peer_id) {
            if link.phase == LinkPhase::Negotiating {
                link.phase = LinkPhase::Connected;
            }
        }
    }

    /// The transport gave up. The link stays closed until the peer leaves the roster.
    pub fn link_failed(&mut self, peer_id: &str) -> Vec<Step> {
        match self.links.get_mut(peer_id) {
            Some(link) if link.phase != LinkPhase::Closed => {
                link.phase = LinkPhase::Closed;
                link.pending_candidates.clear();
                vec![Step::Close {
                    peer_id: peer_id.to_string(),
                }]
            }
            _ => Vec::new(),
        }
    }
}
