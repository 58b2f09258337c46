/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire types shared by the relay and its clients.
//!
//! Relay traffic is JSON text frames shaped as `{"event": <name>, "data": <payload>}`.
//! Data-channel control traffic is JSON text (`start` / `end`); file bytes travel as
//! raw binary messages in between.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size of one binary chunk on the data channel.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
/// Outstanding unsent bytes above which the sender stops and waits for the channel to drain.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub id: String,
    pub name: String,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Client -> relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join-room")]
    JoinRoom {
        room: String,
        name: String,
        #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },
    #[serde(rename = "offer")]
    Offer { target: String, offer: Value },
    #[serde(rename = "answer")]
    Answer { target: String, answer: Value },
    #[serde(rename = "ice-candidate")]
    IceCandidate { target: String, candidate: Value },
}

/// Relay -> client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// First frame on every connection: the id the relay assigned to it.
    #[serde(rename = "connected")]
    Connected { id: String },
    /// Full membership snapshot of the receiver's room.
    #[serde(rename = "room-users")]
    RoomUsers(Vec<RoomMember>),
    #[serde(rename = "offer")]
    Offer { sender: String, offer: Value },
    #[serde(rename = "answer")]
    Answer { sender: String, answer: Value },
    #[serde(rename = "ice-candidate")]
    IceCandidate { sender: String, candidate: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// A negotiation envelope with the addressing stripped off. The payload is opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: Value,
}

impl Signal {
    pub fn new(kind: SignalKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Addressed form sent by the originating client.
    pub fn addressed_to(self, target: String) -> ClientEvent {
        match self.kind {
            SignalKind::Offer => ClientEvent::Offer { target, offer: self.payload },
            SignalKind::Answer => ClientEvent::Answer { target, answer: self.payload },
            SignalKind::IceCandidate => ClientEvent::IceCandidate {
                target,
                candidate: self.payload,
            },
        }
    }

    /// Form delivered by the relay to the target.
    pub fn relayed_from(self, sender: String) -> ServerEvent {
        match self.kind {
            SignalKind::Offer => ServerEvent::Offer { sender, offer: self.payload },
            SignalKind::Answer => ServerEvent::Answer { sender, answer: self.payload },
            SignalKind::IceCandidate => ServerEvent::IceCandidate {
                sender,
                candidate: self.payload,
            },
        }
    }
}

impl ClientEvent {
    /// Splits a negotiation envelope into `(target, signal)`. `None` for `join-room`.
    pub fn into_signal(self) -> Option<(String, Signal)> {
        match self {
            ClientEvent::JoinRoom { .. } => None,
            ClientEvent::Offer { target, offer } => Some((target, Signal::new(SignalKind::Offer, offer))),
            ClientEvent::Answer { target, answer } => Some((target, Signal::new(SignalKind::Answer, answer))),
            ClientEvent::IceCandidate { target, candidate } => {
                Some((target, Signal::new(SignalKind::IceCandidate, candidate)))
            }
        }
    }
}

impl ServerEvent {
    pub fn into_signal(self) -> Option<(String, Signal)> {
        match self {
            ServerEvent::Connected { .. } | ServerEvent::RoomUsers(_) => None,
            ServerEvent::Offer { sender, offer } => Some((sender, Signal::new(SignalKind::Offer, offer))),
            ServerEvent::Answer { sender, answer } => Some((sender, Signal::new(SignalKind::Answer, answer))),
            ServerEvent::IceCandidate { sender, candidate } => {
                Some((sender, Signal::new(SignalKind::IceCandidate, candidate)))
            }
        }
    }
}

/// Text messages on a data channel. Binary messages between a `start` and its `end`
/// belong to that transfer; chunks carry no transfer id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "fileType", default)]
        file_type: String,
        size: u64,
    },
    #[serde(rename = "end")]
    End {
        #[serde(rename = "fileId")]
        file_id: String,
    },
}

impl ControlMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> String {
        // Plain strings and integers only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn file_id(&self) -> &str {
        match self {
            ControlMessage::Start { file_id, .. } | ControlMessage::End { file_id } => file_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_matches_wire_shape() {
        let ev: ClientEvent =
            serde_json::from_value(json!({"event": "join-room", "data": {"room": "abc12", "name": "ada"}})).unwrap();
        assert_eq!(
            ev,
            ClientEvent::JoinRoom {
                room: "abc12".into(),
                name: "ada".into(),
                public_key: None
            }
        );
    }

    #[test]
    fn room_users_is_a_bare_array() {
        let ev = ServerEvent::RoomUsers(vec![RoomMember {
            id: "a1".into(),
            name: "ada".into(),
            public_key: Some("pk".into()),
        }]);
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({"event": "room-users", "data": [{"id": "a1", "name": "ada", "publicKey": "pk"}]})
        );
    }

    #[test]
    fn relayed_signal_swaps_target_for_sender() {
        let payload = json!({"type": "offer", "sdp": "v=0"});
        let (target, signal) = ClientEvent::Offer {
            target: "bob".into(),
            offer: payload.clone(),
        }
        .into_signal()
        .unwrap();
        assert_eq!(target, "bob");
        let out = signal.relayed_from("alice".into());
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"event": "offer", "data": {"sender": "alice", "offer": payload}})
        );
    }

    #[test]
    fn control_messages_use_camel_case_fields() {
        let start = ControlMessage::parse(
            r#"{"type":"start","fileId":"k3j","fileName":"a.txt","fileType":"text/plain","size":40960}"#,
        )
        .unwrap();
        assert_eq!(start.file_id(), "k3j");
        let end: serde_json::Value = serde_json::from_str(&ControlMessage::End { file_id: "k3j".into() }.to_text()).unwrap();
        assert_eq!(end, json!({"type": "end", "fileId": "k3j"}));
    }

    #[test]
    fn missing_file_type_defaults_to_empty() {
        let start = ControlMessage::parse(r#"{"type":"start","fileId":"x","fileName":"blob","size":0}"#).unwrap();
        assert!(matches!(start, ControlMessage::Start { ref file_type, .. } if file_type.is_empty()));
        assert!(ControlMessage::parse(r#"{"type":"start","fileId":"x"}"#).is_err());
    }
}
