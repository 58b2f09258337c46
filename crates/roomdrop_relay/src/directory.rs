/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use roomdrop_protocol::RoomMember;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct PeerEntry {
    room: String,
    name: String,
    public_key: Option<String>,
}

/// Room membership keyed by connection id.
///
/// A room exists exactly while it has members: the first join creates it, the last
/// leave removes it.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    peers: HashMap<String, PeerEntry>,
    // Member ids in join order.
    rooms: HashMap<String, Vec<String>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer_id` in `room`. Returns the room the peer was moved out of, if it
    /// was already a member of a different one.
    pub fn join(&mut self, peer_id: &str, room: &str, name: &str, public_key: Option<String>) -> Option<String> {
        let previous = match self.peers.get(peer_id) {
            Some(entry) if entry.room == room => None,
            Some(_) => self.leave(peer_id),
            None => None,
        };
        let members = self.rooms.entry(room.to_string()).or_default();
        if !members.iter().any(|id| id == peer_id) {
            members.push(peer_id.to_string());
        }
        self.peers.insert(
            peer_id.to_string(),
            PeerEntry {
                room: room.to_string(),
                name: name.to_string(),
                public_key,
            },
        );
        previous
    }

    /// Removes the peer. Returns the room it was in.
    pub fn leave(&mut self, peer_id: &str) -> Option<String> {
        let entry = self.peers.remove(peer_id)?;
        if let Some(members) = self.rooms.get_mut(&entry.room) {
            members.retain(|id| id != peer_id);
            if members.is_empty() {
                self.rooms.remove(&entry.room);
            }
        }
        Some(entry.room)
    }

    pub fn members(&self, room: &str) -> Vec<RoomMember> {
        let Some(ids) = self.rooms.get(room) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                let entry = self.peers.get(id)?;
                Some(RoomMember {
                    id: id.clone(),
                    name: entry.name.clone(),
                    public_key: entry.public_key.clone(),
                })
            })
            .collect()
    }

    pub fn room_of(&self, peer_id: &str) -> Option<&str> {
        self.peers.get(peer_id).map(|e| e.room.as_str())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(members: &[RoomMember]) -> Vec<&str> {
        members.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn first_join_creates_room_and_last_leave_prunes_it() {
        let mut dir = RoomDirectory::new();
        assert_eq!(dir.room_count(), 0);
        dir.join("p1", "abc12", "ada", None);
        dir.join("p2", "abc12", "bob", None);
        assert_eq!(dir.room_count(), 1);
        assert_eq!(ids(&dir.members("abc12")), vec!["p1", "p2"]);

        assert_eq!(dir.leave("p1").as_deref(), Some("abc12"));
        assert_eq!(ids(&dir.members("abc12")), vec!["p2"]);
        dir.leave("p2");
        assert_eq!(dir.room_count(), 0);
        assert!(dir.members("abc12").is_empty());
    }

    #[test]
    fn names_need_not_be_unique() {
        let mut dir = RoomDirectory::new();
        dir.join("p1", "r", "sam", None);
        dir.join("p2", "r", "sam", Some("key".into()));
        let members = dir.members("r");
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].public_key.as_deref(), Some("key"));
    }

    #[test]
    fn joining_another_room_moves_the_peer() {
        let mut dir = RoomDirectory::new();
        dir.join("p1", "one", "ada", None);
        dir.join("p2", "one", "bob", None);
        assert_eq!(dir.join("p1", "two", "ada", None).as_deref(), Some("one"));
        assert_eq!(ids(&dir.members("one")), vec!["p2"]);
        assert_eq!(ids(&dir.members("two")), vec!["p1"]);
        assert_eq!(dir.room_of("p1"), Some("two"));
        assert_eq!(dir.peer_count(), 2);
    }

    #[test]
    fn rejoining_same_room_does_not_duplicate() {
        let mut dir = RoomDirectory::new();
        dir.join("p1", "r", "ada", None);
        assert_eq!(dir.join("p1", "r", "ada2", None), None);
        let members = dir.members("r");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "ada2");
    }

    #[test]
    fn leave_unknown_peer_is_noop() {
        let mut dir = RoomDirectory::new();
        assert_eq!(dir.leave("ghost"), None);
    }
}
