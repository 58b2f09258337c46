/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Observable transfer state: one entry per (file, direction, peer).

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId {
    pub file_id: String,
    pub peer_id: String,
    pub direction: Direction,
}

impl TransferId {
    pub fn outgoing(file_id: &str, peer_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            peer_id: peer_id.to_string(),
            direction: Direction::Send,
        }
    }

    pub fn incoming(file_id: &str, peer_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            peer_id: peer_id.to_string(),
            direction: Direction::Receive,
        }
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Send => "up",
            Direction::Receive => "down",
        };
        write!(f, "{}-{}-{}", self.file_id, dir, self.peer_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    InProgress,
    Completed,
    /// The peer link went away before `end`. Never retried.
    Failed,
}

/// A reassembled inbound file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub saved_to: Option<PathBuf>,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TransferStatus {
    pub direction: Direction,
    pub peer_id: String,
    pub peer_name: String,
    pub file_name: String,
    pub size: u64,
    pub bytes_moved: u64,
    pub percent: u8,
    pub state: TransferState,
    pub artifact: Option<Arc<Artifact>>,
}

#[derive(Debug, Clone)]
pub struct TransferUpdate {
    pub id: TransferId,
    pub status: TransferStatus,
}

/// Percent published while bytes are still moving.
///
/// `None` once everything declared has moved: the final 100 belongs to `end`.
/// Otherwise `round(moved / size * 100)` capped at 99.
pub fn in_flight_percent(moved: u64, size: u64) -> Option<u8> {
    if moved >= size {
        return None;
    }
    let pct = ((moved as f64 / size as f64) * 100.0).round() as u64;
    Some(pct.min(99) as u8)
}

struct RegistryInner {
    entries: Mutex<BTreeMap<TransferId, TransferStatus>>,
    updates: broadcast::Sender<TransferUpdate>,
}

/// Cheap to clone; all clones share the same table.
#[derive(Clone)]
pub struct TransferRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(BTreeMap::new()),
                updates,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TransferId, TransferStatus>> {
        self.inner.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, id: &TransferId, status: &TransferStatus) {
        // No subscribers is fine.
        let _ = self.inner.updates.send(TransferUpdate {
            id: id.clone(),
            status: status.clone(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.inner.updates.subscribe()
    }

    /// Registers a session at 0%. Re-opening an existing id is ignored; its declared
    /// size never changes.
    pub fn open(&self, id: TransferId, peer_name: &str, file_name: &str, size: u64) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            debug!(transfer = %id, "transfer already registered");
            return false;
        }
        let status = TransferStatus {
            direction: id.direction,
            peer_id: id.peer_id.clone(),
            peer_name: peer_name.to_string(),
            file_name: file_name.to_string(),
            size,
            bytes_moved: 0,
            percent: 0,
            state: TransferState::InProgress,
            artifact: None,
        };
        self.publish(&id, &status);
        entries.insert(id, status);
        true
    }

    /// Records `bytes_moved` for an in-flight session. Publishes only when the percent
    /// moves forward.
    pub fn advance(&self, id: &TransferId, bytes_moved: u64) {
        let mut entries = self.lock();
        let Some(status) = entries.get_mut(id) else {
            return;
        };
        if status.state != TransferState::InProgress || bytes_moved < status.bytes_moved {
            return;
        }
        status.bytes_moved = bytes_moved;
        if let Some(pct) = in_flight_percent(bytes_moved, status.size) {
            if pct > status.percent {
                status.percent = pct;
                self.publish(id, status);
            }
        }
    }

    /// Marks the session 100% / completed. Only the first call has any effect.
    pub fn complete(&self, id: &TransferId, artifact: Option<Arc<Artifact>>) -> bool {
        let mut entries = self.lock();
        let Some(status) = entries.get_mut(id) else {
            return false;
        };
        if status.state != TransferState::InProgress {
            return false;
        }
        status.percent = 100;
        status.state = TransferState::Completed;
        if let Some(artifact) = artifact {
            status.bytes_moved = status.bytes_moved.max(artifact.len() as u64);
            status.artifact = Some(artifact);
        }
        self.publish(id, status);
        true
    }

    /// Records where a completed artifact was written and drops its in-memory bytes;
    /// from then on the file at `saved_to` is the only copy. Not published.
    pub fn mark_saved(&self, id: &TransferId, path: PathBuf) {
        let mut entries = self.lock();
        if let Some(status) = entries.get_mut(id) {
            if let Some(artifact) = status.artifact.as_ref() {
                let mut updated = Artifact::clone(artifact);
                updated.data = Bytes::new();
                updated.saved_to = Some(path);
                status.artifact = Some(Arc::new(updated));
            }
        }
    }

    /// Forgets a finished session, handing back its last status. In-flight sessions
    /// stay put.
    pub fn remove(&self, id: &TransferId) -> Option<TransferStatus> {
        let mut entries = self.lock();
        match entries.get(id) {
            Some(status) if status.state != TransferState::InProgress => entries.remove(id),
            _ => None,
        }
    }

    pub fn fail(&self, id: &TransferId) {
        let mut entries = self.lock();
        if let Some(status) = entries.get_mut(id) {
            if status.state == TransferState::InProgress {
                status.state = TransferState::Failed;
                self.publish(id, status);
            }
        }
    }

    /// Fails every in-flight session with `peer_id`, in both directions.
    pub fn fail_peer(&self, peer_id: &str) -> usize {
        let mut entries = self.lock();
        let mut failed = 0;
        for (id, status) in entries.iter_mut() {
            if id.peer_id == peer_id && status.state == TransferState::InProgress {
                status.state = TransferState::Failed;
                self.publish(id, status);
                failed += 1;
            }
        }
        failed
    }

    pub fn get(&self, id: &TransferId) -> Option<TransferStatus> {
        self.lock().get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<(TransferId, TransferStatus)> {
        self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_percents(rx: &mut broadcast::Receiver<TransferUpdate>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(u) = rx.try_recv() {
            out.push(u.status.percent);
        }
        out
    }

    #[test]
    fn percent_is_rounded_and_held_below_100_in_flight() {
        assert_eq!(in_flight_percent(0, 100), Some(0));
        assert_eq!(in_flight_percent(16384, 40960), Some(40));
        assert_eq!(in_flight_percent(995, 1000), Some(99));
        assert_eq!(in_flight_percent(1000, 1000), None);
        assert_eq!(in_flight_percent(0, 0), None);
    }

    #[test]
    fn progress_never_goes_backwards_and_hits_100_once() {
        let reg = TransferRegistry::new();
        let mut rx = reg.subscribe();
        let id = TransferId::incoming("f1", "peer");
        assert!(reg.open(id.clone(), "bob", "a.bin", 1000));
        reg.advance(&id, 500);
        reg.advance(&id, 400);
        reg.advance(&id, 500);
        reg.advance(&id, 1000);
        assert!(reg.complete(&id, None));
        assert!(!reg.complete(&id, None));
        reg.advance(&id, 2000);
        assert_eq!(drain_percents(&mut rx), vec![0, 50, 100]);
        assert_eq!(reg.get(&id).unwrap().state, TransferState::Completed);
    }

    #[test]
    fn declared_size_is_fixed_once_announced() {
        let reg = TransferRegistry::new();
        let id = TransferId::outgoing("f1", "peer");
        assert!(reg.open(id.clone(), "bob", "a.bin", 10));
        assert!(!reg.open(id.clone(), "bob", "a.bin", 99));
        assert_eq!(reg.get(&id).unwrap().size, 10);
    }

    #[test]
    fn fail_peer_only_touches_in_flight_sessions_of_that_peer() {
        let reg = TransferRegistry::new();
        let done = TransferId::outgoing("f1", "p1");
        let pending = TransferId::incoming("f2", "p1");
        let other = TransferId::incoming("f3", "p2");
        reg.open(done.clone(), "a", "x", 1);
        reg.open(pending.clone(), "a", "y", 10);
        reg.open(other.clone(), "b", "z", 10);
        reg.complete(&done, None);

        assert_eq!(reg.fail_peer("p1"), 1);
        assert_eq!(reg.get(&done).unwrap().state, TransferState::Completed);
        assert_eq!(reg.get(&pending).unwrap().state, TransferState::Failed);
        assert_eq!(reg.get(&other).unwrap().state, TransferState::InProgress);
        // A failed session cannot complete later.
        assert!(!reg.complete(&pending, None));
    }

    #[test]
    fn saved_artifacts_release_their_bytes() {
        let reg = TransferRegistry::new();
        let id = TransferId::incoming("f1", "p1");
        reg.open(id.clone(), "a", "x.bin", 4);
        let artifact = Arc::new(Artifact {
            file_name: "x.bin".into(),
            mime_type: "application/octet-stream".into(),
            data: Bytes::from_static(b"abcd"),
            saved_to: None,
        });
        reg.complete(&id, Some(artifact));
        reg.mark_saved(&id, PathBuf::from("/tmp/x.bin"));

        let status = reg.get(&id).unwrap();
        let stored = status.artifact.unwrap();
        assert!(stored.is_empty());
        assert_eq!(stored.saved_to.as_deref(), Some(std::path::Path::new("/tmp/x.bin")));
        assert_eq!(status.bytes_moved, 4);
        assert_eq!(status.percent, 100);
    }

    #[test]
    fn only_finished_sessions_can_be_removed() {
        let reg = TransferRegistry::new();
        let live = TransferId::outgoing("f1", "p1");
        let done = TransferId::outgoing("f2", "p1");
        reg.open(live.clone(), "a", "x", 10);
        reg.open(done.clone(), "a", "y", 0);
        reg.complete(&done, None);

        assert!(reg.remove(&live).is_none());
        assert_eq!(reg.remove(&done).unwrap().state, TransferState::Completed);
        assert!(reg.get(&done).is_none());
        assert_eq!(reg.snapshot().len(), 1);
    }

    #[test]
    fn ids_distinguish_direction() {
        let up = TransferId::outgoing("abc", "p");
        let down = TransferId::incoming("abc", "p");
        assert_ne!(up, down);
        assert_eq!(up.to_string(), "abc-up-p");
        assert_eq!(down.to_string(), "abc-down-p");
    }
}
