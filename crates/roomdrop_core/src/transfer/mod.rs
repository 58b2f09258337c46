/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Chunked file transfer over an established data channel.
//!
//! Wire sequence per file: a `start` text message, the file bytes as binary chunks,
//! then an `end` text message. Chunks carry no transfer id, so a channel carries at
//! most one transfer at a time in each direction.

mod receiver;
mod sender;

pub use receiver::{save_artifact, InboundChannel};
pub use sender::{send_file, wait_for_drain};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use rand::Rng;
use roomdrop_protocol::DEFAULT_MIME_TYPE;
use std::path::Path;

const FILE_ID_LEN: usize = 9;
const FILE_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random lowercase base36 id naming one `send_file` call.
pub fn new_file_id() -> String {
    let mut rng = rand::thread_rng();
    (0..FILE_ID_LEN)
        .map(|_| FILE_ID_ALPHABET[rng.gen_range(0..FILE_ID_ALPHABET.len())] as char)
        .collect()
}

/// Label shown for a peer whose display name is not known: `Peer` plus the first four
/// characters of its id.
pub fn fallback_peer_name(peer_id: &str) -> String {
    let short: String = peer_id.chars().take(4).collect();
    format!("Peer {short}")
}

/// A file queued for sending. The bytes are shared by every per-peer session.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub file_id: String,
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let mime_type = mime_type.into();
        Self {
            file_id: new_file_id(),
            name: name.into(),
            mime_type: if mime_type.trim().is_empty() {
                DEFAULT_MIME_TYPE.to_string()
            } else {
                mime_type
            },
            data: data.into(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid file name: {}", path.display()))?
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Ok(Self::new(name, mime.essence_str(), data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ids_are_short_base36() {
        let id = new_file_id();
        assert_eq!(id.len(), FILE_ID_LEN);
        assert!(id.bytes().all(|b| FILE_ID_ALPHABET.contains(&b)));
        assert_ne!(new_file_id(), new_file_id());
    }

    #[test]
    fn fallback_name_truncates_id() {
        assert_eq!(fallback_peer_name("Xy12abcdef"), "Peer Xy12");
        assert_eq!(fallback_peer_name("ab"), "Peer ab");
    }

    #[test]
    fn blank_mime_becomes_octet_stream() {
        let f = OutgoingFile::new("a", " ", vec![1, 2, 3]);
        assert_eq!(f.mime_type, DEFAULT_MIME_TYPE);
        assert_eq!(f.size(), 3);
    }

    #[tokio::test]
    async fn from_path_guesses_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();
        let f = OutgoingFile::from_path(&path).await.unwrap();
        assert_eq!(f.name, "notes.txt");
        assert_eq!(f.mime_type, "text/plain");
        assert_eq!(&f.data[..], b"hello");
    }
}
