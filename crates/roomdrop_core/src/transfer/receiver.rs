/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use roomdrop_protocol::{ControlMessage, DEFAULT_MIME_TYPE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::registry::{Artifact, TransferId, TransferRegistry};

struct ChunkBuffer {
    id: TransferId,
    file_name: String,
    mime_type: String,
    declared_size: u64,
    received: u64,
    chunks: Vec<Bytes>,
}

impl ChunkBuffer {
    fn assemble(self) -> Artifact {
        let mut data = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            data.extend_from_slice(chunk);
        }
        Artifact {
            file_name: self.file_name,
            mime_type: self.mime_type,
            data: data.freeze(),
            saved_to: None,
        }
    }
}

/// Receive side of one data channel. Holds at most one open transfer.
pub struct InboundChannel {
    peer_id: String,
    active: Option<ChunkBuffer>,
}

impl InboundChannel {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            active: None,
        }
    }

    pub fn active_transfer(&self) -> Option<&TransferId> {
        self.active.as_ref().map(|b| &b.id)
    }

    /// Handles a `start` / `end` control message.
    ///
    /// Returns the finished artifact and its session id when `end` closes the open
    /// transfer. Unparseable text is an error for the caller to log; protocol
    /// misuse (a second `start`, an unknown `end`) is logged and ignored here.
    pub fn on_text(
        &mut self,
        text: &str,
        peer_name: &str,
        registry: &TransferRegistry,
    ) -> Result<Option<(TransferId, Arc<Artifact>)>> {
        let msg = ControlMessage::parse(text)
            .with_context(|| format!("malformed control message from {}", self.peer_id))?;
        match msg {
            ControlMessage::Start {
                file_id,
                file_name,
                file_type,
                size,
            } => {
                if let Some(open) = &self.active {
                    warn!(
                        peer = %self.peer_id,
                        open = %open.id,
                        rejected = %file_id,
                        "start received while another transfer is open; ignoring"
                    );
                    return Ok(None);
                }
                let id = TransferId::incoming(&file_id, &self.peer_id);
                if !registry.open(id.clone(), peer_name, &file_name, size) {
                    warn!(transfer = %id, "duplicate start; ignoring");
                    return Ok(None);
                }
                info!(transfer = %id, file = %file_name, size, "download started");
                self.active = Some(ChunkBuffer {
                    id,
                    file_name,
                    mime_type: if file_type.trim().is_empty() {
                        DEFAULT_MIME_TYPE.to_string()
                    } else {
                        file_type
                    },
                    declared_size: size,
                    received: 0,
                    chunks: Vec::new(),
                });
                Ok(None)
            }
            ControlMessage::End { file_id } => {
                let matches = self
                    .active
                    .as_ref()
                    .is_some_and(|b| b.id.file_id == file_id);
                if !matches {
                    warn!(peer = %self.peer_id, file_id = %file_id, "end without a matching transfer");
                    return Ok(None);
                }
                let Some(buffer) = self.active.take() else {
                    return Ok(None);
                };
                if buffer.received != buffer.declared_size {
                    warn!(
                        transfer = %buffer.id,
                        declared = buffer.declared_size,
                        received = buffer.received,
                        "size mismatch at end"
                    );
                }
                let id = buffer.id.clone();
                let artifact = Arc::new(buffer.assemble());
                registry.complete(&id, Some(artifact.clone()));
                info!(transfer = %id, bytes = artifact.len(), "download complete");
                Ok(Some((id, artifact)))
            }
        }
    }

    pub fn on_binary(&mut self, data: Bytes, registry: &TransferRegistry) {
        let Some(buffer) = self.active.as_mut() else {
            warn!(peer = %self.peer_id, bytes = data.len(), "chunk outside any transfer; dropped");
            return;
        };
        buffer.received += data.len() as u64;
        buffer.chunks.push(data);
        registry.advance(&buffer.id, buffer.received);
    }

    /// Drops the open buffer, failing its session.
    pub fn abandon(&mut self, registry: &TransferRegistry) {
        if let Some(buffer) = self.active.take() {
            debug!(transfer = %buffer.id, received = buffer.received, "abandoning download");
            registry.fail(&buffer.id);
        }
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.').trim();
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

fn numbered(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({n}).{ext}"),
        _ => format!("{name} ({n})"),
    }
}

/// Writes `artifact` into `dir` under its sanitized name, never overwriting: a
/// taken name gets a ` (n)` suffix.
pub async fn save_artifact(dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create {}", dir.display()))?;
    let base = sanitize_file_name(&artifact.file_name);
    let mut n = 0u32;
    loop {
        let candidate = dir.join(if n == 0 { base.clone() } else { numbered(&base, n) });
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match file {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&artifact.data)
                    .await
                    .with_context(|| format!("write {}", candidate.display()))?;
                file.flush().await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e).with_context(|| format!("open {}", candidate.display())),
        }
    }
}
