/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Joins a room, sends the given files to every peer that connects within the
//! wait window, then keeps receiving until Ctrl-C.
//!
//! Usage: `roomdrop_cli <room> <name> [files...]`

use anyhow::{bail, Context};
use roomdrop_core::registry::Direction;
use roomdrop_core::{ClientConfig, OutgoingFile, RoomHandle, TransferState};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const PEER_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(room), Some(name)) = (args.next(), args.next()) else {
        bail!("usage: roomdrop_cli <room> <name> [files...]");
    };
    let files: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let mut cfg = ClientConfig::from_env();
    if cfg.download_dir.is_none() {
        cfg.download_dir = Some(std::env::current_dir().context("current dir")?);
    }
    let handle = RoomHandle::join(&cfg, &room, &name).await?;
    info!(room = %room, id = %handle.local_id(), "waiting for peers");

    let mut updates = handle.registry().subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(u) => {
                    let arrow = match u.status.direction {
                        Direction::Send => "->",
                        Direction::Receive => "<-",
                    };
                    match u.status.state {
                        TransferState::InProgress => info!(
                            "{arrow} {} {} {}%",
                            u.status.peer_name, u.status.file_name, u.status.percent
                        ),
                        TransferState::Completed => info!(
                            "{arrow} {} {} done ({} bytes)",
                            u.status.peer_name, u.status.file_name, u.status.size
                        ),
                        TransferState::Failed => warn!(
                            "{arrow} {} {} failed at {}%",
                            u.status.peer_name, u.status.file_name, u.status.percent
                        ),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "progress output lagged")
                }
                Err(_) => break,
            }
        }
    });

    if !files.is_empty() {
        let deadline = tokio::time::Instant::now() + PEER_WAIT;
        let peers = loop {
            let peers = handle.open_peers().await?;
            if !peers.is_empty() || tokio::time::Instant::now() >= deadline {
                break peers;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        };
        if peers.is_empty() {
            warn!("no peer connected within {}s", PEER_WAIT.as_secs());
        }
        for path in &files {
            let file = OutgoingFile::from_path(path).await?;
            let ids = handle.send_file(file).await?;
            info!(file = %path.display(), peers = ids.len(), "upload started");
        }
    }

    tokio::signal::ctrl_c().await?;
    handle.leave().await
}
