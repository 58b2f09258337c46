/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod channel;
pub mod config;
pub mod negotiator;
mod peer_link;
pub mod registry;
pub mod room;
pub mod signaling;
pub mod transfer;

pub use config::ClientConfig;
pub use registry::{TransferId, TransferRegistry, TransferState, TransferStatus};
pub use room::RoomHandle;
pub use transfer::OutgoingFile;
