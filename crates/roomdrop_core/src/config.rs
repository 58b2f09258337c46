/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use roomdrop_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_WATER_MARK};
use std::path::PathBuf;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
const DEFAULT_DRAIN_POLL_MS: u64 = 10;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: Option<String>,
    /// ICE server URLs (e.g. `stun:stun.l.google.com:19302`, `turn:turn.example:3478?transport=udp`).
    pub ice_urls: Option<Vec<String>>,
    pub ice_username: Option<String>,
    pub ice_credential: Option<String>,
    /// Bytes per binary data-channel message.
    pub chunk_size: Option<usize>,
    /// Buffered bytes above which the sender pauses.
    pub high_water_mark: Option<usize>,
    /// Poll interval while waiting for the channel to drain.
    pub drain_poll_ms: Option<u64>,
    /// Completed downloads are also written here when set.
    pub download_dir: Option<PathBuf>,
}

/// Chunking and flow-control knobs of the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTuning {
    pub chunk_size: usize,
    pub high_water_mark: usize,
    pub drain_poll_interval: Duration,
}

impl Default for TransferTuning {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            drain_poll_interval: Duration::from_millis(DEFAULT_DRAIN_POLL_MS),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the `ROOMDROP_*` variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| non_empty(lookup(key));
        Self {
            relay_url: get("ROOMDROP_RELAY_URL"),
            ice_urls: get("ROOMDROP_ICE_URLS").map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            ice_username: get("ROOMDROP_ICE_USERNAME"),
            ice_credential: get("ROOMDROP_ICE_CREDENTIAL"),
            chunk_size: get("ROOMDROP_CHUNK_SIZE").and_then(|v| v.parse().ok()),
            high_water_mark: get("ROOMDROP_HIGH_WATER_MARK").and_then(|v| v.parse().ok()),
            drain_poll_ms: get("ROOMDROP_DRAIN_POLL_MS").and_then(|v| v.parse().ok()),
            download_dir: get("ROOMDROP_DOWNLOAD_DIR").map(PathBuf::from),
        }
    }

    pub fn relay_url(&self) -> String {
        non_empty(self.relay_url.clone()).unwrap_or_else(|| DEFAULT_RELAY_URL.to_string())
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let urls = self
            .ice_urls
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_STUN_URL.to_string()]);
        if urls.is_empty() {
            return Vec::new();
        }
        vec![RTCIceServer {
            urls,
            username: non_empty(self.ice_username.clone()).unwrap_or_default(),
            credential: non_empty(self.ice_credential.clone()).unwrap_or_default(),
            ..Default::default()
        }]
    }

    pub fn tuning(&self) -> TransferTuning {
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).clamp(1024, 64 * 1024);
        let high_water_mark = self
            .high_water_mark
            .unwrap_or(DEFAULT_HIGH_WATER_MARK)
            .max(chunk_size);
        let poll_ms = self.drain_poll_ms.unwrap_or(DEFAULT_DRAIN_POLL_MS).clamp(1, 1000);
        TransferTuning {
            chunk_size,
            high_water_mark,
            drain_poll_interval: Duration::from_millis(poll_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_wire_constants() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.tuning(), TransferTuning::default());
        assert_eq!(cfg.relay_url(), DEFAULT_RELAY_URL);
        assert_eq!(cfg.ice_servers()[0].urls, vec![DEFAULT_STUN_URL.to_string()]);
    }

    #[test]
    fn env_values_are_trimmed_and_clamped() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ROOMDROP_RELAY_URL", "  ws://relay.example/ws "),
            ("ROOMDROP_ICE_URLS", "stun:a:1, ,turn:b:2"),
            ("ROOMDROP_ICE_USERNAME", " "),
            ("ROOMDROP_CHUNK_SIZE", "100"),
            ("ROOMDROP_HIGH_WATER_MARK", "10"),
            ("ROOMDROP_DRAIN_POLL_MS", "0"),
        ]);
        let cfg = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.relay_url(), "ws://relay.example/ws");
        assert_eq!(cfg.ice_urls.as_deref(), Some(&["stun:a:1".to_string(), "turn:b:2".to_string()][..]));
        assert_eq!(cfg.ice_username, None);
        let tuning = cfg.tuning();
        assert_eq!(tuning.chunk_size, 1024);
        assert_eq!(tuning.high_water_mark, 1024);
        assert_eq!(tuning.drain_poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn empty_ice_list_disables_ice_servers() {
        let cfg: ClientConfig = serde_json::from_str(r#"{"ice_urls": [], "download_dir": "/tmp/x"}"#).unwrap();
        assert!(cfg.ice_servers().is_empty());
        assert_eq!(cfg.download_dir, Some(PathBuf::from("/tmp/x")));
    }
}
