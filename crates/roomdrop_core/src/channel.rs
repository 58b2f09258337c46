/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// The slice of a data channel the transfer engine needs.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn is_open(&self) -> bool;
    /// Bytes queued but not yet handed to the transport.
    async fn buffered_amount(&self) -> usize;
    async fn send_text(&self, text: String) -> Result<()>;
    async fn send_binary(&self, data: Bytes) -> Result<()>;
}

#[derive(Clone)]
pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self { dc }
    }
}

#[async_trait]
impl DataChannel for RtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("dc send_text: {e:#}"))
    }

    async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.dc
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("dc send: {e:#}"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory channel with a scripted send buffer.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Text(String),
        Binary(Bytes),
    }

    /// Every send adds to `buffered`; nothing drains unless the test calls `drain_to`.
    /// With `auto_drain`, sends never accumulate.
    pub struct MemoryChannel {
        open: AtomicBool,
        auto_drain: bool,
        buffered: AtomicUsize,
        log: Mutex<Vec<(Instant, Sent)>>,
        drains: Mutex<Vec<Instant>>,
    }

    impl MemoryChannel {
        pub fn new(auto_drain: bool) -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(true),
                auto_drain,
                buffered: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
                drains: Mutex::new(Vec::new()),
            })
        }

        pub fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        pub fn drain_to(&self, amount: usize) -> Instant {
            let at = Instant::now();
            self.drains.lock().unwrap().push(at);
            self.buffered.store(amount, Ordering::SeqCst);
            at
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.log.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
        }

        pub fn binary_send_times(&self) -> Vec<Instant> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, s)| matches!(s, Sent::Binary(_)))
                .map(|(at, _)| *at)
                .collect()
        }

        fn record(&self, sent: Sent, len: usize) -> Result<()> {
            if !self.open.load(Ordering::SeqCst) {
                return Err(anyhow!("channel closed"));
            }
            if !self.auto_drain {
                self.buffered.fetch_add(len, Ordering::SeqCst);
            }
            self.log.lock().unwrap().push((Instant::now(), sent));
            Ok(())
        }
    }

    #[async_trait]
    impl DataChannel for MemoryChannel {
        fn label(&self) -> String {
            "memory".to_string()
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn buffered_amount(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: String) -> Result<()> {
            let len = text.len();
            self.record(Sent::Text(text), len)
        }

        async fn send_binary(&self, data: Bytes) -> Result<()> {
            let len = data.len();
            self.record(Sent::Binary(data), len)
        }
    }
}
