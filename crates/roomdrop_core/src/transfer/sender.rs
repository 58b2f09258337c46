/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - ROOMDROP Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use roomdrop_protocol::ControlMessage;
use tracing::{debug, info};

use super::OutgoingFile;
use crate::channel::DataChannel;
use crate::config::TransferTuning;
use crate::registry::{TransferId, TransferRegistry};

/// Blocks while the channel holds more than the high-water mark, polling until it
/// drops below. Errors if the channel closes meanwhile.
pub async fn wait_for_drain(channel: &dyn DataChannel, tuning: &TransferTuning) -> Result<()> {
    if !channel.is_open() {
        bail!("data channel '{}' not open", channel.label());
    }
    let buffered = channel.buffered_amount().await;
    if buffered <= tuning.high_water_mark {
        return Ok(());
    }
    debug!(
        channel = %channel.label(),
        buffered,
        high_watermark = tuning.high_water_mark,
        "applying backpressure"
    );
    loop {
        tokio::time::sleep(tuning.drain_poll_interval).await;
        if !channel.is_open() {
            bail!("data channel '{}' closed during backpressure wait", channel.label());
        }
        if channel.buffered_amount().await < tuning.high_water_mark {
            return Ok(());
        }
    }
}

/// Streams `file` over one channel: `start`, chunks, `end`.
///
/// The session `id` must already be open in `registry`; it is advanced after every
/// chunk and completed after `end` goes out. On error the session is left as is.
pub async fn send_file(
    channel: &dyn DataChannel,
    file: &OutgoingFile,
    id: &TransferId,
    registry: &TransferRegistry,
    tuning: &TransferTuning,
) -> Result<()> {
    let start = ControlMessage::Start {
        file_id: file.file_id.clone(),
        file_name: file.name.clone(),
        file_type: file.mime_type.clone(),
        size: file.size(),
    };
    channel.send_text(start.to_text()).await.context("send start")?;

    let chunk_size = tuning.chunk_size.max(1);
    let total = file.data.len();
    let mut offset = 0usize;
    while offset < total {
        let end = (offset + chunk_size).min(total);
        wait_for_drain(channel, tuning).await?;
        channel
            .send_binary(file.data.slice(offset..end))
            .await
            .with_context(|| format!("send chunk at offset {offset}"))?;
        offset = end;
        registry.advance(id, offset as u64);
    }

    let end = ControlMessage::End {
        file_id: file.file_id.clone(),
    };
    channel.send_text(end.to_text()).await.context("send end")?;
    registry.complete(id, None);
    info!(transfer = %id, bytes = total, "upload complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{MemoryChannel, Sent};
    use crate::registry::TransferState;
    use std::time::Duration;

    fn tuning() -> TransferTuning {
        TransferTuning {
            chunk_size: 16 * 1024,
            high_water_mark: 64 * 1024,
            drain_poll_interval: Duration::from_millis(5),
        }
    }

    fn open(registry: &TransferRegistry, file: &OutgoingFile) -> TransferId {
        let id = TransferId::outgoing(&file.file_id, "peer-y");
        registry.open(id.clone(), "y", &file.name, file.size());
        id
    }

    #[tokio::test]
    async fn forty_kib_goes_out_as_three_chunks_between_start_and_end() {
        let channel = MemoryChannel::new(true);
        let registry = TransferRegistry::new();
        let file = OutgoingFile::new("a.bin", "application/x-test", vec![7u8; 40 * 1024]);
        let id = open(&registry, &file);
        let mut updates = registry.subscribe();

        send_file(channel.as_ref(), &file, &id, &registry, &tuning()).await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 5);
        let Sent::Text(start) = &sent[0] else { panic!("start must come first") };
        assert_eq!(
            ControlMessage::parse(start).unwrap(),
            ControlMessage::Start {
                file_id: file.file_id.clone(),
                file_name: "a.bin".into(),
                file_type: "application/x-test".into(),
                size: 40 * 1024,
            }
        );
        let sizes: Vec<usize> = sent[1..4]
            .iter()
            .map(|s| match s {
                Sent::Binary(b) => b.len(),
                Sent::Text(t) => panic!("unexpected text {t}"),
            })
            .collect();
        assert_eq!(sizes, vec![16 * 1024, 16 * 1024, 8 * 1024]);
        assert_eq!(
            sent[4],
            Sent::Text(ControlMessage::End { file_id: file.file_id.clone() }.to_text())
        );

        let mut percents = Vec::new();
        while let Ok(u) = updates.try_recv() {
            percents.push(u.status.percent);
        }
        assert_eq!(percents, vec![40, 80, 100]);
        assert_eq!(registry.get(&id).unwrap().state, TransferState::Completed);
    }

    #[tokio::test]
    async fn empty_file_sends_start_and_end_only() {
        let channel = MemoryChannel::new(true);
        let registry = TransferRegistry::new();
        let file = OutgoingFile::new("empty", "", Vec::<u8>::new());
        let id = open(&registry, &file);
        send_file(channel.as_ref(), &file, &id, &registry, &tuning()).await.unwrap();
        assert_eq!(channel.sent().len(), 2);
        assert_eq!(registry.get(&id).unwrap().percent, 100);
    }

    #[tokio::test]
    async fn sender_pauses_above_high_water_mark_until_drained() {
        let channel = MemoryChannel::new(false);
        let registry = TransferRegistry::new();
        let file = OutgoingFile::new("big.bin", "", vec![1u8; 160 * 1024]);
        let id = open(&registry, &file);
        let tuning = tuning();

        let task = {
            let channel = channel.clone();
            let registry = registry.clone();
            let file = file.clone();
            let id = id.clone();
            tokio::spawn(async move { send_file(channel.as_ref(), &file, &id, &registry, &tuning).await })
        };

        // Let the sender fill the buffer and stall.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stalled_at = channel.binary_send_times().len();
        assert!(stalled_at > 0 && stalled_at < 10, "sent {stalled_at} chunks");
        assert!(channel.buffered_amount().await > tuning.high_water_mark);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(channel.binary_send_times().len(), stalled_at, "sent while above the mark");

        // Repeatedly drain until the whole file is out.
        let mut drains = Vec::new();
        while !task.is_finished() {
            drains.push(channel.drain_to(0));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        task.await.unwrap().unwrap();

        let times = channel.binary_send_times();
        assert_eq!(times.len(), 10);
        assert!(times[stalled_at] >= drains[0], "chunk sent before the first drain");
        assert_eq!(registry.get(&id).unwrap().state, TransferState::Completed);
    }

    #[tokio::test]
    async fn closed_channel_aborts_transfer_below_100() {
        let channel = MemoryChannel::new(false);
        let registry = TransferRegistry::new();
        let file = OutgoingFile::new("big.bin", "", vec![1u8; 160 * 1024]);
        let id = open(&registry, &file);
        let tuning = tuning();

        let task = {
            let channel = channel.clone();
            let registry = registry.clone();
            let file = file.clone();
            let id = id.clone();
            tokio::spawn(async move { send_file(channel.as_ref(), &file, &id, &registry, &tuning).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.close();
        assert!(task.await.unwrap().is_err());
        let status = registry.get(&id).unwrap();
        assert_eq!(status.state, TransferState::InProgress);
        assert!(status.percent < 100);
    }
}
