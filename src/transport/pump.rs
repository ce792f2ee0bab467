//! Chunk pump.
//!
//! Slices outbound payloads into MTU-sized frames and feeds them to the data
//! channel one at a time. Before each frame the pump checks the channel's
//! buffered amount; above the low watermark it suspends until the channel
//! signals "buffered amount low".

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::channel::{DataChannel, Frame};
use super::config::TransportConfig;
use crate::error::{PeerFetchError, Result};

/// Watermark-driven frame sender.
#[derive(Clone)]
pub struct Pump {
    channel: Arc<dyn DataChannel>,
    mtu: usize,
    low_watermark: usize,
    retry_delay: Duration,
}

impl Pump {
    /// Create a pump over `channel`.
    pub fn new(channel: Arc<dyn DataChannel>, config: &TransportConfig) -> Self {
        Self {
            channel,
            mtu: config.mtu.max(1),
            low_watermark: config.low_watermark,
            retry_delay: config.retry_delay(),
        }
    }

    /// Frame size limit
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Send one frame, waiting for the buffer to drain first.
    ///
    /// A send that fails because the channel is not open yet is retried once
    /// after the configured delay; a second failure is returned.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.wait_for_drain().await?;

        match self.channel.send(frame.clone()).await {
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    error = %err,
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "Send failed on unready channel, retrying once"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.channel.send(frame).await
            }
            result => result,
        }
    }

    /// Send `text` as text frames of at most one MTU, split on character
    /// boundaries. Returns the number of frames sent.
    pub async fn send_text(&self, text: &str) -> Result<usize> {
        let mut frames = 0;
        let mut rest = text;
        while !rest.is_empty() {
            let mut end = rest.len().min(self.mtu);
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            // A single character wider than the MTU still has to go out whole.
            if end == 0 {
                end = rest.chars().next().map_or(rest.len(), char::len_utf8);
            }
            let (head, tail) = rest.split_at(end);
            self.send_frame(Frame::Text(head.to_string())).await?;
            frames += 1;
            rest = tail;
        }
        Ok(frames)
    }

    /// Send `data` as binary frames of at most one MTU. Returns the number of
    /// frames sent, `ceil(len / mtu)`.
    pub async fn send_bytes(&self, data: Bytes) -> Result<usize> {
        let mut frames = 0;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.mtu).min(data.len());
            self.send_frame(Frame::Binary(data.slice(offset..end))).await?;
            tracing::trace!(offset, len = end - offset, "Sent body chunk");
            frames += 1;
            offset = end;
        }
        Ok(frames)
    }

    /// Send the end-of-body marker: an empty binary frame, then an empty
    /// text frame.
    pub async fn finish(&self) -> Result<()> {
        self.send_frame(Frame::Binary(Bytes::new())).await?;
        self.send_frame(Frame::Text(String::new())).await
    }

    /// Fails with [`PeerFetchError::ChannelClosed`] if the channel closes
    /// while the buffer is still above the low watermark.
    async fn wait_for_drain(&self) -> Result<()> {
        let buffered = self.channel.buffered_amount().await;
        if buffered <= self.low_watermark {
            return Ok(());
        }
        tracing::trace!(
            buffered,
            low_watermark = self.low_watermark,
            "Waiting for send buffer to drain"
        );
        tokio::select! {
            () = self.channel.buffered_amount_low() => Ok(()),
            reason = self.channel.closed() => {
                tracing::debug!(reason = %reason, "Channel closed while waiting to send");
                Err(PeerFetchError::ChannelClosed(reason))
            }
        }
    }
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pump")
            .field("mtu", &self.mtu)
            .field("low_watermark", &self.low_watermark)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
