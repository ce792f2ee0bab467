//! `webrtc` data channel adapter.
//!
//! Binds an [`RTCDataChannel`] to the [`DataChannel`] seam: sends map to
//! `send`/`send_text`, the buffered-amount-low callback wakes the pump, and
//! inbound messages, close and error callbacks are forwarded as
//! [`ChannelEvent`]s. Close and error also latch the channel's close signal
//! so a send waiting on the buffer gives up.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use super::channel::{ChannelEvent, DataChannel, Frame};
use crate::error::{PeerFetchError, Result};

/// [`DataChannel`] over a `webrtc` data channel.
pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
    drained: Arc<Notify>,
    closed: Arc<watch::Sender<Option<String>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl RtcChannel {
    /// Install callbacks on `dc` and wrap it.
    ///
    /// Inbound messages and close/error notifications are forwarded to
    /// `events`. `low_watermark` becomes the channel's buffered-amount-low
    /// threshold.
    pub async fn attach(
        dc: Arc<RTCDataChannel>,
        low_watermark: usize,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Arc<Self> {
        let drained = Arc::new(Notify::new());
        let closed = Arc::new(watch::channel(None).0);

        dc.set_buffered_amount_low_threshold(low_watermark).await;
        let notify = drained.clone();
        dc.on_buffered_amount_low(Box::new(move || {
            let notify = notify.clone();
            Box::pin(async move {
                notify.notify_one();
            })
        }))
        .await;

        let tx = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let frame = if msg.is_string {
                Frame::Text(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                Frame::Binary(msg.data)
            };
            let _ = tx.send(ChannelEvent::Frame(frame));
            Box::pin(async {})
        }));

        let tx = events.clone();
        let latch = closed.clone();
        let label = dc.label().to_string();
        dc.on_close(Box::new(move || {
            tracing::info!(label = %label, "Data channel closed by peer");
            latch_closed(&latch, "data channel closed");
            let _ = tx.send(ChannelEvent::Closed);
            Box::pin(async {})
        }));

        let tx = events.clone();
        let latch = closed.clone();
        dc.on_error(Box::new(move |err| {
            tracing::warn!(error = %err, "Data channel error");
            latch_closed(&latch, &err.to_string());
            let _ = tx.send(ChannelEvent::Error(err.to_string()));
            Box::pin(async {})
        }));

        Arc::new(Self {
            dc,
            drained,
            closed,
            events,
        })
    }

    /// Mark the channel dead because the connection under it failed.
    ///
    /// Wakes a send waiting on the buffer and fails the response being read.
    pub fn fail(&self, reason: &str) {
        if latch_closed(&self.closed, reason) {
            let _ = self.events.send(ChannelEvent::Error(reason.to_string()));
        }
    }

    /// Channel label
    pub fn label(&self) -> &str {
        self.dc.label()
    }

    /// Whether the underlying channel is open
    pub fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn classify(&self, err: &webrtc::Error) -> PeerFetchError {
        match self.dc.ready_state() {
            RTCDataChannelState::Connecting | RTCDataChannelState::Unspecified => {
                PeerFetchError::ChannelNotReady(err.to_string())
            }
            _ => PeerFetchError::ChannelClosed(err.to_string()),
        }
    }
}

impl DataChannel for RtcChannel {
    fn send(&self, frame: Frame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let sent = match frame {
                Frame::Text(text) => self.dc.send_text(text).await,
                Frame::Binary(data) => self.dc.send(&data).await,
            };
            sent.map(|_| ()).map_err(|err| self.classify(&err))
        })
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move { self.dc.buffered_amount().await })
    }

    fn buffered_amount_low(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move { self.drained.notified().await })
    }

    fn closed(&self) -> Pin<Box<dyn Future<Output = String> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.closed.subscribe();
            let reason = match rx.wait_for(Option::is_some).await {
                Ok(reason) => reason.clone().unwrap_or_default(),
                Err(_) => "data channel dropped".to_string(),
            };
            reason
        })
    }
}

/// Set the close reason once. Returns whether this call set it.
fn latch_closed(closed: &watch::Sender<Option<String>>, reason: &str) -> bool {
    closed.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason.to_string());
        true
    })
}

impl std::fmt::Debug for RtcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcChannel")
            .field("label", &self.dc.label())
            .field("state", &self.dc.ready_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_reason_latches_once() {
        let closed = watch::channel(None).0;
        let mut rx = closed.subscribe();

        assert!(latch_closed(&closed, "peer connection failed"));
        assert!(!latch_closed(&closed, "data channel closed"));

        let reason = rx.wait_for(Option::is_some).await.unwrap().clone();
        assert_eq!(reason.as_deref(), Some("peer connection failed"));
    }
}
