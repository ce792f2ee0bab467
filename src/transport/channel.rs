//! The data-channel seam.
//!
//! [`DataChannel`] is the outbound half: send a frame and observe the send
//! buffer. Inbound traffic arrives as [`ChannelEvent`]s on a queue that the
//! transport reads one request at a time through [`Inbound`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{PeerFetchError, Result};

/// One message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 string message
    Text(String),
    /// Binary message, at most one MTU
    Binary(Bytes),
}

impl Frame {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a text frame
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }
}

/// Inbound event from the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A message arrived
    Frame(Frame),
    /// The channel closed
    Closed,
    /// The channel reported an error
    Error(String),
}

/// Outbound half of a data channel.
///
/// Implemented over `webrtc` by [`RtcChannel`](super::RtcChannel) and by
/// in-memory doubles in tests.
pub trait DataChannel: Send + Sync + 'static {
    /// Queue one frame for sending.
    ///
    /// Fails with [`PeerFetchError::ChannelNotReady`] if the channel has not
    /// opened yet and [`PeerFetchError::ChannelClosed`] if it is gone.
    fn send(&self, frame: Frame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Bytes queued but not yet handed to the network.
    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;

    /// Resolve at the next "buffered amount low" signal.
    fn buffered_amount_low(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Resolve with the reason once the channel has closed or errored.
    ///
    /// Lets a send suspended on [`buffered_amount_low`](Self::buffered_amount_low)
    /// give up. Channels that cannot observe closing never resolve.
    fn closed(&self) -> Pin<Box<dyn Future<Output = String> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

/// An open data channel: the outbound handle plus its inbound event queue.
pub struct OpenChannel {
    /// Outbound handle
    pub channel: Arc<dyn DataChannel>,
    /// Inbound events, in arrival order
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl std::fmt::Debug for OpenChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenChannel").finish_non_exhaustive()
    }
}

/// Reader over the inbound event queue with a sticky closed state.
pub struct Inbound {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    closed: Arc<OnceLock<String>>,
}

impl Inbound {
    /// Wrap an event queue. `closed` is set the first time the channel is
    /// seen closing and never cleared.
    pub fn new(events: mpsc::UnboundedReceiver<ChannelEvent>, closed: Arc<OnceLock<String>>) -> Self {
        Self { events, closed }
    }

    /// Next frame, waiting for one to arrive.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        if let Some(reason) = self.closed.get() {
            return Err(PeerFetchError::ChannelClosed(reason.clone()));
        }
        let event = self.events.recv().await;
        self.handle(event)
    }

    /// Discard anything queued between exchanges, noting a close if one is
    /// pending.
    pub fn discard_stale(&mut self) -> Result<()> {
        loop {
            match self.events.try_recv() {
                Ok(ChannelEvent::Frame(frame)) => {
                    if !frame.is_empty() {
                        tracing::debug!(
                            kind = frame.kind(),
                            len = frame.len(),
                            "Discarding stale frame"
                        );
                    }
                }
                Ok(event) => {
                    self.handle(Some(event))?;
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.handle(None)?;
                }
            }
        }
    }

    /// Whether the channel has been seen closing.
    pub fn is_closed(&self) -> bool {
        self.closed.get().is_some()
    }

    fn handle(&mut self, event: Option<ChannelEvent>) -> Result<Frame> {
        let reason = match event {
            Some(ChannelEvent::Frame(frame)) => {
                tracing::trace!(kind = frame.kind(), len = frame.len(), "Frame received");
                return Ok(frame);
            }
            Some(ChannelEvent::Error(err)) => err,
            Some(ChannelEvent::Closed) | None => "data channel closed".to_string(),
        };
        if self.closed.set(reason.clone()).is_ok() {
            tracing::info!(reason = %reason, "Data channel closed");
        }
        let reason = self.closed.get().cloned().unwrap_or(reason);
        Err(PeerFetchError::ChannelClosed(reason))
    }
}
