//! Shared test doubles for the end-to-end suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use peerfetch::session::{PeerEngine, PeerEvent, SessionDescription};
use peerfetch::transport::{ChannelEvent, DataChannel, Frame, OpenChannel};
use peerfetch::Result;
use tokio::sync::{mpsc, watch};

/// In-memory data channel playing the serving peer.
///
/// Records every frame sent. Each time a request terminator (empty binary
/// frame followed by empty text frame) goes out, the next scripted reply is
/// delivered on the inbound queue.
///
/// The send buffer reads as empty unless a test sets it; above the low
/// watermark, sends wait for a drain signal that never comes.
pub struct MockChannel {
    sent: Mutex<Vec<Frame>>,
    replies: Mutex<VecDeque<Vec<Frame>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    buffered: AtomicUsize,
    closed: watch::Sender<Option<String>>,
}

impl MockChannel {
    /// Channel that answers requests with `replies`, in order.
    pub fn new(replies: Vec<Vec<Frame>>) -> (Arc<Self>, OpenChannel) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into()),
            events: tx,
            buffered: AtomicUsize::new(0),
            closed: watch::channel(None).0,
        });
        let open = OpenChannel {
            channel: channel.clone(),
            events: rx,
        };
        (channel, open)
    }

    /// Every frame sent so far
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    /// Binary frame lengths sent so far
    pub fn binary_lengths(&self) -> Vec<usize> {
        self.sent()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Binary(bytes) => Some(bytes.len()),
                Frame::Text(_) => None,
            })
            .collect()
    }

    /// Push an event onto the inbound queue directly
    pub fn inject(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Report `amount` bytes waiting in the send buffer
    pub fn set_buffered(&self, amount: usize) {
        self.buffered.store(amount, Ordering::SeqCst);
    }

    /// Close the channel the way the peer connection does: latch the close
    /// signal, then queue the close event.
    pub fn close(&self, reason: &str) {
        self.closed.send_replace(Some(reason.to_string()));
        self.inject(ChannelEvent::Closed);
    }
}

impl DataChannel for MockChannel {
    fn send(&self, frame: Frame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let mut sent = self.sent.lock().unwrap();
        let terminated = frame == Frame::Text(String::new())
            && sent.last() == Some(&Frame::Binary(Bytes::new()));
        sent.push(frame);
        if terminated {
            if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                for frame in reply {
                    let _ = self.events.send(ChannelEvent::Frame(frame));
                }
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move { self.buffered.load(Ordering::SeqCst) })
    }

    fn buffered_amount_low(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(std::future::pending())
    }

    fn closed(&self) -> Pin<Box<dyn Future<Output = String> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.closed.subscribe();
            let reason = match rx.wait_for(Option::is_some).await {
                Ok(reason) => reason.clone().unwrap_or_default(),
                Err(_) => "channel dropped".to_string(),
            };
            reason
        })
    }
}

/// Text frame
pub fn text(s: &str) -> Frame {
    Frame::Text(s.to_string())
}

/// Binary frame
pub fn binary(b: &[u8]) -> Frame {
    Frame::Binary(Bytes::copy_from_slice(b))
}

/// End-of-body marker
pub fn eof() -> Frame {
    Frame::Binary(Bytes::new())
}

/// Peer engine double. Records calls and fails on demand.
#[derive(Default)]
pub struct MockEngine {
    /// Remote descriptions applied
    pub remote: Mutex<Vec<SessionDescription>>,
    /// Error returned by `set_remote_description`, if any
    pub fail_remote: Mutex<Option<String>>,
    /// Number of `close` calls
    pub closed: Mutex<usize>,
    /// Whether `close` reports an error
    pub fail_close: Mutex<bool>,
}

impl MockEngine {
    /// Engine plus the sender for its event queue.
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedSender<PeerEvent>,
        mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::default()), tx, rx)
    }

    /// Engine whose remote description step fails with `reason`.
    pub fn failing(
        reason: &str,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedSender<PeerEvent>,
        mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let (engine, tx, rx) = Self::new();
        *engine.fail_remote.lock().unwrap() = Some(reason.to_string());
        (engine, tx, rx)
    }

    /// Number of remote descriptions applied
    pub fn remote_count(&self) -> usize {
        self.remote.lock().unwrap().len()
    }

    /// Number of times the connection was closed
    pub fn close_count(&self) -> usize {
        *self.closed.lock().unwrap()
    }
}

impl PeerEngine for MockEngine {
    fn set_remote_description(
        &self,
        offer: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(reason) = self.fail_remote.lock().unwrap().clone() {
                return Err(peerfetch::PeerFetchError::Negotiation(reason));
            }
            self.remote.lock().unwrap().push(offer);
            Ok(())
        })
    }

    fn create_answer(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>> {
        Box::pin(async { Ok(SessionDescription::answer("v=0\r\n")) })
    }

    fn set_local_description(
        &self,
        _answer: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn local_description(
        &self,
    ) -> Pin<Box<dyn Future<Output = Option<SessionDescription>> + Send + '_>> {
        Box::pin(async {
            Some(SessionDescription::answer(
                "v=0\r\na=candidate:1 1 udp 2122260223 192.0.2.1 50000 typ host\r\n",
            ))
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async {
            *self.closed.lock().unwrap() += 1;
            if *self.fail_close.lock().unwrap() {
                return Err(peerfetch::PeerFetchError::WebRtc("close failed".into()));
            }
            Ok(())
        })
    }
}
