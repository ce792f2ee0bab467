//! Transport facade: HTTP-shaped fetches over an open data channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Transport                    │
//! │        fetch(Request) -> Response            │
//! └───────┬──────────────────────────┬───────────┘
//!         │ outbound                 │ inbound
//!         ▼                          ▼
//! ┌───────────────┐          ┌───────────────┐
//! │ preamble +    │          │  Assembler /  │
//! │ Pump (+ multi-│          │  BodyReader   │
//! │ part encoder) │          └───────┬───────┘
//! └───────┬───────┘                  │
//!         ▼                          │
//! ┌──────────────────────────────────┴───────────┐
//! │      DataChannel  (RtcChannel / test double) │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use peerfetch::{Request, Transport};
//!
//! let response = transport.fetch(Request::get("/index.html")).await?;
//! println!("{} {}", response.status(), response.text().await?);
//! ```
//!
//! One request is in flight at a time. A second `fetch` while the first
//! response body is still being read fails with
//! [`PeerFetchError::RequestInFlight`]. A response the caller gave up on
//! (protocol error, dropped body) is drained in the background; the next
//! `fetch` waits for that drain instead of failing.

mod channel;
mod config;
mod pump;
mod rtc;

pub use channel::{ChannelEvent, DataChannel, Frame, Inbound, OpenChannel};
pub use config::TransportConfig;
pub use pump::Pump;
pub use rtc::RtcChannel;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::error::{PeerFetchError, Result};
use crate::protocol::assembler::{spawn_drain, BodyReader, Inflight};
use crate::protocol::message::{Body, ProgressObserver, Request, Response};
use crate::protocol::multipart::{Form, MultipartEncoder};
use crate::protocol::{encode_request_head, AUTH_HEADER, MULTIPART_BOUNDARY};

/// Fetch-like handle over one open data channel.
///
/// Cheap to clone; clones share the channel and its one-request-at-a-time
/// discipline.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    channel: Arc<dyn DataChannel>,
    inbound: Arc<Mutex<Inbound>>,
    active: Arc<AtomicBool>,
    closed: Arc<OnceLock<String>>,
    config: TransportConfig,
    auth_token: Option<String>,
}

impl Transport {
    /// Wrap an open channel.
    ///
    /// `auth_token`, when set, is attached to every request in the
    /// [`AUTH_HEADER`] header.
    pub fn new(open: OpenChannel, config: TransportConfig, auth_token: Option<String>) -> Self {
        let closed = Arc::new(OnceLock::new());
        Self {
            inner: Arc::new(TransportInner {
                channel: open.channel,
                inbound: Arc::new(Mutex::new(Inbound::new(open.events, closed.clone()))),
                active: Arc::new(AtomicBool::new(false)),
                closed,
                config,
                auth_token,
            }),
        }
    }

    /// Transport settings
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Whether requests carry the session token
    pub fn is_authenticated(&self) -> bool {
        self.inner.auth_token.is_some()
    }

    /// Whether the channel has been seen closing
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get().is_some()
    }

    /// Send `request` and wait for the response head.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        self.fetch_inner(request, None).await
    }

    /// Like [`fetch`](Self::fetch), reporting body progress to `observer`.
    pub async fn fetch_with_progress(
        &self,
        request: Request,
        observer: ProgressObserver,
    ) -> Result<Response> {
        self.fetch_inner(request, Some(observer)).await
    }

    async fn fetch_inner(
        &self,
        request: Request,
        observer: Option<ProgressObserver>,
    ) -> Result<Response> {
        if let Some(reason) = self.inner.closed.get() {
            return Err(PeerFetchError::ChannelClosed(reason.clone()));
        }
        let claim =
            RequestClaim::acquire(&self.inner.active).ok_or(PeerFetchError::RequestInFlight)?;
        // Only a background drain can still hold the queue here.
        let mut inbound = self.inner.inbound.clone().lock_owned().await;
        if let Some(reason) = self.inner.closed.get() {
            return Err(PeerFetchError::ChannelClosed(reason.clone()));
        }
        inbound.discard_stale()?;

        let Request {
            method,
            target,
            mut headers,
            body,
        } = request;

        tracing::debug!(method = %method, target = %target, "Sending request");

        match &body {
            Body::Multipart(_) => {
                headers.set("Content-Type", Form::content_type(MULTIPART_BOUNDARY));
            }
            other => {
                if let Some(content_type) = other.default_content_type() {
                    if !headers.contains("Content-Type") {
                        headers.append("Content-Type", content_type);
                    }
                }
            }
        }
        if let Some(token) = &self.inner.auth_token {
            headers.set(AUTH_HEADER, token.as_str());
        }

        let preamble = encode_request_head(&method, &target, &headers, &self.inner.config.user_agent)?;

        let pump = Pump::new(self.inner.channel.clone(), &self.inner.config);
        let sent = self.send_request(&pump, &preamble, body).await;
        if let Err(err) = sent {
            self.note_fatal(&err);
            return Err(err);
        }

        let mut inflight = Inflight::new(inbound);
        let head = match inflight.read_head().await {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!(error = %err, "Response failed");
                if matches!(err, PeerFetchError::Protocol(_)) {
                    spawn_drain(inflight, self.inner.channel.clone(), self.inner.config.ack_eof);
                }
                return Err(err);
            }
        };

        tracing::debug!(
            status = head.status.as_u16(),
            content_length = ?head.headers.content_length(),
            "Response received"
        );

        let reader = BodyReader::new(
            inflight,
            claim,
            &head,
            self.inner.channel.clone(),
            observer,
            self.inner.config.ack_eof,
        );
        Ok(Response::new(head, reader.into_stream()))
    }

    async fn send_request(&self, pump: &Pump, preamble: &str, body: Body) -> Result<()> {
        pump.send_text(preamble).await?;

        match body {
            Body::Multipart(form) => {
                let mut encoder = MultipartEncoder::new(form, MULTIPART_BOUNDARY, pump.mtu());
                while let Some(chunk) = encoder.next_chunk().await? {
                    pump.send_bytes(chunk).await?;
                }
            }
            other => {
                if let Some(bytes) = other.to_bytes() {
                    let frames = pump.send_bytes(bytes).await?;
                    tracing::trace!(frames, "Body sent");
                }
            }
        }

        pump.finish().await
    }

    fn note_fatal(&self, err: &PeerFetchError) {
        if let PeerFetchError::ChannelClosed(reason) = err {
            if self.inner.closed.set(reason.clone()).is_ok() {
                tracing::info!(reason = %reason, "Data channel closed");
            }
        }
    }
}

/// The caller's hold on the transport for one request, from `fetch` until
/// its response body ends or is dropped.
///
/// Separate from the inbound queue lock, which a background drain may keep
/// after the caller has let go.
#[derive(Debug)]
pub struct RequestClaim {
    active: Arc<AtomicBool>,
}

impl RequestClaim {
    /// Claim `active`, or `None` if a request already holds it.
    pub fn acquire(active: &Arc<AtomicBool>) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                active: active.clone(),
            })
    }
}

impl Drop for RequestClaim {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.inner.config)
            .field("authenticated", &self.is_authenticated())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;

    /// Records sends and, once the request terminator arrives, replays a
    /// scripted response.
    struct ScriptedChannel {
        sent: std::sync::Mutex<Vec<Frame>>,
        reply: std::sync::Mutex<Vec<Frame>>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    }

    impl DataChannel for ScriptedChannel {
        fn send(&self, frame: Frame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let mut sent = self.sent.lock().unwrap();
            let terminated = frame == Frame::Text(String::new())
                && sent.last() == Some(&Frame::Binary(Bytes::new()));
            sent.push(frame);
            if terminated {
                for reply in self.reply.lock().unwrap().drain(..) {
                    let _ = self.events.send(ChannelEvent::Frame(reply));
                }
            }
            Box::pin(async { Ok(()) })
        }

        fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
            Box::pin(async { 0 })
        }

        fn buffered_amount_low(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async {})
        }
    }

    fn scripted(reply: Vec<Frame>) -> (Transport, Arc<ScriptedChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(ScriptedChannel {
            sent: std::sync::Mutex::new(Vec::new()),
            reply: std::sync::Mutex::new(reply),
            events: tx,
        });
        let transport = Transport::new(
            OpenChannel {
                channel: channel.clone(),
                events: rx,
            },
            TransportConfig::default().with_user_agent("ua"),
            Some("secret".into()),
        );
        (transport, channel)
    }

    #[tokio::test]
    async fn test_second_request_rejected_while_in_flight() {
        let (transport, _channel) = scripted(Vec::new());
        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.fetch(Request::get("/slow")).await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let err = transport.fetch(Request::get("/other")).await.unwrap_err();
        assert!(matches!(err, PeerFetchError::RequestInFlight));
        first.abort();
    }

    #[tokio::test]
    async fn test_auth_header_and_text_content_type() {
        let (transport, channel) = scripted(vec![
            Frame::Text("HTTP/1.1 200 OK\n\n".into()),
            Frame::Binary(Bytes::new()),
        ]);

        let request = Request::builder(http::Method::POST, "/echo")
            .body("hi")
            .build();
        let response = transport.fetch(request).await.unwrap();
        assert_eq!(response.bytes().await.unwrap(), Bytes::new());

        let sent = channel.sent.lock().unwrap().clone();
        assert_eq!(
            sent[0],
            Frame::Text(
                "POST /echo HTTP/1.1\nContent-Type: text/plain;charset=UTF-8\n\
                 X-HTTPOverWebRTC-Authorization: secret\nUser-Agent: ua\n\n"
                    .into()
            )
        );
        assert_eq!(sent[1], Frame::Binary(Bytes::from_static(b"hi")));
        assert_eq!(sent[2], Frame::Binary(Bytes::new()));
        assert_eq!(sent[3], Frame::Text(String::new()));
        // End-of-body acknowledgement.
        assert_eq!(sent[4], Frame::Text(String::new()));
    }

    #[tokio::test]
    async fn test_closed_channel_latches() {
        let (transport, channel) = scripted(Vec::new());
        channel.events.send(ChannelEvent::Closed).unwrap();

        let err = transport.fetch(Request::get("/")).await.unwrap_err();
        assert!(matches!(err, PeerFetchError::ChannelClosed(_)));
        assert!(transport.is_closed());
        let err = transport.fetch(Request::get("/")).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_request_claim_is_exclusive() {
        let active = Arc::new(AtomicBool::new(false));
        let claim = RequestClaim::acquire(&active).unwrap();
        assert!(RequestClaim::acquire(&active).is_none());
        drop(claim);
        assert!(RequestClaim::acquire(&active).is_some());
    }

    #[tokio::test]
    async fn test_fetch_waits_for_background_drain() {
        let (transport, _channel) = scripted(vec![
            Frame::Text("HTTP/1.1 204 No Content\n\n".into()),
            Frame::Binary(Bytes::new()),
        ]);
        // Stand in for a drain still reading the previous response.
        let drain = transport.inner.inbound.clone().lock_owned().await;

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.fetch(Request::get("/next")).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());

        drop(drain);
        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.status().as_u16(), 204);
    }
}
