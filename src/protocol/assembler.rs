//! Response assembler.
//!
//! [`Assembler`] is the pure state machine that turns the inbound frame
//! sequence into a response head plus body chunks. [`BodyReader`] drives it
//! from the channel as the caller pulls the body.
//!
//! ## State Machine
//!
//! | Phase              | Frame                     | Effect                                  |
//! |--------------------|---------------------------|-----------------------------------------|
//! | `AwaitingPreamble` | text                      | append; on `\n\n` decode head, → body   |
//! | `AwaitingPreamble` | binary                    | protocol error, → `Discarding`/`Done`   |
//! | `StreamingBody`    | non-empty binary          | queue chunk                             |
//! | `StreamingBody`    | empty binary, any text    | end of body, → `Done`                   |
//! | `Discarding`       | non-empty binary          | drop                                    |
//! | `Discarding`       | empty binary, any text    | → `Done`                                |
//! | `Done`             | any                       | ignored                                 |

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::OwnedMutexGuard;

use super::message::{Progress, ProgressObserver};
use super::preamble::{decode_response_head, preamble_end, ResponseHead};
use crate::error::{PeerFetchError, Result};
use crate::transport::{DataChannel, Frame, Inbound, RequestClaim};

/// Assembler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accumulating the text preamble
    AwaitingPreamble,
    /// Head decoded; binary frames are body
    StreamingBody,
    /// Skipping the rest of a response that failed to decode
    Discarding,
    /// End of body seen
    Done,
}

/// Inbound frame state machine for one response.
#[derive(Debug)]
pub struct Assembler {
    phase: Phase,
    preamble: String,
    pending: VecDeque<Bytes>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Fresh assembler awaiting a preamble
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingPreamble,
            preamble: String::new(),
            pending: VecDeque::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Feed one frame.
    ///
    /// Returns the decoded head on the frame that completes the preamble. A
    /// malformed status line or a binary frame before the preamble ends is a
    /// protocol error; the assembler then skips the rest of that response so
    /// the channel is clean for the next one.
    pub fn push(&mut self, frame: Frame) -> Result<Option<ResponseHead>> {
        match (self.phase, frame) {
            (Phase::AwaitingPreamble, Frame::Text(text)) => {
                self.preamble.push_str(&text);
                let Some(end) = preamble_end(&self.preamble) else {
                    return Ok(None);
                };
                if end < self.preamble.len() {
                    tracing::debug!(
                        extra = self.preamble.len() - end,
                        "Ignoring text after end of preamble"
                    );
                }
                match decode_response_head(&self.preamble[..end]) {
                    Ok(head) => {
                        tracing::debug!(status = head.status.as_u16(), "Response head received");
                        self.phase = Phase::StreamingBody;
                        self.preamble.clear();
                        Ok(Some(head))
                    }
                    Err(err) => {
                        self.phase = Phase::Discarding;
                        self.preamble.clear();
                        Err(err)
                    }
                }
            }
            (Phase::AwaitingPreamble, Frame::Binary(data)) => {
                self.phase = if data.is_empty() {
                    Phase::Done
                } else {
                    Phase::Discarding
                };
                Err(PeerFetchError::Protocol(format!(
                    "binary frame of {} bytes before end of header block",
                    data.len()
                )))
            }
            (Phase::StreamingBody, Frame::Binary(data)) if !data.is_empty() => {
                self.pending.push_back(data);
                Ok(None)
            }
            (Phase::StreamingBody | Phase::Discarding, frame) => {
                if frame.is_empty() || frame.is_text() {
                    tracing::trace!(kind = frame.kind(), "End of body");
                    self.phase = Phase::Done;
                }
                Ok(None)
            }
            (Phase::Done, frame) => {
                tracing::trace!(kind = frame.kind(), "Frame after end of body ignored");
                Ok(None)
            }
        }
    }

    /// Oldest queued body chunk
    pub fn pop_chunk(&mut self) -> Option<Bytes> {
        self.pending.pop_front()
    }

    /// Whether end of body was seen and every chunk has been taken
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done && self.pending.is_empty()
    }
}

/// Exclusive hold on the inbound queue for the rest of one response.
pub struct Inflight {
    inbound: OwnedMutexGuard<Inbound>,
    assembler: Assembler,
}

impl Inflight {
    /// Start a response on a locked inbound queue.
    pub fn new(inbound: OwnedMutexGuard<Inbound>) -> Self {
        Self {
            inbound,
            assembler: Assembler::new(),
        }
    }

    /// Wait for the response head.
    pub async fn read_head(&mut self) -> Result<ResponseHead> {
        loop {
            let frame = self.inbound.next_frame().await?;
            if let Some(head) = self.assembler.push(frame)? {
                return Ok(head);
            }
        }
    }

    /// Whether the rest of the response has already been consumed.
    pub fn is_finished(&self) -> bool {
        self.assembler.is_finished()
    }

    /// Consume and drop the rest of the response.
    pub async fn drain(&mut self) -> Result<usize> {
        let mut dropped = 0;
        loop {
            while let Some(chunk) = self.assembler.pop_chunk() {
                dropped += chunk.len();
            }
            if self.assembler.is_finished() {
                return Ok(dropped);
            }
            let frame = self.inbound.next_frame().await?;
            // Head errors were already reported to the caller.
            let _ = self.assembler.push(frame);
        }
    }
}

/// Pull-based reader over one response body.
///
/// Holds the inbound queue and the caller's request claim until end of
/// body, then releases both. Dropped early, it hands the queue to a
/// background drain and releases the claim at once.
pub struct BodyReader {
    inflight: Option<Inflight>,
    claim: Option<RequestClaim>,
    channel: Arc<dyn DataChannel>,
    observer: Option<ProgressObserver>,
    ack_eof: bool,
}

impl BodyReader {
    /// Reader over the body following `head`.
    ///
    /// Reports the declared length to `observer` before any body bytes.
    pub fn new(
        inflight: Inflight,
        claim: RequestClaim,
        head: &ResponseHead,
        channel: Arc<dyn DataChannel>,
        observer: Option<ProgressObserver>,
        ack_eof: bool,
    ) -> Self {
        if let (Some(observer), Some(total)) = (&observer, head.headers.content_length()) {
            observer(Progress::Total(total));
        }
        Self {
            inflight: Some(inflight),
            claim: Some(claim),
            channel,
            observer,
            ack_eof,
        }
    }

    /// Next body chunk, or `None` at end of body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(inflight) = self.inflight.as_mut() else {
                return Ok(None);
            };

            if let Some(chunk) = inflight.assembler.pop_chunk() {
                self.report(Progress::Received(chunk.len()));
                return Ok(Some(chunk));
            }

            if inflight.assembler.is_finished() {
                self.report(Progress::Done);
                if self.ack_eof {
                    acknowledge(self.channel.as_ref()).await;
                }
                self.release();
                return Ok(None);
            }

            let frame = match inflight.inbound.next_frame().await {
                Ok(frame) => frame,
                Err(err) => {
                    self.release();
                    return Err(err);
                }
            };
            inflight.assembler.push(frame)?;
        }
    }

    /// Adapt into a stream of chunks.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        stream::unfold(self, |mut reader| async move {
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), reader)),
                Ok(None) => None,
                Err(err) => Some((Err(err), reader)),
            }
        })
        .boxed()
    }

    /// End of this response: free the queue and the caller's claim.
    fn release(&mut self) {
        self.inflight = None;
        self.claim = None;
    }

    fn report(&self, progress: Progress) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            spawn_drain(inflight, self.channel.clone(), self.ack_eof);
        }
    }
}

/// Finish an abandoned response in the background so the next request
/// starts on a clean channel.
pub fn spawn_drain(mut inflight: Inflight, channel: Arc<dyn DataChannel>, ack_eof: bool) {
    if inflight.is_finished() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No runtime to drain abandoned response body");
        return;
    };
    handle.spawn(async move {
        match inflight.drain().await {
            Ok(dropped) => {
                tracing::debug!(dropped, "Drained abandoned response body");
                if ack_eof {
                    acknowledge(channel.as_ref()).await;
                }
            }
            Err(err) => tracing::debug!(error = %err, "Drain stopped"),
        }
    });
}

async fn acknowledge(channel: &dyn DataChannel) {
    if let Err(err) = channel.send(Frame::Text(String::new())).await {
        tracing::warn!(error = %err, "Failed to acknowledge end of body");
    }
}
