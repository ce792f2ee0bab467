//! peerfetch error types.
//!
//! # Error Classification
//!
//! Errors fall into four protocol-level kinds plus a few local ones:
//!
//! - **Negotiation**: the offer/answer exchange failed; the session is terminal
//!   and both completion signals reject.
//! - **Protocol**: the peer sent something that does not parse as a response
//!   (bad status line, binary data before the header block ended). Only the
//!   in-flight request fails; the transport stays usable.
//! - **Channel not ready**: a send raced the data channel opening. The chunk
//!   pump retries once after a fixed delay before surfacing it.
//! - **Channel closed**: the data channel is gone. The transport latches this
//!   and every later operation fails immediately.
//!
//! Nothing in the library panics on peer input; every failure resolves as an
//! `Err` on the relevant future.

use thiserror::Error;

/// peerfetch errors.
#[derive(Error, Debug)]
pub enum PeerFetchError {
    /// Offer/answer negotiation failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The peer violated the framing protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A send was attempted before the data channel was writable.
    #[error("Data channel not ready: {0}")]
    ChannelNotReady(String),

    /// The data channel closed or errored.
    #[error("Data channel closed: {0}")]
    ChannelClosed(String),

    /// Another request is still in flight on this channel.
    #[error("A request is already in flight on this data channel")]
    RequestInFlight,

    /// The request cannot be encoded (bad header name or value).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Error reported by the WebRTC stack.
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for peerfetch operations
pub type Result<T> = std::result::Result<T, PeerFetchError>;

impl PeerFetchError {
    /// Whether the operation may succeed if retried shortly.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChannelNotReady(_))
    }

    /// Whether the data channel is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed(_) | Self::Negotiation(_))
    }
}

impl From<webrtc::Error> for PeerFetchError {
    fn from(err: webrtc::Error) -> Self {
        PeerFetchError::WebRtc(err.to_string())
    }
}

impl From<toml::de::Error> for PeerFetchError {
    fn from(err: toml::de::Error) -> Self {
        PeerFetchError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PeerFetchError {
    fn from(err: toml::ser::Error) -> Self {
        PeerFetchError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PeerFetchError::ChannelNotReady("connecting".into()).is_transient());
        assert!(!PeerFetchError::ChannelNotReady("connecting".into()).is_fatal());
        assert!(PeerFetchError::ChannelClosed("gone".into()).is_fatal());
        assert!(!PeerFetchError::Protocol("bad status".into()).is_fatal());
        assert!(!PeerFetchError::RequestInFlight.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = PeerFetchError::Protocol("unexpected status line: NOT-HTTP".into());
        assert_eq!(
            err.to_string(),
            "Protocol error: unexpected status line: NOT-HTTP"
        );
    }
}
