//! Signaling payloads.
//!
//! Session descriptions travel out of band as JSON, either bare
//! (`{"type": "offer", "sdp": "..."}`) or wrapped in a [`SignalingPayload`]
//! (`{"offer": {...}, "answer": {...}}`). The offer may carry the session
//! token as an `a=BasicAuthToken:<token>` attribute line.

use serde::{Deserialize, Serialize};

use crate::error::{PeerFetchError, Result};
use crate::protocol::AUTH_TOKEN_ATTRIBUTE;

lazy_static::lazy_static! {
    /// `a=BasicAuthToken:<token>` on its own line
    static ref AUTH_TOKEN_LINE: regex::Regex = regex::Regex::new(&format!(
        r"(?m)^a={}:(\S+)\r?$",
        regex::escape(AUTH_TOKEN_ATTRIBUTE)
    ))
    .expect("valid auth token regex");
}

/// Session description kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer
    Offer,
    /// Answer
    Answer,
    /// Provisional answer
    Pranswer,
    /// Rollback
    Rollback,
}

/// A session description as exchanged over the signaling side channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Offer with `sdp`
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Answer with `sdp`
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Session token from the `a=BasicAuthToken:` attribute, if present.
    pub fn auth_token(&self) -> Option<String> {
        AUTH_TOKEN_LINE
            .captures(&self.sdp)
            .map(|caps| caps[1].to_string())
    }

    /// Parse an offer from either a bare description or a signaling
    /// payload carrying one.
    pub fn offer_from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json.trim())?;
        let description: Self = if value.get("type").is_some() {
            serde_json::from_value(value)?
        } else {
            let payload: SignalingPayload = serde_json::from_value(value)?;
            payload.offer.ok_or_else(|| {
                PeerFetchError::Negotiation("signaling payload has no offer".into())
            })?
        };
        if description.kind != SdpKind::Offer {
            return Err(PeerFetchError::Negotiation(format!(
                "expected an offer, got {:?}",
                description.kind
            )));
        }
        Ok(description)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl std::fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The SDP may carry the session token.
        f.debug_struct("SessionDescription")
            .field("kind", &self.kind)
            .field("sdp_len", &self.sdp.len())
            .finish()
    }
}

/// `{ offer, answer }` record exchanged over the side channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingPayload {
    /// Remote offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    /// Local answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\na=BasicAuthToken:s3cr3t-token\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";

    #[test]
    fn test_auth_token_extraction() {
        let offer = SessionDescription::offer(OFFER_SDP);
        assert_eq!(offer.auth_token().as_deref(), Some("s3cr3t-token"));

        let offer = SessionDescription::offer("v=0\r\na=ice-ufrag:abc\r\n");
        assert_eq!(offer.auth_token(), None);
    }

    #[test]
    fn test_token_must_start_line() {
        let offer = SessionDescription::offer("v=0\nx a=BasicAuthToken:nope\n");
        assert_eq!(offer.auth_token(), None);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&SessionDescription::answer("v=0")).unwrap();
        assert_eq!(json, r#"{"type":"answer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_offer_from_bare_and_payload() {
        let bare = r#"{"type":"offer","sdp":"v=0"}"#;
        assert_eq!(
            SessionDescription::offer_from_json(bare).unwrap(),
            SessionDescription::offer("v=0")
        );

        let payload = r#"{"offer":{"type":"offer","sdp":"v=1"}}"#;
        assert_eq!(
            SessionDescription::offer_from_json(payload).unwrap().sdp,
            "v=1"
        );

        let answer = r#"{"type":"answer","sdp":"v=0"}"#;
        assert!(matches!(
            SessionDescription::offer_from_json(answer),
            Err(PeerFetchError::Negotiation(_))
        ));
        assert!(SessionDescription::offer_from_json("{}").is_err());
        assert!(SessionDescription::offer_from_json("not json").is_err());
    }

    #[test]
    fn test_debug_hides_sdp() {
        let debug = format!("{:?}", SessionDescription::offer(OFFER_SDP));
        assert!(!debug.contains("s3cr3t"));
    }
}
