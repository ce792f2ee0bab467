//! End-to-end negotiation tests.
//!
//! A [`PeerSession`] is driven by a scripted peer engine; the data channel it
//! "opens" is the in-memory peer from the transport suite.

mod common;

use std::time::Duration;

use common::{eof, text, MockChannel, MockEngine};
use peerfetch::protocol::AUTH_HEADER;
use peerfetch::session::PeerEvent;
use peerfetch::transport::Frame;
use peerfetch::{
    NegotiationPhase, PeerFetchError, PeerSession, Request, SessionDescription, TransportConfig,
};
use tokio::time::timeout;

const OFFER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\na=BasicAuthToken:tok-123\r\n";

fn config() -> TransportConfig {
    TransportConfig::default().with_user_agent("peerfetch-test/1.0")
}

#[tokio::test]
async fn test_answer_then_established() {
    let (engine, events, rx) = MockEngine::new();
    let session = PeerSession::new(engine.clone(), rx, config());
    assert_eq!(session.phase(), NegotiationPhase::Idle);

    let negotiation = session.answer_offer(SessionDescription::offer(OFFER_SDP));

    events.send(PeerEvent::GatheringComplete).unwrap();
    let answer = timeout(Duration::from_secs(5), negotiation.answer.wait())
        .await
        .expect("answer timed out")
        .unwrap();
    assert!(answer.sdp.contains("a=candidate:"));
    assert!(answer.to_json().unwrap().contains("\"type\": \"answer\""));
    assert!(!negotiation.established.is_settled());
    assert_eq!(session.phase(), NegotiationPhase::IceGathering);

    let (_channel, open) = MockChannel::new(Vec::new());
    events.send(PeerEvent::ChannelOpen(open)).unwrap();
    let transport = timeout(Duration::from_secs(5), negotiation.established.wait())
        .await
        .expect("channel timed out")
        .unwrap();
    assert!(transport.is_authenticated());
    assert_eq!(session.phase(), NegotiationPhase::ChannelOpen);
    assert_eq!(engine.remote_count(), 1);
}

#[tokio::test]
async fn test_answer_offer_is_idempotent() {
    let (engine, events, rx) = MockEngine::new();
    let session = PeerSession::new(engine.clone(), rx, config());

    let first = session.answer_offer(SessionDescription::offer(OFFER_SDP));
    let second = session.answer_offer(SessionDescription::offer("v=0\r\n"));

    events.send(PeerEvent::GatheringComplete).unwrap();
    let a = first.answer.wait().await.unwrap();
    let b = second.answer.wait().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(engine.remote_count(), 1);
    assert_eq!(engine.remote.lock().unwrap()[0].sdp, OFFER_SDP);

    // Settled signals stay settled for late callers.
    let third = session.answer_offer(SessionDescription::offer("v=0\r\n"));
    assert!(third.answer.is_settled());
}

#[tokio::test]
async fn test_engine_error_rejects_both_signals() {
    let (engine, _events, rx) = MockEngine::failing("malformed offer");
    let session = PeerSession::new(engine.clone(), rx, config());

    let negotiation = session.answer_offer(SessionDescription::offer("garbage"));
    let err = negotiation.answer.wait().await.unwrap_err();
    assert!(matches!(err, PeerFetchError::Negotiation(ref reason) if reason.contains("malformed offer")));
    let err = negotiation.established.wait().await.unwrap_err();
    assert!(matches!(err, PeerFetchError::Negotiation(_)));

    assert_eq!(session.phase(), NegotiationPhase::Failed);
    assert_eq!(engine.close_count(), 1);
}

#[tokio::test]
async fn test_connection_failure_before_open() {
    let (engine, events, rx) = MockEngine::new();
    let session = PeerSession::new(engine.clone(), rx, config());
    let negotiation = session.answer_offer(SessionDescription::offer(OFFER_SDP));

    events.send(PeerEvent::GatheringComplete).unwrap();
    negotiation.answer.wait().await.unwrap();

    events
        .send(PeerEvent::Failed("peer connection failed".into()))
        .unwrap();
    let err = negotiation.established.wait().await.unwrap_err();
    assert!(err.to_string().contains("peer connection failed"));
    assert_eq!(session.phase(), NegotiationPhase::Failed);
    // The answer had already resolved and keeps its value.
    assert!(negotiation.answer.peek().unwrap().is_ok());
}

#[tokio::test]
async fn test_dropped_engine_fails_negotiation() {
    let (engine, events, rx) = MockEngine::new();
    let session = PeerSession::new(engine, rx, config());
    let negotiation = session.answer_offer(SessionDescription::offer(OFFER_SDP));

    drop(events);
    let err = negotiation.established.wait().await.unwrap_err();
    assert!(matches!(err, PeerFetchError::Negotiation(_)));
    assert!(negotiation.answer.wait().await.is_err());
}

#[tokio::test]
async fn test_offer_token_reaches_requests() {
    let (engine, events, rx) = MockEngine::new();
    let session = PeerSession::new(engine, rx, config());
    let offer = SessionDescription::offer_from_json(
        &serde_json::json!({ "offer": { "type": "offer", "sdp": OFFER_SDP } }).to_string(),
    )
    .unwrap();
    let negotiation = session.answer_offer(offer);

    let (channel, open) = MockChannel::new(vec![vec![text("HTTP/1.1 204 No Content\n\n"), eof()]]);
    events.send(PeerEvent::ChannelOpen(open)).unwrap();
    let transport = negotiation.established.wait().await.unwrap();

    let response = transport.fetch(Request::get("/")).await.unwrap();
    assert_eq!(response.status().as_u16(), 204);
    response.bytes().await.unwrap();

    let Frame::Text(preamble) = &channel.sent()[0] else {
        panic!("expected text preamble");
    };
    assert!(preamble.contains(&format!("{AUTH_HEADER}: tok-123\n")));
}

#[tokio::test]
async fn test_failure_after_open_keeps_session_open() {
    let (engine, events, rx) = MockEngine::new();
    let session = PeerSession::new(engine.clone(), rx, config());
    let negotiation = session.answer_offer(SessionDescription::offer("v=0\r\n"));

    let (_channel, open) = MockChannel::new(Vec::new());
    events.send(PeerEvent::ChannelOpen(open)).unwrap();
    let transport = negotiation.established.wait().await.unwrap();
    assert!(!transport.is_authenticated());

    events
        .send(PeerEvent::Failed("peer connection closed".into()))
        .unwrap();
    for _ in 0..100 {
        if engine.close_count() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(engine.close_count(), 1);
    assert_eq!(session.phase(), NegotiationPhase::ChannelOpen);
    assert!(negotiation.established.peek().unwrap().is_ok());
}

#[tokio::test]
async fn test_close_error_after_failure_is_not_fatal() {
    let (engine, events, rx) = MockEngine::new();
    *engine.fail_close.lock().unwrap() = true;
    let session = PeerSession::new(engine.clone(), rx, config());
    let negotiation = session.answer_offer(SessionDescription::offer("v=0\r\n"));

    let (channel, open) = MockChannel::new(Vec::new());
    events.send(PeerEvent::ChannelOpen(open)).unwrap();
    let transport = negotiation.established.wait().await.unwrap();

    channel.close("peer connection failed");
    events
        .send(PeerEvent::Failed("peer connection failed".into()))
        .unwrap();
    for _ in 0..100 {
        if engine.close_count() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(engine.close_count(), 1);
    assert_eq!(session.phase(), NegotiationPhase::ChannelOpen);

    let err = transport.fetch(Request::get("/")).await.unwrap_err();
    assert!(matches!(err, PeerFetchError::ChannelClosed(_)), "{err}");
}
