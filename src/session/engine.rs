//! Peer-connection seam.
//!
//! [`PeerEngine`] is the handful of offer/answer operations the negotiation
//! state machine needs. Asynchronous happenings (gathering finished, channel
//! open, connection lost) arrive separately as [`PeerEvent`]s on a queue
//! handed out when the engine is built.
//!
//! [`RtcEngine`] implements it over `webrtc`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::sdp::{SdpKind, SessionDescription};
use crate::config::IceConfig;
use crate::error::{PeerFetchError, Result};
use crate::transport::{OpenChannel, RtcChannel};

/// Asynchronous peer-connection happenings.
#[derive(Debug)]
pub enum PeerEvent {
    /// ICE gathering finished; the local description is final
    GatheringComplete,
    /// The remote peer's data channel opened
    ChannelOpen(OpenChannel),
    /// The connection failed or closed
    Failed(String),
}

/// Offer/answer operations on a peer connection.
pub trait PeerEngine: Send + Sync + 'static {
    /// Apply the remote offer.
    fn set_remote_description(
        &self,
        offer: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Create an answer to the applied offer.
    fn create_answer(&self)
        -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>>;

    /// Apply the answer locally, starting ICE gathering.
    fn set_local_description(
        &self,
        answer: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Current local description, candidates included.
    fn local_description(
        &self,
    ) -> Pin<Box<dyn Future<Output = Option<SessionDescription>> + Send + '_>>;

    /// Close the peer connection.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// [`PeerEngine`] over a `webrtc` peer connection.
pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
}

impl RtcEngine {
    /// Build a peer connection using `ice` servers.
    ///
    /// `low_watermark` becomes the buffered-amount-low threshold of the data
    /// channel the remote peer opens.
    pub async fn new(
        ice: &IceConfig,
        low_watermark: usize,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice
            .servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        let (events, rx) = mpsc::unbounded_channel();
        // The open channel, so a dead connection can close it.
        let open_channel: Arc<Mutex<Option<Arc<RtcChannel>>>> = Arc::new(Mutex::new(None));

        let tx = events.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            if state == RTCIceGathererState::Complete {
                tracing::debug!("ICE gathering complete");
                let _ = tx.send(PeerEvent::GatheringComplete);
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        let slot = open_channel.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if is_connection_lost(state) {
                let reason = format!("peer connection {}", state);
                tracing::info!(state = %state, "Peer connection lost");
                if let Ok(guard) = slot.lock() {
                    if let Some(channel) = guard.as_ref() {
                        channel.fail(&reason);
                    }
                }
                let _ = tx.send(PeerEvent::Failed(reason));
            } else if state == RTCPeerConnectionState::Disconnected {
                tracing::warn!("Peer connection disconnected, waiting for ICE to recover");
            } else {
                tracing::debug!(state = %state, "Peer connection state changed");
            }
            Box::pin(async {})
        }));

        let tx = events;
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            let slot = open_channel.clone();
            Box::pin(async move {
                tracing::info!(label = %dc.label(), "Remote data channel announced");
                let (channel_tx, channel_rx) = mpsc::unbounded_channel();
                let channel = RtcChannel::attach(dc.clone(), low_watermark, channel_tx).await;
                if let Ok(mut guard) = slot.lock() {
                    *guard = Some(channel.clone());
                }

                let pending = Arc::new(Mutex::new(Some(OpenChannel {
                    channel,
                    events: channel_rx,
                })));
                let deliver = move || {
                    let open = pending.lock().ok().and_then(|mut guard| guard.take());
                    if let Some(open) = open {
                        let _ = tx.send(PeerEvent::ChannelOpen(open));
                    }
                };

                let on_open = deliver.clone();
                dc.on_open(Box::new(move || {
                    on_open();
                    Box::pin(async {})
                }));
                if dc.ready_state() == RTCDataChannelState::Open {
                    deliver();
                }
            })
        }));

        Ok((Self { pc }, rx))
    }
}

impl PeerEngine for RtcEngine {
    fn set_remote_description(
        &self,
        offer: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let offer = to_rtc(offer)?;
            self.pc.set_remote_description(offer).await?;
            Ok(())
        })
    }

    fn create_answer(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>> {
        Box::pin(async move {
            let answer = self.pc.create_answer(None).await?;
            from_rtc(&answer)
        })
    }

    fn set_local_description(
        &self,
        answer: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let answer = to_rtc(answer)?;
            self.pc.set_local_description(answer).await?;
            Ok(())
        })
    }

    fn local_description(
        &self,
    ) -> Pin<Box<dyn Future<Output = Option<SessionDescription>> + Send + '_>> {
        Box::pin(async move {
            let description = self.pc.local_description().await?;
            from_rtc(&description).ok()
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.pc.close().await?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for RtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcEngine")
            .field("state", &self.pc.connection_state())
            .finish()
    }
}

/// Whether `state` ends the connection for good.
///
/// `Disconnected` is not: ICE may still recover to `Connected`.
fn is_connection_lost(state: RTCPeerConnectionState) -> bool {
    matches!(
        state,
        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
    )
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let converted = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            return Err(PeerFetchError::Negotiation(
                "rollback descriptions are not supported".into(),
            ))
        }
    };
    converted.map_err(|e| PeerFetchError::Negotiation(format!("invalid session description: {e}")))
}

fn from_rtc(description: &RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(PeerFetchError::Negotiation(
                "session description has no type".into(),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    })
}
