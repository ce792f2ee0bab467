//! Negotiation state machine.
//!
//! A [`PeerSession`] turns one remote offer into an open, authenticated data
//! channel. Negotiation happens once per session and produces two
//! independent completion signals:
//!
//! - **answer**: the local description, ready to relay to the remote peer
//!   once ICE gathering has finished;
//! - **established**: a [`Transport`] over the data channel the remote peer
//!   opens.
//!
//! ## Flow
//!
//! ```text
//! caller                  PeerSession                     PeerEngine
//!    |  answer_offer(offer)    |                               |
//!    |------------------------>|  set_remote_description ----->|
//!    |<-- Negotiation ---------|  create_answer -------------->|
//!    |                         |  set_local_description ------>|
//!    |                         |<---------- GatheringComplete -|
//!    |<-- answer resolves -----|  local_description ---------->|
//!    |   (relay out of band)   |                               |
//!    |                         |<---------- ChannelOpen -------|
//!    |<-- established resolves-|                               |
//! ```
//!
//! Any engine error, or a `Failed` event before the channel opens, rejects
//! both signals and moves the session to `Failed`. A `Failed` event after
//! the channel opened closes the connection; the transport has already seen
//! its channel die.

pub mod engine;
pub mod sdp;
pub mod signal;
pub mod state;

pub use engine::{PeerEngine, PeerEvent, RtcEngine};
pub use sdp::{SdpKind, SessionDescription, SignalingPayload};
pub use signal::{Resolver, Signal};
pub use state::NegotiationPhase;

use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{PeerFetchError, Result};
use crate::transport::{Transport, TransportConfig};

/// The two completion signals of one negotiation.
#[derive(Debug, Clone)]
pub struct Negotiation {
    /// Resolves to the local answer once ICE gathering completes
    pub answer: Signal<SessionDescription>,
    /// Resolves to a transport once the data channel opens
    pub established: Signal<Transport>,
}

/// One peer connection and its single negotiation attempt.
pub struct PeerSession {
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    negotiation: OnceLock<Negotiation>,
}

struct Shared {
    id: String,
    engine: Arc<dyn PeerEngine>,
    phase: Mutex<NegotiationPhase>,
    config: TransportConfig,
}

impl PeerSession {
    /// Session over `engine`, whose events arrive on `events`.
    pub fn new(
        engine: Arc<dyn PeerEngine>,
        events: mpsc::UnboundedReceiver<PeerEvent>,
        config: TransportConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: uuid::Uuid::new_v4().to_string(),
                engine,
                phase: Mutex::new(NegotiationPhase::Idle),
                config,
            }),
            events: Mutex::new(Some(events)),
            negotiation: OnceLock::new(),
        }
    }

    /// Session over a new `webrtc` peer connection.
    pub async fn connect_rtc(config: &Config) -> Result<Self> {
        config.transport.validate()?;
        let (engine, events) = RtcEngine::new(&config.ice, config.transport.low_watermark).await?;
        Ok(Self::new(Arc::new(engine), events, config.transport.clone()))
    }

    /// Session ID, for log correlation
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Current phase
    pub fn phase(&self) -> NegotiationPhase {
        self.shared.phase()
    }

    /// Accept the remote offer and start negotiating.
    ///
    /// Only the first call negotiates. Later calls return the same two
    /// signals, already settled or still pending, without touching the
    /// peer connection again.
    pub fn answer_offer(&self, offer: SessionDescription) -> Negotiation {
        let mut started = false;
        let negotiation = self
            .negotiation
            .get_or_init(|| {
                started = true;
                self.start(offer)
            })
            .clone();
        if !started {
            tracing::debug!(session = %self.shared.id, "Negotiation already started");
        }
        negotiation
    }

    fn start(&self, offer: SessionDescription) -> Negotiation {
        let (answer_tx, answer) = signal::signal();
        let (established_tx, established) = signal::signal();
        let negotiation = Negotiation {
            answer,
            established,
        };

        let events = self.events.lock().ok().and_then(|mut guard| guard.take());
        let Some(events) = events else {
            let reason = "peer event queue unavailable";
            self.shared.fail(reason, &answer_tx, &established_tx);
            return negotiation;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let reason = "no async runtime to negotiate on";
            self.shared.fail(reason, &answer_tx, &established_tx);
            return negotiation;
        };

        tracing::info!(session = %self.shared.id, "Negotiating");
        let shared = self.shared.clone();
        handle.spawn(async move {
            shared.drive(offer, events, answer_tx, established_tx).await;
        });
        negotiation
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.shared.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn phase(&self) -> NegotiationPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(NegotiationPhase::Failed)
    }

    fn advance(&self, next: NegotiationPhase) -> Result<()> {
        let mut phase = self
            .phase
            .lock()
            .map_err(|_| PeerFetchError::Negotiation("session state poisoned".into()))?;
        let from = *phase;
        if !from.can_transition_to(next) {
            return Err(PeerFetchError::Negotiation(format!(
                "Cannot move from {} to {}",
                from, next
            )));
        }
        tracing::debug!(session = %self.id, from = %from, to = %next, "Negotiation phase");
        *phase = next;
        Ok(())
    }

    fn fail(
        &self,
        reason: &str,
        answer: &Resolver<SessionDescription>,
        established: &Resolver<Transport>,
    ) {
        if let Ok(mut phase) = self.phase.lock() {
            if phase.can_transition_to(NegotiationPhase::Failed) {
                *phase = NegotiationPhase::Failed;
            }
        }
        tracing::warn!(session = %self.id, reason, "Negotiation failed");
        answer.reject(reason);
        established.reject(reason);
    }

    async fn drive(
        &self,
        offer: SessionDescription,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
        answer: Resolver<SessionDescription>,
        established: Resolver<Transport>,
    ) {
        let auth_token = offer.auth_token();
        if auth_token.is_some() {
            tracing::debug!(session = %self.id, "Offer carries a session token");
        }

        if let Err(err) = self.negotiate(offer).await {
            self.fail(&err.to_string(), &answer, &established);
            self.close_engine().await;
            return;
        }

        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::GatheringComplete => {
                    if answer.is_settled() {
                        continue;
                    }
                    match self.engine.local_description().await {
                        Some(local) => {
                            tracing::info!(session = %self.id, "Answer ready");
                            answer.resolve(local);
                        }
                        None => {
                            self.fail("no local description after gathering", &answer, &established);
                            self.close_engine().await;
                            return;
                        }
                    }
                }
                PeerEvent::ChannelOpen(open) => {
                    if let Err(err) = self.advance(NegotiationPhase::ChannelOpen) {
                        tracing::warn!(session = %self.id, error = %err, "Ignoring data channel");
                        continue;
                    }
                    tracing::info!(session = %self.id, "Data channel open");
                    let transport = Transport::new(open, self.config.clone(), auth_token.clone());
                    established.resolve(transport);
                }
                PeerEvent::Failed(reason) => {
                    if self.phase() == NegotiationPhase::ChannelOpen {
                        tracing::info!(session = %self.id, reason = %reason, "Connection lost");
                    } else {
                        self.fail(&reason, &answer, &established);
                    }
                    self.close_engine().await;
                    return;
                }
            }
        }

        if !established.is_settled() {
            self.fail("peer connection dropped", &answer, &established);
        }
    }

    async fn close_engine(&self) {
        if let Err(err) = self.engine.close().await {
            tracing::warn!(session = %self.id, error = %err, "Failed to close peer connection");
        }
    }

    async fn negotiate(&self, offer: SessionDescription) -> Result<()> {
        self.engine.set_remote_description(offer).await?;
        self.advance(NegotiationPhase::RemoteDescriptionSet)?;

        let answer = self.engine.create_answer().await?;
        self.advance(NegotiationPhase::AnswerCreated)?;

        self.engine.set_local_description(answer).await?;
        self.advance(NegotiationPhase::LocalDescriptionSet)?;

        self.advance(NegotiationPhase::IceGathering)
    }
}
