//! # peerfetch - HTTP over a WebRTC data channel
//!
//! Tunnels HTTP-shaped request/response exchanges over a peer-to-peer data
//! channel. Two peers swap an offer and an answer out of band; once the
//! data channel opens, every page fetch is encoded as a message stream on
//! that channel instead of a TCP/TLS socket.
//!
//! ## Features
//!
//! - **Negotiation**: offer in, answer and open transport out, as two
//!   independent completion signals
//! - **Framing**: text preamble plus MTU-sized binary body frames with an
//!   explicit end-of-body marker
//! - **Streaming bodies**: multipart uploads read files slice by slice;
//!   responses are pulled from the channel as the caller reads them
//! - **Flow control**: sending pauses above the buffered-amount low
//!   watermark and resumes on the channel's drain signal
//! - **Token auth**: a token embedded in the offer is attached to every
//!   request
//!
//! ## Protocol Overview
//!
//! ```text
//! Client (this crate)                               Peer (serves HTTP)
//!    |                                                    |
//!    |<======= offer (+ a=BasicAuthToken:...) ============|  out of band
//!    |======== answer ===================================>|  out of band
//!    |                                                    |
//!    |<------- data channel opens ------------------------|
//!    |                                                    |
//!    |-- text: request preamble ------------------------->|
//!    |-- binary: body ... , binary: <empty>, text: "" --->|
//!    |<- text: status preamble ---------------------------|
//!    |<- binary: body ... , binary: <empty> --------------|
//!    |-- text: "" (ack) --------------------------------->|
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use peerfetch::{Config, PeerSession, Request, SessionDescription};
//!
//! let config = Config::from_env();
//! let session = PeerSession::connect_rtc(&config).await?;
//!
//! let offer = SessionDescription::offer_from_json(&offer_json)?;
//! let negotiation = session.answer_offer(offer);
//!
//! // Relay the answer to the peer out of band.
//! let answer = negotiation.answer.wait().await?;
//! println!("{}", answer.to_json()?);
//!
//! let transport = negotiation.established.wait().await?;
//! let response = transport.fetch(Request::get("/")).await?;
//! println!("{}", response.text().await?);
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Header codec, messages, multipart encoder, response assembler
//! - [`transport`]: Data-channel seam, chunk pump, fetch facade
//! - [`session`]: Negotiation state machine and signaling payloads
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::{Config, IceConfig, IceServer};
pub use error::{PeerFetchError, Result};
pub use protocol::{Body, FilePart, Form, Headers, Progress, ProgressObserver, Request, Response};
pub use session::{Negotiation, NegotiationPhase, PeerSession, SessionDescription, Signal};
pub use transport::{Transport, TransportConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
