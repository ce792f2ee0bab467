//! The request/response protocol spoken over the data channel.
//!
//! A page fetch is a single exchange on an otherwise idle channel. There is
//! no request identifier, so exactly one exchange is in flight at a time.
//!
//! # Wire Format
//!
//! Frame kind is the carrier's message type: a text frame carries a UTF-8
//! string, a binary frame carries at most one MTU of bytes.
//!
//! ```text
//! Client                                          Peer
//!    |                                              |
//!    |--- text: "GET / HTTP/1.1\nk: v\n\n" -------->|  preamble, MTU-sliced
//!    |--- binary: body slice ---------------------->|  0..n slices
//!    |--- binary: <empty> ------------------------->|  end of body
//!    |--- text: "" -------------------------------->|  terminator
//!    |                                              |
//!    |<-- text: "HTTP/1.1 200 OK\nk: v\n\n" --------|  preamble
//!    |<-- binary: body slice -----------------------|  0..n slices
//!    |<-- binary: <empty> or text: "" --------------|  end of body
//!    |                                              |
//!    |--- text: "" -------------------------------->|  EOF ack (optional)
//! ```
//!
//! A text frame that arrives while a body is streaming ends that body. Every
//! byte of a multipart body therefore travels in binary frames, framing
//! lines included.
//!
//! # Modules
//!
//! | Module       | Role                                               |
//! |--------------|----------------------------------------------------|
//! | `headers`    | Ordered, case-preserving header multimap           |
//! | `preamble`   | Request line / status line and header block codec  |
//! | `message`    | `Request`, `Body`, `Response`, progress reporting  |
//! | `multipart`  | Streaming `multipart/form-data` encoder            |
//! | `assembler`  | Inbound frame state machine and body reader        |

pub mod assembler;
pub mod headers;
pub mod message;
pub mod multipart;
pub mod preamble;

pub use assembler::{Assembler, BodyReader, Inflight, Phase};
pub use headers::{attachment_filename, Headers};
pub use message::{Body, Progress, ProgressObserver, Request, RequestBuilder, Response};
pub use multipart::{FieldValue, FilePart, Form, FormField, MultipartEncoder};
pub use preamble::{
    decode_request_head, decode_response_head, encode_request_head, encode_response_head,
    parse_headers, parse_status_line, RequestHead, ResponseHead,
};

/// Protocol version on every request and status line
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Largest binary frame payload in bytes
pub const DATA_CHANNEL_MTU: usize = 16384;

/// Buffered amount at or below which sending resumes (1 MTU)
pub const BUFFERED_AMOUNT_LOW_THRESHOLD: usize = DATA_CHANNEL_MTU;

/// Sizing cap for the outbound buffer (8 MTU). Not enforced as a limit.
pub const MAX_BUFFERED_AMOUNT: usize = 8 * DATA_CHANNEL_MTU;

/// Boundary literal shared by both peers for `multipart/form-data` bodies
pub const MULTIPART_BOUNDARY: &str = "peerfetch-form-boundary-4b1d2e";

/// Header carrying the opaque session token on every request
pub const AUTH_HEADER: &str = "X-HTTPOverWebRTC-Authorization";

/// Session description attribute carrying the token (`a=BasicAuthToken:<token>`)
pub const AUTH_TOKEN_ATTRIBUTE: &str = "BasicAuthToken";

/// Default `User-Agent` for requests that carry none
pub fn default_user_agent() -> String {
    format!("peerfetch/{}", crate::VERSION)
}
