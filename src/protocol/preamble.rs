//! Header/status codec.
//!
//! Pure text (de)serialization of the preamble that precedes every body on
//! the data channel. No I/O happens here.
//!
//! ```text
//! request:   "{METHOD} {target} HTTP/1.1\n" ("{key}: {value}\n")* "\n"
//! response:  "HTTP/1.1 {status} {reason}\n" ("{key}: {value}\n")* "\n"
//! ```

use http::{Method, StatusCode};
use regex::Regex;

use super::headers::Headers;
use super::HTTP_VERSION;
use crate::error::{PeerFetchError, Result};

lazy_static::lazy_static! {
    /// `HTTP/1.1 <status> <reason...>`
    static ref STATUS_LINE: Regex =
        Regex::new(r"^HTTP/1\.1 (\d{3})(?: (.*))?$").expect("valid status line regex");
}

/// Decoded request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method
    pub method: Method,
    /// Request target as sent
    pub target: String,
    /// Header block
    pub headers: Headers,
}

/// Decoded status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code
    pub status: StatusCode,
    /// Reason phrase (may be empty)
    pub status_text: String,
    /// Header block
    pub headers: Headers,
}

/// Encode a request preamble.
///
/// Appends `User-Agent: {user_agent}` when `headers` has none. Headers are
/// validated first so nothing malformed reaches the peer.
pub fn encode_request_head(
    method: &Method,
    target: &str,
    headers: &Headers,
    user_agent: &str,
) -> Result<String> {
    if target.is_empty() || target.contains(['\r', '\n', ' ']) {
        return Err(PeerFetchError::InvalidRequest(format!(
            "invalid request target {:?}",
            target
        )));
    }
    headers.validate()?;

    let mut out = format!("{} {} {}\n", method, target, HTTP_VERSION);
    for (key, value) in headers.iter() {
        out.push_str(&format!("{}: {}\n", key, value));
    }
    if !headers.contains("User-Agent") {
        out.push_str(&format!("User-Agent: {}\n", user_agent));
    }
    out.push('\n');
    Ok(out)
}

/// Decode a request preamble. Used by peers serving requests and in tests.
pub fn decode_request_head(text: &str) -> Result<RequestHead> {
    let (first, rest) = split_first_line(text);
    let mut parts = first.splitn(3, ' ');
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(PeerFetchError::Protocol(format!(
            "unexpected request line: {}",
            first
        )));
    };
    if version != HTTP_VERSION {
        return Err(PeerFetchError::Protocol(format!(
            "unexpected request line: {}",
            first
        )));
    }
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| PeerFetchError::Protocol(format!("invalid method: {}", method)))?;

    Ok(RequestHead {
        method,
        target: target.to_string(),
        headers: parse_headers(rest),
    })
}

/// Parse `HTTP/1.1 <status> <reason...>`.
pub fn parse_status_line(line: &str) -> Result<(StatusCode, String)> {
    let line = line.trim_end_matches('\r');
    let caps = STATUS_LINE
        .captures(line)
        .ok_or_else(|| PeerFetchError::Protocol(format!("unexpected status line: {}", line)))?;

    let code: u16 = caps[1]
        .parse()
        .map_err(|_| PeerFetchError::Protocol(format!("unexpected status line: {}", line)))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| PeerFetchError::Protocol(format!("invalid status code: {}", code)))?;
    let reason = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    Ok((status, reason.to_string()))
}

/// Parse `key:value` lines up to the first blank line.
///
/// The first colon splits key from value, both sides are trimmed, and lines
/// with no colon are skipped.
pub fn parse_headers(block: &str) -> Headers {
    let mut headers = Headers::new();
    for line in block.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            tracing::trace!(line, "Skipping header line without colon");
            continue;
        };
        headers.append(key.trim(), value.trim());
    }
    headers
}

/// Decode a response preamble (status line plus header block).
pub fn decode_response_head(text: &str) -> Result<ResponseHead> {
    let (first, rest) = split_first_line(text);
    let (status, status_text) = parse_status_line(first)?;
    Ok(ResponseHead {
        status,
        status_text,
        headers: parse_headers(rest),
    })
}

/// Encode a response preamble. Used by peers serving requests and in tests.
pub fn encode_response_head(status: StatusCode, reason: &str, headers: &Headers) -> String {
    let mut out = format!("{} {} {}\n", HTTP_VERSION, status.as_u16(), reason);
    for (key, value) in headers.iter() {
        out.push_str(&format!("{}: {}\n", key, value));
    }
    out.push('\n');
    out
}

/// Byte offset just past the blank line ending the preamble, if present.
pub fn preamble_end(text: &str) -> Option<usize> {
    text.find("\n\n").map(|i| i + 2)
}

fn split_first_line(text: &str) -> (&str, &str) {
    match text.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (text, ""),
    }
}
