//! Requests and responses exchanged over the data channel.
//!
//! A [`Request`] carries one of a closed set of body kinds ([`Body`]); the
//! transport picks the encoder from the variant. A [`Response`] exposes its
//! body as a single-pass byte stream that is pulled from the channel as the
//! caller reads it.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use http::{Method, StatusCode};

use super::headers::{attachment_filename, Headers};
use super::multipart::Form;
use super::preamble::ResponseHead;
use crate::error::Result;

/// Request body.
#[derive(Default)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Raw bytes, sent as-is
    Bytes(Bytes),
    /// UTF-8 text
    Text(String),
    /// `application/x-www-form-urlencoded` pairs, in order
    Form(Vec<(String, String)>),
    /// `multipart/form-data` fields, streamed
    Multipart(Form),
}

impl Body {
    /// Content type implied by the body kind, if any.
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty | Self::Bytes(_) => None,
            Self::Text(_) => Some("text/plain;charset=UTF-8"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Multipart(_) => Some("multipart/form-data"),
        }
    }

    /// Whether this body carries no bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Text(s) => s.is_empty(),
            Self::Form(pairs) => pairs.is_empty(),
            Self::Multipart(_) => false,
        }
    }

    /// Encode an in-memory body. Multipart bodies are streamed by the
    /// transport and yield `None`.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Empty => Some(Bytes::new()),
            Self::Bytes(b) => Some(b.clone()),
            Self::Text(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Self::Form(pairs) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter())
                    .finish();
                Some(Bytes::from(encoded))
            }
            Self::Multipart(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Form(_) => "form",
            Self::Multipart(_) => "multipart",
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Self::Text(s) => write!(f, "Body::Text({} bytes)", s.len()),
            Self::Form(pairs) => write!(f, "Body::Form({} pairs)", pairs.len()),
            Self::Multipart(form) => write!(f, "Body::Multipart({} fields)", form.len()),
            Self::Empty => write!(f, "Body::Empty"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Form> for Body {
    fn from(form: Form) -> Self {
        Self::Multipart(form)
    }
}

/// An HTTP-shaped request.
#[derive(Debug)]
pub struct Request {
    /// Method, `GET` by default
    pub method: Method,
    /// Request target (path and query, or absolute URL)
    pub target: String,
    /// Headers as supplied
    pub headers: Headers,
    /// Body
    pub body: Body,
}

impl Request {
    /// `GET target` with no headers or body
    pub fn get(target: impl Into<String>) -> Self {
        Self::builder(Method::GET, target).build()
    }

    /// Start building a request
    pub fn builder(method: Method, target: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            request: Self {
                method,
                target: target.into(),
                headers: Headers::new(),
                body: Body::Empty,
            },
        }
    }

    /// Short description for logs (never includes header values)
    pub fn summary(&self) -> String {
        format!("{} {} ({} body)", self.method, self.target, self.body.kind())
    }
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.append(name, value);
        self
    }

    /// Append several headers
    pub fn headers<K: Into<String>, V: Into<String>>(
        mut self,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.request.headers.extend(headers);
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.request.body = body.into();
        self
    }

    /// Set a URL-encoded form body
    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        self.request.body = Body::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a multipart body
    pub fn multipart(mut self, form: Form) -> Self {
        self.request.body = Body::Multipart(form);
        self
    }

    /// Finish
    pub fn build(self) -> Request {
        self.request
    }
}

/// Body progress reported while a response is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Declared `Content-Length`, reported before any body bytes
    Total(u64),
    /// A chunk of this many bytes was delivered
    Received(usize),
    /// End of body
    Done,
}

/// Callback receiving [`Progress`] updates.
pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// An HTTP-shaped response with a streamed body.
pub struct Response {
    status: StatusCode,
    status_text: String,
    headers: Headers,
    body: BoxStream<'static, Result<Bytes>>,
}

impl Response {
    /// Build a response from a decoded head and a body stream.
    pub fn new(head: ResponseHead, body: BoxStream<'static, Result<Bytes>>) -> Self {
        Self {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body,
        }
    }

    /// Status code
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase as sent by the peer
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Whether the status is 2xx
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Response headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Declared `Content-Length`
    pub fn content_length(&self) -> Option<u64> {
        self.headers.content_length()
    }

    /// File name from an `attachment` Content-Disposition header
    pub fn attachment_filename(&self) -> Option<String> {
        self.headers
            .get("Content-Disposition")
            .and_then(attachment_filename)
    }

    /// Next body chunk, or `None` at end of body.
    pub async fn chunk(&mut self) -> Option<Result<Bytes>> {
        self.body.next().await
    }

    /// Take the body stream.
    pub fn into_body(self) -> BoxStream<'static, Result<Bytes>> {
        self.body
    }

    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read the whole body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn head(headers: Headers) -> ResponseHead {
        ResponseHead {
            status: StatusCode::OK,
            status_text: "OK".into(),
            headers,
        }
    }

    #[test]
    fn test_request_defaults() {
        let request = Request::get("/");
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.is_empty());
        assert!(matches!(request.body, Body::Empty));
    }

    #[test]
    fn test_builder() {
        let request = Request::builder(Method::POST, "/upload")
            .header("X-One", "1")
            .headers([("X-Two", "2")])
            .body("hello")
            .build();
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.body.to_bytes(), Some(Bytes::from_static(b"hello")));
        assert_eq!(request.summary(), "POST /upload (text body)");
    }

    #[test]
    fn test_form_body_is_url_encoded() {
        let request = Request::builder(Method::POST, "/login")
            .form([("user", "a b"), ("pass", "x&y=z")])
            .build();
        assert_eq!(
            request.body.to_bytes(),
            Some(Bytes::from_static(b"user=a+b&pass=x%26y%3Dz"))
        );
        assert_eq!(
            request.body.default_content_type(),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_body_content_types() {
        assert_eq!(Body::Empty.default_content_type(), None);
        assert_eq!(Body::from(vec![1u8, 2]).default_content_type(), None);
        assert_eq!(
            Body::from("x").default_content_type(),
            Some("text/plain;charset=UTF-8")
        );
        assert!(Body::Multipart(Form::new()).to_bytes().is_none());
    }

    #[tokio::test]
    async fn test_response_readers() {
        let headers: Headers = [
            ("Content-Length", "5"),
            ("Content-Disposition", "attachment; filename=\"hello.txt\""),
        ]
        .into_iter()
        .collect();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"he")),
            Ok(Bytes::from_static(b"llo")),
        ])
        .boxed();
        let response = Response::new(head(headers), body);

        assert!(response.ok());
        assert_eq!(response.content_length(), Some(5));
        assert_eq!(response.attachment_filename().as_deref(), Some("hello.txt"));
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_response_chunk() {
        let body = stream::iter(vec![Ok(Bytes::from_static(b"a"))]).boxed();
        let mut response = Response::new(head(Headers::new()), body);
        assert_eq!(response.chunk().await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert!(response.chunk().await.is_none());
    }
}
