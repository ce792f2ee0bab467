//! Streaming `multipart/form-data` encoder.
//!
//! [`MultipartEncoder`] yields the body as a sequence of chunks, each at most
//! one MTU. File contents are read one slice at a time; the next slice is
//! only read when the caller asks for the next chunk, so a caller that sends
//! each chunk before pulling the next never holds more than one slice.
//!
//! ```text
//! --{boundary}\r\n
//! Content-Disposition: form-data; name="{name}"[; filename="{file}"]\r\n
//! [Content-Type: {type}\r\n]
//! \r\n
//! {payload}\r\n
//! ...
//! --{boundary}--\r\n
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// Content type for attachments that declare none
pub const DEFAULT_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// An ordered set of form fields.
#[derive(Debug, Default)]
pub struct Form {
    fields: Vec<FormField>,
}

impl Form {
    /// Empty form
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain value field
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(FormField {
            name: name.into(),
            value: FieldValue::Text(value.into()),
        });
        self
    }

    /// Add a file attachment field
    pub fn file(mut self, name: impl Into<String>, part: FilePart) -> Self {
        self.fields.push(FormField {
            name: name.into(),
            value: FieldValue::File(part),
        });
        self
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the form has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in order
    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    /// `Content-Type` header value announcing `boundary`
    pub fn content_type(boundary: &str) -> String {
        format!("multipart/form-data; boundary={}", boundary)
    }
}

/// A named form field.
#[derive(Debug)]
pub struct FormField {
    /// Field name
    pub name: String,
    /// Field value
    pub value: FieldValue,
}

/// Form field value.
#[derive(Debug)]
pub enum FieldValue {
    /// Plain value
    Text(String),
    /// File attachment
    File(FilePart),
}

/// A file attachment read incrementally from any async reader.
pub struct FilePart {
    filename: String,
    content_type: Option<String>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl FilePart {
    /// Attachment named `filename` whose content comes from `reader`
    pub fn new(filename: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            reader: Box::new(reader),
        }
    }

    /// Attachment with in-memory content
    pub fn from_bytes(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::new(filename, std::io::Cursor::new(content.into()))
    }

    /// Open a file on disk, naming the part after the file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(filename, file))
    }

    /// Declare the attachment's content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// File name sent in Content-Disposition
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared content type, or the default
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or(DEFAULT_FILE_CONTENT_TYPE)
    }
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Pull-based encoder over a [`Form`].
pub struct MultipartEncoder {
    boundary: String,
    mtu: usize,
    fields: VecDeque<FormField>,
    current: Option<FilePart>,
    finished: bool,
}

impl MultipartEncoder {
    /// Encode `form` with `boundary`, yielding chunks of at most `mtu` bytes
    /// of file content.
    pub fn new(form: Form, boundary: impl Into<String>, mtu: usize) -> Self {
        Self {
            boundary: boundary.into(),
            mtu: mtu.max(1),
            fields: form.fields.into(),
            current: None,
            finished: false,
        }
    }

    /// Next chunk of the encoded body, or `None` once the closing boundary
    /// has been produced.
    ///
    /// Framing (boundary and part headers) and plain values come out as
    /// their own chunks; file content comes out in full MTU slices with a
    /// shorter final slice.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(part) = self.current.as_mut() {
            let slice = read_slice(&mut *part.reader, self.mtu).await?;
            if !slice.is_empty() {
                return Ok(Some(slice));
            }
            tracing::trace!(filename = %part.filename, "File part complete");
            self.current = None;
            return Ok(Some(Bytes::from_static(b"\r\n")));
        }

        match self.fields.pop_front() {
            Some(FormField {
                name,
                value: FieldValue::Text(value),
            }) => Ok(Some(Bytes::from(format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary,
                escape_quoted(&name),
                value
            )))),
            Some(FormField {
                name,
                value: FieldValue::File(part),
            }) => {
                let head = format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    self.boundary,
                    escape_quoted(&name),
                    escape_quoted(&part.filename),
                    part.content_type()
                );
                self.current = Some(part);
                Ok(Some(Bytes::from(head)))
            }
            None if !self.finished => {
                self.finished = true;
                Ok(Some(Bytes::from(format!("--{}--\r\n", self.boundary))))
            }
            None => Ok(None),
        }
    }
}

impl fmt::Debug for MultipartEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartEncoder")
            .field("boundary", &self.boundary)
            .field("mtu", &self.mtu)
            .field("remaining_fields", &self.fields.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Read until `mtu` bytes are buffered or the reader is exhausted.
async fn read_slice(reader: &mut (dyn AsyncRead + Send + Unpin), mtu: usize) -> Result<Bytes> {
    let mut buf = BytesMut::zeroed(mtu);
    let mut filled = 0;
    while filled < mtu {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf.freeze())
}

/// Percent-encode the characters that would end a quoted parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
