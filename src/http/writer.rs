//! Response sinks — the destination a handler's status, headers and body
//! are written to before they are serialized onto the wire.
//!
//! [`ResponseWriter`] is the capability set every sink offers. The crate
//! ships one plain implementation, [`ResponseBuffer`], which collects the
//! response in memory; decorators such as
//! [`CachingWriter`](crate::cache::CachingWriter) wrap any `ResponseWriter`
//! and can stand in for it anywhere a sink is expected.

use std::io;

use bytes::BytesMut;
use tracing::warn;

use super::{Headers, Response, StatusCode};

/// Largest body a [`ResponseBuffer`] accepts by default (8 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// A destination for an HTTP response.
///
/// Headers may be modified until the response is finalized. `write_header`
/// commits the status; the first body write commits `200 OK` if no status
/// was written before it.
pub trait ResponseWriter: Send {
    /// Commits the response status.
    fn write_header(&mut self, status: StatusCode);

    /// Appends `data` to the response body, returning the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Appends a string to the response body.
    fn write_str(&mut self, data: &str) -> io::Result<usize> {
        self.write(data.as_bytes())
    }

    /// The headers that will be sent with the response.
    fn headers(&self) -> &Headers;

    /// Mutable access to the response headers.
    fn headers_mut(&mut self) -> &mut Headers;

    /// The status that is (or will be) sent.
    fn status(&self) -> StatusCode;

    /// Returns `true` once a status or any body bytes have been written.
    fn written(&self) -> bool;
}

/// An in-memory response sink with a bounded body size.
///
/// # Examples
///
/// ```
/// use respcache::http::{ResponseBuffer, ResponseWriter, StatusCode};
///
/// let mut sink = ResponseBuffer::new();
/// sink.headers_mut().insert("Content-Type", "application/json");
/// sink.write_header(StatusCode::Created);
/// sink.write(br#"{"id":1}"#).unwrap();
///
/// let response = sink.into_response();
/// assert_eq!(response.status(), StatusCode::Created);
/// assert_eq!(response.content(), br#"{"id":1}"#);
/// ```
#[derive(Debug)]
pub struct ResponseBuffer {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    written: bool,
    body_limit: usize,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    /// Creates an empty sink accepting up to [`DEFAULT_BODY_LIMIT`] body bytes.
    pub fn new() -> Self {
        Self::with_body_limit(DEFAULT_BODY_LIMIT)
    }

    /// Creates an empty sink accepting up to `body_limit` body bytes.
    pub fn with_body_limit(body_limit: usize) -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: BytesMut::new(),
            written: false,
            body_limit,
        }
    }

    /// The body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Finalizes the sink into a [`Response`].
    pub fn into_response(self) -> Response {
        Response::from_parts(self.status, self.headers, self.body.to_vec())
    }
}

impl ResponseWriter for ResponseBuffer {
    fn write_header(&mut self, status: StatusCode) {
        if self.written {
            warn!(
                current = %self.status,
                attempted = %status,
                "response status already written — ignoring"
            );
            return;
        }
        self.status = status;
        self.written = true;
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.body.len() + data.len() > self.body_limit {
            return Err(io::Error::other(format!(
                "response body exceeds limit of {} bytes",
                self.body_limit
            )));
        }
        self.written = true;
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn written(&self) -> bool {
        self.written
    }
}
