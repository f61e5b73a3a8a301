//! Module with the HTTP response type.

use std::fmt::{self, Write};
use std::mem;
use std::time::SystemTime;

use mio::Token;
use sha2::{Digest, Sha256};

use crate::buffer::DynamicBuffer;
use crate::event_loop::EventLoop;
use crate::server;
use crate::status_code::StatusCode;

/// Value of the `Server` header.
const SERVER: &str = concat!("hearth/", env!("CARGO_PKG_VERSION"));

const BODY_BUFFER_CAPACITY: usize = 1024;

/// In-progress HTTP response.
///
/// Bytes passed to [`write`] accumulate in a buffer; the status line and
/// headers are computed once, when the response is first sent out. Two ways
/// to send:
///
/// * [`finish`] without a preceding [`flush`]: the whole response goes out in
///   one piece, with `Content-Length` and `Etag` computed from the buffered
///   body.
/// * [`flush`]: sends the headers (without a length) and everything buffered
///   so far, allowing a body to be streamed in multiple pieces. A flushed
///   response always closes the connection, its length is unknown to the
///   peer.
///
/// A `Response` is not tied to the loop thread, so a handler can move it into
/// a timeout or deferred callback and [`finish`] it later.
///
/// [`write`]: Response::write
/// [`finish`]: Response::finish
/// [`flush`]: Response::flush
pub struct Response {
    token: Token,
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: DynamicBuffer,
    headers_sent: bool,
    keep_alive: bool,
}

impl Response {
    pub(crate) fn new(token: Token, keep_alive: bool) -> Response {
        Response {
            token,
            status: StatusCode::OK,
            headers: Vec::new(),
            body: DynamicBuffer::with_capacity(BODY_BUFFER_CAPACITY),
            headers_sent: false,
            keep_alive,
        }
    }

    /// Returns the status code, defaults to 200 OK.
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Set a header, replacing any previously set value for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Append `bytes` to the response body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.put(bytes);
    }

    /// Send the headers (if not yet sent) and everything buffered so far.
    ///
    /// After a flush the response body length is unknown to the peer, so the
    /// connection always closes once the response is finished.
    pub fn flush(&mut self, ev: &mut EventLoop) {
        self.keep_alive = false;
        if !self.headers_sent {
            self.headers_sent = true;
            let head = self.serialize_head(None, None);
            self.body.prepend(&head);
        }
        let bytes = self.body.written().to_vec();
        self.body.clear();
        server::send(ev, self.token, bytes);
    }

    /// Complete the response.
    ///
    /// Without a preceding [`flush`] this computes `Content-Length` and
    /// `Etag` from the buffered body and sends the response in one piece.
    /// Once everything has been written the connection is closed, or kept
    /// open for the next request if both peers asked for keep-alive.
    ///
    /// [`flush`]: Response::flush
    pub fn finish(mut self, ev: &mut EventLoop) {
        if self.headers_sent {
            let bytes = self.body.written().to_vec();
            server::request_done(ev, self.token, bytes, false);
            return;
        }
        let etag = match self.body.position() {
            0 => None,
            _ => Some(etag(self.body.written())),
        };
        let head = self.serialize_head(Some(self.body.position()), etag.as_deref());
        self.body.prepend(&head);
        let body = mem::replace(&mut self.body, DynamicBuffer::with_capacity(0));
        server::request_done(ev, self.token, body.written().to_vec(), self.keep_alive);
    }

    fn serialize_head(&self, content_length: Option<usize>, etag: Option<&str>) -> Vec<u8> {
        let mut head = String::with_capacity(128);
        let mut buf = itoa::Buffer::new();
        head.push_str("HTTP/1.1 ");
        head.push_str(buf.format(self.status.0));
        head.push(' ');
        head.push_str(self.status.phrase());
        head.push_str("\r\nServer: ");
        head.push_str(SERVER);
        head.push_str("\r\nDate: ");
        head.push_str(&httpdate::fmt_http_date(SystemTime::now()));
        head.push_str("\r\nConnection: ");
        head.push_str(if self.keep_alive { "Keep-Alive" } else { "Close" });
        head.push_str("\r\n");
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if let Some(length) = content_length {
            head.push_str("Content-Length: ");
            head.push_str(buf.format(length));
            head.push_str("\r\n");
        }
        if let Some(etag) = etag {
            head.push_str("Etag: \"");
            head.push_str(etag);
            head.push_str("\"\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("body (bytes)", &self.body.position())
            .field("headers_sent", &self.headers_sent)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Hex encoded SHA-256 digest of `body`.
pub(crate) fn etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut etag = String::with_capacity(2 * digest.len());
    for byte in digest {
        let _ = write!(etag, "{byte:02x}");
    }
    etag
}
