//! Module with the incremental HTTP request parser.
//!
//! [`PartialRequest`] is a state machine fed by repeated [`parse`] calls, one
//! per read, with the input split at arbitrary byte boundaries. The request
//! line, headers and body may each arrive across any number of calls; the
//! reconstructed [`Request`] does not depend on how the input was split.
//!
//! [`parse`]: PartialRequest::parse

use std::{mem, str};

use crate::header::Headers;
use crate::method::Method;
use crate::request::{parse_query, Request};
use crate::version::Version;

/// Default maximum length of a request or header line in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

/// Result of a single [`PartialRequest::parse`] call.
#[derive(Debug)]
pub enum Outcome {
    /// More input is needed.
    Incomplete,
    /// The request is complete. Bytes beyond the declared body length were
    /// not consumed, see [`PartialRequest::take_remainder`].
    Complete(Request),
    /// The input is not a valid HTTP request. Terminal, all further input is
    /// dropped. Callers should dispatch [`Request::is_malformed`] and answer
    /// with a 400 class response.
    Malformed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    RequestLine,
    Header,
    Body,
    Complete,
    Malformed,
}

/// Incrementally parsed HTTP request.
pub struct PartialRequest {
    state: State,
    /// Unconsumed input.
    buf: Vec<u8>,
    max_line_length: usize,
    method: Method,
    path: String,
    version: Version,
    parameters: Vec<(String, String)>,
    headers: Headers,
    content_length: usize,
    body: Vec<u8>,
}

impl PartialRequest {
    /// Create an empty `PartialRequest` with the default line length limit.
    pub fn new() -> PartialRequest {
        PartialRequest::with_limit(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create an empty `PartialRequest` that treats any line longer than
    /// `max_line_length` bytes as malformed.
    pub fn with_limit(max_line_length: usize) -> PartialRequest {
        PartialRequest {
            state: State::RequestLine,
            buf: Vec::new(),
            max_line_length,
            method: Method::Get,
            path: String::new(),
            version: Version::Http11,
            parameters: Vec::new(),
            headers: Headers::new(),
            content_length: 0,
            body: Vec::new(),
        }
    }

    /// Feed `bytes` to the parser.
    ///
    /// Can be called any number of times, each call picks up where the
    /// previous one left off. Once it returned [`Outcome::Malformed`] it
    /// always will.
    pub fn parse(&mut self, bytes: &[u8]) -> Outcome {
        if self.state == State::Malformed {
            return Outcome::Malformed;
        }
        self.buf.extend_from_slice(bytes);

        loop {
            match self.state {
                State::RequestLine => match self.take_line() {
                    LineOutcome::Line(line) => {
                        if !self.parse_request_line(&line) {
                            return self.malform();
                        }
                        self.state = State::Header;
                    }
                    LineOutcome::Partial => {
                        // Reject binary junk before the line terminator
                        // arrives, four garbage bytes are enough to give up.
                        if self.buf.iter().any(|&byte| !is_request_line_byte(byte)) {
                            return self.malform();
                        }
                        return Outcome::Incomplete;
                    }
                    LineOutcome::TooLong => return self.malform(),
                },
                State::Header => match self.take_line() {
                    LineOutcome::Line(line) => {
                        if line.is_empty() {
                            if !self.finish_headers() {
                                return self.malform();
                            }
                        } else if !self.parse_header_line(&line) {
                            return self.malform();
                        }
                    }
                    LineOutcome::Partial => return Outcome::Incomplete,
                    LineOutcome::TooLong => return self.malform(),
                },
                State::Body => {
                    let needed = self.content_length - self.body.len();
                    let take = needed.min(self.buf.len());
                    self.body.extend_from_slice(&self.buf[..take]);
                    self.buf.drain(..take);
                    if self.body.len() < self.content_length {
                        return Outcome::Incomplete;
                    }
                    self.state = State::Complete;
                }
                State::Complete => return Outcome::Complete(self.build_request()),
                State::Malformed => return Outcome::Malformed,
            }
        }
    }

    /// Returns the unconsumed bytes that followed the completed request,
    /// e.g. a pipelined next request. Leaves the parser empty.
    pub fn take_remainder(&mut self) -> Vec<u8> {
        mem::take(&mut self.buf)
    }

    fn take_line(&mut self) -> LineOutcome {
        match find_crlf(&self.buf) {
            Some(index) => {
                if index > self.max_line_length {
                    return LineOutcome::TooLong;
                }
                let line = match str::from_utf8(&self.buf[..index]) {
                    Ok(line) => line.to_string(),
                    Err(_) => return LineOutcome::TooLong,
                };
                self.buf.drain(..index + 2);
                LineOutcome::Line(line)
            }
            None if self.buf.len() > self.max_line_length => LineOutcome::TooLong,
            None => LineOutcome::Partial,
        }
    }

    fn parse_request_line(&mut self, line: &str) -> bool {
        if line.bytes().any(|byte| !is_request_line_byte(byte)) {
            return false;
        }
        let mut tokens = line.split_whitespace();
        let (method, target, version) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(target), Some(version)) if tokens.next().is_none() => {
                (method, target, version)
            }
            _ => return false,
        };
        self.method = match method.parse() {
            Ok(method) => method,
            Err(_) => return false,
        };
        self.version = match version.parse() {
            Ok(version) => version,
            Err(_) => return false,
        };
        match target.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.parameters = parse_query(query);
            }
            None => self.path = target.to_string(),
        }
        !self.path.is_empty()
    }

    fn parse_header_line(&mut self, line: &str) -> bool {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header's value.
            return self.headers.append_to_last(line);
        }
        match line.split_once(':') {
            Some((name, value)) if !name.is_empty() => {
                self.headers.add(name, value.trim_start_matches([' ', '\t']));
                true
            }
            _ => false,
        }
    }

    fn finish_headers(&mut self) -> bool {
        self.content_length = match self.headers.get("content-length") {
            Some(value) => match value.trim().parse() {
                Ok(length) => length,
                Err(_) => return false,
            },
            None => 0,
        };
        self.state = if self.content_length == 0 {
            State::Complete
        } else {
            State::Body
        };
        true
    }

    fn build_request(&mut self) -> Request {
        // Reset for the next request; unconsumed input stays in `buf`.
        self.state = State::RequestLine;
        self.content_length = 0;
        let headers = mem::replace(&mut self.headers, Headers::EMPTY);
        let keep_alive = match headers.get("connection") {
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
            Some(value) if value.eq_ignore_ascii_case("close") => false,
            _ => self.version != Version::Http10,
        };
        Request {
            method: self.method,
            path: mem::take(&mut self.path),
            version: self.version,
            headers,
            parameters: mem::take(&mut self.parameters),
            body: mem::take(&mut self.body),
            keep_alive,
            captures: Vec::new(),
            malformed: false,
        }
    }

    fn malform(&mut self) -> Outcome {
        self.state = State::Malformed;
        self.buf.clear();
        Outcome::Malformed
    }
}

impl Default for PartialRequest {
    fn default() -> PartialRequest {
        PartialRequest::new()
    }
}

enum LineOutcome {
    Line(String),
    Partial,
    TooLong,
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

/// Printable ASCII, or part of the CRLF terminator.
const fn is_request_line_byte(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7e | b'\r' | b'\n')
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod parse_tests;
