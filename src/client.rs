//! Module with a minimal asynchronous HTTP client.
//!
//! [`HttpClient`] runs on the same [`EventLoop`] as everything else, built
//! on [`AsyncSocket`]'s delimiter and length based reads. It supports plain
//! `GET` requests with `Connection: close` semantics, enough for health
//! checks and loop-local service calls.

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::str;

use crate::event_loop::EventLoop;
use crate::header::Headers;
use crate::socket::AsyncSocket;
use crate::status_code::StatusCode;

type ResponseCallback = Box<dyn FnOnce(&mut EventLoop, io::Result<ClientResponse>)>;
type CallbackSlot = Rc<RefCell<Option<ResponseCallback>>>;
type SocketSlot = Rc<RefCell<Option<AsyncSocket>>>;

/// Response to a client request.
#[derive(Debug)]
pub struct ClientResponse {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ClientResponse {
    /// Returns the status code.
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Asynchronous HTTP client.
pub struct HttpClient;

impl HttpClient {
    /// Send a `GET` request for `path` to `addr`.
    ///
    /// `callback` is invoked on the loop thread with the complete response,
    /// or with the first error the request ran into. The connection is
    /// closed either way.
    pub fn get<F>(
        ev: &mut EventLoop,
        addr: SocketAddr,
        host: &str,
        path: &str,
        callback: F,
    ) -> io::Result<()>
    where
        F: FnOnce(&mut EventLoop, io::Result<ClientResponse>) + 'static,
    {
        let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        let socket_slot: SocketSlot = Rc::new(RefCell::new(None));
        let callback_slot: CallbackSlot = Rc::new(RefCell::new(Some(Box::new(callback))));

        let on_connected = {
            let socket_slot = Rc::clone(&socket_slot);
            let callback_slot = Rc::clone(&callback_slot);
            move |ev: &mut EventLoop, result: io::Result<()>| {
                if let Err(err) = result {
                    return deliver(ev, &socket_slot, &callback_slot, Err(err));
                }
                let socket = match socket_slot.borrow().clone() {
                    Some(socket) => socket,
                    None => return,
                };
                let written = {
                    let socket = socket.clone();
                    let socket_slot = Rc::clone(&socket_slot);
                    let callback_slot = Rc::clone(&callback_slot);
                    move |ev: &mut EventLoop| {
                        read_head(ev, socket, socket_slot, callback_slot);
                    }
                };
                socket.write(ev, request.as_bytes(), written);
            }
        };

        let socket = AsyncSocket::connect(ev, addr, on_connected)?;
        *socket_slot.borrow_mut() = Some(socket);
        Ok(())
    }
}

/// Read and parse the status line and headers, then read the body.
fn read_head(ev: &mut EventLoop, socket: AsyncSocket, socket_slot: SocketSlot, callback_slot: CallbackSlot) {
    let on_head = {
        let socket = socket.clone();
        move |ev: &mut EventLoop, result: io::Result<Vec<u8>>| {
            let (status, headers, content_length) = match result.and_then(|head| parse_head(&head))
            {
                Ok(head) => head,
                Err(err) => return deliver(ev, &socket_slot, &callback_slot, Err(err)),
            };
            if content_length == 0 {
                let response = ClientResponse { status, headers, body: Vec::new() };
                return deliver(ev, &socket_slot, &callback_slot, Ok(response));
            }
            let on_body = move |ev: &mut EventLoop, result: io::Result<Vec<u8>>| {
                let result = result.map(|body| ClientResponse { status, headers, body });
                deliver(ev, &socket_slot, &callback_slot, result);
            };
            socket.read_bytes(ev, content_length, on_body);
        }
    };
    socket.read_until(ev, b"\r\n\r\n", on_head);
}

/// Close the connection and invoke the final callback, both exactly once.
fn deliver(
    ev: &mut EventLoop,
    socket_slot: &SocketSlot,
    callback_slot: &CallbackSlot,
    result: io::Result<ClientResponse>,
) {
    if let Some(socket) = socket_slot.borrow_mut().take() {
        socket.close(ev);
    }
    if let Some(callback) = callback_slot.borrow_mut().take() {
        callback(ev, result);
    }
}

fn parse_head(head: &[u8]) -> io::Result<(StatusCode, Headers, usize)> {
    let head = str::from_utf8(head).map_err(invalid_response)?;
    let mut lines = head.split("\r\n");
    let status_line = lines.next().ok_or_else(|| invalid_response("empty head"))?;

    // Status line: `HTTP/1.x CODE PHRASE`.
    let mut tokens = status_line.splitn(3, ' ');
    let version = tokens.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(invalid_response(status_line.to_string()));
    }
    let status = tokens
        .next()
        .and_then(|code| code.parse().ok())
        .map(StatusCode)
        .ok_or_else(|| invalid_response(status_line.to_string()))?;

    let mut headers = Headers::new();
    for line in lines.filter(|line| !line.is_empty()) {
        match line.split_once(':') {
            Some((name, value)) => headers.add(name, value.trim_start_matches([' ', '\t'])),
            None => return Err(invalid_response(line.to_string())),
        }
    }
    let content_length = match headers.get("content-length") {
        Some(value) => value.trim().parse().map_err(invalid_response)?,
        None => 0,
    };
    Ok((status, headers, content_length))
}

fn invalid_response<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err.into())
}
