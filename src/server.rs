//! Module with the HTTP server.
//!
//! [`HttpServer`] binds a listener and runs an accept loop on its own
//! thread. Accepted connections are either handled on that same loop, or
//! handed off round-robin to a pool of worker loops, see
//! [`ServerConfig::with_workers`].
//!
//! [`ServerConfig::with_workers`]: crate::config::ServerConfig::with_workers

use std::any::Any;
use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use log::{debug, error, trace, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::buffer::DynamicBuffer;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::event_loop::{EventHandler, EventLoop, LoopHandle, Readiness};
use crate::parse::{Outcome, PartialRequest};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Application, Completion};
use crate::socket::flush_buffer;
use crate::worker::Worker;

const LISTEN_BACKLOG: i32 = 1024;
const WRITE_BUFFER_CAPACITY: usize = 1024;

/// HTTP server.
///
/// ```no_run
/// use hearth::{Application, EventLoop, HttpServer, Request, Response};
///
/// fn hello(_: &Request, response: &mut Response, _: &mut EventLoop) {
///     response.write(b"Hello world!");
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut app = Application::new();
/// app.add("/", hello)?;
/// let server = HttpServer::new(app).listen("127.0.0.1:8080".parse()?)?;
/// # server.stop();
/// # Ok(())
/// # }
/// ```
pub struct HttpServer {
    app: Arc<Application>,
    config: ServerConfig,
}

impl HttpServer {
    /// Create a server for `app` with the default configuration.
    pub fn new(app: Application) -> HttpServer {
        HttpServer {
            app: Arc::new(app),
            config: ServerConfig::default(),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ServerConfig) -> HttpServer {
        self.config = config;
        self
    }

    /// Bind to `addr` and start serving.
    ///
    /// Spawns the accept loop thread and, if configured, the worker threads.
    /// Returns once the server is accepting connections.
    pub fn listen(self, addr: SocketAddr) -> Result<ServerHandle, ServerError> {
        let mut listener = new_listener(addr).map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;

        let mut worker_handles = Vec::with_capacity(self.config.workers());
        let mut threads = Vec::with_capacity(self.config.workers() + 1);
        for id in 0..self.config.workers() {
            let worker = Worker::start(id, &self.config).map_err(ServerError::Worker)?;
            worker_handles.push(worker.handle);
            threads.push(worker.thread);
        }

        let (sender, receiver) = crossbeam_channel::bounded(1);
        let app = self.app;
        let config = self.config;
        let workers = worker_handles.clone();
        let thread = thread::Builder::new()
            .name(String::from("hearth_acceptor"))
            .spawn(move || {
                let mut ev = match EventLoop::with_config(&config) {
                    Ok(ev) => ev,
                    Err(err) => {
                        let _ = sender.send(Err(err));
                        return;
                    }
                };
                let token = match ev.register(&mut listener, Interest::READABLE) {
                    Ok(token) => token,
                    Err(err) => {
                        let _ = sender.send(Err(err));
                        return;
                    }
                };
                ev.insert_handler(
                    token,
                    Acceptor {
                        listener,
                        app,
                        config,
                        workers,
                        next: 0,
                    },
                );
                let _ = sender.send(Ok(ev.handle()));
                debug!("accepting connections: addr={local_addr}");
                if let Err(err) = ev.run() {
                    error!("accept loop failed: {err}");
                }
            })
            .map_err(ServerError::Accept)?;
        threads.push(thread);

        let acceptor = receiver
            .recv()
            .map_err(|_| {
                ServerError::Accept(io::Error::new(
                    io::ErrorKind::Other,
                    "accept loop thread died during startup",
                ))
            })?
            .map_err(ServerError::Accept)?;

        Ok(ServerHandle {
            local_addr,
            acceptor,
            workers: worker_handles,
            threads,
        })
    }
}

/// Handle to a running [`HttpServer`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    acceptor: LoopHandle,
    workers: Vec<LoopHandle>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Returns the address the server is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a handle to the accept loop, e.g. to schedule timeouts or
    /// callbacks on it.
    pub fn accept_loop(&self) -> &LoopHandle {
        &self.acceptor
    }

    /// Stop the server, waiting for all loop threads to shut down.
    pub fn stop(self) {
        debug!("stopping server: addr={}", self.local_addr);
        self.acceptor.stop();
        for worker in self.workers.iter() {
            worker.stop();
        }
        for thread in self.threads {
            if thread.join().is_err() {
                error!("server thread panicked");
            }
        }
    }
}

/// Create a non-blocking listener bound to `addr`.
fn new_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Accept loop handler.
///
/// Owns the listener; accepted streams are registered on this loop when no
/// workers are configured, otherwise they are handed to the workers
/// round-robin through their callback queues.
struct Acceptor {
    listener: TcpListener,
    app: Arc<Application>,
    config: ServerConfig,
    workers: Vec<LoopHandle>,
    next: usize,
}

impl EventHandler for Acceptor {
    fn ready(&mut self, ev: &mut EventLoop, _token: Token, _readiness: Readiness) -> io::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("error accepting connection: {err}");
                    return Ok(());
                }
            };
            trace!("accepted connection: peer={peer}");
            if self.workers.is_empty() {
                if let Err(err) = Connection::register(ev, stream, Arc::clone(&self.app), &self.config) {
                    warn!("error registering connection: {err}");
                }
            } else {
                let worker = &self.workers[self.next];
                self.next = (self.next + 1) % self.workers.len();
                let app = Arc::clone(&self.app);
                let config = self.config;
                worker.add_callback(move |ev| {
                    if let Err(err) = Connection::register(ev, stream, app, &config) {
                        warn!("error registering connection: {err}");
                    }
                });
            }
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.listener)
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// State of a single accepted connection.
///
/// Reads feed the incremental parser until a request completes, which is
/// then dispatched through a deferred callback (handlers must not run while
/// the connection is borrowed for event dispatch). While a request is being
/// handled further input is buffered in `pending` and resumed once the
/// response completes, which covers pipelined requests.
pub(crate) struct Connection {
    stream: TcpStream,
    token: Token,
    app: Arc<Application>,
    parser: PartialRequest,
    write_buf: DynamicBuffer,
    /// Bytes received while a request was in flight.
    pending: Vec<u8>,
    /// A request has been dispatched and its response is not finished.
    in_flight: bool,
    /// The in-flight response finished, close or re-arm once `write_buf`
    /// drains.
    response_done: bool,
    keep_alive_after_response: bool,
    eof: bool,
    interest: Interest,
    read_chunk_size: usize,
    max_line_length: usize,
}

impl Connection {
    /// Register `stream` with `ev` and arm its keep-alive timeout.
    pub(crate) fn register(
        ev: &mut EventLoop,
        mut stream: TcpStream,
        app: Arc<Application>,
        config: &ServerConfig,
    ) -> io::Result<()> {
        let token = ev.register(&mut stream, Interest::READABLE)?;
        ev.insert_handler(
            token,
            Connection {
                stream,
                token,
                app,
                parser: PartialRequest::with_limit(config.max_line_length()),
                write_buf: DynamicBuffer::with_capacity(WRITE_BUFFER_CAPACITY),
                pending: Vec::new(),
                in_flight: false,
                response_done: false,
                keep_alive_after_response: false,
                eof: false,
                interest: Interest::READABLE,
                read_chunk_size: config.read_chunk_size(),
                max_line_length: config.max_line_length(),
            },
        );
        ev.add_keep_alive_timeout(token, move |ev| {
            trace!("connection idle too long, closing: token={}", token.0);
            ev.close(token);
        });
        Ok(())
    }

    fn on_readable(&mut self, ev: &mut EventLoop) -> io::Result<()> {
        let mut chunk = vec![0; self.read_chunk_size];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    ev.touch(self.token);
                    if self.in_flight {
                        self.pending.extend_from_slice(&chunk[..n]);
                    } else {
                        self.feed(ev, &chunk[..n]);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        // Nothing in flight and nothing to write back, so the peer closing
        // its end closes the connection.
        if self.eof && !self.in_flight {
            ev.close(self.token);
        }
        Ok(())
    }

    /// Feed `bytes` to the parser, dispatching the request once complete.
    fn feed(&mut self, ev: &mut EventLoop, bytes: &[u8]) {
        match self.parser.parse(bytes) {
            Outcome::Incomplete => {}
            Outcome::Complete(request) => {
                self.in_flight = true;
                let remainder = self.parser.take_remainder();
                self.pending.extend_from_slice(&remainder);
                self.dispatch(ev, request);
            }
            Outcome::Malformed => {
                self.in_flight = true;
                self.pending.clear();
                self.dispatch(ev, Request::malformed());
            }
        }
    }

    /// Run the handler for `request` through a deferred callback, after
    /// event dispatch released its borrow on this connection.
    fn dispatch(&mut self, ev: &mut EventLoop, request: Request) {
        let token = self.token;
        let app = Arc::clone(&self.app);
        ev.add_callback(move |ev| dispatch(ev, token, &app, request));
    }

    /// Queue `bytes` for writing and try to flush them out.
    fn queue_write(&mut self, ev: &mut EventLoop, bytes: &[u8]) {
        self.write_buf.put(bytes);
        self.flush(ev);
    }

    fn flush(&mut self, ev: &mut EventLoop) {
        match flush_buffer(&mut self.write_buf, &mut self.stream) {
            Ok(true) => {
                if self.response_done {
                    self.complete_cycle(ev);
                } else {
                    self.update_interest(ev);
                }
            }
            Ok(false) => self.update_interest(ev),
            Err(err) => {
                debug!("error writing response, closing: token={}, {err}", self.token.0);
                ev.close(self.token);
            }
        }
    }

    /// The response has been fully written: close, or reset for the next
    /// request on this connection.
    fn complete_cycle(&mut self, ev: &mut EventLoop) {
        self.response_done = false;
        self.in_flight = false;
        if !self.keep_alive_after_response || self.eof {
            trace!("closing connection: token={}", self.token.0);
            ev.close(self.token);
            return;
        }
        ev.touch(self.token);
        self.parser = PartialRequest::with_limit(self.max_line_length);
        if !self.pending.is_empty() {
            let pending = mem::take(&mut self.pending);
            self.feed(ev, &pending);
        }
        self.update_interest(ev);
    }

    fn update_interest(&mut self, ev: &mut EventLoop) {
        let mut interest = Interest::READABLE;
        if !self.write_buf.is_empty() {
            interest = interest | Interest::WRITABLE;
        }
        if interest != self.interest {
            self.interest = interest;
            if let Err(err) = ev.registry().reregister(&mut self.stream, self.token, interest) {
                warn!("error updating connection interest: {err}");
                ev.close(self.token);
            }
        }
    }
}

impl EventHandler for Connection {
    fn ready(&mut self, ev: &mut EventLoop, _token: Token, readiness: Readiness) -> io::Result<()> {
        if readiness.readable || readiness.closed {
            self.on_readable(ev)?;
        }
        if readiness.writable {
            self.flush(ev);
        }
        Ok(())
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    fn as_any(&mut self) -> &mut dyn Any {
        self
    }
}

/// Resolve `request` to a handler and run it.
fn dispatch(ev: &mut EventLoop, token: Token, app: &Application, mut request: Request) {
    let keep_alive = request.keep_alive() && !request.is_malformed();
    let (handler, completion) = app.resolve(&mut request);
    let response = Response::new(token, keep_alive);
    let returned = handler.handle(&request, response, ev);
    match (completion, returned) {
        (Completion::Automatic, Some(response)) => response.finish(ev),
        (Completion::Manual, None) => {}
        (Completion::Automatic, None) => {}
        (Completion::Manual, Some(_)) => {
            warn!("handler for a manual route returned its response unfinished, closing");
            ev.close(token);
        }
    }
}

/// Write `bytes` to the connection registered as `token`. Part of an
/// explicitly flushed, streamed response.
pub(crate) fn send(ev: &mut EventLoop, token: Token, bytes: Vec<u8>) {
    with_connection(ev, token, |conn, ev| conn.queue_write(ev, &bytes));
}

/// Write the final `bytes` of a response to the connection registered as
/// `token` and complete the request cycle once they are flushed.
pub(crate) fn request_done(ev: &mut EventLoop, token: Token, bytes: Vec<u8>, keep_alive: bool) {
    // Both sides must want keep-alive and the idle timeout must not have
    // fired in the meantime.
    let keep_alive = keep_alive && ev.timeouts().has_keep_alive(token);
    with_connection(ev, token, |conn, ev| {
        conn.response_done = true;
        conn.keep_alive_after_response = keep_alive;
        conn.queue_write(ev, &bytes);
    });
}

fn with_connection<F>(ev: &mut EventLoop, token: Token, f: F)
where
    F: FnOnce(&mut Connection, &mut EventLoop),
{
    let Some(handler) = ev.handler(token) else {
        debug!("response for a closed connection, dropping: token={}", token.0);
        return;
    };
    let mut handler = handler.borrow_mut();
    match handler.as_any().downcast_mut::<Connection>() {
        Some(conn) => f(conn, ev),
        None => debug!("response for a non-connection descriptor: token={}", token.0),
    }
}
