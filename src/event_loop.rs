//! Module with the event loop, the reactor at the core of the server.
//!
//! An [`EventLoop`] owns one multiplexer ([`mio::Poll`]). On each iteration it
//! waits for I/O readiness bounded by the earliest timeout deadline, dispatches
//! ready descriptors to their registered [`EventHandler`]s, fires expired
//! timeouts and drains the deferred-callback queue.
//!
//! All state owned by the loop is single-threaded; [`LoopHandle`] is the only
//! way to reach a loop from another thread. It routes work through the
//! deferred-callback queue and wakes the multiplexer.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{debug, trace, warn};
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};

use crate::callback::{Callback, CallbackManager};
use crate::config::ServerConfig;
use crate::timers::{TimeoutKey, TimeoutManager};

/// Token reserved for the cross-thread waker.
const WAKER: Token = Token(usize::MAX);

/// Initial capacity of the event container.
const EVENTS_CAPACITY: usize = 128;

/// Readiness of a descriptor, drawn from a single multiplexer event.
#[derive(Copy, Clone, Debug)]
pub struct Readiness {
    /// The descriptor is readable (or, for a listener, acceptable).
    pub readable: bool,
    /// The descriptor is writable (or an in-progress connect completed).
    pub writable: bool,
    /// The peer closed its half of the connection.
    pub closed: bool,
}

/// Handler associated with a registered descriptor.
///
/// A handler may re-arm interest, register new descriptors, or close any
/// descriptor (including its own) from within [`ready`]; actual
/// deregistration of a closed descriptor is deferred until after the current
/// dispatch returns.
///
/// [`ready`]: EventHandler::ready
pub trait EventHandler {
    /// Called when the descriptor is ready.
    ///
    /// Returning an error closes this descriptor; it never terminates the
    /// loop or affects other connections.
    fn ready(&mut self, ev: &mut EventLoop, token: Token, readiness: Readiness) -> io::Result<()>;

    /// Deregister the underlying descriptor from the multiplexer, called when
    /// the descriptor is closed.
    fn deregister(&mut self, registry: &Registry) -> io::Result<()>;

    /// Downcasting support, used to reach a concrete handler through the
    /// registry (e.g. the response pipeline writing to its connection).
    fn as_any(&mut self) -> &mut dyn Any;
}

/// The reactor: multiplexed readiness polling with per-descriptor handler
/// dispatch, timeout management and deferred callbacks.
///
/// Not a singleton: every server (and every worker thread) owns its own
/// instance, and tests get independent, non-interfering loops.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, Rc<RefCell<dyn EventHandler>>>,
    /// Handlers closed during the current dispatch phase, deregistered once
    /// the phase ends.
    pending_close: Vec<Rc<RefCell<dyn EventHandler>>>,
    timeouts: TimeoutManager,
    callbacks: CallbackManager,
    waker: Arc<Waker>,
    next_token: usize,
    loop_timeout: Duration,
    running: bool,
}

impl EventLoop {
    /// Create a new event loop with default timing configuration.
    pub fn new() -> io::Result<EventLoop> {
        EventLoop::with_config(&ServerConfig::new())
    }

    /// Create a new event loop using `config`'s loop timeout and keep-alive
    /// window.
    pub fn with_config(config: &ServerConfig) -> io::Result<EventLoop> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(EventLoop {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            handlers: HashMap::new(),
            pending_close: Vec::new(),
            timeouts: TimeoutManager::with_keep_alive_window(config.keep_alive_window()),
            callbacks: CallbackManager::new(),
            waker,
            next_token: 0,
            loop_timeout: config.loop_timeout(),
            running: false,
        })
    }

    /// Create a new thread-safe handle to this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            sender: self.callbacks.sender(),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Returns the multiplexer registry, to (re)register descriptors with.
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Register `source` with the multiplexer, returning the token assigned
    /// to it. Call [`insert_handler`] with the same token to receive events.
    ///
    /// Loop-thread only; cross-thread registration goes through a
    /// [`LoopHandle`] callback or the accept loop hand-off.
    ///
    /// [`insert_handler`]: EventLoop::insert_handler
    pub fn register<S>(&mut self, source: &mut S, interest: Interest) -> io::Result<Token>
    where
        S: Source + ?Sized,
    {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(source, token, interest)?;
        trace!("registered descriptor: token={}", token.0);
        Ok(token)
    }

    /// Associate `handler` with a registered `token`.
    pub fn insert_handler<H>(&mut self, token: Token, handler: H)
    where
        H: EventHandler + 'static,
    {
        let _ = self.handlers.insert(token, Rc::new(RefCell::new(handler)));
    }

    /// Get the handler registered for `token`, if any.
    pub(crate) fn handler(&self, token: Token) -> Option<Rc<RefCell<dyn EventHandler>>> {
        self.handlers.get(&token).cloned()
    }

    /// Close the descriptor registered as `token`.
    ///
    /// Removes the handler-registry entry and any keep-alive timeout for the
    /// descriptor exactly once; deregistration from the multiplexer is
    /// deferred until the current dispatch phase ends, so a handler may close
    /// itself.
    pub fn close(&mut self, token: Token) {
        if let Some(handler) = self.handlers.remove(&token) {
            trace!("closing descriptor: token={}", token.0);
            self.timeouts.remove_keep_alive(token);
            self.pending_close.push(handler);
        }
    }

    /// Add a generic one-shot timeout. Loop-thread entry point; use
    /// [`LoopHandle::add_timeout`] from other threads.
    pub fn add_timeout<F>(&mut self, deadline: Instant, callback: F) -> TimeoutKey
    where
        F: FnOnce(&mut EventLoop) + 'static,
    {
        self.timeouts.add_timeout(deadline, Box::new(callback))
    }

    /// Cancel a previously added timeout.
    pub fn cancel_timeout(&mut self, key: TimeoutKey) {
        self.timeouts.cancel(key);
    }

    /// Add a keep-alive timeout for `token`, replacing any existing one. The
    /// deadline is the configured keep-alive window from now.
    pub fn add_keep_alive_timeout<F>(&mut self, token: Token, callback: F)
    where
        F: FnOnce(&mut EventLoop) + 'static,
    {
        let deadline = Instant::now() + self.timeouts.keep_alive_window();
        self.timeouts.add_keep_alive(token, deadline, Box::new(callback));
    }

    /// Push the keep-alive timeout for `token` a full window into the future.
    pub fn touch(&mut self, token: Token) {
        self.timeouts.touch(token, Instant::now());
    }

    /// Returns the timeout manager.
    pub fn timeouts(&self) -> &TimeoutManager {
        &self.timeouts
    }

    pub(crate) fn timeouts_mut(&mut self) -> &mut TimeoutManager {
        &mut self.timeouts
    }

    /// Add a deferred callback, executed on a later iteration of this loop.
    /// Safe to call from any thread through [`LoopHandle::add_callback`].
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&mut EventLoop) + Send + 'static,
    {
        self.callbacks.add(Box::new(callback));
        // Waking ourselves is harmless and keeps a single code path.
        if let Err(err) = self.waker.wake() {
            warn!("error waking event loop: {err}");
        }
    }

    /// Run the loop until [`stop`] is called.
    ///
    /// [`stop`]: EventLoop::stop
    pub fn run(&mut self) -> io::Result<()> {
        debug!("running event loop");
        self.running = true;
        while self.running {
            self.turn()?;
        }
        debug!("event loop stopped");
        Ok(())
    }

    /// Stop the loop after the current iteration. Loop-thread only; use
    /// [`LoopHandle::stop`] from other threads.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Run a single iteration of the loop. Useful for tests and for callers
    /// embedding the loop in their own run loop.
    pub fn run_once(&mut self) -> io::Result<()> {
        self.turn()
    }

    fn turn(&mut self) -> io::Result<()> {
        let timeout = self.determine_timeout();
        trace!("polling for events: timeout={timeout:?}");
        if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() != io::ErrorKind::Interrupted {
                warn!("error polling for events: {err}");
            }
            return Ok(());
        }

        let ready: Vec<(Token, Readiness)> = self
            .events
            .iter()
            .map(|event| {
                let readiness = Readiness {
                    readable: event.is_readable(),
                    writable: event.is_writable(),
                    closed: event.is_read_closed(),
                };
                (event.token(), readiness)
            })
            .collect();

        for (token, readiness) in ready {
            if token == WAKER {
                continue;
            }
            // The handler may have been closed earlier in this iteration.
            let Some(handler) = self.handlers.get(&token).cloned() else {
                continue;
            };
            trace!("dispatching event: token={}, readiness={readiness:?}", token.0);
            let result = handler.borrow_mut().ready(self, token, readiness);
            if let Err(err) = result {
                warn!("error handling descriptor, closing it: {err}: token={}", token.0);
                self.close(token);
            }
        }
        self.flush_closed();

        let now = Instant::now();
        for callback in self.timeouts.take_expired(now) {
            callback(self);
        }
        self.flush_closed();

        for callback in self.callbacks.drain() {
            callback(self);
        }
        self.flush_closed();
        Ok(())
    }

    /// Size the next multiplexer wait: the minimum of the configured ceiling
    /// and the time until the earliest timeout, or near-zero when deferred
    /// callbacks are already waiting.
    fn determine_timeout(&self) -> Duration {
        if self.callbacks.has_pending() {
            return Duration::ZERO;
        }
        match self.timeouts.next_delay(Instant::now()) {
            Some(delay) => delay.min(self.loop_timeout),
            None => self.loop_timeout,
        }
    }

    fn flush_closed(&mut self) {
        while let Some(handler) = self.pending_close.pop() {
            if let Ok(mut handler) = handler.try_borrow_mut() {
                if let Err(err) = handler.deregister(self.poll.registry()) {
                    debug!("error deregistering descriptor: {err}");
                }
            }
            // Dropping the last reference closes the underlying socket.
        }
    }
}

/// Thread-safe handle to an [`EventLoop`].
///
/// Cheap to clone. All operations route through the loop's deferred-callback
/// queue and wake its multiplexer, so they may be called from any thread.
#[derive(Clone)]
pub struct LoopHandle {
    sender: Sender<Callback>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    /// Add a deferred callback, executed on the loop's own thread.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&mut EventLoop) + Send + 'static,
    {
        if self.sender.send(Box::new(callback)).is_ok() {
            if let Err(err) = self.waker.wake() {
                warn!("error waking event loop: {err}");
            }
        }
    }

    /// Add a generic one-shot timeout on the loop.
    pub fn add_timeout<F>(&self, deadline: Instant, callback: F)
    where
        F: FnOnce(&mut EventLoop) + Send + 'static,
    {
        self.add_callback(move |ev| {
            let _ = ev.add_timeout(deadline, callback);
        });
    }

    /// Stop the loop.
    pub fn stop(&self) {
        self.add_callback(|ev| ev.stop());
    }
}
