//! Module with timeout management.
//!
//! [`TimeoutManager`] holds two flavors of deadline-triggered callbacks:
//! generic one-shot timeouts, fired once and removed, and keep-alive timeouts
//! indexed by descriptor, of which at most one exists per descriptor at any
//! instant. [`Periodic`] builds a repeating callback on top of the generic
//! timeouts.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::trace;
use mio::Token;

use crate::event_loop::EventLoop;

#[cfg(test)]
#[path = "timers_tests.rs"]
mod timers_tests;

/// Callback fired when a timeout expires, run on the loop's own thread.
pub type TimerCallback = Box<dyn FnOnce(&mut EventLoop)>;

/// Key identifying a scheduled timeout.
///
/// Ordered by deadline, ties broken by a monotonically assigned id so that
/// firing order is deterministic.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct TimeoutKey {
    deadline: Instant,
    id: u64,
}

impl TimeoutKey {
    /// Returns the absolute deadline of this timeout.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

struct TimeoutEntry {
    callback: TimerCallback,
    /// Set for keep-alive timeouts, used to clean up the per-descriptor index
    /// when the timeout fires.
    token: Option<Token>,
}

/// Deadline-ordered collection of timeout callbacks.
pub struct TimeoutManager {
    timeouts: BTreeMap<TimeoutKey, TimeoutEntry>,
    /// Invariant: at most one entry per descriptor; the key always refers to a
    /// live entry in `timeouts`.
    keep_alive: HashMap<Token, TimeoutKey>,
    keep_alive_window: Duration,
    next_id: u64,
}

impl TimeoutManager {
    /// Default window after which an idle kept-alive connection is closed.
    pub const DEFAULT_KEEP_ALIVE_WINDOW: Duration = Duration::from_secs(30);

    /// Create a new manager with the default keep-alive window.
    pub fn new() -> TimeoutManager {
        TimeoutManager::with_keep_alive_window(TimeoutManager::DEFAULT_KEEP_ALIVE_WINDOW)
    }

    /// Create a new manager closing idle kept-alive connections after
    /// `window`.
    pub fn with_keep_alive_window(window: Duration) -> TimeoutManager {
        TimeoutManager {
            timeouts: BTreeMap::new(),
            keep_alive: HashMap::new(),
            keep_alive_window: window,
            next_id: 0,
        }
    }

    /// Returns the configured keep-alive window.
    pub fn keep_alive_window(&self) -> Duration {
        self.keep_alive_window
    }

    /// Add a generic one-shot timeout, fired once `deadline` passes.
    pub fn add_timeout(&mut self, deadline: Instant, callback: TimerCallback) -> TimeoutKey {
        self.insert(deadline, TimeoutEntry {
            callback,
            token: None,
        })
    }

    /// Cancel a previously added timeout.
    ///
    /// The callback is dropped and will be skipped by [`execute`].
    ///
    /// [`execute`]: TimeoutManager::execute
    pub fn cancel(&mut self, key: TimeoutKey) {
        if let Some(entry) = self.timeouts.remove(&key) {
            if let Some(token) = entry.token {
                self.keep_alive.remove(&token);
            }
        }
    }

    /// Add a keep-alive timeout for a descriptor, replacing any existing one.
    pub fn add_keep_alive(&mut self, token: Token, deadline: Instant, callback: TimerCallback) {
        if let Some(old) = self.keep_alive.remove(&token) {
            let _ = self.timeouts.remove(&old);
        }
        let key = self.insert(deadline, TimeoutEntry {
            callback,
            token: Some(token),
        });
        let _ = self.keep_alive.insert(token, key);
    }

    /// Returns `true` if a keep-alive timeout exists for `token`.
    pub fn has_keep_alive(&self, token: Token) -> bool {
        self.keep_alive.contains_key(&token)
    }

    /// Reschedule the keep-alive timeout for `token` to `now` plus the
    /// keep-alive window, reusing its callback. Does nothing if no keep-alive
    /// timeout exists for the descriptor.
    pub fn touch(&mut self, token: Token, now: Instant) {
        if let Some(old) = self.keep_alive.get(&token).copied() {
            if let Some(entry) = self.timeouts.remove(&old) {
                let key = TimeoutKey {
                    deadline: now + self.keep_alive_window,
                    id: old.id,
                };
                let _ = self.timeouts.insert(key, entry);
                let _ = self.keep_alive.insert(token, key);
            }
        }
    }

    /// Remove the keep-alive timeout for `token`, called exactly once when the
    /// descriptor closes.
    pub fn remove_keep_alive(&mut self, token: Token) {
        if let Some(key) = self.keep_alive.remove(&token) {
            let _ = self.timeouts.remove(&key);
        }
    }

    /// Fire every timeout whose deadline passed, in deadline order, and return
    /// the delay until the earliest remaining deadline (`None` if no timeouts
    /// remain).
    ///
    /// Fires from a defensive snapshot: timeouts added by a firing callback
    /// are not visited in the same call.
    pub fn execute(&mut self, now: Instant, ev: &mut EventLoop) -> Option<Duration> {
        for callback in self.take_expired(now) {
            callback(ev);
        }
        self.next_delay(now)
    }

    /// Remove all timeouts with a deadline at or before `now`, returning their
    /// callbacks in deadline order.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while let Some((key, entry)) = self.timeouts.pop_first() {
            if key.deadline > now {
                let _ = self.timeouts.insert(key, entry);
                break;
            }
            trace!("timeout expired: deadline={:?}", key.deadline);
            if let Some(token) = entry.token {
                let _ = self.keep_alive.remove(&token);
            }
            expired.push(entry.callback);
        }
        expired
    }

    /// Returns the delay from `now` until the earliest deadline, if any.
    pub fn next_delay(&self, now: Instant) -> Option<Duration> {
        self.timeouts
            .keys()
            .next()
            .map(|key| key.deadline.saturating_duration_since(now))
    }

    /// Returns the number of scheduled timeouts (generic and keep-alive).
    pub fn len(&self) -> usize {
        self.timeouts.len()
    }

    /// Returns `true` if no timeouts are scheduled.
    pub fn is_empty(&self) -> bool {
        self.timeouts.is_empty()
    }

    fn insert(&mut self, deadline: Instant, entry: TimeoutEntry) -> TimeoutKey {
        let key = TimeoutKey {
            deadline,
            id: self.next_id,
        };
        self.next_id += 1;
        let _ = self.timeouts.insert(key, entry);
        key
    }
}

impl Default for TimeoutManager {
    fn default() -> TimeoutManager {
        TimeoutManager::new()
    }
}

/// Repeating callback built on top of generic timeouts.
///
/// Each fire re-arms the next one only while the callback is active;
/// [`cancel`] prevents the next re-arm but does not un-fire one already in
/// flight.
///
/// [`cancel`]: Periodic::cancel
#[derive(Clone)]
pub struct Periodic {
    inner: Rc<PeriodicInner>,
}

struct PeriodicInner {
    active: Cell<bool>,
    interval: Duration,
    callback: RefCell<Box<dyn FnMut(&mut EventLoop)>>,
}

impl Periodic {
    /// Create a new periodic callback firing every `interval`. Call
    /// [`start`] to schedule the first fire.
    ///
    /// [`start`]: Periodic::start
    pub fn new<F>(interval: Duration, callback: F) -> Periodic
    where
        F: FnMut(&mut EventLoop) + 'static,
    {
        Periodic {
            inner: Rc::new(PeriodicInner {
                active: Cell::new(false),
                interval,
                callback: RefCell::new(Box::new(callback)),
            }),
        }
    }

    /// Schedule the first fire, one interval from now.
    pub fn start(&self, ev: &mut EventLoop) {
        self.inner.active.set(true);
        schedule(ev, Rc::clone(&self.inner));
    }

    /// Deactivate the callback, preventing the next re-arm.
    pub fn cancel(&self) {
        self.inner.active.set(false);
    }

    /// Returns `true` if the callback is still being rescheduled.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }
}

fn schedule(ev: &mut EventLoop, inner: Rc<PeriodicInner>) {
    let deadline = Instant::now() + inner.interval;
    let _ = ev.add_timeout(deadline, move |ev| {
        if !inner.active.get() {
            return;
        }
        (inner.callback.borrow_mut())(ev);
        if inner.active.get() {
            schedule(ev, inner);
        }
    });
}
