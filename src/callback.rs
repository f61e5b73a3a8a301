//! Module with the deferred-callback queue.
//!
//! Deferred callbacks are the only general purpose thread-safe hand-off into
//! an event loop: work submitted from any thread is guaranteed to execute on
//! the loop's own thread, exactly once, in submission order.

use crossbeam_channel::{Receiver, Sender};
use log::trace;

use crate::event_loop::EventLoop;

/// Callback executed on the owning loop's thread.
pub type Callback = Box<dyn FnOnce(&mut EventLoop) + Send>;

/// FIFO queue of cross-thread-submitted, loop-thread-executed callbacks.
pub struct CallbackManager {
    sender: Sender<Callback>,
    receiver: Receiver<Callback>,
}

impl CallbackManager {
    /// Create a new, empty queue.
    pub fn new() -> CallbackManager {
        let (sender, receiver) = crossbeam_channel::unbounded();
        CallbackManager { sender, receiver }
    }

    /// Append a callback to the queue. Safe to call from any thread (via a
    /// cloned [`sender`]).
    ///
    /// [`sender`]: CallbackManager::sender
    pub fn add(&self, callback: Callback) {
        // Send can only fail if the receiver is dropped, and we hold it.
        let _ = self.sender.send(callback);
    }

    /// Returns a sending handle usable from any thread.
    pub(crate) fn sender(&self) -> Sender<Callback> {
        self.sender.clone()
    }

    /// Returns `true` if callbacks are queued.
    pub fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Take a snapshot of the queued callbacks, clearing the live queue.
    ///
    /// Callbacks submitted while the snapshot executes land in the live queue
    /// and run on a later call, never the current one.
    pub(crate) fn drain(&self) -> Vec<Callback> {
        self.receiver.try_iter().collect()
    }

    /// Execute every queued callback in submission order and return whether
    /// new callbacks have since been queued, so the caller can schedule
    /// another near-immediate pass.
    pub fn execute(&self, ev: &mut EventLoop) -> bool {
        let callbacks = self.drain();
        if !callbacks.is_empty() {
            trace!("executing {} deferred callbacks", callbacks.len());
        }
        for callback in callbacks {
            callback(ev);
        }
        self.has_pending()
    }
}

impl Default for CallbackManager {
    fn default() -> CallbackManager {
        CallbackManager::new()
    }
}
