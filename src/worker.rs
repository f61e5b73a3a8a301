//! Module with the worker threads backing a multi-loop server.

use std::io;
use std::thread;

use log::{debug, error};

use crate::config::ServerConfig;
use crate::event_loop::{EventLoop, LoopHandle};

/// A worker runs its own event loop on a dedicated thread. The accept loop
/// hands accepted connections to it through the loop's callback queue.
pub(crate) struct Worker {
    pub(crate) handle: LoopHandle,
    pub(crate) thread: thread::JoinHandle<()>,
}

impl Worker {
    /// Spawn worker `id`, returning once its loop is running.
    pub(crate) fn start(id: usize, config: &ServerConfig) -> io::Result<Worker> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let config = *config;
        let thread = thread::Builder::new()
            .name(format!("hearth_worker{id}"))
            .spawn(move || match EventLoop::with_config(&config) {
                Ok(mut ev) => {
                    let _ = sender.send(Ok(ev.handle()));
                    debug!("worker started: id={id}");
                    if let Err(err) = ev.run() {
                        error!("worker loop failed: id={id}, {err}");
                    }
                    debug!("worker stopped: id={id}");
                }
                Err(err) => {
                    let _ = sender.send(Err(err));
                }
            })?;
        let handle = receiver
            .recv()
            .map_err(|_| {
                io::Error::new(io::ErrorKind::Other, "worker thread died during startup")
            })??;
        Ok(Worker { handle, thread })
    }
}
