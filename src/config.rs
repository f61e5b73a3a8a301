//! Module with the server configuration.

use std::time::Duration;

/// Configuration for [`HttpServer`] and the event loops it runs.
///
/// [`HttpServer`]: crate::server::HttpServer
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hearth::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_workers(4)
///     .with_keep_alive_window(Duration::from_secs(60));
/// assert_eq!(config.workers(), 4);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct ServerConfig {
    keep_alive_window: Duration,
    loop_timeout: Duration,
    max_line_length: usize,
    read_chunk_size: usize,
    workers: usize,
}

impl ServerConfig {
    /// Default window after which an idle kept-alive connection is closed.
    pub const DEFAULT_KEEP_ALIVE_WINDOW: Duration = Duration::from_secs(30);
    /// Default ceiling on a single multiplexer wait, so timers fire promptly
    /// even without I/O activity.
    pub const DEFAULT_LOOP_TIMEOUT: Duration = Duration::from_millis(250);
    /// Default maximum length of a single request or header line.
    pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;
    /// Default size of a single read from a connection.
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 4 * 1024;

    /// Create a configuration with all defaults: single-threaded (no
    /// workers), 30 second keep-alive window, 250 millisecond loop wait
    /// ceiling.
    pub fn new() -> ServerConfig {
        ServerConfig {
            keep_alive_window: ServerConfig::DEFAULT_KEEP_ALIVE_WINDOW,
            loop_timeout: ServerConfig::DEFAULT_LOOP_TIMEOUT,
            max_line_length: ServerConfig::DEFAULT_MAX_LINE_LENGTH,
            read_chunk_size: ServerConfig::DEFAULT_READ_CHUNK_SIZE,
            workers: 0,
        }
    }

    /// Set the number of worker event loops fed by the accept loop.
    ///
    /// Zero (the default) runs a single event loop doing both accepting and
    /// connection handling.
    pub const fn with_workers(mut self, workers: usize) -> ServerConfig {
        self.workers = workers;
        self
    }

    /// Set the window after which an idle kept-alive connection is closed.
    pub const fn with_keep_alive_window(mut self, window: Duration) -> ServerConfig {
        self.keep_alive_window = window;
        self
    }

    /// Set the ceiling on a single multiplexer wait.
    pub const fn with_loop_timeout(mut self, timeout: Duration) -> ServerConfig {
        self.loop_timeout = timeout;
        self
    }

    /// Set the maximum length of a single request or header line, beyond
    /// which a request is considered malformed.
    pub const fn with_max_line_length(mut self, length: usize) -> ServerConfig {
        self.max_line_length = length;
        self
    }

    /// Returns the number of worker event loops.
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the keep-alive window.
    pub const fn keep_alive_window(&self) -> Duration {
        self.keep_alive_window
    }

    /// Returns the loop wait ceiling.
    pub const fn loop_timeout(&self) -> Duration {
        self.loop_timeout
    }

    /// Returns the maximum request/header line length.
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Returns the size of a single connection read.
    pub const fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig::new()
    }
}
