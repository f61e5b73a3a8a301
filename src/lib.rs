//! Hearth is an embeddable, non-blocking HTTP server built around a small
//! reactor.
//!
//! The building blocks:
//!
//! * [`EventLoop`]: readiness polling and per descriptor handler dispatch,
//!   plus timeouts and deferred callbacks. See the [`event_loop`] module.
//! * [`TimeoutManager`] and [`CallbackManager`]: one-shot and keep-alive
//!   timers ordered by deadline, and a queue of callbacks that may be
//!   submitted from any thread but always run on the loop thread.
//! * [`PartialRequest`]: an incremental HTTP parser that tolerates the
//!   request arriving in arbitrarily sized pieces.
//! * [`AsyncSocket`]: callback-based connect, read-until-delimiter,
//!   read-n-bytes and queued writes on a non-blocking stream.
//! * [`HttpServer`]: the accept loop, an optional worker pool, and per
//!   connection keep-alive handling, serving an [`Application`] of
//!   [`RequestHandler`]s.
//!
//! A minimal server:
//!
//! ```no_run
//! use hearth::{Application, EventLoop, HttpServer, Request, Response};
//!
//! fn hello(_: &Request, response: &mut Response, _: &mut EventLoop) {
//!     response.write(b"Hello world!");
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut app = Application::new();
//! app.add("/", hello)?;
//! let server = HttpServer::new(app).listen("127.0.0.1:8080".parse()?)?;
//! println!("listening on {}", server.local_addr());
//! # server.stop();
//! # Ok(())
//! # }
//! ```
//!
//! Everything runs on loop threads; the only cross-thread entry points are
//! [`LoopHandle`] (deferred callbacks, timeouts, stopping the loop) and the
//! accept loop's connection hand-off to the workers.

#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod callback;
pub mod client;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod header;
pub mod method;
pub mod parse;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod socket;
pub mod status_code;
pub mod timers;
pub mod version;

mod worker;

pub use buffer::DynamicBuffer;
pub use callback::CallbackManager;
pub use client::{ClientResponse, HttpClient};
pub use config::ServerConfig;
pub use error::ServerError;
pub use event_loop::{EventHandler, EventLoop, LoopHandle, Readiness};
pub use header::Headers;
pub use method::Method;
pub use parse::{Outcome, PartialRequest};
pub use request::Request;
pub use response::Response;
pub use router::{Application, Completion, RequestHandler, Route};
pub use server::{HttpServer, ServerHandle};
pub use socket::AsyncSocket;
pub use status_code::StatusCode;
pub use timers::{Periodic, TimeoutKey, TimeoutManager};
pub use version::Version;
