//! Module with request handlers and the application route table.

use std::sync::Arc;

use regex::Regex;

use crate::event_loop::EventLoop;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::status_code::StatusCode;

/// Handler for incoming requests.
///
/// Implementations usually override one or more of the per-method hooks
/// ([`get`], [`post`], etc.), which receive the response by mutable reference
/// and complete as soon as they return. A hook that was not overridden
/// answers `405 Method Not Allowed`.
///
/// Handlers that finish the response *after* the call returns, e.g. from a
/// timeout or a deferred callback, override [`handle`] instead: it receives
/// the [`Response`] by value and returns `None` after moving it elsewhere.
/// Mark the route [`Completion::Manual`] for those methods so the connection
/// is not completed behind the handler's back.
///
/// Closures of type `Fn(&Request, &mut Response, &mut EventLoop)` implement
/// this trait and respond to every method.
///
/// [`get`]: RequestHandler::get
/// [`post`]: RequestHandler::post
/// [`handle`]: RequestHandler::handle
pub trait RequestHandler: Send + Sync {
    /// Handle a request.
    ///
    /// Returns the response to be completed by the caller, or `None` if the
    /// handler took ownership of it.
    fn handle(
        &self,
        request: &Request,
        mut response: Response,
        ev: &mut EventLoop,
    ) -> Option<Response> {
        match request.method() {
            Method::Get => self.get(request, &mut response, ev),
            Method::Head => self.head(request, &mut response, ev),
            Method::Post => self.post(request, &mut response, ev),
            Method::Put => self.put(request, &mut response, ev),
            Method::Delete => self.delete(request, &mut response, ev),
            _ => method_not_allowed(&mut response),
        }
        Some(response)
    }

    /// Handle a GET request.
    fn get(&self, _request: &Request, response: &mut Response, _ev: &mut EventLoop) {
        method_not_allowed(response);
    }

    /// Handle a HEAD request.
    fn head(&self, _request: &Request, response: &mut Response, _ev: &mut EventLoop) {
        method_not_allowed(response);
    }

    /// Handle a POST request.
    fn post(&self, _request: &Request, response: &mut Response, _ev: &mut EventLoop) {
        method_not_allowed(response);
    }

    /// Handle a PUT request.
    fn put(&self, _request: &Request, response: &mut Response, _ev: &mut EventLoop) {
        method_not_allowed(response);
    }

    /// Handle a DELETE request.
    fn delete(&self, _request: &Request, response: &mut Response, _ev: &mut EventLoop) {
        method_not_allowed(response);
    }
}

impl<F> RequestHandler for F
where
    F: Fn(&Request, &mut Response, &mut EventLoop) + Send + Sync,
{
    fn handle(
        &self,
        request: &Request,
        mut response: Response,
        ev: &mut EventLoop,
    ) -> Option<Response> {
        (self)(request, &mut response, ev);
        Some(response)
    }
}

fn method_not_allowed(response: &mut Response) {
    respond_with(response, StatusCode::METHOD_NOT_ALLOWED);
}

fn respond_with(response: &mut Response, status: StatusCode) {
    response.set_status(status);
    if status.includes_body() {
        response.write(status.phrase().as_bytes());
    }
}

/// Who completes the response for a route.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The response is completed as soon as the handler returns.
    Automatic,
    /// The handler completes the response itself, possibly after the call
    /// returned. See [`RequestHandler::handle`].
    Manual,
}

/// A single registered route.
pub struct Route {
    pattern: String,
    /// `Some` if the pattern contains a capture group.
    regex: Option<Regex>,
    handler: Arc<dyn RequestHandler>,
    manual: Vec<Method>,
}

impl Route {
    /// Mark `method` on this route as [`Completion::Manual`] (or back to
    /// [`Completion::Automatic`]).
    pub fn completion(&mut self, method: Method, completion: Completion) -> &mut Route {
        match completion {
            Completion::Manual if !self.manual.contains(&method) => self.manual.push(method),
            Completion::Automatic => self.manual.retain(|m| *m != method),
            Completion::Manual => {}
        }
        self
    }

    fn completion_of(&self, method: Method) -> Completion {
        if self.manual.contains(&method) {
            Completion::Manual
        } else {
            Completion::Automatic
        }
    }
}

/// Route table mapping request paths to handlers.
///
/// Patterns without a capture group must match the request path exactly.
/// Patterns with a capture group, e.g. `/items/([0-9]+)`, are compiled as
/// anchored regular expressions; the captured groups are made available via
/// [`Request::captures`]. Routes are tried in registration order.
pub struct Application {
    routes: Vec<Route>,
    not_found: Arc<dyn RequestHandler>,
    bad_request: Arc<dyn RequestHandler>,
}

impl Application {
    /// Create an application without any routes.
    pub fn new() -> Application {
        Application {
            routes: Vec::new(),
            not_found: Arc::new(NotFound),
            bad_request: Arc::new(BadRequest),
        }
    }

    /// Add a route for `pattern`, returning it for further configuration.
    ///
    /// Returns an error if `pattern` contains a capture group but is not a
    /// valid regular expression.
    pub fn add<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, regex::Error>
    where
        H: RequestHandler + 'static,
    {
        let regex = if pattern.contains('(') {
            Some(Regex::new(&format!("^{pattern}$"))?)
        } else {
            None
        };
        self.routes.push(Route {
            pattern: pattern.to_string(),
            regex,
            handler: Arc::new(handler),
            manual: Vec::new(),
        });
        Ok(self.routes.last_mut().unwrap())
    }

    /// Resolve `request` to a handler, recording any pattern captures on the
    /// request.
    pub(crate) fn resolve(&self, request: &mut Request) -> (Arc<dyn RequestHandler>, Completion) {
        if request.is_malformed() || !self.has_required_host(request) {
            return (Arc::clone(&self.bad_request), Completion::Automatic);
        }
        for route in self.routes.iter() {
            match &route.regex {
                None if route.pattern == request.path() => {}
                None => continue,
                Some(regex) => match regex.captures(request.path()) {
                    Some(captures) => {
                        let captures = captures
                            .iter()
                            .skip(1)
                            .flatten()
                            .map(|group| group.as_str().to_string())
                            .collect();
                        request.set_captures(captures);
                    }
                    None => continue,
                },
            }
            let completion = route.completion_of(request.method());
            return (Arc::clone(&route.handler), completion);
        }
        (Arc::clone(&self.not_found), Completion::Automatic)
    }

    /// HTTP/1.1 requires a `Host` header.
    fn has_required_host(&self, request: &Request) -> bool {
        request.version() != crate::version::Version::Http11 || request.headers().contains("host")
    }
}

impl Default for Application {
    fn default() -> Application {
        Application::new()
    }
}

struct NotFound;

impl RequestHandler for NotFound {
    fn handle(
        &self,
        _request: &Request,
        mut response: Response,
        _ev: &mut EventLoop,
    ) -> Option<Response> {
        respond_with(&mut response, StatusCode::NOT_FOUND);
        Some(response)
    }
}

struct BadRequest;

impl RequestHandler for BadRequest {
    fn handle(
        &self,
        _request: &Request,
        mut response: Response,
        _ev: &mut EventLoop,
    ) -> Option<Response> {
        respond_with(&mut response, StatusCode::BAD_REQUEST);
        Some(response)
    }
}
