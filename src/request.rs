//! Module with the HTTP request type.

use std::fmt;

use crate::header::Headers;
use crate::method::Method;
use crate::version::Version;

/// HTTP request.
///
/// Built by the incremental parser, see [`PartialRequest`]. A request that
/// failed to parse is represented by the [`Request::malformed`] sentinel,
/// which still flows through routing so the connection can answer with a
/// `400 Bad Request` before closing.
///
/// [`PartialRequest`]: crate::parse::PartialRequest
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) parameters: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) keep_alive: bool,
    pub(crate) captures: Vec<String>,
    pub(crate) malformed: bool,
}

impl Request {
    /// Sentinel request produced for input that failed to parse.
    pub(crate) fn malformed() -> Request {
        Request {
            method: Method::Get,
            path: String::from("/"),
            version: Version::Http11,
            headers: Headers::EMPTY,
            parameters: Vec::new(),
            body: Vec::new(),
            keep_alive: false,
            captures: Vec::new(),
            malformed: true,
        }
    }

    /// Returns the HTTP method.
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Returns the request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP version.
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the headers.
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the first value of the query parameter with `name`, if any.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| &**value)
    }

    /// Returns all values of the query parameter with `name`, in the order
    /// they appeared in the query string.
    pub fn parameters<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.parameters
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, value)| &**value)
    }

    /// Returns the groups captured by the route pattern that matched this
    /// request, in order. Empty for literal routes.
    pub fn captures(&self) -> &[String] {
        &self.captures
    }

    /// Returns `true` if the connection should be kept open after the
    /// response.
    pub const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns `true` if this request failed to parse.
    pub const fn is_malformed(&self) -> bool {
        self.malformed
    }

    pub(crate) fn set_captures(&mut self, captures: Vec<String>) {
        self.captures = captures;
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body (bytes)", &self.body.len())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// Split a query string into `(name, value)` pairs.
///
/// No percent-decoding is done. Pairs without a `=` get an empty value,
/// empty pairs (from `&&`) are skipped.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    let mut parameters = Vec::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, value)) => parameters.push((name.to_string(), value.to_string())),
            None => parameters.push((pair.to_string(), String::new())),
        }
    }
    parameters
}

#[cfg(test)]
mod tests {
    use super::{parse_query, Request};

    #[test]
    fn query_parameters_are_multi_valued() {
        let mut request = Request::malformed();
        request.malformed = false;
        request.parameters = parse_query("tag=a&name=x&tag=b&&flag");
        assert_eq!(request.parameter("tag"), Some("a"));
        let tags: Vec<&str> = request.parameters("tag").collect();
        assert_eq!(tags, &["a", "b"]);
        assert_eq!(request.parameter("flag"), Some(""));
        assert_eq!(request.parameter("missing"), None);
    }

    #[test]
    fn query_values_are_not_decoded() {
        let parameters = parse_query("name=hello%20world");
        assert_eq!(parameters[0].1, "hello%20world");
    }
}
