//! Module with the HTTP method type.

use std::fmt;
use std::str::FromStr;

/// HTTP request method.
///
/// RFC 7231 section 4.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET method.
    Get,
    /// HEAD method.
    Head,
    /// POST method.
    Post,
    /// PUT method.
    Put,
    /// DELETE method.
    Delete,
    /// CONNECT method.
    Connect,
    /// OPTIONS method.
    Options,
    /// TRACE method.
    Trace,
    /// PATCH method.
    Patch,
}

impl Method {
    /// Returns `true` if the method is safe, i.e. does not alter state on the
    /// server.
    ///
    /// RFC 7231 section 4.2.1.
    pub const fn is_safe(self) -> bool {
        use Method::*;
        matches!(self, Get | Head | Options | Trace)
    }

    /// Returns `true` if a request with this method usually carries a body.
    pub const fn expects_body(self) -> bool {
        use Method::*;
        matches!(self, Post | Put | Patch)
    }

    /// Returns the method as string.
    pub const fn as_str(self) -> &'static str {
        use Method::*;
        match self {
            Get => "GET",
            Head => "HEAD",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Connect => "CONNECT",
            Options => "OPTIONS",
            Trace => "TRACE",
            Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`Method`]'s [`FromStr`] implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownMethod;

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown HTTP method")
    }
}

impl std::error::Error for UnknownMethod {}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(method: &str) -> Result<Method, UnknownMethod> {
        use Method::*;
        // Method names are case-sensitive, RFC 7230 section 3.1.1.
        match method {
            "GET" => Ok(Get),
            "HEAD" => Ok(Head),
            "POST" => Ok(Post),
            "PUT" => Ok(Put),
            "DELETE" => Ok(Delete),
            "CONNECT" => Ok(Connect),
            "OPTIONS" => Ok(Options),
            "TRACE" => Ok(Trace),
            "PATCH" => Ok(Patch),
            _ => Err(UnknownMethod),
        }
    }
}
