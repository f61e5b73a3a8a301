//! Module with the HTTP version type.

use std::fmt;
use std::str::FromStr;

/// HTTP version.
///
/// RFC 7230 section 2.6.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0.
    ///
    /// RFC 1945.
    Http10,
    /// HTTP/1.1.
    ///
    /// RFC 7230.
    Http11,
}

impl Version {
    /// Returns the version as string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`Version`]'s [`FromStr`] implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnknownVersion;

impl fmt::Display for UnknownVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown HTTP version")
    }
}

impl std::error::Error for UnknownVersion {}

impl FromStr for Version {
    type Err = UnknownVersion;

    fn from_str(version: &str) -> Result<Version, UnknownVersion> {
        match version {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(UnknownVersion),
        }
    }
}
