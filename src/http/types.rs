//! HTTP vocabulary shared by the parser, the dispatcher and the response writer

use crate::errors::ErrorKind;
use std::fmt;

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

// METHOD

/// HTTP request methods
///
/// Every method a route can be planted under. `CONNECT` is accepted by the
/// parser so that the dispatcher can refuse to redirect it.
///
/// # References
///
/// - [RFC 9110, Section 9](https://datatracker.ietf.org/doc/html/rfc9110#section-9)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Transfer a current representation of the target resource
    Get,
    /// Replace all current representations of the target resource
    Put,
    /// Perform resource-specific processing on the request payload
    Post,
    /// Same as GET but without response body
    Head,
    /// Apply partial modifications to a resource
    Patch,
    /// Remove all current representations of the target resource
    Delete,
    /// Describe the communication options for the target resource.
    /// Also the preflight method answered by CORS-aware dispatch.
    Options,
    /// Establish a tunnel. Never the subject of path correction.
    Connect,
    /// Perform a message loop-back test
    Trace,
}

impl Method {
    /// All methods, in the order the station helpers register them.
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Patch,
        Method::Head,
        Method::Options,
        Method::Connect,
        Method::Trace,
    ];

    #[inline(always)]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<Self, ErrorKind> {
        match src {
            b"GET" => Ok(Method::Get),
            b"PUT" => Ok(Method::Put),
            b"POST" => Ok(Method::Post),
            b"HEAD" => Ok(Method::Head),
            b"PATCH" => Ok(Method::Patch),
            b"DELETE" => Ok(Method::Delete),
            b"OPTIONS" => Ok(Method::Options),
            b"CONNECT" => Ok(Method::Connect),
            b"TRACE" => Ok(Method::Trace),
            _ => Err(ErrorKind::InvalidMethod),
        }
    }

    /// Returns the method token as it appears on the request line.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// VERSION

/// HTTP protocol version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0, [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// HTTP/1.1, [RFC 9112](https://datatracker.ietf.org/doc/html/rfc9112)
    Http11,
}

impl Version {
    // Returns the version and its default keep-alive behaviour.
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<(Self, bool), ErrorKind> {
        match src {
            b"HTTP/1.1" => Ok((Self::Http11, true)),
            b"HTTP/1.0" => Ok((Self::Http10, false)),
            [b'H', b'T', b'T', b'P', b'/', ..] => Err(ErrorKind::UnsupportedVersion),
            _ => Err(ErrorKind::InvalidVersion),
        }
    }
}

// STATUS_CODE

macro_rules! set_status_codes {
    ($(
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes
        ///
        /// The codes a dispatcher, an error handler or a user handler is
        /// expected to produce, as defined in
        /// [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-15).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $name = $num,
        )+ }

        impl StatusCode {
            // Returns the HTTP first line as bytes (e.g., `b"HTTP/1.1 200 OK\r\n"`).
            #[inline]
            pub(crate) const fn into_first_line(self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                )+ }
            }

            /// Returns the canonical reason phrase (e.g., `"Not Found"`).
            #[inline]
            pub const fn reason(self) -> &'static str {
                match self { $(
                    StatusCode::$name => $str,
                )+ }
            }

            /// Looks a status up by its numeric code.
            #[inline]
            pub const fn from_u16(code: u16) -> Option<Self> {
                match code { $(
                    $num => Some(StatusCode::$name),
                )+
                    _ => None,
                }
            }
        }
    }
}

set_status_codes! {
    Continue = (100, "Continue");
    SwitchingProtocols = (101, "Switching Protocols");

    Ok = (200, "OK");
    Created = (201, "Created");
    Accepted = (202, "Accepted");
    NoContent = (204, "No Content");
    PartialContent = (206, "Partial Content");

    MultipleChoices = (300, "Multiple Choices");
    MovedPermanently = (301, "Moved Permanently");
    Found = (302, "Found");
    SeeOther = (303, "See Other");
    NotModified = (304, "Not Modified");
    TemporaryRedirect = (307, "Temporary Redirect");
    PermanentRedirect = (308, "Permanent Redirect");

    BadRequest = (400, "Bad Request");
    Unauthorized = (401, "Unauthorized");
    Forbidden = (403, "Forbidden");
    NotFound = (404, "Not Found");
    MethodNotAllowed = (405, "Method Not Allowed");
    NotAcceptable = (406, "Not Acceptable");
    RequestTimeout = (408, "Request Timeout");
    Conflict = (409, "Conflict");
    Gone = (410, "Gone");
    LengthRequired = (411, "Length Required");
    PayloadTooLarge = (413, "Payload Too Large");
    UriTooLong = (414, "URI Too Long");
    UnsupportedMediaType = (415, "Unsupported Media Type");
    ImaTeapot = (418, "I'm a teapot");
    MisdirectedRequest = (421, "Misdirected Request");
    UnprocessableEntity = (422, "Unprocessable Entity");
    TooManyRequests = (429, "Too Many Requests");
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    InternalServerError = (500, "Internal Server Error");
    NotImplemented = (501, "Not Implemented");
    BadGateway = (502, "Bad Gateway");
    ServiceUnavailable = (503, "Service Unavailable");
    GatewayTimeout = (504, "Gateway Timeout");
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

impl StatusCode {
    /// Returns the numeric code.
    #[inline(always)]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// `true` for the 3xx family.
    #[inline(always)]
    pub const fn is_redirection(self) -> bool {
        matches!(self as u16, 300..=399)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}
