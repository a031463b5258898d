use crate::{Method, Version};
use std::{error, fmt, io};

/// Boxed error returned by plugin hooks.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Convenience alias used by every fallible public operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to the embedding application.
///
/// All of them happen before traffic is accepted (registration, plugin
/// activation, configuration, binding) or are reported back to a handler
/// that misused its [`Context`](crate::Context). Request-time routing misses
/// are not errors; they end as a `404` response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("plugin `{0}` already exists")]
    PluginExists(String),

    #[error("plugin `{name}` failed to activate")]
    PluginActivation {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("route {method} {path} was rejected by a plugin")]
    RouteRejected {
        method: Method,
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: &'static str },

    #[error("response has already been written")]
    ResponseCommitted,

    #[error("invalid configuration")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

// Wire-level failures, answered with a canned response before the
// connection is closed.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,
    InvalidUrl,

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,
    InvalidEncoding,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;
        InvalidEncoding: "400 Bad Request", "64"
            => r#"{"error":"Request is not valid UTF-8","code":"INVALID_ENCODING"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
