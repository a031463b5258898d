use crate::{
    errors::ErrorKind,
    http::types::{self, Method, Version},
    limits::ReqLimits,
};
use memchr::{memchr, memmem, memrchr};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::timeout};

/// An inbound HTTP request as seen by the dispatcher.
///
/// The transport fills one instance per connection and reuses it across
/// keep-alive requests; tests and embedders build one directly:
///
/// ```
/// use garden_web::{Method, Request};
///
/// let req = Request::new(Method::Get, "/users/42?fields=name").with_host("api.example.com");
///
/// assert_eq!(req.path(), "/users/42");
/// assert_eq!(req.query(), Some("fields=name"));
/// assert_eq!(req.host(), "api.example.com");
/// ```
///
/// # Wire format
///
/// The parser accepts `HTTP/1.0` and `HTTP/1.1` requests whose head is
/// valid `UTF-8` and terminated by exactly `CRLF` sequences:
///
/// ```text
/// [METHOD] SP [TARGET] SP HTTP/1.x CRLF
/// ([NAME] ":" OWS [VALUE] CRLF)*
/// CRLF
/// [BODY]
/// ```
///
/// Semantics are extracted from three headers:
///
/// | Header           | Purpose                      |
/// |------------------|------------------------------|
/// | `Host`           | Virtual-host dispatch        |
/// | `Content-Length` | Body size, bounded by limits |
/// | `Connection`     | `keep-alive` or `close`      |
///
/// Bodies require an explicit `Content-Length`; chunked transfer encoding
/// is not supported.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    version: Version,

    path: String,
    query: Option<String>,
    host: String,

    headers: Vec<(String, String)>,
    content_length: Option<usize>,
    keep_alive: bool,

    body: Vec<u8>,

    pub(crate) client_addr: SocketAddr,
}

impl Default for Request {
    fn default() -> Self {
        Request::new(Method::Get, "/")
    }
}

impl Request {
    const UNKNOWN_CLIENT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

    /// Creates a request for `target`, which may carry a `?query`.
    pub fn new(method: Method, target: &str) -> Self {
        let mut request = Request {
            method,
            version: Version::Http11,

            path: String::new(),
            query: None,
            host: String::new(),

            headers: Vec::new(),
            content_length: None,
            keep_alive: true,

            body: Vec::new(),

            client_addr: Self::UNKNOWN_CLIENT,
        };
        request.set_target(target);
        request
    }

    /// Sets the `Host` the request was addressed to.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host.clear();
        self.host.push_str(host);
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Sets the body and its `Content-Length`.
    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self.content_length = Some(self.body.len());
        self
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.version = Version::Http11;

        self.path.clear();
        self.query = None;
        self.host.clear();

        self.headers.clear();
        self.content_length = None;
        self.keep_alive = true;

        self.body.clear();
    }

    #[inline]
    fn set_target(&mut self, target: &str) {
        let (path, query) = match memchr(b'?', target.as_bytes()) {
            Some(i) => (&target[..i], Some(&target[i + 1..])),
            None => (target, None),
        };

        self.set_path(path);
        self.query = query.map(str::to_owned);
    }

    #[inline]
    pub(crate) fn set_path(&mut self, path: &str) {
        self.path.clear();
        self.path.push_str(path);
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn client_addr(&self) -> &SocketAddr {
        &self.client_addr
    }

    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// The path component of the target, without the query.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The query string without the leading `?`.
    #[inline(always)]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The `Host` header, empty when absent.
    #[inline(always)]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 9110](https://datatracker.ietf.org/doc/html/rfc9110#section-5.1)).
    /// Uses linear search.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All headers in arrival order.
    #[inline]
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Returns the keep-alive status of the connection.
    #[inline(always)]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the request body, empty when none was sent.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

// Parse first line
impl Request {
    #[inline]
    fn parse_first_line(&mut self, line: &str, limits: &ReqLimits) -> Result<(), ErrorKind> {
        if line.len() > limits.first_line() {
            return Err(ErrorKind::InvalidUrl);
        }

        let bytes = line.as_bytes();
        let method_end = memchr(b' ', bytes).ok_or(ErrorKind::InvalidMethod)?;
        self.method = Method::from_bytes(&bytes[..method_end])?;

        let target_end = memrchr(b' ', bytes)
            .filter(|&i| i > method_end)
            .ok_or(ErrorKind::InvalidVersion)?;
        let (version, keep_alive) = Version::from_bytes(&bytes[target_end + 1..])?;
        self.version = version;
        self.keep_alive = keep_alive;

        let target = &line[method_end + 1..target_end];
        if !target.starts_with('/') || target.len() > limits.url_size || target.contains(' ') {
            return Err(ErrorKind::InvalidUrl);
        }
        self.set_target(target);

        Ok(())
    }
}

// Parse headers
impl Request {
    #[inline]
    fn parse_header(&mut self, line: &str, limits: &ReqLimits) -> Result<(), ErrorKind> {
        let colon = memchr(b':', line.as_bytes()).ok_or(ErrorKind::InvalidHeader)?;

        let name = &line[..colon];
        if name.is_empty() || name.len() > limits.header_name_size || name.contains(' ') {
            return Err(ErrorKind::InvalidHeader);
        }

        let value = line[colon + 1..].trim_matches(|c| c == ' ' || c == '\t');
        if value.len() > limits.header_value_size {
            return Err(ErrorKind::InvalidHeader);
        }

        if name.eq_ignore_ascii_case("content-length") {
            let len =
                types::slice_to_usize(value.as_bytes()).ok_or(ErrorKind::InvalidContentLength)?;

            if len > limits.body_size {
                return Err(ErrorKind::BodyTooLarge);
            }
            self.content_length = Some(len);
        } else if name.eq_ignore_ascii_case("connection") {
            if value.eq_ignore_ascii_case("keep-alive") {
                self.keep_alive = true;
            } else if value.eq_ignore_ascii_case("close") {
                self.keep_alive = false;
            } else {
                return Err(ErrorKind::InvalidConnection);
            }
        } else if name.eq_ignore_ascii_case("host") {
            self.host.clear();
            self.host.push_str(value);
        }

        self.headers.push((name.to_owned(), value.to_owned()));
        Ok(())
    }
}

// Parse body
impl Request {
    #[inline]
    fn process_body(&mut self, body: &[u8]) -> Result<(), ErrorKind> {
        match (self.content_length, body.len()) {
            (Some(len), available) if len == available => {
                self.body.extend_from_slice(body);
                Ok(())
            }
            (Some(len), available) => Err(ErrorKind::BodyMismatch {
                expected: len,
                available,
            }),
            (None, 0) => Ok(()),
            (None, available) => Err(ErrorKind::UnexpectedBody(available)),
        }
    }
}

// Per-connection read buffer, sized once from `ReqLimits`.
#[derive(Debug)]
pub(crate) struct Parser {
    len: usize,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.buffer_size()].into_boxed_slice();

        Parser { len: 0, buffer }
    }

    // For tests
    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut parser = Parser::new(limits);

        let value = value.as_ref();
        parser.buffer[..value.len()].copy_from_slice(value);
        parser.len = value.len();
        parser
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.len = 0;
    }
}

// Work with Buffer
impl Parser {
    // Reads until a whole request (head and declared body) is buffered.
    // Returns `0` when the peer closed the connection before sending anything.
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        limits: &ReqLimits,
        time: Duration,
    ) -> Result<usize, ErrorKind> {
        self.len = 0;

        loop {
            if self.len == self.buffer.len() {
                return Err(ErrorKind::BodyTooLarge);
            }

            let n = timeout(time, stream.read(&mut self.buffer[self.len..]))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))??;

            if n == 0 {
                return Ok(self.len);
            }
            self.len += n;

            if self.is_complete(limits)? {
                return Ok(self.len);
            }
        }
    }

    #[inline]
    fn is_complete(&self, limits: &ReqLimits) -> Result<bool, ErrorKind> {
        let data = &self.buffer[..self.len];

        let Some(head_end) = memmem::find(data, b"\r\n\r\n") else {
            return match self.len >= limits.head_size() {
                true => Err(ErrorKind::TooManyHeaders),
                false => Ok(false),
            };
        };

        let declared = Self::declared_length(&data[..head_end]);
        Ok(self.len >= head_end + 4 + declared)
    }

    // Best-effort scan used only to know how much to read;
    // `parse` validates the header properly.
    #[inline]
    fn declared_length(head: &[u8]) -> usize {
        const NAME: &[u8] = b"content-length:";

        head.split(|&b| b == b'\n')
            .find(|line| line.len() > NAME.len() && line[..NAME.len()].eq_ignore_ascii_case(NAME))
            .and_then(|line| {
                let value = line[NAME.len()..].trim_ascii();
                types::slice_to_usize(value)
            })
            .unwrap_or(0)
    }

    #[inline]
    pub(crate) fn parse(&self, limits: &ReqLimits, request: &mut Request) -> Result<(), ErrorKind> {
        request.reset();

        let data = &self.buffer[..self.len];
        let head_end = memmem::find(data, b"\r\n\r\n").ok_or(ErrorKind::InvalidHeader)?;

        let head = simdutf8::basic::from_utf8(&data[..head_end])
            .map_err(|_| ErrorKind::InvalidEncoding)?;

        let mut lines = head.split("\r\n");
        let first_line = lines.next().ok_or(ErrorKind::InvalidVersion)?;
        request.parse_first_line(first_line, limits)?;

        for line in lines {
            if request.headers.len() >= limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }
            request.parse_header(line, limits)?;
        }

        request.process_body(&data[head_end + 4..])
    }
}
