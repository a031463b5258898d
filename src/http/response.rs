//! A zero-allocation HTTP/1.x response builder reused across requests.

use crate::{
    http::types::{StatusCode, Version},
    limits::RespLimits,
    BodyWriter, WriteBuffer,
};
use std::{io::Write, str};

/// HTTP response builder handed to handlers through the
/// [`Context`](crate::Context).
///
/// Build responses by chaining methods in strict order:
/// [`status()`](Response::status) -> headers -> any body method.
///
/// The dispatcher finalizes whatever a handler chain leaves behind: an
/// untouched response becomes `200 OK` with an empty body, a response left
/// after its headers gets an empty body.
///
/// # Examples
/// ```
/// use garden_web::{Response, StatusCode};
///
/// let mut resp = Response::default();
/// resp.status(StatusCode::Ok)
///     .header("content-type", "text/html")
///     .body("<h1>Hello World</h1>");
///
/// assert_eq!(resp.written_status(), Some(StatusCode::Ok));
/// assert_eq!(resp.body_bytes(), b"<h1>Hello World</h1>");
/// ```
///
/// # Panics
/// Builder methods perform ordering checks in `debug` mode that panic on
/// violations. In `release` mode these checks are omitted.
#[derive(Debug)]
pub struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
}

/// Token returned by the finalizing body methods.
#[derive(Debug)]
pub struct Handled(());

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(&RespLimits::default())
    }
}

impl Response {
    /// Creates an empty response with the configured initial capacity.
    #[inline(always)]
    pub fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.discard();
    }

    // Drops everything written so far, keeping version and keep-alive.
    #[inline(always)]
    pub(crate) fn discard(&mut self) {
        self.buffer.clear();
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Closes any response a handler chain left incomplete.
    #[inline]
    pub(crate) fn finish(&mut self) {
        match self.state {
            ResponseState::Clean => {
                self.status(StatusCode::Ok).body(b"");
            }
            ResponseState::Headers => {
                self.body(b"");
            }
            ResponseState::Complete => {}
        }
    }
}

// Inspection
impl Response {
    /// `true` until [`status()`](Response::status) is called.
    #[inline(always)]
    pub fn is_clean(&self) -> bool {
        self.state == ResponseState::Clean
    }

    /// `true` once a body method has finalized the response.
    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.state == ResponseState::Complete
    }

    /// Whether the connection stays open after this response.
    #[inline(always)]
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the status written so far, if any.
    pub fn written_status(&self) -> Option<StatusCode> {
        if self.is_clean() {
            return None;
        }

        // "HTTP/1.x NNN ..."
        let code = self.buffer.get(9..12)?;
        let code = str::from_utf8(code).ok()?.parse().ok()?;
        StatusCode::from_u16(code)
    }

    /// Returns the first header value with case-insensitive name matching.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        let end = match self.state {
            ResponseState::Clean => return None,
            ResponseState::Headers => self.buffer.len(),
            ResponseState::Complete => self.start_body,
        };

        let head = str::from_utf8(&self.buffer[..end]).ok()?;
        head.split("\r\n").skip(1).find_map(|line| {
            let (key, value) = line.split_once(": ")?;
            key.eq_ignore_ascii_case(name).then_some(value)
        })
    }

    /// Returns the body of a completed response, empty otherwise.
    #[inline]
    pub fn body_bytes(&self) -> &[u8] {
        match self.state {
            ResponseState::Complete => &self.buffer[self.start_body..],
            _ => b"",
        }
    }
}

impl Response {
    /// Forces the connection to close after the response.
    ///
    /// # Panics
    /// In `debug` mode, when called after any finalizing method.
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }

    /// Sets the HTTP status code for the response.
    ///
    /// # Panics
    /// In `debug` mode, when called more than once.
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.into_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header to the response.
    ///
    /// Do not add `content-length` (calculated automatically) or
    /// `connection` (use [`close()`](Response::close)).
    ///
    /// # Examples
    /// ```
    /// use garden_web::{Response, StatusCode};
    ///
    /// let mut resp = Response::default();
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")
    ///     .header("x-custom-id", 128)
    ///     .header("x-cache-enabled", true)
    ///     .body("Done");
    ///
    /// assert_eq!(resp.header_value("X-Custom-Id"), Some("128"));
    /// ```
    ///
    /// # Panics
    /// In `debug` mode, when called before `status()` or after a body method.
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Sets the response body and finalizes the response.
    ///
    /// Adds a `connection` header when needed and fills in `content-length`.
    ///
    /// # Panics
    /// In `debug` mode, when called before `status()` or twice.
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure and finalizes the response.
    ///
    /// # Examples
    /// ```
    /// use garden_web::{Response, StatusCode};
    /// use std::io::Write;
    ///
    /// let mut resp = Response::default();
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "application/json")
    ///     .body_with(|writer| {
    ///         let _ = write!(writer, r#"{{"id":{}}}"#, 7);
    ///     });
    ///
    /// assert_eq!(resp.body_bytes(), br#"{"id":7}"#);
    /// ```
    ///
    /// # Panics
    /// In `debug` mode, when called before `status()` or twice.
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }
}

// Body framing
impl Response {
    const LENGTH_WIDTH: usize = 10;

    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        // Zero-padded placeholder, patched once the body length is known.
        self.buffer.extend_from_slice(b"content-length: 0000000000\r\n\r\n");
        self.posit_length = self.buffer.len() - Self::LENGTH_WIDTH - 4;
        self.start_body = self.buffer.len();
    }

    #[inline(always)]
    fn end_body(&mut self) -> Handled {
        let body_len = self.buffer.len() - self.start_body;
        let mut slot = &mut self.buffer[self.posit_length..self.posit_length + Self::LENGTH_WIDTH];
        let _ = write!(slot, "{body_len:010}");

        self.state = ResponseState::Complete;
        Handled(())
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static str> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) | (Version::Http10, false) => Some("close"),
            (Version::Http10, true) => Some("keep-alive"),
        }
    }
}

pub mod write {
    use std::{io::Write, sync::Arc};

    /// Writer for constructing the body in
    /// [body_with](super::Response::body_with).
    ///
    /// Accepts any [WriteBuffer] value and implements [std::io::Write].
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into a [`Response`](super::Response)
    /// as header values or body.
    ///
    /// Implemented for strings, bytes, booleans, chars and integers.
    ///
    /// # Example
    /// ```
    /// use garden_web::WriteBuffer;
    ///
    /// struct UserId(u32);
    ///
    /// impl WriteBuffer for UserId {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(b"user-");
    ///         self.0.write_to(buffer);
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! text {
        ($($t:ty),*) => { $(
            impl WriteBuffer for $t {
                #[inline]
                fn write_to(&self, buffer: &mut Vec<u8>) {
                    buffer.extend_from_slice(str::as_bytes(self));
                }
            }
        )* };
    }

    macro_rules! bytes {
        ($($t:ty),*) => { $(
            impl WriteBuffer for $t {
                #[inline]
                fn write_to(&self, buffer: &mut Vec<u8>) {
                    let bytes: &[u8] = self;
                    buffer.extend_from_slice(bytes);
                }
            }
        )* };
    }

    macro_rules! displayed {
        ($($t:ty),*) => { $(
            impl WriteBuffer for $t {
                #[inline]
                fn write_to(&self, buffer: &mut Vec<u8>) {
                    // Writing into a Vec cannot fail.
                    let _ = write!(buffer, "{self}");
                }
            }
        )* };
    }

    text!(str, String, Arc<str>);
    bytes!([u8], Vec<u8>, Arc<[u8]>);
    displayed!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char);

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
}



#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($(($name:expr, $value:expr; $result:expr);)*) => {$(
            let mut resp = Response::default();
            resp.status(StatusCode::Ok).header($name, $value);

            assert_eq!(str_op(&resp.buffer[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*};
    }

    #[test]
    fn header() {
        test_header! {
            ("name", "value"; "name: value\r\n");
            ("name", ""; "name: \r\n");
            ("name", 123; "name: 123\r\n");
            ("name", vec![35u8, 33, 43]; "name: #!+\r\n");
            ("name", false; "name: false\r\n");
            ("name", -123; "name: -123\r\n");
        }
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::default().header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::default();
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }
}


#[cfg(test)]
mod finish_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn clean_becomes_ok() {
        let mut resp = Response::default();
        resp.finish();

        assert_eq!(
            str_op(resp.buffer()),
            "HTTP/1.1 200 OK\r\ncontent-length: 0000000000\r\n\r\n"
        );
    }

    #[test]
    fn headers_get_empty_body() {
        let mut resp = Response::default();
        resp.status(StatusCode::NoContent).header("x-a", 1);
        resp.finish();

        assert!(resp.is_complete());
        assert_eq!(resp.written_status(), Some(StatusCode::NoContent));
        assert_eq!(resp.body_bytes(), b"");
    }

    #[test]
    fn complete_is_untouched() {
        let mut resp = Response::default();
        resp.status(StatusCode::Ok).body("x");
        let before = resp.buffer().to_vec();
        resp.finish();

        assert_eq!(resp.buffer(), before.as_slice());
    }

    #[test]
    fn reset_and_discard() {
        let limits = RespLimits {
            default_capacity: 8,
            max_capacity: 16,
            ..RespLimits::default()
        };
        let mut resp = Response::new(&limits);
        resp.close().status(StatusCode::Ok).body([b'x'; 64]);

        resp.discard();
        assert!(resp.is_clean());
        assert!(!resp.keep_alive);

        resp.status(StatusCode::Ok).body([b'x'; 64]);
        resp.reset(&limits);
        assert!(resp.is_clean());
        assert!(resp.keep_alive);
        assert!(resp.buffer.capacity() <= limits.max_capacity);
    }
}
