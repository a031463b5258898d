//! Transport limits and timeouts
//!
//! Default limits are intentionally conservative: they bound memory per
//! connection and cut off stalled or flooding clients.
//!
//! Each active connection consumes roughly
//! [`ReqLimits::buffer_size`] + [`RespLimits::default_capacity`] bytes,
//! plus one pooled [`Context`](crate::Context) while a request is in flight.
//!
//! # Examples
//!
//! ```no_run
//! use garden_web::{limits::{ConnLimits, ServerLimits}, Station};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> garden_web::Result<()> {
//!     let mut station = Station::new();
//!     station.get("/", |ctx: &mut garden_web::Context| {
//!         let _ = ctx.write("Hello world!");
//!     })?;
//!
//!     station
//!         .server_limits(ServerLimits {
//!             max_connections: 5000,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         });
//!
//!     let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
//!     station.listen(listener).await
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, queueing and overload behavior.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue has room? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \/
/// [--------]         /--------------------------\   No   [------]
/// [ Worker ] <====== | Is there a free worker?  | =====> [ Wait ]
/// [--------]         \--------------------------/        [------]
/// ```
///
/// Workers are long-lived tasks spawned once when the station starts
/// listening; each one pulls connections from the shared queue and feeds
/// their requests to the finalized dispatcher.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks, which is also the number of connections
    /// served concurrently (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker
    /// (default: `250`). Overflow connections receive an immediate `503`.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated tasks answering overflow connections with `503`
    /// (default: `1`). `0` closes overflow connections silently.
    pub count_503_handlers: usize,

    /// Whether canned error responses carry a JSON body (default: `true`).
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,

            _priv: (),
        }
    }
}

/// Strategy for worker tasks waiting when no connection is queued.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Uses [`tokio::task::yield_now()`]. Lowest latency, keeps a core busy.
    Yield,

    /// Uses [`tokio::time::sleep()`] with the given duration.
    Sleep(Duration),
}

/// Connection-level limits and timeouts.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum wait for the next request bytes (default: `2 seconds`).
    pub socket_read_timeout: Duration,

    /// Maximum duration of one response write (default: `3 seconds`).
    pub socket_write_timeout: Duration,

    /// Requests served before the connection is closed (default: `100`).
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection (default: `2 minutes`).
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,

            _priv: (),
        }
    }
}

/// Request parsing limits.
///
/// The read buffer of every connection is sized once from these values,
/// see [`buffer_size`](Self::buffer_size).
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum request target length, path plus query (default: `256 B`).
    pub url_size: usize,

    /// Maximum number of headers per request (default: `16`).
    pub header_count: usize,
    /// Maximum header name length (default: `64 B`).
    pub header_name_size: usize,
    /// Maximum header value length (default: `512 B`).
    pub header_value_size: usize,

    /// Maximum request body size (default: `4 KB`).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 4 * 1024,

            _priv: (),
        }
    }
}

impl ReqLimits {
    /// Bytes of read buffer each connection allocates.
    ///
    /// # Example
    /// ```
    /// use garden_web::limits::ReqLimits;
    ///
    /// let limits = ReqLimits::default();
    /// assert_eq!(limits.buffer_size(), 275 + 16 * 580 + 2 + 4096);
    /// ```
    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        // First line + Header * N + "\r\n" + Body
        self.first_line() + self.header_count * self.header_line() + 2 + self.body_size
    }

    // Request line:
    // CONNECT /url/test HTTP/1.1\r\n
    // |-----| |-------| |------|
    //  Method    URl    Version
    //
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    #[inline(always)]
    pub(crate) fn first_line(&self) -> usize {
        19 + self.url_size
    }

    // Header:
    // Name + ": " + Value + "\r\n"
    #[inline(always)]
    pub(crate) fn header_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }

    #[inline(always)]
    pub(crate) fn head_size(&self) -> usize {
        self.buffer_size() - self.body_size
    }
}

/// Response buffer sizing.
///
/// Buffers start at `default_capacity`; a buffer that grew beyond
/// `max_capacity` is reallocated instead of reused.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`)
    pub default_capacity: usize,
    /// Largest buffer kept between requests (default: `8192 B`)
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}

#[cfg(test)]
mod limits_tests {
    use super::*;

    #[test]
    fn buffer_layout() {
        let limits = ReqLimits {
            url_size: 10,
            header_count: 2,
            header_name_size: 3,
            header_value_size: 5,
            body_size: 7,
            ..ReqLimits::default()
        };

        assert_eq!(limits.first_line(), 29);
        assert_eq!(limits.header_line(), 12);
        assert_eq!(limits.buffer_size(), 29 + 24 + 2 + 7);
        assert_eq!(limits.head_size(), 29 + 24 + 2);
    }
}
