//! garden_web - HTTP routing core with per-feature dispatch specialization
//!
//! Routes are planted into a [`Garden`]: one radix-style [`PathTree`] per
//! (method, domain) pair. When the [`Station`] is finalized it inspects what
//! was planted and builds the narrowest dispatcher that serves it:
//!
//! | Planted routes use  | Dispatcher                                 |
//! |---------------------|--------------------------------------------|
//! | nothing special     | [`Router`]                                 |
//! | virtual hosts       | [`RouterDomain`]                           |
//! | + route cache       | [`MemoryRouter`] over either               |
//! | + several CPUs      | [`SyncRouter`] over the memory router      |
//!
//! CORS routes switch method matching to [`MethodMatch::Cors`], where an
//! `OPTIONS` preflight reaches the route it asks about.
//!
//! # Features
//!
//! - **Named and wildcard parameters** - `/users/:id`, `/static/*file`
//! - **Trailing slash correction** - `301` to the planted variant of a path
//! - **Virtual hosts** - routes scoped to a `Host`
//! - **Pooled request contexts** - no per-request context allocation
//! - **Custom error pages** - per-status handlers, panics answered with `500`
//! - **Lifecycle plugins** - hooks around registration and serving
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use garden_web::{Context, Station, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> garden_web::Result<()> {
//!     let mut station = Station::new();
//!
//!     station.get("/", |ctx: &mut Context| {
//!         let _ = ctx.text(StatusCode::Ok, "Hello World!");
//!     })?;
//!     station.get("/users/:id", |ctx: &mut Context| {
//!         let id = ctx.param("id").unwrap_or_default().to_owned();
//!         let _ = ctx.write(id);
//!     })?;
//!
//!     let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
//!     station.listen(listener).await
//! }
//! ```
//! Virtual hosts, a route cache and a custom 404:
//! ```no_run
//! use garden_web::{Context, Method, Route, Station, StationOptions};
//!
//! #[tokio::main]
//! async fn main() -> garden_web::Result<()> {
//!     let options: StationOptions = "cache = true\ncache_reset_duration = \"10m\"".parse()?;
//!     options.logging.init();
//!
//!     let mut station = Station::with_options(options);
//!     station.handle(
//!         Route::new(Method::Get, "/")
//!             .domain("api.example.com")
//!             .handler(|ctx: &mut Context| {
//!                 let _ = ctx.write("api");
//!             }),
//!     )?;
//!     station.on_not_found(|ctx: &mut Context| {
//!         let _ = ctx.write("nothing here");
//!     });
//!
//!     let listener = garden_web::bind("0.0.0.0:8080".parse().unwrap(), 1024)?;
//!     station
//!         .listen_with_shutdown(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//! Limits:
//! ```no_run
//! use garden_web::{limits::{ConnLimits, ReqLimits, ServerLimits}, Station};
//! use std::time::Duration;
//!
//! let mut station = Station::new();
//! station
//!     .server_limits(ServerLimits {
//!         max_connections: 5000,
//!         ..ServerLimits::default()
//!     })
//!     .connection_limits(ConnLimits {
//!         socket_read_timeout: Duration::from_secs(5),
//!         max_requests_per_connection: 10_000,
//!         ..ConnLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         header_count: 18,
//!         body_size: 16 * 1024,
//!         ..ReqLimits::default()
//!     });
//! ```

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub mod config;
pub(crate) mod context;
pub(crate) mod errors;
pub(crate) mod garden;
pub(crate) mod http_errors;
pub mod limits;
pub(crate) mod plugin;
pub(crate) mod router;
pub(crate) mod station;
pub(crate) mod tree;

pub use crate::{
    config::{LogFormat, LoggingConfig, StationOptions},
    context::{Context, ContextPool, Handler, HandlerChain},
    errors::{BoxError, Error, Result},
    garden::{Garden, Route, Tree},
    http::{
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Version},
    },
    http_errors::HttpErrors,
    plugin::{Plugin, PluginContainer},
    router::{
        memory::{CacheKey, CacheStore, CachedRoute, ContextCache, MemoryRouter, SyncContextCache, SyncRouter},
        Dispatch, MethodMatch, Outcome, Router, RouterDomain, RouterType,
    },
    server::server_impl::bind,
    station::Station,
    tree::{Param, Params, PathTree},
};

#[cfg(test)]
pub(crate) mod tools {
    use crate::{Context, Dispatch, Handler, HandlerChain, Method, Outcome, Request, Response, Route};
    use std::{str::from_utf8, sync::Arc};
    use tokio::{io::AsyncReadExt, net::TcpStream};

    #[inline]
    pub fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    pub fn handler<F>(f: F) -> Arc<dyn Handler>
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    /// A chain whose only handler writes `name`.
    pub fn chain_named(name: &str) -> HandlerChain {
        let name = name.to_owned();
        Arc::from([handler(move |ctx: &mut Context| {
            let _ = ctx.write(name.clone());
        })])
    }

    /// What the first handler of `chain` writes.
    pub fn chain_name(chain: &HandlerChain) -> String {
        let mut ctx = Context::new(0, Arc::default());
        chain[0].serve(&mut ctx);
        str_op(ctx.response().body_bytes()).to_owned()
    }

    /// A route that writes its domain and path.
    pub fn named_route(method: Method, domain: &str, path: &str) -> Route {
        let name = format!("{domain}{path}");
        Route::new(method, path)
            .domain(domain)
            .handler(move |ctx: &mut Context| {
                let _ = ctx.write(name.clone());
            })
    }

    pub fn serve<D: Dispatch + ?Sized>(dispatcher: &D, request: Request) -> (Outcome, Response) {
        let mut request = request;
        let mut response = Response::default();
        let outcome = dispatcher.serve_http(&mut request, &mut response);
        (outcome, response)
    }

    /// Reads one response: the head plus `content-length` bytes of body.
    pub async fn read_response(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0; 4096];

        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = str_op(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .map_or(0, |value| value.trim().parse::<usize>().unwrap());

                if buf.len() >= end + 4 + length {
                    buf.truncate(end + 4 + length);
                    return String::from_utf8(buf).unwrap();
                }
            }

            let read = stream.read(&mut chunk).await.unwrap();
            if read == 0 {
                return String::from_utf8(buf).unwrap();
            }
            buf.extend_from_slice(&chunk[..read]);
        }
    }
}
