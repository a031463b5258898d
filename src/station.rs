//! The server instance: registration, finalization and serving.

use crate::{
    config::StationOptions,
    context::{Context, ContextPool, Handler},
    errors::{Error, Result},
    garden::{Garden, Route},
    http_errors::HttpErrors,
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    plugin::{Plugin, PluginContainer},
    router::{
        memory::{compose, CacheSetup, CacheStore, ContextCache, SyncContextCache},
        Dispatch, MethodMatch, Outcome, Router, RouterType,
    },
    server::{
        connection::AllLimits,
        server_impl::Server,
    },
    Method, Request, Response, StatusCode,
};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};

// Finalization state. Moves to `Optimized` once and stays there.
enum Stage {
    Unoptimized,
    Optimized(Arc<dyn Dispatch>),
}

/// Owns the routes, the plugins and the limits of one server.
///
/// Routes are planted first. The first call to [`serve`](Self::serve),
/// [`serve_http`](Self::serve_http) or [`listen`](Self::listen) finalizes
/// the station: the dispatcher is built for the features the planted routes
/// use, and routes planted afterwards are never reached.
///
/// ```no_run
/// use garden_web::{Context, Station};
///
/// #[tokio::main]
/// async fn main() -> garden_web::Result<()> {
///     let mut station = Station::new();
///     station.get("/users/:id", |ctx: &mut Context| {
///         let id = ctx.param("id").unwrap_or_default().to_owned();
///         let _ = ctx.write(id);
///     })?;
///
///     let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
///     station.listen(listener).await
/// }
/// ```
pub struct Station {
    options: StationOptions,
    garden: Garden,
    http_errors: HttpErrors,
    cache: Option<Box<dyn CacheStore>>,
    plugins: PluginContainer,
    limits: AllLimits,
    stage: Stage,
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("options", &self.options)
            .field("garden", &self.garden)
            .field("plugins", &self.plugins)
            .field("router_type", &self.router_type())
            .finish()
    }
}

impl Default for Station {
    fn default() -> Self {
        Station::with_options(StationOptions::default())
    }
}

macro_rules! method_helpers {
    ($($name:ident => $method:ident;)*) => { $(
        #[doc = concat!("Plants a `", stringify!($method), "` route with one handler.")]
        #[inline]
        pub fn $name<H: Handler>(&mut self, path: &str, handler: H) -> Result<()> {
            self.handle(Route::new(Method::$method, path).handler(handler))
        }
    )* };
}

// Registration
impl Station {
    #[inline]
    pub fn new() -> Self {
        Station::default()
    }

    pub fn with_options(options: StationOptions) -> Self {
        Station {
            options,
            garden: Garden::new(),
            http_errors: HttpErrors::default(),
            cache: None,
            plugins: PluginContainer::default(),
            limits: AllLimits::default(),
            stage: Stage::Unoptimized,
        }
    }

    #[inline]
    pub fn config(&self) -> &StationOptions {
        &self.options
    }

    #[inline]
    pub fn garden(&self) -> &Garden {
        &self.garden
    }

    /// Plants `route`, after every `pre_handle` hook accepted it.
    pub fn handle(&mut self, route: Route) -> Result<()> {
        self.plugins
            .do_pre_handle(&route)
            .map_err(|source| Error::RouteRejected {
                method: route.method(),
                path: route.path().to_owned(),
                source,
            })?;

        self.garden.plant(&route)?;

        if self.has_optimized() {
            tracing::warn!(
                method = %route.method(),
                path = route.path(),
                "route planted after finalization will never be served"
            );
        }

        self.plugins.do_post_handle(&route);
        Ok(())
    }

    method_helpers! {
        get => Get;
        post => Post;
        put => Put;
        delete => Delete;
        patch => Patch;
        head => Head;
        options => Options;
        connect => Connect;
        trace => Trace;
    }

    /// Registers the handler answering `status`.
    pub fn on_error<H: Handler>(&mut self, status: StatusCode, handler: H) -> &mut Self {
        if self.has_optimized() {
            tracing::warn!(%status, "error handler registered after finalization is ignored");
        }

        self.http_errors.on(status, handler);
        self
    }

    #[inline]
    pub fn on_not_found<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.on_error(StatusCode::NotFound, handler)
    }

    /// Registers the handler answering requests whose handler panicked.
    #[inline]
    pub fn on_panic<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.on_error(StatusCode::InternalServerError, handler)
    }

    /// Answers `ctx` with the handler registered for `status`.
    #[inline]
    pub fn emit_error(&self, status: StatusCode, ctx: &mut Context) {
        self.http_errors.emit(status, ctx);
    }

    /// Caches resolved routes in `store` instead of a built-in one.
    pub fn set_cache<C: CacheStore>(&mut self, store: C) -> &mut Self {
        self.options.cache = true;
        self.cache = Some(Box::new(store));
        self
    }

    /// Activates and registers a plugin.
    #[inline]
    pub fn plugin(&mut self, plugin: Plugin) -> Result<()> {
        self.plugins.plugin(plugin)
    }

    #[inline]
    pub fn plugins(&self) -> &PluginContainer {
        &self.plugins
    }

    #[inline]
    pub fn plugins_mut(&mut self) -> &mut PluginContainer {
        &mut self.plugins
    }

    #[inline]
    pub fn server_limits(&mut self, limits: ServerLimits) -> &mut Self {
        self.limits.server = limits;
        self
    }

    #[inline]
    pub fn connection_limits(&mut self, limits: ConnLimits) -> &mut Self {
        self.limits.conn = limits;
        self
    }

    #[inline]
    pub fn request_limits(&mut self, limits: ReqLimits) -> &mut Self {
        self.limits.req = limits;
        self
    }

    #[inline]
    pub fn response_limits(&mut self, limits: RespLimits) -> &mut Self {
        self.limits.resp = limits;
        self
    }
}

// Finalization
impl Station {
    /// Builds the dispatcher for the features the planted routes use.
    ///
    /// Runs once; later calls do nothing.
    #[inline]
    pub fn optimus_prime(&mut self) {
        self.finalize();
    }

    #[inline]
    pub fn has_optimized(&self) -> bool {
        matches!(self.stage, Stage::Optimized(_))
    }

    /// Shape of the finalized dispatcher.
    #[inline]
    pub fn router_type(&self) -> Option<RouterType> {
        match &self.stage {
            Stage::Optimized(dispatcher) => Some(dispatcher.router_type()),
            Stage::Unoptimized => None,
        }
    }

    /// The finalized dispatcher, finalizing first when needed.
    #[inline]
    pub fn serve(&mut self) -> Arc<dyn Dispatch> {
        self.finalize()
    }

    /// Serves one request without a network transport.
    ///
    /// ```
    /// use garden_web::{Context, Method, Outcome, Request, Response, Station};
    ///
    /// let mut station = Station::new();
    /// station.get("/docs/", |ctx: &mut Context| {
    ///     let _ = ctx.write("docs");
    /// }).unwrap();
    ///
    /// let mut resp = Response::default();
    /// let outcome = station.serve_http(&mut Request::new(Method::Get, "/docs"), &mut resp);
    ///
    /// assert_eq!(outcome, Outcome::Redirected);
    /// assert_eq!(resp.header_value("location"), Some("/docs/"));
    /// ```
    #[inline]
    pub fn serve_http(&mut self, request: &mut Request, response: &mut Response) -> Outcome {
        self.finalize().serve_http(request, response)
    }

    fn finalize(&mut self) -> Arc<dyn Dispatch> {
        if let Stage::Optimized(dispatcher) = &self.stage {
            return dispatcher.clone();
        }

        let cpus = self.options.logical_cpus();
        let concurrent = cpus > 1;
        let hosts = self.garden.has_hosts();
        let matcher = match self.garden.has_cors() {
            true => MethodMatch::Cors,
            false => MethodMatch::Exact,
        };

        let store = match (self.cache.take(), self.options.cache) {
            (Some(store), _) => Some(store),
            (None, true) if concurrent => Some(Box::new(SyncContextCache::new()) as Box<dyn CacheStore>),
            (None, true) => Some(Box::new(ContextCache::new()) as Box<dyn CacheStore>),
            (None, false) => None,
        };
        let cache = store.map(|store| CacheSetup {
            store,
            max_items: self.options.cache_max_items,
        });

        let errors = Arc::new(self.http_errors.clone());
        let pool = Arc::new(ContextPool::new(self.options.pool_capacity, errors));
        let base = Router::new(self.garden.freeze(), matcher, self.options.path_correction, pool);

        let dispatcher = compose(base, hosts, cache, concurrent);

        tracing::info!(
            router = %dispatcher.router_type(),
            cors = matcher == MethodMatch::Cors,
            hosts,
            cache = dispatcher.router_type().is_cached(),
            parallelism = cpus,
            trees = self.garden.len(),
            "station finalized"
        );

        self.stage = Stage::Optimized(dispatcher.clone());
        dispatcher
    }
}

// Serving
impl Station {
    /// Serves `listener` until the process ends.
    #[inline]
    pub async fn listen(&mut self, listener: TcpListener) -> Result<()> {
        self.listen_with_shutdown(listener, std::future::pending()).await
    }

    /// Serves `listener` until `signal` completes.
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() -> garden_web::Result<()> {
    /// let mut station = garden_web::Station::new();
    /// let listener = garden_web::bind("127.0.0.1:8080".parse().unwrap(), 1024)?;
    ///
    /// station
    ///     .listen_with_shutdown(listener, async {
    ///         let _ = tokio::signal::ctrl_c().await;
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn listen_with_shutdown<F>(&mut self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self.serve();
        self.plugins.do_pre_listen(self);

        let server = Server::new(listener, dispatcher.clone(), self.limits.clone());
        let address = server.local_addr()?;

        let janitor = dispatcher
            .router_type()
            .is_cached()
            .then(|| spawn_janitor(dispatcher.clone(), self.options.reset_interval()));

        self.plugins.do_post_listen(self);
        tracing::info!(%address, workers = self.limits.server.max_connections, "listening");

        tokio::select! {
            _ = server.launch() => {}
            _ = signal => {}
        }

        self.plugins.do_pre_close(self);
        if let Some(janitor) = janitor {
            janitor.abort();
        }
        drop(server);

        tracing::info!(%address, "station closed");
        Ok(())
    }
}

fn spawn_janitor(dispatcher: Arc<dyn Dispatch>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            dispatcher.maintain();
        }
    })
}

#[cfg(test)]
mod station_tests {
    use super::*;
    use crate::tools::*;
    use std::{
        collections::HashSet,
        num::NonZeroUsize,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };
    use tokio::io::AsyncWriteExt;
    use tracing_test::traced_test;

    fn station_with(cpus: usize, cache: bool) -> Station {
        Station::with_options(StationOptions {
            parallelism: NonZeroUsize::new(cpus),
            cache,
            ..StationOptions::default()
        })
    }

    fn request(station: &mut Station, req: Request) -> (Outcome, Response) {
        let mut req = req;
        let mut resp = Response::default();
        let outcome = station.serve_http(&mut req, &mut resp);
        (outcome, resp)
    }

    #[test]
    fn lattice() {
        let cases = [
            (false, false, 1, RouterType::Normal),
            (false, false, 4, RouterType::Normal),
            (true, false, 4, RouterType::Domain),
            (false, true, 1, RouterType::Memory),
            (false, true, 4, RouterType::MemorySync),
            (true, true, 1, RouterType::DomainMemory),
            (true, true, 4, RouterType::DomainMemorySync),
        ];

        for (hosts, cache, cpus, expected) in cases {
            let mut station = station_with(cpus, cache);
            let domain = if hosts { "a.example.com" } else { "" };
            station.handle(named_route(Method::Get, domain, "/x")).unwrap();

            assert_eq!(station.router_type(), None);
            station.optimus_prime();
            assert_eq!(station.router_type(), Some(expected), "{hosts} {cache} {cpus}");
            assert_eq!(expected.is_domain(), hosts);
            assert_eq!(expected.is_cached(), cache);
            assert_eq!(expected.is_sync(), cache && cpus > 1);
        }
    }

    #[test]
    fn custom_cache_store() {
        let mut station = station_with(4, false);
        station.set_cache(ContextCache::new());
        station.get("/", |_: &mut Context| {}).unwrap();

        assert_eq!(station.serve().router_type(), RouterType::MemorySync);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut station = station_with(1, false);
        station.handle(named_route(Method::Get, "", "/a")).unwrap();

        let first = station.serve();
        station.optimus_prime();
        let second = station.serve();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    #[traced_test]
    fn late_routes_are_unreachable() {
        let mut station = station_with(1, false);
        station.handle(named_route(Method::Get, "", "/early")).unwrap();
        station.optimus_prime();
        assert!(logs_contain("station finalized"));

        station.handle(named_route(Method::Get, "", "/late")).unwrap();
        assert!(logs_contain("route planted after finalization"));
        assert_eq!(station.garden().root_by_method(Method::Get).unwrap().len(), 2);

        let (outcome, _) = request(&mut station, Request::new(Method::Get, "/early"));
        assert_eq!(outcome, Outcome::Served);
        let (outcome, _) = request(&mut station, Request::new(Method::Get, "/late"));
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[test]
    fn cors_matcher_follows_routes() {
        let mut station = station_with(1, false);
        station.handle(named_route(Method::Post, "", "/form")).unwrap();
        let (outcome, _) = request(&mut station, Request::new(Method::Options, "/form"));
        assert_eq!(outcome, Outcome::NotFound);

        let mut station = station_with(1, false);
        station.handle(named_route(Method::Post, "", "/form").cors()).unwrap();
        station.handle(named_route(Method::Get, "", "/page")).unwrap();

        let (outcome, resp) = request(&mut station, Request::new(Method::Options, "/form"));
        assert_eq!(outcome, Outcome::Served);
        assert_eq!(resp.body_bytes(), b"/form");
        let (outcome, _) = request(&mut station, Request::new(Method::Options, "/page"));
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[test]
    fn virtual_hosts_are_isolated() {
        let mut station = station_with(1, false);
        station.handle(named_route(Method::Get, "a.example.com", "/x")).unwrap();
        station.handle(named_route(Method::Get, "b.example.com", "/x")).unwrap();

        let req = Request::new(Method::Get, "/x").with_host("a.example.com");
        let (_, resp) = request(&mut station, req);
        assert_eq!(resp.body_bytes(), b"a.example.com/x");

        let (outcome, _) = request(&mut station, Request::new(Method::Get, "/x"));
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[test]
    fn cached_station_serves_repeats() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut station = station_with(4, true);
        station
            .get("/n/:id", move |ctx: &mut Context| {
                counter.fetch_add(1, Ordering::Relaxed);
                let id = ctx.param("id").unwrap_or_default().to_owned();
                let _ = ctx.write(id);
            })
            .unwrap();

        for _ in 0..3 {
            let (_, resp) = request(&mut station, Request::new(Method::Get, "/n/5"));
            assert_eq!(resp.body_bytes(), b"5");
        }
        assert_eq!(calls.load(Ordering::Relaxed), 3);

        station.serve().maintain();
        let (_, resp) = request(&mut station, Request::new(Method::Get, "/n/6"));
        assert_eq!(resp.body_bytes(), b"6");
    }

    #[test]
    fn custom_error_handlers() {
        let mut station = station_with(1, false);
        station
            .on_not_found(|ctx: &mut Context| {
                let _ = ctx.write("gone fishing");
            })
            .on_panic(|ctx: &mut Context| {
                let _ = ctx.write("oops");
            });
        station
            .get("/boom", |_: &mut Context| panic!("handler failure"))
            .unwrap();

        let (_, resp) = request(&mut station, Request::new(Method::Get, "/nothing"));
        assert_eq!(resp.written_status(), Some(StatusCode::NotFound));
        assert_eq!(resp.body_bytes(), b"gone fishing");

        let (outcome, resp) = request(&mut station, Request::new(Method::Get, "/boom"));
        assert_eq!(outcome, Outcome::Served);
        assert_eq!(resp.written_status(), Some(StatusCode::InternalServerError));
        assert_eq!(resp.body_bytes(), b"oops");

        let pool = station.serve();
        assert_eq!(pool.pool().acquired(), pool.pool().released());
    }

    #[test]
    fn plugins_guard_registration() {
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        let mut station = station_with(1, false);
        station
            .plugin(
                Plugin::new("no-admin", "rejects admin routes")
                    .pre_handle(|route| match route.path().starts_with("/admin") {
                        true => Err("admin routes are disabled".into()),
                        false => Ok(()),
                    })
                    .post_handle(move |_| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }),
            )
            .unwrap();

        station.get("/public", |_: &mut Context| {}).unwrap();
        let err = station.get("/admin/users", |_: &mut Context| {}).unwrap_err();

        assert!(matches!(err, Error::RouteRejected { method: Method::Get, ref path, .. } if path == "/admin/users"));
        assert_eq!(accepted.load(Ordering::Relaxed), 1);
        assert_eq!(station.garden().root_by_method(Method::Get).unwrap().len(), 1);
    }

    #[test]
    fn pool_serves_each_request_alone() {
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let tracker = in_flight.clone();

        let mut station = station_with(4, true);
        station
            .get("/work/:n", move |ctx: &mut Context| {
                assert!(tracker.lock().unwrap().insert(ctx.id()), "context shared");
                std::thread::yield_now();
                let _ = ctx.write("ok");
                tracker.lock().unwrap().remove(&ctx.id());
            })
            .unwrap();
        let dispatcher = station.serve();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let dispatcher = &dispatcher;
                scope.spawn(move || {
                    for i in 0..25 {
                        let path = format!("/work/{}", (worker + i) % 5);
                        let (outcome, resp) = serve(&**dispatcher, Request::new(Method::Get, &path));
                        assert_eq!(outcome, Outcome::Served);
                        assert_eq!(resp.body_bytes(), b"ok");
                    }
                });
            }
        });

        assert_eq!(dispatcher.pool().acquired(), 200);
        assert_eq!(dispatcher.pool().released(), 200);
        assert!(in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn listen_until_shutdown() {
        let listener = crate::bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let address = listener.local_addr().unwrap();
        let closed = Arc::new(AtomicUsize::new(0));
        let on_close = closed.clone();
        let finalized_first = Arc::new(AtomicUsize::new(0));
        let on_listen = finalized_first.clone();

        let mut station = station_with(1, true);
        station.server_limits(ServerLimits {
            max_connections: 2,
            ..ServerLimits::default()
        });
        station
            .plugin(
                Plugin::new("lifecycle-watch", "")
                    .pre_listen(move |station| {
                        if station.router_type() == Some(RouterType::Memory) {
                            on_listen.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                    .pre_close(move |_| {
                        on_close.fetch_add(1, Ordering::Relaxed);
                    }),
            )
            .unwrap();
        station
            .get("/hello/:name", |ctx: &mut Context| {
                let body = format!("hello {}", ctx.param("name").unwrap_or_default());
                let _ = ctx.text(StatusCode::Ok, body);
            })
            .unwrap();

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let client = async move {
            let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
            stream
                .write_all(b"GET /hello/world HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let response = read_response(&mut stream).await;
            let _ = stop.send(());
            response
        };
        let server = station.listen_with_shutdown(listener, async {
            let _ = stopped.await;
        });

        let (served, response) = tokio::join!(server, client);
        served.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("hello world"));
        assert_eq!(finalized_first.load(Ordering::Relaxed), 1);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
        assert_eq!(station.router_type(), Some(RouterType::Memory));
    }
}
