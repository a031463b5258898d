//! Resolved-route cache and the decorators that use it.

use super::{Dispatch, Outcome, Router, RouterDomain, RouterType};
use crate::{
    context::{Context, ContextPool, HandlerChain},
    tree::Params,
    Method,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Identifies a cached lookup.
///
/// `host` is only filled by domain-aware dispatchers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub host: String,
    pub path: String,
}

/// What a served request resolved to.
#[derive(Clone)]
pub struct CachedRoute {
    pub handlers: HandlerChain,
    pub params: Params,
}

impl fmt::Debug for CachedRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRoute")
            .field("handlers", &self.handlers.len())
            .field("params", &self.params)
            .finish()
    }
}

/// Storage behind [`MemoryRouter`].
pub trait CacheStore: Send + Sync + 'static {
    fn get(&self, key: &CacheKey) -> Option<CachedRoute>;

    fn add(&self, key: CacheKey, route: CachedRoute);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    /// Whether readers proceed in parallel instead of skipping on contention.
    fn is_concurrent(&self) -> bool;
}

/// Store for single-core runtimes.
///
/// `get` and `add` never block: finding the store busy, a `get` is a miss
/// and an `add` is dropped. `len` and `clear` wait for the lock; only
/// maintenance calls them.
#[derive(Default)]
pub struct ContextCache {
    items: Mutex<HashMap<CacheKey, CachedRoute>>,
}

impl ContextCache {
    #[inline]
    pub fn new() -> Self {
        ContextCache::default()
    }
}

impl CacheStore for ContextCache {
    #[inline]
    fn get(&self, key: &CacheKey) -> Option<CachedRoute> {
        self.items.try_lock()?.get(key).cloned()
    }

    #[inline]
    fn add(&self, key: CacheKey, route: CachedRoute) {
        if let Some(mut items) = self.items.try_lock() {
            items.insert(key, route);
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[inline]
    fn clear(&self) {
        self.items.lock().clear();
    }

    #[inline]
    fn is_concurrent(&self) -> bool {
        false
    }
}

/// Store shared by parallel workers: concurrent readers, exclusive writers.
#[derive(Default)]
pub struct SyncContextCache {
    items: RwLock<HashMap<CacheKey, CachedRoute>>,
}

impl SyncContextCache {
    #[inline]
    pub fn new() -> Self {
        SyncContextCache::default()
    }
}

impl CacheStore for SyncContextCache {
    #[inline]
    fn get(&self, key: &CacheKey) -> Option<CachedRoute> {
        self.items.read().get(key).cloned()
    }

    #[inline]
    fn add(&self, key: CacheKey, route: CachedRoute) {
        self.items.write().insert(key, route);
    }

    #[inline]
    fn len(&self) -> usize {
        self.items.read().len()
    }

    #[inline]
    fn clear(&self) {
        self.items.write().clear();
    }

    #[inline]
    fn is_concurrent(&self) -> bool {
        true
    }
}

/// Serves repeated requests from the cache, skipping the tree walk.
///
/// Only `Served` outcomes are recorded; redirects and misses always go
/// through the inner dispatcher.
pub struct MemoryRouter<D> {
    inner: D,
    cache: Box<dyn CacheStore>,
    max_items: usize,
    domain: bool,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl<D: Dispatch> MemoryRouter<D> {
    pub(crate) fn new(inner: D, cache: Box<dyn CacheStore>, max_items: usize) -> Self {
        let domain = inner.router_type().is_domain();

        MemoryRouter {
            inner,
            cache,
            max_items,
            domain,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cache(&self) -> &dyn CacheStore {
        &*self.cache
    }

    #[inline]
    fn key(&self, ctx: &Context) -> CacheKey {
        CacheKey {
            method: ctx.method(),
            host: match self.domain {
                true => ctx.host().to_owned(),
                false => String::new(),
            },
            path: ctx.path().to_owned(),
        }
    }
}

impl<D: Dispatch> Dispatch for MemoryRouter<D> {
    #[inline]
    fn router_type(&self) -> RouterType {
        match self.inner.router_type() {
            RouterType::Domain => RouterType::DomainMemory,
            _ => RouterType::Memory,
        }
    }

    fn process_request(&self, ctx: &mut Context) -> Outcome {
        let key = self.key(ctx);

        if let Some(hit) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            ctx.bind(&hit.params);
            ctx.run(hit.handlers);
            return Outcome::Served;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let outcome = self.inner.process_request(ctx);
        if outcome == Outcome::Served {
            if let Some(handlers) = ctx.handlers() {
                let route = CachedRoute {
                    handlers: handlers.clone(),
                    params: ctx.params().clone(),
                };
                self.cache.add(key, route);
            }
        }
        outcome
    }

    #[inline]
    fn pool(&self) -> &ContextPool {
        self.inner.pool()
    }

    fn maintain(&self) {
        let len = self.cache.len();

        if self.max_items == 0 || len > self.max_items {
            self.cache.clear();
            tracing::debug!(cleared = len, max_items = self.max_items, "route cache reset");
        }
        self.inner.maintain();
    }
}

/// Gate letting requests share the cache while maintenance runs alone.
pub struct SyncRouter<D> {
    inner: D,
    gate: RwLock<()>,
}

impl<D: Dispatch> SyncRouter<D> {
    pub(crate) fn new(inner: D) -> Self {
        SyncRouter {
            inner,
            gate: RwLock::new(()),
        }
    }
}

impl<D: Dispatch> Dispatch for SyncRouter<D> {
    #[inline]
    fn router_type(&self) -> RouterType {
        match self.inner.router_type() {
            RouterType::DomainMemory => RouterType::DomainMemorySync,
            _ => RouterType::MemorySync,
        }
    }

    #[inline]
    fn process_request(&self, ctx: &mut Context) -> Outcome {
        let _shared = self.gate.read();
        self.inner.process_request(ctx)
    }

    #[inline]
    fn pool(&self) -> &ContextPool {
        self.inner.pool()
    }

    fn maintain(&self) {
        let _exclusive = self.gate.write();
        self.inner.maintain();
    }
}

/// Response cache settings handed to [`compose`].
pub(crate) struct CacheSetup {
    pub(crate) store: Box<dyn CacheStore>,
    pub(crate) max_items: usize,
}

/// Builds the dispatcher for the discovered features.
pub(crate) fn compose(
    base: Router,
    domain: bool,
    cache: Option<CacheSetup>,
    concurrent: bool,
) -> Arc<dyn Dispatch> {
    match (domain, cache, concurrent) {
        (false, None, _) => Arc::new(base),
        (true, None, _) => Arc::new(RouterDomain::new(base)),

        (false, Some(cache), false) => Arc::new(MemoryRouter::new(base, cache.store, cache.max_items)),
        (false, Some(cache), true) => Arc::new(SyncRouter::new(MemoryRouter::new(
            base,
            cache.store,
            cache.max_items,
        ))),

        (true, Some(cache), false) => Arc::new(MemoryRouter::new(
            RouterDomain::new(base),
            cache.store,
            cache.max_items,
        )),
        (true, Some(cache), true) => Arc::new(SyncRouter::new(MemoryRouter::new(
            RouterDomain::new(base),
            cache.store,
            cache.max_items,
        ))),
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;
    use crate::{garden::Garden, router::MethodMatch, tools::*, Request};

    fn base(routes: &[(Method, &str, &str)]) -> Router {
        let mut garden = Garden::new();
        for (method, domain, path) in routes {
            garden.plant(&named_route(*method, domain, path)).unwrap();
        }

        let pool = Arc::new(ContextPool::new(8, Arc::default()));
        Router::new(garden.freeze(), MethodMatch::Exact, true, pool)
    }

    #[test]
    fn caches_served_routes_only() {
        let router = MemoryRouter::new(
            base(&[(Method::Get, "", "/users/:id"), (Method::Get, "", "/dir/")]),
            Box::new(ContextCache::new()),
            100,
        );
        assert_eq!(router.router_type(), RouterType::Memory);

        let (_, first) = serve(&router, Request::new(Method::Get, "/users/7"));
        let (_, second) = serve(&router, Request::new(Method::Get, "/users/7"));
        assert_eq!(first.body_bytes(), second.body_bytes());
        assert_eq!((router.misses(), router.hits()), (1, 1));
        assert_eq!(router.cache().len(), 1);

        let (outcome, _) = serve(&router, Request::new(Method::Get, "/dir"));
        assert_eq!(outcome, Outcome::Redirected);
        let (outcome, _) = serve(&router, Request::new(Method::Get, "/nope"));
        assert_eq!(outcome, Outcome::NotFound);
        assert_eq!(router.cache().len(), 1);
    }

    #[test]
    fn hit_restores_params() {
        let mut garden = Garden::new();
        garden
            .plant(&crate::Route::new(Method::Get, "/p/:id").handler(|ctx: &mut Context| {
                let body = ctx.param("id").unwrap_or("-").to_owned();
                let _ = ctx.write(body);
            }))
            .unwrap();
        let pool = Arc::new(ContextPool::new(8, Arc::default()));
        let router = MemoryRouter::new(
            Router::new(garden.freeze(), MethodMatch::Exact, true, pool),
            Box::new(SyncContextCache::new()),
            100,
        );

        serve(&router, Request::new(Method::Get, "/p/abc"));
        let (_, resp) = serve(&router, Request::new(Method::Get, "/p/abc"));
        assert_eq!(router.hits(), 1);
        assert_eq!(resp.body_bytes(), b"abc");
    }

    #[test]
    fn domain_keys_include_host() {
        let router = MemoryRouter::new(
            RouterDomain::new(base(&[
                (Method::Get, "a.example.com", "/x"),
                (Method::Get, "b.example.com", "/x"),
            ])),
            Box::new(ContextCache::new()),
            100,
        );
        assert_eq!(router.router_type(), RouterType::DomainMemory);

        let a = Request::new(Method::Get, "/x").with_host("a.example.com");
        let b = Request::new(Method::Get, "/x").with_host("b.example.com");

        serve(&router, a.clone());
        assert_eq!(serve(&router, b).1.body_bytes(), b"b.example.com/x");
        assert_eq!(serve(&router, a).1.body_bytes(), b"a.example.com/x");
        assert_eq!(router.cache().len(), 2);
    }

    #[test]
    fn maintenance_thresholds() {
        let routes = [(Method::Get, "", "/a"), (Method::Get, "", "/b")];

        let router = MemoryRouter::new(base(&routes), Box::new(ContextCache::new()), 1);
        serve(&router, Request::new(Method::Get, "/a"));
        router.maintain();
        assert_eq!(router.cache().len(), 1);

        serve(&router, Request::new(Method::Get, "/b"));
        router.maintain();
        assert!(router.cache().is_empty());

        let router = MemoryRouter::new(base(&routes), Box::new(ContextCache::new()), 0);
        serve(&router, Request::new(Method::Get, "/a"));
        router.maintain();
        assert!(router.cache().is_empty());
    }

    #[test]
    fn bare_store_skips_when_busy() {
        let cache = ContextCache::new();
        let key = CacheKey {
            method: Method::Get,
            host: String::new(),
            path: "/k".into(),
        };
        let route = CachedRoute {
            handlers: chain_named("/k"),
            params: Params::default(),
        };

        let guard = cache.items.lock();
        cache.add(key.clone(), route.clone());
        assert!(cache.get(&key).is_none());
        drop(guard);

        cache.add(key.clone(), route);
        assert!(cache.get(&key).is_some());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(!cache.is_concurrent());
        assert!(SyncContextCache::new().is_concurrent());
    }

    #[test]
    fn lattice() {
        let cases = [
            (false, false, false, RouterType::Normal),
            (false, false, true, RouterType::Normal),
            (true, false, true, RouterType::Domain),
            (false, true, false, RouterType::Memory),
            (false, true, true, RouterType::MemorySync),
            (true, true, false, RouterType::DomainMemory),
            (true, true, true, RouterType::DomainMemorySync),
        ];

        for (domain, cached, concurrent, expected) in cases {
            let cache = cached.then(|| CacheSetup {
                store: Box::new(ContextCache::new()),
                max_items: 10,
            });
            let router = compose(base(&[]), domain, cache, concurrent);
            assert_eq!(router.router_type(), expected);
        }
    }

    #[test]
    fn sync_router_serves_in_parallel() {
        let router = SyncRouter::new(MemoryRouter::new(
            base(&[(Method::Get, "", "/a/:id")]),
            Box::new(SyncContextCache::new()),
            1000,
        ));

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let router = &router;
                scope.spawn(move || {
                    for i in 0..50 {
                        let path = format!("/a/{}", (worker * 50 + i) % 20);
                        let (outcome, _) = serve(router, Request::new(Method::Get, &path));
                        assert_eq!(outcome, Outcome::Served);
                    }
                    router.maintain();
                });
            }
        });

        assert_eq!(router.pool().acquired(), 200);
        assert_eq!(router.pool().released(), 200);
    }
}
