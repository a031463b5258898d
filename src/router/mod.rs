//! Request dispatch.
//!
//! A dispatcher maps one request to exactly one [`Outcome`]. The concrete
//! dispatcher is composed once, when the station is finalized, from a base
//! router and optional decorators:
//!
//! ```text
//!               Router  |  RouterDomain
//!                  \         /
//!       MemoryRouter<D>   (response cache, optional)
//!                  |
//!         SyncRouter<D>   (concurrency gate, optional)
//! ```
//!
//! Nothing on the request path asks which features are enabled; the answer
//! is baked into the composed type.

pub(crate) mod memory;

use crate::{
    context::{Context, ContextPool},
    garden::Tree,
    http_errors,
    Method, Request, Response, StatusCode,
};
use std::{
    borrow::Cow,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// The six dispatcher shapes finalization can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterType {
    Normal,
    Memory,
    MemorySync,
    Domain,
    DomainMemory,
    DomainMemorySync,
}

impl RouterType {
    #[inline]
    pub const fn is_domain(self) -> bool {
        matches!(
            self,
            RouterType::Domain | RouterType::DomainMemory | RouterType::DomainMemorySync
        )
    }

    #[inline]
    pub const fn is_cached(self) -> bool {
        !matches!(self, RouterType::Normal | RouterType::Domain)
    }

    #[inline]
    pub const fn is_sync(self) -> bool {
        matches!(self, RouterType::MemorySync | RouterType::DomainMemorySync)
    }
}

impl fmt::Display for RouterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Decides whether a tree planted for one method answers another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodMatch {
    #[default]
    Exact,
    /// Any tree not planted for `GET` also answers `OPTIONS` preflights.
    Cors,
}

impl MethodMatch {
    #[inline(always)]
    pub fn matches(self, tree: Method, requested: Method) -> bool {
        match self {
            MethodMatch::Exact => tree == requested,
            MethodMatch::Cors => {
                tree == requested || (tree != Method::Get && requested == Method::Options)
            }
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Served,
    Redirected,
    NotFound,
}

/// A finalized dispatcher, shared by every worker.
pub trait Dispatch: Send + Sync + 'static {
    fn router_type(&self) -> RouterType;

    /// Routes the request held by `ctx` and runs what it resolves to.
    fn process_request(&self, ctx: &mut Context) -> Outcome;

    fn pool(&self) -> &ContextPool;

    /// Periodic housekeeping, run by the station's janitor.
    fn maintain(&self) {}

    /// Serves one request, leaving a complete response in `response`.
    ///
    /// A panicking handler is answered with `500`.
    fn serve_http(&self, request: &mut Request, response: &mut Response) -> Outcome {
        let pool = self.pool();
        let mut ctx = pool.acquire();
        ctx.reset(request, response);

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.process_request(&mut ctx))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                tracing::error!(
                    method = %ctx.method(),
                    path = ctx.path(),
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                );

                ctx.response_mut().discard();
                let emitted = panic::catch_unwind(AssertUnwindSafe(|| {
                    ctx.emit_error(StatusCode::InternalServerError)
                }));

                if let Err(payload) = emitted {
                    tracing::error!(
                        panic = panic_message(payload.as_ref()),
                        "error handler panicked, answering with the built-in page"
                    );

                    let response = ctx.response_mut();
                    response.discard();
                    http_errors::write_default(StatusCode::InternalServerError, response);
                }
                Outcome::Served
            }
        };

        ctx.response_mut().finish();
        ctx.detach(request, response);
        pool.release(ctx);

        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
        (Some(message), _) => *message,
        (_, Some(message)) => message.as_str(),
        _ => "unknown",
    }
}

/// Dispatcher for stations without host-scoped routes.
pub struct Router {
    garden: Arc<[Tree]>,
    matcher: MethodMatch,
    path_correction: bool,
    pool: Arc<ContextPool>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("trees", &self.garden.len())
            .field("matcher", &self.matcher)
            .field("path_correction", &self.path_correction)
            .finish()
    }
}

impl Router {
    pub(crate) fn new(
        garden: Arc<[Tree]>,
        matcher: MethodMatch,
        path_correction: bool,
        pool: Arc<ContextPool>,
    ) -> Self {
        Router {
            garden,
            matcher,
            path_correction,
            pool,
        }
    }

    #[inline]
    pub fn matcher(&self) -> MethodMatch {
        self.matcher
    }

    fn find(&self, tree: &Tree, ctx: &mut Context) -> Outcome {
        let found = ctx.resolve(&tree.root, tree.hosts);

        match found.handlers {
            Some(chain) => {
                ctx.run(chain.clone());
                Outcome::Served
            }
            None if found.must_redirect
                && self.path_correction
                && ctx.method() != Method::Connect =>
            {
                correct_path(ctx);
                Outcome::Redirected
            }
            None => {
                ctx.not_found();
                Outcome::NotFound
            }
        }
    }
}

impl Dispatch for Router {
    #[inline]
    fn router_type(&self) -> RouterType {
        RouterType::Normal
    }

    fn process_request(&self, ctx: &mut Context) -> Outcome {
        let method = ctx.method();
        let tree = self
            .garden
            .iter()
            .find(|tree| self.matcher.matches(tree.method, method));

        match tree {
            Some(tree) => self.find(tree, ctx),
            None => {
                ctx.not_found();
                Outcome::NotFound
            }
        }
    }

    #[inline]
    fn pool(&self) -> &ContextPool {
        &self.pool
    }
}

/// Dispatcher skipping host-scoped trees planted for another `Host`.
#[derive(Debug)]
pub struct RouterDomain(Router);

impl RouterDomain {
    #[inline]
    pub(crate) fn new(router: Router) -> Self {
        RouterDomain(router)
    }
}

impl Dispatch for RouterDomain {
    #[inline]
    fn router_type(&self) -> RouterType {
        RouterType::Domain
    }

    fn process_request(&self, ctx: &mut Context) -> Outcome {
        let router = &self.0;
        let method = ctx.method();
        let host = ctx.host();

        let tree = router.garden.iter().find(|tree| {
            (!tree.hosts || tree.domain == host) && router.matcher.matches(tree.method, method)
        });

        match tree {
            Some(tree) => router.find(tree, ctx),
            None => {
                ctx.not_found();
                Outcome::NotFound
            }
        }
    }

    #[inline]
    fn pool(&self) -> &ContextPool {
        &self.0.pool
    }
}

// Redirects to the path with its trailing slash toggled.
fn correct_path(ctx: &mut Context) {
    let path = ctx.path();
    let corrected = match path.len() {
        0 | 1 => "/".to_owned(),
        _ => match path.strip_suffix('/') {
            Some(stripped) => stripped.to_owned(),
            None => format!("{path}/"),
        },
    };

    let location = match ctx.request().query() {
        Some(query) => format!("{corrected}?{query}"),
        None => corrected.clone(),
    };
    ctx.request_mut().set_path(&corrected);

    if ctx.redirect(&location, StatusCode::MovedPermanently).is_err() {
        return;
    }

    if ctx.method() == Method::Get {
        let escaped = html_escape(&location);
        ctx.response_mut()
            .header("content-type", "text/html; charset=utf-8")
            .body_with(|body| {
                body.write("<a href=\"");
                body.write(&*escaped);
                body.write("\">Moved Permanently</a>.\n");
            });
    }
}

pub(crate) fn html_escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
