//! Per-request state handed to handlers, and the pool it is drawn from.

use crate::{
    errors::{Error, Result},
    http_errors::HttpErrors,
    limits::RespLimits,
    tree::{BranchMatch, Params, PathTree},
    Method, Request, Response, StatusCode, WriteBuffer,
};
use crossbeam::queue::ArrayQueue;
use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// A request handler.
///
/// Implemented for every `Fn(&mut Context)`, so closures and plain
/// functions can be planted directly:
///
/// ```
/// use garden_web::{Context, Station};
///
/// fn hello(ctx: &mut Context) {
///     let _ = ctx.write("hello");
/// }
///
/// let mut station = Station::new();
/// station.get("/", hello).unwrap();
/// station.get("/bye", |ctx: &mut Context| {
///     let _ = ctx.write("bye");
/// }).unwrap();
/// ```
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, ctx: &mut Context);
}

impl<F> Handler for F
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    #[inline(always)]
    fn serve(&self, ctx: &mut Context) {
        self(ctx)
    }
}

/// Handlers of one route, run in registration order.
pub type HandlerChain = Arc<[Arc<dyn Handler>]>;

/// Everything a handler sees about the request it serves.
///
/// Contexts are pooled. The request and response are swapped in when the
/// dispatcher takes a context and swapped back out when it is released, so
/// nothing is allocated per request.
pub struct Context {
    id: usize,
    request: Request,
    response: Response,
    params: Params,

    handlers: Option<HandlerChain>,
    pos: usize,
    stopped: bool,

    errors: Arc<HttpErrors>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("method", &self.request.method())
            .field("path", &self.request.path())
            .field("params", &self.params)
            .field("pos", &self.pos)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Context {
    pub(crate) fn new(id: usize, errors: Arc<HttpErrors>) -> Self {
        let empty = RespLimits {
            default_capacity: 0,
            ..RespLimits::default()
        };

        Context {
            id,
            request: Request::default(),
            response: Response::new(&empty),
            params: Params::default(),
            handlers: None,
            pos: 0,
            stopped: false,
            errors,
        }
    }

    /// Takes over the connection's buffers for one request.
    #[inline]
    pub(crate) fn reset(&mut self, request: &mut Request, response: &mut Response) {
        mem::swap(&mut self.request, request);
        mem::swap(&mut self.response, response);

        self.params.clear();
        self.handlers = None;
        self.pos = 0;
        self.stopped = false;
    }

    /// Hands the buffers back, undoing [`reset`](Self::reset).
    #[inline]
    pub(crate) fn detach(&mut self, request: &mut Request, response: &mut Response) {
        mem::swap(&mut self.request, request);
        mem::swap(&mut self.response, response);

        self.handlers = None;
    }

    /// Looks `tree` up with this request's path, prefixed by its host when
    /// the tree is host-scoped.
    #[inline]
    pub(crate) fn resolve<'t>(&mut self, tree: &'t PathTree, host_scoped: bool) -> BranchMatch<'t> {
        match host_scoped {
            true => {
                let key = [self.request.host(), self.request.path()].concat();
                tree.get_branch(&key, &mut self.params)
            }
            false => tree.get_branch(self.request.path(), &mut self.params),
        }
    }

    /// Runs `chain` from its first handler.
    #[inline]
    pub(crate) fn run(&mut self, chain: HandlerChain) {
        self.handlers = Some(chain);
        self.pos = 0;
        self.next();
    }

    #[inline]
    pub(crate) fn bind(&mut self, params: &Params) {
        self.params.clone_from_slice(params);
    }

    #[inline]
    pub(crate) fn handlers(&self) -> Option<&HandlerChain> {
        self.handlers.as_ref()
    }

    #[inline]
    pub(crate) fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }
}

// Chain control
impl Context {
    /// Runs the remaining handlers of the chain now.
    ///
    /// Handlers calling `next` get control back once the rest of the chain
    /// has finished, which is how "around" middleware is written:
    ///
    /// ```
    /// use garden_web::{Context, Method, Request, Response, Route, Station};
    ///
    /// let mut station = Station::new();
    /// station.handle(
    ///     Route::new(Method::Get, "/")
    ///         .handler(|ctx: &mut Context| {
    ///             ctx.next();
    ///             assert!(ctx.response().is_complete());
    ///         })
    ///         .handler(|ctx: &mut Context| {
    ///             let _ = ctx.write("inner");
    ///         }),
    /// ).unwrap();
    ///
    /// let (mut req, mut resp) = (Request::new(Method::Get, "/"), Response::default());
    /// station.serve_http(&mut req, &mut resp);
    /// assert_eq!(resp.body_bytes(), b"inner");
    /// ```
    pub fn next(&mut self) {
        let Some(chain) = self.handlers.clone() else {
            return;
        };

        while !self.stopped {
            let Some(handler) = chain.get(self.pos) else {
                break;
            };
            self.pos += 1;
            handler.serve(self);
        }
    }

    /// Skips every handler not yet run.
    #[inline]
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

// Request side
impl Context {
    /// Pool-unique identifier of this context.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.request.method()
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.request.path()
    }

    #[inline]
    pub fn host(&self) -> &str {
        self.request.host()
    }

    /// Value of the route parameter `name`, e.g. `id` for `/users/:id`.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    #[inline]
    pub fn params(&self) -> &Params {
        &self.params
    }
}

// Response side
impl Context {
    #[inline]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Direct access to the response builder.
    #[inline]
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Writes `status` and a `location` header.
    ///
    /// The response stays open so a body can follow; the dispatcher closes
    /// it otherwise.
    pub fn redirect(&mut self, url: &str, status: StatusCode) -> Result<()> {
        if !self.response.is_clean() {
            return Err(Error::ResponseCommitted);
        }

        self.response.status(status).header("location", url);
        Ok(())
    }

    /// Answers with the station's `404` handler.
    #[inline]
    pub fn not_found(&mut self) {
        self.emit_error(StatusCode::NotFound);
    }

    /// Answers with the handler registered for `status`, or a plain-text
    /// default.
    #[inline]
    pub fn emit_error(&mut self, status: StatusCode) {
        let errors = self.errors.clone();
        errors.emit(status, self);
    }

    /// Writes the body, starting a `200 OK` if no status was set yet.
    pub fn write<T: WriteBuffer>(&mut self, body: T) -> Result<()> {
        if self.response.is_complete() {
            return Err(Error::ResponseCommitted);
        }
        if self.response.is_clean() {
            self.response.status(StatusCode::Ok);
        }

        self.response.body(body);
        Ok(())
    }

    /// Writes a complete `text/plain` response.
    pub fn text<T: WriteBuffer>(&mut self, status: StatusCode, body: T) -> Result<()> {
        if !self.response.is_clean() {
            return Err(Error::ResponseCommitted);
        }

        self.response
            .status(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(body);
        Ok(())
    }
}

/// Bounded pool of contexts shared by every worker.
pub struct ContextPool {
    queue: ArrayQueue<Box<Context>>,
    errors: Arc<HttpErrors>,

    next_id: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .field("acquired", &self.acquired())
            .field("released", &self.released())
            .finish()
    }
}

impl ContextPool {
    pub(crate) fn new(capacity: usize, errors: Arc<HttpErrors>) -> Self {
        ContextPool {
            queue: ArrayQueue::new(capacity.max(1)),
            errors,
            next_id: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Pops an idle context, building a new one when none is left.
    #[inline]
    pub(crate) fn acquire(&self) -> Box<Context> {
        self.acquired.fetch_add(1, Ordering::Relaxed);

        self.queue.pop().unwrap_or_else(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Box::new(Context::new(id, self.errors.clone()))
        })
    }

    /// Returns a detached context. Dropped when the pool is full.
    #[inline]
    pub(crate) fn release(&self, mut ctx: Box<Context>) {
        ctx.params.clear();
        ctx.handlers = None;

        self.released.fetch_add(1, Ordering::Relaxed);
        let _ = self.queue.push(ctx);
    }

    /// Total number of contexts handed out.
    #[inline]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Total number of contexts given back.
    #[inline]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Contexts currently idle in the pool.
    #[inline]
    pub fn idle(&self) -> usize {
        self.queue.len()
    }
}
