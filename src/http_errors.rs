//! Fallback responses for error statuses.

use crate::{
    context::{Context, Handler},
    Response, StatusCode,
};
use std::{collections::HashMap, fmt, sync::Arc};

const INTERNAL_SERVER_ERROR: &str =
    "The server encountered an unexpected condition which prevented it from fulfilling the request.";

/// Handlers answering error statuses, keyed by status code.
///
/// [`emit`](Self::emit) writes the status line first, so a registered
/// handler only adds headers and a body:
///
/// ```
/// use garden_web::{Context, Method, Request, Response, Station, StatusCode};
///
/// let mut station = Station::new();
/// station.on_not_found(|ctx: &mut Context| {
///     let _ = ctx.write("nothing here");
/// });
///
/// let (mut req, mut resp) = (Request::new(Method::Get, "/missing"), Response::default());
/// station.serve_http(&mut req, &mut resp);
///
/// assert_eq!(resp.written_status(), Some(StatusCode::NotFound));
/// assert_eq!(resp.body_bytes(), b"nothing here");
/// ```
#[derive(Clone, Default)]
pub struct HttpErrors {
    handlers: HashMap<StatusCode, Arc<dyn Handler>>,
}

impl fmt::Debug for HttpErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl HttpErrors {
    /// Registers the handler for `status`, replacing any previous one.
    #[inline]
    pub fn on<H: Handler>(&mut self, status: StatusCode, handler: H) {
        self.handlers.insert(status, Arc::new(handler));
    }

    #[inline]
    pub fn has(&self, status: StatusCode) -> bool {
        self.handlers.contains_key(&status)
    }

    /// Answers `ctx` with `status`.
    pub fn emit(&self, status: StatusCode, ctx: &mut Context) {
        if ctx.response().is_clean() {
            ctx.response_mut().status(status);
        }

        match self.handlers.get(&status) {
            Some(handler) => handler.serve(ctx),
            None if !ctx.response().is_complete() => write_default(status, ctx.response_mut()),
            None => {}
        }
    }
}

/// Writes the built-in body for `status`, starting the response if needed.
pub(crate) fn write_default(status: StatusCode, response: &mut Response) {
    if response.is_clean() {
        response.status(status);
    }

    response
        .header("content-type", "text/plain; charset=utf-8")
        .body(default_message(status));
}

#[inline]
fn default_message(status: StatusCode) -> &'static str {
    match status {
        StatusCode::NotFound => "Not Found",
        StatusCode::InternalServerError => INTERNAL_SERVER_ERROR,
        other => other.reason(),
    }
}
