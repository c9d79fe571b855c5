//! Interceptors run around the handler.
//!
//! A request first passes the server middlewares, then those of its handler, then
//! reaches [`Handler::handle_request`](crate::handler::Handler::handle_request). Each
//! middleware receives a [`Next`] and decides whether to continue: not calling
//! [`Next::run`] short-circuits the rest of the chain, usually after sending a
//! response. Work placed after `next.run(request)` sees the response the handler
//! produced.
//!
//! The chain is a slice walked by index, so its depth costs no boxed closures.

mod auth;
mod cors;
mod headers;
mod logging;
mod rate_limit;

pub use auth::{AuthType, AuthenticationMiddleware, AuthorizationMiddleware};
pub use cors::CorsMiddleware;
pub use headers::{HeaderFilterMiddleware, HeaderFreeMiddleware};
pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;

use std::sync::Arc;

use crate::Request;

pub trait Middleware: Send + Sync {
    fn run(&self, request: &mut Request, next: Next<'_>);
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    last: &'a mut dyn FnMut(&mut Request),
}

impl Next<'_> {
    /// Runs the following middlewares, then the handler.
    pub fn run(self, request: &mut Request) {
        match self.chain.split_first() {
            Some((first, rest)) => first.run(request, Next { chain: rest, last: self.last }),
            None => (self.last)(request),
        }
    }
}

pub(crate) fn run_chain(chain: &[Arc<dyn Middleware>], request: &mut Request, last: &mut dyn FnMut(&mut Request)) {
    Next { chain, last }.run(request);
}

struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request, Next<'_>) + Send + Sync,
{
    fn run(&self, request: &mut Request, next: Next<'_>) {
        (self.0)(request, next);
    }
}

/// Creates a middleware from a closure.
///
/// ```
/// use micro_async_web::middleware::fn_middleware;
///
/// let tag = fn_middleware(|request, next| {
///     request.set_attribute("seen", "1");
///     next.run(request);
/// });
/// ```
pub fn fn_middleware<F>(f: F) -> impl Middleware
where
    F: Fn(&mut Request, Next<'_>) + Send + Sync,
{
    FnMiddleware(f)
}
