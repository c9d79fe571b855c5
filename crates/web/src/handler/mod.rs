//! Request handlers.
//!
//! The server keeps an ordered list of handlers. When a request head is parsed, the
//! first handler whose filter passes and whose [`Handler::can_handle`] accepts the
//! request is attached to it; if none does, the server's catch-all callback handler
//! is used. The attached handler then receives the body chunks or uploads, and once
//! the body is complete, [`Handler::handle_request`] runs behind the middleware chain.

mod callback;
mod json;
mod static_files;

pub use callback::{CallbackHandler, UriPattern};
pub use json::JsonHandler;
pub use static_files::StaticHandler;

use std::sync::Arc;

use micro_async_http::codec::{BodyChunk, UploadChunk};

use crate::filter::Filter;
use crate::middleware::{AuthenticationMiddleware, Middleware};
use crate::Request;

pub type RequestFn = Arc<dyn Fn(&mut Request) + Send + Sync>;
pub type UploadFn = Arc<dyn Fn(&mut Request, &UploadChunk) + Send + Sync>;
pub type BodyFn = Arc<dyn Fn(&mut Request, &BodyChunk) + Send + Sync>;

pub trait Handler: Send + Sync {
    fn options(&self) -> &HandlerOptions;

    /// Whether this handler takes the request. May record path captures or open files
    /// on the request for [`handle_request`](Self::handle_request) to use.
    fn can_handle(&self, request: &mut Request) -> bool;

    fn handle_request(&self, request: &mut Request);

    fn handle_upload(&self, _request: &mut Request, _chunk: &UploadChunk) {}

    fn handle_body(&self, _request: &mut Request, _chunk: &BodyChunk) {}

    /// A trivial handler does not need url-encoded or multipart bodies parsed.
    fn is_request_handler_trivial(&self) -> bool {
        true
    }
}

/// What every handler carries besides its own logic: a filter and a middleware chain.
#[derive(Clone, Default)]
pub struct HandlerOptions {
    filter: Option<Arc<dyn Filter>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    skip_server_middlewares: bool,
}

impl HandlerOptions {
    pub fn filter(&self, request: &Request) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter.matches(request))
    }

    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    pub fn skips_server_middlewares(&self) -> bool {
        self.skip_server_middlewares
    }
}

/// Chained configuration shared by every handler type.
pub trait HandlerBuilder: Sized {
    fn options_mut(&mut self) -> &mut HandlerOptions;

    #[must_use]
    fn with_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.options_mut().filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.options_mut().middlewares.push(Arc::new(middleware));
        self
    }

    /// Protects the handler with Digest authentication.
    #[must_use]
    fn with_authentication(self, username: &str, password: &str) -> Self {
        self.with_middleware(AuthenticationMiddleware::new().with_username(username).with_password(password))
    }

    /// Runs only this handler's own middlewares, not the server's.
    #[must_use]
    fn skip_server_middlewares(mut self) -> Self {
        self.options_mut().skip_server_middlewares = true;
        self
    }
}
