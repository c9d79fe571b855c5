use std::fmt;
use std::sync::Arc;

use micro_async_http::codec::{BodyChunk, UploadChunk};
use micro_async_http::protocol::MethodSet;
use regex::Regex;
use tracing::warn;

use crate::handler::{BodyFn, Handler, HandlerBuilder, HandlerOptions, RequestFn, UploadFn};
use crate::Request;

/// How a [`CallbackHandler`] matches the request url.
#[derive(Debug, Clone)]
pub enum UriPattern {
    /// Matches every url.
    Any,
    /// The url itself or anything below it: `/api` matches `/api` and `/api/x`.
    Exact(String),
    /// `/api*`: any url starting with `/api`.
    Prefix(String),
    /// `/*.jpg`: any url ending with `.jpg`.
    Extension(String),
    /// `^/users/(\d+)$`: capture groups become path arguments.
    Regex(Regex),
}

impl UriPattern {
    /// Parses a route. Patterns that fail to compile as regex never match.
    pub fn parse(uri: &str) -> Self {
        if uri.is_empty() {
            Self::Any
        } else if uri.starts_with('^') && uri.ends_with('$') {
            match Regex::new(uri) {
                Ok(regex) => Self::Regex(regex),
                Err(e) => {
                    warn!(uri, cause = %e, "invalid route pattern");
                    Self::Exact(String::new())
                }
            }
        } else if uri.starts_with("/*.") {
            let extension = uri.rfind('.').map_or(uri, |dot| &uri[dot..]);
            Self::Extension(extension.to_string())
        } else if let Some(prefix) = uri.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(uri.to_string())
        }
    }

    /// Returns the captured groups when the url matches.
    pub fn captures(&self, url: &str) -> Option<Vec<String>> {
        let matched = match self {
            Self::Any => true,
            Self::Exact(uri) => !uri.is_empty() && (url == uri || url.strip_prefix(uri.as_str()).is_some_and(|rest| rest.starts_with('/'))),
            Self::Prefix(prefix) => url.starts_with(prefix.as_str()),
            Self::Extension(extension) => url.ends_with(extension.as_str()),
            Self::Regex(regex) => {
                let captures = regex.captures(url)?;
                let groups = captures.iter().skip(1).map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()));
                return Some(groups.collect());
            }
        };
        matched.then(Vec::new)
    }
}

/// Routes matching requests to user callbacks.
///
/// ```
/// use micro_async_http::protocol::MethodSet;
/// use micro_async_web::handler::CallbackHandler;
///
/// let handler = CallbackHandler::new("^/sensors/([a-z]+)$")
///     .with_methods(MethodSet::GET)
///     .on_request(|request| {
///         let name = request.path_arg(0).unwrap_or_default().to_string();
///         request.send_text(200, "text/plain", name);
///     });
/// ```
#[derive(Clone)]
pub struct CallbackHandler {
    pattern: UriPattern,
    methods: MethodSet,
    on_request: Option<RequestFn>,
    on_upload: Option<UploadFn>,
    on_body: Option<BodyFn>,
    options: HandlerOptions,
}

impl CallbackHandler {
    pub fn new(uri: &str) -> Self {
        Self {
            pattern: UriPattern::parse(uri),
            methods: MethodSet::ANY,
            on_request: None,
            on_upload: None,
            on_body: None,
            options: HandlerOptions::default(),
        }
    }

    /// The handler behind unmatched requests: answers `404` unless given a callback.
    pub(crate) fn catch_all() -> Self {
        Self::new("")
    }

    pub fn with_methods(mut self, methods: MethodSet) -> Self {
        self.methods = methods;
        self
    }

    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.on_request = Some(Arc::new(f));
        self
    }

    pub fn on_upload<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Request, &UploadChunk) + Send + Sync + 'static,
    {
        self.on_upload = Some(Arc::new(f));
        self
    }

    pub fn on_body<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Request, &BodyChunk) + Send + Sync + 'static,
    {
        self.on_body = Some(Arc::new(f));
        self
    }

    pub(crate) fn set_request_fn(&mut self, f: Option<RequestFn>) {
        self.on_request = f;
    }

    pub(crate) fn set_upload_fn(&mut self, f: Option<UploadFn>) {
        self.on_upload = f;
    }

    pub(crate) fn set_body_fn(&mut self, f: Option<BodyFn>) {
        self.on_body = f;
    }
}

impl fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("on_request", &self.on_request.is_some())
            .field("on_upload", &self.on_upload.is_some())
            .field("on_body", &self.on_body.is_some())
            .finish_non_exhaustive()
    }
}

impl HandlerBuilder for CallbackHandler {
    fn options_mut(&mut self) -> &mut HandlerOptions {
        &mut self.options
    }
}

impl Handler for CallbackHandler {
    fn options(&self) -> &HandlerOptions {
        &self.options
    }

    fn can_handle(&self, request: &mut Request) -> bool {
        if self.on_request.is_none() || !request.is_http() || !self.methods.matches(request.method()) {
            return false;
        }
        match self.pattern.captures(request.url()) {
            Some(captures) => {
                for capture in captures {
                    request.add_path_arg(capture);
                }
                true
            }
            None => false,
        }
    }

    fn handle_request(&self, request: &mut Request) {
        match &self.on_request {
            Some(f) => f(request),
            None => request.send_text(404, "text/plain", "Not found"),
        }
    }

    fn handle_upload(&self, request: &mut Request, chunk: &UploadChunk) {
        if let Some(f) = &self.on_upload {
            f(request, chunk);
        }
    }

    fn handle_body(&self, request: &mut Request, chunk: &BodyChunk) {
        if let Some(f) = &self.on_body {
            f(request, chunk);
        }
    }

    fn is_request_handler_trivial(&self) -> bool {
        self.on_request.is_none()
    }
}
