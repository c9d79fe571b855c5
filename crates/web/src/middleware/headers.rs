use crate::middleware::{Middleware, Next};
use crate::Request;

/// Drops every request header except the listed ones, to free memory early.
#[derive(Debug, Clone, Default)]
pub struct HeaderFreeMiddleware {
    keep: Vec<String>,
}

impl HeaderFreeMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(mut self, name: impl Into<String>) -> Self {
        self.keep.push(name.into());
        self
    }
}

impl Middleware for HeaderFreeMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        request
            .headers_mut()
            .retain(|header| self.keep.iter().any(|name| header.name().eq_ignore_ascii_case(name)));
        next.run(request);
    }
}

/// Drops the listed request headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderFilterMiddleware {
    remove: Vec<String>,
}

impl HeaderFilterMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, name: impl Into<String>) -> Self {
        self.remove.push(name.into());
        self
    }
}

impl Middleware for HeaderFilterMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        for name in &self.remove {
            request.remove_header(name);
        }
        next.run(request);
    }
}
