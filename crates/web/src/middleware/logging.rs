use std::time::Instant;
use tracing::info;

use crate::middleware::{Middleware, Next};
use crate::Request;

/// Logs each request and the response it produced at INFO level.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    enabled: bool,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for LoggingMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        if !self.enabled {
            next.run(request);
            return;
        }

        let remote = request.remote_addr().map_or_else(|| "-".to_string(), |addr| addr.to_string());
        info!(%remote, "> {} {} HTTP/1.{}", request.method(), request.url(), request.version());
        for header in request.headers().iter().filter(|h| !h.value().is_empty()) {
            info!(%remote, "> {header}");
        }

        let start = Instant::now();
        next.run(request);
        let elapsed = start.elapsed();

        match request.response() {
            Some(response) => {
                info!(%remote, elapsed_ms = elapsed.as_millis(), "processed");
                info!(%remote, "< HTTP/1.{} {} {}", request.version(), response.code(), response.content_type());
                for header in response.headers() {
                    info!(%remote, "< {header}");
                }
            }
            None => info!(%remote, "connection closed"),
        }
    }
}
