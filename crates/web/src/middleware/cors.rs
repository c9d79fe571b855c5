use crate::middleware::{Middleware, Next};
use crate::Request;
use http::Method;
use micro_async_http::response::Response;

/// Adds `Access-Control-*` headers to cross-origin requests and answers preflights.
///
/// Requests without an `Origin` header pass untouched. A preflight `OPTIONS` request is
/// answered `200` right away; any other cross-origin request gets the headers added to
/// whatever response the handler produced.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    origin: String,
    methods: String,
    headers: String,
    allow_credentials: bool,
    max_age: u32,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self {
            origin: "*".to_string(),
            methods: "*".to_string(),
            headers: "*".to_string(),
            allow_credentials: true,
            max_age: 86400,
        }
    }
}

impl CorsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_methods(mut self, methods: impl Into<String>) -> Self {
        self.methods = methods.into();
        self
    }

    pub fn with_headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = headers.into();
        self
    }

    pub fn with_allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn with_max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn add_cors_headers(&self, response: &mut Response) {
        response.add_header("Access-Control-Allow-Origin", self.origin.as_str(), true);
        response.add_header("Access-Control-Allow-Methods", self.methods.as_str(), true);
        response.add_header("Access-Control-Allow-Headers", self.headers.as_str(), true);
        response.add_header("Access-Control-Allow-Credentials", if self.allow_credentials { "true" } else { "false" }, true);
        response.add_header("Access-Control-Max-Age", self.max_age.to_string(), true);
    }
}

impl Middleware for CorsMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        if !request.has_header("Origin") {
            next.run(request);
            return;
        }

        if *request.method() == Method::OPTIONS {
            let mut response = Response::new(200);
            self.add_cors_headers(&mut response);
            request.send(response);
            return;
        }

        next.run(request);
        if let Some(response) = request.response_mut() {
            self.add_cors_headers(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::run_chain;
    use crate::test_support::request_from;
    use std::sync::Arc;

    fn run(raw: &str) -> (Request, bool) {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(CorsMiddleware::new().with_origin("http://app.local"))];
        let mut request = request_from(raw);
        let mut reached = false;
        run_chain(&chain, &mut request, &mut |req: &mut Request| {
            reached = true;
            req.send_text(200, "text/plain", "ok");
        });
        (request, reached)
    }

    #[test]
    fn preflight_is_answered_directly() {
        let (request, reached) = run("OPTIONS /api HTTP/1.1\r\nOrigin: http://app.local\r\n\r\n");
        assert!(!reached);
        let response = request.response().unwrap();
        assert_eq!(response.code(), 200);
        assert_eq!(response.headers().value("Access-Control-Allow-Origin"), Some("http://app.local"));
        assert_eq!(response.headers().value("Access-Control-Allow-Credentials"), Some("true"));
        assert_eq!(response.headers().value("Access-Control-Max-Age"), Some("86400"));
    }

    #[test]
    fn cross_origin_response_gets_headers() {
        let (request, reached) = run("GET /api HTTP/1.1\r\nOrigin: http://app.local\r\n\r\n");
        assert!(reached);
        assert_eq!(request.response().unwrap().headers().value("Access-Control-Allow-Methods"), Some("*"));
    }

    #[test]
    fn same_origin_requests_are_untouched() {
        let (request, reached) = run("GET /api HTTP/1.1\r\n\r\n");
        assert!(reached);
        assert!(request.response().unwrap().header("Access-Control-Allow-Origin").is_none());
    }
}
