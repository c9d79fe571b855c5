//! Composable request filters.
//!
//! A filter decides whether a handler or a rewrite applies to a request, before the
//! handler's own `can_handle` is consulted. This module provides:
//! - filters on the request method, as a [`MethodSet`] mask
//! - filters on request headers
//! - AND/OR combinators
//! - closures as filters
//!
//! ## Thread Safety
//!
//! `Filter` requires `Send + Sync`: handlers and rewrites are shared by every
//! connection of the server.
//!
//! # Examples
//!
//! ```
//! use micro_async_web::filter::{all_filter, header, method};
//! use micro_async_http::protocol::MethodSet;
//!
//! let mut combined = all_filter();
//! combined.and(method(MethodSet::GET | MethodSet::HEAD)).and(header("X-Api-Key", "secret"));
//! ```

use micro_async_http::protocol::MethodSet;

use crate::Request;

/// Core trait for request filtering.
pub trait Filter: Send + Sync {
    /// Returns `true` if the request should be allowed, `false` otherwise.
    fn matches(&self, req: &Request) -> bool;
}

struct FnFilter<F: Fn(&Request) -> bool>(F);

impl<F: Fn(&Request) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn matches(&self, req: &Request) -> bool {
        (self.0)(req)
    }
}

/// Creates a new filter from a closure.
///
/// # Example
/// ```
/// use micro_async_web::filter::fn_filter;
///
/// let custom_filter = fn_filter(|req| req.url().starts_with("/api"));
/// ```
pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    FnFilter(f)
}

/// Creates a filter that always returns true.
pub fn true_filter() -> TrueFilter {
    TrueFilter
}

/// Creates a filter that always returns false.
pub fn false_filter() -> FalseFilter {
    FalseFilter
}

/// A filter that always returns true.
pub struct TrueFilter;
impl Filter for TrueFilter {
    #[inline]
    fn matches(&self, _req: &Request) -> bool {
        true
    }
}

/// A filter that always returns false.
pub struct FalseFilter;
impl Filter for FalseFilter {
    #[inline]
    fn matches(&self, _req: &Request) -> bool {
        false
    }
}

/// Creates a new OR-composed filter chain.
pub fn any_filter() -> AnyFilter {
    AnyFilter::new()
}

/// Compose filters with OR logic.
///
/// An empty chain returns true.
pub struct AnyFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AnyFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    /// Add a new filter to the OR chain.
    pub fn or<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AnyFilter {
    fn matches(&self, req: &Request) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|filter| filter.matches(req))
    }
}

/// Creates a new AND-composed filter chain.
pub fn all_filter() -> AllFilter {
    AllFilter::new()
}

/// Compose filters with AND logic.
///
/// An empty chain returns true.
pub struct AllFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AllFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    /// Add a new filter to the AND chain.
    pub fn and<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AllFilter {
    fn matches(&self, req: &Request) -> bool {
        self.filters.iter().all(|filter| filter.matches(req))
    }
}

/// A filter on the request method.
pub struct MethodFilter(MethodSet);

impl Filter for MethodFilter {
    fn matches(&self, req: &Request) -> bool {
        self.0.matches(req.method())
    }
}

/// Creates a filter that matches any method of `methods`.
#[inline]
pub fn method(methods: MethodSet) -> MethodFilter {
    MethodFilter(methods)
}

macro_rules! method_filter {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Creates a filter that matches HTTP ", stringify!($upper_case_method), " requests.")]
        #[inline]
        pub fn $method() -> MethodFilter {
            MethodFilter(MethodSet::$upper_case_method)
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(patch_method, PATCH);

/// Creates a filter that matches a header by name, case-insensitively, and exact value.
#[inline]
pub fn header(name: impl Into<String>, value: impl Into<String>) -> HeaderFilter {
    HeaderFilter { name: name.into(), value: Some(value.into()) }
}

/// Creates a filter that matches requests carrying the header, whatever its value.
#[inline]
pub fn has_header(name: impl Into<String>) -> HeaderFilter {
    HeaderFilter { name: name.into(), value: None }
}

/// A filter on request headers.
pub struct HeaderFilter {
    name: String,
    value: Option<String>,
}

impl Filter for HeaderFilter {
    fn matches(&self, req: &Request) -> bool {
        match &self.value {
            Some(value) => req.headers().get_all(&self.name).any(|v| v == value),
            None => req.has_header(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::request_from;
    use indoc::indoc;

    fn request() -> Request {
        request_from(indoc! {"
            POST /api/items HTTP/1.1
            Host: device.local
            X-Api-Key: secret
            Content-Length: 0

        "})
    }

    #[test]
    fn method_filters() {
        let req = request();
        assert!(post_method().matches(&req));
        assert!(!get_method().matches(&req));
        assert!(method(MethodSet::GET | MethodSet::POST).matches(&req));
    }

    #[test]
    fn header_filters_ignore_name_case() {
        let req = request();
        assert!(header("x-api-key", "secret").matches(&req));
        assert!(!header("X-Api-Key", "Secret").matches(&req));
        assert!(has_header("HOST").matches(&req));
        assert!(!has_header("Cookie").matches(&req));
    }

    #[test]
    fn combinators() {
        let req = request();

        assert!(all_filter().matches(&req));
        assert!(any_filter().matches(&req));

        let mut all = all_filter();
        all.and(post_method()).and(fn_filter(|r: &Request| r.url() == "/api/items"));
        assert!(all.matches(&req));
        all.and(false_filter());
        assert!(!all.matches(&req));

        let mut any = any_filter();
        any.or(get_method()).or(false_filter());
        assert!(!any.matches(&req));
        any.or(true_filter());
        assert!(any.matches(&req));
    }
}
