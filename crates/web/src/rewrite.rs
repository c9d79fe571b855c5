use std::fmt;
use std::sync::Arc;

use crate::filter::Filter;
use crate::Request;

/// Serves requests for one url as if another had been asked for.
///
/// A query string in the target url is split off and added to the request parameters.
///
/// ```
/// use micro_async_web::Rewrite;
///
/// let rewrite = Rewrite::new("/", "/index.htm?lang=en");
/// assert_eq!(rewrite.to_url(), "/index.htm");
/// assert_eq!(rewrite.params(), "lang=en");
/// ```
#[derive(Clone)]
pub struct Rewrite {
    from: String,
    to_url: String,
    params: String,
    filter: Option<Arc<dyn Filter>>,
}

impl Rewrite {
    pub fn new(from: &str, to: &str) -> Self {
        let (to_url, params) = to.split_once('?').unwrap_or((to, ""));
        Self { from: from.to_string(), to_url: to_url.to_string(), params: params.to_string(), filter: None }
    }

    pub fn with_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to_url(&self) -> &str {
        &self.to_url
    }

    /// The query string of the target, without `?`.
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn matches(&self, request: &Request) -> bool {
        self.from == request.url() && self.filter.as_ref().is_none_or(|filter| filter.matches(request))
    }
}

impl fmt::Debug for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rewrite")
            .field("from", &self.from)
            .field("to_url", &self.to_url)
            .field("params", &self.params)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::has_header;
    use crate::test_support::request_from;

    #[test]
    fn matches_exact_url_only() {
        let rewrite = Rewrite::new("/", "/index.htm");
        assert!(rewrite.matches(&request_from("GET / HTTP/1.1\r\n\r\n")));
        assert!(!rewrite.matches(&request_from("GET /index.htm HTTP/1.1\r\n\r\n")));
        assert_eq!(rewrite.params(), "");
    }

    #[test]
    fn filter_gates_the_rewrite() {
        let rewrite = Rewrite::new("/", "/mobile.htm").with_filter(has_header("X-Mobile"));
        assert!(!rewrite.matches(&request_from("GET / HTTP/1.1\r\n\r\n")));
        assert!(rewrite.matches(&request_from("GET / HTTP/1.1\r\nX-Mobile: 1\r\n\r\n")));
    }
}
