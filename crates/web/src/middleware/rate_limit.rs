use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::middleware::{Middleware, Next};
use crate::Request;
use micro_async_http::response::Response;

/// Answers `429` with `Retry-After` once more than `max_requests` arrived within the
/// sliding window. The limit is shared by every client of the handler or server.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    max_requests: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self { max_requests, window, requests: Mutex::new(VecDeque::new()) }
    }

    /// Records a request arriving at `now`; returns the seconds to wait when over the limit.
    fn admit(&self, now: Instant) -> Option<u64> {
        let mut requests = self.requests.lock();
        while requests.front().is_some_and(|&at| now.saturating_duration_since(at) >= self.window) {
            requests.pop_front();
        }
        requests.push_back(now);

        if requests.len() <= self.max_requests {
            return None;
        }
        let oldest = requests.pop_front()?;
        let remaining = self.window.saturating_sub(now.saturating_duration_since(oldest));
        Some(remaining.as_secs() + 1)
    }
}

impl Middleware for RateLimitMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        match self.admit(Instant::now()) {
            None => next.run(request),
            Some(retry_after) => {
                let mut response = Response::new(429);
                response.add_header("Retry-After", retry_after.to_string(), true);
                request.send(response);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_applies_within_the_window() {
        let limiter = RateLimitMiddleware::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert_eq!(limiter.admit(start), None);
        assert_eq!(limiter.admit(start + Duration::from_secs(1)), None);
        assert_eq!(limiter.admit(start + Duration::from_secs(2)), Some(9));
    }

    #[test]
    fn old_requests_leave_the_window() {
        let limiter = RateLimitMiddleware::new(1, Duration::from_secs(5));
        let start = Instant::now();

        assert_eq!(limiter.admit(start), None);
        assert_eq!(limiter.admit(start + Duration::from_secs(5)), None);
        assert!(limiter.admit(start + Duration::from_millis(5500)).is_some());
    }
}
