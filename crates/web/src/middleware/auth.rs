use std::sync::Arc;

use crate::middleware::{Middleware, Next};
use crate::Request;

/// How [`AuthenticationMiddleware`] challenges and checks credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    /// Every request passes.
    None,
    /// Every request is refused.
    Denied,
    Basic,
    /// MD5 Digest with `qop=auth`, challenged with a fresh nonce each time.
    #[default]
    Digest,
    /// The `Authorization: Bearer` token must equal the configured password.
    Bearer,
}

/// Refuses requests whose credentials do not match with a `401` challenge.
///
/// Without both a username and a password configured every request passes.
#[derive(Debug, Clone, Default)]
pub struct AuthenticationMiddleware {
    username: String,
    credentials: String,
    password_is_hash: bool,
    realm: String,
    fail_message: String,
    auth_type: AuthType,
}

impl AuthenticationMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials = password.into();
        self.password_is_hash = false;
        self
    }

    /// Stores credentials already encoded: the base64 `user:password` pair for Basic,
    /// the token for Bearer, the [`digest_hash`](crate::digest_hash) for Digest.
    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.credentials = hash.into();
        self.password_is_hash = !self.credentials.is_empty();
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Body of the `401` response, sent as `text/html`.
    pub fn with_fail_message(mut self, message: impl Into<String>) -> Self {
        self.fail_message = message.into();
        self
    }

    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.credentials.is_empty()
    }

    pub fn allowed(&self, request: &Request) -> bool {
        match self.auth_type {
            AuthType::None => true,
            AuthType::Denied => false,
            _ if !self.has_credentials() => true,
            AuthType::Basic | AuthType::Digest => {
                request.authenticate(&self.username, &self.credentials, self.password_is_hash)
            }
            AuthType::Bearer => request.authenticate(&self.username, &self.credentials, true),
        }
    }
}

impl Middleware for AuthenticationMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        if self.allowed(request) {
            next.run(request);
        } else {
            let realm = (!self.realm.is_empty()).then_some(self.realm.as_str());
            let message = (!self.fail_message.is_empty()).then_some(self.fail_message.as_str());
            request.request_authentication(self.auth_type, realm, message);
        }
    }
}

type AuthorizeFn = Arc<dyn Fn(&mut Request) -> bool + Send + Sync>;

/// Answers with a fixed status, `403` by default, when the callback rejects the request.
#[derive(Clone)]
pub struct AuthorizationMiddleware {
    code: u16,
    authorize: AuthorizeFn,
}

impl AuthorizationMiddleware {
    pub fn new<F>(authorize: F) -> Self
    where
        F: Fn(&mut Request) -> bool + Send + Sync + 'static,
    {
        Self::with_code(403, authorize)
    }

    pub fn with_code<F>(code: u16, authorize: F) -> Self
    where
        F: Fn(&mut Request) -> bool + Send + Sync + 'static,
    {
        Self { code, authorize: Arc::new(authorize) }
    }
}

impl Middleware for AuthorizationMiddleware {
    fn run(&self, request: &mut Request, next: Next<'_>) {
        if (self.authorize)(request) {
            next.run(request);
        } else {
            request.send_code(self.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::run_chain;
    use crate::test_support::request_from;

    fn run(middleware: impl Middleware + 'static, raw: &str) -> (Request, bool) {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(middleware)];
        let mut request = request_from(raw);
        let mut reached = false;
        run_chain(&chain, &mut request, &mut |_: &mut Request| reached = true);
        (request, reached)
    }

    fn basic() -> AuthenticationMiddleware {
        AuthenticationMiddleware::new()
            .with_username("user")
            .with_password("pass")
            .with_realm("device")
            .with_auth_type(AuthType::Basic)
    }

    #[test]
    fn basic_credentials_pass() {
        // dXNlcjpwYXNz is user:pass
        let (request, reached) = run(basic(), "GET / HTTP/1.1\r\nAuthorization: Basic dXNlcjpwYXNz\r\n\r\n");
        assert!(reached);
        assert!(request.response().is_none());
    }

    #[test]
    fn wrong_credentials_are_challenged() {
        let (request, reached) = run(basic(), "GET / HTTP/1.1\r\nAuthorization: Basic dXNlcjp3cm9uZw==\r\n\r\n");
        assert!(!reached);
        let response = request.response().unwrap();
        assert_eq!(response.code(), 401);
        assert_eq!(response.headers().value("WWW-Authenticate"), Some("Basic realm=\"device\""));
    }

    #[test]
    fn missing_configuration_lets_everything_through() {
        let (_, reached) = run(AuthenticationMiddleware::new(), "GET / HTTP/1.1\r\n\r\n");
        assert!(reached);

        let denied = AuthenticationMiddleware::new().with_auth_type(AuthType::Denied);
        let (request, reached) = run(denied, "GET / HTTP/1.1\r\n\r\n");
        assert!(!reached);
        assert_eq!(request.response().unwrap().code(), 401);
    }

    #[test]
    fn bearer_token_is_compared_verbatim() {
        let bearer = AuthenticationMiddleware::new()
            .with_username("api")
            .with_password_hash("t0k3n")
            .with_auth_type(AuthType::Bearer);
        let (_, reached) = run(bearer.clone(), "GET / HTTP/1.1\r\nAuthorization: Bearer t0k3n\r\n\r\n");
        assert!(reached);
        let (request, reached) = run(bearer, "GET / HTTP/1.1\r\nAuthorization: Bearer other\r\n\r\n");
        assert!(!reached);
        assert!(request.response().unwrap().header("WWW-Authenticate").is_none());
    }

    #[test]
    fn digest_is_the_default_challenge() {
        let digest = AuthenticationMiddleware::new().with_username("Mufasa").with_password("Circle Of Life");
        let (request, reached) = run(digest.clone(), "GET / HTTP/1.1\r\n\r\n");
        assert!(!reached);
        let challenge = request.response().unwrap().headers().value("WWW-Authenticate").unwrap();
        assert!(challenge.starts_with("Digest realm=\"Login Required\", qop=\"auth\", nonce=\""));

        let hashed = AuthenticationMiddleware::new()
            .with_username("Mufasa")
            .with_password_hash(crate::digest_hash("Mufasa", "Circle Of Life", "testrealm@host.com"));
        let raw = concat!(
            "GET /dir/index.html HTTP/1.1\r\n",
            "Authorization: Digest username=\"Mufasa\", realm=\"testrealm@host.com\", ",
            "nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", uri=\"/dir/index.html\", qop=auth, nc=00000001, ",
            "cnonce=\"0a4f113b\", response=\"6629fae49393a05397450978507c4ef1\", ",
            "opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"\r\n\r\n",
        );
        assert!(run(digest, raw).1);
        assert!(run(hashed, raw).1);
    }

    #[test]
    fn authorization_uses_custom_code() {
        let middleware = AuthorizationMiddleware::with_code(401, |req: &mut Request| req.has_header("X-Token"));
        let (request, reached) = run(middleware.clone(), "GET / HTTP/1.1\r\n\r\n");
        assert!(!reached);
        assert_eq!(request.response().unwrap().code(), 401);

        let (_, reached) = run(middleware, "GET / HTTP/1.1\r\nX-Token: 1\r\n\r\n");
        assert!(reached);
    }

    #[test]
    fn authorization_defaults_to_forbidden() {
        let (request, _) = run(AuthorizationMiddleware::new(|_: &mut Request| false), "GET / HTTP/1.1\r\n\r\n");
        assert_eq!(request.response().unwrap().code(), 403);
    }
}
