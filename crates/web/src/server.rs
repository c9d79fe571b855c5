use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use arc_swap::ArcSwap;
use micro_async_http::Client;
use micro_async_http::codec::{BodyChunk, UploadChunk};
use micro_async_http::fs::FileSystem;
use micro_async_http::protocol::MethodSet;
use parking_lot::Mutex;
use tracing::debug;

use crate::handler::{CallbackHandler, Handler, StaticHandler};
use crate::middleware::Middleware;
use crate::request::Upgrade;
use crate::rewrite::Rewrite;
use crate::sse::SseClient;
use crate::websocket::WebSocketClient;
use crate::{Request, ServerConfig, ServerError};

/// Registrations shared by every connection of a server.
///
/// Lists are swapped as a whole on change, so a request attaching its handler never
/// blocks a registration and always sees a consistent list.
pub(crate) struct ServerShared {
    config: ServerConfig,
    handlers: ArcSwap<Vec<Arc<dyn Handler>>>,
    rewrites: ArcSwap<Vec<Arc<Rewrite>>>,
    middlewares: ArcSwap<Vec<Arc<dyn Middleware>>>,
    catch_all: ArcSwap<CallbackHandler>,
}

impl ServerShared {
    pub(crate) fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handlers: ArcSwap::from_pointee(Vec::new()),
            rewrites: ArcSwap::from_pointee(Vec::new()),
            middlewares: ArcSwap::from_pointee(Vec::new()),
            catch_all: ArcSwap::from_pointee(CallbackHandler::catch_all()),
        }
    }

    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn handlers(&self) -> Arc<Vec<Arc<dyn Handler>>> {
        self.handlers.load_full()
    }

    pub(crate) fn rewrites(&self) -> Arc<Vec<Arc<Rewrite>>> {
        self.rewrites.load_full()
    }

    pub(crate) fn middlewares(&self) -> Arc<Vec<Arc<dyn Middleware>>> {
        self.middlewares.load_full()
    }

    pub(crate) fn catch_all(&self) -> Arc<dyn Handler> {
        self.catch_all.load_full()
    }
}

pub struct ServerBuilder {
    config: ServerConfig,
    address: Vec<SocketAddr>,
    error: Option<io::Error>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), address: Vec::new(), error: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        match address.to_socket_addrs() {
            Ok(addresses) => self.address.extend(addresses),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        let mut server = Server::new(self.config);
        server.address = self.address;
        Ok(server)
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder").field("config", &self.config).field("address", &self.address).finish()
    }
}

/// The web server: routing tables plus the sockets they serve.
///
/// Cloning is cheap and every clone shares the same registrations; handlers and
/// rewrites may be added or removed while connections are being served.
///
/// ```no_run
/// use micro_async_http::protocol::MethodSet;
/// use micro_async_web::Server;
///
/// #[tokio::main]
/// async fn main() {
///     let server = Server::builder().address("0.0.0.0:8080").build().unwrap();
///     server.on("/hello", MethodSet::GET, |request| request.send_text(200, "text/plain", "hello"));
///     server.on_not_found(|request| request.send_code(404));
///     server.start().await.unwrap();
/// }
/// ```
#[derive(Clone)]
pub struct Server {
    pub(crate) shared: Arc<ServerShared>,
    pub(crate) address: Vec<SocketAddr>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn new(config: ServerConfig) -> Self {
        Self { shared: Arc::new(ServerShared::new(config)), address: Vec::new() }
    }

    pub fn config(&self) -> &ServerConfig {
        self.shared.config()
    }

    /// Appends a handler; the returned reference removes it again.
    pub fn add_handler<H: Handler + 'static>(&self, handler: H) -> Arc<dyn Handler> {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.shared.handlers.rcu(|handlers| {
            let mut handlers = Vec::clone(handlers);
            handlers.push(Arc::clone(&handler));
            handlers
        });
        handler
    }

    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut removed = false;
        self.shared.handlers.rcu(|handlers| {
            let mut handlers = Vec::clone(handlers);
            let before = handlers.len();
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
            removed = handlers.len() != before;
            handlers
        });
        removed
    }

    /// Routes `uri` for the given methods to a callback. See [`CallbackHandler`] for
    /// the accepted uri forms.
    pub fn on<F>(&self, uri: &str, methods: MethodSet, on_request: F) -> Arc<dyn Handler>
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.add_handler(CallbackHandler::new(uri).with_methods(methods).on_request(on_request))
    }

    /// Serves the files below `path` under `uri` with default settings.
    pub fn serve_static(&self, uri: &str, fs: Arc<dyn FileSystem>, path: &str) -> Arc<dyn Handler> {
        self.add_handler(StaticHandler::new(uri, fs, path))
    }

    pub fn add_rewrite(&self, rewrite: Rewrite) -> Arc<Rewrite> {
        let rewrite = Arc::new(rewrite);
        self.shared.rewrites.rcu(|rewrites| {
            let mut rewrites = Vec::clone(rewrites);
            rewrites.push(Arc::clone(&rewrite));
            rewrites
        });
        rewrite
    }

    pub fn rewrite(&self, from: &str, to: &str) -> Arc<Rewrite> {
        self.add_rewrite(Rewrite::new(from, to))
    }

    pub fn remove_rewrite(&self, rewrite: &Arc<Rewrite>) -> bool {
        self.remove_rewrites(|r| Arc::ptr_eq(r, rewrite))
    }

    /// Removes the first rewrite from `from` to `to`, query string included.
    pub fn remove_rewrite_between(&self, from: &str, to: &str) -> bool {
        let target = Rewrite::new(from, to);
        let found = self.shared.rewrites().iter().find(|r| {
            r.from() == target.from() && r.to_url() == target.to_url() && r.params() == target.params()
        }).cloned();
        found.is_some_and(|rewrite| self.remove_rewrite(&rewrite))
    }

    fn remove_rewrites(&self, matches: impl Fn(&Arc<Rewrite>) -> bool) -> bool {
        let mut removed = false;
        self.shared.rewrites.rcu(|rewrites| {
            let mut rewrites = Vec::clone(rewrites);
            let before = rewrites.len();
            rewrites.retain(|r| !matches(r));
            removed = rewrites.len() != before;
            rewrites
        });
        removed
    }

    /// Adds a middleware run for every request, before the handler's own.
    pub fn add_middleware<M: Middleware + 'static>(&self, middleware: M) -> Arc<dyn Middleware> {
        let middleware: Arc<dyn Middleware> = Arc::new(middleware);
        self.shared.middlewares.rcu(|middlewares| {
            let mut middlewares = Vec::clone(middlewares);
            middlewares.push(Arc::clone(&middleware));
            middlewares
        });
        middleware
    }

    pub fn remove_middleware(&self, middleware: &Arc<dyn Middleware>) -> bool {
        let mut removed = false;
        self.shared.middlewares.rcu(|middlewares| {
            let mut middlewares = Vec::clone(middlewares);
            let before = middlewares.len();
            middlewares.retain(|m| !Arc::ptr_eq(m, middleware));
            removed = middlewares.len() != before;
            middlewares
        });
        removed
    }

    /// Answers requests no handler took.
    pub fn on_not_found<F>(&self, on_request: F)
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        let on_request: Arc<dyn Fn(&mut Request) + Send + Sync> = Arc::new(on_request);
        self.update_catch_all(|handler| handler.set_request_fn(Some(Arc::clone(&on_request))));
    }

    /// Receives uploads of requests no handler took.
    pub fn on_file_upload<F>(&self, on_upload: F)
    where
        F: Fn(&mut Request, &UploadChunk) + Send + Sync + 'static,
    {
        let on_upload: Arc<dyn Fn(&mut Request, &UploadChunk) + Send + Sync> = Arc::new(on_upload);
        self.update_catch_all(|handler| handler.set_upload_fn(Some(Arc::clone(&on_upload))));
    }

    /// Receives raw bodies of requests no handler took.
    pub fn on_request_body<F>(&self, on_body: F)
    where
        F: Fn(&mut Request, &BodyChunk) + Send + Sync + 'static,
    {
        let on_body: Arc<dyn Fn(&mut Request, &BodyChunk) + Send + Sync> = Arc::new(on_body);
        self.update_catch_all(|handler| handler.set_body_fn(Some(Arc::clone(&on_body))));
    }

    fn update_catch_all(&self, update: impl Fn(&mut CallbackHandler)) {
        self.shared.catch_all.rcu(|current| {
            let mut handler = CallbackHandler::clone(current);
            update(&mut handler);
            handler
        });
    }

    /// Drops every rewrite, handler and catch-all callback. Middlewares stay.
    pub fn reset(&self) {
        self.shared.rewrites.store(Arc::new(Vec::new()));
        self.shared.handlers.store(Arc::new(Vec::new()));
        self.shared.catch_all.store(Arc::new(CallbackHandler::catch_all()));
    }

    /// Takes over an accepted connection. The caller feeds it the socket events.
    pub fn accept(&self, client: Box<dyn Client>) -> Connection {
        if let Some(remote) = client.remote_addr() {
            debug!(%remote, "connection accepted");
        }
        Connection { state: State::Http(Request::new(client, Arc::clone(&self.shared))) }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", self.shared.config())
            .field("address", &self.address)
            .field("handlers", &self.shared.handlers().len())
            .field("rewrites", &self.shared.rewrites().len())
            .field("middlewares", &self.shared.middlewares().len())
            .finish()
    }
}

enum State {
    Http(Arc<Mutex<Request>>),
    WebSocket(Arc<WebSocketClient>),
    EventSource(Arc<SseClient>),
    Closed,
}

/// One accepted socket, as a request or, after an upgrade, a WebSocket or event stream.
///
/// The socket driver calls the `on_*` methods as events arrive; none of them blocks.
pub struct Connection {
    state: State,
}

impl Connection {
    pub fn on_data(&mut self, data: &[u8]) {
        match &self.state {
            State::Http(request) => request.lock().on_data(data),
            State::WebSocket(client) => client.on_data(data),
            State::EventSource(_) | State::Closed => {}
        }
        self.release_aborted();
    }

    /// `len` bytes written earlier reached the peer.
    pub fn on_ack(&mut self, len: usize) {
        match &self.state {
            State::Http(request) => request.lock().on_ack(len),
            State::WebSocket(client) => client.on_ack(len),
            State::EventSource(client) => client.on_ack(len),
            State::Closed => {}
        }
        self.release_aborted();
        self.upgrade();
    }

    pub fn on_poll(&mut self) {
        match &self.state {
            State::Http(request) => request.lock().on_poll(),
            State::WebSocket(client) => client.on_poll(),
            State::EventSource(client) => client.on_poll(),
            State::Closed => {}
        }
        self.release_aborted();
        self.upgrade();
    }

    pub fn on_timeout(&mut self) {
        match &self.state {
            State::Http(request) => request.lock().on_timeout(),
            State::WebSocket(client) => client.on_timeout(),
            State::EventSource(client) => client.on_timeout(),
            State::Closed => {}
        }
        self.release_aborted();
    }

    pub fn on_error(&mut self, error: &io::Error) {
        debug!(cause = %error, "connection error");
    }

    pub fn on_disconnect(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Http(request) => request.lock().disconnected(),
            State::WebSocket(client) => client.on_disconnect(),
            State::EventSource(client) => client.on_disconnect(),
            State::Closed => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    pub fn is_upgraded(&self) -> bool {
        matches!(self.state, State::WebSocket(_) | State::EventSource(_))
    }

    /// Lets go of an aborted request, expiring the handles it gave out.
    fn release_aborted(&mut self) {
        if matches!(&self.state, State::Http(request) if request.lock().is_aborted()) {
            self.on_disconnect();
        }
    }

    fn upgrade(&mut self) {
        let State::Http(request) = &self.state else {
            return;
        };
        let taken = request.lock().take_upgrade();
        let Some((upgrade, client)) = taken else {
            return;
        };
        self.state = match upgrade {
            Upgrade::WebSocket(socket) => State::WebSocket(socket.attach(client)),
            Upgrade::EventSource { source, last_id } => State::EventSource(source.attach(client, last_id)),
        };
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Http(_) => "http",
            State::WebSocket(_) => "websocket",
            State::EventSource(_) => "event-source",
            State::Closed => "closed",
        };
        f.debug_struct("Connection").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::has_header;
    use crate::handler::HandlerBuilder;
    use crate::middleware::fn_middleware;
    use crate::test_support::TestClient;
    use indoc::indoc;
    use micro_async_http::protocol::Param;
    use micro_async_http::response::Response;

    fn exchange(server: &Server, raw: &str) -> String {
        let client = TestClient::new();
        let mut connection = server.accept(Box::new(client.clone()));
        connection.on_data(raw.as_bytes());
        client.output_string()
    }

    #[test]
    fn routes_to_the_first_matching_handler() {
        let server = Server::default();
        server.on("/a", MethodSet::GET, |request| request.send_text(200, "text/plain", "first"));
        server.on("/a", MethodSet::GET, |request| request.send_text(200, "text/plain", "second"));

        let out = exchange(&server, "GET /a HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("first"));
    }

    #[test]
    fn unmatched_requests_reach_the_catch_all() {
        let server = Server::default();
        assert!(exchange(&server, "GET /x HTTP/1.1\r\n\r\n").ends_with("Not found"));

        server.on_not_found(|request| request.send_text(404, "text/plain", "custom"));
        assert!(exchange(&server, "GET /x HTTP/1.1\r\n\r\n").ends_with("custom"));

        server.reset();
        assert!(exchange(&server, "GET /x HTTP/1.1\r\n\r\n").ends_with("Not found"));
    }

    #[test]
    fn filters_skip_handlers() {
        let server = Server::default();
        server.add_handler(
            CallbackHandler::new("/")
                .on_request(|request| request.send_text(200, "text/plain", "beta"))
                .with_filter(has_header("X-Beta")),
        );
        server.on("/", MethodSet::ANY, |request| request.send_text(200, "text/plain", "stable"));

        assert!(exchange(&server, "GET / HTTP/1.1\r\nX-Beta: 1\r\n\r\n").ends_with("beta"));
        assert!(exchange(&server, "GET / HTTP/1.1\r\n\r\n").ends_with("stable"));
    }

    #[test]
    fn removed_handlers_stop_matching() {
        let server = Server::default();
        let handler = server.on("/gone", MethodSet::GET, |request| request.send_code(200));
        assert!(server.remove_handler(&handler));
        assert!(!server.remove_handler(&handler));
        assert!(exchange(&server, "GET /gone HTTP/1.1\r\n\r\n").starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn rewrites_change_url_and_add_params() {
        let server = Server::default();
        server.rewrite("/", "/index?lang=en");
        server.rewrite("/index", "/home?lang=fr");
        server.on("/home", MethodSet::GET, |request| {
            let langs = request.params().iter().filter(|p| p.name() == "lang").map(Param::value).collect::<Vec<_>>();
            let body = langs.join(",");
            request.send_text(200, "text/plain", body);
        });

        assert!(exchange(&server, "GET / HTTP/1.1\r\n\r\n").ends_with("\r\n\r\nen,fr"));

        assert!(server.remove_rewrite_between("/index", "/home?lang=fr"));
        assert!(exchange(&server, "GET / HTTP/1.1\r\n\r\n").starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn server_middlewares_run_before_handler_middlewares() {
        let server = Server::default();
        server.add_middleware(fn_middleware(|request: &mut Request, next| {
            request.set_attribute("order", "server");
            next.run(request);
        }));
        server.add_handler(
            CallbackHandler::new("/m")
                .on_request(|request| {
                    let order = request.attribute("order").unwrap_or_default().to_string();
                    request.send_text(200, "text/plain", order);
                })
                .with_middleware(fn_middleware(|request: &mut Request, next| {
                    let order = format!("{},handler", request.attribute("order").unwrap_or_default());
                    request.set_attribute("order", order);
                    next.run(request);
                })),
        );
        server.add_handler(
            CallbackHandler::new("/skip")
                .on_request(|request| {
                    let order = request.attribute("order").unwrap_or("none").to_string();
                    request.send_text(200, "text/plain", order);
                })
                .skip_server_middlewares(),
        );

        assert!(exchange(&server, "GET /m HTTP/1.1\r\n\r\n").ends_with("server,handler"));
        assert!(exchange(&server, "GET /skip HTTP/1.1\r\n\r\n").ends_with("none"));
    }

    #[test]
    fn handle_used_inside_its_handler_does_not_deadlock() {
        let slot = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let server = Server::default();
        server.on("/slow", MethodSet::GET, move |request| {
            let handle = request.pause();
            assert!(!handle.send(Response::text(200, "text/plain", "too early")));
            *inner.lock() = Some(handle);
        });

        let client = TestClient::new();
        let mut connection = server.accept(Box::new(client.clone()));
        connection.on_data(b"GET /slow HTTP/1.1\r\n\r\n");
        assert!(client.output_string().is_empty());

        let handle = slot.lock().take().unwrap();
        assert!(handle.send(Response::text(200, "text/plain", "resumed")));
        assert!(client.output_string().ends_with("\r\n\r\nresumed"));
    }

    #[test]
    fn abort_expires_paused_handles() {
        let slot = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let disconnected = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&disconnected);
        let server = Server::default();
        server.on("/drop", MethodSet::GET, move |request| {
            *inner.lock() = Some(request.pause());
            let flag = Arc::clone(&flag);
            request.on_disconnect(move || *flag.lock() = true);
            request.abort();
        });

        let client = TestClient::new();
        let mut connection = server.accept(Box::new(client.clone()));
        connection.on_data(b"GET /drop HTTP/1.1\r\n\r\n");

        let handle = slot.lock().take().unwrap();
        assert!(client.is_aborted());
        assert!(connection.is_closed());
        assert!(*disconnected.lock());
        assert!(handle.is_expired());
        assert!(!handle.send(Response::new(200)));
    }

    #[test]
    fn default_headers_are_added() {
        let server = Server::new(ServerConfig::new().with_default_header("X-Device", "cam"));
        server.on("/", MethodSet::GET, |request| request.send_code(204));
        assert!(exchange(&server, "GET / HTTP/1.1\r\n\r\n").contains("X-Device: cam\r\n"));
    }

    #[test]
    fn form_body_is_parsed_for_non_trivial_handlers() {
        let server = Server::default();
        server.on("/form", MethodSet::POST, |request| {
            let body = format!(
                "{}-{}",
                request.param("a", true, false).map_or("", |p| p.value()),
                request.param("b", true, false).map_or("", |p| p.value())
            );
            request.send_text(200, "text/plain", body);
        });

        let out = exchange(&server, indoc! {"
            POST /form HTTP/1.1\r
            Content-Type: application/x-www-form-urlencoded\r
            Content-Length: 9\r
            \r
            a=1&b=two"});
        assert!(out.ends_with("1-two"), "{out}");
    }

    #[test]
    fn body_callbacks_receive_raw_bodies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let server = Server::default();
        server.add_handler(
            CallbackHandler::new("/raw")
                .on_request(|request| request.send_code(200))
                .on_body(move |_, chunk| sink.lock().extend_from_slice(&chunk.data)),
        );

        let client = TestClient::new();
        let mut connection = server.accept(Box::new(client.clone()));
        connection.on_data(b"POST /raw HTTP/1.1\r\nContent-Type: application/octet-stream\r\nContent-Length: 6\r\n\r\nabc");
        assert!(client.output_string().is_empty());
        connection.on_data(b"def");
        assert_eq!(seen.lock().as_slice(), b"abcdef");
        assert!(client.output_string().starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn disconnect_closes_the_connection() {
        let server = Server::default();
        let mut connection = server.accept(Box::new(TestClient::new()));
        assert!(!connection.is_closed());
        connection.on_disconnect();
        assert!(connection.is_closed());
    }

    #[test]
    fn builder_resolves_addresses() {
        let server = Server::builder().address("127.0.0.1:8080").build().unwrap();
        assert_eq!(server.address, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }
}
