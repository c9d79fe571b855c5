//! One HTTP request, from its first byte to the end of its response.
//!
//! A [`Request`] owns the connection's [`Client`] while the request is alive. Bytes from
//! the socket go through [`RequestDecoder`]; the resulting events attach a handler,
//! stream the body into it, run the middleware chain and finally start the response,
//! which is then advanced by acknowledgements and polls until it ends.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::task::Poll;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use http::Method;
use micro_async_http::Client;
use micro_async_http::codec::{RequestDecoder, RequestEvent, parse_query};
use micro_async_http::fs::FileSystem;
use micro_async_http::protocol::{AuthScheme, ConnectionKind, Header, Headers, Param, RequestHead};
use micro_async_http::response::{Response, ResponseStream, gzip_etag};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::codec::Decoder;
use tracing::{debug, error, warn};

use crate::digest;
use crate::handler::Handler;
use crate::middleware::{AuthType, run_chain};
use crate::server::ServerShared;
use crate::sse::EventSource;
use crate::websocket::WebSocket;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
const DEFAULT_REALM: &str = "Login Required";
const STREAM_INITIAL_SIZE: usize = 1460;

/// How long a [`RequestHandle`] waits for a request another thread is working on.
pub const HANDLE_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// The protocol a request switches its connection to once the upgrade response is out.
#[derive(Debug, Clone)]
pub(crate) enum Upgrade {
    WebSocket(WebSocket),
    EventSource { source: EventSource, last_id: u32 },
}

pub struct Request {
    this: Weak<Mutex<Request>>,
    server: Arc<ServerShared>,
    client: Option<Box<dyn Client>>,

    decoder: RequestDecoder,
    buffer: BytesMut,
    head: RequestHead,
    params: Vec<Param>,
    path_args: Vec<String>,
    attributes: HashMap<String, String>,
    temp_object: Option<Box<dyn Any + Send>>,

    handler: Option<Arc<dyn Handler>>,
    response: Option<Response>,
    upgrade: Option<Upgrade>,
    on_disconnect: Option<Box<dyn FnOnce() + Send>>,

    parse_failed: bool,
    complete: bool,
    sent: bool,
    paused: bool,
    aborted: bool,
}

impl Request {
    pub(crate) fn new(client: Box<dyn Client>, server: Arc<ServerShared>) -> Arc<Mutex<Self>> {
        Arc::new_cyclic(|this| Mutex::new(Self::with_parts(Weak::clone(this), client, server)))
    }

    /// A request nobody else holds: pausing it yields handles that are already expired.
    #[cfg(test)]
    pub(crate) fn detached(client: Box<dyn Client>, server: Arc<ServerShared>) -> Self {
        Self::with_parts(Weak::new(), client, server)
    }

    /// Installs a parsed head without attaching a handler.
    #[cfg(test)]
    pub(crate) fn set_head(&mut self, mut head: RequestHead) {
        self.params.extend(head.take_query());
        self.head = head;
    }

    fn with_parts(this: Weak<Mutex<Self>>, mut client: Box<dyn Client>, server: Arc<ServerShared>) -> Self {
        let config = server.config();
        client.set_rx_timeout(config.rx_timeout());
        let decoder = RequestDecoder::new()
            .with_max_line_size(config.max_line_size())
            .reject_tls(config.reject_tls())
            .with_upload_buffer_size(config.upload_buffer_size());

        Self {
            this,
            server,
            client: Some(client),
            decoder,
            buffer: BytesMut::new(),
            head: RequestHead::default(),
            params: Vec::new(),
            path_args: Vec::new(),
            attributes: HashMap::new(),
            temp_object: None,
            handler: None,
            response: None,
            upgrade: None,
            on_disconnect: None,
            parse_failed: false,
            complete: false,
            sent: false,
            paused: false,
            aborted: false,
        }
    }

    // ---- connection events -------------------------------------------------------------

    pub(crate) fn on_data(&mut self, data: &[u8]) {
        if self.parse_failed || self.complete {
            return;
        }
        self.buffer.extend_from_slice(data);

        while !self.complete {
            match self.decoder.decode(&mut self.buffer) {
                Ok(Some(event)) => self.on_event(event),
                Ok(None) => break,
                Err(e) => {
                    warn!(cause = %e, url = %self.head.url(), "failed to parse request");
                    self.parse_failed = true;
                    self.abort();
                    break;
                }
            }
        }
    }

    fn on_event(&mut self, event: RequestEvent) {
        match event {
            RequestEvent::Head(head) => self.on_head(head),
            RequestEvent::Param(param) => self.params.push(param),
            RequestEvent::Body(chunk) => {
                if let Some(handler) = self.handler.clone() {
                    handler.handle_body(self, &chunk);
                }
            }
            RequestEvent::Upload(chunk) => {
                if let Some(handler) = self.handler.clone() {
                    handler.handle_upload(self, &chunk);
                }
            }
            RequestEvent::Complete => {
                self.complete = true;
                self.run_middleware_chain();
                self.respond();
            }
        }
    }

    pub(crate) fn on_head(&mut self, mut head: RequestHead) {
        self.params.extend(head.take_query());
        self.head = head;
        self.apply_rewrites();
        self.attach_handler();

        if self.head.expect_continue()
            && let Some(client) = self.client.as_deref_mut()
        {
            client.write(CONTINUE);
        }

        let trivial = self.handler.as_ref().is_none_or(|handler| handler.is_request_handler_trivial());
        self.decoder.set_body_interest(!trivial);
    }

    /// Rewrites apply in order, each matched against the url left by the previous ones.
    fn apply_rewrites(&mut self) {
        let rewrites = self.server.rewrites();
        for rewrite in rewrites.iter() {
            if rewrite.matches(self) {
                debug!(from = rewrite.from(), to = rewrite.to_url(), "rewriting request");
                self.head.set_url(rewrite.to_url());
                self.params.extend(parse_query(rewrite.params()));
            }
        }
    }

    fn attach_handler(&mut self) {
        let handlers = self.server.handlers();
        for handler in handlers.iter() {
            if handler.options().filter(self) && handler.can_handle(self) {
                self.handler = Some(Arc::clone(handler));
                return;
            }
        }
        self.handler = Some(self.server.catch_all());
    }

    fn run_middleware_chain(&mut self) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let own = handler.options().middlewares();
        if handler.options().skips_server_middlewares() {
            run_chain(own, self, &mut |request: &mut Request| handler.handle_request(request));
        } else {
            let server_chain = self.server.middlewares();
            run_chain(&server_chain, self, &mut |request: &mut Request| {
                run_chain(own, request, &mut |request: &mut Request| handler.handle_request(request));
            });
        }
    }

    /// Starts the response, substituting `501`/`500` when there is none or it cannot be sent.
    fn respond(&mut self) {
        if self.sent || self.paused {
            return;
        }
        let Some(client) = self.client.as_deref_mut() else {
            return;
        };

        let response = match self.response.take() {
            None => Response::text(501, "text/plain", "Handler did not handle the request"),
            Some(response) if !response.is_source_valid() => Response::text(500, "text/plain", "Invalid data in handler"),
            Some(response) => response,
        };
        let response = self.response.insert(response);
        response.apply_default_headers(self.server.config().default_headers());

        client.set_rx_timeout(0);
        response.respond(client, self.head.version());
        self.sent = true;
    }

    pub(crate) fn on_ack(&mut self, len: usize) {
        self.advance(len);
    }

    pub(crate) fn on_poll(&mut self) {
        if self.client.as_deref().is_some_and(|client| client.can_send()) {
            self.advance(0);
        }
    }

    fn advance(&mut self, len: usize) {
        if !self.sent {
            return;
        }
        let (Some(client), Some(response)) = (self.client.as_deref_mut(), self.response.as_mut()) else {
            return;
        };
        if !response.is_finished() {
            response.ack(client, len);
        }
        if response.is_finished() && !(response.is_upgrade() && self.upgrade.is_some()) {
            if response.is_failed() {
                error!(url = %self.head.url(), "response failed");
            }
            self.response = None;
            client.close(false);
        }
    }

    pub(crate) fn on_timeout(&mut self) {
        debug!(url = %self.head.url(), "request timed out");
        if let Some(client) = self.client.as_deref_mut() {
            client.close(false);
        }
    }

    pub(crate) fn disconnected(&mut self) {
        if let Some(callback) = self.on_disconnect.take() {
            callback();
        }
        self.client = None;
    }

    /// Hands the connection over once an upgrade response has been acknowledged.
    pub(crate) fn take_upgrade(&mut self) -> Option<(Upgrade, Box<dyn Client>)> {
        if !self.response.as_ref().is_some_and(|response| response.is_upgrade() && response.is_finished()) {
            return None;
        }
        let upgrade = self.upgrade.take()?;
        let client = self.client.take()?;
        self.response = None;
        Some((upgrade, client))
    }

    pub(crate) fn set_upgrade(&mut self, upgrade: Upgrade) {
        self.upgrade = Some(upgrade);
    }

    // ---- request data ------------------------------------------------------------------

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn method_to_string(&self) -> &str {
        self.head.method().as_str()
    }

    pub fn url(&self) -> &str {
        self.head.url()
    }

    /// `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.head.version()
    }

    pub fn host(&self) -> &str {
        self.head.host()
    }

    pub fn content_type(&self) -> &str {
        self.head.content_type()
    }

    pub fn content_length(&self) -> usize {
        self.head.content_length()
    }

    pub fn is_multipart(&self) -> bool {
        self.head.is_multipart()
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.head.connection_kind()
    }

    /// Neither a WebSocket upgrade nor an event stream.
    pub fn is_http(&self) -> bool {
        self.head.connection_kind() == ConnectionKind::Http
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.client.as_deref().and_then(|client| client.remote_addr())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.client.as_deref().and_then(|client| client.local_addr())
    }

    pub fn headers(&self) -> &Headers {
        self.head.headers()
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        self.head.headers_mut()
    }

    /// First header of that name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.head.headers().get(name)
    }

    pub fn header_at(&self, index: usize) -> Option<&Header> {
        self.head.headers().get_index(index)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.head.headers().contains(name)
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.head.headers_mut().remove(name)
    }

    /// Query, form and file parameters, in arrival order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param_at(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }

    pub fn param(&self, name: &str, post: bool, file: bool) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name && p.is_post() == post && p.is_file() == file)
    }

    pub fn has_param(&self, name: &str, post: bool, file: bool) -> bool {
        self.param(name, post, file).is_some()
    }

    /// Value of the first parameter of that name, whatever its kind.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|p| p.name() == name).map(Param::value)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.arg(name).is_some()
    }

    /// A capture group of a regex route.
    pub fn path_arg(&self, index: usize) -> Option<&str> {
        self.path_args.get(index).map(String::as_str)
    }

    pub(crate) fn add_path_arg(&mut self, value: String) {
        self.path_args.push(value);
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// `true` only for the value `"1"`.
    pub fn attribute_bool(&self, name: &str) -> bool {
        self.attribute(name) == Some("1")
    }

    pub fn attribute_long(&self, name: &str) -> Option<i64> {
        self.attribute(name).and_then(|value| value.parse().ok())
    }

    /// Stores per-request handler state, replacing what was there.
    pub fn set_temp_object<T: Any + Send>(&mut self, value: T) {
        self.temp_object = Some(Box::new(value));
    }

    pub fn temp_object_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.temp_object.as_deref_mut()?.downcast_mut::<T>()
    }

    pub fn take_temp_object<T: Any>(&mut self) -> Option<T> {
        let object = self.temp_object.take()?;
        match object.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(object) => {
                self.temp_object = Some(object);
                None
            }
        }
    }

    // ---- responding --------------------------------------------------------------------

    /// The response set so far, before it is sent.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Sets the response, replacing an earlier one. Ignored once a response is on the wire.
    ///
    /// The response goes out after the handler and middlewares returned, or right away
    /// when the request was paused.
    pub fn send(&mut self, response: impl Into<Response>) {
        if self.sent {
            return;
        }
        self.response = Some(response.into());
        if self.paused {
            self.paused = false;
            self.respond();
        }
    }

    pub fn send_code(&mut self, code: u16) {
        self.send(Response::new(code));
    }

    pub fn send_text(&mut self, code: u16, content_type: &str, content: impl Into<Bytes>) {
        self.send(Response::text(code, content_type, content));
    }

    pub fn send_bytes(&mut self, code: u16, content_type: &str, content: Bytes) {
        self.send(Response::bytes(code, content_type, content));
    }

    /// Serializes `value` as `application/json`; `500` when it cannot be serialized.
    pub fn send_json<T: Serialize + ?Sized>(&mut self, code: u16, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => self.send_text(code, mime::APPLICATION_JSON.essence_str(), body),
            Err(e) => {
                error!(cause = %e, "failed to serialize json response");
                self.send_code(500);
            }
        }
    }

    /// Sends a file, or its `.gz` sibling. A client already holding the sibling's ETag
    /// gets `304`.
    pub fn send_file(&mut self, fs: &dyn FileSystem, path: &str, content_type: &str, download: bool) {
        if !fs.exists(path) {
            let etag = fs.open(&format!("{path}.gz")).and_then(|mut gz| gzip_etag(gz.as_mut()));
            let Some(etag) = etag else {
                self.send_code(404);
                return;
            };
            if self.header("If-None-Match").is_some_and(|header| header.value() == etag) {
                self.send_code(304);
                return;
            }
        }
        self.send(Response::file(fs, path, content_type, download, None));
    }

    /// A body produced by `fill`, chunked on HTTP/1.1 and closed by the connection on 1.0.
    pub fn send_chunked<F>(&mut self, content_type: &str, fill: F)
    where
        F: FnMut(&mut [u8], usize) -> Poll<usize> + Send + 'static,
    {
        let response = if self.version() == 0 {
            Response::callback(200, content_type, 0, fill)
        } else {
            Response::chunked(200, content_type, fill)
        };
        self.send(response);
    }

    /// A buffer to write the body into; hand it back through [`send`](Self::send).
    pub fn begin_response_stream(&self, content_type: &str) -> ResponseStream {
        ResponseStream::new(content_type, STREAM_INITIAL_SIZE, usize::MAX)
    }

    pub fn redirect(&mut self, url: &str) {
        let mut response = Response::new(302);
        response.add_header("Location", url, true);
        self.send(response);
    }

    // ---- authentication ----------------------------------------------------------------

    /// Checks the `Authorization` credentials.
    ///
    /// Basic credentials are compared against `username:password`; with
    /// `password_is_hash` the credentials must equal `password` verbatim, which also
    /// covers bearer tokens. Digest responses are recomputed from the password, or from
    /// the [`digest_hash`](crate::digest_hash) passed as `password` with `password_is_hash`.
    pub fn authenticate(&self, username: &str, password: &str, password_is_hash: bool) -> bool {
        let authorization = self.head.authorization();
        if authorization.is_empty() {
            return false;
        }
        match self.head.auth_scheme() {
            AuthScheme::Digest => {
                digest::verify(authorization, self.method_to_string(), username, password, password_is_hash)
            }
            _ if password_is_hash => authorization == password,
            _ => STANDARD.encode(format!("{username}:{password}")) == authorization,
        }
    }

    /// Answers `401`, with a Basic or Digest challenge when `auth_type` asks for one.
    pub fn request_authentication(&mut self, auth_type: AuthType, realm: Option<&str>, message: Option<&str>) {
        let mut response = match message {
            Some(message) => Response::text(401, mime::TEXT_HTML.essence_str(), message.to_owned()),
            None => Response::new(401),
        };
        let realm = realm.unwrap_or(DEFAULT_REALM);
        let challenge = match auth_type {
            AuthType::Basic => Some(format!("Basic realm=\"{realm}\"")),
            AuthType::Digest => Some(digest::challenge(realm)),
            AuthType::None | AuthType::Denied | AuthType::Bearer => None,
        };
        if let Some(challenge) = challenge {
            response.add_header("WWW-Authenticate", challenge, true);
        }
        self.send(response);
    }

    // ---- lifecycle ---------------------------------------------------------------------

    /// Defers the response past the handler's return.
    ///
    /// The returned handle does not keep the request alive: once the peer disconnects,
    /// [`RequestHandle::send`] reports `false`.
    pub fn pause(&mut self) -> RequestHandle {
        if !self.paused {
            if let Some(client) = self.client.as_deref_mut() {
                client.set_rx_timeout(0);
            }
            self.paused = true;
        }
        RequestHandle(Weak::clone(&self.this))
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Drops the connection without a response.
    ///
    /// Handles from [`pause`](Self::pause) stop reaching the request right away and
    /// expire once the connection released it.
    pub fn abort(&mut self) {
        if self.sent {
            return;
        }
        self.sent = true;
        self.paused = false;
        self.aborted = true;
        if let Some(client) = self.client.as_deref_mut() {
            client.abort();
        }
    }

    /// Runs `callback` when the connection goes away while this request is alive.
    pub fn on_disconnect<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_disconnect = Some(Box::new(callback));
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", self.head.method())
            .field("url", &self.head.url())
            .field("version", &self.head.version())
            .field("params", &self.params)
            .field("sent", &self.sent)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

/// A weak reference to a paused [`Request`].
///
/// The connection owns the request: a handle never keeps it alive and never waits on
/// the thread already holding it, such as the request's own handler.
#[derive(Debug, Clone)]
pub struct RequestHandle(Weak<Mutex<Request>>);

impl RequestHandle {
    /// Whether the request is gone, its connection closed or aborted.
    pub fn is_expired(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// Sends `response` if the request is still alive.
    pub fn send(&self, response: impl Into<Response>) -> bool {
        self.with(|request| request.send(response)).is_some()
    }

    /// Runs `f` on the request if it is still alive and not aborted.
    ///
    /// Returns `None` without running `f` when the request is locked for longer than
    /// [`HANDLE_LOCK_TIMEOUT`], which is always the case when called from the handler
    /// currently running on it.
    pub fn with<R>(&self, f: impl FnOnce(&mut Request) -> R) -> Option<R> {
        let request = self.0.upgrade()?;
        let Some(mut guard) = request.try_lock_for(HANDLE_LOCK_TIMEOUT) else {
            debug!("request stayed locked, handle not applied");
            return None;
        };
        if guard.aborted {
            return None;
        }
        Some(f(&mut guard))
    }
}
