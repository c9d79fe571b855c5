//! Server-Sent Events endpoints.
//!
//! An [`EventSource`] answers `Accept: text/event-stream` requests on one url and keeps
//! the resulting subscribers. Each [`SseClient`] limits its unacknowledged bytes; the
//! limit is the total budget split evenly between the connected clients, recomputed on
//! every connect and disconnect.

mod client;

pub use client::SseClient;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use bytes::Bytes;
use micro_async_http::Client;
use micro_async_http::protocol::ConnectionKind;
use micro_async_http::response::Response;
use micro_async_http::sse::format_event;
use parking_lot::Mutex;
use tracing::debug;

use crate::broadcast::SendStatus;
use crate::handler::{Handler, HandlerBuilder, HandlerOptions};
use crate::middleware::AuthorizationMiddleware;
use crate::request::Upgrade;
use crate::Request;

pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 32;

/// Smallest per-client in-flight window.
pub const MIN_INFLIGHT: usize = 2920;

/// Largest per-client in-flight window, and the default budget shared by all clients.
pub const MAX_INFLIGHT: usize = 16384;

type ClientFn = Arc<dyn Fn(&Arc<SseClient>) + Send + Sync>;

pub(crate) struct SourceRegistry {
    url: String,
    next_id: AtomicU32,
    max_queued: AtomicUsize,
    budget: AtomicUsize,
    clients: Mutex<Vec<Arc<SseClient>>>,
    on_connect: Mutex<Option<ClientFn>>,
    on_disconnect: Mutex<Option<ClientFn>>,
}

impl SourceRegistry {
    pub(crate) fn max_queued_messages(&self) -> usize {
        self.max_queued.load(Ordering::Relaxed)
    }

    pub(crate) fn remove(&self, client: &Arc<SseClient>) {
        let on_disconnect = self.on_disconnect.lock().clone();
        if let Some(on_disconnect) = on_disconnect {
            on_disconnect(client);
        }
        self.clients.lock().retain(|c| !Arc::ptr_eq(c, client));
        self.adjust_inflight_window();
    }

    fn snapshot(&self) -> Vec<Arc<SseClient>> {
        self.clients.lock().clone()
    }

    fn adjust_inflight_window(&self) {
        let clients = self.snapshot();
        if clients.is_empty() {
            return;
        }
        let window = self.budget.load(Ordering::Relaxed) / clients.len();
        for client in &clients {
            client.set_max_inflight_bytes(window);
        }
    }
}

/// The event stream on one url and the registry of its subscribers.
///
/// ```
/// use micro_async_web::sse::EventSource;
/// use micro_async_web::Server;
///
/// let server = Server::default();
/// let events = EventSource::new("/events");
/// events.on_connect(|client| {
///     client.send(Some("hello"), None, client.last_id() + 1, 1000);
/// });
/// server.add_handler(events.clone());
///
/// events.send(Some("22.5"), Some("temperature"), 0, 0);
/// ```
#[derive(Clone)]
pub struct EventSource {
    registry: Arc<SourceRegistry>,
    options: HandlerOptions,
}

impl EventSource {
    pub fn new(url: &str) -> Self {
        Self {
            registry: Arc::new(SourceRegistry {
                url: url.to_string(),
                next_id: AtomicU32::new(1),
                max_queued: AtomicUsize::new(DEFAULT_MAX_QUEUED_MESSAGES),
                budget: AtomicUsize::new(MAX_INFLIGHT),
                clients: Mutex::new(Vec::new()),
                on_connect: Mutex::new(None),
                on_disconnect: Mutex::new(None),
            }),
            options: HandlerOptions::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.registry.url
    }

    pub fn on_connect<F>(&self, on_connect: F)
    where
        F: Fn(&Arc<SseClient>) + Send + Sync + 'static,
    {
        *self.registry.on_connect.lock() = Some(Arc::new(on_connect));
    }

    pub fn on_disconnect<F>(&self, on_disconnect: F)
    where
        F: Fn(&Arc<SseClient>) + Send + Sync + 'static,
    {
        *self.registry.on_disconnect.lock() = Some(Arc::new(on_disconnect));
    }

    /// Rejects subscriptions with `401` unless `authorize` accepts the request.
    #[must_use]
    pub fn authorize_connect<F>(self, authorize: F) -> Self
    where
        F: Fn(&mut Request) -> bool + Send + Sync + 'static,
    {
        self.with_middleware(AuthorizationMiddleware::with_code(401, authorize))
    }

    /// Applies to clients connecting afterwards.
    pub fn set_max_queued_messages(&self, max: usize) {
        self.registry.max_queued.store(max, Ordering::Relaxed);
    }

    /// Sets the in-flight budget shared by all clients and rebalances it.
    pub fn set_max_inflight(&self, budget: usize) {
        self.registry.budget.store(budget, Ordering::Relaxed);
        self.registry.adjust_inflight_window();
    }

    pub fn clients(&self) -> Vec<Arc<SseClient>> {
        self.registry.snapshot()
    }

    pub fn count(&self) -> usize {
        self.registry.snapshot().iter().filter(|c| c.connected()).count()
    }

    /// Mean queue length over connected clients, rounded.
    pub fn avg_packets_waiting(&self) -> usize {
        let (waiting, connected) = self
            .registry
            .snapshot()
            .iter()
            .filter(|c| c.connected())
            .fold((0, 0), |(waiting, connected), c| (waiting + c.packets_waiting(), connected + 1));
        if connected == 0 { 0 } else { (waiting + connected / 2) / connected }
    }

    /// Closes every subscriber's connection.
    pub fn close(&self) {
        for client in self.registry.snapshot() {
            if client.connected() {
                client.close();
            }
        }
    }

    /// Formats the event once and queues it to every client.
    pub fn send(&self, message: Option<&str>, event: Option<&str>, id: u32, reconnect: u32) -> SendStatus {
        let data = Bytes::from(format_event(message, event, id, reconnect));
        SendStatus::collect(self.registry.snapshot().iter().map(|c| c.write(data.clone())))
    }

    pub(crate) fn attach(&self, client: Box<dyn Client>, last_id: u32) -> Arc<SseClient> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(SseClient::new(id, last_id, client, &self.registry));
        self.registry.clients.lock().push(Arc::clone(&client));
        debug!(client_id = id, url = %self.registry.url, last_id, "event source client connected");

        let on_connect = self.registry.on_connect.lock().clone();
        if let Some(on_connect) = on_connect {
            on_connect(&client);
        }
        self.registry.adjust_inflight_window();
        client
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.registry.url)
            .field("clients", &self.registry.clients.lock().len())
            .finish_non_exhaustive()
    }
}

impl HandlerBuilder for EventSource {
    fn options_mut(&mut self) -> &mut HandlerOptions {
        &mut self.options
    }
}

impl Handler for EventSource {
    fn options(&self) -> &HandlerOptions {
        &self.options
    }

    fn can_handle(&self, request: &mut Request) -> bool {
        request.connection_kind() == ConnectionKind::EventStream && request.url() == self.registry.url
    }

    fn handle_request(&self, request: &mut Request) {
        let last_id = request.header("Last-Event-ID").map_or(0, |h| leading_u32(h.value()));

        let mut response = Response::upgrade(200);
        response.set_content_type("text/event-stream");
        response.add_header("Cache-Control", "no-cache", true);
        response.add_header("Connection", "keep-alive", true);
        request.set_upgrade(Upgrade::EventSource { source: self.clone(), last_id });
        request.send(response);
    }
}

/// Digits up to the first non digit, `0` if none.
fn leading_u32(value: &str) -> u32 {
    value
        .trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, digit| acc.wrapping_mul(10).wrapping_add(u32::from(digit - b'0')))
}
