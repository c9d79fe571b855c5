//! WebSocket endpoints.
//!
//! A [`WebSocket`] is both the handler answering the upgrade request on one url and the
//! registry of the clients connected through it. Once the `101` response has been
//! acknowledged, the connection is handed to a [`WebSocketClient`] and every inbound
//! frame is reported to the event callback.
//!
//! ```
//! use micro_async_web::websocket::{WebSocket, WsEvent};
//! use micro_async_web::Server;
//!
//! let server = Server::default();
//! let ws = WebSocket::new("/ws");
//! ws.on_event(|client, event| {
//!     if let WsEvent::Data { info, data } = event
//!         && info.is_message_end(data.len())
//!     {
//!         client.text(format!("echo {}", String::from_utf8_lossy(data)));
//!     }
//! });
//! server.add_handler(ws.clone());
//! ```

mod client;
mod message;

pub use client::{ClientStatus, WebSocketClient};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bytes::Bytes;
use micro_async_http::Client;
use micro_async_http::protocol::ConnectionKind;
use micro_async_http::response::Response;
use micro_async_http::websocket::{FrameInfo, Opcode, accept_key};
use parking_lot::Mutex;
use tracing::debug;

use crate::broadcast::SendStatus;
use crate::handler::{Handler, HandlerBuilder, HandlerOptions};
use crate::request::Upgrade;
use crate::Request;

/// Messages a client may have queued before new ones are refused.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 32;

const HEADER_KEY: &str = "Sec-WebSocket-Key";
const HEADER_VERSION: &str = "Sec-WebSocket-Version";
const HEADER_PROTOCOL: &str = "Sec-WebSocket-Protocol";

#[derive(Debug)]
pub enum WsEvent<'a> {
    Connect,
    Disconnect,
    /// A piece of a text, binary or continuation frame.
    Data { info: &'a FrameInfo, data: &'a [u8] },
    Ping,
    /// A pong that does not answer a keep-alive ping.
    Pong,
    /// The peer closed with a status code above `1001`.
    Error { code: u16, reason: &'a [u8] },
}

type EventFn = Arc<dyn Fn(&Arc<WebSocketClient>, WsEvent<'_>) + Send + Sync>;
type HandshakeFn = Arc<dyn Fn(&mut Request) -> bool + Send + Sync>;

pub(crate) struct Registry {
    url: String,
    enabled: AtomicBool,
    next_id: AtomicU32,
    max_queued: AtomicUsize,
    clients: Mutex<Vec<Arc<WebSocketClient>>>,
    on_event: Mutex<Option<EventFn>>,
    handshake: Mutex<Option<HandshakeFn>>,
}

impl Registry {
    pub(crate) fn max_queued_messages(&self) -> usize {
        self.max_queued.load(Ordering::Relaxed)
    }

    pub(crate) fn remove(&self, id: u32) {
        self.clients.lock().retain(|client| client.id() != id);
    }

    pub(crate) fn dispatch(&self, client: &Arc<WebSocketClient>, event: WsEvent<'_>) {
        let on_event = self.on_event.lock().clone();
        if let Some(on_event) = on_event {
            on_event(client, event);
        }
    }

    fn snapshot(&self) -> Vec<Arc<WebSocketClient>> {
        self.clients.lock().clone()
    }
}

/// The WebSocket endpoint on one url and the registry of its clients.
///
/// Clones share the registry; add one clone to the server and keep another to send.
#[derive(Clone)]
pub struct WebSocket {
    registry: Arc<Registry>,
    options: HandlerOptions,
}

impl WebSocket {
    pub fn new(url: &str) -> Self {
        Self {
            registry: Arc::new(Registry {
                url: url.to_string(),
                enabled: AtomicBool::new(true),
                next_id: AtomicU32::new(1),
                max_queued: AtomicUsize::new(DEFAULT_MAX_QUEUED_MESSAGES),
                clients: Mutex::new(Vec::new()),
                on_event: Mutex::new(None),
                handshake: Mutex::new(None),
            }),
            options: HandlerOptions::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.registry.url
    }

    /// A disabled endpoint refuses new upgrades; connected clients stay.
    pub fn enable(&self, enabled: bool) {
        self.registry.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.enabled.load(Ordering::Relaxed)
    }

    pub fn on_event<F>(&self, on_event: F)
    where
        F: Fn(&Arc<WebSocketClient>, WsEvent<'_>) + Send + Sync + 'static,
    {
        *self.registry.on_event.lock() = Some(Arc::new(on_event));
    }

    /// Decides whether an upgrade request may proceed; rejected ones get `401`.
    pub fn handshake_handler<F>(&self, handshake: F)
    where
        F: Fn(&mut Request) -> bool + Send + Sync + 'static,
    {
        *self.registry.handshake.lock() = Some(Arc::new(handshake));
    }

    /// Applies to clients connecting afterwards.
    pub fn set_max_queued_messages(&self, max: usize) {
        self.registry.max_queued.store(max, Ordering::Relaxed);
    }

    /// Clients with the handshake complete.
    pub fn count(&self) -> usize {
        self.registry.clients.lock().iter().filter(|c| c.status() == ClientStatus::Connected).count()
    }

    /// A connected client by id.
    pub fn client(&self, id: u32) -> Option<Arc<WebSocketClient>> {
        self.registry
            .clients
            .lock()
            .iter()
            .find(|c| c.id() == id && c.status() == ClientStatus::Connected)
            .cloned()
    }

    pub fn clients(&self) -> Vec<Arc<WebSocketClient>> {
        self.registry.snapshot()
    }

    pub fn available_for_write_all(&self) -> bool {
        self.registry.snapshot().iter().all(|c| !c.queue_is_full())
    }

    /// `true` as well for an unknown id.
    pub fn available_for_write(&self, id: u32) -> bool {
        self.registry.snapshot().iter().find(|c| c.id() == id).is_none_or(|c| !c.queue_is_full())
    }

    pub fn close(&self, id: u32, code: u16, reason: &str) {
        if let Some(client) = self.client(id) {
            client.close(code, reason);
        }
    }

    pub fn close_all(&self, code: u16, reason: &str) {
        for client in self.registry.snapshot() {
            if client.status() == ClientStatus::Connected {
                client.close(code, reason);
            }
        }
    }

    /// Closes the oldest client when more than `max_clients` are connected, and drops
    /// one client whose socket is already gone.
    pub fn cleanup_clients(&self, max_clients: usize) {
        let clients = self.registry.snapshot();
        if self.count() > max_clients
            && let Some(oldest) = clients.first()
        {
            oldest.close(0, "");
        }
        if let Some(dead) = clients.iter().find(|c| c.should_be_deleted()) {
            self.registry.remove(dead.id());
        }
    }

    pub fn ping(&self, id: u32, payload: &[u8]) -> bool {
        self.client(id).is_some_and(|client| client.ping(payload))
    }

    pub fn ping_all(&self, payload: &[u8]) -> SendStatus {
        SendStatus::collect(
            self.registry.snapshot().iter().map(|c| c.status() == ClientStatus::Connected && c.ping(payload)),
        )
    }

    pub fn text(&self, id: u32, message: impl Into<Bytes>) -> bool {
        self.client(id).is_some_and(|client| client.text(message))
    }

    /// Queues one shared copy of `message` to every connected client.
    pub fn text_all(&self, message: impl Into<Bytes>) -> SendStatus {
        self.send_all(message.into(), Opcode::Text)
    }

    pub fn binary(&self, id: u32, message: impl Into<Bytes>) -> bool {
        self.client(id).is_some_and(|client| client.binary(message))
    }

    pub fn binary_all(&self, message: impl Into<Bytes>) -> SendStatus {
        self.send_all(message.into(), Opcode::Binary)
    }

    fn send_all(&self, message: Bytes, opcode: Opcode) -> SendStatus {
        SendStatus::collect(self.registry.snapshot().iter().map(|c| {
            c.status() == ClientStatus::Connected && c.queue_message(message.clone(), opcode)
        }))
    }

    /// Turns an upgraded connection into a registered client.
    pub(crate) fn attach(&self, client: Box<dyn Client>) -> Arc<WebSocketClient> {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(WebSocketClient::new(id, client, &self.registry));
        self.registry.clients.lock().push(Arc::clone(&client));
        debug!(client_id = id, url = %self.registry.url, "websocket client connected");
        self.registry.dispatch(&client, WsEvent::Connect);
        client
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("url", &self.registry.url)
            .field("enabled", &self.is_enabled())
            .field("clients", &self.registry.clients.lock().len())
            .finish_non_exhaustive()
    }
}

impl HandlerBuilder for WebSocket {
    fn options_mut(&mut self) -> &mut HandlerOptions {
        &mut self.options
    }
}

impl Handler for WebSocket {
    fn options(&self) -> &HandlerOptions {
        &self.options
    }

    fn can_handle(&self, request: &mut Request) -> bool {
        self.is_enabled()
            && request.connection_kind() == ConnectionKind::WebSocket
            && request.url() == self.registry.url
    }

    fn handle_request(&self, request: &mut Request) {
        if !request.has_header(HEADER_VERSION) || !request.has_header(HEADER_KEY) {
            request.send_code(400);
            return;
        }
        let handshake = self.registry.handshake.lock().clone();
        if handshake.is_some_and(|handshake| !handshake(request)) {
            debug!(url = %request.url(), "websocket handshake rejected");
            request.send_code(401);
            return;
        }

        let version = request.header(HEADER_VERSION).map(|h| h.value().trim().parse::<u32>().unwrap_or(0));
        if version != Some(13) {
            let mut response = Response::new(400);
            response.add_header(HEADER_VERSION, "13", true);
            request.send(response);
            return;
        }

        let key = request.header(HEADER_KEY).map(|h| accept_key(h.value())).unwrap_or_default();
        let mut response = Response::upgrade(101);
        response.add_header("Connection", "Upgrade", true);
        response.add_header("Upgrade", "websocket", true);
        response.add_header("Sec-WebSocket-Accept", key, true);
        if let Some(protocol) = request.header(HEADER_PROTOCOL).map(|h| h.value().to_string()) {
            response.add_header(HEADER_PROTOCOL, protocol, true);
        }
        request.set_upgrade(Upgrade::WebSocket(self.clone()));
        request.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestClient;
    use crate::{Connection, Server};
    use indoc::indoc;
    use std::time::Duration;

    const UPGRADE: &str = indoc! {"
        GET /ws HTTP/1.1\r
        Host: device\r
        Upgrade: websocket\r
        Connection: Upgrade\r
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r
        Sec-WebSocket-Version: 13\r
        \r
    "};

    fn masked(first: u8, payload: &[u8]) -> Vec<u8> {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut out = vec![first, 0x80 | u8::try_from(payload.len()).unwrap()];
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    fn connect(ws: &WebSocket) -> (Connection, TestClient) {
        let server = Server::default();
        server.add_handler(ws.clone());
        let client = TestClient::new();
        let mut connection = server.accept(Box::new(client.clone()));
        connection.on_data(UPGRADE.as_bytes());
        let head = client.take_output();
        connection.on_ack(head.len());
        (connection, client)
    }

    fn recorder(ws: &WebSocket) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        ws.on_event(move |_, event| {
            let entry = match event {
                WsEvent::Connect => "connect".to_string(),
                WsEvent::Disconnect => "disconnect".to_string(),
                WsEvent::Data { data, .. } => format!("data:{}", String::from_utf8_lossy(data)),
                WsEvent::Ping => "ping".to_string(),
                WsEvent::Pong => "pong".to_string(),
                WsEvent::Error { code, .. } => format!("error:{code}"),
            };
            sink.lock().push(entry);
        });
        log
    }

    #[test]
    fn handshake_answers_101_and_registers_the_client() {
        let ws = WebSocket::new("/ws");
        let log = recorder(&ws);
        let server = Server::default();
        server.add_handler(ws.clone());

        let client = TestClient::new();
        let mut connection = server.accept(Box::new(client.clone()));
        connection.on_data(UPGRADE.as_bytes());
        let head = client.output_string();
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(head.contains("Upgrade: websocket\r\n"));
        assert_eq!(ws.count(), 0);

        connection.on_ack(head.len());
        assert!(connection.is_upgraded());
        assert_eq!(ws.count(), 1);
        assert_eq!(*log.lock(), ["connect"]);
        assert_eq!(client.closed(), None);
    }

    #[test]
    fn handshake_rejections() {
        let ws = WebSocket::new("/ws");
        let server = Server::default();
        server.add_handler(ws.clone());

        let exchange = |raw: &str| {
            let client = TestClient::new();
            server.accept(Box::new(client.clone())).on_data(raw.as_bytes());
            client.output_string()
        };

        let old = UPGRADE.replace("Version: 13", "Version: 8");
        let out = exchange(&old);
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Sec-WebSocket-Version: 13\r\n"));

        let keyless = UPGRADE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        assert!(exchange(&keyless).starts_with("HTTP/1.1 400"));

        ws.handshake_handler(|request| request.has_header("Authorization"));
        assert!(exchange(UPGRADE).starts_with("HTTP/1.1 401"));

        ws.enable(false);
        assert!(exchange(UPGRADE).starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn inbound_frames_become_events() {
        let ws = WebSocket::new("/ws");
        let log = recorder(&ws);
        let (mut connection, client) = connect(&ws);

        connection.on_data(&masked(0x81, b"hello"));
        connection.on_data(&masked(0x89, b"hb"));
        assert_eq!(*log.lock(), ["connect", "data:hello", "ping"]);
        // pong echoes the ping payload
        assert_eq!(client.take_output(), [0x8A, 2, b'h', b'b']);
    }

    #[test]
    fn fragmented_input_is_reassembled_per_frame() {
        let ws = WebSocket::new("/ws");
        let log = recorder(&ws);
        let (mut connection, _client) = connect(&ws);

        let frame = masked(0x81, b"split");
        connection.on_data(&frame[..3]);
        connection.on_data(&frame[3..8]);
        connection.on_data(&frame[8..]);
        let joined: String = log.lock().iter().filter_map(|e| e.strip_prefix("data:")).collect();
        assert_eq!(joined, "split");
    }

    #[test]
    fn text_all_reaches_every_client() {
        let ws = WebSocket::new("/ws");
        let (mut a, first) = connect(&ws);
        let (_b, second) = connect(&ws);

        assert_eq!(ws.text_all("tick"), SendStatus::Enqueued);
        assert_eq!(first.take_output(), [0x81, 4, b't', b'i', b'c', b'k']);
        assert_eq!(second.take_output(), [0x81, 4, b't', b'i', b'c', b'k']);

        // the next message waits until the previous frame is acknowledged
        a.on_ack(6);
        let id = ws.clients()[0].id();
        assert!(ws.binary(id, vec![1u8, 2]));
        assert_eq!(first.take_output(), [0x82, 2, 1, 2]);
    }

    #[test]
    fn full_queue_closes_or_drops() {
        let ws = WebSocket::new("/ws");
        ws.set_max_queued_messages(2);
        let (_a, closing) = connect(&ws);
        let (_b, dropping) = connect(&ws);
        closing.set_blocked(true);
        dropping.set_blocked(true);
        ws.clients()[1].set_close_when_full(false);

        assert_eq!(ws.text_all("1"), SendStatus::Enqueued);
        assert_eq!(ws.text_all("2"), SendStatus::Enqueued);
        assert_eq!(ws.text_all("3"), SendStatus::Discarded);
        assert_eq!(closing.closed(), Some(true));
        assert_eq!(dropping.closed(), None);
        assert_eq!(ws.count(), 1);
        assert!(!ws.available_for_write_all());
    }

    #[test]
    fn close_handshake_initiated_by_server() {
        let ws = WebSocket::new("/ws");
        let log = recorder(&ws);
        let (mut connection, client) = connect(&ws);
        let id = ws.clients()[0].id();

        ws.close(id, 1000, "bye");
        let frame = client.take_output();
        assert_eq!(frame, [0x88, 5, 0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(ws.count(), 0);

        connection.on_ack(frame.len());
        assert_eq!(client.closed(), Some(true));

        connection.on_disconnect();
        assert!(ws.clients().is_empty());
        assert_eq!(log.lock().last().map(String::as_str), Some("disconnect"));
    }

    #[test]
    fn close_from_peer_is_echoed_and_errors_reported() {
        let ws = WebSocket::new("/ws");
        let log = recorder(&ws);
        let (mut connection, client) = connect(&ws);

        let mut payload = 1008u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"policy");
        connection.on_data(&masked(0x88, &payload));

        assert_eq!(log.lock().last().map(String::as_str), Some("error:1008"));
        let echo = client.take_output();
        assert_eq!(echo[0], 0x88);
        assert_eq!(&echo[2..], payload.as_slice());
        assert_eq!(ws.clients()[0].status(), ClientStatus::Disconnecting);
    }

    #[test]
    fn keep_alive_pings_idle_clients() {
        let ws = WebSocket::new("/ws");
        let log = recorder(&ws);
        let (mut connection, client) = connect(&ws);
        ws.clients()[0].set_keep_alive_period(Some(Duration::ZERO));

        connection.on_poll();
        let ping = client.take_output();
        assert_eq!(ping[0], 0x89);
        assert_eq!(&ping[2..], client::PING_PAYLOAD);

        connection.on_data(&masked(0x8A, client::PING_PAYLOAD));
        assert!(!log.lock().iter().any(|e| e == "pong"));
        connection.on_data(&masked(0x8A, b"other"));
        assert_eq!(log.lock().last().map(String::as_str), Some("pong"));
    }

    #[test]
    fn cleanup_closes_the_oldest_over_the_limit() {
        let ws = WebSocket::new("/ws");
        let (_a, oldest) = connect(&ws);
        let (_b, newest) = connect(&ws);

        ws.cleanup_clients(1);
        assert_eq!(oldest.take_output(), [0x88, 0]);
        assert!(newest.take_output().is_empty());
    }
}
