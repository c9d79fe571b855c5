use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use micro_async_http::Client;
use micro_async_http::websocket::{Frame, FrameDecoder, FrameInfo, Opcode, frame_window};
use parking_lot::Mutex;
use tokio_util::codec::Decoder;
use tracing::{debug, error, warn};

use super::message::{ControlFrame, Message};
use super::{Registry, WsEvent};

/// Payload of keep-alive pings; the matching pongs are not reported.
pub(crate) const PING_PAYLOAD: &[u8] = b"ESPAsyncWebServer-PING";

/// Longest close reason fitting a control frame next to the status code.
const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connected,
    /// A close frame was sent or received, the handshake is not done yet.
    Disconnecting,
    Disconnected,
}

/// An event decoded from inbound frames, reported once the client lock is released.
enum Inbound {
    Data { info: FrameInfo, data: Bytes },
    Ping,
    Pong,
    Error { code: u16, reason: Bytes },
}

struct Inner {
    client: Option<Box<dyn Client>>,
    status: ClientStatus,
    decoder: FrameDecoder,
    buffer: BytesMut,
    control: VecDeque<ControlFrame>,
    messages: VecDeque<Message>,
    last_message: Instant,
    keep_alive: Option<Duration>,
    close_when_full: bool,
    max_queued: usize,
}

impl Inner {
    fn clear_queue(&mut self) {
        while self.messages.front().is_some_and(Message::is_finished) {
            self.messages.pop_front();
        }
    }

    /// Sends the next control frame, or the next frame of the current message.
    ///
    /// A control frame only goes out between two frames of a message.
    fn run_queue(&mut self) {
        self.clear_queue();
        let Some(client) = self.client.as_deref_mut() else {
            return;
        };
        let between_frames = self.messages.front().is_none_or(Message::is_between_frames);

        if between_frames
            && let Some(control) = self.control.front_mut()
            && frame_window(client) > control.len() - 1
        {
            control.send(client);
        } else if let Some(message) = self.messages.front_mut()
            && message.is_between_frames()
            && frame_window(client) > 0
        {
            message.send(client);
        }
    }

    fn queue_control(&mut self, opcode: Opcode, payload: &[u8]) -> bool {
        if self.client.is_none() {
            return false;
        }
        self.control.push_back(ControlFrame::new(opcode, payload));
        if self.client.as_deref().is_some_and(|client| client.can_send()) {
            self.run_queue();
        }
        true
    }

    fn close_client(&mut self, now: bool) {
        if let Some(client) = self.client.as_deref_mut() {
            client.close(now);
        }
    }
}

/// One upgraded WebSocket connection.
///
/// Outgoing data is queued: control frames take priority and are slotted between the
/// frames of a long message; a message only advances as its frames are acknowledged.
pub struct WebSocketClient {
    id: u32,
    remote_addr: Option<SocketAddr>,
    registry: Weak<Registry>,
    inner: Mutex<Inner>,
}

impl WebSocketClient {
    pub(crate) fn new(id: u32, mut client: Box<dyn Client>, registry: &Arc<Registry>) -> Self {
        client.set_rx_timeout(0);
        let remote_addr = client.remote_addr();
        Self {
            id,
            remote_addr,
            registry: Arc::downgrade(registry),
            inner: Mutex::new(Inner {
                client: Some(client),
                status: ClientStatus::Connected,
                decoder: FrameDecoder::new(),
                buffer: BytesMut::new(),
                control: VecDeque::new(),
                messages: VecDeque::new(),
                last_message: Instant::now(),
                keep_alive: None,
                close_when_full: true,
                max_queued: registry.max_queued_messages(),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.lock().status
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the socket is gone and the client only waits to be dropped.
    pub fn should_be_deleted(&self) -> bool {
        self.inner.lock().client.is_none()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Full, or no longer accepting messages because it is closing.
    pub fn queue_is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.messages.len() >= inner.max_queued || inner.status != ClientStatus::Connected
    }

    pub fn can_send(&self) -> bool {
        let inner = self.inner.lock();
        inner.messages.len() < inner.max_queued
    }

    /// Whether a message arriving at a full queue closes the connection instead of
    /// being dropped. On by default.
    pub fn set_close_when_full(&self, close: bool) {
        self.inner.lock().close_when_full = close;
    }

    /// Pings an idle connection after `period`; `None` disables keep-alive.
    pub fn set_keep_alive_period(&self, period: Option<Duration>) {
        self.inner.lock().keep_alive = period;
    }

    pub fn text(&self, message: impl Into<Bytes>) -> bool {
        self.queue_message(message.into(), Opcode::Text)
    }

    pub fn binary(&self, message: impl Into<Bytes>) -> bool {
        self.queue_message(message.into(), Opcode::Binary)
    }

    pub fn ping(&self, payload: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        inner.status == ClientStatus::Connected && inner.queue_control(Opcode::Ping, payload)
    }

    /// Starts the closing handshake. A `code` of `0` sends a close frame without payload.
    pub fn close(&self, code: u16, reason: &str) {
        let mut inner = self.inner.lock();
        if inner.status != ClientStatus::Connected {
            return;
        }
        inner.status = ClientStatus::Disconnecting;

        let mut payload = Vec::new();
        if code != 0 {
            let reason = &reason.as_bytes()[..reason.len().min(MAX_CLOSE_REASON)];
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason);
        }
        inner.queue_control(Opcode::Close, &payload);
    }

    pub(crate) fn queue_message(&self, buffer: Bytes, opcode: Opcode) -> bool {
        let mut inner = self.inner.lock();
        if inner.client.is_none() || buffer.is_empty() || inner.status != ClientStatus::Connected {
            return false;
        }

        if inner.messages.len() >= inner.max_queued {
            if inner.close_when_full {
                error!(client_id = self.id, "too many messages queued, closing connection");
                inner.status = ClientStatus::Disconnected;
                inner.close_client(true);
            } else {
                warn!(client_id = self.id, "too many messages queued, discarding new message");
            }
            return false;
        }

        inner.messages.push_back(Message::new(buffer, opcode, false));
        if inner.client.as_deref().is_some_and(|client| client.can_send()) {
            inner.run_queue();
        }
        true
    }

    // ---- connection events -------------------------------------------------------------

    pub(crate) fn on_data(self: &Arc<Self>, data: &[u8]) {
        let inbound = self.decode(data);
        for event in inbound {
            match event {
                Inbound::Data { info, data } => self.dispatch(WsEvent::Data { info: &info, data: &data }),
                Inbound::Ping => self.dispatch(WsEvent::Ping),
                Inbound::Pong => self.dispatch(WsEvent::Pong),
                Inbound::Error { code, reason } => self.dispatch(WsEvent::Error { code, reason: &reason }),
            }
        }
    }

    fn decode(&self, data: &[u8]) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        let mut inner = self.inner.lock();
        inner.last_message = Instant::now();
        inner.buffer.extend_from_slice(data);

        loop {
            let Inner { decoder, buffer, .. } = &mut *inner;
            let frame = match decoder.decode(buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(client_id = self.id, cause = %e, "invalid websocket frame");
                    inner.status = ClientStatus::Disconnected;
                    if let Some(client) = inner.client.as_deref_mut() {
                        client.abort();
                    }
                    break;
                }
            };

            match frame {
                Frame::Data { info, data } => {
                    if !data.is_empty() || info.len == 0 {
                        inbound.push(Inbound::Data { info, data });
                    }
                }
                Frame::Control { opcode, payload } => match Opcode::from_u8(opcode) {
                    Some(Opcode::Close) => {
                        if payload.len() >= 2 {
                            let code = u16::from_be_bytes([payload[0], payload[1]]);
                            if code > 1001 {
                                inbound.push(Inbound::Error { code, reason: payload.slice(2..) });
                            }
                        }
                        if inner.status == ClientStatus::Disconnecting {
                            inner.status = ClientStatus::Disconnected;
                            inner.close_client(true);
                        } else {
                            inner.status = ClientStatus::Disconnecting;
                            if let Some(client) = inner.client.as_deref_mut() {
                                client.ack_later();
                            }
                            inner.queue_control(Opcode::Close, &payload);
                        }
                    }
                    Some(Opcode::Ping) => {
                        inbound.push(Inbound::Ping);
                        inner.queue_control(Opcode::Pong, &payload);
                    }
                    Some(Opcode::Pong) => {
                        if payload != PING_PAYLOAD {
                            inbound.push(Inbound::Pong);
                        }
                    }
                    _ => debug!(client_id = self.id, opcode, "ignoring unknown control frame"),
                },
            }
        }
        inbound
    }

    pub(crate) fn on_ack(&self, len: usize) {
        let mut inner = self.inner.lock();
        inner.last_message = Instant::now();
        let mut len = len;

        let head = inner.control.front().map(|head| (head.is_finished(), head.len(), head.opcode()));
        if let Some((true, head_len, opcode)) = head {
            len = len.saturating_sub(head_len);
            if inner.status == ClientStatus::Disconnecting && opcode == Opcode::Close {
                inner.control.pop_front();
                inner.status = ClientStatus::Disconnected;
                inner.close_client(true);
                return;
            }
            inner.control.pop_front();
        }

        if len > 0
            && let Some(message) = inner.messages.front_mut()
        {
            message.ack(len);
        }
        inner.run_queue();
    }

    pub(crate) fn on_poll(&self) {
        let mut inner = self.inner.lock();
        let Some(can_send) = inner.client.as_deref().map(Client::can_send) else {
            return;
        };
        let idle = inner.control.is_empty() && inner.messages.is_empty();
        if can_send && !idle {
            inner.run_queue();
        } else if idle
            && inner.status == ClientStatus::Connected
            && inner.keep_alive.is_some_and(|period| inner.last_message.elapsed() >= period)
        {
            inner.queue_control(Opcode::Ping, PING_PAYLOAD);
        }
    }

    pub(crate) fn on_timeout(&self) {
        self.inner.lock().close_client(true);
    }

    pub(crate) fn on_disconnect(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            inner.client = None;
            inner.status = ClientStatus::Disconnected;
            inner.control.clear();
            inner.messages.clear();
        }
        debug!(client_id = self.id, "websocket client disconnected");
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            registry.dispatch(self, WsEvent::Disconnect);
        }
    }

    fn dispatch(self: &Arc<Self>, event: WsEvent<'_>) {
        if let Some(registry) = self.registry.upgrade() {
            registry.dispatch(self, event);
        }
    }
}

impl fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WebSocketClient")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("status", &inner.status)
            .field("queued", &inner.messages.len())
            .finish_non_exhaustive()
    }
}
