use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use micro_async_http::Client;
use micro_async_http::sse::format_event;
use parking_lot::Mutex;
use tracing::{debug, error};

use super::{MAX_INFLIGHT, MIN_INFLIGHT, SourceRegistry};

/// One formatted event, shared between every client it was sent to.
#[derive(Debug)]
struct Pending {
    data: Bytes,
    sent: usize,
    acked: usize,
}

impl Pending {
    fn is_sent(&self) -> bool {
        self.sent >= self.data.len()
    }

    fn is_finished(&self) -> bool {
        self.acked >= self.data.len()
    }

    /// Returns the acknowledged bytes beyond this message, owed to the next one.
    fn ack(&mut self, len: usize) -> usize {
        let total = self.data.len();
        if self.acked + len > total {
            let extra = self.acked + len - total;
            self.acked = total;
            return extra;
        }
        self.acked += len;
        0
    }

    fn write(&mut self, client: &mut dyn Client) -> usize {
        if self.is_sent() || !client.can_send() {
            return 0;
        }
        let len = (self.data.len() - self.sent).min(client.space());
        let written = client.add(&self.data[self.sent..self.sent + len]);
        self.sent += written;
        written
    }
}

struct Inner {
    client: Option<Box<dyn Client>>,
    queue: VecDeque<Pending>,
    inflight: usize,
    max_inflight: usize,
    max_queued: usize,
}

impl Inner {
    /// Writes queued events until the socket is full or the in-flight window is spent.
    fn run_queue(&mut self) {
        let Some(client) = self.client.as_deref_mut() else {
            return;
        };
        let mut total = 0;
        for pending in self.queue.iter_mut().filter(|pending| !pending.is_sent()) {
            let written = pending.write(client);
            total += written;
            self.inflight += written;
            if written == 0 || self.inflight > self.max_inflight {
                break;
            }
        }
        if total > 0 {
            client.send();
        }
    }
}

/// One subscriber of an [`EventSource`](super::EventSource).
pub struct SseClient {
    id: u32,
    last_id: u32,
    remote_addr: Option<SocketAddr>,
    registry: Weak<SourceRegistry>,
    inner: Mutex<Inner>,
}

impl SseClient {
    pub(crate) fn new(id: u32, last_id: u32, mut client: Box<dyn Client>, registry: &Arc<SourceRegistry>) -> Self {
        client.set_rx_timeout(0);
        client.set_no_delay(true);
        let remote_addr = client.remote_addr();
        Self {
            id,
            last_id,
            remote_addr,
            registry: Arc::downgrade(registry),
            inner: Mutex::new(Inner {
                client: Some(client),
                queue: VecDeque::new(),
                inflight: 0,
                max_inflight: MAX_INFLIGHT,
                max_queued: registry.max_queued_messages(),
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The `Last-Event-ID` the browser reconnected with, `0` when absent.
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected(&self) -> bool {
        self.inner.lock().client.is_some()
    }

    /// Events queued and not yet fully acknowledged.
    pub fn packets_waiting(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn max_inflight(&self) -> usize {
        self.inner.lock().max_inflight
    }

    /// Caps unacknowledged bytes; values outside 2920..=16384 are ignored.
    pub fn set_max_inflight_bytes(&self, value: usize) {
        if (MIN_INFLIGHT..=MAX_INFLIGHT).contains(&value) {
            self.inner.lock().max_inflight = value;
        }
    }

    pub fn send(&self, message: Option<&str>, event: Option<&str>, id: u32, reconnect: u32) -> bool {
        self.connected() && self.write(Bytes::from(format_event(message, event, id, reconnect)))
    }

    pub fn close(&self) {
        if let Some(client) = self.inner.lock().client.as_deref_mut() {
            client.close(false);
        }
    }

    /// Queues an already formatted event.
    pub(crate) fn write(&self, data: Bytes) -> bool {
        let mut inner = self.inner.lock();
        if inner.client.is_none() {
            return false;
        }
        if inner.queue.len() >= inner.max_queued {
            error!(client_id = self.id, "event message queue overflow, discarding message");
            return false;
        }
        inner.queue.push_back(Pending { data, sent: 0, acked: 0 });

        // past a quarter full, draining is left to acks and polls
        if inner.queue.len() < inner.max_queued >> 2 && inner.client.as_deref().is_some_and(|client| client.can_send()) {
            inner.run_queue();
        }
        true
    }

    // ---- connection events -------------------------------------------------------------

    pub(crate) fn on_ack(&self, len: usize) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.inflight = inner.inflight.saturating_sub(len);

        let mut len = len;
        while len > 0
            && let Some(front) = inner.queue.front_mut()
        {
            len = front.ack(len);
            if front.is_finished() {
                inner.queue.pop_front();
            } else {
                break;
            }
        }
        if !inner.queue.is_empty() {
            inner.run_queue();
        }
    }

    pub(crate) fn on_poll(&self) {
        let mut inner = self.inner.lock();
        if !inner.queue.is_empty() {
            inner.run_queue();
        }
    }

    pub(crate) fn on_timeout(&self) {
        if let Some(client) = self.inner.lock().client.as_deref_mut() {
            client.close(true);
        }
    }

    pub(crate) fn on_disconnect(self: &Arc<Self>) {
        if self.inner.lock().client.take().is_none() {
            return;
        }
        debug!(client_id = self.id, "event source client disconnected");
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
    }
}

impl fmt::Debug for SseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SseClient")
            .field("id", &self.id)
            .field("last_id", &self.last_id)
            .field("remote_addr", &self.remote_addr)
            .field("connected", &inner.client.is_some())
            .field("queued", &inner.queue.len())
            .field("inflight", &inner.inflight)
            .finish_non_exhaustive()
    }
}
