use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use micro_async_http::Client;
use micro_async_http::codec::{RequestDecoder, RequestEvent};
use micro_async_http::fs::File;
use parking_lot::Mutex;
use tokio_util::codec::Decoder;

use crate::server::ServerShared;
use crate::{Request, ServerConfig};

pub(crate) fn shared_server() -> Arc<ServerShared> {
    Arc::new(ServerShared::new(ServerConfig::default()))
}

/// A request whose head was parsed from `raw`, without any handler attached.
pub(crate) fn request_from(raw: &str) -> Request {
    let mut request = Request::detached(Box::new(TestClient::new()), shared_server());
    let mut decoder = RequestDecoder::new();
    let mut buffer = BytesMut::from(raw);
    while let Some(event) = decoder.decode(&mut buffer).expect("valid request fixture") {
        if let RequestEvent::Head(head) = event {
            request.set_head(head);
            break;
        }
    }
    request
}

#[derive(Debug)]
struct ClientState {
    output: Vec<u8>,
    queued: Vec<u8>,
    space: usize,
    blocked: bool,
    closed: Option<bool>,
    aborted: bool,
    rx_timeout: u32,
    no_delay: bool,
}

/// A shared, scriptable socket: clones observe the same state.
#[derive(Debug, Clone)]
pub(crate) struct TestClient(Arc<Mutex<ClientState>>);

impl TestClient {
    pub(crate) fn new() -> Self {
        Self::with_space(8192)
    }

    pub(crate) fn with_space(space: usize) -> Self {
        Self(Arc::new(Mutex::new(ClientState {
            output: Vec::new(),
            queued: Vec::new(),
            space,
            blocked: false,
            closed: None,
            aborted: false,
            rx_timeout: 0,
            no_delay: false,
        })))
    }

    pub(crate) fn set_space(&self, space: usize) {
        self.0.lock().space = space;
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.0.lock().blocked = blocked;
    }

    pub(crate) fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().output).into_owned()
    }

    pub(crate) fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().output)
    }

    pub(crate) fn closed(&self) -> Option<bool> {
        self.0.lock().closed
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.0.lock().aborted
    }

    pub(crate) fn rx_timeout(&self) -> u32 {
        self.0.lock().rx_timeout
    }

    pub(crate) fn no_delay(&self) -> bool {
        self.0.lock().no_delay
    }
}

impl Client for TestClient {
    fn can_send(&self) -> bool {
        let state = self.0.lock();
        !state.blocked && state.closed.is_none()
    }

    fn space(&self) -> usize {
        let state = self.0.lock();
        if state.closed.is_some() { 0 } else { state.space.saturating_sub(state.queued.len()) }
    }

    fn add(&mut self, data: &[u8]) -> usize {
        let mut state = self.0.lock();
        if state.closed.is_some() {
            return 0;
        }
        let accepted = data.len().min(state.space.saturating_sub(state.queued.len()));
        state.queued.extend_from_slice(&data[..accepted]);
        accepted
    }

    fn send(&mut self) -> bool {
        let mut state = self.0.lock();
        let queued = std::mem::take(&mut state.queued);
        state.output.extend_from_slice(&queued);
        true
    }

    fn close(&mut self, now: bool) {
        self.0.lock().closed.get_or_insert(now);
    }

    fn abort(&mut self) {
        let mut state = self.0.lock();
        state.aborted = true;
        state.closed = Some(true);
    }

    fn set_rx_timeout(&mut self, seconds: u32) {
        self.0.lock().rx_timeout = seconds;
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.0.lock().no_delay = no_delay;
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        "127.0.0.1:50000".parse().ok()
    }
}

#[derive(Debug)]
pub(crate) struct MemoryFile {
    name: String,
    data: Vec<u8>,
    position: usize,
    last_write: Option<u64>,
}

impl MemoryFile {
    pub(crate) fn new(name: &str, data: &[u8]) -> Self {
        Self { name: name.to_string(), data: data.to_vec(), position: 0, last_write: None }
    }

    pub(crate) fn boxed(name: &str, data: &[u8]) -> Box<dyn File> {
        Box::new(Self::new(name, data))
    }

    pub(crate) fn with_last_write(mut self, seconds: u64) -> Self {
        self.last_write = Some(seconds);
        self
    }
}

impl File for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn available(&self) -> usize {
        self.data.len() - self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.available());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn seek(&mut self, position: usize) -> io::Result<()> {
        if position > self.data.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek past end"));
        }
        self.position = position;
        Ok(())
    }

    fn last_write(&self) -> Option<u64> {
        self.last_write
    }
}
