//! The tokio socket driver.
//!
//! Each accepted stream gets one task that turns socket activity into [`Connection`]
//! events: reads become `on_data`, flushed writes become `on_ack`, a periodic tick
//! becomes `on_poll` (and `on_timeout` once the receive timeout expired), and EOF or an
//! io error ends the connection with `on_disconnect`.
//!
//! A write counts as acknowledged once the kernel took it, so the engine sees the same
//! flow control it would on a device TCP stack, only with a fixed send window.

use std::fmt;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use micro_async_http::Client;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::server::Connection;
use crate::{Server, ServerError};

/// Bytes the engine may have unacknowledged on one connection.
pub const SEND_WINDOW: usize = 5744;

const READ_BUFFER_SIZE: usize = 1460;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Outbox {
    /// Added but not sent yet.
    queued: Vec<u8>,
    /// Sent, waiting for the writer. Written even when closing, unless aborted.
    flushing: Vec<u8>,
    in_flight: usize,
    closing: Option<bool>,
    aborted: bool,
    rx_timeout: u32,
    no_delay: Option<bool>,
}

/// The [`Client`] handed to the engine for a tokio connection.
pub(crate) struct TcpClient {
    outbox: Arc<Mutex<Outbox>>,
    notify: Arc<Notify>,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl TcpClient {
    fn wake(&self) {
        self.notify.notify_one();
    }
}

impl Client for TcpClient {
    fn can_send(&self) -> bool {
        let outbox = self.outbox.lock();
        outbox.closing.is_none() && outbox.in_flight + outbox.queued.len() < SEND_WINDOW
    }

    fn space(&self) -> usize {
        let outbox = self.outbox.lock();
        if outbox.closing.is_some() {
            return 0;
        }
        SEND_WINDOW.saturating_sub(outbox.in_flight + outbox.queued.len())
    }

    fn add(&mut self, data: &[u8]) -> usize {
        let mut outbox = self.outbox.lock();
        if outbox.closing.is_some() {
            return 0;
        }
        let room = SEND_WINDOW.saturating_sub(outbox.in_flight + outbox.queued.len());
        let accepted = data.len().min(room);
        outbox.queued.extend_from_slice(&data[..accepted]);
        accepted
    }

    fn send(&mut self) -> bool {
        {
            let mut outbox = self.outbox.lock();
            if outbox.closing == Some(true) {
                return false;
            }
            let queued = mem::take(&mut outbox.queued);
            outbox.in_flight += queued.len();
            outbox.flushing.extend_from_slice(&queued);
        }
        self.wake();
        true
    }

    fn close(&mut self, now: bool) {
        self.outbox.lock().closing.get_or_insert(now);
        self.wake();
    }

    fn abort(&mut self) {
        {
            let mut outbox = self.outbox.lock();
            outbox.aborted = true;
            outbox.closing = Some(true);
        }
        self.wake();
    }

    fn set_rx_timeout(&mut self, seconds: u32) {
        self.outbox.lock().rx_timeout = seconds;
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        self.outbox.lock().no_delay = Some(no_delay);
        self.wake();
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClient")
            .field("remote_addr", &self.remote_addr)
            .field("outbox", &*self.outbox.lock())
            .finish_non_exhaustive()
    }
}

/// What the driver loop does next, decided under the outbox lock.
enum Step {
    Write(Vec<u8>),
    Close,
    Wait { rx_timeout: u32 },
}

fn next_step(outbox: &Mutex<Outbox>, stream: &TcpStream) -> Step {
    let mut outbox = outbox.lock();
    if let Some(no_delay) = outbox.no_delay.take()
        && let Err(e) = stream.set_nodelay(no_delay)
    {
        debug!(cause = %e, "failed to set TCP_NODELAY");
    }
    if outbox.aborted {
        Step::Close
    } else if !outbox.flushing.is_empty() {
        Step::Write(mem::take(&mut outbox.flushing))
    } else if outbox.closing.is_some() {
        Step::Close
    } else {
        Step::Wait { rx_timeout: outbox.rx_timeout }
    }
}

/// Drives one connection until either side closes it.
async fn drive(server: Server, mut stream: TcpStream) {
    let remote_addr = stream.peer_addr().ok();
    let outbox = Arc::new(Mutex::new(Outbox::default()));
    let notify = Arc::new(Notify::new());
    let client = TcpClient {
        outbox: Arc::clone(&outbox),
        notify: Arc::clone(&notify),
        remote_addr,
        local_addr: stream.local_addr().ok(),
    };
    let mut connection: Connection = server.accept(Box::new(client));

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    let mut last_received = Instant::now();

    loop {
        match next_step(&outbox, &stream) {
            Step::Write(bytes) => {
                if let Err(e) = stream.write_all(&bytes).await {
                    connection.on_error(&e);
                    break;
                }
                {
                    let mut outbox = outbox.lock();
                    outbox.in_flight = outbox.in_flight.saturating_sub(bytes.len());
                }
                connection.on_ack(bytes.len());
            }
            Step::Close => break,
            Step::Wait { rx_timeout } => {
                tokio::select! {
                    read = stream.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => {
                            last_received = Instant::now();
                            connection.on_data(&buf[..n]);
                        }
                        Err(e) => {
                            connection.on_error(&e);
                            break;
                        }
                    },
                    _ = poll.tick() => {
                        if rx_timeout > 0 && last_received.elapsed() >= Duration::from_secs(rx_timeout.into()) {
                            last_received = Instant::now();
                            connection.on_timeout();
                        }
                        connection.on_poll();
                    }
                    () = notify.notified() => {}
                }
            }
        }
    }

    let aborted = outbox.lock().aborted;
    if !aborted && let Err(e) = stream.shutdown().await
    {
        debug!(?remote_addr, cause = %e, "shutdown failed");
    }
    connection.on_disconnect();
    debug!(?remote_addr, "connection closed");
}

fn install_subscriber() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("a global tracing subscriber is already installed");
    }
}

impl Server {
    /// Listens on the addresses given to [`ServerBuilder::address`](crate::ServerBuilder::address).
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.address.is_empty() {
            return Err(ServerError::MissingAddress);
        }
        self.listen(self.address.as_slice()).await
    }

    /// Binds `address` and serves connections until the task is dropped.
    pub async fn listen<A: ToSocketAddrs>(&self, address: A) -> Result<(), ServerError> {
        install_subscriber();
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(ServerError::Bind { addresses: self.address.clone(), source: e });
            }
        };
        self.serve(listener).await
    }

    /// Serves connections accepted from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("start listening at {:?}", listener.local_addr()?);
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };
            debug!(%remote_addr, "accepted connection");
            tokio::spawn(drive(self.clone(), stream));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;
    use micro_async_http::protocol::MethodSet;
    use micro_async_http::response::Response;

    fn client() -> (TcpClient, Arc<Mutex<Outbox>>) {
        let outbox = Arc::new(Mutex::new(Outbox::default()));
        let client = TcpClient {
            outbox: Arc::clone(&outbox),
            notify: Arc::new(Notify::new()),
            remote_addr: None,
            local_addr: None,
        };
        (client, outbox)
    }

    #[test]
    fn send_window_shrinks_with_unflushed_bytes() {
        let (mut client, outbox) = client();
        assert_eq!(client.space(), SEND_WINDOW);

        assert_eq!(client.add(&[1; 100]), 100);
        assert_eq!(client.space(), SEND_WINDOW - 100);
        assert!(client.send());
        assert_eq!(outbox.lock().flushing.len(), 100);
        assert_eq!(client.space(), SEND_WINDOW - 100);

        assert_eq!(client.add(&vec![2; SEND_WINDOW]), SEND_WINDOW - 100);
        assert!(!client.can_send());
    }

    #[test]
    fn close_stops_accepting_bytes() {
        let (mut client, outbox) = client();
        client.close(false);
        assert_eq!(client.space(), 0);
        assert_eq!(client.add(b"late"), 0);

        client.abort();
        assert!(outbox.lock().aborted);
        assert_eq!(outbox.lock().closing, Some(true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn serves_requests_over_tcp() {
        let server = Server::default();
        server.on("/hello", MethodSet::GET, |request: &mut Request| {
            request.send(Response::text(200, "text/plain", "hello tcp"));
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\r\n\r\nhello tcp"));
    }
}
