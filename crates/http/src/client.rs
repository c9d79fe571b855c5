//! The transport seen by the protocol engine.
//!
//! Nothing in this crate owns a socket. Responses, WebSocket frames and event
//! messages are written to a [`Client`], and the driver feeds acknowledgements back
//! in. A driver reports free send space through [`Client::space`]; writers never
//! hand it more than that.

use std::net::SocketAddr;

/// One accepted connection, as seen from the protocol side.
pub trait Client: Send {
    /// Whether the transport currently accepts new bytes.
    fn can_send(&self) -> bool;

    /// Free bytes in the send window.
    fn space(&self) -> usize;

    /// Queues bytes without flushing them, returns how many were accepted.
    fn add(&mut self, data: &[u8]) -> usize;

    /// Flushes queued bytes. `false` when the transport refused.
    fn send(&mut self) -> bool;

    /// Queues and flushes.
    fn write(&mut self, data: &[u8]) -> usize {
        let written = self.add(data);
        if written > 0 {
            self.send();
        }
        written
    }

    /// Closes the connection, discarding unsent bytes when `now` is set.
    fn close(&mut self, now: bool);

    /// Drops the connection without a graceful shutdown.
    fn abort(&mut self);

    /// Seconds of receive silence after which the driver reports a timeout, `0` disables.
    fn set_rx_timeout(&mut self, seconds: u32);

    fn set_no_delay(&mut self, no_delay: bool);

    /// Holds back acknowledging the data currently being processed.
    fn ack_later(&mut self) {}

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl<C: Client + ?Sized> Client for Box<C> {
    fn can_send(&self) -> bool {
        (**self).can_send()
    }

    fn space(&self) -> usize {
        (**self).space()
    }

    fn add(&mut self, data: &[u8]) -> usize {
        (**self).add(data)
    }

    fn send(&mut self) -> bool {
        (**self).send()
    }

    fn write(&mut self, data: &[u8]) -> usize {
        (**self).write(data)
    }

    fn close(&mut self, now: bool) {
        (**self).close(now)
    }

    fn abort(&mut self) {
        (**self).abort()
    }

    fn set_rx_timeout(&mut self, seconds: u32) {
        (**self).set_rx_timeout(seconds)
    }

    fn set_no_delay(&mut self, no_delay: bool) {
        (**self).set_no_delay(no_delay)
    }

    fn ack_later(&mut self) {
        (**self).ack_later()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        (**self).remote_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Client;
    use std::collections::VecDeque;

    /// Records everything written; the send window is scripted per call to `space`.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingClient {
        pub(crate) output: Vec<u8>,
        pub(crate) queued: Vec<u8>,
        pub(crate) spaces: VecDeque<usize>,
        pub(crate) default_space: usize,
        pub(crate) closed: Option<bool>,
        pub(crate) blocked: bool,
        pub(crate) ack_later_calls: usize,
    }

    impl RecordingClient {
        pub(crate) fn with_space(space: usize) -> Self {
            Self { default_space: space, ..Default::default() }
        }

        pub(crate) fn push_space(&mut self, space: usize) {
            self.spaces.push_back(space);
        }

        pub(crate) fn take_output(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.output)
        }

        fn current_space(&self) -> usize {
            self.spaces.front().copied().unwrap_or(self.default_space)
        }
    }

    impl Client for RecordingClient {
        fn can_send(&self) -> bool {
            !self.blocked && self.closed.is_none()
        }

        fn space(&self) -> usize {
            if self.closed.is_some() { 0 } else { self.current_space() }
        }

        fn add(&mut self, data: &[u8]) -> usize {
            let room = self.current_space().saturating_sub(self.queued.len());
            let accepted = data.len().min(room);
            self.queued.extend_from_slice(&data[..accepted]);
            accepted
        }

        fn send(&mut self) -> bool {
            let queued = std::mem::take(&mut self.queued);
            self.output.extend_from_slice(&queued);
            self.spaces.pop_front();
            true
        }

        fn close(&mut self, now: bool) {
            self.closed.get_or_insert(now);
        }

        fn abort(&mut self) {
            self.closed = Some(true);
        }

        fn set_rx_timeout(&mut self, _seconds: u32) {}

        fn set_no_delay(&mut self, _no_delay: bool) {}

        fn ack_later(&mut self) {
            self.ack_later_calls += 1;
        }
    }
}
