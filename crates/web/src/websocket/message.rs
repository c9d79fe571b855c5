use bytes::Bytes;
use micro_async_http::Client;
use micro_async_http::websocket::{MAX_CONTROL_PAYLOAD, Opcode, frame_window, send_frame};

/// A ping, pong or close frame waiting for the socket.
#[derive(Debug)]
pub(crate) struct ControlFrame {
    opcode: Opcode,
    payload: Bytes,
    finished: bool,
}

impl ControlFrame {
    pub(crate) fn new(opcode: Opcode, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_CONTROL_PAYLOAD);
        Self { opcode, payload: Bytes::copy_from_slice(&payload[..len]), finished: false }
    }

    pub(crate) fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Wire length: payload plus the two byte header.
    pub(crate) fn len(&self) -> usize {
        self.payload.len() + 2
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn send(&mut self, client: &mut dyn Client) -> usize {
        self.finished = true;
        send_frame(client, true, self.opcode as u8, false, &self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageStatus {
    Sending,
    Sent,
    Error,
}

/// A text or binary message, sent in as many frames as the socket window requires.
///
/// The buffer is shared: broadcasting one message to many clients clones the handle,
/// never the bytes.
#[derive(Debug)]
pub(crate) struct Message {
    buffer: Bytes,
    opcode: Opcode,
    mask: bool,
    sent: usize,
    /// Wire bytes written, frame headers included.
    ack: usize,
    acked: usize,
    status: MessageStatus,
}

impl Message {
    pub(crate) fn new(buffer: Bytes, opcode: Opcode, mask: bool) -> Self {
        Self { buffer, opcode, mask, sent: 0, ack: 0, acked: 0, status: MessageStatus::Sending }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.status != MessageStatus::Sending
    }

    /// Everything written so far was acknowledged, so a control frame may go in between.
    pub(crate) fn is_between_frames(&self) -> bool {
        self.acked == self.ack
    }

    pub(crate) fn ack(&mut self, len: usize) {
        self.acked += len;
        if self.sent >= self.buffer.len() && self.acked >= self.ack {
            self.status = MessageStatus::Sent;
        }
    }

    /// Writes the next frame, returns the payload bytes it carried.
    pub(crate) fn send(&mut self, client: &mut dyn Client) -> usize {
        if self.status != MessageStatus::Sending || self.acked < self.ack {
            return 0;
        }
        let total = self.buffer.len();
        if self.sent == total {
            if self.acked == self.ack {
                self.status = MessageStatus::Sent;
            }
            return 0;
        }
        if self.sent > total {
            self.status = MessageStatus::Error;
            return 0;
        }

        let to_send = (total - self.sent).min(frame_window(client));
        let start = self.sent;
        self.sent += to_send;
        self.ack += to_send + if to_send < 126 { 2 } else { 4 } + if self.mask { 4 } else { 0 };

        let final_frame = self.sent == total;
        let opcode = if to_send > 0 && start == 0 { self.opcode } else { Opcode::Continuation };
        let sent = send_frame(client, final_frame, opcode as u8, self.mask, &self.buffer[start..start + to_send]);
        if to_send > 0 && sent != to_send {
            self.sent -= to_send - sent;
            self.ack -= to_send - sent;
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestClient;

    #[test]
    fn large_message_goes_out_in_window_sized_frames() {
        let mut client = TestClient::with_space(10);
        let mut message = Message::new(Bytes::from_static(b"0123456789abcdef"), Opcode::Text, false);

        assert_eq!(message.send(&mut client), 2);
        let first = client.take_output();
        assert_eq!(first, [0x01, 2, b'0', b'1']);
        assert!(!message.is_between_frames());
        assert_eq!(message.send(&mut client), 0);

        message.ack(first.len());
        assert!(message.is_between_frames());
        client.set_space(64);
        assert_eq!(message.send(&mut client), 14);
        let rest = client.take_output();
        assert_eq!(rest[0], 0x80);
        assert_eq!(&rest[2..], b"23456789abcdef");

        assert!(!message.is_finished());
        message.ack(rest.len());
        assert!(message.is_finished());
    }

    #[test]
    fn control_payload_is_clamped() {
        let frame = ControlFrame::new(Opcode::Ping, &[7; 200]);
        assert_eq!(frame.len(), MAX_CONTROL_PAYLOAD + 2);
    }
}
