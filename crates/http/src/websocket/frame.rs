//! RFC 6455 framing.
//!
//! [`FrameDecoder`] reads frames incrementally: data frame payloads are handed out
//! as soon as bytes arrive, tagged with their offset in [`FrameInfo::index`], while
//! control frames are buffered and handed out whole. [`send_frame`] writes one frame
//! into whatever room the [`Client`] currently has.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::client::Client;
use crate::ensure;
use crate::protocol::ParseError;

/// Largest payload a single outgoing frame carries.
pub const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

/// Largest control frame payload.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Worst case header of an outgoing frame, 16 bit length and mask key included.
const MAX_SEND_HEADER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn is_control(raw: u8) -> bool {
        raw & 0x08 != 0
    }
}

/// Where a piece of inbound payload sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    /// Opcode of the message the frame belongs to; continuation frames inherit it.
    pub message_opcode: u8,
    /// Frame number within the message, `0` for the first.
    pub num: u32,
    pub final_frame: bool,
    pub masked: bool,
    /// Opcode of this frame.
    pub opcode: u8,
    /// Payload length of this frame.
    pub len: u64,
    pub mask: [u8; 4],
    /// Offset of the delivered bytes within this frame's payload.
    pub index: u64,
}

impl FrameInfo {
    /// Whether the delivered piece completes the whole message.
    pub fn is_message_end(&self, piece_len: usize) -> bool {
        self.final_frame && self.index + piece_len as u64 == self.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Unmasked payload of a text, binary or continuation frame.
    Data { info: FrameInfo, data: Bytes },
    /// A whole control frame.
    Control { opcode: u8, payload: Bytes },
}

/// Incremental inbound frame reader.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    info: FrameInfo,
    in_payload: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<bool, ParseError> {
        if src.len() < 2 {
            return Ok(false);
        }
        let (b0, b1) = (src[0], src[1]);
        let masked = b1 & 0x80 != 0;
        let extended = match b1 & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + extended + if masked { 4 } else { 0 };
        if src.len() < header_len {
            return Ok(false);
        }

        src.advance(2);
        let len = match extended {
            2 => u64::from(src.get_u16()),
            8 => src.get_u64(),
            _ => u64::from(b1 & 0x7F),
        };
        let mut mask = [0u8; 4];
        if masked {
            src.copy_to_slice(&mut mask);
        }

        let opcode = b0 & 0x0F;
        let final_frame = b0 & 0x80 != 0;
        if Opcode::is_control(opcode) {
            ensure!(len <= MAX_CONTROL_PAYLOAD as u64, ParseError::invalid_frame("control frame payload over 125 bytes"));
            ensure!(final_frame, ParseError::invalid_frame("fragmented control frame"));
        } else if opcode != 0 {
            self.info.message_opcode = opcode;
            self.info.num = 0;
        }

        self.info.final_frame = final_frame;
        self.info.masked = masked;
        self.info.opcode = opcode;
        self.info.len = len;
        self.info.mask = mask;
        self.info.index = 0;
        self.in_payload = true;
        Ok(true)
    }

    fn unmask(&self, data: &mut [u8]) {
        if !self.info.masked {
            return;
        }
        let offset = self.info.index;
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.info.mask[((offset + i as u64) % 4) as usize];
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !self.in_payload && !self.decode_header(src)? {
            return Ok(None);
        }

        let remaining = self.info.len - self.info.index;

        if Opcode::is_control(self.info.opcode) {
            if (src.len() as u64) < remaining {
                return Ok(None);
            }
            let mut payload = src.split_to(remaining as usize);
            self.unmask(&mut payload);
            self.in_payload = false;
            return Ok(Some(Frame::Control { opcode: self.info.opcode, payload: payload.freeze() }));
        }

        if remaining > 0 && src.is_empty() {
            return Ok(None);
        }
        let take = remaining.min(src.len() as u64) as usize;
        let mut data = src.split_to(take);
        self.unmask(&mut data);

        let info = self.info;
        self.info.index += take as u64;
        if self.info.index == self.info.len {
            self.in_payload = false;
            if self.info.final_frame {
                self.info.num = 0;
            } else {
                self.info.num += 1;
            }
        }
        Ok(Some(Frame::Data { info, data: data.freeze() }))
    }
}

/// Room for payload in the next outgoing frame, `0` when nothing can be sent.
pub fn frame_window(client: &dyn Client) -> usize {
    if !client.can_send() {
        return 0;
    }
    let space = client.space();
    if space <= MAX_SEND_HEADER { 0 } else { space - MAX_SEND_HEADER }
}

fn header_len(len: usize, mask: bool) -> usize {
    let mut header_len = 2;
    if len > 0 && mask {
        header_len += 4;
    }
    if len > 125 {
        header_len += 2;
    }
    header_len
}

/// Writes one frame, clamping the payload to the client's free space.
///
/// Returns the payload bytes sent, `0` when nothing could be written. `data` is never
/// modified; masking works on a copy.
pub fn send_frame(client: &mut dyn Client, final_frame: bool, opcode: u8, mask: bool, data: &[u8]) -> usize {
    if !client.can_send() {
        return 0;
    }
    let space = client.space();
    if space < 2 {
        return 0;
    }

    let mut len = data.len().min(MAX_FRAME_PAYLOAD);
    if space < header_len(len, mask) {
        return 0;
    }
    // the header may shrink with the payload, so settle the length first
    while len > 0 && header_len(len, mask) + len > space {
        len = space - header_len(len, mask);
        len = len.min(data.len());
    }
    let head_len = header_len(len, mask);

    let mut buf = Vec::with_capacity(head_len + len);
    let mut first = opcode & 0x0F;
    if final_frame {
        first |= 0x80;
    }
    buf.push(first);
    let mask_bit = if len > 0 && mask { 0x80 } else { 0 };
    if len < 126 {
        buf.push(len as u8 | mask_bit);
    } else {
        buf.push(126 | mask_bit);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    }

    let payload_start = buf.len() + if mask_bit != 0 { 4 } else { 0 };
    if mask_bit != 0 {
        let key: [u8; 4] = rand::random();
        buf.extend_from_slice(&key);
        buf.extend(data[..len].iter().enumerate().map(|(i, byte)| byte ^ key[i % 4]));
    } else {
        buf.extend_from_slice(&data[..len]);
    }

    if client.add(&buf[..payload_start]) != payload_start {
        return 0;
    }
    if len > 0 && client.add(&buf[payload_start..]) != len {
        return 0;
    }
    if !client.send() {
        return 0;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::RecordingClient;

    fn masked_frame(first: u8, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut out = vec![first];
        if payload.len() < 126 {
            out.push(0x80 | payload.len() as u8);
        } else {
            out.push(0x80 | 126);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    fn decode_all(decoder: &mut FrameDecoder, src: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn masked_text_frame() {
        let mut decoder = FrameDecoder::new();
        let mut src = BytesMut::from(&masked_frame(0x81, b"Hello", [0x37, 0xfa, 0x21, 0x3d])[..]);

        let frames = decode_all(&mut decoder, &mut src);
        assert_eq!(frames.len(), 1);
        let Frame::Data { info, data } = &frames[0] else { panic!("expected data") };
        assert_eq!(&data[..], b"Hello");
        assert_eq!(info.message_opcode, 1);
        assert!(info.is_message_end(data.len()));
    }

    #[test]
    fn partial_payload_keeps_mask_phase() {
        let frame = masked_frame(0x82, b"abcdefg", [1, 2, 3, 4]);
        let mut decoder = FrameDecoder::new();
        let mut src = BytesMut::from(&frame[..9]);

        let first = decode_all(&mut decoder, &mut src);
        src.extend_from_slice(&frame[9..]);
        let second = decode_all(&mut decoder, &mut src);

        let Frame::Data { info, data } = &first[0] else { panic!() };
        assert_eq!((&data[..], info.index), (&b"abc"[..], 0));
        let Frame::Data { info, data } = &second[0] else { panic!() };
        assert_eq!((&data[..], info.index), (&b"defg"[..], 3));
        assert!(info.is_message_end(data.len()));
    }

    #[test]
    fn split_header_waits_for_more_bytes() {
        let frame = masked_frame(0x81, &[b'x'; 200], [9, 9, 9, 9]);
        let mut decoder = FrameDecoder::new();
        let mut src = BytesMut::from(&frame[..3]);
        assert!(decoder.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&frame[3..]);
        let Some(Frame::Data { info, data }) = decoder.decode(&mut src).unwrap() else { panic!() };
        assert_eq!(info.len, 200);
        assert_eq!(data.len(), 200);
    }

    #[test]
    fn fragmented_message_counts_frames() {
        let mut src = BytesMut::new();
        src.extend_from_slice(&masked_frame(0x01, b"ab", [0; 4]));
        src.extend_from_slice(&masked_frame(0x00, b"cd", [0; 4]));
        src.extend_from_slice(&masked_frame(0x80, b"ef", [0; 4]));
        let frames = decode_all(&mut FrameDecoder::new(), &mut src);

        let nums: Vec<_> = frames
            .iter()
            .map(|frame| match frame {
                Frame::Data { info, .. } => (info.num, info.message_opcode, info.final_frame),
                Frame::Control { .. } => panic!(),
            })
            .collect();
        assert_eq!(nums, vec![(0, 1, false), (1, 1, false), (2, 1, true)]);
    }

    #[test]
    fn control_frame_is_delivered_whole() {
        let frame = masked_frame(0x89, b"ping!", [5, 6, 7, 8]);
        let mut decoder = FrameDecoder::new();
        let mut src = BytesMut::from(&frame[..8]);
        assert!(decoder.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&frame[8..]);
        assert_eq!(
            decoder.decode(&mut src).unwrap(),
            Some(Frame::Control { opcode: 0x9, payload: Bytes::from_static(b"ping!") })
        );
    }

    #[test]
    fn oversized_control_frame_fails() {
        let frame = masked_frame(0x89, &[0; 126], [0; 4]);
        let mut src = BytesMut::from(&frame[..]);
        assert!(FrameDecoder::new().decode(&mut src).is_err());
    }

    #[test]
    fn unmasked_small_frame_layout() {
        let mut client = RecordingClient::with_space(100);
        assert_eq!(send_frame(&mut client, true, Opcode::Text as u8, false, b"hi"), 2);
        assert_eq!(client.output, vec![0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn medium_frame_uses_16_bit_length() {
        let mut client = RecordingClient::with_space(1000);
        let data = vec![7u8; 300];
        assert_eq!(send_frame(&mut client, false, Opcode::Binary as u8, false, &data), 300);
        assert_eq!(&client.output[..4], &[0x02, 126, 0x01, 0x2C]);
        assert_eq!(client.output.len(), 304);
    }

    #[test]
    fn masked_frame_leaves_source_untouched() {
        let mut client = RecordingClient::with_space(100);
        let data = b"secret".to_vec();
        assert_eq!(send_frame(&mut client, true, Opcode::Text as u8, true, &data), 6);
        assert_eq!(data, b"secret");

        let out = &client.output;
        assert_eq!(out[1], 0x80 | 6);
        let key = &out[2..6];
        let unmasked: Vec<u8> = out[6..].iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect();
        assert_eq!(unmasked, b"secret");
    }

    #[test]
    fn payload_is_clamped_to_space() {
        let mut client = RecordingClient::with_space(130);
        let data = vec![1u8; 500];
        let sent = send_frame(&mut client, true, Opcode::Binary as u8, false, &data);
        assert_eq!(sent, 126);
        assert_eq!(client.output.len(), 130);
        assert_eq!(client.output[1], 126);
    }

    #[test]
    fn no_room_for_header_sends_nothing() {
        let mut client = RecordingClient::with_space(1);
        assert_eq!(send_frame(&mut client, true, Opcode::Text as u8, false, b"x"), 0);
        assert!(client.output.is_empty());
    }

    #[test]
    fn window_reserves_header_room() {
        assert_eq!(frame_window(&RecordingClient::with_space(8)), 0);
        assert_eq!(frame_window(&RecordingClient::with_space(100)), 92);
    }
}
