//! Byte-at-a-time `multipart/form-data` parser.
//!
//! The parser never buffers a whole part. Bytes that might begin a boundary
//! (`\r\n--boundary`) are withheld while the match is still possible; when the
//! match fails they are written back as ordinary content, followed by the byte
//! that broke the match, which is then processed again from the content state.
//!
//! File parts are delivered as [`UploadChunk`]s of at most `upload_buffer_size`
//! bytes. Other parts become a [`Param`] once their closing boundary is confirmed,
//! that is followed by `\r\n` or by the `--` terminator.

use bytes::BytesMut;
use std::collections::VecDeque;
use tracing::trace;

use crate::codec::{RequestEvent, UploadChunk};
use crate::ensure;
use crate::protocol::{Param, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectBoundary,
    ParseHeaders,
    WaitForReturn1,
    ExpectFeed1,
    ExpectDash1,
    ExpectDash2,
    BoundaryOrData,
    Dash3OrReturn2,
    ExpectFeed2,
    Finished,
}

#[derive(Debug)]
pub(crate) struct MultipartDecoder {
    boundary: Vec<u8>,
    state: State,
    boundary_position: usize,
    line: Vec<u8>,

    item_name: String,
    item_filename: String,
    item_type: String,
    item_value: Vec<u8>,
    item_is_file: bool,
    item_size: usize,

    upload: BytesMut,
    upload_buffer_size: usize,
}

impl MultipartDecoder {
    pub(crate) fn new(boundary: &str, upload_buffer_size: usize) -> Self {
        Self {
            boundary: boundary.as_bytes().to_vec(),
            state: State::ExpectBoundary,
            boundary_position: 0,
            line: Vec::new(),
            item_name: String::new(),
            item_filename: String::new(),
            item_type: String::new(),
            item_value: Vec::new(),
            item_is_file: false,
            item_size: 0,
            upload: BytesMut::new(),
            upload_buffer_size: upload_buffer_size.max(1),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Feeds one body byte.
    ///
    /// `parsed` is the offset of `byte` within the body; `total` is the declared body
    /// length, which is clamped when the closing boundary arrives early.
    pub(crate) fn feed(
        &mut self,
        byte: u8,
        parsed: usize,
        total: &mut usize,
        events: &mut VecDeque<RequestEvent>,
    ) -> Result<(), ParseError> {
        loop {
            match self.state {
                State::WaitForReturn1 => {
                    if byte == b'\r' {
                        self.state = State::ExpectFeed1;
                    } else {
                        self.write_item_byte(byte, events);
                    }
                }
                State::ExpectBoundary => self.expect_boundary(byte, parsed)?,
                State::ParseHeaders => self.parse_header_byte(byte),
                State::ExpectFeed1 => {
                    if byte == b'\n' {
                        self.state = State::ExpectDash1;
                    } else {
                        self.replay(b"\r", events);
                        continue;
                    }
                }
                State::ExpectDash1 => {
                    if byte == b'-' {
                        self.state = State::ExpectDash2;
                    } else {
                        self.replay(b"\r\n", events);
                        continue;
                    }
                }
                State::ExpectDash2 => {
                    if byte == b'-' {
                        self.state = State::BoundaryOrData;
                        self.boundary_position = 0;
                    } else {
                        self.replay(b"\r\n-", events);
                        continue;
                    }
                }
                State::BoundaryOrData => {
                    if self.boundary.get(self.boundary_position).is_some_and(|&expected| expected != byte) {
                        let position = self.boundary_position;
                        self.replay_boundary(position, false, events);
                        continue;
                    } else if self.boundary_position + 1 >= self.boundary.len() {
                        self.state = State::Dash3OrReturn2;
                    } else {
                        self.boundary_position += 1;
                    }
                }
                State::Dash3OrReturn2 => {
                    if byte == b'-' && *total - parsed != 4 {
                        trace!(expected = *total, clamped = parsed + 4, "multipart body ended early");
                        *total = parsed + 4;
                    }
                    if byte == b'\r' {
                        self.state = State::ExpectFeed2;
                    } else if byte == b'-' && *total == parsed + 4 {
                        self.state = State::Finished;
                        self.finish_item(events);
                    } else {
                        let length = self.boundary.len();
                        self.replay_boundary(length, false, events);
                        continue;
                    }
                }
                State::ExpectFeed2 => {
                    if byte == b'\n' {
                        self.finish_item(events);
                        self.state = State::ParseHeaders;
                        self.item_is_file = false;
                    } else {
                        let length = self.boundary.len();
                        self.replay_boundary(length, true, events);
                        continue;
                    }
                }
                State::Finished => {}
            }
            return Ok(());
        }
    }

    fn expect_boundary(&mut self, byte: u8, parsed: usize) -> Result<(), ParseError> {
        let length = self.boundary.len();
        if parsed < 2 {
            ensure!(byte == b'-', ParseError::invalid_multipart("body does not start with --"));
        } else if parsed - 2 < length {
            ensure!(self.boundary[parsed - 2] == byte, ParseError::invalid_multipart("first boundary mismatch"));
        } else if parsed - 2 == length {
            ensure!(byte == b'\r', ParseError::invalid_multipart("missing CR after first boundary"));
        } else if parsed - 3 == length {
            ensure!(byte == b'\n', ParseError::invalid_multipart("missing LF after first boundary"));
            self.state = State::ParseHeaders;
            self.item_is_file = false;
        }
        Ok(())
    }

    fn parse_header_byte(&mut self, byte: u8) {
        if byte != b'\r' && byte != b'\n' {
            self.line.push(byte);
        }
        if byte != b'\n' {
            return;
        }

        if self.line.is_empty() {
            // blank line: the part's content starts with the next byte
            self.state = State::WaitForReturn1;
            self.item_size = 0;
            self.item_value.clear();
            self.upload.clear();
            return;
        }

        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        if line.len() > 12 && line.get(..12).is_some_and(|p| p.eq_ignore_ascii_case("Content-Type")) {
            self.item_type = line.get(14..).unwrap_or_default().to_string();
            self.item_is_file = true;
        } else if line.len() > 19 && line.get(..19).is_some_and(|p| p.eq_ignore_ascii_case("Content-Disposition")) {
            let mut rest = line.find(';').and_then(|semi| line.get(semi + 2..)).unwrap_or_default();
            while let Some(semi) = rest.find(';').filter(|&semi| semi > 0) {
                self.disposition_pair(&rest[..semi]);
                rest = rest.get(semi + 2..).unwrap_or_default();
            }
            self.disposition_pair(rest);
        }
    }

    fn disposition_pair(&mut self, pair: &str) {
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let value = value.strip_prefix('"').unwrap_or(value);
        let value = value.strip_suffix('"').unwrap_or(value);
        match name {
            "name" => self.item_name = value.to_string(),
            "filename" => {
                self.item_filename = value.to_string();
                self.item_is_file = true;
            }
            _ => {}
        }
    }

    fn write_item_byte(&mut self, byte: u8, events: &mut VecDeque<RequestEvent>) {
        self.item_size += 1;
        if self.item_is_file {
            self.upload.extend_from_slice(&[byte]);
            if self.upload.len() >= self.upload_buffer_size {
                self.flush_upload(false, events);
            }
        } else {
            self.item_value.push(byte);
        }
    }

    /// Writes withheld bytes back as content and returns to the content state.
    fn replay(&mut self, withheld: &[u8], events: &mut VecDeque<RequestEvent>) {
        self.state = State::WaitForReturn1;
        for &byte in withheld {
            self.write_item_byte(byte, events);
        }
    }

    /// Replays `\r\n--` plus the first `matched` boundary bytes, and a trailing `\r` if asked.
    fn replay_boundary(&mut self, matched: usize, trailing_return: bool, events: &mut VecDeque<RequestEvent>) {
        self.replay(b"\r\n--", events);
        for i in 0..matched {
            let byte = self.boundary[i];
            self.write_item_byte(byte, events);
        }
        if trailing_return {
            self.write_item_byte(b'\r', events);
        }
    }

    fn flush_upload(&mut self, last: bool, events: &mut VecDeque<RequestEvent>) {
        let data = self.upload.split().freeze();
        let index = self.item_size - data.len();
        events.push_back(RequestEvent::Upload(UploadChunk {
            filename: self.item_filename.clone(),
            index,
            data,
            last,
        }));
    }

    fn finish_item(&mut self, events: &mut VecDeque<RequestEvent>) {
        trace!(name = %self.item_name, file = self.item_is_file, content_type = %self.item_type, size = self.item_size, "multipart part complete");
        if !self.item_is_file {
            let value = String::from_utf8_lossy(&self.item_value).into_owned();
            events.push_back(RequestEvent::Param(Param::post(self.item_name.clone(), value)));
            self.item_value.clear();
        } else if self.item_size > 0 {
            self.flush_upload(true, events);
            events.push_back(RequestEvent::Param(Param::file(
                self.item_name.clone(),
                self.item_filename.clone(),
                self.item_size,
            )));
        }
        self.upload.clear();
    }
}
