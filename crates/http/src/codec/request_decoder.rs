//! HTTP request decoder module
//!
//! This module turns raw, arbitrarily fragmented inbound bytes into a sequence of
//! [`RequestEvent`]s using a streaming state machine.
//!
//! # Phases
//!
//! - Request line and headers: lines are cut at `\n` and trimmed. A NUL byte, an
//!   unknown method, an empty url or a line longer than the configured limit fails
//!   the request. The blank line yields [`RequestEvent::Head`].
//! - Body: exactly `Content-Length` bytes, anything after them is discarded. The body is
//!   either fed to the multipart parser, split into url-encoded parameters ("plain post"),
//!   or forwarded as raw [`BodyChunk`]s.
//! - Done: [`RequestEvent::Complete`] has been produced; further input is dropped.
//!
//! After receiving `Head` the consumer tells the decoder whether the body is worth
//! parsing with [`RequestDecoder::set_body_interest`]. Without interest, multipart and
//! url-encoded bodies are only counted, raw body chunks are still produced.
//!
//! # Example
//!
//! ```
//! use micro_async_http::codec::{RequestDecoder, RequestEvent};
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("GET /hello?x=1 HTTP/1.1\r\nHost: h\r\n\r\n");
//!
//! let Some(RequestEvent::Head(head)) = decoder.decode(&mut buffer).unwrap() else { panic!() };
//! assert_eq!(head.url(), "/hello");
//! assert!(matches!(decoder.decode(&mut buffer).unwrap(), Some(RequestEvent::Complete)));
//! ```

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::codec::body::MultipartDecoder;
use crate::ensure;
use crate::protocol::method::parse_method;
use crate::protocol::{Header, Param, ParseError, RequestHead};
use crate::utils::{normalize_escapes, url_decode};

/// Default limit for one request or header line.
pub const DEFAULT_MAX_LINE_SIZE: usize = 8 * 1024;

/// Default size of the buffer file uploads are delivered in.
pub const DEFAULT_UPLOAD_BUFFER_SIZE: usize = 1460;

const TLS_HANDSHAKE: u8 = 0x16;

/// A slice of a raw request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub data: Bytes,
    /// Offset of `data` within the body.
    pub index: usize,
    /// Declared body length.
    pub total: usize,
}

/// A slice of an uploaded multipart file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    pub filename: String,
    /// Offset of `data` within the file.
    pub index: usize,
    pub data: Bytes,
    /// Set on the chunk that ends the file part.
    pub last: bool,
}

/// Everything the decoder reports, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// Request line and headers, query parameters included.
    Head(RequestHead),
    Body(BodyChunk),
    Upload(UploadChunk),
    /// A url-encoded or multipart body parameter.
    Param(Param),
    /// The declared body has been fully consumed.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Headers,
    Body,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    Undecided,
    Raw,
    PlainPost,
    Multipart,
}

/// A decoder for HTTP requests producing [`RequestEvent`]s
pub struct RequestDecoder {
    phase: Phase,
    head: RequestHead,
    max_line_size: usize,
    reject_tls: bool,
    upload_buffer_size: usize,

    mode: BodyMode,
    interested: bool,
    parsed: usize,
    total: usize,
    content_type: String,
    multipart: Option<MultipartDecoder>,
    plain: Vec<u8>,

    pending: VecDeque<RequestEvent>,
}

impl RequestDecoder {
    /// Creates a new `RequestDecoder` instance
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size;
        self
    }

    /// Whether a TLS handshake as first byte fails the request.
    pub fn reject_tls(mut self, reject: bool) -> Self {
        self.reject_tls = reject;
        self
    }

    pub fn with_upload_buffer_size(mut self, size: usize) -> Self {
        self.upload_buffer_size = size;
        self
    }

    /// Declares whether url-encoded and multipart bodies should be parsed.
    pub fn set_body_interest(&mut self, interested: bool) {
        self.interested = interested;
    }

    /// Number of body bytes consumed so far.
    pub fn parsed_length(&self) -> usize {
        self.parsed
    }

    /// Declared body length, possibly clamped by an early multipart terminator.
    pub fn content_length(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done && self.pending.is_empty()
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<RequestEvent>, ParseError> {
        if self.phase == Phase::Start && src.first() == Some(&TLS_HANDSHAKE) {
            ensure!(!self.reject_tls, ParseError::TlsHandshake);
        }

        loop {
            let Some(end) = src.iter().position(|&b| b == b'\n' || b == 0) else {
                ensure!(src.len() <= self.max_line_size, ParseError::too_large_header(src.len(), self.max_line_size));
                return Ok(None);
            };
            ensure!(src[end] != 0, ParseError::NulByte);
            ensure!(end <= self.max_line_size, ParseError::too_large_header(end, self.max_line_size));

            let raw = src.split_to(end + 1);
            let line = String::from_utf8_lossy(&raw[..end]);
            let line = line.trim();

            if self.phase == Phase::Start {
                ensure!(!line.is_empty(), ParseError::invalid_request_line("empty request line"));
                self.parse_request_line(line)?;
                self.phase = Phase::Headers;
                continue;
            }

            if line.is_empty() {
                return Ok(Some(self.end_of_headers()));
            }

            if let Some(header) = Header::parse(line) {
                self.head.apply_header(header);
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let (method, rest) = line.split_once(' ').ok_or_else(|| ParseError::invalid_request_line(line))?;
        let (target, version) = rest.split_once(' ').unwrap_or((rest, ""));

        self.head.method = parse_method(method)?;

        let (path, query) = match target.find('?') {
            Some(index) if index > 0 => (&target[..index], &target[index + 1..]),
            _ => (target, ""),
        };
        self.head.url = url_decode(path);
        self.head.query = parse_query(query);
        ensure!(!self.head.url.is_empty(), ParseError::EmptyUrl);

        self.head.version = u8::from(!version.starts_with("HTTP/1.0"));
        trace!(method = %self.head.method, url = %self.head.url, "request line parsed");
        Ok(())
    }

    fn end_of_headers(&mut self) -> RequestEvent {
        let head = std::mem::take(&mut self.head);

        self.total = head.content_length;
        self.content_type.clone_from(&head.content_type);
        if head.multipart {
            self.mode = BodyMode::Multipart;
            self.multipart = Some(MultipartDecoder::new(&head.boundary, self.upload_buffer_size));
        }

        if self.total > 0 {
            self.phase = Phase::Body;
        } else {
            self.phase = Phase::Done;
            self.pending.push_back(RequestEvent::Complete);
        }
        RequestEvent::Head(head)
    }

    fn decode_body(&mut self, src: &mut BytesMut) -> Result<(), ParseError> {
        if src.is_empty() {
            return Ok(());
        }
        let len = src.len().min(self.total - self.parsed);
        let chunk = src.split_to(len).freeze();

        if self.mode == BodyMode::Undecided {
            self.mode = self.sniff_body_mode(&chunk);
        }

        match self.mode {
            BodyMode::Multipart if self.interested => {
                if let Some(multipart) = self.multipart.as_mut() {
                    for &byte in &chunk {
                        multipart.feed(byte, self.parsed, &mut self.total, &mut self.pending)?;
                        self.parsed += 1;
                        if self.parsed >= self.total {
                            break;
                        }
                    }
                    if multipart.is_finished() {
                        trace!(parsed = self.parsed, "multipart terminator reached");
                    }
                }
            }
            BodyMode::PlainPost if self.interested => {
                for &byte in &chunk {
                    self.parsed += 1;
                    self.plain_post_byte(byte);
                }
            }
            BodyMode::Raw | BodyMode::Undecided => {
                self.pending.push_back(RequestEvent::Body(BodyChunk { data: chunk, index: self.parsed, total: self.total }));
                self.parsed += len;
            }
            BodyMode::Multipart | BodyMode::PlainPost => self.parsed += len,
        }

        if self.parsed >= self.total {
            self.phase = Phase::Done;
            self.pending.push_back(RequestEvent::Complete);
        }
        Ok(())
    }

    /// Chooses between url-encoded parsing and raw delivery from the first body bytes.
    ///
    /// `text/plain` bodies are treated as url-encoded when they begin with a name made of
    /// parameter characters directly followed by `=`, and that `=` is not the last byte
    /// of the first segment.
    fn sniff_body_mode(&self, first: &[u8]) -> BodyMode {
        if self.content_type.starts_with("application/x-www-form-urlencoded") {
            return BodyMode::PlainPost;
        }
        if self.content_type == "text/plain" && first.first().is_some_and(|&b| is_param_char(b)) {
            let looks_like_pair = first
                .iter()
                .position(|&b| !is_param_char(b))
                .is_some_and(|stop| stop + 1 < first.len() && first[stop] == b'=');
            if looks_like_pair {
                return BodyMode::PlainPost;
            }
        }
        BodyMode::Raw
    }

    fn plain_post_byte(&mut self, byte: u8) {
        if byte != 0 && byte != b'&' {
            self.plain.push(byte);
        }
        if byte != 0 && byte != b'&' && self.parsed != self.total {
            return;
        }

        let text = String::from_utf8_lossy(&self.plain).into_owned();
        self.plain.clear();

        let (name, value) = match text.find('=') {
            Some(eq) if eq > 0 && !text.starts_with('{') && !text.starts_with('[') => (&text[..eq], &text[eq + 1..]),
            _ => ("body", text.as_str()),
        };
        let name = url_decode(name);
        if !name.is_empty() {
            self.pending.push_back(RequestEvent::Param(Param::post(name, url_decode(value))));
        }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self {
            phase: Phase::Start,
            head: RequestHead::default(),
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            reject_tls: true,
            upload_buffer_size: DEFAULT_UPLOAD_BUFFER_SIZE,
            mode: BodyMode::Undecided,
            interested: true,
            parsed: 0,
            total: 0,
            content_type: String::new(),
            multipart: None,
            plain: Vec::new(),
            pending: VecDeque::new(),
        }
    }
}

impl Decoder for RequestDecoder {
    type Item = RequestEvent;
    type Error = ParseError;

    /// Attempts to decode the next event from the provided buffer
    ///
    /// # Returns
    ///
    /// - `Ok(Some(_))`: an event is ready; call again, more may follow
    /// - `Ok(None)`: need more data to proceed
    /// - `Err(_)`: the request is malformed and the connection must be dropped
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            match self.phase {
                Phase::Start | Phase::Headers => return self.decode_head(src),
                Phase::Body => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    self.decode_body(src)?;
                }
                Phase::Done => {
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }
}

/// Splits a query string on `&` and `=`, percent-decoding both sides. Empty names are skipped.
pub fn parse_query(query: &str) -> Vec<Param> {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(&normalize_escapes(query)) {
        Ok(pairs) => pairs
            .into_iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| Param::query(name, value))
            .collect(),
        Err(e) => {
            debug!(cause = %e, "undecodable query string");
            Vec::new()
        }
    }
}

fn is_param_char(byte: u8) -> bool {
    byte != 0 && byte != b'{' && byte != b'[' && byte != b'&' && byte != b'='
}
