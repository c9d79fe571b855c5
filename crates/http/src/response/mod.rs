//! The response state machine.
//!
//! A [`Response`] is built by a handler in [`ResponseState::Setup`], where code, headers
//! and content type may change. [`Response::respond`] assembles the head and starts
//! writing; from then on the response is advanced only by [`Response::ack`], called
//! by the connection whenever the peer acknowledged bytes or the socket was polled:
//!
//! ```text
//! Setup -> Headers -> Content -> WaitAck -> End
//!             \__________\__________\______> Failed
//! ```
//!
//! Every write is bounded by [`Client::space`]. Streamed bodies come from a
//! [`ContentSource`], optionally passed through a [`TemplateProcessor`] and framed as
//! `Transfer-Encoding: chunked`.
//!
//! With the `chunk-inflight` feature, streamed responses also count unacknowledged
//! bytes: nothing new is produced while more bytes are in flight than the socket has
//! room for, and chunked responses spend one credit per write, earning one back per
//! acknowledgement.

mod file;
mod source;
mod stream;
mod template;

pub use file::{content_type_for_path, gzip_etag};
pub use source::{BytesSource, CallbackSource, ContentSource, FileSource, StreamSource};
pub use stream::ResponseStream;
pub use template::{TEMPLATE_NAME_LEN, TemplateFn, TemplateProcessor};

use bytes::{Bytes, BytesMut};
use std::fmt::{self, Write};
use std::task::Poll;
use tokio_util::codec::Encoder;
use tracing::{debug, error, warn};

use crate::client::Client;
use crate::codec::{CHUNK_OVERHEAD, ChunkedEncoder, MAX_CHUNK_PAYLOAD};
use crate::fs::ByteStream;
use crate::protocol::{Header, Headers, reason_phrase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseState {
    Setup,
    Headers,
    Content,
    WaitAck,
    End,
    Failed,
}

enum Body {
    /// Content held in memory, possibly with the unsent part of the head in front.
    Basic { pending: Bytes },
    Stream {
        source: Box<dyn ContentSource>,
        template: Option<TemplateProcessor>,
        head: Bytes,
        encoder: ChunkedEncoder,
    },
    /// Head only, with its unsent part; the connection changes protocol once the peer
    /// acknowledged all of it.
    Upgrade { pending: Bytes },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { pending } => f.debug_struct("Basic").field("pending", &pending.len()).finish(),
            Self::Stream { template, head, .. } => f
                .debug_struct("Stream")
                .field("template", &template.is_some())
                .field("head", &head.len())
                .finish_non_exhaustive(),
            Self::Upgrade { pending } => f.debug_struct("Upgrade").field("pending", &pending.len()).finish(),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    code: u16,
    headers: Headers,
    content_type: String,
    content_length: usize,
    send_content_length: bool,
    chunked: bool,
    head_length: usize,
    sent_length: usize,
    acked_length: usize,
    written_length: usize,
    state: ResponseState,
    body: Body,
    #[cfg(feature = "chunk-inflight")]
    in_flight: usize,
    #[cfg(feature = "chunk-inflight")]
    in_flight_credit: u8,
}

impl Response {
    fn with_body(code: u16, content_type: impl Into<String>, body: Body) -> Self {
        Self {
            code,
            headers: Headers::new(),
            content_type: content_type.into(),
            content_length: 0,
            send_content_length: true,
            chunked: false,
            head_length: 0,
            sent_length: 0,
            acked_length: 0,
            written_length: 0,
            state: ResponseState::Setup,
            body,
            #[cfg(feature = "chunk-inflight")]
            in_flight: 0,
            #[cfg(feature = "chunk-inflight")]
            in_flight_credit: 2,
        }
    }

    /// A response without body.
    pub fn new(code: u16) -> Self {
        Self::text(code, "", Bytes::new())
    }

    /// An in-memory body; a non-empty body defaults to `text/plain`.
    pub fn text(code: u16, content_type: &str, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        let mut content_type = content_type.to_string();
        if !content.is_empty() && content_type.is_empty() {
            content_type = mime::TEXT_PLAIN.to_string();
        }
        let content_length = content.len();
        let mut response = Self::with_body(code, content_type, Body::Basic { pending: content });
        response.content_length = content_length;
        response.headers.add(Header::new("Connection", "close"), false);
        response
    }

    /// Streams from any source. `None` length sends no `Content-Length` and closes the
    /// connection after the last byte.
    pub fn from_source(code: u16, content_type: &str, length: Option<usize>, source: Box<dyn ContentSource>) -> Self {
        let body = Body::Stream { source, template: None, head: Bytes::new(), encoder: ChunkedEncoder::new() };
        let mut response = Self::with_body(code, content_type, body);
        match length {
            Some(length) => response.content_length = length,
            None => response.send_content_length = false,
        }
        response
    }

    /// Constant or shared bytes read through a cursor.
    pub fn bytes(code: u16, content_type: &str, content: Bytes) -> Self {
        let length = content.len();
        Self::from_source(code, content_type, Some(length), Box::new(BytesSource::new(content)))
    }

    /// Body produced by `fill(buf, filled_so_far)`; a zero `length` means unknown.
    pub fn callback<F>(code: u16, content_type: &str, length: usize, fill: F) -> Self
    where
        F: FnMut(&mut [u8], usize) -> Poll<usize> + Send + 'static,
    {
        let length = (length > 0).then_some(length);
        Self::from_source(code, content_type, length, Box::new(CallbackSource::new(fill)))
    }

    /// Body of unknown length produced by `fill`, sent as chunked transfer encoding.
    pub fn chunked<F>(code: u16, content_type: &str, fill: F) -> Self
    where
        F: FnMut(&mut [u8], usize) -> Poll<usize> + Send + 'static,
    {
        let mut response = Self::from_source(code, content_type, None, Box::new(CallbackSource::new(fill)));
        response.chunked = true;
        response
    }

    /// Sends what the stream has available right now.
    pub fn stream(code: u16, content_type: &str, stream: Box<dyn ByteStream>) -> Self {
        let length = stream.available();
        Self::from_source(code, content_type, Some(length), Box::new(StreamSource::new(stream)))
    }

    /// A head-only response after which the connection switches protocol.
    pub fn upgrade(code: u16) -> Self {
        let mut response = Self::with_body(code, "", Body::Upgrade { pending: Bytes::new() });
        response.send_content_length = false;
        response
    }

    /// Runs the streamed body through `%placeholder%` substitution.
    ///
    /// The resulting length is unknown, so the body is sent chunked. Ignored for
    /// in-memory bodies and once the response started.
    #[must_use]
    pub fn with_template(mut self, processor: TemplateFn) -> Self {
        if self.is_started() {
            return self;
        }
        if let Body::Stream { template, .. } = &mut self.body {
            *template = Some(TemplateProcessor::new(processor));
            self.content_length = 0;
            self.send_content_length = false;
            self.chunked = true;
        }
        self
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn set_code(&mut self, code: u16) {
        if !self.is_started() {
            self.code = code;
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        if !self.is_started() {
            self.content_type = content_type.into();
        }
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn set_content_length(&mut self, length: usize) {
        if !self.is_started() {
            self.content_length = length;
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn sends_content_length(&self) -> bool {
        self.send_content_length
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.get(name)
    }

    /// See [`Headers::add`]. Changes after [`respond`](Self::respond) are not sent.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>, replace: bool) -> bool {
        self.headers.add(Header::new(name, value), replace)
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    pub fn remove_header_value(&mut self, name: &str, value: &str) -> bool {
        self.headers.remove_value(name, value)
    }

    /// Prepends the defaults this response does not set itself.
    pub fn apply_default_headers(&mut self, defaults: &Headers) {
        if !self.is_started() {
            self.headers.prepend_missing(defaults);
        }
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state > ResponseState::Setup
    }

    pub fn is_finished(&self) -> bool {
        self.state > ResponseState::WaitAck
    }

    pub fn is_failed(&self) -> bool {
        self.state == ResponseState::Failed
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self.body, Body::Upgrade { .. })
    }

    pub fn is_source_valid(&self) -> bool {
        match &self.body {
            Body::Stream { source, .. } => source.is_valid(),
            Body::Basic { .. } | Body::Upgrade { .. } => true,
        }
    }

    pub fn head_length(&self) -> usize {
        self.head_length
    }

    pub fn sent_length(&self) -> usize {
        self.sent_length
    }

    pub fn acked_length(&self) -> usize {
        self.acked_length
    }

    pub fn written_length(&self) -> usize {
        self.written_length
    }

    /// Status line and headers, `version` being the request's minor version.
    fn assemble_head(&mut self, version: u8) -> String {
        if version != 0 {
            self.headers.add(Header::new("Accept-Ranges", "none"), false);
            if self.chunked {
                self.headers.add(Header::new("Transfer-Encoding", "chunked"), false);
            }
        }
        if self.send_content_length {
            self.headers.add(Header::new("Content-Length", self.content_length.to_string()), false);
        }
        if !self.content_type.is_empty() {
            self.headers.add(Header::new("Content-Type", self.content_type.clone()), false);
        }

        let reason = reason_phrase(self.code);
        let mut out = String::with_capacity(17 + reason.len() + self.headers.wire_len() + 2);
        let _ = write!(out, "HTTP/1.{version} {} {reason}\r\n", self.code);
        for header in &self.headers {
            let _ = write!(out, "{header}\r\n");
        }
        out.push_str("\r\n");
        self.head_length = out.len();
        out
    }

    /// Starts sending; the first call moves the response out of [`ResponseState::Setup`].
    pub fn respond(&mut self, client: &mut dyn Client, version: u8) {
        if self.is_started() {
            return;
        }
        match self.body {
            Body::Basic { .. } => self.respond_basic(client, version),
            Body::Stream { .. } => {
                self.headers.add(Header::new("Connection", "close"), false);
                let head = Bytes::from(self.assemble_head(version));
                if let Body::Stream { head: pending, .. } = &mut self.body {
                    *pending = head;
                }
                self.state = ResponseState::Headers;
                self.ack(client, 0);
            }
            Body::Upgrade { .. } => {
                let head = Bytes::from(self.assemble_head(version));
                if let Body::Upgrade { pending } = &mut self.body {
                    *pending = head;
                }
                self.state = ResponseState::Headers;
                self.ack_upgrade(client, 0);
            }
        }
    }

    /// Advances after `len` acknowledged bytes, or after a poll when `len` is `0`.
    ///
    /// Returns the number of bytes written.
    pub fn ack(&mut self, client: &mut dyn Client, len: usize) -> usize {
        match self.body {
            Body::Basic { .. } => self.ack_basic(client, len),
            Body::Stream { .. } => self.ack_stream(client, len),
            Body::Upgrade { .. } => self.ack_upgrade(client, len),
        }
    }

    /// Writes the head as far as the socket has room, then waits for all of it to be
    /// acknowledged.
    fn ack_upgrade(&mut self, client: &mut dyn Client, len: usize) -> usize {
        self.acked_length += len;
        let Body::Upgrade { pending } = &mut self.body else {
            return 0;
        };

        match self.state {
            ResponseState::Headers => {
                let room = client.space().min(pending.len());
                let written = if room > 0 { client.write(&pending[..room]) } else { 0 };
                let _ = pending.split_to(written);
                self.written_length += written;
                if pending.is_empty() {
                    self.state = ResponseState::WaitAck;
                }
                written
            }
            ResponseState::WaitAck => {
                if self.acked_length >= self.written_length {
                    self.state = ResponseState::End;
                }
                0
            }
            _ => 0,
        }
    }

    fn respond_basic(&mut self, client: &mut dyn Client, version: u8) {
        self.state = ResponseState::Headers;
        let head = self.assemble_head(version);
        let Body::Basic { pending } = &mut self.body else {
            return;
        };
        let content = std::mem::take(pending);
        let out_len = head.len();
        let space = client.space();

        if content.is_empty() && space >= out_len {
            self.written_length += client.write(head.as_bytes());
            self.state = ResponseState::WaitAck;
        } else if !content.is_empty() && space >= out_len + content.len() {
            let mut out = BytesMut::with_capacity(out_len + content.len());
            out.extend_from_slice(head.as_bytes());
            out.extend_from_slice(&content);
            self.written_length += client.write(&out);
            self.sent_length = content.len();
            self.state = ResponseState::WaitAck;
        } else if space > 0 && space < out_len {
            self.written_length += client.write(&head.as_bytes()[..space]);
            let mut rest = BytesMut::with_capacity(out_len - space + content.len());
            rest.extend_from_slice(&head.as_bytes()[space..]);
            rest.extend_from_slice(&content);
            *pending = rest.freeze();
            self.state = ResponseState::Content;
        } else if space > out_len && space < out_len + content.len() {
            let shift = space - out_len;
            let mut out = BytesMut::with_capacity(space);
            out.extend_from_slice(head.as_bytes());
            out.extend_from_slice(&content[..shift]);
            self.written_length += client.write(&out);
            self.sent_length += shift;
            *pending = content.slice(shift..);
            self.state = ResponseState::Content;
        } else {
            let mut all = BytesMut::with_capacity(out_len + content.len());
            all.extend_from_slice(head.as_bytes());
            all.extend_from_slice(&content);
            *pending = all.freeze();
            self.state = ResponseState::Content;
        }
    }

    fn ack_basic(&mut self, client: &mut dyn Client, len: usize) -> usize {
        self.acked_length += len;
        let Body::Basic { pending } = &mut self.body else {
            return 0;
        };

        match self.state {
            ResponseState::Content => {
                let available = pending.len();
                let space = client.space();
                if space > available {
                    if available > 0 {
                        self.written_length += client.write(pending.as_ref());
                    }
                    self.sent_length += available;
                    *pending = Bytes::new();
                    self.state = ResponseState::WaitAck;
                    available
                } else {
                    let out = pending.split_to(space);
                    if !out.is_empty() {
                        self.written_length += client.write(&out);
                    }
                    self.sent_length += space;
                    space
                }
            }
            ResponseState::WaitAck => {
                if self.acked_length >= self.written_length {
                    self.state = ResponseState::End;
                }
                0
            }
            _ => 0,
        }
    }

    fn ack_stream(&mut self, client: &mut dyn Client, len: usize) -> usize {
        let Body::Stream { source, template, head, encoder } = &mut self.body else {
            return 0;
        };

        if !source.is_valid() {
            self.state = ResponseState::Failed;
            client.close(false);
            return 0;
        }

        #[cfg(feature = "chunk-inflight")]
        {
            if len > 0 {
                self.in_flight_credit = self.in_flight_credit.saturating_add(1);
            }
            if self.chunked && self.in_flight_credit == 0 {
                debug!("chunked response out of in-flight credits");
                return 0;
            }
            self.in_flight -= self.in_flight.min(len);
        }

        self.acked_length += len;
        let space = client.space();
        let head_len = head.len();

        if self.state == ResponseState::Headers {
            if space >= head_len {
                self.state = ResponseState::Content;
            } else {
                let out = head.split_to(space);
                self.written_length += client.write(&out);
                #[cfg(feature = "chunk-inflight")]
                {
                    self.in_flight += out.len();
                    self.in_flight_credit = self.in_flight_credit.saturating_sub(1);
                }
                return out.len();
            }
        }

        match self.state {
            ResponseState::Content => {
                // the head goes out in front of the first payload
                if space < head_len {
                    return 0;
                }
                let space = space - head_len;

                #[cfg(feature = "chunk-inflight")]
                {
                    if self.in_flight > space {
                        if len > 0 {
                            self.in_flight_credit = self.in_flight_credit.saturating_sub(1);
                        }
                        return 0;
                    }
                }

                let room = if self.chunked {
                    if space <= CHUNK_OVERHEAD {
                        return 0;
                    }
                    (space - CHUNK_OVERHEAD).min(MAX_CHUNK_PAYLOAD)
                } else if !self.send_content_length {
                    space
                } else {
                    (self.content_length - self.sent_length).min(space)
                };

                let mut payload = vec![0u8; room];
                let read_len = match fill_payload(source.as_mut(), template.as_mut(), &mut payload) {
                    Poll::Ready(n) => n,
                    Poll::Pending => return 0,
                };

                let mut out = BytesMut::with_capacity(head_len + read_len + CHUNK_OVERHEAD);
                out.extend_from_slice(head);
                if self.chunked {
                    if let Err(e) = encoder.encode(&payload[..read_len], &mut out) {
                        error!(cause = %e, "failed to frame chunk");
                        self.state = ResponseState::Failed;
                        client.abort();
                        return 0;
                    }
                } else {
                    out.extend_from_slice(&payload[..read_len]);
                }
                *head = Bytes::new();

                let out_len = out.len();
                if out_len > 0 {
                    self.written_length += client.write(&out);
                    #[cfg(feature = "chunk-inflight")]
                    {
                        self.in_flight += out_len;
                        self.in_flight_credit = self.in_flight_credit.saturating_sub(1);
                    }
                }

                if self.chunked {
                    self.sent_length += read_len;
                } else {
                    self.sent_length += out_len - head_len;
                }

                let exhausted = read_len == 0 && room > 0;
                if !self.chunked && exhausted && self.send_content_length && self.sent_length < self.content_length {
                    warn!(
                        sent = self.sent_length,
                        declared = self.content_length,
                        "content source ended before the declared length"
                    );
                }
                if (self.chunked && read_len == 0)
                    || (!self.chunked && exhausted)
                    || (!self.send_content_length && out_len == 0)
                    || (!self.chunked && self.sent_length == self.content_length)
                {
                    self.state = ResponseState::WaitAck;
                }
                out_len
            }
            ResponseState::WaitAck => {
                if !self.send_content_length || self.acked_length >= self.written_length {
                    self.state = ResponseState::End;
                    if !self.chunked && !self.send_content_length {
                        client.close(true);
                    }
                }
                0
            }
            _ => 0,
        }
    }
}

fn fill_payload(source: &mut dyn ContentSource, template: Option<&mut TemplateProcessor>, buf: &mut [u8]) -> Poll<usize> {
    match template {
        Some(template) => template.fill(source, buf),
        None => source.fill(buf),
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Self::text(200, "", Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Self::text(200, "", text)
    }
}
