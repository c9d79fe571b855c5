//! A callback driven HTTP/1.1 engine for small devices
//!
//! This crate holds everything of the web server that is pure protocol: it never owns a
//! socket, a thread or a timer. Bytes are pushed in as they arrive and responses are
//! pulled out as far as the transport has room for, so the same code runs on top of a
//! tokio `TcpStream` or a non-blocking embedded TCP stack.
//!
//! # Features
//!
//! - Incremental request parsing that accepts any fragmentation of the input
//! - url-encoded and `multipart/form-data` bodies, with file parts streamed in chunks
//! - A flow controlled response state machine writing at most [`Client::space`] bytes
//! - Chunked transfer encoding and `%placeholder%` templates over any content source
//! - WebSocket framing and handshake, Server-Sent Events formatting
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use micro_async_http::codec::{RequestDecoder, RequestEvent};
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n");
//! assert!(decoder.decode(&mut buffer).unwrap().is_none());
//!
//! buffer.extend_from_slice(b"Content-Length: 7\r\n\r\na=1&b=2");
//! let mut events = Vec::new();
//! while let Some(event) = decoder.decode(&mut buffer).unwrap() {
//!     events.push(event);
//! }
//! assert!(matches!(events.last(), Some(RequestEvent::Complete)));
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: headers, parameters, methods, the request head and parse errors
//! - [`codec`]: the request decoder and chunked framing
//! - [`response`]: the response state machine and its content sources
//! - [`websocket`]: RFC 6455 frames and the opening handshake key
//! - [`sse`]: `text/event-stream` message formatting
//! - [`client`] and [`fs`]: the transport and storage the engine is driven through
//!
//! # Cargo features
//!
//! - `chunk-inflight` (default): streamed responses stop producing while more bytes are
//!   unacknowledged than the socket can take, and chunked ones spend a credit per write.

pub mod client;
pub mod codec;
pub mod fs;
pub mod protocol;
pub mod response;
pub mod sse;
pub mod websocket;

mod utils;
pub(crate) use utils::ensure;
pub use utils::url_decode;

pub use client::Client;
