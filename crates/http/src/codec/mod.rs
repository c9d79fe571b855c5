//! Byte level codecs.
//!
//! - [`RequestDecoder`]: turns fragmented inbound bytes into [`RequestEvent`]s, with the
//!   multipart/form-data parser in the `body` module
//! - [`ChunkedEncoder`]: `Transfer-Encoding: chunked` framing for streamed responses
//!
//! Both implement the `tokio_util` codec traits, so they work the same whether bytes
//! come from a callback driven socket or a `Framed` stream.

mod body;
mod request_decoder;

pub use body::{CHUNK_OVERHEAD, ChunkedEncoder, MAX_CHUNK_PAYLOAD};
pub use request_decoder::{
    BodyChunk, DEFAULT_MAX_LINE_SIZE, DEFAULT_UPLOAD_BUFFER_SIZE, RequestDecoder, RequestEvent, UploadChunk,
    parse_query,
};
