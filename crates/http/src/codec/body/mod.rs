//! Request and response body codecs
//!
//! # Components
//!
//! - [`MultipartDecoder`]: byte-at-a-time `multipart/form-data` state machine with
//!   speculative boundary matching, producing upload chunks and form parameters
//! - [`ChunkedEncoder`]: frames streamed response payloads as
//!   `Transfer-Encoding: chunked` with a fixed four digit length prefix

mod chunked_encoder;
mod multipart_decoder;

pub use chunked_encoder::{CHUNK_OVERHEAD, ChunkedEncoder, MAX_CHUNK_PAYLOAD};
pub(crate) use multipart_decoder::MultipartDecoder;
