use bytes::BytesMut;
use std::io::{self, Write};

use tokio_util::codec::Encoder;

/// Bytes a chunk frame adds around its payload: `xxxx\r\n` before, `\r\n` after.
pub const CHUNK_OVERHEAD: usize = 8;

/// Largest payload a single frame carries; the length prefix is always four hex digits.
pub const MAX_CHUNK_PAYLOAD: usize = 0xFFFF;

/// Frames payloads as `Transfer-Encoding: chunked`.
///
/// The length is written as four lowercase hex digits, zero padded, so a frame always
/// costs exactly [`CHUNK_OVERHEAD`] bytes. An empty payload is the terminating chunk;
/// anything encoded after it is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl Encoder<&[u8]> for ChunkedEncoder {
    type Error = io::Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }
        if payload.len() > MAX_CHUNK_PAYLOAD {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "chunk payload exceeds 0xffff bytes"));
        }

        dst.reserve(payload.len() + CHUNK_OVERHEAD);
        write!(helper::Writer(dst), "{:04x}\r\n", payload.len())?;
        dst.extend_from_slice(payload);
        dst.extend_from_slice(b"\r\n");

        if payload.is_empty() {
            self.eof = true;
        }
        Ok(())
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
