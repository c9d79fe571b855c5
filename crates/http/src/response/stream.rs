use bytes::BytesMut;
use std::{fmt, io};

use crate::response::Response;

/// A body written by the handler before sending, up to a size cap.
///
/// Writes beyond the cap are cut short: `io::Write` reports the shorter count and
/// `fmt::Write` fails.
#[derive(Debug)]
pub struct ResponseStream {
    code: u16,
    content_type: String,
    buffer: BytesMut,
    max_size: usize,
    headers: Vec<(String, String)>,
}

impl ResponseStream {
    pub fn new(content_type: &str, initial_size: usize, max_size: usize) -> Self {
        Self {
            code: 200,
            content_type: content_type.to_string(),
            buffer: BytesMut::with_capacity(initial_size.min(max_size)),
            max_size,
            headers: Vec::new(),
        }
    }

    pub fn set_code(&mut self, code: u16) {
        self.code = code;
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends as much of `data` as fits, returns the count.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.max_size - self.buffer.len());
        self.buffer.extend_from_slice(&data[..n]);
        n
    }
}

impl io::Write for ResponseStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.append(buf) {
            0 => Err(io::Error::new(io::ErrorKind::WriteZero, "response stream is full")),
            n => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for ResponseStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.append(s.as_bytes()) == s.len() { Ok(()) } else { Err(fmt::Error) }
    }
}

impl From<ResponseStream> for Response {
    fn from(stream: ResponseStream) -> Self {
        let mut response = Response::bytes(stream.code, &stream.content_type, stream.buffer.freeze());
        for (name, value) in stream.headers {
            response.add_header(name, value, false);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_capped() {
        use std::io::Write as _;

        let mut stream = ResponseStream::new("text/plain", 4, 8);
        assert_eq!(stream.write(b"hello").unwrap(), 5);
        assert_eq!(stream.write(b"world").unwrap(), 3);
        assert!(stream.write(b"!").is_err());
        assert!(fmt::Write::write_str(&mut stream, "x").is_err());
        assert_eq!(stream.len(), 8);
    }

    #[test]
    fn converts_to_fixed_length_response() {
        use std::fmt::Write as _;

        let mut stream = ResponseStream::new("text/html", 16, 1024);
        write!(stream, "<b>{}</b>", 42).unwrap();
        stream.add_header("X-Test", "1");
        let response = Response::from(stream);
        assert_eq!(response.content_length(), 9);
        assert_eq!(response.content_type(), "text/html");
        assert_eq!(response.header("x-test").map(|h| h.value()), Some("1"));
    }
}
