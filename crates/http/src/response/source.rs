//! Producers of response body bytes.

use bytes::Bytes;
use std::fmt;
use std::task::Poll;
use tracing::warn;

use crate::fs::{ByteStream, File};

/// Fills outgoing buffers with body bytes.
///
/// `Ready(0)` ends the body. `Pending` means nothing is available yet: the response
/// makes no progress this round and asks again on the next ack or poll.
pub trait ContentSource: Send {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize>;

    /// `false` once the source can no longer produce its content, which fails the response.
    fn is_valid(&self) -> bool {
        true
    }
}

/// In-memory bytes read through a cursor; constant data uses `Bytes::from_static`.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    offset: usize,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ContentSource for BytesSource {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let left = &self.data[self.offset..];
        let n = left.len().min(buf.len());
        buf[..n].copy_from_slice(&left[..n]);
        self.offset += n;
        Poll::Ready(n)
    }
}

pub struct FileSource {
    file: Option<Box<dyn File>>,
}

impl FileSource {
    pub fn new(file: Box<dyn File>) -> Self {
        Self { file: Some(file) }
    }

    /// A source for a file that could not be opened.
    pub fn missing() -> Self {
        Self { file: None }
    }

    pub fn file(&self) -> Option<&dyn File> {
        self.file.as_deref()
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource").field("file", &self.file.as_ref().map(|file| file.name().to_string())).finish()
    }
}

impl ContentSource for FileSource {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let Some(file) = self.file.as_mut() else {
            return Poll::Ready(0);
        };
        match file.read(buf) {
            Ok(n) => Poll::Ready(n),
            Err(e) => {
                warn!(cause = %e, file = file.name(), "read file failed");
                self.file = None;
                Poll::Ready(0)
            }
        }
    }

    fn is_valid(&self) -> bool {
        self.file.is_some()
    }
}

pub struct StreamSource {
    stream: Box<dyn ByteStream>,
}

impl StreamSource {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self { stream }
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").field("available", &self.stream.available()).finish()
    }
}

impl ContentSource for StreamSource {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let n = self.stream.available().min(buf.len());
        Poll::Ready(self.stream.read(&mut buf[..n]))
    }
}

/// A user callback `fill(buf, filled_so_far)`.
pub struct CallbackSource<F> {
    callback: F,
    filled: usize,
}

impl<F> CallbackSource<F>
where
    F: FnMut(&mut [u8], usize) -> Poll<usize> + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback, filled: 0 }
    }
}

impl<F> fmt::Debug for CallbackSource<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSource").field("filled", &self.filled).finish_non_exhaustive()
    }
}

impl<F> ContentSource for CallbackSource<F>
where
    F: FnMut(&mut [u8], usize) -> Poll<usize> + Send,
{
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let result = (self.callback)(buf, self.filled);
        if let Poll::Ready(n) = result {
            self.filled += n;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_source_reads_through_cursor() {
        let mut source = BytesSource::new(Bytes::from_static(b"abcdef"));
        let mut buf = [0u8; 4];
        assert_eq!(source.fill(&mut buf), Poll::Ready(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.fill(&mut buf), Poll::Ready(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(source.fill(&mut buf), Poll::Ready(0));
    }

    #[test]
    fn callback_source_tracks_filled_index() {
        let mut seen = Vec::new();
        {
            let mut source = CallbackSource::new(|buf: &mut [u8], index| {
                seen.push(index);
                buf[0] = b'x';
                Poll::Ready(1)
            });
            let mut buf = [0u8; 8];
            let _ = source.fill(&mut buf);
            let _ = source.fill(&mut buf);
        }
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn missing_file_is_invalid() {
        assert!(!FileSource::missing().is_valid());
    }
}
