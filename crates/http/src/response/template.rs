//! `%placeholder%` substitution over streamed content.
//!
//! A fill reads up to the requested number of bytes, then replaces each `%name%` with
//! the processor's value for `name`, and `%%` with a single `%`. Replacement text is
//! not scanned again. Placeholders may straddle two fills: when a `%` is close to the
//! end of the buffer without a closing one, the processor reads ahead from the source.
//!
//! Bytes that do not fit the current buffer (read-ahead beyond the placeholder, text
//! pushed out by a longer value) go to the front of a side cache that later fills read
//! before touching the source again. A value shorter than its placeholder leaves room
//! that is refilled from the cache and the source.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;

use crate::response::ContentSource;

/// Longest placeholder name; longer names are cut.
pub const TEMPLATE_NAME_LEN: usize = 32;

const PLACEHOLDER: u8 = b'%';

/// Maps a placeholder name to its replacement.
pub type TemplateFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub struct TemplateProcessor {
    processor: TemplateFn,
    cache: VecDeque<u8>,
}

impl fmt::Debug for TemplateProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateProcessor").field("cached", &self.cache.len()).finish_non_exhaustive()
    }
}

impl TemplateProcessor {
    pub fn new(processor: TemplateFn) -> Self {
        Self { processor, cache: VecDeque::new() }
    }

    /// Appends up to `want` bytes to `data`, from the cache first.
    fn read(&mut self, source: &mut dyn ContentSource, want: usize, data: &mut Vec<u8>) -> Poll<usize> {
        let from_cache = want.min(self.cache.len());
        data.extend(self.cache.drain(..from_cache));
        if from_cache == want {
            return Poll::Ready(from_cache);
        }

        let start = data.len();
        data.resize(start + want - from_cache, 0);
        match source.fill(&mut data[start..]) {
            Poll::Ready(n) => {
                data.truncate(start + n);
                Poll::Ready(from_cache + n)
            }
            Poll::Pending => {
                data.truncate(start);
                if from_cache == 0 { Poll::Pending } else { Poll::Ready(from_cache) }
            }
        }
    }

    fn read_now(&mut self, source: &mut dyn ContentSource, want: usize, data: &mut Vec<u8>) -> usize {
        match self.read(source, want, data) {
            Poll::Ready(n) => n,
            Poll::Pending => 0,
        }
    }

    fn push_front(&mut self, bytes: &[u8]) {
        for &byte in bytes.iter().rev() {
            self.cache.push_front(byte);
        }
    }

    pub fn fill(&mut self, source: &mut dyn ContentSource, buf: &mut [u8]) -> Poll<usize> {
        let capacity = buf.len();
        let mut data = Vec::with_capacity(capacity + TEMPLATE_NAME_LEN);
        if self.read(source, capacity, &mut data).is_pending() {
            return Poll::Pending;
        }

        let mut pos = 0;
        while let Some(offset) = data[pos..].iter().position(|&b| b == PLACEHOLDER) {
            let start = pos + offset;
            let close = data[start + 1..].iter().position(|&b| b == PLACEHOLDER).map(|o| start + 1 + o);

            let (name, end) = match close {
                Some(close) if close == start + 1 => {
                    data.remove(close);
                    self.read_now(source, 1, &mut data);
                    pos = start + 1;
                    continue;
                }
                Some(close) => (data[start + 1..close].to_vec(), close + 1),
                None if data.len() - start < TEMPLATE_NAME_LEN + 2 => {
                    let mut ahead = Vec::new();
                    let want = TEMPLATE_NAME_LEN + 2 - (data.len() - start);
                    self.read_now(source, want, &mut ahead);
                    match ahead.iter().position(|&b| b == PLACEHOLDER) {
                        Some(0) if start + 1 == data.len() => {
                            // `%%` split across the read-ahead
                            self.push_front(&ahead[1..]);
                            pos = start + 1;
                            continue;
                        }
                        Some(at) => {
                            let mut name = data[start + 1..].to_vec();
                            name.extend_from_slice(&ahead[..at]);
                            self.push_front(&ahead[at + 1..]);
                            (name, data.len())
                        }
                        None => {
                            self.push_front(&ahead);
                            pos = start + 1;
                            continue;
                        }
                    }
                }
                None => {
                    pos = start + 1;
                    continue;
                }
            };

            let name = &name[..name.len().min(TEMPLATE_NAME_LEN)];
            let value = (self.processor)(&String::from_utf8_lossy(name));
            let shrunk = value.len() < end - start;
            data.splice(start..end, value.bytes());

            if data.len() > capacity {
                let overflow = data.split_off(capacity);
                self.push_front(&overflow);
            } else if shrunk {
                let want = capacity - data.len();
                self.read_now(source, want, &mut data);
            }
            pos = (start + value.len()).min(data.len());
        }

        buf[..data.len()].copy_from_slice(&data);
        Poll::Ready(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::BytesSource;

    fn processor() -> TemplateProcessor {
        TemplateProcessor::new(Arc::new(|name: &str| match name {
            "NAME" => "world".to_string(),
            "LONG" => "a much longer replacement".to_string(),
            "EMPTY" => String::new(),
            "PCT" => "%NAME%".to_string(),
            other => format!("<{other}>"),
        }))
    }

    /// Drains the source through the template with a fixed buffer size.
    fn render(input: &str, buf_len: usize) -> String {
        let mut template = processor();
        let mut source = BytesSource::new(input.as_bytes().to_vec());
        let mut out = Vec::new();
        let mut buf = vec![0u8; buf_len];
        loop {
            match template.fill(&mut source, &mut buf) {
                Poll::Ready(0) => break,
                Poll::Ready(n) => out.extend_from_slice(&buf[..n]),
                Poll::Pending => panic!("buffer source never pends"),
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn replaces_placeholders() {
        assert_eq!(render("hello %NAME%!", 64), "hello world!");
    }

    #[test]
    fn double_percent_is_literal() {
        assert_eq!(render("100%% sure", 64), "100% sure");
    }

    #[test]
    fn lone_percent_is_kept() {
        assert_eq!(render("50% off", 64), "50% off");
    }

    #[test]
    fn replacement_is_not_rescanned() {
        assert_eq!(render("[%PCT%]", 64), "[%NAME%]");
    }

    #[test]
    fn same_output_for_every_buffer_size() {
        let input = "a %NAME% b %LONG% c %EMPTY% d %% e %x% f %NAME%";
        let expected = "a world b a much longer replacement c  d % e <x> f world";
        for size in 2..80 {
            assert_eq!(render(input, size), expected, "buffer size {size}");
        }
    }

    #[test]
    fn pending_source_without_cache_is_pending() {
        struct Later;
        impl ContentSource for Later {
            fn fill(&mut self, _buf: &mut [u8]) -> Poll<usize> {
                Poll::Pending
            }
        }
        let mut buf = [0u8; 16];
        assert!(processor().fill(&mut Later, &mut buf).is_pending());
    }
}
