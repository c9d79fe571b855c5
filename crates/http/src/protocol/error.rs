use std::io;
use thiserror::Error;

/// Errors that make the inbound byte stream untrustworthy.
///
/// Every variant is terminal for the connection: the request is aborted and no
/// response is sent.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("tls handshake received but tls is not supported")]
    TlsHandshake,

    #[error("header line too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("nul byte in header line")]
    NulByte,

    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: String },

    #[error("invalid http method: {0}")]
    InvalidMethod(String),

    #[error("empty request url")]
    EmptyUrl,

    #[error("invalid multipart body: {reason}")]
    InvalidMultipart { reason: String },

    #[error("invalid websocket frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn invalid_request_line<S: ToString>(str: S) -> Self {
        Self::InvalidRequestLine { reason: str.to_string() }
    }

    pub fn invalid_method<S: ToString>(str: S) -> Self {
        Self::InvalidMethod(str.to_string())
    }

    pub fn invalid_multipart<S: ToString>(str: S) -> Self {
        Self::InvalidMultipart { reason: str.to_string() }
    }

    pub fn invalid_frame<S: ToString>(str: S) -> Self {
        Self::InvalidFrame { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
