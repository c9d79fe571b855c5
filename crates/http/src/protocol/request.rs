//! The parsed request line and headers of one request.

use http::Method;

use crate::protocol::{Header, Headers, Param};

/// Scheme of the `Authorization` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    None,
    Basic,
    Digest,
    Bearer,
    Other,
}

/// What the client asked this connection to become.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionKind {
    #[default]
    Http,
    /// `Upgrade: websocket`
    WebSocket,
    /// `Accept: text/event-stream`
    EventStream,
}

/// Request line, recognized headers and query parameters.
///
/// Built by [`RequestDecoder`](crate::codec::RequestDecoder) line by line; every header is
/// kept in [`headers`](Self::headers), the recognized ones also update dedicated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: u8,
    pub(crate) host: String,
    pub(crate) content_type: String,
    pub(crate) boundary: String,
    pub(crate) multipart: bool,
    pub(crate) content_length: usize,
    pub(crate) expect_continue: bool,
    pub(crate) auth_scheme: AuthScheme,
    pub(crate) authorization: String,
    pub(crate) connection_kind: ConnectionKind,
    pub(crate) headers: Headers,
    pub(crate) query: Vec<Param>,
}

impl Default for RequestHead {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: String::new(),
            version: 0,
            host: String::new(),
            content_type: String::new(),
            boundary: String::new(),
            multipart: false,
            content_length: 0,
            expect_continue: false,
            auth_scheme: AuthScheme::None,
            authorization: String::new(),
            connection_kind: ConnectionKind::Http,
            headers: Headers::new(),
            query: Vec::new(),
        }
    }
}

impl RequestHead {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// `0` for HTTP/1.0, `1` otherwise.
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Content type without its parameters.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn expect_continue(&self) -> bool {
        self.expect_continue
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth_scheme
    }

    /// Credentials following the scheme, or the whole header value for unknown layouts.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.connection_kind
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn query(&self) -> &[Param] {
        &self.query
    }

    /// Moves the query parameters out, leaving the list empty.
    pub fn take_query(&mut self) -> Vec<Param> {
        std::mem::take(&mut self.query)
    }

    /// Records one header, updating the dedicated field when the name is recognized.
    pub(crate) fn apply_header(&mut self, header: Header) {
        let name = header.name();
        let value = header.value();

        if name.eq_ignore_ascii_case("Host") {
            self.host = value.to_string();
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = value.split(';').next().unwrap_or_default().to_string();
            if value.starts_with("multipart/") {
                let boundary = value.split_once('=').map_or(value, |(_, boundary)| boundary);
                self.boundary = boundary.replace('"', "");
                self.multipart = true;
            }
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = parse_leading_usize(value);
        } else if name.eq_ignore_ascii_case("Expect") && value.eq_ignore_ascii_case("100-continue") {
            self.expect_continue = true;
        } else if name.eq_ignore_ascii_case("Authorization") {
            match value.split_once(' ') {
                None => {
                    self.authorization = value.to_string();
                    self.auth_scheme = AuthScheme::Other;
                }
                Some((scheme, credentials)) => {
                    self.auth_scheme = if scheme.eq_ignore_ascii_case("Basic") {
                        AuthScheme::Basic
                    } else if scheme.eq_ignore_ascii_case("Digest") {
                        AuthScheme::Digest
                    } else if scheme.eq_ignore_ascii_case("Bearer") {
                        AuthScheme::Bearer
                    } else {
                        AuthScheme::Other
                    };
                    self.authorization = credentials.to_string();
                }
            }
        } else if name.eq_ignore_ascii_case("Upgrade") && value.eq_ignore_ascii_case("websocket") {
            self.connection_kind = ConnectionKind::WebSocket;
        } else if name.eq_ignore_ascii_case("Accept") && value.to_ascii_lowercase().contains("text/event-stream") {
            self.connection_kind = ConnectionKind::EventStream;
        }

        self.headers.push(header);
    }
}

/// `atoi` style: optional leading whitespace, digits until the first non digit, `0` if none.
pub(crate) fn parse_leading_usize(value: &str) -> usize {
    value
        .trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0usize, |acc, digit| acc.saturating_mul(10).saturating_add(usize::from(digit - b'0')))
}
