use micro_async_http::codec::{DEFAULT_MAX_LINE_SIZE, DEFAULT_UPLOAD_BUFFER_SIZE};
use micro_async_http::protocol::{Header, Headers};

/// Seconds of silence before a connection waiting for its request is closed.
pub const DEFAULT_RX_TIMEOUT: u32 = 3;

/// Settings owned by one [`Server`](crate::Server).
///
/// ```
/// use micro_async_web::ServerConfig;
///
/// let config = ServerConfig::new()
///     .with_rx_timeout(5)
///     .with_default_header("Access-Control-Allow-Origin", "*");
/// assert_eq!(config.rx_timeout(), 5);
/// assert_eq!(config.default_headers().value("access-control-allow-origin"), Some("*"));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    rx_timeout: u32,
    default_headers: Headers,
    max_line_size: usize,
    reject_tls: bool,
    upload_buffer_size: usize,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rx_timeout(mut self, seconds: u32) -> Self {
        self.rx_timeout = seconds;
        self
    }

    /// Adds a header sent with every response that does not set it itself.
    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.add(Header::new(name, value), false);
        self
    }

    /// Longest accepted request or header line; longer lines drop the connection.
    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size;
        self
    }

    pub fn with_reject_tls(mut self, reject: bool) -> Self {
        self.reject_tls = reject;
        self
    }

    /// Size of the chunks multipart file uploads are delivered in.
    pub fn with_upload_buffer_size(mut self, size: usize) -> Self {
        self.upload_buffer_size = size;
        self
    }

    pub fn rx_timeout(&self) -> u32 {
        self.rx_timeout
    }

    pub fn default_headers(&self) -> &Headers {
        &self.default_headers
    }

    pub fn max_line_size(&self) -> usize {
        self.max_line_size
    }

    pub fn reject_tls(&self) -> bool {
        self.reject_tls
    }

    pub fn upload_buffer_size(&self) -> usize {
        self.upload_buffer_size
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rx_timeout: DEFAULT_RX_TIMEOUT,
            default_headers: Headers::new(),
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            reject_tls: true,
            upload_buffer_size: DEFAULT_UPLOAD_BUFFER_SIZE,
        }
    }
}
