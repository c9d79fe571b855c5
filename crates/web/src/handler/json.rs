use std::fmt;
use std::sync::Arc;

use http::Method;
use micro_async_http::codec::BodyChunk;
use micro_async_http::protocol::MethodSet;
use serde_json::Value;
use tracing::debug;

use crate::handler::{Handler, HandlerBuilder, HandlerOptions};
use crate::Request;

pub const DEFAULT_MAX_JSON_LENGTH: usize = 16384;

type JsonFn = Arc<dyn Fn(&mut Request, Value) + Send + Sync>;

/// Request body collected across chunks.
struct JsonBody(Vec<u8>);

/// Parses `application/json` bodies and hands the document to a callback.
///
/// GET requests reach the callback with [`Value::Null`]. Other methods must carry a
/// JSON content type; an empty or malformed body is answered `400`, a body larger than
/// the limit `413`.
#[derive(Clone)]
pub struct JsonHandler {
    uri: String,
    methods: MethodSet,
    max_content_length: usize,
    on_request: JsonFn,
    options: HandlerOptions,
}

impl JsonHandler {
    pub fn new<F>(uri: &str, on_request: F) -> Self
    where
        F: Fn(&mut Request, Value) + Send + Sync + 'static,
    {
        Self {
            uri: uri.to_string(),
            methods: MethodSet::GET | MethodSet::POST | MethodSet::PUT | MethodSet::PATCH,
            max_content_length: DEFAULT_MAX_JSON_LENGTH,
            on_request: Arc::new(on_request),
            options: HandlerOptions::default(),
        }
    }

    pub fn with_methods(mut self, methods: MethodSet) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }
}

impl fmt::Debug for JsonHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonHandler")
            .field("uri", &self.uri)
            .field("methods", &self.methods)
            .field("max_content_length", &self.max_content_length)
            .finish_non_exhaustive()
    }
}

impl HandlerBuilder for JsonHandler {
    fn options_mut(&mut self) -> &mut HandlerOptions {
        &mut self.options
    }
}

impl Handler for JsonHandler {
    fn options(&self) -> &HandlerOptions {
        &self.options
    }

    fn can_handle(&self, request: &mut Request) -> bool {
        if !request.is_http() || !self.methods.matches(request.method()) {
            return false;
        }
        let url = request.url();
        if !self.uri.is_empty() && url != self.uri && !url.strip_prefix(self.uri.as_str()).is_some_and(|rest| rest.starts_with('/')) {
            return false;
        }
        *request.method() == Method::GET || request.content_type().eq_ignore_ascii_case(mime::APPLICATION_JSON.essence_str())
    }

    fn handle_request(&self, request: &mut Request) {
        if *request.method() == Method::GET {
            (self.on_request)(request, Value::Null);
            return;
        }

        if let Some(JsonBody(body)) = request.take_temp_object::<JsonBody>() {
            match serde_json::from_slice(&body) {
                Ok(json) => {
                    (self.on_request)(request, json);
                    return;
                }
                Err(e) => debug!(url = %request.url(), cause = %e, "invalid json body"),
            }
        }

        let code = if request.content_length() > self.max_content_length { 413 } else { 400 };
        request.send_code(code);
    }

    fn handle_body(&self, request: &mut Request, chunk: &BodyChunk) {
        if chunk.total == 0 || chunk.total >= self.max_content_length {
            return;
        }
        if chunk.index == 0 {
            request.set_temp_object(JsonBody(Vec::with_capacity(chunk.total)));
        }
        if let Some(JsonBody(body)) = request.temp_object_mut::<JsonBody>() {
            body.extend_from_slice(&chunk.data);
        }
    }

    fn is_request_handler_trivial(&self) -> bool {
        false
    }
}
