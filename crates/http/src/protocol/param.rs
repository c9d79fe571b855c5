/// Where a request parameter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Query string of the request url.
    Query,
    /// Url-encoded body field or non-file multipart field.
    Post,
    /// Multipart file part; the value is the file name.
    File,
}

/// A request parameter. Names are not unique within a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: String,
    value: String,
    size: usize,
    kind: ParamKind,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>, kind: ParamKind, size: usize) -> Self {
        Self { name: name.into(), value: value.into(), size, kind }
    }

    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value, ParamKind::Query, 0)
    }

    pub fn post(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, value, ParamKind::Post, 0)
    }

    pub fn file(name: impl Into<String>, filename: impl Into<String>, size: usize) -> Self {
        Self::new(name, filename, ParamKind::File, size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Uploaded byte count for file parameters, `0` otherwise.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// File parameters count as posted too.
    pub fn is_post(&self) -> bool {
        self.kind != ParamKind::Query
    }

    pub fn is_file(&self) -> bool {
        self.kind == ParamKind::File
    }
}
