use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use micro_async_http::fs::{File, FileSystem};
use micro_async_http::response::{Response, TemplateFn};
use tracing::debug;

use crate::handler::{Handler, HandlerBuilder, HandlerOptions};
use crate::Request;

const GZ: &str = ".gz";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// The file found by `can_handle`, carried on the request until it is served.
struct FoundFile {
    file: Box<dyn File>,
    path: String,
}

/// Serves files below `path` of a [`FileSystem`] for GET requests below `uri`.
///
/// A request for a directory, or for the root of a handler marked as directory, is
/// answered with the default file (`index.htm`). For every candidate the precompressed
/// `.gz` sibling is considered too, after the plain file unless
/// [`with_try_gzip_first`](Self::with_try_gzip_first) is set.
///
/// ```
/// use std::sync::Arc;
/// use micro_async_web::fs::StdFileSystem;
/// use micro_async_web::handler::StaticHandler;
///
/// let handler = StaticHandler::new("/", Arc::new(StdFileSystem::new("./www")), "/")
///     .with_default_file("index.html")
///     .with_cache_control("max-age=600");
/// ```
#[derive(Clone)]
pub struct StaticHandler {
    fs: Arc<dyn FileSystem>,
    uri: String,
    path: String,
    default_file: String,
    cache_control: String,
    last_modified: String,
    is_dir: bool,
    try_gzip_first: bool,
    template: Option<TemplateFn>,
    options: HandlerOptions,
}

impl StaticHandler {
    pub fn new(uri: &str, fs: Arc<dyn FileSystem>, path: &str) -> Self {
        let mut uri = if uri.starts_with('/') { uri.to_string() } else { format!("/{uri}") };
        let mut path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };

        // a trailing slash hints at a directory; the root becomes ""
        let is_dir = path.ends_with('/');
        if uri.ends_with('/') {
            uri.pop();
        }
        if path.ends_with('/') {
            path.pop();
        }

        Self {
            fs,
            uri,
            path,
            default_file: "index.htm".to_string(),
            cache_control: String::new(),
            last_modified: String::new(),
            is_dir,
            try_gzip_first: true,
            template: None,
            options: HandlerOptions::default(),
        }
    }

    pub fn with_try_gzip_first(mut self, value: bool) -> Self {
        self.try_gzip_first = value;
        self
    }

    pub fn with_is_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = is_dir;
        self
    }

    /// An empty name disables the default file.
    pub fn with_default_file(mut self, filename: &str) -> Self {
        self.default_file = filename.to_string();
        self
    }

    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = cache_control.to_string();
        self
    }

    /// A preformatted HTTP date.
    pub fn with_last_modified(mut self, last_modified: &str) -> Self {
        self.last_modified = last_modified.to_string();
        self
    }

    pub fn with_last_modified_time(mut self, time: SystemTime) -> Self {
        self.last_modified = DateTime::<Utc>::from(time).format(HTTP_DATE).to_string();
        self
    }

    pub fn with_template<F>(mut self, processor: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.template = Some(Arc::new(processor));
        self
    }

    fn find_file(&self, url: &str) -> Option<FoundFile> {
        let rest = &url[self.uri.len()..];
        let skip_file_check = (self.is_dir && rest.is_empty()) || rest.ends_with('/');
        let mut path = format!("{}{rest}", self.path);

        if !skip_file_check && let Some(found) = self.search_file(&path) {
            return Some(found);
        }
        if self.default_file.is_empty() {
            return None;
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(&self.default_file);
        self.search_file(&path)
    }

    fn search_file(&self, path: &str) -> Option<FoundFile> {
        let gzip = format!("{path}{GZ}");
        let candidates = if self.try_gzip_first { [gzip.as_str(), path] } else { [path, gzip.as_str()] };
        let file = candidates.into_iter().find_map(|candidate| self.open_regular(candidate))?;
        Some(FoundFile { file, path: path.to_string() })
    }

    fn open_regular(&self, path: &str) -> Option<Box<dyn File>> {
        if !self.fs.exists(path) {
            return None;
        }
        self.fs.open(path).filter(|file| !file.is_directory())
    }
}

impl fmt::Debug for StaticHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHandler")
            .field("uri", &self.uri)
            .field("path", &self.path)
            .field("default_file", &self.default_file)
            .field("is_dir", &self.is_dir)
            .field("try_gzip_first", &self.try_gzip_first)
            .finish_non_exhaustive()
    }
}

impl HandlerBuilder for StaticHandler {
    fn options_mut(&mut self) -> &mut HandlerOptions {
        &mut self.options
    }
}

impl Handler for StaticHandler {
    fn options(&self) -> &HandlerOptions {
        &self.options
    }

    fn can_handle(&self, request: &mut Request) -> bool {
        if !request.is_http() || *request.method() != http::Method::GET || !request.url().starts_with(&self.uri) {
            return false;
        }
        match self.find_file(request.url()) {
            Some(found) => {
                request.set_temp_object(found);
                true
            }
            None => false,
        }
    }

    fn handle_request(&self, request: &mut Request) {
        let Some(FoundFile { file, path }) = request.take_temp_object::<FoundFile>() else {
            request.send_code(404);
            return;
        };

        let size = file.size() as u64;
        let (etag, last_modified) = match file.last_write() {
            Some(written) => {
                let formatted = i64::try_from(written)
                    .ok()
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                    .map(|time| time.format(HTTP_DATE).to_string());
                ((written ^ size).to_string(), formatted.unwrap_or_else(|| self.last_modified.clone()))
            }
            None => (size.to_string(), self.last_modified.clone()),
        };

        let not_modified = match request.header("If-None-Match") {
            Some(header) => header.value() == etag,
            None => !last_modified.is_empty() && request.header("If-Modified-Since").is_some_and(|h| h.value() == last_modified),
        };

        let mut response = if not_modified {
            debug!(path = %path, "not modified");
            Response::new(304)
        } else {
            Response::from_file(file, &path, "", false, self.template.clone())
        };

        response.add_header("ETag", etag, false);
        if !last_modified.is_empty() {
            response.add_header("Last-Modified", last_modified, false);
        }
        if !self.cache_control.is_empty() {
            response.add_header("Cache-Control", self.cache_control.as_str(), false);
        }
        request.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryFile, request_from};
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Fs {}

        impl FileSystem for Fs {
            fn exists(&self, path: &str) -> bool;
            fn open(&self, path: &str) -> Option<Box<dyn File>>;
        }
    }

    fn serving(files: &[(&str, &str)]) -> Arc<dyn FileSystem> {
        let files: Vec<(String, String)> = files.iter().map(|(name, data)| (name.to_string(), data.to_string())).collect();
        let names: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();

        let mut fs = MockFs::new();
        fs.expect_exists().returning(move |path| names.iter().any(|name| name == path));
        fs.expect_open().returning(move |path| {
            files.iter().find(|(name, _)| name == path).map(|(name, data)| MemoryFile::boxed(name, data.as_bytes()))
        });
        Arc::new(fs)
    }

    #[test]
    fn uri_and_path_are_normalized() {
        let handler = StaticHandler::new("static/", serving(&[]), "www/");
        assert_eq!(handler.uri, "/static");
        assert_eq!(handler.path, "/www");
        assert!(handler.is_dir);

        let root = StaticHandler::new("/", serving(&[]), "/");
        assert_eq!(root.uri, "");
        assert_eq!(root.path, "");
    }

    #[test]
    fn directory_requests_use_the_default_file() {
        let handler = StaticHandler::new("/", serving(&[("/index.htm", "home")]), "/");
        let mut request = request_from("GET / HTTP/1.1\r\n\r\n");
        assert!(handler.can_handle(&mut request));

        handler.handle_request(&mut request);
        let response = request.response().unwrap();
        assert_eq!(response.code(), 200);
        assert_eq!(response.content_type(), "text/html");
        assert_eq!(response.headers().value("ETag"), Some("4"));
    }

    #[test]
    fn gzip_sibling_is_preferred() {
        let mut fs = MockFs::new();
        fs.expect_exists().with(eq("/app.js.gz")).return_const(true);
        fs.expect_open().with(eq("/app.js.gz")).returning(|path| Some(MemoryFile::boxed(path, b"zz")));

        let handler = StaticHandler::new("/", Arc::new(fs), "/");
        let mut request = request_from("GET /app.js HTTP/1.1\r\n\r\n");
        assert!(handler.can_handle(&mut request));

        handler.handle_request(&mut request);
        let response = request.response().unwrap();
        assert_eq!(response.headers().value("Content-Encoding"), Some("gzip"));
        assert_eq!(response.content_type(), "application/javascript");
    }

    #[test]
    fn other_methods_and_missing_files_are_declined() {
        let handler = StaticHandler::new("/", serving(&[("/a.txt", "a")]), "/").with_default_file("");
        assert!(!handler.can_handle(&mut request_from("POST /a.txt HTTP/1.1\r\n\r\n")));
        assert!(!handler.can_handle(&mut request_from("GET /b.txt HTTP/1.1\r\n\r\n")));
        assert!(!handler.can_handle(&mut request_from("GET / HTTP/1.1\r\n\r\n")));
    }

    #[test]
    fn matching_etag_answers_not_modified() {
        let handler = StaticHandler::new("/", serving(&[("/a.txt", "abc")]), "/").with_cache_control("max-age=60");
        let mut request = request_from("GET /a.txt HTTP/1.1\r\nIf-None-Match: 3\r\n\r\n");
        assert!(handler.can_handle(&mut request));

        handler.handle_request(&mut request);
        let response = request.response().unwrap();
        assert_eq!(response.code(), 304);
        assert_eq!(response.headers().value("ETag"), Some("3"));
        assert_eq!(response.headers().value("Cache-Control"), Some("max-age=60"));
    }

    #[test]
    fn last_write_sets_etag_and_last_modified() {
        let mut fs = MockFs::new();
        fs.expect_exists().return_const(true);
        fs.expect_open().returning(|path| Some(Box::new(MemoryFile::new(path, b"12345678").with_last_write(1_700_000_000)) as Box<dyn File>));

        let handler = StaticHandler::new("/", Arc::new(fs), "/").with_try_gzip_first(false);
        let mut request = request_from("GET /data.bin HTTP/1.1\r\n\r\n");
        assert!(handler.can_handle(&mut request));

        handler.handle_request(&mut request);
        let response = request.response().unwrap();
        assert_eq!(response.headers().value("ETag"), Some((1_700_000_000u64 ^ 8).to_string().as_str()));
        assert_eq!(response.headers().value("Last-Modified"), Some("Tue, 14 Nov 2023 22:13:20 GMT"));
    }

    #[test]
    fn if_modified_since_matches_configured_date() {
        let handler = StaticHandler::new("/", serving(&[("/a.txt", "abc")]), "/")
            .with_last_modified("Mon, 01 Jan 2024 00:00:00 GMT");
        let mut request = request_from(indoc::indoc! {"
            GET /a.txt HTTP/1.1\r
            If-Modified-Since: Mon, 01 Jan 2024 00:00:00 GMT\r
            \r
        "});
        assert!(handler.can_handle(&mut request));
        handler.handle_request(&mut request);
        assert_eq!(request.response().unwrap().code(), 304);
    }
}
