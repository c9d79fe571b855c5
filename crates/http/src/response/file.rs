//! Responses served from a [`FileSystem`].

use tracing::debug;

use crate::fs::{File, FileSystem};
use crate::response::{FileSource, Response, TemplateFn};

const GZ: &str = ".gz";

/// Content type guessed from the extension, `text/plain` when unknown.
pub fn content_type_for_path(path: &str) -> &'static str {
    let Some(dot) = path.rfind('.') else {
        return "text/plain";
    };
    match &path[dot..] {
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".js" => "application/javascript",
        ".json" => "application/json",
        ".png" => "image/png",
        ".ico" => "image/x-icon",
        ".svg" => "image/svg+xml",
        ".jpg" => "image/jpeg",
        ".gif" => "image/gif",
        ".woff2" => "font/woff2",
        ".woff" => "font/woff",
        ".ttf" => "font/ttf",
        ".eot" => "application/vnd.ms-fontobject",
        ".xml" => "text/xml",
        ".pdf" => "application/pdf",
        ".zip" => "application/zip",
        ".gz" => "application/x-gzip",
        _ => "text/plain",
    }
}

/// ETag of a gzip file: the CRC32 from its trailer as eight uppercase hex digits, in
/// file byte order.
///
/// Leaves the cursor at the start of the file. `None` when the file is too short.
pub fn gzip_etag(file: &mut dyn File) -> Option<String> {
    let size = file.size();
    if size < 8 || file.seek(size - 8).is_err() {
        return None;
    }
    let mut crc = [0u8; 4];
    let read = file.read(&mut crc).ok()?;
    file.seek(0).ok()?;
    (read == 4).then(|| crc.iter().map(|byte| format!("{byte:02X}")).collect())
}

fn file_name(path: &str) -> &str {
    path.rfind('/').map_or(path, |slash| &path[slash + 1..])
}

impl Response {
    /// Serves `path`, falling back to a pre-compressed `path.gz`.
    ///
    /// The compressed variant is sent with `Content-Encoding: gzip`, its trailer ETag
    /// and without template processing. A missing file yields a 404 whose source is
    /// invalid. An empty `content_type` is derived from the path.
    pub fn file(
        fs: &dyn FileSystem,
        path: &str,
        content_type: &str,
        download: bool,
        template: Option<TemplateFn>,
    ) -> Self {
        if let Some(file) = fs.open(path) {
            return Self::from_file(file, path, content_type, download, template);
        }

        let gz_path = format!("{path}{GZ}");
        let Some(mut file) = fs.open(&gz_path) else {
            debug!(path, "file not found");
            return Self::from_source(404, "", None, Box::new(FileSource::missing()));
        };
        let Some(etag) = gzip_etag(file.as_mut()) else {
            debug!(path = %gz_path, "gzip file has no trailer");
            return Self::from_source(404, "", None, Box::new(FileSource::missing()));
        };

        let mut response = Self::from_file(file, path, content_type, download, None);
        response.add_header("Content-Encoding", "gzip", false);
        response.add_header("ETag", etag, true);
        response.add_header("Cache-Control", "no-cache", true);
        response
    }

    /// Serves an already opened file under the name `path`.
    pub fn from_file(
        file: Box<dyn File>,
        path: &str,
        content_type: &str,
        download: bool,
        template: Option<TemplateFn>,
    ) -> Self {
        let gzipped = !download && file.name().ends_with(GZ) && !path.ends_with(GZ);
        let content_type = if content_type.is_empty() { content_type_for_path(path) } else { content_type };
        let length = file.size();

        let mut response = Self::from_source(200, content_type, Some(length), Box::new(FileSource::new(file)));
        if gzipped {
            response.add_header("Content-Encoding", "gzip", false);
        } else if let Some(template) = template {
            response = response.with_template(template);
        }

        let disposition =
            if download { format!("attachment; filename=\"{}\"", file_name(path)) } else { "inline".to_string() };
        response.add_header("Content-Disposition", disposition, false);
        response
    }
}
