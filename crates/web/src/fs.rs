//! A [`FileSystem`] over a directory of the host filesystem.

use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use micro_async_http::fs::{File, FileSystem};
use tracing::debug;

/// Serves files below `root`. Paths are taken relative to it, `..` never escapes it.
#[derive(Debug, Clone)]
pub struct StdFileSystem {
    root: PathBuf,
}

impl StdFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }
}

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some_and(|path| path.exists())
    }

    fn open(&self, path: &str) -> Option<Box<dyn File>> {
        let resolved = self.resolve(path)?;
        match StdFile::open(path, &resolved) {
            Ok(file) => Some(Box::new(file)),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path, cause = %e, "failed to open file");
                }
                None
            }
        }
    }
}

pub struct StdFile {
    name: String,
    /// `None` for directories.
    file: Option<fs::File>,
    size: usize,
    position: usize,
    last_write: Option<u64>,
}

impl StdFile {
    fn open(name: &str, path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let last_write = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs());

        let file = if metadata.is_dir() { None } else { Some(fs::File::open(path)?) };
        let size = if file.is_some() { usize::try_from(metadata.len()).unwrap_or(usize::MAX) } else { 0 };
        Ok(Self { name: name.to_string(), file, size, position: 0, last_write })
    }
}

impl File for StdFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.size
    }

    fn available(&self) -> usize {
        self.size.saturating_sub(self.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::IsADirectory, "cannot read a directory"));
        };
        let read = file.read(buf)?;
        self.position += read;
        Ok(read)
    }

    fn seek(&mut self, position: usize) -> io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::IsADirectory, "cannot seek a directory"));
        };
        file.seek(SeekFrom::Start(position as u64))?;
        self.position = position;
        Ok(())
    }

    fn is_directory(&self) -> bool {
        self.file.is_none()
    }

    fn last_write(&self) -> Option<u64> {
        self.last_write
    }
}

impl fmt::Debug for StdFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("position", &self.position)
            .field("directory", &self.file.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("micro-async-web-{name}-{}", std::process::id()));
        fs::create_dir_all(dir.join("www")).unwrap();
        fs::write(dir.join("www/index.htm"), b"<h1>hello</h1>").unwrap();
        dir
    }

    #[test]
    fn reads_and_seeks_files_below_root() {
        let dir = scratch_dir("read");
        let fs = StdFileSystem::new(&dir);

        assert!(fs.exists("/www/index.htm"));
        assert!(!fs.exists("/www/missing.htm"));

        let mut file = fs.open("/www/index.htm").unwrap();
        assert_eq!(file.name(), "/www/index.htm");
        assert_eq!(file.size(), 14);
        assert!(!file.is_directory());
        assert!(file.last_write().is_some());

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"<h1>");
        assert_eq!(file.available(), 10);

        file.seek(9).unwrap();
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"/h1>");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn directories_open_but_do_not_read() {
        let dir = scratch_dir("dir");
        let fs = StdFileSystem::new(&dir);

        let mut file = fs.open("/www").unwrap();
        assert!(file.is_directory());
        assert_eq!(file.size(), 0);
        assert!(file.read(&mut [0u8; 4]).is_err());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn parent_components_never_escape_root() {
        let dir = scratch_dir("escape");
        let fs = StdFileSystem::new(dir.join("www"));

        assert!(fs.open("/../www/index.htm").is_none());
        assert!(!fs.exists("../www/index.htm"));
        assert!(fs.open("/./index.htm").is_some());

        fs::remove_dir_all(dir).unwrap();
    }
}
