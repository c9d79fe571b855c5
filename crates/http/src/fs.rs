//! Storage seen by file responses and the static handler.

use std::io;

/// An open file.
pub trait File: Send {
    /// Path the file was opened with.
    fn name(&self) -> &str;

    fn size(&self) -> usize;

    /// Bytes left between the cursor and the end.
    fn available(&self) -> usize;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, position: usize) -> io::Result<()>;

    fn is_directory(&self) -> bool {
        false
    }

    /// Last modification, in seconds since the epoch.
    fn last_write(&self) -> Option<u64> {
        None
    }
}

/// A mounted filesystem.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &str) -> bool;

    /// Opens `path` for reading, `None` when it does not exist.
    fn open(&self, path: &str) -> Option<Box<dyn File>>;
}

/// A readable byte stream of known current availability, such as a serial port.
pub trait ByteStream: Send {
    fn available(&self) -> usize;

    fn read(&mut self, buf: &mut [u8]) -> usize;
}
