#![warn(missing_docs)]
//! Library for detecting and parsing Nintendo ROM, disc and save-file images.
//!
//! The centerpiece is the GameCube/Wii file system table (FST) parser and the
//! partition reader layered on top of it. Alongside it sits a family of
//! header classifiers that recognize a format from the first bytes of a file.
//!
//! Currently recognized formats:
//! - GameCube / Wii disc images (GCM/ISO)
//! - GameCube opening banners (BNR1 / BNR2)
//! - Wii U disc images (WUD / WUX)
//! - Game Boy / Game Boy Color ROMs
//! - Virtual Boy ROMs
//! - amiibo NTAG215 dumps
//!
//! # Examples
//!
//! Opening a GameCube disc image and reading a file:
//!
//! ```no_run
//! use std::io::Read;
//!
//! use romdata::{
//!     disc::gcn::{GcnPartition, PartitionOptions},
//!     read::RawDiscReader,
//! };
//!
//! let reader = RawDiscReader::open("path/to/game.iso").expect("Failed to open disc");
//! let mut partition = GcnPartition::new(reader, 0, &PartitionOptions::default());
//!
//! // List the root directory.
//! for entry in partition.opendir("/").expect("Failed to open root directory") {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! // Read a file by path.
//! let mut s = String::new();
//! partition
//!     .open("/opening.bnr")
//!     .expect("Failed to open file")
//!     .read_to_string(&mut s)
//!     .ok();
//! ```
//!
//! Probing a header buffer:
//!
//! ```
//! use romdata::rom::{detect, DetectInfo};
//!
//! let header = [0u8; 0x200];
//! let info = DetectInfo::new(&header, header.len() as u64);
//! assert!(detect(&info).is_none());
//! ```

pub mod common;
pub mod disc;
pub mod read;
pub mod rom;
pub mod util;

/// POSIX error numbers used by [`Error::errno`].
pub mod errno {
    /// No such file or directory.
    pub const ENOENT: i32 = 2;
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Bad file descriptor.
    pub const EBADF: i32 = 9;
    /// Out of memory.
    pub const ENOMEM: i32 = 12;
    /// Not a directory.
    pub const ENOTDIR: i32 = 20;
    /// Is a directory.
    pub const EISDIR: i32 = 21;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
}

/// Error types for romdata.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Structural corruption in a recognized format.
    #[error("disc format error: {0}")]
    DiscFormat(String),
    /// A general I/O error.
    #[error("{0}")]
    Io(String, #[source] std::io::Error),
    /// A path did not resolve to an entry.
    #[error("not found: {0}")]
    NotFound(String),
    /// A path resolved to a file where a directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// A path resolved to a directory where a file was required.
    #[error("is a directory: {0}")]
    IsADirectory(String),
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An unknown error.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    /// The error as a negative POSIX error code.
    pub fn errno(&self) -> i32 {
        use std::io::ErrorKind;
        let code = match self {
            Error::DiscFormat(_) | Error::Other(_) => errno::EIO,
            Error::NotFound(_) => errno::ENOENT,
            Error::NotADirectory(_) => errno::ENOTDIR,
            Error::IsADirectory(_) => errno::EISDIR,
            Error::InvalidArgument(_) => errno::EINVAL,
            Error::Io(_, e) => match e.raw_os_error() {
                Some(code) if code > 0 => code,
                _ => match e.kind() {
                    ErrorKind::NotFound => errno::ENOENT,
                    ErrorKind::InvalidInput => errno::EINVAL,
                    ErrorKind::OutOfMemory => errno::ENOMEM,
                    _ => errno::EIO,
                },
            },
        };
        -code
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(s: &str) -> Error { Error::Other(s.to_string()) }
}

impl From<String> for Error {
    #[inline]
    fn from(s: String) -> Error { Error::Other(s) }
}

impl From<zerocopy::AllocError> for Error {
    #[inline]
    fn from(_: zerocopy::AllocError) -> Error {
        Error::Io(
            "allocation failed".to_string(),
            std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        )
    }
}

/// Helper result type for [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Helper trait for adding context to errors.
pub trait ErrorContext {
    /// Adds context to an error.
    fn context(self, context: impl Into<String>) -> Error;
}

impl ErrorContext for std::io::Error {
    #[inline]
    fn context(self, context: impl Into<String>) -> Error { Error::Io(context.into(), self) }
}

/// Helper trait for adding context to result errors.
pub trait ResultContext<T> {
    /// Adds context to a result error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Adds context to a result error using a closure.
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String;
}

impl<T, E> ResultContext<T> for Result<T, E>
where E: ErrorContext
{
    #[inline]
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    #[inline]
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::DiscFormat("bad".into()).errno(), -errno::EIO);
        assert_eq!(Error::NotFound("/x".into()).errno(), -errno::ENOENT);
        assert_eq!(Error::NotADirectory("/x".into()).errno(), -errno::ENOTDIR);
        assert_eq!(Error::IsADirectory("/x".into()).errno(), -errno::EISDIR);
        assert_eq!(Error::InvalidArgument("x".into()).errno(), -errno::EINVAL);
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof).context("Reading");
        assert_eq!(eof.errno(), -errno::EIO);
        let oom = io::Error::from(io::ErrorKind::OutOfMemory).context("Allocating");
        assert_eq!(oom.errno(), -errno::ENOMEM);
        let os = io::Error::from_raw_os_error(errno::EBADF).context("Closed");
        assert_eq!(os.errno(), -errno::EBADF);
    }

    #[test]
    fn test_context_message() {
        let res: io::Result<()> = Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        let err = res.with_context(|| format!("Reading at {:#X}", 0x420)).unwrap_err();
        assert_eq!(err.to_string(), "Reading at 0x420");
    }
}
