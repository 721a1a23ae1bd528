//! [`DiscReader`] and associated types.
use std::{
    fs, io,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::{Error, Result, ResultContext, util::WindowedReader};

/// A readable, seekable disc image with a known size.
///
/// Short reads signal end of stream; seeks are absolute within the image.
/// Errors are reported through the returned [`io::Error`].
pub trait DiscReader: Read + Seek {
    /// Total readable size of the image, in bytes.
    fn size(&self) -> u64;
}

impl<T> DiscReader for &mut T
where T: DiscReader + ?Sized
{
    #[inline]
    fn size(&self) -> u64 { (**self).size() }
}

impl<T> DiscReader for Box<T>
where T: DiscReader + ?Sized
{
    #[inline]
    fn size(&self) -> u64 { (**self).size() }
}

impl<T> DiscReader for io::Cursor<T>
where T: AsRef<[u8]>
{
    #[inline]
    fn size(&self) -> u64 { self.get_ref().as_ref().len() as u64 }
}

impl<T> DiscReader for WindowedReader<T>
where T: Read + Seek
{
    #[inline]
    fn size(&self) -> u64 { self.len() }
}

/// A raw (uncompressed, unencrypted) disc image stream.
///
/// The stream length is measured once when the reader is created.
#[derive(Clone)]
pub struct RawDiscReader<S> {
    inner: S,
    disc_size: u64,
}

impl<S> RawDiscReader<S>
where S: Read + Seek
{
    /// Wraps a stream, measuring its length.
    pub fn new(mut inner: S) -> Result<Self> {
        let disc_size = inner.seek(SeekFrom::End(0)).context("Determining stream length")?;
        inner.seek(SeekFrom::Start(0)).context("Seeking to start of stream")?;
        Ok(Self { inner, disc_size })
    }

    /// Consumes the reader, returning the underlying stream.
    #[inline]
    pub fn into_inner(self) -> S { self.inner }
}

impl RawDiscReader<io::BufReader<fs::File>> {
    /// Opens a disc image from a file path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path)
            .map_err(|e| Error::Io(format!("Failed to open {}", path.display()), e))?;
        if !meta.is_file() {
            return Err(Error::InvalidArgument(format!(
                "Input is not a file: {}",
                path.display()
            )));
        }
        let file = fs::File::open(path)
            .map_err(|e| Error::Io(format!("Failed to open {}", path.display()), e))?;
        Self::new(io::BufReader::new(file))
    }
}

impl<S> Read for RawDiscReader<S>
where S: Read + Seek
{
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.inner.read(buf) }
}

impl<S> Seek for RawDiscReader<S>
where S: Read + Seek
{
    #[inline]
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> { self.inner.seek(pos) }

    #[inline]
    fn stream_position(&mut self) -> io::Result<u64> { self.inner.stream_position() }
}

impl<S> DiscReader for RawDiscReader<S>
where S: Read + Seek
{
    #[inline]
    fn size(&self) -> u64 { self.disc_size }
}
