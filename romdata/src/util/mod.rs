//! Utility functions and types.

use std::{
    io,
    io::{Read, Seek, SeekFrom},
};

pub(crate) mod read;
pub mod text;

/// A reader with a fixed window.
///
/// Returned by [`GcnPartition::open`](crate::disc::gcn::GcnPartition::open) as a file handle.
/// Positions are relative to the start of the window, and reads stop at its end.
#[derive(Clone)]
pub struct WindowedReader<T>
where T: Read + Seek
{
    base: T,
    pos: u64,
    begin: u64,
    end: u64,
}

impl<T> WindowedReader<T>
where T: Read + Seek
{
    /// Creates a new windowed stream with offset and size.
    ///
    /// Seeks underlying stream immediately.
    #[inline]
    pub fn new(mut base: T, offset: u64, size: u64) -> io::Result<Self> {
        base.seek(SeekFrom::Start(offset))?;
        Ok(Self { base, pos: offset, begin: offset, end: offset + size })
    }

    /// Returns the length of the window.
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 { self.end - self.begin }

    /// Offset of the window within the underlying stream.
    #[inline]
    pub fn offset(&self) -> u64 { self.begin }
}

impl<T> Read for WindowedReader<T>
where T: Read + Seek
{
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let limit = self.end.saturating_sub(self.pos);
        if limit == 0 || out.is_empty() {
            return Ok(0);
        }
        let len = (out.len() as u64).min(limit) as usize;
        let read = self.base.read(&mut out[..len])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl<T> Seek for WindowedReader<T>
where T: Read + Seek
{
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut pos = match pos {
            SeekFrom::Start(p) => self.begin.saturating_add(p),
            SeekFrom::End(p) => self.end.saturating_add_signed(p),
            SeekFrom::Current(p) => self.pos.saturating_add_signed(p),
        };
        if pos < self.begin {
            pos = self.begin;
        } else if pos > self.end {
            pos = self.end;
        }
        let result = self.base.seek(SeekFrom::Start(pos))?;
        self.pos = result;
        Ok(result - self.begin)
    }

    #[inline]
    fn stream_position(&mut self) -> io::Result<u64> { Ok(self.pos - self.begin) }
}

/// Creates a fixed-size array reference from a slice.
macro_rules! array_ref {
    ($slice:expr, $offset:expr, $size:expr) => {{
        #[inline(always)]
        fn to_array<T>(slice: &[T]) -> &[T; $size] {
            match <&[T; $size]>::try_from(slice) {
                Ok(array) => array,
                Err(_) => unreachable!(),
            }
        }
        to_array(&$slice[$offset..$offset + $size])
    }};
}
pub(crate) use array_ref;

/// Compile-time assertion.
macro_rules! static_assert {
    ($condition:expr) => {
        const _: () = core::assert!($condition);
    };
}
pub(crate) use static_assert;
