//! Format detection for ROM, disc and save-file headers.
//!
//! Every format implements [`RomFormat`]. Its classifier is a pure function over a
//! [`DetectInfo`]: it reads nothing but the supplied buffer, never indexes past its
//! end, and returns the same answer for the same input. [`detect`] probes each
//! format in turn and returns the first match.

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::{Result, ResultContext, read::DiscReader, util::read::read_up_to};

pub mod amiibo;
pub mod dmg;
pub mod gamecube;
pub mod gamecube_bnr;
pub mod virtual_boy;
pub mod wiiu;

pub use amiibo::Amiibo;
pub use dmg::Dmg;
pub use gamecube::GameCube;
pub use gamecube_bnr::GameCubeBnr;
pub use virtual_boy::VirtualBoy;
pub use wiiu::WiiU;

/// A window of file data handed to a classifier.
#[derive(Debug, Clone, Copy)]
pub struct DetectHeader<'a> {
    /// Absolute file offset of the first byte of `data`.
    pub addr: u64,
    /// Header bytes.
    pub data: &'a [u8],
}

/// Input to a format classifier.
#[derive(Debug, Clone, Copy)]
pub struct DetectInfo<'a> {
    /// Header bytes read from the file.
    pub header: DetectHeader<'a>,
    /// File extension, without the leading dot, if known.
    pub ext: Option<&'a str>,
    /// Total file size.
    pub file_size: u64,
}

impl<'a> DetectInfo<'a> {
    /// Creates detection info for a buffer read from the start of a file.
    #[inline]
    pub fn new(data: &'a [u8], file_size: u64) -> Self {
        Self { header: DetectHeader { addr: 0, data }, ext: None, file_size }
    }

    /// Sets the file extension.
    #[inline]
    pub fn with_ext(mut self, ext: &'a str) -> Self {
        self.ext = Some(ext.trim_start_matches('.'));
        self
    }

    /// Returns `len` bytes at absolute file offset `offset`, if the header covers them.
    pub fn bytes_at(&self, offset: u64, len: usize) -> Option<&'a [u8]> {
        let start = usize::try_from(offset.checked_sub(self.header.addr)?).ok()?;
        let end = start.checked_add(len)?;
        self.header.data.get(start..end)
    }

    /// Whether the extension matches `ext`, ignoring ASCII case.
    #[inline]
    pub fn ext_is(&self, ext: &str) -> bool {
        self.ext.is_some_and(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// A format that can be recognized from its header.
pub trait RomFormat {
    /// Sub-variant reported on a match.
    type Kind: Copy + Into<i32>;

    /// Short display name.
    const NAME: &'static str;

    /// Classifies a header, returning the matched sub-variant.
    fn detect(info: &DetectInfo) -> Option<Self::Kind>;

    /// Classifies a header. Returns a non-negative system ID, or -1 if the header
    /// is not recognized.
    #[inline]
    fn is_rom_supported(info: &DetectInfo) -> i32 { Self::detect(info).map_or(-1, Into::into) }
}

/// A recognized format and its sub-variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomKind {
    /// GameCube or Wii disc image.
    GameCube(gamecube::DiscSystem),
    /// GameCube opening banner.
    GameCubeBnr(gamecube_bnr::BannerKind),
    /// Wii U disc image.
    WiiU(wiiu::WiiUFormat),
    /// Game Boy / Game Boy Color ROM.
    Dmg(dmg::DmgSystem),
    /// amiibo NTAG215 dump.
    Amiibo(amiibo::NfpSize),
    /// Virtual Boy ROM.
    VirtualBoy(virtual_boy::VbSystem),
}

impl RomKind {
    /// Display name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            RomKind::GameCube(_) => GameCube::NAME,
            RomKind::GameCubeBnr(_) => GameCubeBnr::NAME,
            RomKind::WiiU(_) => WiiU::NAME,
            RomKind::Dmg(_) => Dmg::NAME,
            RomKind::Amiibo(_) => Amiibo::NAME,
            RomKind::VirtualBoy(_) => VirtualBoy::NAME,
        }
    }
}

/// Probes every known format, returning the first that recognizes the header.
pub fn detect(info: &DetectInfo) -> Option<RomKind> {
    let kind = GameCube::detect(info)
        .map(RomKind::GameCube)
        .or_else(|| GameCubeBnr::detect(info).map(RomKind::GameCubeBnr))
        .or_else(|| WiiU::detect(info).map(RomKind::WiiU))
        .or_else(|| Dmg::detect(info).map(RomKind::Dmg))
        .or_else(|| Amiibo::detect(info).map(RomKind::Amiibo))
        .or_else(|| VirtualBoy::detect(info).map(RomKind::VirtualBoy))?;
    debug!("Detected {} ({:?})", kind.name(), kind);
    Some(kind)
}

/// Reads up to `len` bytes from `offset` for classification.
///
/// The buffer is shorter than `len` if the reader ends first.
pub(crate) fn read_detect_header<R>(reader: &mut R, offset: u64, len: usize) -> Result<Box<[u8]>>
where R: DiscReader + ?Sized {
    let mut buf = vec![0u8; len];
    reader.seek(SeekFrom::Start(offset)).context("Seeking to header")?;
    let read = read_up_to(reader, &mut buf).context("Reading header")?;
    buf.truncate(read);
    Ok(buf.into_boxed_slice())
}

/// Reads the whole stream, up to `max` bytes.
pub(crate) fn read_all_up_to<R>(reader: &mut R, max: usize) -> Result<Vec<u8>>
where R: DiscReader + ?Sized {
    let mut buf = Vec::new();
    reader.seek(SeekFrom::Start(0)).context("Seeking to start")?;
    Read::take(&mut *reader, max as u64).read_to_end(&mut buf).context("Reading file")?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_at() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let header = DetectHeader { addr: 0x100, data: &data };
        let info = DetectInfo { header, ext: None, file_size: 0x200 };
        assert_eq!(info.bytes_at(0x100, 2), Some(&data[..2]));
        assert_eq!(info.bytes_at(0x104, 4), Some(&data[4..]));
        assert_eq!(info.bytes_at(0x104, 5), None);
        assert_eq!(info.bytes_at(0xFF, 1), None);
        assert_eq!(info.bytes_at(u64::MAX, 1), None);
    }

    #[test]
    fn test_ext() {
        let info = DetectInfo::new(&[], 0).with_ext(".VB");
        assert!(info.ext_is("vb"));
        assert!(!info.ext_is("gb"));
        assert!(!DetectInfo::new(&[], 0).ext_is("vb"));
    }

    #[test]
    fn test_empty_and_zero_buffers() {
        assert!(detect(&DetectInfo::new(&[], 0)).is_none());
        let zeros = vec![0u8; 0x10000];
        assert!(detect(&DetectInfo::new(&zeros, zeros.len() as u64)).is_none());
    }

    #[test]
    fn test_text_file_is_not_detected() {
        let text = vec![b'A'; 5000];
        assert!(detect(&DetectInfo::new(&text, text.len() as u64)).is_none());
        let text = vec![b'A'; 0x2000];
        assert!(detect(&DetectInfo::new(&text, text.len() as u64)).is_none());
    }

    #[test]
    fn test_detect_is_pure() {
        let mut data = vec![0u8; 0x200];
        data[0..4].copy_from_slice(b"BNR2");
        let info = DetectInfo::new(&data, gamecube_bnr::BNR2_SIZE as u64);
        let first = detect(&info);
        assert_eq!(first, Some(RomKind::GameCubeBnr(gamecube_bnr::BannerKind::Bnr2)));
        assert_eq!(detect(&info), first);
        assert_eq!(GameCubeBnr::is_rom_supported(&info), 1);
        assert_eq!(GameCubeBnr::is_rom_supported(&info), 1);
    }

    #[test]
    fn test_every_prefix_is_safe() {
        // Shorter prefixes of a valid header are rejected without reading out of bounds.
        let mut data = vec![0u8; 0x150];
        data[0x104..0x134].copy_from_slice(&dmg::NINTENDO_LOGO);
        for len in 0..data.len() {
            let info = DetectInfo::new(&data[..len], 0x8000);
            assert_eq!(Dmg::is_rom_supported(&info), -1);
            assert!(detect(&info).is_none());
        }
        assert!(Dmg::is_rom_supported(&DetectInfo::new(&data, 0x8000)) >= 0);
    }
}
