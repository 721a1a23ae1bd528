//! GameCube opening banners (`opening.bnr`).

use std::{borrow::Cow, mem::size_of};

use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    Error, Result,
    common::{GcnRegion, MagicBytes},
    read::DiscReader,
    rom::{DetectInfo, RomFormat, read_all_up_to},
    util::{
        static_assert,
        text::{cp1252_sjis_to_utf8, cp1252_to_utf8, sjis_to_utf8, until_nul},
    },
};

/// Magic bytes for single-language banners (NTSC).
pub const BNR_MAGIC_BNR1: MagicBytes = *b"BNR1";

/// Magic bytes for multi-language banners (PAL).
pub const BNR_MAGIC_BNR2: MagicBytes = *b"BNR2";

/// Banner image width, in pixels.
pub const BANNER_IMAGE_W: usize = 96;

/// Banner image height, in pixels.
pub const BANNER_IMAGE_H: usize = 32;

/// Size of a BNR1 file.
pub const BNR1_SIZE: usize = size_of::<BnrHeader>() + size_of::<BnrComment>();

/// Size of a BNR2 file.
pub const BNR2_SIZE: usize =
    size_of::<BnrHeader>() + size_of::<BnrComment>() * BNR2_LANGUAGES.len();

/// Comment languages in a BNR2 file, in storage order.
pub const BNR2_LANGUAGES: [&str; 6] =
    ["English", "German", "French", "Spanish", "Italian", "Dutch"];

/// Banner sub-variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BannerKind {
    /// One comment block.
    Bnr1 = 0,
    /// Six comment blocks, one per European language.
    Bnr2 = 1,
}

impl BannerKind {
    /// Number of comment blocks.
    #[inline]
    pub fn comment_count(self) -> usize {
        match self {
            BannerKind::Bnr1 => 1,
            BannerKind::Bnr2 => BNR2_LANGUAGES.len(),
        }
    }

    /// Total file size.
    #[inline]
    pub fn file_size(self) -> usize {
        match self {
            BannerKind::Bnr1 => BNR1_SIZE,
            BannerKind::Bnr2 => BNR2_SIZE,
        }
    }
}

impl From<BannerKind> for i32 {
    #[inline]
    fn from(value: BannerKind) -> Self { value as i32 }
}

/// Banner header, followed by one or six [`BnrComment`]s.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BnrHeader {
    /// `BNR1` or `BNR2`
    pub magic: MagicBytes,
    _reserved: [u8; 0x1C],
    /// RGB5A3 image data, stored as 4x4 tiles.
    pub image: [u8; BANNER_IMAGE_W * BANNER_IMAGE_H * 2],
}

static_assert!(size_of::<BnrHeader>() == 0x1820);

/// Raw banner comment block.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BnrComment {
    /// Short game name
    pub game_name: [u8; 0x20],
    /// Short company name
    pub company: [u8; 0x20],
    /// Full game name
    pub game_name_full: [u8; 0x40],
    /// Full company name
    pub company_full: [u8; 0x40],
    /// Game description
    pub description: [u8; 0x80],
}

static_assert!(size_of::<BnrComment>() == 0x140);

/// A decoded banner comment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BannerComment {
    /// Short game name
    pub game_name: String,
    /// Short company name
    pub company: String,
    /// Full game name
    pub game_name_full: String,
    /// Full company name
    pub company_full: String,
    /// Game description
    pub description: String,
}

/// A parsed `opening.bnr` file.
pub struct GameCubeBnr {
    header: Box<BnrHeader>,
    comments: Box<[BnrComment]>,
    kind: BannerKind,
    region: Option<GcnRegion>,
}

impl RomFormat for GameCubeBnr {
    type Kind = BannerKind;

    const NAME: &'static str = "Nintendo GameCube Banner";

    fn detect(info: &DetectInfo) -> Option<BannerKind> {
        let magic = info.bytes_at(0, 4)?;
        let kind = match magic {
            m if m == BNR_MAGIC_BNR1 => BannerKind::Bnr1,
            m if m == BNR_MAGIC_BNR2 => BannerKind::Bnr2,
            _ => return None,
        };
        (info.file_size >= kind.file_size() as u64).then_some(kind)
    }
}

impl GameCubeBnr {
    /// Reads a banner. Text encoding is guessed per string.
    #[inline]
    pub fn new<R>(reader: R) -> Result<Self>
    where R: DiscReader {
        Self::with_region(reader, None)
    }

    /// Reads a banner belonging to a disc of the given region.
    ///
    /// BNR1 text is Shift-JIS for Japanese discs and Windows-1252 otherwise. BNR2
    /// text is always Windows-1252.
    pub fn with_region<R>(mut reader: R, region: Option<GcnRegion>) -> Result<Self>
    where R: DiscReader {
        let data = read_all_up_to(&mut reader, BNR2_SIZE)?;
        let info = DetectInfo::new(&data, reader.size());
        let Some(kind) = Self::detect(&info) else {
            return Err(Error::DiscFormat("Not a GameCube banner".to_string()));
        };
        let truncated = || {
            Error::DiscFormat(format!(
                "Banner truncated: {:#X} < {:#X} bytes",
                data.len(),
                kind.file_size()
            ))
        };
        let (header, rest) = BnrHeader::read_from_prefix(&data).map_err(|_| truncated())?;
        let (comments, _) = <[BnrComment]>::ref_from_prefix_with_elems(rest, kind.comment_count())
            .map_err(|_| truncated())?;
        debug!("Read {:?} banner", kind);
        Ok(Self { header: Box::new(header), comments: Box::from(comments), kind, region })
    }

    /// Banner sub-variant.
    #[inline]
    pub fn kind(&self) -> BannerKind { self.kind }

    /// The banner header.
    #[inline]
    pub fn header(&self) -> &BnrHeader { &self.header }

    /// Raw RGB5A3 banner image, [`BANNER_IMAGE_W`]x[`BANNER_IMAGE_H`].
    #[inline]
    pub fn image(&self) -> &[u8] { &self.header().image }

    /// Number of comment blocks.
    #[inline]
    pub fn comment_count(&self) -> usize { self.comments.len() }

    /// Language of a comment block, for BNR2 banners.
    #[inline]
    pub fn comment_language(&self, idx: usize) -> Option<&'static str> {
        match self.kind {
            BannerKind::Bnr1 => None,
            BannerKind::Bnr2 => BNR2_LANGUAGES.get(idx).copied(),
        }
    }

    /// Raw comment block.
    #[inline]
    pub fn raw_comment(&self, idx: usize) -> Option<&BnrComment> { self.comments.get(idx) }

    /// Decoded comment block.
    pub fn comment(&self, idx: usize) -> Option<BannerComment> {
        let raw = self.raw_comment(idx)?;
        Some(BannerComment {
            game_name: self.decode(&raw.game_name),
            company: self.decode(&raw.company),
            game_name_full: self.decode(&raw.game_name_full),
            company_full: self.decode(&raw.company_full),
            description: self.decode(&raw.description),
        })
    }

    fn decode(&self, field: &[u8]) -> String {
        let bytes = until_nul(field);
        let s: Cow<str> = match (self.kind, self.region) {
            (BannerKind::Bnr2, _) => cp1252_to_utf8(bytes),
            (BannerKind::Bnr1, Some(region)) if region.uses_sjis() => sjis_to_utf8(bytes),
            (BannerKind::Bnr1, Some(_)) => cp1252_to_utf8(bytes),
            (BannerKind::Bnr1, None) => cp1252_sjis_to_utf8(bytes),
        };
        s.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn build_banner(kind: BannerKind) -> Vec<u8> {
        let mut data = vec![0u8; kind.file_size()];
        let magic = match kind {
            BannerKind::Bnr1 => BNR_MAGIC_BNR1,
            BannerKind::Bnr2 => BNR_MAGIC_BNR2,
        };
        data[..4].copy_from_slice(&magic);
        data[0x20] = 0x80;
        for idx in 0..kind.comment_count() {
            let base = 0x1820 + idx * 0x140;
            let name = format!("Game {idx}");
            data[base..base + name.len()].copy_from_slice(name.as_bytes());
            data[base + 0x20..base + 0x28].copy_from_slice(b"Nintendo");
            data[base + 0xC0..base + 0xC4].copy_from_slice(b"Desc");
        }
        data
    }

    #[test]
    fn test_sizes() {
        assert_eq!(BNR1_SIZE, 0x1960);
        assert_eq!(BNR2_SIZE, 0x1FA0);
    }

    #[test]
    fn test_detect() {
        let data = build_banner(BannerKind::Bnr1);
        assert_eq!(GameCubeBnr::is_rom_supported(&DetectInfo::new(&data, BNR1_SIZE as u64)), 0);
        // File too small for the claimed variant.
        assert_eq!(GameCubeBnr::is_rom_supported(&DetectInfo::new(&data, 0x100)), -1);
        assert_eq!(GameCubeBnr::is_rom_supported(&DetectInfo::new(&data[..3], 3)), -1);
        let mut bnr2 = data.clone();
        bnr2[3] = b'2';
        assert_eq!(GameCubeBnr::is_rom_supported(&DetectInfo::new(&bnr2, BNR1_SIZE as u64)), -1);
        assert_eq!(GameCubeBnr::is_rom_supported(&DetectInfo::new(&bnr2, BNR2_SIZE as u64)), 1);
    }

    #[test]
    fn test_bnr1() {
        let banner = GameCubeBnr::new(Cursor::new(build_banner(BannerKind::Bnr1))).unwrap();
        assert_eq!(banner.kind(), BannerKind::Bnr1);
        assert_eq!(banner.comment_count(), 1);
        assert_eq!(banner.image().len(), BANNER_IMAGE_W * BANNER_IMAGE_H * 2);
        assert_eq!(banner.image()[0], 0x80);
        let comment = banner.comment(0).unwrap();
        assert_eq!(comment.game_name, "Game 0");
        assert_eq!(comment.company, "Nintendo");
        assert_eq!(comment.description, "Desc");
        assert!(banner.comment(1).is_none());
        assert_eq!(banner.comment_language(0), None);
    }

    #[test]
    fn test_bnr2() {
        let banner = GameCubeBnr::new(Cursor::new(build_banner(BannerKind::Bnr2))).unwrap();
        assert_eq!(banner.comment_count(), 6);
        assert_eq!(banner.comment(5).unwrap().game_name, "Game 5");
        assert_eq!(banner.comment_language(1), Some("German"));
        assert!(banner.comment(6).is_none());
    }

    #[test]
    fn test_region_encoding() {
        let mut data = build_banner(BannerKind::Bnr1);
        // "ゼルダ" in Shift-JIS, which is "ƒ[ƒ‹ƒ_" in Windows-1252.
        data[0x1820..0x1826].copy_from_slice(&[0x83, 0x5B, 0x83, 0x8B, 0x83, 0x5F]);
        let jpn =
            GameCubeBnr::with_region(Cursor::new(data.clone()), Some(GcnRegion::Jpn)).unwrap();
        assert_eq!(jpn.comment(0).unwrap().game_name, "ゼルダ");
        let usa = GameCubeBnr::with_region(Cursor::new(data), Some(GcnRegion::Usa)).unwrap();
        assert_eq!(usa.comment(0).unwrap().game_name, "ƒ[ƒ‹ƒ_");
    }

    #[test]
    fn test_truncated() {
        let mut data = build_banner(BannerKind::Bnr2);
        data.truncate(BNR1_SIZE);
        assert!(matches!(GameCubeBnr::new(Cursor::new(data)), Err(Error::DiscFormat(_))));
    }
}
