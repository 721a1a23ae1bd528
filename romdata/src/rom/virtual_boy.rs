//! Virtual Boy ROMs.

use std::{borrow::Cow, mem::size_of};

use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    Error, Result,
    read::DiscReader,
    rom::{DetectHeader, DetectInfo, RomFormat, read_detect_header},
    util::{
        static_assert,
        text::{sjis_to_utf8, trim_padding},
    },
};

/// The footer starts this many bytes before the end of the ROM.
pub const VB_FOOTER_OFFSET_FROM_END: u64 = 0x220;

/// Smallest accepted ROM. (4 KiB)
pub const VB_MIN_ROM_SIZE: u64 = 0x1000;

/// Largest accepted ROM. (16 MiB)
pub const VB_MAX_ROM_SIZE: u64 = 0x100_0000;

/// Virtual Boy system. There is only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VbSystem {
    /// Virtual Boy
    VirtualBoy = 0,
}

impl From<VbSystem> for i32 {
    #[inline]
    fn from(value: VbSystem) -> Self { value as i32 }
}

/// ROM footer, located 0x220 bytes before the end of the ROM.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct VbRomFooter {
    /// Title, Shift-JIS, space padded
    pub title: [u8; 20],
    /// Always zero
    pub title_nul: u8,
    _reserved: [u8; 4],
    /// Publisher code
    pub publisher: [u8; 2],
    /// Game ID
    pub game_id: [u8; 4],
    /// Version
    pub version: u8,
}

static_assert!(size_of::<VbRomFooter>() == 0x20);

/// Single-byte JIS X 0201: ASCII printable range plus half-width katakana.
#[inline]
fn is_jis_x0201(c: u8) -> bool { (0x20..=0x7E).contains(&c) || (0xA1..=0xDF).contains(&c) }

#[inline]
fn is_publisher_char(c: u8) -> bool { c.is_ascii_uppercase() || c.is_ascii_digit() }

/// Homebrew game IDs may contain spaces and hyphens.
#[inline]
fn is_game_id_char(c: u8) -> bool { is_publisher_char(c) || c == b' ' || c == b'-' }

impl VbRomFooter {
    /// Whether the title, publisher and game ID use their expected character sets.
    ///
    /// The title may end in NUL padding, and must be followed by a NUL byte.
    pub fn is_valid(&self) -> bool {
        if self.title_nul != 0 {
            return false;
        }
        let title = match self.title.iter().position(|&c| c == 0) {
            Some(nul) if self.title[nul..].iter().all(|&c| c == 0) => &self.title[..nul],
            Some(_) => return false,
            None => &self.title[..],
        };
        title.iter().all(|&c| is_jis_x0201(c))
            && self.publisher.iter().all(|&c| is_publisher_char(c))
            && self.game_id.iter().all(|&c| is_game_id_char(c))
    }
}

/// Locates the footer within the detection buffer.
fn find_footer<'a>(info: &DetectInfo<'a>) -> Option<&'a VbRomFooter> {
    if !(VB_MIN_ROM_SIZE..=VB_MAX_ROM_SIZE).contains(&info.file_size)
        || !info.file_size.is_power_of_two()
    {
        return None;
    }
    let bytes =
        info.bytes_at(info.file_size - VB_FOOTER_OFFSET_FROM_END, size_of::<VbRomFooter>())?;
    let footer = VbRomFooter::ref_from_bytes(bytes).ok()?;
    footer.is_valid().then_some(footer)
}

/// A Virtual Boy ROM.
pub struct VirtualBoy {
    footer: VbRomFooter,
}

impl RomFormat for VirtualBoy {
    type Kind = VbSystem;

    const NAME: &'static str = "Nintendo Virtual Boy";

    fn detect(info: &DetectInfo) -> Option<VbSystem> {
        if info.ext.is_some() && !info.ext_is("vb") {
            return None;
        }
        find_footer(info).map(|_| VbSystem::VirtualBoy)
    }
}

impl VirtualBoy {
    /// Opens a ROM.
    pub fn new<R>(mut reader: R) -> Result<Self>
    where R: DiscReader {
        let size = reader.size();
        let Some(addr) = size.checked_sub(VB_FOOTER_OFFSET_FROM_END) else {
            return Err(Error::DiscFormat("File too small for a Virtual Boy ROM".to_string()));
        };
        let buf = read_detect_header(&mut reader, addr, size_of::<VbRomFooter>())?;
        let info =
            DetectInfo { header: DetectHeader { addr, data: &buf }, ext: None, file_size: size };
        let Some(footer) = find_footer(&info) else {
            return Err(Error::DiscFormat("Not a Virtual Boy ROM".to_string()));
        };
        debug!("Opened Virtual Boy ROM {:?}", String::from_utf8_lossy(&footer.game_id));
        Ok(Self { footer: footer.clone() })
    }

    /// The ROM footer.
    #[inline]
    pub fn footer(&self) -> &VbRomFooter { &self.footer }

    /// Title.
    #[inline]
    pub fn title(&self) -> Cow<'_, str> { sjis_to_utf8(trim_padding(&self.footer.title)) }

    /// Game ID followed by the publisher code, e.g. `VTBJ01`.
    pub fn game_id(&self) -> String {
        let mut id = String::from_utf8_lossy(&self.footer.game_id).into_owned();
        id.push_str(&String::from_utf8_lossy(&self.footer.publisher));
        id
    }

    /// Publisher code.
    #[inline]
    pub fn publisher(&self) -> Cow<'_, str> { String::from_utf8_lossy(&self.footer.publisher) }

    /// ROM version.
    #[inline]
    pub fn version(&self) -> u8 { self.footer.version }
}
