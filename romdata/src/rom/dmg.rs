//! Game Boy and Game Boy Color ROMs.

use std::{borrow::Cow, mem::size_of};

use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, big_endian::U16};

use crate::{
    Error, Result,
    read::DiscReader,
    rom::{DetectInfo, RomFormat, read_detect_header},
    util::{
        static_assert,
        text::{cp1252_to_utf8, trim_padding},
    },
};

/// Absolute offset of the ROM header.
pub const DMG_HEADER_ADDRESS: u64 = 0x100;

/// Header offset in ROMs with a 512-byte copier header.
pub const DMG_COPIER_HEADER_ADDRESS: u64 = DMG_HEADER_ADDRESS + 0x200;

/// The boot ROM compares this logo before starting the game.
pub const NINTENDO_LOGO: [u8; 0x30] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];

/// CGB flag: game supports CGB functions.
pub const CGB_FLAG_SUPPORTED: u8 = 0x80;

/// CGB flag: game only works on CGB.
pub const CGB_FLAG_ONLY: u8 = 0x40;

/// SGB flag: game supports SGB functions.
pub const SGB_FLAG_SUPPORTED: u8 = 0x03;

/// Old publisher code signalling that the new publisher code is used.
pub const OLD_PUBLISHER_USE_NEW: u8 = 0x33;

/// Systems a ROM runs on, as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmgSystem(pub u32);

impl DmgSystem {
    /// Game Boy
    pub const DMG: u32 = 1 << 0;
    /// Super Game Boy
    pub const SGB: u32 = 1 << 1;
    /// Game Boy Color
    pub const CGB: u32 = 1 << 2;
    /// ROM has a 512-byte copier header.
    pub const COPIER_HEADER: u32 = 1 << 8;

    /// Whether the ROM runs on the original Game Boy.
    #[inline]
    pub fn is_dmg(self) -> bool { self.0 & Self::DMG != 0 }

    /// Whether the ROM has Super Game Boy enhancements.
    #[inline]
    pub fn is_sgb(self) -> bool { self.0 & Self::SGB != 0 }

    /// Whether the ROM runs on the Game Boy Color.
    #[inline]
    pub fn is_cgb(self) -> bool { self.0 & Self::CGB != 0 }

    /// Whether the ROM header is preceded by a copier header.
    #[inline]
    pub fn has_copier_header(self) -> bool { self.0 & Self::COPIER_HEADER != 0 }
}

impl From<DmgSystem> for i32 {
    #[inline]
    fn from(value: DmgSystem) -> Self { value.0 as i32 }
}

/// Game Boy ROM header, located at 0x100.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DmgRomHeader {
    /// Entry point
    pub entry: [u8; 4],
    /// Nintendo logo
    pub nintendo: [u8; 0x30],
    /// Title. Shortened to 11 bytes plus a manufacturer code on later CGB games.
    pub title: [u8; 15],
    /// CGB support flag
    pub cgb_flag: u8,
    /// New publisher code
    pub new_publisher_code: [u8; 2],
    /// SGB support flag
    pub sgb_flag: u8,
    /// Cartridge hardware type
    pub cart_type: u8,
    /// ROM size: 32 KiB << n
    pub rom_size: u8,
    /// RAM size code
    pub ram_size: u8,
    /// Destination code: 0 for Japan
    pub region: u8,
    /// Old publisher code
    pub old_publisher_code: u8,
    /// Mask ROM version
    pub version: u8,
    /// Checksum over 0x134..=0x14C
    pub header_checksum: u8,
    /// Checksum over the whole ROM
    pub rom_checksum: U16,
}

static_assert!(size_of::<DmgRomHeader>() == 0x50);

impl DmgRomHeader {
    /// Computes the header checksum over the title through the version byte.
    pub fn header_checksum(&self) -> u8 {
        // 0x134..=0x14C: offset 0x34 through 0x4C within the header.
        self.as_bytes()[0x34..=0x4C].iter().fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
    }

    /// Whether the stored header checksum matches.
    #[inline]
    pub fn is_checksum_valid(&self) -> bool { self.header_checksum() == self.header_checksum }

    /// Systems the header declares support for.
    pub fn system(&self) -> DmgSystem {
        let mut system = if self.cgb_flag & CGB_FLAG_SUPPORTED != 0 {
            if self.cgb_flag & CGB_FLAG_ONLY != 0 {
                DmgSystem::CGB
            } else {
                DmgSystem::CGB | DmgSystem::DMG
            }
        } else {
            DmgSystem::DMG
        };
        if self.old_publisher_code == OLD_PUBLISHER_USE_NEW && self.sgb_flag == SGB_FLAG_SUPPORTED
        {
            system |= DmgSystem::SGB;
        }
        DmgSystem(system)
    }

    /// Title bytes, excluding the CGB flag when it is set.
    pub fn title_bytes(&self) -> &[u8] {
        let bytes = &self.as_bytes()[0x34..0x44];
        if self.cgb_flag & CGB_FLAG_SUPPORTED != 0 {
            trim_padding(&bytes[..15])
        } else {
            trim_padding(bytes)
        }
    }

    /// ROM size in bytes, if the size code is known.
    #[inline]
    pub fn rom_size_bytes(&self) -> Option<u64> {
        (self.rom_size <= 8).then(|| 0x8000u64 << self.rom_size)
    }
}

/// A Game Boy or Game Boy Color ROM.
pub struct Dmg {
    header: DmgRomHeader,
    system: DmgSystem,
}

/// Finds a ROM header at 0x100, or at 0x300 after a copier header.
fn find_header<'a>(info: &DetectInfo<'a>) -> Option<(DmgSystem, &'a DmgRomHeader)> {
    if let Some(header) = header_at(info, DMG_HEADER_ADDRESS) {
        return Some((header.system(), header));
    }
    // Copier headers leave 0x10..0x20 empty.
    if !info.bytes_at(0x10, 0x10)?.iter().all(|&b| b == 0) {
        return None;
    }
    let header = header_at(info, DMG_COPIER_HEADER_ADDRESS)?;
    Some((DmgSystem(header.system().0 | DmgSystem::COPIER_HEADER), header))
}

fn header_at<'a>(info: &DetectInfo<'a>, addr: u64) -> Option<&'a DmgRomHeader> {
    let bytes = info.bytes_at(addr, size_of::<DmgRomHeader>())?;
    let header = DmgRomHeader::ref_from_bytes(bytes).ok()?;
    (header.nintendo == NINTENDO_LOGO).then_some(header)
}

impl RomFormat for Dmg {
    type Kind = DmgSystem;

    const NAME: &'static str = "Nintendo Game Boy";

    #[inline]
    fn detect(info: &DetectInfo) -> Option<DmgSystem> {
        find_header(info).map(|(system, _)| system)
    }
}

impl Dmg {
    /// Opens a ROM.
    pub fn new<R>(mut reader: R) -> Result<Self>
    where R: DiscReader {
        let len = (DMG_COPIER_HEADER_ADDRESS as usize) + size_of::<DmgRomHeader>();
        let buf = read_detect_header(&mut reader, 0, len)?;
        let info = DetectInfo::new(&buf, reader.size());
        let Some((system, header)) = find_header(&info) else {
            return Err(Error::DiscFormat("Not a Game Boy ROM".to_string()));
        };
        if !header.is_checksum_valid() {
            debug!(
                "Header checksum mismatch: {:#04X} != {:#04X}",
                header.header_checksum(),
                header.header_checksum
            );
        }
        Ok(Self { header: header.clone(), system })
    }

    /// The ROM header.
    #[inline]
    pub fn header(&self) -> &DmgRomHeader { &self.header }

    /// Systems the ROM runs on.
    #[inline]
    pub fn system(&self) -> DmgSystem { self.system }

    /// Internal title.
    #[inline]
    pub fn title(&self) -> Cow<'_, str> { cp1252_to_utf8(self.header.title_bytes()) }

    /// Whether the header checksum is valid.
    #[inline]
    pub fn is_checksum_valid(&self) -> bool { self.header.is_checksum_valid() }
}
