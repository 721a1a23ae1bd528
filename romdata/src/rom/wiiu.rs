//! Wii U disc images (WUD, and WUX-compressed).

use std::{
    borrow::Cow,
    io::{Seek, SeekFrom},
    mem::size_of,
};

use tracing::{debug, warn};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, big_endian, little_endian};

use crate::{
    Error, Result, ResultContext,
    common::MagicBytes,
    disc::{DiscHeader, GCN_MAGIC, WII_MAGIC},
    read::DiscReader,
    rom::{DetectInfo, RomFormat, read_detect_header},
    util::{array_ref, read::read_from, static_assert},
};

/// Magic bytes at the start of a WUX file.
pub const WUX_MAGIC_0: MagicBytes = *b"WUX0";

/// Second WUX magic word.
pub const WUX_MAGIC_1: MagicBytes = [0x2E, 0xD0, 0x99, 0x10];

/// Secondary magic number, found at [`WIIU_SECONDARY_MAGIC_ADDRESS`].
pub const WIIU_SECONDARY_MAGIC: u32 = 0xCC549EB9;

/// Absolute offset of the secondary magic number in an uncompressed image.
pub const WIIU_SECONDARY_MAGIC_ADDRESS: u64 = 0x10000;

/// Smallest accepted image, WUD or WUX.
pub const WIIU_MIN_FILE_SIZE: u64 = 0x20000;

/// Smallest accepted WUX sector size.
pub const WUX_MIN_SECTOR_SIZE: u32 = 0x100;

/// Largest accepted WUX sector size.
pub const WUX_MAX_SECTOR_SIZE: u32 = 0x800_0000;

/// Wii U image container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WiiUFormat {
    /// Uncompressed disc image
    Wud = 0,
    /// WUX compressed disc image
    Wux = 1,
}

impl From<WiiUFormat> for i32 {
    #[inline]
    fn from(value: WiiUFormat) -> Self { value as i32 }
}

/// Wii U disc header.
///
/// The ID is a series of ASCII fields separated by hyphens, e.g.
/// `WUP-P-ARPE-0001-01-xxx`.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct WiiUDiscHeader {
    /// `WUP`
    pub wup: [u8; 3],
    hyphen1: u8,
    /// `P`
    pub p: u8,
    hyphen2: u8,
    /// Game ID
    pub id4: [u8; 4],
    hyphen3: u8,
    /// Version number, in ASCII
    pub version: [u8; 2],
    hyphen4: u8,
    /// Required OS version, in ASCII
    pub os_version: [u8; 3],
    /// Region, in ASCII
    pub region: [u8; 3],
    hyphen5: u8,
    /// Disc number, in ASCII
    pub disc_number: u8,
}

static_assert!(size_of::<WiiUDiscHeader>() == 22);

impl WiiUDiscHeader {
    /// Whether all field separators are hyphens.
    #[inline]
    pub fn has_valid_hyphens(&self) -> bool {
        [self.hyphen1, self.hyphen2, self.hyphen3, self.hyphen4, self.hyphen5]
            .iter()
            .all(|&c| c == b'-')
    }
}

/// WUX file header (little endian).
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct WuxHeader {
    /// `WUX0`
    pub magic0: MagicBytes,
    /// 0x1099D02E (little endian)
    pub magic1: MagicBytes,
    /// Sector size
    pub sector_size: little_endian::U32,
    _reserved1: little_endian::U32,
    /// Uncompressed image size
    pub uncompressed_size: little_endian::U64,
    /// Flags
    pub flags: little_endian::U32,
    _reserved2: little_endian::U32,
}

static_assert!(size_of::<WuxHeader>() == 0x20);

impl WuxHeader {
    /// Whether the sector size is a power of two within the accepted range.
    #[inline]
    pub fn is_sector_size_valid(&self) -> bool {
        let size = self.sector_size.get();
        size.is_power_of_two() && (WUX_MIN_SECTOR_SIZE..=WUX_MAX_SECTOR_SIZE).contains(&size)
    }
}

/// A Wii U disc image.
pub struct WiiU {
    header: WiiUDiscHeader,
    format: WiiUFormat,
    wux: Option<WuxHeader>,
}

impl RomFormat for WiiU {
    type Kind = WiiUFormat;

    const NAME: &'static str = "Nintendo Wii U";

    fn detect(info: &DetectInfo) -> Option<WiiUFormat> {
        if info.file_size < WIIU_MIN_FILE_SIZE {
            return None;
        }
        if let Some(wux) = info.bytes_at(0, size_of::<WuxHeader>()) {
            if *array_ref!(wux, 0, 4) == WUX_MAGIC_0 && *array_ref!(wux, 4, 4) == WUX_MAGIC_1 {
                let wux = WuxHeader::ref_from_bytes(wux).ok()?;
                return wux.is_sector_size_valid().then_some(WiiUFormat::Wux);
            }
        }

        // The GameCube/Wii magic fields must be present and empty.
        let data = info.bytes_at(0, size_of::<DiscHeader>())?;
        let disc = DiscHeader::ref_from_bytes(data).ok()?;
        if disc.wii_magic == WII_MAGIC || disc.gcn_magic == GCN_MAGIC {
            return None;
        }
        let header = WiiUDiscHeader::ref_from_prefix(data).ok()?.0;
        (&header.wup == b"WUP" && header.has_valid_hyphens()).then_some(WiiUFormat::Wud)
    }
}

impl WiiU {
    /// Opens a Wii U disc image.
    ///
    /// For uncompressed images, the secondary magic number must also be present.
    pub fn new<R>(mut reader: R) -> Result<Self>
    where R: DiscReader {
        let buf = read_detect_header(&mut reader, 0, size_of::<DiscHeader>())?;
        let info = DetectInfo::new(&buf, reader.size());
        let Some(format) = Self::detect(&info) else {
            return Err(Error::DiscFormat("Not a Wii U disc image".to_string()));
        };
        let (header, wux) = match format {
            WiiUFormat::Wud => {
                if !Self::verify_secondary_magic(&mut reader)? {
                    warn!("Wii U secondary magic not found");
                    return Err(Error::DiscFormat("Wii U secondary magic not found".to_string()));
                }
                let header = WiiUDiscHeader::read_from_prefix(&buf)
                    .map_err(|_| Error::DiscFormat("Disc header truncated".to_string()))?
                    .0;
                (header, None)
            }
            WiiUFormat::Wux => {
                let wux = WuxHeader::read_from_prefix(&buf)
                    .map_err(|_| Error::DiscFormat("WUX header truncated".to_string()))?
                    .0;
                // The first sector holds the disc header.
                let data_offset = wux_data_offset(&wux, reader.size());
                reader.seek(SeekFrom::Start(data_offset)).context("Seeking to WUX data")?;
                let header: WiiUDiscHeader =
                    read_from(&mut reader).context("Reading Wii U disc header")?;
                (header, Some(wux))
            }
        };
        debug!("Opened Wii U {:?} image", format);
        Ok(Self { header, format, wux })
    }

    /// Checks for [`WIIU_SECONDARY_MAGIC`] at [`WIIU_SECONDARY_MAGIC_ADDRESS`].
    ///
    /// Returns `false` if the image is too small to contain it.
    pub fn verify_secondary_magic<R>(reader: &mut R) -> Result<bool>
    where R: DiscReader + ?Sized {
        if reader.size() < WIIU_SECONDARY_MAGIC_ADDRESS + 4 {
            return Ok(false);
        }
        reader
            .seek(SeekFrom::Start(WIIU_SECONDARY_MAGIC_ADDRESS))
            .context("Seeking to secondary magic")?;
        let magic: big_endian::U32 = read_from(reader).context("Reading secondary magic")?;
        Ok(magic.get() == WIIU_SECONDARY_MAGIC)
    }

    /// The disc header.
    #[inline]
    pub fn header(&self) -> &WiiUDiscHeader { &self.header }

    /// Image container.
    #[inline]
    pub fn format(&self) -> WiiUFormat { self.format }

    /// WUX header, for compressed images.
    #[inline]
    pub fn wux_header(&self) -> Option<&WuxHeader> { self.wux.as_ref() }

    /// The game ID, e.g. `ARPE`.
    #[inline]
    pub fn game_id(&self) -> Cow<'_, str> { String::from_utf8_lossy(&self.header.id4) }

    /// Region string, e.g. `USA`.
    #[inline]
    pub fn region(&self) -> Cow<'_, str> { String::from_utf8_lossy(&self.header.region) }

    /// Full product code, e.g. `WUP-P-ARPE`.
    pub fn product_code(&self) -> String {
        format!("WUP-P-{}", self.game_id())
    }

    /// Disc version, parsed from ASCII.
    pub fn version(&self) -> Option<u32> {
        std::str::from_utf8(&self.header.version).ok()?.parse().ok()
    }

    /// Required system version, parsed from ASCII.
    pub fn os_version(&self) -> Option<u32> {
        std::str::from_utf8(&self.header.os_version).ok()?.parse().ok()
    }
}

/// The WUX header is followed by the sector index table, then sector data aligned to
/// the sector size.
fn wux_data_offset(wux: &WuxHeader, file_size: u64) -> u64 {
    let sector_size = wux.sector_size.get() as u64;
    let sector_count = wux.uncompressed_size.get().div_ceil(sector_size);
    let table_end = size_of::<WuxHeader>() as u64 + sector_count * 4;
    table_end.next_multiple_of(sector_size).min(file_size)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const HEADER: &[u8; 22] = b"WUP-P-ARPE-01-550USA-1";

    fn build_wud() -> Vec<u8> {
        let mut data = vec![0u8; WIIU_MIN_FILE_SIZE as usize];
        data[..22].copy_from_slice(HEADER);
        data[0x10000..0x10004].copy_from_slice(&WIIU_SECONDARY_MAGIC.to_be_bytes());
        data
    }

    fn build_wux() -> Vec<u8> {
        let sector_size = 0x8000u32;
        let mut data = vec![0u8; WIIU_MIN_FILE_SIZE as usize];
        data[..4].copy_from_slice(&WUX_MAGIC_0);
        data[4..8].copy_from_slice(&WUX_MAGIC_1);
        data[8..12].copy_from_slice(&sector_size.to_le_bytes());
        data[16..24].copy_from_slice(&(sector_size as u64 * 2).to_le_bytes());
        data[0x8000..0x8016].copy_from_slice(HEADER);
        data
    }

    #[test]
    fn test_detect_wud() {
        let data = build_wud();
        let info = DetectInfo::new(&data[..0x100], data.len() as u64);
        assert_eq!(WiiU::detect(&info), Some(WiiUFormat::Wud));
        assert_eq!(WiiU::is_rom_supported(&info), 0);
        assert_eq!(WiiU::is_rom_supported(&info), 0);
    }

    #[test]
    fn test_detect_rejects() {
        let mut data = build_wud();
        data[13] = b'_';
        assert_eq!(WiiU::is_rom_supported(&DetectInfo::new(&data, data.len() as u64)), -1);

        // GameCube magic present.
        let mut data = build_wud();
        data[0x1C..0x20].copy_from_slice(&GCN_MAGIC);
        assert_eq!(WiiU::is_rom_supported(&DetectInfo::new(&data, data.len() as u64)), -1);

        // Too short to check the sibling magics.
        let data = build_wud();
        assert_eq!(WiiU::is_rom_supported(&DetectInfo::new(&data[..0x20], 0x20)), -1);
    }

    #[test]
    fn test_detect_wux() {
        let mut data = build_wux();
        let info = DetectInfo::new(&data, data.len() as u64);
        assert_eq!(WiiU::is_rom_supported(&info), 1);
        data[8..12].copy_from_slice(&0x8001u32.to_le_bytes());
        assert_eq!(WiiU::is_rom_supported(&DetectInfo::new(&data, data.len() as u64)), -1);
    }

    #[test]
    fn test_detect_min_size() {
        for data in [build_wud(), build_wux()] {
            let info = DetectInfo::new(&data, WIIU_MIN_FILE_SIZE - 1);
            assert_eq!(WiiU::is_rom_supported(&info), -1);
            let info = DetectInfo::new(&data, WIIU_MIN_FILE_SIZE);
            assert!(WiiU::is_rom_supported(&info) >= 0);
        }
        let mut data = build_wud();
        data.truncate(0x10004);
        assert!(matches!(WiiU::new(Cursor::new(data)), Err(Error::DiscFormat(_))));
    }

    #[test]
    fn test_open_wud() {
        let wiiu = WiiU::new(Cursor::new(build_wud())).unwrap();
        assert_eq!(wiiu.format(), WiiUFormat::Wud);
        assert_eq!(wiiu.game_id(), "ARPE");
        assert_eq!(wiiu.product_code(), "WUP-P-ARPE");
        assert_eq!(wiiu.region(), "USA");
        assert_eq!(wiiu.version(), Some(1));
        assert_eq!(wiiu.os_version(), Some(550));
        assert_eq!(wiiu.header().disc_number, b'1');
    }

    #[test]
    fn test_secondary_magic() {
        let mut data = build_wud();
        data[0x10003] ^= 0xFF;
        assert!(matches!(WiiU::new(Cursor::new(data)), Err(Error::DiscFormat(_))));

        let mut short = build_wud();
        short.truncate(0x10002);
        assert!(!WiiU::verify_secondary_magic(&mut Cursor::new(short)).unwrap());
    }

    #[test]
    fn test_open_wux() {
        let wiiu = WiiU::new(Cursor::new(build_wux())).unwrap();
        assert_eq!(wiiu.format(), WiiUFormat::Wux);
        assert_eq!(wiiu.wux_header().unwrap().sector_size.get(), 0x8000);
        assert_eq!(wiiu.game_id(), "ARPE");
    }
}
