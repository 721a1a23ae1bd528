//! amiibo NTAG215 dumps.

use std::{fmt, mem::size_of};

use tracing::debug;
use zerocopy::{
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned,
    big_endian::{U16, U32},
};

use crate::{
    Error, Result,
    read::DiscReader,
    rom::{DetectInfo, RomFormat, read_all_up_to},
    util::static_assert,
};

/// Static lock bytes
pub const NFP_LOCK_HEADER: u16 = 0x0FE0;
/// Capability container
pub const NFP_CAP_CONTAINER: u32 = 0xF110FFEE;
/// First three dynamic lock bytes
pub const NFP_LOCK_FOOTER: [u8; 3] = [0x01, 0x00, 0x0F];
/// Configuration page 0
pub const NFP_CFG0: u32 = 0x00000004;
/// Configuration page 1
pub const NFP_CFG1: u32 = 0x5F000000;

/// Cascade tag, folded into the first check byte.
pub const NTAG_CASCADE_TAG: u8 = 0x88;
/// NXP manufacturer code: first serial byte.
pub const NXP_MANUFACTURER: u8 = 0x04;

/// Low byte of every amiibo ID.
pub const NFP_AMIIBO_ID_SUFFIX: u8 = 0x02;

/// Figure types, stored in the low byte of the character ID.
pub const NFP_TYPE_FIGURINE: u8 = 0x00;
/// Card
pub const NFP_TYPE_CARD: u8 = 0x01;
/// Yarn
pub const NFP_TYPE_YARN: u8 = 0x02;
/// Power-Up Band
pub const NFP_TYPE_BAND: u8 = 0x03;

/// Accepted dump sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfpSize {
    /// Without the password and configuration trailer.
    NoPw = 532,
    /// Standard dump.
    Standard = 540,
    /// Standard dump plus 32 bytes of extra data.
    Extended = 572,
}

impl NfpSize {
    /// Matches a file size.
    pub fn from_file_size(size: u64) -> Option<Self> {
        match size {
            532 => Some(NfpSize::NoPw),
            540 => Some(NfpSize::Standard),
            572 => Some(NfpSize::Extended),
            _ => None,
        }
    }
}

impl From<NfpSize> for i32 {
    // Every dump size reports the same system.
    #[inline]
    fn from(_: NfpSize) -> Self { 0 }
}

/// Figure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureType {
    /// Figurine
    Figurine,
    /// Card
    Card,
    /// Yarn
    Yarn,
    /// Power-Up Band
    Band,
}

impl fmt::Display for FigureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FigureType::Figurine => write!(f, "Figurine"),
            FigureType::Card => write!(f, "Card"),
            FigureType::Yarn => write!(f, "Yarn"),
            FigureType::Band => write!(f, "Band"),
        }
    }
}

/// NTAG215 memory layout, as dumped.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct NfpData {
    /// UID0-2, BCC0, UID3-6, BCC1
    pub serial: [u8; 9],
    /// Internal byte
    pub int_byte: u8,
    /// Static lock bytes
    pub lock_header: U16,
    /// Capability container
    pub cap_container: U32,
    _data0: [u8; 0x44],
    /// Character ID
    pub char_id: U32,
    /// amiibo ID
    pub amiibo_id: U32,
    _data1: [u8; 0x1AC],
    /// Dynamic lock bytes
    pub dynamic_lock: [u8; 4],
    /// Configuration page 0
    pub cfg0: U32,
    /// Configuration page 1
    pub cfg1: U32,
    /// Password
    pub pwd: U32,
    /// Password acknowledge
    pub pack: U16,
    /// Reserved
    pub rfui: U16,
    /// Extra data in 572-byte dumps
    pub extended: [u8; 0x20],
}

static_assert!(size_of::<NfpData>() == 572);

impl NfpData {
    /// Copies a dump, zeroing any fields its size does not cover.
    pub fn from_dump(dump: &[u8]) -> Option<Self> {
        NfpSize::from_file_size(dump.len() as u64)?;
        let mut data = Self::new_zeroed();
        data.as_mut_bytes()[..dump.len()].copy_from_slice(dump);
        Some(data)
    }

    /// Whether the fixed NTAG215 fields hold their expected values.
    pub fn has_valid_constants(&self) -> bool {
        self.lock_header.get() == NFP_LOCK_HEADER
            && self.cap_container.get() == NFP_CAP_CONTAINER
            && self.dynamic_lock[..3] == NFP_LOCK_FOOTER
            && self.cfg0.get() == NFP_CFG0
            && self.cfg1.get() == NFP_CFG1
    }

    /// Whether both serial number check bytes are correct.
    pub fn has_valid_check_bytes(&self) -> bool {
        let s = &self.serial;
        let cb0 = NTAG_CASCADE_TAG ^ s[0] ^ s[1] ^ s[2];
        let cb1 = s[4] ^ s[5] ^ s[6] ^ s[7];
        cb0 == s[3] && cb1 == s[8]
    }

    /// Raw figure type byte.
    #[inline]
    pub fn type_byte(&self) -> u8 { self.char_id.get() as u8 }

    /// Full validation.
    pub fn is_valid(&self) -> bool {
        if !self.has_valid_constants()
            || self.serial[0] != NXP_MANUFACTURER
            || self.amiibo_id.get() as u8 != NFP_AMIIBO_ID_SUFFIX
        {
            return false;
        }
        // Some Power-Up Bands were manufactured with bad check bytes.
        self.has_valid_check_bytes() || self.type_byte() == NFP_TYPE_BAND
    }
}

/// An amiibo dump.
pub struct Amiibo {
    data: Box<NfpData>,
    size: NfpSize,
}

impl RomFormat for Amiibo {
    type Kind = NfpSize;

    const NAME: &'static str = "Nintendo amiibo";

    fn detect(info: &DetectInfo) -> Option<NfpSize> {
        let size = NfpSize::from_file_size(info.file_size)?;
        let dump = info.bytes_at(0, size as usize)?;
        let data = NfpData::from_dump(dump)?;
        data.is_valid().then_some(size)
    }
}

impl Amiibo {
    /// Reads a dump.
    pub fn new<R>(mut reader: R) -> Result<Self>
    where R: DiscReader {
        let buf = read_all_up_to(&mut reader, NfpSize::Extended as usize)?;
        let info = DetectInfo::new(&buf, reader.size());
        let Some(size) = Self::detect(&info) else {
            return Err(Error::DiscFormat("Not an amiibo dump".to_string()));
        };
        let data = NfpData::from_dump(&buf[..size as usize])
            .ok_or_else(|| Error::DiscFormat("Invalid amiibo dump size".to_string()))?;
        debug!("Read amiibo {:08X}-{:08X}", data.char_id.get(), data.amiibo_id.get());
        Ok(Self { data: Box::new(data), size })
    }

    /// Normalized dump contents.
    #[inline]
    pub fn data(&self) -> &NfpData { &self.data }

    /// Size of the original dump.
    #[inline]
    pub fn size(&self) -> NfpSize { self.size }

    /// The 7-byte NTAG215 serial number, without check bytes.
    pub fn serial(&self) -> [u8; 7] {
        let s = &self.data.serial;
        [s[0], s[1], s[2], s[4], s[5], s[6], s[7]]
    }

    /// Serial number as a hex string.
    pub fn serial_str(&self) -> String {
        self.serial().iter().map(|b| format!("{b:02X}")).collect()
    }

    /// Whether the check bytes are valid. Power-Up Bands may fail this and still be
    /// accepted.
    #[inline]
    pub fn has_valid_check_bytes(&self) -> bool { self.data.has_valid_check_bytes() }

    /// Character ID.
    #[inline]
    pub fn char_id(&self) -> u32 { self.data.char_id.get() }

    /// amiibo ID.
    #[inline]
    pub fn amiibo_id(&self) -> u32 { self.data.amiibo_id.get() }

    /// Game series, from the top 10 bits of the character ID.
    #[inline]
    pub fn game_series(&self) -> u16 { (self.char_id() >> 22) as u16 }

    /// Character, including game series.
    #[inline]
    pub fn character(&self) -> u16 { (self.char_id() >> 16) as u16 }

    /// Character variant.
    #[inline]
    pub fn variant(&self) -> u8 { (self.char_id() >> 8) as u8 }

    /// amiibo number within its series.
    #[inline]
    pub fn amiibo_number(&self) -> u16 { (self.amiibo_id() >> 16) as u16 }

    /// amiibo series.
    #[inline]
    pub fn amiibo_series(&self) -> u8 { (self.amiibo_id() >> 8) as u8 }

    /// Figure type, if known.
    pub fn figure_type(&self) -> Option<FigureType> {
        match self.data.type_byte() {
            NFP_TYPE_FIGURINE => Some(FigureType::Figurine),
            NFP_TYPE_CARD => Some(FigureType::Card),
            NFP_TYPE_YARN => Some(FigureType::Yarn),
            NFP_TYPE_BAND => Some(FigureType::Band),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn build_dump(size: NfpSize, figure_type: u8) -> Vec<u8> {
        let mut data = vec![0u8; NfpSize::Extended as usize];
        let serial = [0x04, 0x12, 0x34, 0x00, 0x56, 0x78, 0x9A, 0xBC, 0x00];
        data[..9].copy_from_slice(&serial);
        data[3] = NTAG_CASCADE_TAG ^ 0x04 ^ 0x12 ^ 0x34;
        data[8] = 0x56 ^ 0x78 ^ 0x9A ^ 0xBC;
        data[9] = 0x48;
        data[0x0A..0x0C].copy_from_slice(&NFP_LOCK_HEADER.to_be_bytes());
        data[0x0C..0x10].copy_from_slice(&NFP_CAP_CONTAINER.to_be_bytes());
        data[0x54..0x58].copy_from_slice(&[0x01, 0x80, 0x02, figure_type]);
        data[0x58..0x5C].copy_from_slice(&[0x00, 0x35, 0x00, 0x02]);
        data[0x208..0x20B].copy_from_slice(&NFP_LOCK_FOOTER);
        data[0x20C..0x210].copy_from_slice(&NFP_CFG0.to_be_bytes());
        data[0x210..0x214].copy_from_slice(&NFP_CFG1.to_be_bytes());
        data[0x214..0x21C].fill(0xAA);
        data[0x21C..].fill(0xBB);
        data.truncate(size as usize);
        data
    }

    fn is_supported(dump: &[u8]) -> i32 {
        Amiibo::is_rom_supported(&DetectInfo::new(dump, dump.len() as u64))
    }

    #[test]
    fn test_sizes() {
        for size in [NfpSize::NoPw, NfpSize::Standard, NfpSize::Extended] {
            let dump = build_dump(size, NFP_TYPE_FIGURINE);
            assert_eq!(is_supported(&dump), 0);
            assert_eq!(is_supported(&dump), 0);
        }
        let mut dump = build_dump(NfpSize::Standard, NFP_TYPE_FIGURINE);
        dump.push(0);
        assert_eq!(is_supported(&dump), -1);
    }

    #[test]
    fn test_no_pw_dump_is_normalized() {
        let dump = build_dump(NfpSize::NoPw, NFP_TYPE_CARD);
        assert_eq!(dump.len(), 532);
        let amiibo = Amiibo::new(Cursor::new(dump)).unwrap();
        assert_eq!(amiibo.size(), NfpSize::NoPw);
        let data = amiibo.data();
        assert_eq!(data.pwd.get(), 0);
        assert_eq!(data.pack.get(), 0);
        assert_eq!(data.rfui.get(), 0);
        assert_eq!(data.extended, [0u8; 0x20]);
        assert_eq!(amiibo.figure_type(), Some(FigureType::Card));
    }

    #[test]
    fn test_standard_dump_zeroes_extended() {
        let amiibo = Amiibo::new(Cursor::new(build_dump(NfpSize::Standard, 0))).unwrap();
        assert_eq!(amiibo.data().pwd.get(), 0xAAAAAAAA);
        assert_eq!(amiibo.data().extended, [0u8; 0x20]);
        let amiibo = Amiibo::new(Cursor::new(build_dump(NfpSize::Extended, 0))).unwrap();
        assert_eq!(amiibo.data().extended, [0xBBu8; 0x20]);
    }

    #[test]
    fn test_fields() {
        let amiibo = Amiibo::new(Cursor::new(build_dump(NfpSize::Standard, 0))).unwrap();
        assert_eq!(amiibo.serial_str(), "04123456789ABC");
        assert_eq!(amiibo.char_id(), 0x0180_0200);
        assert_eq!(amiibo.character(), 0x0180);
        assert_eq!(amiibo.game_series(), 0x006);
        assert_eq!(amiibo.variant(), 0x02);
        assert_eq!(amiibo.amiibo_number(), 0x0035);
        assert_eq!(amiibo.amiibo_series(), 0x00);
        assert_eq!(amiibo.figure_type(), Some(FigureType::Figurine));
        assert!(amiibo.has_valid_check_bytes());
    }

    #[test]
    fn test_constants_checked() {
        for offset in [0x0A, 0x0C, 0x20C, 0x210] {
            let mut dump = build_dump(NfpSize::Standard, 0);
            dump[offset + 1] ^= 0x01;
            assert_eq!(is_supported(&dump), -1, "offset {offset:#X}");
        }
        let mut dump = build_dump(NfpSize::NoPw, 0);
        dump[0x0C] = 0;
        assert_eq!(is_supported(&dump), -1);
    }

    #[test]
    fn test_lock_footer_checked() {
        for offset in [0x208, 0x209, 0x20A] {
            let mut dump = build_dump(NfpSize::Standard, 0);
            dump[offset] ^= 0x10;
            assert_eq!(is_supported(&dump), -1, "offset {offset:#X}");
        }
        // The fourth dynamic lock byte is not checked.
        let mut dump = build_dump(NfpSize::Standard, 0);
        dump[0x20B] = 0xBD;
        assert_eq!(is_supported(&dump), 0);
    }

    #[test]
    fn test_amiibo_id_suffix_checked() {
        let mut dump = build_dump(NfpSize::Standard, 0);
        dump[0x5B] = 0x00;
        assert_eq!(is_supported(&dump), -1);
        // Bands with bad check bytes still need the suffix.
        let mut dump = build_dump(NfpSize::Standard, NFP_TYPE_BAND);
        dump[8] ^= 0xFF;
        assert_eq!(is_supported(&dump), 0);
        dump[0x5B] = 0x01;
        assert_eq!(is_supported(&dump), -1);
    }

    #[test]
    fn test_serial_checks() {
        let mut dump = build_dump(NfpSize::Standard, 0);
        dump[0] = 0x05;
        assert_eq!(is_supported(&dump), -1);

        let mut dump = build_dump(NfpSize::Standard, NFP_TYPE_FIGURINE);
        dump[8] ^= 0xFF;
        assert_eq!(is_supported(&dump), -1);
        dump[0x57] = NFP_TYPE_BAND;
        assert_eq!(is_supported(&dump), 0);
        let amiibo = Amiibo::new(Cursor::new(dump)).unwrap();
        assert!(!amiibo.has_valid_check_bytes());
        assert_eq!(amiibo.figure_type(), Some(FigureType::Band));
    }

    #[test]
    fn test_short_header() {
        let dump = build_dump(NfpSize::Standard, 0);
        let info = DetectInfo::new(&dump[..0x100], dump.len() as u64);
        assert_eq!(Amiibo::is_rom_supported(&info), -1);
    }
}
