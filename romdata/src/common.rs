//! Common types.

use std::fmt;

/// Magic bytes
pub type MagicBytes = [u8; 4];

/// GameCube/Wii region code, as stored in bi2.bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GcnRegion {
    /// Japan / Taiwan
    Jpn = 0,
    /// USA
    Usa = 1,
    /// Europe / Australia
    Eur = 2,
    /// Region-free
    All = 3,
    /// South Korea
    Kor = 4,
    /// China
    Chn = 5,
    /// Taiwan
    Twn = 6,
}

impl GcnRegion {
    /// Converts a raw region code.
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => GcnRegion::Jpn,
            1 => GcnRegion::Usa,
            2 => GcnRegion::Eur,
            3 => GcnRegion::All,
            4 => GcnRegion::Kor,
            5 => GcnRegion::Chn,
            6 => GcnRegion::Twn,
            _ => return None,
        })
    }

    /// Whether text for this region is encoded as Shift-JIS.
    #[inline]
    pub fn uses_sjis(self) -> bool { matches!(self, GcnRegion::Jpn) }
}

impl fmt::Display for GcnRegion {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcnRegion::Jpn => write!(f, "Japan"),
            GcnRegion::Usa => write!(f, "USA"),
            GcnRegion::Eur => write!(f, "Europe"),
            GcnRegion::All => write!(f, "Region-Free"),
            GcnRegion::Kor => write!(f, "South Korea"),
            GcnRegion::Chn => write!(f, "China"),
            GcnRegion::Twn => write!(f, "Taiwan"),
        }
    }
}

/// Kind of a file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_codes() {
        for code in 0..7 {
            assert_eq!(GcnRegion::from_u32(code).map(|r| r as u32), Some(code));
        }
        assert_eq!(GcnRegion::from_u32(7), None);
        assert!(GcnRegion::Jpn.uses_sjis());
        assert!(!GcnRegion::Eur.uses_sjis());
        assert_eq!(GcnRegion::All.to_string(), "Region-Free");
    }
}
