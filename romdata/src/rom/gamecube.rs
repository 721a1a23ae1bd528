//! GameCube and Wii disc images.

use std::{
    borrow::Cow,
    io::{Seek, SeekFrom},
    mem::size_of,
};

use tracing::{debug, warn};
use zerocopy::{FromBytes, big_endian::U32};

use crate::{
    Error, Result,
    common::GcnRegion,
    disc::{
        DiscHeader,
        gcn::{GcnPartition, PartitionOptions},
    },
    read::DiscReader,
    rom::{DetectInfo, RomFormat, gamecube_bnr::GameCubeBnr, read_detect_header},
    util::{
        read::read_from,
        text::{cp1252_sjis_to_utf8, cp1252_to_utf8, sjis_to_utf8, until_nul},
    },
};

/// Absolute offset of the Wii region setting.
pub const WII_REGION_ADDRESS: u64 = 0x4E000;

/// Path of the opening banner within a GameCube partition.
pub const OPENING_BNR_PATH: &str = "/opening.bnr";

/// Header of the early NDDEMO discs, which predate the magic number.
pub const NDDEMO_HEADER: [u8; 64] = [
    0x30, 0x30, 0x00, 0x45, 0x30, 0x31, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x4E, 0x44, 0x44, 0x45, 0x4D, 0x4F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Disc system reported by [`GameCube::detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DiscSystem {
    /// GameCube
    GameCube = 0,
    /// Wii
    Wii = 2,
}

impl From<DiscSystem> for i32 {
    #[inline]
    fn from(value: DiscSystem) -> Self { value as i32 }
}

/// A GameCube or Wii disc image.
///
/// GameCube discs get a [`GcnPartition`] at offset 0. Wii partitions are encrypted
/// and are not opened.
pub struct GameCube {
    header: DiscHeader,
    system: DiscSystem,
    region: Option<GcnRegion>,
    partition: Option<GcnPartition<Box<dyn DiscReader>>>,
}

impl RomFormat for GameCube {
    type Kind = DiscSystem;

    const NAME: &'static str = "Nintendo GameCube / Wii";

    fn detect(info: &DetectInfo) -> Option<DiscSystem> {
        let data = info.bytes_at(0, size_of::<DiscHeader>())?;
        let header = DiscHeader::ref_from_bytes(data).ok()?;
        match (header.is_gamecube(), header.is_wii()) {
            (true, false) => Some(DiscSystem::GameCube),
            (false, true) => Some(DiscSystem::Wii),
            (false, false) if data[..NDDEMO_HEADER.len()] == NDDEMO_HEADER => {
                Some(DiscSystem::GameCube)
            }
            _ => None,
        }
    }
}

impl GameCube {
    /// Opens a disc image.
    pub fn new<R>(reader: R) -> Result<Self>
    where R: DiscReader + 'static {
        let mut reader: Box<dyn DiscReader> = Box::new(reader);
        let buf = read_detect_header(&mut reader, 0, size_of::<DiscHeader>())?;
        let info = DetectInfo::new(&buf, reader.size());
        let Some(system) = Self::detect(&info) else {
            return Err(Error::DiscFormat("Not a GameCube or Wii disc image".to_string()));
        };
        let header = DiscHeader::read_from_bytes(&buf)
            .map_err(|_| Error::DiscFormat("Disc header truncated".to_string()))?;

        let (region, partition) = match system {
            DiscSystem::GameCube => {
                let mut partition = GcnPartition::new(reader, 0, &PartitionOptions::default());
                let region = match partition.boot_info() {
                    Ok(boot_info) => boot_info.region(),
                    Err(e) => {
                        warn!("Failed to read boot info: {}", e);
                        None
                    }
                };
                (region, Some(partition))
            }
            DiscSystem::Wii => (read_wii_region(&mut reader), None),
        };
        debug!("Opened {} disc {} (region {:?})", Self::NAME, header.game_id_str(), region);
        Ok(Self { header, system, region, partition })
    }

    /// The disc header.
    #[inline]
    pub fn header(&self) -> &DiscHeader { &self.header }

    /// Whether this is a GameCube or Wii disc.
    #[inline]
    pub fn system(&self) -> DiscSystem { self.system }

    /// ID6, e.g. `GALE01`.
    #[inline]
    pub fn game_id(&self) -> &str { self.header.game_id_str() }

    /// ID4: system, game and region characters.
    #[inline]
    pub fn id4(&self) -> Cow<'_, str> { String::from_utf8_lossy(self.header.id4()) }

    /// Two-character company code.
    #[inline]
    pub fn company(&self) -> Cow<'_, str> { String::from_utf8_lossy(self.header.company()) }

    /// Disc number, starting at 0.
    #[inline]
    pub fn disc_number(&self) -> u8 { self.header.disc_num }

    /// Disc revision.
    #[inline]
    pub fn revision(&self) -> u8 { self.header.revision }

    /// Region code, if it could be read.
    #[inline]
    pub fn region(&self) -> Option<GcnRegion> { self.region }

    /// Internal game title.
    pub fn title(&self) -> Cow<'_, str> {
        let title = until_nul(&self.header.game_title);
        match self.region {
            Some(region) if region.uses_sjis() => sjis_to_utf8(title),
            Some(_) => cp1252_to_utf8(title),
            None => cp1252_sjis_to_utf8(title),
        }
    }

    /// The GameCube data partition.
    #[inline]
    pub fn partition(&mut self) -> Option<&mut GcnPartition<Box<dyn DiscReader>>> {
        self.partition.as_mut()
    }

    /// Reads `opening.bnr` from the partition.
    ///
    /// Returns `None` for Wii discs and for discs without a banner.
    pub fn banner(&mut self) -> Result<Option<GameCubeBnr>> {
        let region = self.region;
        let Some(partition) = self.partition.as_mut() else {
            return Ok(None);
        };
        let file = match partition.open(OPENING_BNR_PATH) {
            Ok(file) => file,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        GameCubeBnr::with_region(file, region).map(Some)
    }
}

fn read_wii_region<R>(reader: &mut R) -> Option<GcnRegion>
where R: DiscReader + ?Sized {
    reader.seek(SeekFrom::Start(WII_REGION_ADDRESS)).ok()?;
    let region: U32 = read_from(reader).ok()?;
    GcnRegion::from_u32(region.get())
}
