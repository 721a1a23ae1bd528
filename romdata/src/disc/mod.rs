//! GameCube/Wii disc format types.

use std::{mem::size_of, str::from_utf8};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, big_endian::*};

use crate::{
    common::{GcnRegion, MagicBytes},
    util::{static_assert, text::until_nul},
};

pub mod fst;
pub mod gcn;

/// Magic bytes for Wii discs. Located at offset 0x18.
pub const WII_MAGIC: MagicBytes = [0x5D, 0x1C, 0x9E, 0xA3];

/// Magic bytes for GameCube discs. Located at offset 0x1C.
pub const GCN_MAGIC: MagicBytes = [0xC2, 0x33, 0x9F, 0x3D];

/// Partition-relative address of the boot block.
pub const BOOT_BLOCK_ADDRESS: u64 = 0x420;

/// Partition-relative address of the boot info (bi2.bin).
pub const BOOT_INFO_ADDRESS: u64 = BOOT_BLOCK_ADDRESS + size_of::<BootBlock>() as u64;

/// Offset shift for GameCube partitions.
pub const GCN_OFFSET_SHIFT: u8 = 0;

/// Offset shift for Wii partitions. Offsets and sizes are stored divided by 4.
pub const WII_OFFSET_SHIFT: u8 = 2;

/// Shared GameCube & Wii disc header.
///
/// This header is always at the start of the disc image and within each Wii partition.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DiscHeader {
    /// Game ID (e.g. GALE01): ID4 followed by the company code
    pub game_id: [u8; 6],
    /// Used in multi-disc games
    pub disc_num: u8,
    /// Disc revision
    pub revision: u8,
    /// Audio streaming enabled
    pub audio_streaming: u8,
    /// Audio streaming buffer size
    pub audio_stream_buf_size: u8,
    /// Padding
    _pad1: [u8; 14],
    /// If this is a Wii disc, this will be 0x5D1C9EA3
    pub wii_magic: MagicBytes,
    /// If this is a GameCube disc, this will be 0xC2339F3D
    pub gcn_magic: MagicBytes,
    /// Game title
    pub game_title: [u8; 64],
    /// Wii: If 1, disc omits partition hashes
    pub no_partition_hashes: u8,
    /// Wii: If 1, disc omits partition encryption
    pub no_partition_encryption: u8,
    /// Padding
    _pad2: [u8; 2],
}

static_assert!(size_of::<DiscHeader>() == 100);

impl DiscHeader {
    /// Game ID as a string.
    #[inline]
    pub fn game_id_str(&self) -> &str { from_utf8(&self.game_id).unwrap_or("[invalid]") }

    /// The four-character game ID (system, game, region).
    #[inline]
    pub fn id4(&self) -> &[u8] { &self.game_id[..4] }

    /// The two-character company code.
    #[inline]
    pub fn company(&self) -> &[u8] { &self.game_id[4..] }

    /// Game title as a string.
    #[inline]
    pub fn game_title_str(&self) -> &str {
        from_utf8(until_nul(&self.game_title)).unwrap_or("[invalid]")
    }

    /// Whether this is a GameCube disc.
    #[inline]
    pub fn is_gamecube(&self) -> bool { self.gcn_magic == GCN_MAGIC }

    /// Whether this is a Wii disc.
    #[inline]
    pub fn is_wii(&self) -> bool { self.wii_magic == WII_MAGIC }

    /// Whether the disc has partition data hashes.
    #[inline]
    pub fn has_partition_hashes(&self) -> bool { self.no_partition_hashes == 0 }

    /// Whether the disc has partition data encryption.
    #[inline]
    pub fn has_partition_encryption(&self) -> bool { self.no_partition_encryption == 0 }
}

/// Boot block, located at 0x420 within a partition.
///
/// **Wii**: Offsets and sizes are stored `>> 2`.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BootBlock {
    /// Offset to main DOL
    pub dol_offset: U32,
    /// Offset to file system table
    pub fst_offset: U32,
    /// File system size
    pub fst_size: U32,
    /// File system max size across multi-disc games
    pub fst_max_size: U32,
    /// File system table load address
    pub fst_memory_address: U32,
    /// User data position
    pub user_position: U32,
    /// User data length
    pub user_length: U32,
    /// Reserved
    _reserved: U32,
}

static_assert!(size_of::<BootBlock>() == 32);

impl BootBlock {
    /// Offset within the partition to the main DOL.
    #[inline]
    pub fn dol_offset(&self, offset_shift: u8) -> u64 {
        (self.dol_offset.get() as u64) << offset_shift
    }

    /// Offset within the partition to the file system table (FST).
    #[inline]
    pub fn fst_offset(&self, offset_shift: u8) -> u64 {
        (self.fst_offset.get() as u64) << offset_shift
    }

    /// Size of the file system table (FST).
    #[inline]
    pub fn fst_size(&self, offset_shift: u8) -> u64 { (self.fst_size.get() as u64) << offset_shift }

    /// Maximum size of the file system table (FST) across multi-disc games.
    #[inline]
    pub fn fst_max_size(&self, offset_shift: u8) -> u64 {
        (self.fst_max_size.get() as u64) << offset_shift
    }
}

/// Debug and region information (bi2.bin), following the boot block.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BootInfo {
    /// Debug monitor size
    pub debug_mon_size: U32,
    /// Simulated memory size
    pub sim_mem_size: U32,
    /// Argument offset
    pub arg_offset: U32,
    /// Debug flag
    pub debug_flag: U32,
    /// Target resident kernel location
    pub trk_location: U32,
    /// Target resident kernel size
    pub trk_size: U32,
    /// Region code (see [`GcnRegion`])
    pub region_code: U32,
    /// Reserved
    _reserved1: [U32; 3],
    /// Maximum DOL size
    pub dol_limit: U32,
    /// Reserved
    _reserved2: U32,
}

static_assert!(size_of::<BootInfo>() == 48);

impl BootInfo {
    /// The region code, if it is a known value.
    #[inline]
    pub fn region(&self) -> Option<GcnRegion> { GcnRegion::from_u32(self.region_code.get()) }
}
