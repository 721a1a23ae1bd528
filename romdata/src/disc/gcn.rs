//! GameCube partition reader.

use std::{
    io,
    io::{Read, Seek, SeekFrom},
};

use tracing::{debug, warn};

use crate::{
    Error, Result, ResultContext,
    disc::{
        BOOT_BLOCK_ADDRESS, BootBlock, BootInfo, GCN_OFFSET_SHIFT,
        fst::{Dir, DirEntry, GcnFst},
    },
    read::DiscReader,
    util::{
        WindowedReader,
        read::{read_box_slice, read_from},
    },
};

/// Maximum accepted FST size. (1 MiB)
pub const MAX_FST_SIZE: u32 = 1024 * 1024;

/// Options for opening a partition.
#[derive(Debug, Clone)]
pub struct PartitionOptions {
    /// Shift applied to stored offsets and sizes. 0 for GameCube, 2 for Wii.
    pub offset_shift: u8,
    /// Largest FST, in bytes, that will be loaded. Larger values in the boot block are
    /// treated as corruption.
    pub max_fst_size: u32,
}

impl Default for PartitionOptions {
    fn default() -> Self { Self { offset_shift: GCN_OFFSET_SHIFT, max_fst_size: MAX_FST_SIZE } }
}

/// A file handle returned by [`GcnPartition::open`].
pub type PartitionFile<'a, R> = WindowedReader<&'a mut GcnPartition<R>>;

/// An unencrypted GameCube partition.
///
/// The boot block, boot info and FST are loaded lazily on first use. A failed load
/// is not memoized, so a later call retries the I/O. The partition itself stays
/// usable for size queries and raw reads even if the FST could not be loaded.
///
/// The partition implements [`Read`] and [`Seek`] with positions relative to the
/// start of the partition data.
pub struct GcnPartition<R> {
    reader: R,
    partition_offset: u64,
    partition_size: u64,
    data_offset: u64,
    data_size: u64,
    offset_shift: u8,
    max_fst_size: u32,
    boot: Option<(BootBlock, BootInfo)>,
    fst: Option<GcnFst>,
}

impl<R> GcnPartition<R>
where R: DiscReader
{
    /// Creates a partition starting at `partition_offset` within the disc.
    ///
    /// No I/O is performed.
    pub fn new(reader: R, partition_offset: u64, options: &PartitionOptions) -> Self {
        let size = reader.size();
        Self {
            reader,
            partition_offset,
            partition_size: size,
            data_offset: partition_offset,
            data_size: size,
            offset_shift: options.offset_shift,
            max_fst_size: options.max_fst_size,
            boot: None,
            fst: None,
        }
    }

    /// Absolute offset of the partition within the disc.
    #[inline]
    pub fn partition_offset(&self) -> u64 { self.partition_offset }

    /// Total size of the partition, including any headers and hashes.
    #[inline]
    pub fn partition_size(&self) -> u64 { self.partition_size }

    /// Size of the partition data, excluding headers and hashes.
    #[inline]
    pub fn data_size(&self) -> u64 { self.data_size }

    /// Offset shift applied to boot block and FST offsets.
    #[inline]
    pub fn offset_shift(&self) -> u8 { self.offset_shift }

    /// The underlying disc reader.
    #[inline]
    pub fn reader(&self) -> &R { &self.reader }

    /// Consumes the partition, returning the disc reader.
    #[inline]
    pub fn into_inner(self) -> R { self.reader }

    /// Loads the boot block and boot info, if they haven't been loaded yet.
    pub fn load_boot_block_and_info(&mut self) -> Result<()> {
        if self.boot.is_some() {
            return Ok(());
        }
        self.seek(SeekFrom::Start(BOOT_BLOCK_ADDRESS)).context("Seeking to boot block")?;
        let boot_block: BootBlock = read_from(self).context("Reading boot block")?;
        // bi2.bin immediately follows the boot block.
        let boot_info: BootInfo = read_from(self).context("Reading boot info")?;
        debug!(
            "Loaded boot block: DOL {:#X}, FST {:#X} ({:#X} bytes)",
            boot_block.dol_offset(self.offset_shift),
            boot_block.fst_offset(self.offset_shift),
            boot_block.fst_size(self.offset_shift)
        );
        self.boot = Some((boot_block, boot_info));
        Ok(())
    }

    /// The boot block. Loaded on first use.
    pub fn boot_block(&mut self) -> Result<&BootBlock> {
        self.load_boot_block_and_info()?;
        match &self.boot {
            Some((boot_block, _)) => Ok(boot_block),
            None => Err(Error::Other("Boot block not loaded".to_string())),
        }
    }

    /// The boot info (bi2.bin). Loaded on first use.
    pub fn boot_info(&mut self) -> Result<&BootInfo> {
        self.load_boot_block_and_info()?;
        match &self.boot {
            Some((_, boot_info)) => Ok(boot_info),
            None => Err(Error::Other("Boot info not loaded".to_string())),
        }
    }

    /// Loads the FST, if it hasn't been loaded yet.
    pub fn load_fst(&mut self) -> Result<()> {
        if self.fst.is_some() {
            return Ok(());
        }
        self.load_boot_block_and_info()?;
        let Some((boot_block, _)) = &self.boot else {
            return Err(Error::Other("Boot block not loaded".to_string()));
        };

        let shift = self.offset_shift;
        let fst_size = boot_block.fst_size.get();
        let fst_max_size = boot_block.fst_max_size.get();
        let limit = self.max_fst_size >> shift;
        if fst_size > limit || fst_max_size > limit {
            warn!(
                "FST size {:#X} (max {:#X}) exceeds limit {:#X}",
                (fst_size as u64) << shift,
                (fst_max_size as u64) << shift,
                self.max_fst_size
            );
            return Err(Error::DiscFormat(format!(
                "FST size {:#X} exceeds limit {:#X}",
                (fst_size.max(fst_max_size) as u64) << shift,
                self.max_fst_size
            )));
        } else if fst_size > fst_max_size {
            warn!("FST size {:#X} exceeds FST max size {:#X}", fst_size, fst_max_size);
            return Err(Error::DiscFormat(format!(
                "FST size {:#X} exceeds FST max size {:#X}",
                (fst_size as u64) << shift,
                (fst_max_size as u64) << shift
            )));
        }

        let fst_offset = boot_block.fst_offset(shift);
        let fst_len = boot_block.fst_size(shift) as usize;
        self.seek(SeekFrom::Start(fst_offset)).context("Seeking to FST offset")?;
        let raw_fst: Box<[u8]> = read_box_slice(self, fst_len).with_context(|| {
            format!("Reading partition FST (offset {:#X}, size {:#X})", fst_offset, fst_len)
        })?;

        let fst = GcnFst::new(&raw_fst, shift);
        if fst.has_errors() {
            warn!("FST at {:#X} is corrupt", fst_offset);
            return Err(Error::DiscFormat("FST is corrupt".to_string()));
        }
        debug!("Loaded FST: {} entries", fst.file_count());
        self.fst = Some(fst);
        Ok(())
    }

    /// The file system table. Loaded on first use.
    pub fn fst(&mut self) -> Result<&GcnFst> {
        self.load_fst()?;
        self.fst.as_ref().ok_or_else(|| Error::Other("FST not loaded".to_string()))
    }

    /// Estimated number of bytes in use by the partition.
    ///
    /// This is the end of the DOL or FST (whichever is later), plus the size of every
    /// file in the FST, plus any partition header and hash overhead.
    pub fn partition_size_used(&mut self) -> Result<u64> {
        self.load_fst()?;
        let (Some((boot_block, _)), Some(fst)) = (&self.boot, &self.fst) else {
            return Err(Error::Other("FST not loaded".to_string()));
        };

        // TODO: The DOL size isn't known, so a DOL placed after the FST only
        // contributes its offset. Needs the DOL header to fix.
        let dol_end = boot_block.dol_offset.get() as u64;
        let fst_end = boot_block.fst_offset.get() as u64 + boot_block.fst_size.get() as u64;
        let mut size = dol_end.max(fst_end) << self.offset_shift;
        size += fst.total_used_size().unwrap_or_default();
        size += self.partition_size - self.data_size;
        Ok(size)
    }

    /// Opens a directory.
    ///
    /// Entries are read with [`Dir::readdir`]. Dropping the handle closes it.
    pub fn opendir(&mut self, path: &str) -> Result<Dir<'_>> { self.fst()?.opendir(path) }

    /// Finds a regular file by path.
    pub fn find_file(&mut self, path: &str) -> Result<DirEntry> { self.fst()?.find_file(path) }

    /// Opens a file for reading.
    ///
    /// The file must lie entirely within the partition.
    pub fn open(&mut self, path: &str) -> Result<PartitionFile<'_, R>> {
        let entry = self.find_file(path)?;
        let offset = entry.offset;
        let size = entry.size as u64;
        let in_bounds = offset < self.partition_size
            && self.partition_size.checked_sub(size).is_some_and(|max| offset <= max);
        if !in_bounds {
            warn!(
                "File {} ({:#X}+{:#X}) is outside of the partition ({:#X} bytes)",
                path, offset, size, self.partition_size
            );
            return Err(Error::Io(
                format!("File {path} is outside of the partition"),
                io::Error::from(io::ErrorKind::UnexpectedEof),
            ));
        }
        WindowedReader::new(self, offset, size).with_context(|| format!("Opening file {path}"))
    }
}

impl<R> Read for GcnPartition<R>
where R: DiscReader
{
    // Unencrypted: data passes through unchanged.
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> { self.reader.read(buf) }
}

impl<R> Seek for GcnPartition<R>
where R: DiscReader
{
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let abs = match pos {
            SeekFrom::Start(p) => self.data_offset.checked_add(p),
            SeekFrom::End(p) => (self.data_offset + self.data_size).checked_add_signed(p),
            SeekFrom::Current(p) => self.reader.stream_position()?.checked_add_signed(p),
        };
        let Some(abs) = abs.filter(|&abs| abs >= self.data_offset) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek to a position before the start of the partition",
            ));
        };
        let result = self.reader.seek(SeekFrom::Start(abs))?;
        Ok(result - self.data_offset)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.reader.stream_position()?.saturating_sub(self.data_offset))
    }
}

impl<R> DiscReader for GcnPartition<R>
where R: DiscReader
{
    #[inline]
    fn size(&self) -> u64 { self.data_size }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        common::GcnRegion,
        disc::{WII_OFFSET_SHIFT, fst::FstBuilder},
        errno,
    };

    const FST_OFFSET: u64 = 0x2000;
    const DOL_OFFSET: u64 = 0x1E000;

    fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Builds a small GameCube image: boot block, bi2, FST and two files.
    fn build_disc(shift: u8) -> Vec<u8> {
        let mut builder = FstBuilder::new(shift);
        builder.add_file("files/a.txt", 0x8000, 5);
        builder.add_file("b.bin", 0x9000, 0x10);
        let fst = builder.finalize();

        let mut disc = vec![0u8; 0x20000];
        disc[..6].copy_from_slice(b"GTST01");
        disc[0x1C..0x20].copy_from_slice(&crate::disc::GCN_MAGIC);
        write_u32(&mut disc, 0x420, (DOL_OFFSET >> shift) as u32);
        write_u32(&mut disc, 0x424, (FST_OFFSET >> shift) as u32);
        write_u32(&mut disc, 0x428, (fst.len() as u32) >> shift);
        write_u32(&mut disc, 0x42C, (fst.len() as u32) >> shift);
        write_u32(&mut disc, 0x440 + 0x18, GcnRegion::Eur as u32);
        let fst_offset = FST_OFFSET as usize;
        disc[fst_offset..fst_offset + fst.len()].copy_from_slice(&fst);
        disc[0x8000..0x8005].copy_from_slice(b"hello");
        disc[0x9000..0x9010].copy_from_slice(&[0x42; 0x10]);
        disc
    }

    fn open_partition(disc: Vec<u8>, shift: u8) -> GcnPartition<Cursor<Vec<u8>>> {
        let options = PartitionOptions { offset_shift: shift, ..Default::default() };
        GcnPartition::new(Cursor::new(disc), 0, &options)
    }

    #[test]
    fn test_boot_block_and_info() {
        let mut partition = open_partition(build_disc(0), 0);
        assert_eq!(partition.partition_size(), 0x20000);
        assert_eq!(partition.boot_block().unwrap().fst_offset(0), FST_OFFSET);
        assert_eq!(partition.boot_info().unwrap().region(), Some(GcnRegion::Eur));
    }

    #[test]
    fn test_read_files() {
        let mut partition = open_partition(build_disc(0), 0);
        let mut s = String::new();
        partition.open("/files/a.txt").unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "hello");

        let mut file = partition.open("b.bin").unwrap();
        assert_eq!(file.len(), 0x10);
        let mut buf = vec![];
        file.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, [0x42; 0x10]);

        assert!(matches!(partition.open("/files"), Err(Error::IsADirectory(_))));
        let err = partition.open("/missing").err().unwrap();
        assert_eq!(err.errno(), -errno::ENOENT);
    }

    #[test]
    fn test_directory_listing() {
        let mut partition = open_partition(build_disc(0), 0);
        let names = partition.opendir("/").unwrap().map(|e| e.name.to_string()).collect::<Vec<_>>();
        assert_eq!(names, ["files", "b.bin"]);

        let mut dir = partition.opendir("/files").unwrap();
        let entry = dir.readdir().unwrap();
        assert_eq!((&*entry.name, entry.offset, entry.size), ("a.txt", 0x8000, 5));
        assert!(dir.readdir().is_none());
        drop(dir);
        assert_eq!(partition.fst().unwrap().open_dir_count(), 0);
    }

    #[test]
    fn test_wii_offset_shift() {
        let mut partition = open_partition(build_disc(WII_OFFSET_SHIFT), WII_OFFSET_SHIFT);
        // The last name in the string table survives the 4-byte size granularity.
        let fst_size = partition.boot_block().unwrap().fst_size(WII_OFFSET_SHIFT);
        assert_eq!(fst_size % 4, 0);
        assert_eq!(partition.fst().unwrap().file_count(), 4);
        assert!(partition.find_file("/files/a.txt").is_ok());
        let entry = partition.find_file("/b.bin").unwrap();
        assert_eq!(entry.offset, 0x9000);
        let mut buf = [0u8; 0x10];
        partition.open("/b.bin").unwrap().read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0x42; 0x10]);
    }

    #[test]
    fn test_partition_size_used() {
        let disc = build_disc(0);
        let fst_len = {
            let mut partition = open_partition(disc.clone(), 0);
            partition.boot_block().unwrap().fst_size(0)
        };
        let mut partition = open_partition(disc, 0);
        let expected = DOL_OFFSET.max(FST_OFFSET + fst_len) + 5 + 0x10;
        assert_eq!(partition.partition_size_used().unwrap(), expected);
    }

    #[test]
    fn test_open_out_of_bounds() {
        let mut disc = build_disc(0);
        // Truncate the image so b.bin (0x9000+0x10) runs past the end.
        disc.truncate(0x9008);
        let mut partition = open_partition(disc, 0);
        let err = partition.open("/b.bin").err().unwrap();
        assert!(matches!(err, Error::Io(_, _)));
        assert_eq!(err.errno(), -errno::EIO);
        // Files within bounds still open.
        assert!(partition.open("/files/a.txt").is_ok());
    }

    #[test]
    fn test_open_offset_at_end() {
        let mut disc = build_disc(0);
        disc.truncate(0x9000);
        let mut partition = open_partition(disc, 0);
        assert!(partition.open("/b.bin").is_err());
    }

    #[test]
    fn test_oversized_fst_rejected() {
        let mut disc = build_disc(0);
        write_u32(&mut disc, 0x428, MAX_FST_SIZE + 1);
        write_u32(&mut disc, 0x42C, MAX_FST_SIZE + 1);
        let mut partition = open_partition(disc, 0);
        let err = partition.opendir("/").err().unwrap();
        assert!(matches!(err, Error::DiscFormat(_)));
        // Boot data stays loaded; the partition is still usable.
        assert!(partition.boot_info().is_ok());
        assert_eq!(partition.data_size(), 0x20000);
    }

    #[test]
    fn test_oversized_fst_rejected_wii() {
        let mut disc = build_disc(WII_OFFSET_SHIFT);
        // 0x40001 << 2 is just over 1 MiB.
        write_u32(&mut disc, 0x42C, (MAX_FST_SIZE >> 2) + 1);
        let mut partition = open_partition(disc, WII_OFFSET_SHIFT);
        assert!(matches!(partition.fst(), Err(Error::DiscFormat(_))));
    }

    #[test]
    fn test_fst_size_exceeds_max_size() {
        let mut disc = build_disc(0);
        write_u32(&mut disc, 0x42C, 0x10);
        let mut partition = open_partition(disc, 0);
        assert!(matches!(partition.load_fst(), Err(Error::DiscFormat(_))));
    }

    #[test]
    fn test_corrupt_fst_rejected() {
        let mut disc = build_disc(0);
        // Root file count of 1.
        write_u32(&mut disc, FST_OFFSET as usize + 8, 1);
        let mut partition = open_partition(disc, 0);
        let err = partition.find_file("/b.bin").err().unwrap();
        assert_eq!(err.errno(), -errno::EIO);
    }

    #[test]
    fn test_short_read_is_retried() {
        let disc = build_disc(0);
        let mut partition = open_partition(disc[..0x430].to_vec(), 0);
        assert!(partition.load_boot_block_and_info().is_err());
        assert!(partition.load_boot_block_and_info().is_err());

        // Failed loads aren't memoized: swap in a complete image and retry.
        let mut partition = open_partition(disc, 0);
        partition.reader.get_mut().truncate(0x430);
        assert!(partition.fst().is_err());
        *partition.reader.get_mut() = build_disc(0);
        assert!(partition.fst().is_ok());
    }

    #[test]
    fn test_partition_offset() {
        let disc = build_disc(0);
        let mut nested = vec![0xFFu8; 0x1000];
        nested.extend_from_slice(&disc);
        let options = PartitionOptions::default();
        let mut partition = GcnPartition::new(Cursor::new(nested), 0x1000, &options);
        assert_eq!(partition.partition_offset(), 0x1000);
        assert_eq!(partition.seek(SeekFrom::Start(0)).unwrap(), 0);
        assert_eq!(partition.reader().position(), 0x1000);
        let mut id = [0u8; 6];
        partition.read_exact(&mut id).unwrap();
        assert_eq!(&id, b"GTST01");
        assert_eq!(partition.stream_position().unwrap(), 6);
        assert!(partition.seek(SeekFrom::Current(-100)).is_err());

        let mut s = String::new();
        partition.open("/files/a.txt").unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "hello");
    }
}
