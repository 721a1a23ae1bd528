//! File system table (FST) types.
//!
//! The FST is a flat array of 12-byte [`Node`]s followed by a string table. The root
//! node (index 0) stores the total node count in its length field. Each directory
//! stores the index one past the last node of its subtree, which lets traversal skip
//! an entire subdirectory in one step.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    ffi::CStr,
    iter::FusedIterator,
    mem::size_of,
    sync::Arc,
};

use itertools::Itertools;
use tracing::debug;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, big_endian::*};

use crate::{
    Error, Result,
    common::EntryKind,
    util::{array_ref, static_assert, text::cp1252_sjis_to_utf8},
};

/// Size in bytes of a single FST node.
pub const NODE_SIZE: usize = size_of::<Node>();

/// An individual file system node.
#[derive(Copy, Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct Node {
    kind: u8,
    // u24 big-endian
    name_offset: [u8; 3],
    offset: U32,
    length: U32,
}

static_assert!(size_of::<Node>() == 12);

impl Node {
    /// Create a new node. `offset` is the true byte offset for files; it is stored
    /// shifted right by `offset_shift`.
    #[inline]
    pub fn new(
        kind: EntryKind,
        name_offset: u32,
        offset: u64,
        length: u32,
        offset_shift: u8,
    ) -> Self {
        let name_offset_bytes = name_offset.to_be_bytes();
        Self {
            kind: match kind {
                EntryKind::File => 0,
                EntryKind::Directory => 1,
            },
            name_offset: *array_ref![name_offset_bytes, 1, 3],
            offset: U32::new(match kind {
                EntryKind::File => (offset >> offset_shift) as u32,
                EntryKind::Directory => offset as u32,
            }),
            length: U32::new(length),
        }
    }

    /// Whether the node is a directory. Any type tag other than 1 is treated as a file.
    #[inline]
    pub fn is_dir(&self) -> bool { self.kind == 1 }

    /// Whether the node is a file.
    #[inline]
    pub fn is_file(&self) -> bool { !self.is_dir() }

    /// File system node kind.
    #[inline]
    pub fn kind(&self) -> EntryKind {
        if self.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// Offset in the string table to the filename.
    #[inline]
    pub fn name_offset(&self) -> u32 {
        u32::from_be_bytes([0, self.name_offset[0], self.name_offset[1], self.name_offset[2]])
    }

    /// For files, this is the partition offset of the file data.
    ///
    /// For directories, this is the parent node index in the FST.
    #[inline]
    pub fn offset(&self, offset_shift: u8) -> u64 {
        if self.is_file() {
            (self.offset.get() as u64) << offset_shift
        } else {
            self.offset.get() as u64
        }
    }

    /// For files, this is the byte size of the file.
    ///
    /// For directories, this is the index one past the last node in the subtree.
    /// For the root, this is the total number of nodes.
    #[inline]
    pub fn length(&self) -> u32 { self.length.get() }

    /// Set the length of the node. See [`Node::length`] for details.
    #[inline]
    pub fn set_length(&mut self, length: u32) { self.length.set(length); }
}

/// A directory entry returned by [`GcnFst::find_path`], [`GcnFst::find_file`] and
/// [`Dir`] iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Node index in the FST.
    pub index: u32,
    /// Entry kind.
    pub kind: EntryKind,
    /// Entry name. Empty for the root directory.
    pub name: Arc<str>,
    /// Byte offset of the file data within the partition. Always 0 for directories.
    pub offset: u64,
    /// Byte size of the file. Always 0 for directories.
    pub size: u32,
}

impl DirEntry {
    /// Whether the entry is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool { self.kind == EntryKind::Directory }

    /// Whether the entry is a regular file.
    #[inline]
    pub fn is_file(&self) -> bool { self.kind == EntryKind::File }
}

/// A parsed GameCube/Wii file system table.
///
/// Structural problems found while parsing or traversing set a sticky error flag
/// (see [`GcnFst::has_errors`]). Once set, results from this FST must not be trusted.
pub struct GcnFst {
    nodes: Box<[Node]>,
    // Always NUL-terminated: one extra NUL is appended to the source data.
    string_table: Box<[u8]>,
    offset_shift: u8,
    has_errors: Cell<bool>,
    open_dirs: Cell<usize>,
    names: RefCell<HashMap<u32, Arc<str>>>,
}

impl GcnFst {
    /// Parses an FST.
    ///
    /// `offset_shift` is 0 for GameCube and 2 for Wii.
    ///
    /// This never fails outright. If the data is invalid, the returned FST is not open
    /// and [`GcnFst::has_errors`] is set.
    pub fn new(buf: &[u8], offset_shift: u8) -> Self {
        match Self::parse(buf) {
            Ok((nodes, string_table)) => {
                let mut names = HashMap::new();
                // The root node has no name.
                names.reserve(nodes.len() - 1);
                Self {
                    nodes,
                    string_table,
                    offset_shift,
                    has_errors: Cell::new(false),
                    open_dirs: Cell::new(0),
                    names: RefCell::new(names),
                }
            }
            Err(reason) => {
                debug!("Rejecting FST ({} bytes): {}", buf.len(), reason);
                Self {
                    nodes: Box::default(),
                    string_table: Box::default(),
                    offset_shift,
                    has_errors: Cell::new(true),
                    open_dirs: Cell::new(0),
                    names: RefCell::default(),
                }
            }
        }
    }

    fn parse(buf: &[u8]) -> Result<(Box<[Node]>, Box<[u8]>), &'static str> {
        let Ok((root_node, _)) = Node::ref_from_prefix(buf) else {
            return Err("FST root node not found");
        };
        // 0 entries is impossible, and 1 entry is only the root directory.
        let file_count = root_node.length() as usize;
        if file_count <= 1 || file_count > buf.len() / NODE_SIZE {
            return Err("FST file count out of range");
        }
        // String table starts after the last node
        let string_base = file_count * NODE_SIZE;
        if string_base >= buf.len() {
            return Err("FST string table out of bounds");
        }
        let (node_buf, string_table) = buf.split_at(string_base);
        if string_table.contains(&b'/') {
            return Err("FST string table contains '/'");
        }
        let nodes = <[Node]>::ref_from_bytes(node_buf).map_err(|_| "FST node table misaligned")?;
        let mut table = Vec::with_capacity(string_table.len() + 1);
        table.extend_from_slice(string_table);
        table.push(0);
        Ok((Box::from(nodes), table.into_boxed_slice()))
    }

    /// Parses an FST, returning an error if it is invalid.
    pub fn try_new(buf: &[u8], offset_shift: u8) -> Result<Self> {
        let fst = Self::new(buf, offset_shift);
        if fst.has_errors() {
            return Err(Error::DiscFormat("FST is invalid".to_string()));
        }
        Ok(fst)
    }

    /// Whether the FST was parsed successfully.
    #[inline]
    pub fn is_open(&self) -> bool { !self.nodes.is_empty() }

    /// Whether any structural errors have been detected. This flag is sticky.
    #[inline]
    pub fn has_errors(&self) -> bool { self.has_errors.get() }

    /// File offset shift. (0 = GameCube, 2 = Wii)
    #[inline]
    pub fn offset_shift(&self) -> u8 { self.offset_shift }

    /// Total number of nodes, including the root directory.
    #[inline]
    pub fn file_count(&self) -> u32 { self.nodes.len() as u32 }

    /// Count the number of files (excluding directories) in the FST.
    pub fn num_files(&self) -> usize { self.nodes.iter().skip(1).filter(|n| n.is_file()).count() }

    /// Number of directory handles currently open.
    #[inline]
    pub fn open_dir_count(&self) -> usize { self.open_dirs.get() }

    #[inline]
    fn set_errors(&self) { self.has_errors.set(true); }

    /// Get a node by index.
    #[inline]
    pub fn node(&self, idx: u32) -> Option<&Node> { self.nodes.get(idx as usize) }

    /// Get the name of a node, decoded and memoized by string table offset.
    ///
    /// Returns `None` if the name offset is out of range. The root node has no name.
    fn node_name(&self, idx: u32, node: &Node) -> Option<Arc<str>> {
        if idx == 0 {
            return None;
        }
        let offset = node.name_offset();
        // The final byte of the string table is the appended NUL.
        if offset as usize >= self.string_table.len() - 1 {
            return None;
        }
        if let Some(name) = self.names.borrow().get(&offset) {
            return Some(name.clone());
        }
        let name_buf = &self.string_table[offset as usize..];
        let c_string = CStr::from_bytes_until_nul(name_buf).ok()?;
        let name: Arc<str> = Arc::from(cp1252_sjis_to_utf8(c_string.to_bytes()));
        self.names.borrow_mut().insert(offset, name.clone());
        Some(name)
    }

    fn make_entry(&self, idx: u32, node: &Node, name: Arc<str>) -> DirEntry {
        if node.is_dir() {
            // offset and size are not valid for directories.
            DirEntry { index: idx, kind: EntryKind::Directory, name, offset: 0, size: 0 }
        } else {
            DirEntry {
                index: idx,
                kind: EntryKind::File,
                name,
                offset: node.offset(self.offset_shift),
                size: node.length(),
            }
        }
    }

    /// Resolves an absolute path to a node index.
    ///
    /// Names are compared case-sensitively. Returns `None` if the path does not exist,
    /// or if a cycle is detected in the table.
    fn find_index(&self, path: &str) -> Option<u32> {
        let root = self.node(0)?;
        let mut components = path.split('/').filter(|s| !s.is_empty()).peekable();
        if components.peek().is_none() {
            // Empty path or "/".
            return Some(0);
        }

        // Indexes already visited in the current directory.
        // Guards against infinite loops if the FST is corrupted.
        let mut visited = HashSet::new();
        let mut idx = 1u32;
        // Index *after* the last node in the current directory.
        let mut last = root.length();
        while let Some(component) = components.next() {
            visited.clear();
            let mut found = None;
            while idx < last {
                if !visited.insert(idx) {
                    debug!("FST: cycle detected at node {}", idx);
                    return None;
                }
                let node = self.node(idx)?;
                if self.node_name(idx, node).is_some_and(|name| *name == *component) {
                    found = Some(node);
                    break;
                }
                idx = if node.is_dir() {
                    // Skip the subdirectory's contents.
                    node.length()
                } else {
                    idx + 1
                };
            }

            let node = found?;
            if node.is_dir() {
                // Descend into the directory.
                last = node.length();
                if components.peek().is_some() {
                    idx += 1;
                }
            } else if components.peek().is_some() {
                // A file can't have children.
                return None;
            }
        }
        Some(idx)
    }

    /// Finds a file or directory by absolute path.
    ///
    /// A missing leading slash is assumed, and trailing slashes are ignored.
    /// `""` and `"/"` resolve to the root directory.
    pub fn find_path(&self, path: &str) -> Option<DirEntry> {
        let idx = self.find_index(path)?;
        let node = self.node(idx)?;
        let name = self.node_name(idx, node).unwrap_or_else(|| Arc::from(""));
        Some(self.make_entry(idx, node, name))
    }

    /// Finds a regular file by absolute path.
    pub fn find_file(&self, path: &str) -> Result<DirEntry> {
        let entry = self.find_path(path).ok_or_else(|| Error::NotFound(path.to_string()))?;
        if entry.is_dir() {
            return Err(Error::IsADirectory(path.to_string()));
        }
        Ok(entry)
    }

    /// Opens a directory for reading.
    pub fn opendir(&self, path: &str) -> Result<Dir<'_>> {
        if !self.is_open() {
            return Err(Error::DiscFormat("FST is not loaded".to_string()));
        }
        let idx = self.find_index(path).ok_or_else(|| Error::NotFound(path.to_string()))?;
        let node = self.node(idx).ok_or_else(|| Error::NotFound(path.to_string()))?;
        if !node.is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        self.open_dirs.set(self.open_dirs.get() + 1);
        Ok(Dir { fst: self, dir_idx: idx, idx, done: false })
    }

    /// Closes a directory. Equivalent to dropping it.
    #[inline]
    pub fn closedir(&self, dir: Dir<'_>) { drop(dir) }

    /// Total size of all files, in bytes.
    ///
    /// Scans the node table directly instead of walking directories.
    /// Returns `None` if the FST is not open.
    pub fn total_used_size(&self) -> Option<u64> {
        if !self.is_open() {
            return None;
        }
        Some(self.nodes.iter().skip(1).filter(|n| n.is_file()).map(|n| n.length() as u64).sum())
    }

    /// Iterate over every node in the FST except the root, in table order.
    #[inline]
    pub fn iter(&self) -> FstIter<'_> { FstIter { fst: self, idx: 1, segments: vec![] } }
}

impl Drop for GcnFst {
    fn drop(&mut self) {
        debug_assert_eq!(self.open_dirs.get(), 0, "FST dropped with open directories");
    }
}

/// An open directory in a [`GcnFst`].
///
/// Iterating yields the direct children of the directory. Iteration ends early if a
/// corrupt entry is found; check [`GcnFst::has_errors`] to tell the two apart.
pub struct Dir<'a> {
    fst: &'a GcnFst,
    dir_idx: u32,
    idx: u32,
    done: bool,
}

impl Dir<'_> {
    /// Node index of the directory.
    #[inline]
    pub fn index(&self) -> u32 { self.dir_idx }

    /// Read the next directory entry. Returns `None` at the end of the directory or on error.
    pub fn readdir(&mut self) -> Option<DirEntry> {
        if self.done {
            return None;
        }
        let entry = self.advance();
        if entry.is_none() {
            self.done = true;
        }
        entry
    }

    fn advance(&mut self) -> Option<DirEntry> {
        let fst = self.fst;
        let dir_node = fst.node(self.dir_idx)?;
        let node = fst.node(self.idx)?;

        let idx = if self.idx != self.dir_idx && node.is_dir() {
            // Skip over this subdirectory.
            let next = node.length();
            if next <= self.idx {
                // Seeking backwards, or looping to the same entry.
                fst.set_errors();
                return None;
            }
            next
        } else {
            self.idx + 1
        };

        // The directory's length is the index *after* its last node,
        // for both the root directory and subdirectories.
        if idx >= dir_node.length() {
            return None;
        }

        self.idx = idx;
        let node = fst.node(idx)?;
        match fst.node_name(idx, node) {
            Some(name) if !name.is_empty() => Some(fst.make_entry(idx, node, name)),
            _ => {
                fst.set_errors();
                None
            }
        }
    }
}

impl Iterator for Dir<'_> {
    type Item = DirEntry;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> { self.readdir() }
}

impl FusedIterator for Dir<'_> {}

impl Drop for Dir<'_> {
    fn drop(&mut self) {
        let count = self.fst.open_dirs.get();
        debug_assert!(count > 0);
        self.fst.open_dirs.set(count.saturating_sub(1));
    }
}

/// Iterator over the nodes in an FST.
///
/// For each node, the iterator yields the directory entry and the full path to the
/// node (separated by `/`, without a leading slash).
pub struct FstIter<'a> {
    fst: &'a GcnFst,
    idx: u32,
    segments: Vec<(Arc<str>, u32)>,
}

impl Iterator for FstIter<'_> {
    type Item = (DirEntry, String);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.idx;
        let node = self.fst.node(idx)?;
        let name = self.fst.node_name(idx, node).unwrap_or_else(|| Arc::from("<invalid>"));
        self.idx += 1;

        // Remove ended path segments
        let new_size = self.segments.iter().take_while(|(_, end)| *end > idx).count();
        self.segments.truncate(new_size);

        // Add the new path segment
        let end = if node.is_dir() { node.length() } else { idx + 1 };
        self.segments.push((name.clone(), end));
        let path = self.segments.iter().map(|(name, _)| name.as_ref()).join("/");
        Some((self.fst.make_entry(idx, node, name), path))
    }
}

/// A builder for creating a file system table (FST).
pub struct FstBuilder {
    nodes: Vec<Node>,
    string_table: Vec<u8>,
    stack: Vec<(String, u32)>,
    offset_shift: u8,
}

impl FstBuilder {
    /// Create a new FST builder.
    pub fn new(offset_shift: u8) -> Self {
        let mut builder =
            Self { nodes: vec![], string_table: vec![], stack: vec![], offset_shift };
        builder.add_node(EntryKind::Directory, "", 0, 0);
        builder
    }

    /// Add a file to the FST. All paths within a directory must be added sequentially,
    /// otherwise the output FST will be invalid.
    pub fn add_file(&mut self, path: &str, offset: u64, size: u32) {
        let components = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
        let Some((name, dirs)) = components.split_last() else {
            return;
        };
        self.enter(dirs);
        self.add_node(EntryKind::File, name, offset, size);
    }

    /// Add a directory to the FST, which may be empty.
    pub fn add_dir(&mut self, path: &str) {
        let components = path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
        self.enter(&components);
    }

    fn enter(&mut self, dirs: &[&str]) {
        // Pop directories that are not a prefix of this path
        let common =
            self.stack.iter().zip(dirs).take_while(|((name, _), dir)| name == *dir).count();
        while self.stack.len() > common {
            self.pop_dir();
        }
        // Push new directories
        for dir in &dirs[common..] {
            let parent = self.stack.last().map_or(0, |(_, idx)| *idx);
            let idx = self.add_node(EntryKind::Directory, dir, parent as u64, 0);
            self.stack.push((dir.to_string(), idx));
        }
    }

    fn pop_dir(&mut self) {
        if let Some((_, idx)) = self.stack.pop() {
            let length = self.nodes.len() as u32;
            self.nodes[idx as usize].set_length(length);
        }
    }

    /// Finalize the FST and return the serialized data.
    ///
    /// The result is padded so its size is representable after shifting.
    pub fn finalize(mut self) -> Box<[u8]> {
        while !self.stack.is_empty() {
            self.pop_dir();
        }
        let node_count = self.nodes.len() as u32;
        self.nodes[0].set_length(node_count);

        let mut data = Vec::with_capacity(self.nodes.as_bytes().len() + self.string_table.len());
        data.extend_from_slice(self.nodes.as_bytes());
        data.extend_from_slice(&self.string_table);
        data.resize(data.len().next_multiple_of(1 << self.offset_shift), 0);
        data.into_boxed_slice()
    }

    fn add_node(&mut self, kind: EntryKind, name: &str, offset: u64, length: u32) -> u32 {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(name);
        // Reuse an existing string table entry if possible
        let mut name_offset = 0;
        while name_offset < self.string_table.len() {
            let Ok(existing) = CStr::from_bytes_until_nul(&self.string_table[name_offset..]) else {
                break;
            };
            if existing.to_bytes() == bytes.as_ref() {
                break;
            }
            name_offset += existing.to_bytes_with_nul().len();
        }
        if name_offset >= self.string_table.len() {
            name_offset = self.string_table.len();
            self.string_table.extend_from_slice(bytes.as_ref());
            self.string_table.push(0);
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node::new(kind, name_offset as u32, offset, length, self.offset_shift));
        idx
    }
}
