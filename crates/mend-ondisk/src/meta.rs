//! Inode, directory leaf, and indirect block layouts.
//!
//! Each parse checks its magic first so the scan pass can cheaply probe
//! "is this block an inode?" — a wrong magic is `InvalidMagic`, anything
//! past the magic that fails is a structural violation of a block that
//! claimed to be typed metadata.

use crate::FileKind;
use mend_types::{
    read_le_u16, read_le_u32, read_le_u64, write_le_u16, write_le_u32, write_le_u64, BlockNumber,
    ParseError, MAX_NAME_LEN, MENDFS_INDIRECT_MAGIC, MENDFS_INODE_MAGIC, MENDFS_LEAF_MAGIC,
};

/// Inode block header: magic u32, kind u8, pad[3], link_count u32,
/// ptr_count u32, size u64.
pub const INODE_HEADER_LEN: usize = 24;
/// Leaf block header: magic u32, entry_count u16, pad u16.
pub const LEAF_HEADER_LEN: usize = 8;
/// Indirect block header: magic u32, ptr_count u32.
pub const INDIRECT_HEADER_LEN: usize = 8;

/// Fixed per-entry overhead before the name bytes: target u64, kind u8,
/// name_len u8.
const LEAF_ENTRY_FIXED: usize = 10;

// ── Inode blocks ──────────────────────────────────────────────────────────

/// Parsed inode block.
///
/// `ptrs` are the inode's owned metadata blocks: directory leaves for
/// directories, indirect blocks for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    pub kind: FileKind,
    pub link_count: u32,
    pub size: u64,
    pub ptrs: Vec<BlockNumber>,
}

impl DiskInode {
    /// Maximum owned-pointer count for a given block size.
    #[must_use]
    pub fn max_ptrs(block_size: usize) -> usize {
        block_size.saturating_sub(INODE_HEADER_LEN) / 8
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(data, 0)?;
        if magic != MENDFS_INODE_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(MENDFS_INODE_MAGIC),
                actual: u64::from(magic),
            });
        }
        let kind_raw = mend_types::ensure_slice(data, 4, 1)?[0];
        let kind = FileKind::from_raw(kind_raw)?;
        let link_count = read_le_u32(data, 8)?;
        let ptr_count = read_le_u32(data, 12)? as usize;
        let size = read_le_u64(data, 16)?;
        if ptr_count > Self::max_ptrs(data.len()) {
            return Err(ParseError::InvalidField {
                field: "ptr_count",
                reason: "pointer list exceeds block",
            });
        }
        let mut ptrs = Vec::with_capacity(ptr_count);
        let mut offset = INODE_HEADER_LEN;
        for _ in 0..ptr_count {
            ptrs.push(BlockNumber(read_le_u64(data, offset)?));
            offset += 8;
        }
        Ok(Self {
            kind,
            link_count,
            size,
            ptrs,
        })
    }

    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>, ParseError> {
        if self.ptrs.len() > Self::max_ptrs(block_size) {
            return Err(ParseError::InvalidField {
                field: "ptr_count",
                reason: "pointer list exceeds block",
            });
        }
        let mut data = vec![0_u8; block_size];
        write_le_u32(&mut data, 0, MENDFS_INODE_MAGIC)?;
        data[4] = self.kind.as_u8();
        write_le_u32(&mut data, 8, self.link_count)?;
        write_le_u32(
            &mut data,
            12,
            mend_types::usize_to_u32(self.ptrs.len(), "ptr_count")?,
        )?;
        write_le_u64(&mut data, 16, self.size)?;
        let mut offset = INODE_HEADER_LEN;
        for ptr in &self.ptrs {
            write_le_u64(&mut data, offset, ptr.0)?;
            offset += 8;
        }
        Ok(data)
    }
}

// ── Directory leaf blocks ─────────────────────────────────────────────────

/// One packed directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub target: BlockNumber,
    pub kind: FileKind,
    pub name: Vec<u8>,
}

impl LeafEntry {
    /// Encoded length of an entry with an `name_len`-byte name.
    #[must_use]
    pub fn encoded_len(name_len: usize) -> usize {
        LEAF_ENTRY_FIXED + name_len
    }
}

/// Parsed directory leaf block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirLeaf {
    pub entries: Vec<LeafEntry>,
}

impl DirLeaf {
    /// Bytes available for packed entries in one leaf block.
    #[must_use]
    pub fn capacity(block_size: usize) -> usize {
        block_size.saturating_sub(LEAF_HEADER_LEN)
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(data, 0)?;
        if magic != MENDFS_LEAF_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(MENDFS_LEAF_MAGIC),
                actual: u64::from(magic),
            });
        }
        let entry_count = read_le_u16(data, 4)?;
        let mut entries = Vec::with_capacity(usize::from(entry_count));
        let mut offset = LEAF_HEADER_LEN;
        for _ in 0..entry_count {
            let target = BlockNumber(read_le_u64(data, offset)?);
            let kind_raw = *data
                .get(offset + 8)
                .ok_or(ParseError::InsufficientData {
                    needed: 1,
                    offset: offset + 8,
                    actual: 0,
                })?;
            let kind = FileKind::from_raw(kind_raw)?;
            let name_len = usize::from(*data.get(offset + 9).ok_or(
                ParseError::InsufficientData {
                    needed: 1,
                    offset: offset + 9,
                    actual: 0,
                },
            )?);
            if name_len == 0 {
                return Err(ParseError::InvalidField {
                    field: "name_len",
                    reason: "directory entry name cannot be empty",
                });
            }
            let name_start = offset + LEAF_ENTRY_FIXED;
            let name = mend_types::ensure_slice(data, name_start, name_len)?.to_vec();
            entries.push(LeafEntry { target, kind, name });
            offset = name_start + name_len;
        }
        Ok(Self { entries })
    }

    /// Total packed size of `entries`.
    #[must_use]
    pub fn packed_len(entries: &[LeafEntry]) -> usize {
        entries
            .iter()
            .map(|entry| LeafEntry::encoded_len(entry.name.len()))
            .sum()
    }

    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>, ParseError> {
        if Self::packed_len(&self.entries) > Self::capacity(block_size) {
            return Err(ParseError::InvalidField {
                field: "entries",
                reason: "packed entries exceed leaf capacity",
            });
        }
        let mut data = vec![0_u8; block_size];
        write_le_u32(&mut data, 0, MENDFS_LEAF_MAGIC)?;
        write_le_u16(
            &mut data,
            4,
            u16::try_from(self.entries.len()).map_err(|_| ParseError::IntegerConversion {
                field: "entry_count",
            })?,
        )?;
        let mut offset = LEAF_HEADER_LEN;
        for entry in &self.entries {
            if entry.name.is_empty() || entry.name.len() > MAX_NAME_LEN {
                return Err(ParseError::InvalidField {
                    field: "name_len",
                    reason: "must be 1..=255",
                });
            }
            write_le_u64(&mut data, offset, entry.target.0)?;
            data[offset + 8] = entry.kind.as_u8();
            data[offset + 9] = entry.name.len() as u8;
            let name_start = offset + LEAF_ENTRY_FIXED;
            data[name_start..name_start + entry.name.len()].copy_from_slice(&entry.name);
            offset = name_start + entry.name.len();
        }
        Ok(data)
    }
}

// ── Indirect blocks ───────────────────────────────────────────────────────

/// Parsed indirect block: a flat list of owned data block addresses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Indirect {
    pub ptrs: Vec<BlockNumber>,
}

impl Indirect {
    #[must_use]
    pub fn max_ptrs(block_size: usize) -> usize {
        block_size.saturating_sub(INDIRECT_HEADER_LEN) / 8
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u32(data, 0)?;
        if magic != MENDFS_INDIRECT_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(MENDFS_INDIRECT_MAGIC),
                actual: u64::from(magic),
            });
        }
        let ptr_count = read_le_u32(data, 4)? as usize;
        if ptr_count > Self::max_ptrs(data.len()) {
            return Err(ParseError::InvalidField {
                field: "ptr_count",
                reason: "pointer list exceeds block",
            });
        }
        let mut ptrs = Vec::with_capacity(ptr_count);
        let mut offset = INDIRECT_HEADER_LEN;
        for _ in 0..ptr_count {
            ptrs.push(BlockNumber(read_le_u64(data, offset)?));
            offset += 8;
        }
        Ok(Self { ptrs })
    }

    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>, ParseError> {
        if self.ptrs.len() > Self::max_ptrs(block_size) {
            return Err(ParseError::InvalidField {
                field: "ptr_count",
                reason: "pointer list exceeds block",
            });
        }
        let mut data = vec![0_u8; block_size];
        write_le_u32(&mut data, 0, MENDFS_INDIRECT_MAGIC)?;
        write_le_u32(
            &mut data,
            4,
            mend_types::usize_to_u32(self.ptrs.len(), "ptr_count")?,
        )?;
        let mut offset = INDIRECT_HEADER_LEN;
        for ptr in &self.ptrs {
            write_le_u64(&mut data, offset, ptr.0)?;
            offset += 8;
        }
        Ok(data)
    }
}
