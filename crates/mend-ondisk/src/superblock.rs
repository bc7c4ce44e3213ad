//! Superblock parsing and geometry validation.
//!
//! The superblock occupies block 0 and supplies everything the checker
//! needs at startup: block size, the data region bounds, the allocation
//! bitmap location, the root inode address, and the system inode set
//! (journals, inode table, resource-group index, statfs, quota). System
//! inode slots
//! holding zero mean "not present" — block 0 is the superblock and can
//! never be an inode.

use crate::bitmap;
use mend_types::{
    read_le_u32, read_le_u64, write_le_u32, write_le_u64, BlockNumber, BlockSize, ParseError,
    MAX_JOURNALS, MENDFS_SUPER_MAGIC,
};

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_BLOCK_SIZE: usize = 12;
const OFF_FIRST_DATA: usize = 16;
const OFF_LAST_FS: usize = 24;
const OFF_ROOT: usize = 32;
const OFF_BITMAP_START: usize = 40;
const OFF_BITMAP_BLOCKS: usize = 48;
const OFF_JOURNAL_COUNT: usize = 52;
const OFF_JOURNALS: usize = 56;

/// Size of the fixed superblock header before the journal list.
pub const SUPERBLOCK_FIXED_LEN: usize = OFF_JOURNALS;
/// Number of trailing system inode slots (itable, rindex, statfs, quota).
const TAIL_SLOTS: usize = 4;

/// Minimum number of bytes needed to parse any superblock.
///
/// Callers that do not yet know the block size read this many bytes from
/// offset zero and parse; the full block is not required.
pub const SUPERBLOCK_PROBE_LEN: usize =
    SUPERBLOCK_FIXED_LEN + (MAX_JOURNALS as usize + TAIL_SLOTS) * 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u32,
    pub block_size: BlockSize,
    pub first_data_block: BlockNumber,
    pub last_fs_block: BlockNumber,
    pub root_inode: BlockNumber,
    pub bitmap_start: BlockNumber,
    pub bitmap_blocks: u32,
    pub journals: Vec<BlockNumber>,
    pub itable_inode: Option<BlockNumber>,
    pub rindex_inode: Option<BlockNumber>,
    pub statfs_inode: Option<BlockNumber>,
    pub quota_inode: Option<BlockNumber>,
}

fn read_optional_addr(data: &[u8], offset: usize) -> Result<Option<BlockNumber>, ParseError> {
    let raw = read_le_u64(data, offset)?;
    Ok((raw != 0).then_some(BlockNumber(raw)))
}

impl Superblock {
    /// Parse the superblock from the start of the volume.
    ///
    /// Structural checks only (magic, version, field ranges); cross-field
    /// geometry rules live in [`Superblock::validate`], called here as the
    /// final step so a successfully parsed superblock is always coherent.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let magic = read_le_u64(data, OFF_MAGIC)?;
        if magic != MENDFS_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: MENDFS_SUPER_MAGIC,
                actual: magic,
            });
        }

        let version = read_le_u32(data, OFF_VERSION)?;
        if version != 1 {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "only version 1 is supported",
            });
        }

        let block_size = BlockSize::new(read_le_u32(data, OFF_BLOCK_SIZE)?)?;
        let first_data_block = BlockNumber(read_le_u64(data, OFF_FIRST_DATA)?);
        let last_fs_block = BlockNumber(read_le_u64(data, OFF_LAST_FS)?);
        let root_inode = BlockNumber(read_le_u64(data, OFF_ROOT)?);
        let bitmap_start = BlockNumber(read_le_u64(data, OFF_BITMAP_START)?);
        let bitmap_blocks = read_le_u32(data, OFF_BITMAP_BLOCKS)?;

        let journal_count = read_le_u32(data, OFF_JOURNAL_COUNT)?;
        if journal_count > MAX_JOURNALS {
            return Err(ParseError::InvalidField {
                field: "journal_count",
                reason: "exceeds MAX_JOURNALS",
            });
        }
        let mut journals = Vec::with_capacity(journal_count as usize);
        let mut offset = OFF_JOURNALS;
        for _ in 0..journal_count {
            journals.push(BlockNumber(read_le_u64(data, offset)?));
            offset += 8;
        }

        let itable_inode = read_optional_addr(data, offset)?;
        let rindex_inode = read_optional_addr(data, offset + 8)?;
        let statfs_inode = read_optional_addr(data, offset + 16)?;
        let quota_inode = read_optional_addr(data, offset + 24)?;

        let sb = Self {
            version,
            block_size,
            first_data_block,
            last_fs_block,
            root_inode,
            bitmap_start,
            bitmap_blocks,
            journals,
            itable_inode,
            rindex_inode,
            statfs_inode,
            quota_inode,
        };
        sb.validate()?;
        Ok(sb)
    }

    /// Cross-field geometry rules.
    ///
    /// The metadata region (superblock + bitmap) must precede the data
    /// region; the bitmap must cover every data-region address; the root
    /// and every present system inode must lie inside the data region.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.first_data_block.0 > self.last_fs_block.0 {
            return Err(ParseError::InvalidField {
                field: "first_data_block",
                reason: "exceeds last_fs_block",
            });
        }
        if self.bitmap_start.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "bitmap_start",
                reason: "overlaps the superblock",
            });
        }
        let bitmap_end = self
            .bitmap_start
            .0
            .checked_add(u64::from(self.bitmap_blocks))
            .ok_or(ParseError::InvalidField {
                field: "bitmap_blocks",
                reason: "bitmap end overflows",
            })?;
        if bitmap_end > self.first_data_block.0 {
            return Err(ParseError::InvalidField {
                field: "bitmap_blocks",
                reason: "bitmap region overlaps the data region",
            });
        }

        let span = self.data_region_len();
        let capacity = u64::from(self.bitmap_blocks)
            .checked_mul(u64::from(self.block_size.get()) * 8)
            .ok_or(ParseError::InvalidField {
                field: "bitmap_blocks",
                reason: "bitmap capacity overflows",
            })?;
        if capacity < span {
            return Err(ParseError::InvalidField {
                field: "bitmap_blocks",
                reason: "bitmap does not cover the data region",
            });
        }

        if !self.contains(self.root_inode) {
            return Err(ParseError::InvalidField {
                field: "root_inode",
                reason: "outside the data region",
            });
        }
        for addr in self.system_inodes() {
            if !self.contains(addr) {
                return Err(ParseError::InvalidField {
                    field: "system_inode",
                    reason: "outside the data region",
                });
            }
        }
        Ok(())
    }

    /// Number of block addresses in `[first_data_block, last_fs_block]`.
    #[must_use]
    pub fn data_region_len(&self) -> u64 {
        self.last_fs_block.0 - self.first_data_block.0 + 1
    }

    /// True if `addr` lies inside the data region.
    #[must_use]
    pub fn contains(&self, addr: BlockNumber) -> bool {
        (self.first_data_block.0..=self.last_fs_block.0).contains(&addr.0)
    }

    /// Every system-reserved inode address present on this volume,
    /// excluding root: journals, then itable, rindex, statfs, quota.
    #[must_use]
    pub fn system_inodes(&self) -> Vec<BlockNumber> {
        let mut addrs = self.journals.clone();
        addrs.extend(self.itable_inode);
        addrs.extend(self.rindex_inode);
        addrs.extend(self.statfs_inode);
        addrs.extend(self.quota_inode);
        addrs
    }

    /// Number of bitmap blocks required to cover `data_blocks` addresses.
    #[must_use]
    pub fn bitmap_blocks_for(block_size: BlockSize, data_blocks: u64) -> u64 {
        let bits_per_block = u64::from(block_size.get()) * 8;
        data_blocks.div_ceil(bits_per_block)
    }

    /// Encode into a fresh superblock block of `block_size` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ParseError> {
        let mut data = vec![0_u8; self.block_size.as_usize()];
        write_le_u64(&mut data, OFF_MAGIC, MENDFS_SUPER_MAGIC)?;
        write_le_u32(&mut data, OFF_VERSION, self.version)?;
        write_le_u32(&mut data, OFF_BLOCK_SIZE, self.block_size.get())?;
        write_le_u64(&mut data, OFF_FIRST_DATA, self.first_data_block.0)?;
        write_le_u64(&mut data, OFF_LAST_FS, self.last_fs_block.0)?;
        write_le_u64(&mut data, OFF_ROOT, self.root_inode.0)?;
        write_le_u64(&mut data, OFF_BITMAP_START, self.bitmap_start.0)?;
        write_le_u32(&mut data, OFF_BITMAP_BLOCKS, self.bitmap_blocks)?;
        let journal_count = mend_types::usize_to_u32(self.journals.len(), "journal_count")?;
        if journal_count > MAX_JOURNALS {
            return Err(ParseError::InvalidField {
                field: "journal_count",
                reason: "exceeds MAX_JOURNALS",
            });
        }
        write_le_u32(&mut data, OFF_JOURNAL_COUNT, journal_count)?;
        let mut offset = OFF_JOURNALS;
        for journal in &self.journals {
            write_le_u64(&mut data, offset, journal.0)?;
            offset += 8;
        }
        write_le_u64(&mut data, offset, self.itable_inode.map_or(0, |a| a.0))?;
        write_le_u64(&mut data, offset + 8, self.rindex_inode.map_or(0, |a| a.0))?;
        write_le_u64(&mut data, offset + 16, self.statfs_inode.map_or(0, |a| a.0))?;
        write_le_u64(&mut data, offset + 24, self.quota_inode.map_or(0, |a| a.0))?;
        Ok(data)
    }

    /// Read a data-region address's allocation bit out of the raw bitmap.
    ///
    /// `bits` is the concatenated payload of all bitmap blocks; bit *i*
    /// covers address `first_data_block + i`.
    #[must_use]
    pub fn bitmap_bit(&self, bits: &[u8], addr: BlockNumber) -> bool {
        if !self.contains(addr) {
            return false;
        }
        bitmap::bitmap_get(bits, addr.0 - self.first_data_block.0)
    }
}
