//! Flat-image assembly.
//!
//! `ImageBuilder` lays out a coherent mendfs volume in memory: superblock
//! at block 0, allocation bitmap, then the data region. The checker's test
//! suites and the harness build fixture volumes with it; `add_*` methods
//! mark the touched address allocated so a freshly built image passes a
//! bitmap check, and `set_allocated`/`put_raw` exist to inject the
//! inconsistencies the checker is supposed to find.

use crate::{DirLeaf, DiskInode, Indirect, Superblock};
use mend_types::{BlockNumber, BlockSize, ParseError};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    block_size: BlockSize,
    first_data_block: BlockNumber,
    last_fs_block: BlockNumber,
    bitmap_blocks: u32,
    root: BlockNumber,
    journals: Vec<BlockNumber>,
    itable: Option<BlockNumber>,
    rindex: Option<BlockNumber>,
    statfs: Option<BlockNumber>,
    quota: Option<BlockNumber>,
    blocks: BTreeMap<u64, Vec<u8>>,
    bitmap: Vec<u8>,
}

impl ImageBuilder {
    /// Start a volume with `data_blocks` addresses in the data region.
    ///
    /// Geometry is derived: bitmap at block 1, data region right after it.
    /// The root inode defaults to the first data block.
    pub fn new(block_size: u32, data_blocks: u64) -> Result<Self, ParseError> {
        let block_size = BlockSize::new(block_size)?;
        if data_blocks == 0 {
            return Err(ParseError::InvalidField {
                field: "data_blocks",
                reason: "data region cannot be empty",
            });
        }
        let bitmap_blocks = Superblock::bitmap_blocks_for(block_size, data_blocks);
        let bitmap_blocks_u32 =
            u32::try_from(bitmap_blocks).map_err(|_| ParseError::IntegerConversion {
                field: "bitmap_blocks",
            })?;
        let first_data_block = BlockNumber(1 + bitmap_blocks);
        let last_fs_block = BlockNumber(first_data_block.0 + data_blocks - 1);
        let bitmap_len = usize::try_from(bitmap_blocks)
            .map_err(|_| ParseError::IntegerConversion {
                field: "bitmap_blocks",
            })?
            .checked_mul(block_size.as_usize())
            .ok_or(ParseError::IntegerConversion {
                field: "bitmap_blocks",
            })?;

        Ok(Self {
            block_size,
            first_data_block,
            last_fs_block,
            bitmap_blocks: bitmap_blocks_u32,
            root: first_data_block,
            journals: Vec::new(),
            itable: None,
            rindex: None,
            statfs: None,
            quota: None,
            blocks: BTreeMap::new(),
            bitmap: vec![0_u8; bitmap_len],
        })
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn first_data_block(&self) -> BlockNumber {
        self.first_data_block
    }

    #[must_use]
    pub fn last_fs_block(&self) -> BlockNumber {
        self.last_fs_block
    }

    #[must_use]
    pub fn with_root(mut self, addr: BlockNumber) -> Self {
        self.root = addr;
        self
    }

    #[must_use]
    pub fn with_journals(mut self, addrs: &[BlockNumber]) -> Self {
        self.journals = addrs.to_vec();
        self
    }

    #[must_use]
    pub fn with_itable(mut self, addr: BlockNumber) -> Self {
        self.itable = Some(addr);
        self
    }

    #[must_use]
    pub fn with_rindex(mut self, addr: BlockNumber) -> Self {
        self.rindex = Some(addr);
        self
    }

    #[must_use]
    pub fn with_statfs(mut self, addr: BlockNumber) -> Self {
        self.statfs = Some(addr);
        self
    }

    #[must_use]
    pub fn with_quota(mut self, addr: BlockNumber) -> Self {
        self.quota = Some(addr);
        self
    }

    fn check_data_addr(&self, addr: BlockNumber) -> Result<(), ParseError> {
        if !(self.first_data_block.0..=self.last_fs_block.0).contains(&addr.0) {
            return Err(ParseError::InvalidField {
                field: "address",
                reason: "outside the data region",
            });
        }
        Ok(())
    }

    pub fn add_inode(&mut self, addr: BlockNumber, inode: &DiskInode) -> Result<(), ParseError> {
        self.check_data_addr(addr)?;
        let data = inode.encode(self.block_size.as_usize())?;
        self.blocks.insert(addr.0, data);
        self.mark(addr, true);
        Ok(())
    }

    pub fn add_leaf(&mut self, addr: BlockNumber, leaf: &DirLeaf) -> Result<(), ParseError> {
        self.check_data_addr(addr)?;
        let data = leaf.encode(self.block_size.as_usize())?;
        self.blocks.insert(addr.0, data);
        self.mark(addr, true);
        Ok(())
    }

    pub fn add_indirect(&mut self, addr: BlockNumber, ind: &Indirect) -> Result<(), ParseError> {
        self.check_data_addr(addr)?;
        let data = ind.encode(self.block_size.as_usize())?;
        self.blocks.insert(addr.0, data);
        self.mark(addr, true);
        Ok(())
    }

    /// Fill a data block with a repeating byte and mark it allocated.
    pub fn add_data(&mut self, addr: BlockNumber, fill: u8) -> Result<(), ParseError> {
        self.check_data_addr(addr)?;
        self.blocks
            .insert(addr.0, vec![fill; self.block_size.as_usize()]);
        self.mark(addr, true);
        Ok(())
    }

    /// Place raw bytes at any block address without touching the bitmap.
    ///
    /// Corruption-injection hook: the bytes are truncated or zero-padded
    /// to one block.
    pub fn put_raw(&mut self, addr: BlockNumber, bytes: &[u8]) {
        let mut data = bytes.to_vec();
        data.resize(self.block_size.as_usize(), 0);
        self.blocks.insert(addr.0, data);
    }

    /// Force a data-region address's allocation bit.
    pub fn set_allocated(&mut self, addr: BlockNumber, allocated: bool) {
        self.mark(addr, allocated);
    }

    fn mark(&mut self, addr: BlockNumber, allocated: bool) {
        if addr.0 >= self.first_data_block.0 && addr.0 <= self.last_fs_block.0 {
            crate::bitmap_set(&mut self.bitmap, addr.0 - self.first_data_block.0, allocated);
        }
    }

    /// Assemble the superblock describing this volume.
    #[must_use]
    pub fn superblock(&self) -> Superblock {
        Superblock {
            version: 1,
            block_size: self.block_size,
            first_data_block: self.first_data_block,
            last_fs_block: self.last_fs_block,
            root_inode: self.root,
            bitmap_start: BlockNumber(1),
            bitmap_blocks: self.bitmap_blocks,
            journals: self.journals.clone(),
            itable_inode: self.itable,
            rindex_inode: self.rindex,
            statfs_inode: self.statfs,
            quota_inode: self.quota,
        }
    }

    /// Emit the flat image. The superblock is validated first.
    pub fn build(&self) -> Result<Vec<u8>, ParseError> {
        let sb = self.superblock();
        sb.validate()?;

        let bs = self.block_size.as_usize();
        let total_blocks = usize::try_from(self.last_fs_block.0 + 1).map_err(|_| {
            ParseError::IntegerConversion {
                field: "last_fs_block",
            }
        })?;
        let mut image = vec![0_u8; total_blocks * bs];

        image[..bs].copy_from_slice(&sb.encode()?);
        let bitmap_offset = bs;
        image[bitmap_offset..bitmap_offset + self.bitmap.len()].copy_from_slice(&self.bitmap);

        for (addr, data) in &self.blocks {
            let start = usize::try_from(*addr).map_err(|_| ParseError::IntegerConversion {
                field: "address",
            })? * bs;
            image[start..start + bs].copy_from_slice(data);
        }
        Ok(image)
    }
}
