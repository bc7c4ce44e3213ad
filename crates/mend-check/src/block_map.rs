//! Block classification map.
//!
//! One tag per block address in `[first_data_block, last_fs_block]`,
//! stored densely. Every pass reads and mutates classifications through
//! this map; nothing keeps private copies. `set` overwrites
//! unconditionally — callers own the transition discipline (a block moves
//! from `Unclassified` to a concrete kind during the scan, detours through
//! `DupCandidate` only while duplicate claims are being resolved, and ends
//! on a final resolved kind).

use mend_error::{MendError, Result};
use mend_types::BlockNumber;
use serde::{Deserialize, Serialize};

/// Classification tag for one block address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Initial tag; also the terminal tag for blocks nothing valid claims.
    Unclassified,
    Free,
    /// Metadata payload owned by a system inode (journal space and the like).
    Meta,
    Data,
    DirLeaf,
    Indirect,
    Inode,
    /// Contested ownership, pending duplicate resolution.
    DupCandidate,
}

impl BlockKind {
    /// True if the bitmap should show this block as allocated.
    #[must_use]
    pub fn is_allocated(self) -> bool {
        !matches!(self, Self::Unclassified | Self::Free)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::Free => "free",
            Self::Meta => "meta",
            Self::Data => "data",
            Self::DirLeaf => "dir_leaf",
            Self::Indirect => "indirect",
            Self::Inode => "inode",
            Self::DupCandidate => "dup_candidate",
        }
    }
}

/// Dense classification table over the volume's data region.
#[derive(Debug)]
pub struct BlockMap {
    first: BlockNumber,
    kinds: Vec<BlockKind>,
}

impl BlockMap {
    /// Build a map covering `[first, last]`, all entries `Unclassified`.
    pub fn new(first: BlockNumber, last: BlockNumber) -> Result<Self> {
        if last.0 < first.0 {
            return Err(MendError::Internal(format!(
                "inverted block range: first={first} last={last}"
            )));
        }
        let len = usize::try_from(last.0 - first.0 + 1)
            .map_err(|_| MendError::Internal("block range does not fit memory".to_owned()))?;
        Ok(Self {
            first,
            kinds: vec![BlockKind::Unclassified; len],
        })
    }

    #[must_use]
    pub fn first_block(&self) -> BlockNumber {
        self.first
    }

    #[must_use]
    pub fn last_block(&self) -> BlockNumber {
        BlockNumber(self.first.0 + self.kinds.len() as u64 - 1)
    }

    /// Number of addresses covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.kinds.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    fn index_of(&self, addr: BlockNumber) -> Result<usize> {
        let offset = addr
            .0
            .checked_sub(self.first.0)
            .ok_or(MendError::OutOfRange { block: addr.0 })?;
        let idx = usize::try_from(offset).map_err(|_| MendError::OutOfRange { block: addr.0 })?;
        if idx >= self.kinds.len() {
            return Err(MendError::OutOfRange { block: addr.0 });
        }
        Ok(idx)
    }

    /// Current tag for `addr`; `OutOfRange` outside the data region.
    pub fn query(&self, addr: BlockNumber) -> Result<BlockKind> {
        Ok(self.kinds[self.index_of(addr)?])
    }

    /// Overwrite the tag for `addr` unconditionally.
    pub fn set(&mut self, addr: BlockNumber, kind: BlockKind) -> Result<()> {
        let idx = self.index_of(addr)?;
        self.kinds[idx] = kind;
        Ok(())
    }

    /// Turn every still-`Unclassified` address into `Free`.
    ///
    /// Run once at the end of the scan pass: anything no valid structure
    /// claimed is free space. Returns the number of addresses flipped.
    pub fn finalize_free(&mut self) -> u64 {
        let mut flipped = 0_u64;
        for kind in &mut self.kinds {
            if *kind == BlockKind::Unclassified {
                *kind = BlockKind::Free;
                flipped += 1;
            }
        }
        flipped
    }

    /// First `Free` address, if any. Used by the lost+found allocator.
    #[must_use]
    pub fn find_free(&self) -> Option<BlockNumber> {
        self.kinds
            .iter()
            .position(|kind| *kind == BlockKind::Free)
            .map(|idx| BlockNumber(self.first.0 + idx as u64))
    }

    /// Count addresses currently holding `kind`.
    #[must_use]
    pub fn count_of(&self, kind: BlockKind) -> u64 {
        self.kinds.iter().filter(|k| **k == kind).count() as u64
    }

    /// Lazy ascending dump of `(address, kind)` pairs. Diagnostics only.
    #[must_use]
    pub fn dump(&self) -> Dump<'_> {
        Dump { map: self, next: 0 }
    }

    /// Release the backing storage (commit & teardown).
    pub fn release(&mut self) {
        self.kinds = Vec::new();
    }
}

/// Restartable iterator over the whole map in ascending address order.
#[derive(Debug)]
pub struct Dump<'a> {
    map: &'a BlockMap,
    next: usize,
}

impl Iterator for Dump<'_> {
    type Item = (BlockNumber, BlockKind);

    fn next(&mut self) -> Option<Self::Item> {
        let kind = *self.map.kinds.get(self.next)?;
        let addr = BlockNumber(self.map.first.0 + self.next as u64);
        self.next += 1;
        Some((addr, kind))
    }
}
