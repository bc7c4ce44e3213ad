//! Lost+found relocation.
//!
//! Orphaned-but-valid inodes are reattached under a reserved recovery
//! directory. The directory is created lazily from a free block on the
//! first relocation, linked into the root directory, and then referenced
//! for the rest of the run. Synthetic entry names are derived from the
//! orphan's block address, which cannot collide — an address is relocated
//! at most once per run, enforced by the `AlreadyRelocated` guard.

use crate::block_map::BlockKind;
use crate::context::FsckContext;
use crate::index::{DirEntry, InodeRecord};
use mend_error::{MendError, Result};
use mend_ondisk::{DirLeaf, FileKind, LeafEntry};
use mend_types::BlockNumber;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Name of the recovery directory inside root.
pub const LOST_FOUND_NAME: &[u8] = b"lost+found";

/// Singleton lost+found state for one run.
#[derive(Debug, Default)]
pub struct LostFound {
    dir_addr: Option<BlockNumber>,
    relocated: BTreeSet<u64>,
}

impl LostFound {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the recovery directory, if it was created this run.
    #[must_use]
    pub fn dir(&self) -> Option<BlockNumber> {
        self.dir_addr
    }

    #[must_use]
    pub fn relocated_count(&self) -> usize {
        self.relocated.len()
    }
}

/// Deterministic entry name for a relocated orphan.
#[must_use]
pub fn orphan_entry_name(addr: BlockNumber) -> Vec<u8> {
    format!("lost_block_{}", addr.0).into_bytes()
}

/// Claim the lowest free block for new metadata.
///
/// Updates the classification map and the bitmap shadow; allocation
/// failure is fatal to the run.
fn allocate_block(ctx: &mut FsckContext<'_>, kind: BlockKind) -> Result<BlockNumber> {
    let addr = ctx.map.find_free().ok_or(MendError::NoSpace)?;
    ctx.map.set(addr, kind)?;
    ctx.bitmap.set(addr, true);
    Ok(addr)
}

/// Leaf blocks needed to pack entries of the given sizes, greedily, in
/// order. Mirrors the packing the commit path performs.
fn leaves_needed<I>(entry_name_lens: I, capacity: usize) -> usize
where
    I: IntoIterator<Item = usize>,
{
    let mut leaves = 0_usize;
    let mut used = capacity; // force a first leaf on the first entry
    for name_len in entry_name_lens {
        let len = LeafEntry::encoded_len(name_len);
        debug_assert!(len <= capacity, "entry larger than a leaf block");
        if used + len > capacity {
            leaves += 1;
            used = 0;
        }
        used += len;
    }
    leaves
}

/// Append `entry` to directory `dir`, growing its leaf list if the
/// packed entries would no longer fit at commit time.
pub fn append_entry(ctx: &mut FsckContext<'_>, dir: BlockNumber, entry: DirEntry) -> Result<()> {
    let capacity = DirLeaf::capacity(ctx.sb.block_size.as_usize());
    let (have, needed) = {
        let record = ctx
            .index
            .lookup(dir)
            .ok_or_else(|| MendError::Internal(format!("append into unknown directory {dir}")))?;
        let lens = record
            .entries
            .iter()
            .map(|e| e.name.len())
            .chain(std::iter::once(entry.name.len()));
        (record.ptrs.len(), leaves_needed(lens, capacity))
    };

    for _ in have..needed {
        let leaf = allocate_block(ctx, BlockKind::DirLeaf)?;
        debug!(target: "mend::check::lf", dir = dir.0, leaf = leaf.0, "grew directory leaf list");
        if let Some(record) = ctx.index.lookup_mut(dir) {
            record.ptrs.push(leaf);
        }
    }

    if let Some(record) = ctx.index.lookup_mut(dir) {
        record.dirty = true;
    }
    ctx.index.record_entry(dir, entry)
}

/// Get the recovery directory, creating and root-linking it on first use.
pub fn ensure_lost_found(ctx: &mut FsckContext<'_>) -> Result<BlockNumber> {
    if let Some(addr) = ctx.lost_found.dir() {
        return Ok(addr);
    }

    let root = ctx.sb.root_inode;
    if !ctx.index.contains(root) {
        return Err(MendError::Internal(
            "lost+found requested with no root directory".to_owned(),
        ));
    }

    let addr = allocate_block(ctx, BlockKind::Inode)?;
    ctx.index.register(InodeRecord {
        addr,
        kind: FileKind::Directory,
        ondisk_link_count: 0,
        observed_link_count: 0,
        size: 0,
        ptrs: Vec::new(),
        children: Default::default(),
        entries: Vec::new(),
        dirty: true,
    })?;
    ctx.lost_found.dir_addr = Some(addr);

    append_entry(
        ctx,
        root,
        DirEntry {
            name: LOST_FOUND_NAME.to_vec(),
            target: addr,
            kind: FileKind::Directory,
            origin: None,
        },
    )?;
    info!(target: "mend::check::lf", block = addr.0, "created lost+found directory");
    Ok(addr)
}

/// Reattach one orphan under lost+found.
///
/// Appends one synthetic entry and increments the orphan's observed link
/// count by exactly one. Relocating the same address twice in one run is
/// a programming error and fails with `AlreadyRelocated`.
pub fn relocate(ctx: &mut FsckContext<'_>, orphan: BlockNumber) -> Result<()> {
    if ctx.lost_found.relocated.contains(&orphan.0) {
        return Err(MendError::AlreadyRelocated { block: orphan.0 });
    }
    let kind = ctx
        .index
        .lookup(orphan)
        .map(|record| record.kind)
        .ok_or_else(|| MendError::Internal(format!("relocating unknown inode {orphan}")))?;

    let lf = ensure_lost_found(ctx)?;
    append_entry(
        ctx,
        lf,
        DirEntry {
            name: orphan_entry_name(orphan),
            target: orphan,
            kind,
            origin: None,
        },
    )?;
    ctx.lost_found.relocated.insert(orphan.0);
    ctx.tally.orphans_relocated += 1;
    info!(target: "mend::check::lf", block = orphan.0, "relocated orphan into lost+found");
    Ok(())
}
