//! Inode & directory index.
//!
//! In-memory registry of every inode discovered during the scan, keyed by
//! block address, plus the directory entries found pointing at each one.
//! Structural scans are not address-ordered, so an entry may be recorded
//! before its target inode is discovered; those increments are queued and
//! applied retroactively at registration.
//!
//! Only forward edges exist: a directory knows its children, children keep
//! no parent pointer. Reachability is recomputed by traversal, never read
//! from the records.

use crate::block_map::BlockKind;
use mend_error::{MendError, Result};
use mend_ondisk::{DiskInode, FileKind};
use mend_types::BlockNumber;
use std::collections::BTreeMap;

/// One directory entry held by a directory's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: Vec<u8>,
    pub target: BlockNumber,
    pub kind: FileKind,
    /// Leaf block this entry was parsed from; `None` for entries
    /// synthesized during the run (lost+found links). Detaching a leaf
    /// from its directory withdraws the entries it contributed.
    pub origin: Option<BlockNumber>,
}

/// In-memory image of one on-disk object.
///
/// Created when first observed by the scan pass; mutated across passes;
/// written back (if dirty) and destroyed at commit & teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    pub addr: BlockNumber,
    pub kind: FileKind,
    /// Link count as recorded on disk.
    pub ondisk_link_count: u32,
    /// Link count counted from directory entries during this run.
    pub observed_link_count: u32,
    pub size: u64,
    /// Owned level-one metadata blocks: leaves (directories) or indirect
    /// blocks (everything else).
    pub ptrs: Vec<BlockNumber>,
    /// Data pointers below each owned indirect block.
    pub children: BTreeMap<BlockNumber, Vec<BlockNumber>>,
    /// Directory entries (directories only), merged across all leaves.
    pub entries: Vec<DirEntry>,
    pub dirty: bool,
}

impl InodeRecord {
    #[must_use]
    pub fn from_disk(addr: BlockNumber, inode: &DiskInode) -> Self {
        Self {
            addr,
            kind: inode.kind,
            ondisk_link_count: inode.link_count,
            observed_link_count: 0,
            size: inode.size,
            ptrs: inode.ptrs.clone(),
            children: BTreeMap::new(),
            entries: Vec::new(),
            dirty: false,
        }
    }

    /// Every block this record claims to own: level-one pointers plus the
    /// data pointers below each indirect.
    pub fn owned_refs(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.ptrs
            .iter()
            .copied()
            .chain(self.children.values().flatten().copied())
    }

    /// The classification an owned reference implies, given the owner.
    #[must_use]
    pub fn child_kind(&self, system: bool) -> BlockKind {
        match self.kind {
            FileKind::Directory => BlockKind::DirLeaf,
            _ if system => BlockKind::Meta,
            _ => BlockKind::Data,
        }
    }

    /// Remove every reference to `target` from this record's owned sets.
    ///
    /// Returns true if anything was removed. Removing a level-one pointer
    /// also drops its recorded data pointers.
    pub fn detach_ref(&mut self, target: BlockNumber) -> bool {
        let mut removed = false;
        let before = self.ptrs.len();
        self.ptrs.retain(|ptr| *ptr != target);
        if self.ptrs.len() != before {
            self.children.remove(&target);
            removed = true;
        }
        for data_ptrs in self.children.values_mut() {
            let before = data_ptrs.len();
            data_ptrs.retain(|ptr| *ptr != target);
            if data_ptrs.len() != before {
                removed = true;
            }
        }
        removed
    }
}

/// Registry of all discovered inodes plus the pending-entry queue.
#[derive(Debug, Default)]
pub struct InodeIndex {
    records: BTreeMap<u64, InodeRecord>,
    /// Directory-entry references recorded before their target was
    /// discovered: target address → count of waiting increments.
    pending: BTreeMap<u64, u32>,
}

impl InodeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly discovered inode.
    ///
    /// Fails with `DuplicateKey` if the address is already present — the
    /// scan visits each address once, so that is an internal invariant
    /// violation, not a volume defect. Any queued entry references are
    /// applied to the observed link count here.
    pub fn register(&mut self, mut record: InodeRecord) -> Result<()> {
        let addr = record.addr;
        if self.records.contains_key(&addr.0) {
            return Err(MendError::DuplicateKey { block: addr.0 });
        }
        if let Some(waiting) = self.pending.remove(&addr.0) {
            record.observed_link_count += waiting;
        }
        self.records.insert(addr.0, record);
        Ok(())
    }

    /// Record a directory entry found inside `dir`.
    ///
    /// Appends to the directory's entry list and increments the target's
    /// observed link count — immediately if the target is registered,
    /// retroactively via the pending queue otherwise.
    pub fn record_entry(&mut self, dir: BlockNumber, entry: DirEntry) -> Result<()> {
        let target = entry.target;
        let dir_record = self
            .records
            .get_mut(&dir.0)
            .ok_or_else(|| MendError::Internal(format!("entry recorded for unknown directory {dir}")))?;
        dir_record.entries.push(entry);

        if let Some(target_record) = self.records.get_mut(&target.0) {
            target_record.observed_link_count += 1;
        } else {
            *self.pending.entry(target.0).or_insert(0) += 1;
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, addr: BlockNumber) -> bool {
        self.records.contains_key(&addr.0)
    }

    #[must_use]
    pub fn lookup(&self, addr: BlockNumber) -> Option<&InodeRecord> {
        self.records.get(&addr.0)
    }

    pub fn lookup_mut(&mut self, addr: BlockNumber) -> Option<&mut InodeRecord> {
        self.records.get_mut(&addr.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ascending-address iteration.
    pub fn iter(&self) -> impl Iterator<Item = &InodeRecord> {
        self.records.values()
    }

    /// Snapshot of every registered address, ascending.
    #[must_use]
    pub fn addresses(&self) -> Vec<BlockNumber> {
        self.records.keys().map(|addr| BlockNumber(*addr)).collect()
    }

    /// Entry references still waiting for a target to appear.
    #[must_use]
    pub fn pending_refs(&self) -> usize {
        self.pending.values().map(|count| *count as usize).sum()
    }

    /// Drain every record for commit & teardown.
    #[must_use]
    pub fn take_records(&mut self) -> BTreeMap<u64, InodeRecord> {
        self.pending.clear();
        std::mem::take(&mut self.records)
    }
}
