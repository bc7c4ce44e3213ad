//! Pass pipeline controller and commit & teardown.
//!
//! Seven phases run strictly in order. The contract per phase is the
//! three-state outcome below; the policy the controller enforces:
//!
//! - `Fatal` (or any `Err` bubbling out of a phase) halts the run on the
//!   spot. Commit never executes, so a fatal run performs zero writes —
//!   partial, unvalidated repairs must never reach the volume.
//! - `Skipped` (operator request) clears the skip flag and moves on; the
//!   skipped phase's domain stays unchecked.
//! - `abort_all`, observed between phases, stops issuing phases but still
//!   commits: an operator abort keeps the repairs validated by the phases
//!   that finished.
//!
//! Progress reporting restarts around every phase.

use crate::context::{FsckContext, RepairTally};
use crate::{bitmap, connect, dirent, dup, links, scan};
use mend_error::{MendError, Result};
use mend_ondisk::{DirLeaf, DiskInode, FileKind, Indirect, LeafEntry};
use mend_types::BlockNumber;
use serde::Serialize;
use tracing::{error, info, warn};

/// Result of one checking phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Skipped,
    Fatal(String),
}

/// One phase: a label for progress reporting and the pass body.
pub struct Phase {
    pub label: &'static str,
    pub run: fn(&mut FsckContext<'_>) -> Result<PassOutcome>,
}

/// The fixed pass sequence.
pub const PHASES: [Phase; 7] = [
    Phase {
        label: "pass 1",
        run: scan::pass1,
    },
    Phase {
        label: "pass 1b",
        run: dup::pass1b,
    },
    Phase {
        label: "pass 1c",
        run: dup::pass1c,
    },
    Phase {
        label: "pass 2",
        run: dirent::pass2,
    },
    Phase {
        label: "pass 3",
        run: connect::pass3,
    },
    Phase {
        label: "pass 4",
        run: links::pass4,
    },
    Phase {
        label: "pass 5",
        run: bitmap::pass5,
    },
];

/// Per-phase outcome as reported to the operator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: String,
    pub outcome: String,
}

/// Writes performed by commit & teardown.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CommitStats {
    pub inodes_written: u64,
    pub leaves_written: u64,
    pub indirects_written: u64,
    pub bitmap_blocks_written: u64,
}

impl CommitStats {
    #[must_use]
    pub fn total_writes(&self) -> u64 {
        self.inodes_written + self.leaves_written + self.indirects_written
            + self.bitmap_blocks_written
    }
}

/// Machine-readable summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub phases: Vec<PhaseReport>,
    /// True if the operator aborted; completed-phase repairs were still
    /// committed.
    pub aborted: bool,
    /// Inodes held at commit time.
    pub inodes: usize,
    pub tally: RepairTally,
    pub commit: CommitStats,
}

/// Run the full fixed pipeline.
pub fn run(ctx: &mut FsckContext<'_>) -> Result<CheckReport> {
    run_phases(ctx, &PHASES)
}

/// Run an explicit phase sequence (the fixed one, or a custom list in
/// tests exercising the controller contract).
pub fn run_phases(ctx: &mut FsckContext<'_>, phases: &[Phase]) -> Result<CheckReport> {
    let mut reports = Vec::with_capacity(phases.len());

    for phase in phases {
        if ctx.cancel.abort_requested() {
            info!(
                target: "mend::check",
                phase = phase.label,
                "abort requested; stopping before this phase"
            );
            break;
        }

        ctx.state.begin(phase.label);
        info!(target: "mend::check", phase = phase.label, "phase_start");
        let outcome = (phase.run)(ctx).inspect_err(|err| {
            error!(
                target: "mend::check",
                phase = phase.label,
                error = %err,
                class = err.class(),
                "phase_fatal"
            );
        })?;
        ctx.state.finish();

        match outcome {
            PassOutcome::Completed => {
                info!(target: "mend::check", phase = phase.label, "phase_complete");
                reports.push(PhaseReport {
                    phase: phase.label.to_owned(),
                    outcome: "completed".to_owned(),
                });
            }
            PassOutcome::Skipped => {
                warn!(target: "mend::check", phase = phase.label, "phase_interrupted");
                reports.push(PhaseReport {
                    phase: phase.label.to_owned(),
                    outcome: "skipped".to_owned(),
                });
            }
            PassOutcome::Fatal(reason) => {
                error!(
                    target: "mend::check",
                    phase = phase.label,
                    reason = %reason,
                    "phase_fatal"
                );
                return Err(MendError::Internal(reason));
            }
        }
        ctx.cancel.clear_skip();
    }

    let aborted = ctx.cancel.abort_requested();
    if aborted {
        info!(target: "mend::check", "aborted by operator; committing completed repairs");
    }

    let inodes = ctx.index.len();
    info!(target: "mend::check", "writing changes to disk");
    let commit = commit_and_teardown(ctx)?;
    info!(
        target: "mend::check",
        inodes_written = commit.inodes_written,
        leaves_written = commit.leaves_written,
        indirects_written = commit.indirects_written,
        bitmap_blocks_written = commit.bitmap_blocks_written,
        "commit complete"
    );

    Ok(CheckReport {
        phases: reports,
        aborted,
        inodes,
        tally: ctx.tally,
        commit,
    })
}

/// Persist every dirty record and dirty bitmap block, flush, and release
/// the in-memory indexes. Runs exactly once, only on non-fatal outcomes.
fn commit_and_teardown(ctx: &mut FsckContext<'_>) -> Result<CommitStats> {
    let block_size = ctx.sb.block_size.as_usize();
    let mut stats = CommitStats::default();
    let records = ctx.index.take_records();

    for (addr_raw, record) in &records {
        if !record.dirty {
            continue;
        }

        let inode = DiskInode {
            kind: record.kind,
            link_count: record.ondisk_link_count,
            size: record.size,
            ptrs: record.ptrs.clone(),
        };
        let data = inode.encode(block_size).map_err(|err| MendError::Corruption {
            block: *addr_raw,
            detail: err.to_string(),
        })?;
        ctx.device.write_block(BlockNumber(*addr_raw), &data)?;
        stats.inodes_written += 1;

        if record.kind == FileKind::Directory {
            let leaves = pack_entries(&record.entries, &record.ptrs, block_size)
                .ok_or_else(|| {
                    MendError::Internal(format!(
                        "directory {addr_raw}: entries exceed leaf capacity at commit"
                    ))
                })?;
            for (leaf_addr, leaf) in leaves {
                let data = leaf.encode(block_size).map_err(|err| MendError::Corruption {
                    block: leaf_addr.0,
                    detail: err.to_string(),
                })?;
                ctx.device.write_block(leaf_addr, &data)?;
                stats.leaves_written += 1;
            }
        } else {
            for (indirect_addr, ptrs) in &record.children {
                let data = Indirect { ptrs: ptrs.clone() }
                    .encode(block_size)
                    .map_err(|err| MendError::Corruption {
                        block: indirect_addr.0,
                        detail: err.to_string(),
                    })?;
                ctx.device.write_block(*indirect_addr, &data)?;
                stats.indirects_written += 1;
            }
        }
    }

    let device = ctx.device;
    for (addr, bytes) in ctx.bitmap.dirty_blocks() {
        device.write_block(addr, bytes)?;
        stats.bitmap_blocks_written += 1;
    }
    device.sync()?;

    ctx.map.release();
    ctx.bitmap.clear();
    ctx.claims.clear();
    Ok(stats)
}

/// Distribute a directory's entry list across its leaf blocks, greedily
/// and in order. Leaves left without entries are emitted empty so removals
/// reach the device. `None` if the entries no longer fit.
fn pack_entries(
    entries: &[crate::index::DirEntry],
    leaves: &[BlockNumber],
    block_size: usize,
) -> Option<Vec<(BlockNumber, DirLeaf)>> {
    let capacity = DirLeaf::capacity(block_size);
    let mut packed: Vec<(BlockNumber, DirLeaf)> = leaves
        .iter()
        .map(|addr| (*addr, DirLeaf::default()))
        .collect();

    let mut slot = 0_usize;
    let mut used = 0_usize;
    for entry in entries {
        let len = LeafEntry::encoded_len(entry.name.len());
        while slot < packed.len() && used + len > capacity {
            slot += 1;
            used = 0;
        }
        let (_, leaf) = packed.get_mut(slot)?;
        leaf.entries.push(LeafEntry {
            target: entry.target,
            kind: entry.kind,
            name: entry.name.clone(),
        });
        used += len;
    }
    Some(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DirEntry;

    fn entry(name: &str) -> DirEntry {
        DirEntry {
            name: name.as_bytes().to_vec(),
            target: BlockNumber(5),
            kind: FileKind::Regular,
            origin: None,
        }
    }

    #[test]
    fn pack_entries_spills_into_later_leaves() {
        // Block size 64 → capacity 56; each 10-byte name packs to 20
        // bytes, so a leaf holds two entries.
        let entries: Vec<DirEntry> = (0..3).map(|i| entry(&format!("name_{i:05}"))).collect();
        let leaves = vec![BlockNumber(10), BlockNumber(11)];
        let packed = pack_entries(&entries, &leaves, 64).expect("pack");
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0].1.entries.len(), 2);
        assert_eq!(packed[1].1.entries.len(), 1);
    }

    #[test]
    fn pack_entries_emits_empty_leaves() {
        let leaves = vec![BlockNumber(10), BlockNumber(11)];
        let packed = pack_entries(&[], &leaves, 512).expect("pack");
        assert_eq!(packed.len(), 2);
        assert!(packed.iter().all(|(_, leaf)| leaf.entries.is_empty()));
    }

    #[test]
    fn pack_entries_fails_on_overflow() {
        let entries: Vec<DirEntry> = (0..3).map(|i| entry(&format!("name_{i:05}"))).collect();
        assert!(pack_entries(&entries, &[BlockNumber(10)], 64).is_none());
        assert!(pack_entries(&entries, &[], 64).is_none());
    }
}
