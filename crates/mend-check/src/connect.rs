//! Connectivity validation (pass 3).
//!
//! Breadth-first reachability over forward directory edges, seeded with
//! the root inode and the superblock's system inode set (those are
//! reachable by superblock reference, not by directory entry). Every
//! inode the traversal never reaches is an orphan and is handed to the
//! lost+found relocator.
//!
//! Orphans are processed lowest-address first; after an orphan is
//! relocated (or the relocation declined) its subtree is absorbed so a
//! detached directory tree gains exactly one recovery entry at its root
//! rather than one per descendant.

use crate::context::{FsckContext, ScanControl};
use crate::lost_found;
use crate::pipeline::PassOutcome;
use mend_error::Result;
use mend_ondisk::FileKind;
use mend_types::BlockNumber;
use std::collections::{BTreeSet, VecDeque};
use tracing::warn;

pub fn pass3(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    let root = ctx.sb.root_inode;
    match ctx.index.lookup(root).map(|record| record.kind) {
        None => {
            return Ok(PassOutcome::Fatal(format!(
                "root inode {root} was never found on the volume"
            )));
        }
        Some(kind) if kind != FileKind::Directory => {
            return Ok(PassOutcome::Fatal(format!(
                "root inode {root} is not a directory"
            )));
        }
        Some(_) => {}
    }

    let mut visited = BTreeSet::new();
    let mut seeds = VecDeque::from([root]);
    for system in ctx.sb.system_inodes() {
        if ctx.index.contains(system) {
            seeds.push_back(system);
        } else {
            warn!(
                target: "mend::check::pass3",
                block = system.0,
                "system inode missing from the volume"
            );
        }
    }
    if traverse(ctx, &mut visited, seeds)? == ScanControl::Stop {
        return Ok(PassOutcome::Skipped);
    }

    // Relocate orphan subtree roots, lowest address first.
    loop {
        let orphan = ctx
            .index
            .addresses()
            .into_iter()
            .find(|addr| !visited.contains(addr));
        let Some(orphan) = orphan else { break };

        if ctx.checkpoint(orphan)? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }

        let apply = ctx.query(&format!(
            "inode {orphan} is not reachable from the root directory; relocate it into lost+found?"
        ))?;
        if apply {
            lost_found::relocate(ctx, orphan)?;
            // The recovery directory is linked under root, hence reachable.
            if let Some(lf) = ctx.lost_found.dir() {
                visited.insert(lf);
            }
        }

        // Absorb the orphan's subtree either way so each detached tree is
        // handled exactly once at its root.
        visited.insert(orphan);
        let children = child_targets(ctx, orphan);
        if traverse(ctx, &mut visited, VecDeque::from(children))? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }
    }

    Ok(PassOutcome::Completed)
}

/// BFS over forward directory edges, marking `visited`.
fn traverse(
    ctx: &mut FsckContext<'_>,
    visited: &mut BTreeSet<BlockNumber>,
    mut queue: VecDeque<BlockNumber>,
) -> Result<ScanControl> {
    while let Some(addr) = queue.pop_front() {
        if !visited.insert(addr) {
            continue;
        }
        if ctx.checkpoint(addr)? == ScanControl::Stop {
            return Ok(ScanControl::Stop);
        }
        for target in child_targets(ctx, addr) {
            queue.push_back(target);
        }
    }
    Ok(ScanControl::Continue)
}

/// Registered entry targets of a directory (empty for anything else).
fn child_targets(ctx: &FsckContext<'_>, addr: BlockNumber) -> Vec<BlockNumber> {
    let Some(record) = ctx.index.lookup(addr) else {
        return Vec::new();
    };
    if record.kind != FileKind::Directory {
        return Vec::new();
    }
    record
        .entries
        .iter()
        .map(|entry| entry.target)
        .filter(|target| ctx.index.contains(*target))
        .collect()
}
