//! Directory structure validation (pass 2).
//!
//! Every directory entry must resolve to a registered inode whose
//! observed type matches the entry's declared type. Entries pointing at
//! nothing are removed without touching any link count — the target was
//! never registered, so nothing was ever incremented. Type mismatches are
//! removed and the stale reference decremented.

use crate::context::{FsckContext, ScanControl};
use crate::pipeline::PassOutcome;
use mend_error::Result;
use mend_ondisk::FileKind;
use mend_types::BlockNumber;
use tracing::debug;

pub fn pass2(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    let dirs: Vec<BlockNumber> = ctx
        .index
        .iter()
        .filter(|record| record.kind == FileKind::Directory)
        .map(|record| record.addr)
        .collect();

    for dir in dirs {
        if ctx.checkpoint(dir)? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }

        let entries = match ctx.index.lookup(dir) {
            Some(record) => record.entries.clone(),
            None => continue,
        };
        let entry_count = entries.len();
        let mut retained = Vec::with_capacity(entry_count);

        for entry in entries {
            let name = String::from_utf8_lossy(&entry.name).into_owned();
            match ctx.index.lookup(entry.target).map(|record| record.kind) {
                None => {
                    let apply = ctx.query(&format!(
                        "directory {dir}: entry '{name}' points at block {} which is not an inode; remove the entry?",
                        entry.target
                    ))?;
                    if apply {
                        // The target never existed, so there is no observed
                        // count to decrement.
                        ctx.tally.entries_removed += 1;
                        debug!(
                            target: "mend::check::pass2",
                            dir = dir.0,
                            entry = %name,
                            "removed dangling entry"
                        );
                    } else {
                        retained.push(entry);
                    }
                }
                Some(actual) if actual != entry.kind => {
                    let apply = ctx.query(&format!(
                        "directory {dir}: entry '{name}' declares {} but inode {} is {}; remove the entry?",
                        entry.kind.label(),
                        entry.target,
                        actual.label()
                    ))?;
                    if apply {
                        ctx.tally.entries_removed += 1;
                        if let Some(target) = ctx.index.lookup_mut(entry.target) {
                            target.observed_link_count =
                                target.observed_link_count.saturating_sub(1);
                        }
                        debug!(
                            target: "mend::check::pass2",
                            dir = dir.0,
                            entry = %name,
                            "removed type-mismatched entry"
                        );
                    } else {
                        retained.push(entry);
                    }
                }
                Some(_) => retained.push(entry),
            }
        }

        if retained.len() != entry_count {
            if let Some(record) = ctx.index.lookup_mut(dir) {
                record.entries = retained;
                record.dirty = true;
            }
        }
    }

    Ok(PassOutcome::Completed)
}
