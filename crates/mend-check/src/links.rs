//! Link count validation (pass 4).
//!
//! The observed link count — accumulated from directory entries across
//! the earlier passes, including lost+found relocation — is authoritative.
//! Any record whose on-disk count disagrees is rewritten and marked dirty.

use crate::context::{FsckContext, ScanControl};
use crate::pipeline::PassOutcome;
use mend_error::Result;
use tracing::debug;

pub fn pass4(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    for addr in ctx.index.addresses() {
        if ctx.checkpoint(addr)? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }
        let Some((ondisk, observed)) = ctx
            .index
            .lookup(addr)
            .map(|record| (record.ondisk_link_count, record.observed_link_count))
        else {
            continue;
        };
        if ondisk == observed {
            continue;
        }

        let apply = ctx.query(&format!(
            "inode {addr} has link count {ondisk} but {observed} references were found; fix the count?"
        ))?;
        if apply {
            if let Some(record) = ctx.index.lookup_mut(addr) {
                record.ondisk_link_count = observed;
                record.dirty = true;
            }
            ctx.tally.links_fixed += 1;
            debug!(
                target: "mend::check::pass4",
                block = addr.0,
                from = ondisk,
                to = observed,
                "link count rewritten"
            );
        }
    }

    Ok(PassOutcome::Completed)
}
