//! Duplicate reference resolution.
//!
//! Two sub-phases. The primary sweep (`pass1b`) counts ownership of every
//! owned-metadata reference across all discovered inodes and records a
//! claim for each block with more than one owner — resolution is deferred
//! because later claims for the same block may still arrive during the
//! same sweep. The secondary sweep (`pass1c`) resolves each claim with a
//! deterministic tie-break: the claimant with the lowest inode block
//! address retains ownership, every other claimant loses the reference
//! and is marked dirty.
//!
//! Guarantee on completion: every metadata block is owned by at most one
//! inode and the claim table is empty before directory validation starts.

use crate::block_map::BlockKind;
use crate::context::{FsckContext, ScanControl};
use crate::pipeline::PassOutcome;
use mend_error::Result;
use mend_ondisk::FileKind;
use mend_types::BlockNumber;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One contested block: who claims it, and what it was before contention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupClaim {
    /// Claimant inode addresses, ordered — the first one wins.
    pub claimants: BTreeSet<BlockNumber>,
    /// Classification the block held before being marked `DupCandidate`;
    /// restored when the claim resolves.
    pub prior_kind: BlockKind,
}

/// Accumulated duplicate claims keyed by contested block address.
#[derive(Debug, Default)]
pub struct ClaimTable {
    claims: BTreeMap<u64, DupClaim>,
}

impl ClaimTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contested: BlockNumber, claim: DupClaim) {
        self.claims.insert(contested.0, claim);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Drain every claim in ascending contested-address order.
    #[must_use]
    pub fn take_all(&mut self) -> BTreeMap<u64, DupClaim> {
        std::mem::take(&mut self.claims)
    }

    pub fn clear(&mut self) {
        self.claims.clear();
    }
}

/// Primary sub-phase: detect multiple ownership, record claims.
pub fn pass1b(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    let mut owners: BTreeMap<u64, BTreeSet<BlockNumber>> = BTreeMap::new();

    for addr in ctx.index.addresses() {
        if ctx.checkpoint(addr)? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }
        let refs: Vec<BlockNumber> = match ctx.index.lookup(addr) {
            Some(record) => record.owned_refs().collect(),
            None => continue,
        };
        for reference in refs {
            if ctx.sb.contains(reference) {
                owners.entry(reference.0).or_default().insert(addr);
            }
        }
    }

    for (contested_raw, claimants) in owners {
        if claimants.len() < 2 {
            continue;
        }
        let contested = BlockNumber(contested_raw);
        let prior_kind = ctx.map.query(contested)?;
        ctx.map.set(contested, BlockKind::DupCandidate)?;
        warn!(
            target: "mend::check::pass1b",
            block = contested_raw,
            claimants = claimants.len(),
            prior = prior_kind.label(),
            "block claimed by multiple inodes"
        );
        ctx.claims.insert(
            contested,
            DupClaim {
                claimants,
                prior_kind,
            },
        );
        ctx.tally.dup_claims += 1;
    }

    Ok(PassOutcome::Completed)
}

/// Secondary sub-phase: resolve every accumulated claim.
pub fn pass1c(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    let claims = ctx.claims.take_all();
    let mut stopped = false;

    for (contested_raw, claim) in claims {
        let contested = BlockNumber(contested_raw);
        if !stopped && ctx.checkpoint(contested)? == ScanControl::Stop {
            stopped = true;
        }
        if stopped {
            // Claims must not leak into the next phase even when the
            // operator skips: restore the classification and drop the
            // claim without repairing.
            ctx.map.set(contested, claim.prior_kind)?;
            continue;
        }

        let Some(keeper) = claim.claimants.iter().next().copied() else {
            ctx.map.set(contested, claim.prior_kind)?;
            continue;
        };

        let apply = ctx.query(&format!(
            "Block {contested} is owned by {} inodes; keep inode {keeper} and detach the others?",
            claim.claimants.len()
        ))?;
        if apply {
            for loser in claim.claimants.iter().skip(1).copied() {
                // A detached directory leaf takes the entries it
                // contributed with it; their observed-link increments are
                // withdrawn too.
                let withdrawn: Vec<BlockNumber> = match ctx.index.lookup_mut(loser) {
                    Some(record)
                        if record.kind == FileKind::Directory
                            && record.ptrs.contains(&contested) =>
                    {
                        let targets = record
                            .entries
                            .iter()
                            .filter(|entry| entry.origin == Some(contested))
                            .map(|entry| entry.target)
                            .collect();
                        record.entries.retain(|entry| entry.origin != Some(contested));
                        targets
                    }
                    _ => Vec::new(),
                };
                for target in withdrawn {
                    if let Some(record) = ctx.index.lookup_mut(target) {
                        record.observed_link_count = record.observed_link_count.saturating_sub(1);
                    }
                }

                if let Some(record) = ctx.index.lookup_mut(loser) {
                    if record.detach_ref(contested) {
                        record.dirty = true;
                        ctx.tally.dup_refs_detached += 1;
                        debug!(
                            target: "mend::check::pass1c",
                            block = contested_raw,
                            keeper = keeper.0,
                            loser = loser.0,
                            "detached duplicate reference"
                        );
                    }
                }
            }
        }
        ctx.map.set(contested, claim.prior_kind)?;
    }

    if stopped {
        return Ok(PassOutcome::Skipped);
    }
    Ok(PassOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_table_drains_in_address_order() {
        let mut table = ClaimTable::new();
        let claim = DupClaim {
            claimants: BTreeSet::from([BlockNumber(9), BlockNumber(3)]),
            prior_kind: BlockKind::Data,
        };
        table.insert(BlockNumber(50), claim.clone());
        table.insert(BlockNumber(10), claim);
        assert_eq!(table.len(), 2);

        let drained = table.take_all();
        assert_eq!(drained.keys().copied().collect::<Vec<_>>(), vec![10, 50]);
        assert!(table.is_empty());
    }

    #[test]
    fn claimant_set_orders_lowest_first() {
        let claim = DupClaim {
            claimants: BTreeSet::from([BlockNumber(40), BlockNumber(7), BlockNumber(23)]),
            prior_kind: BlockKind::Indirect,
        };
        assert_eq!(claim.claimants.iter().next(), Some(&BlockNumber(7)));
    }
}
