//! Allocation bitmap validation.
//!
//! The on-disk bitmap is loaded once into an in-memory shadow at startup.
//! Every repair — including the fixes this pass makes — mutates the
//! shadow and marks the containing bitmap block dirty; nothing reaches
//! the device until commit & teardown. A fatal outcome anywhere in the
//! run therefore leaves the on-disk bitmap untouched.

use crate::context::{FsckContext, ScanControl};
use crate::pipeline::PassOutcome;
use mend_block::BlockDevice;
use mend_error::Result;
use mend_ondisk::{bitmap_get, bitmap_set, Superblock};
use mend_types::BlockNumber;
use std::collections::BTreeSet;
use tracing::debug;

/// In-memory copy of the allocation bitmap with dirty-block tracking.
#[derive(Debug)]
pub struct BitmapShadow {
    start: BlockNumber,
    first_data: BlockNumber,
    block_size: usize,
    bytes: Vec<u8>,
    /// Indexes (relative to `start`) of bitmap blocks changed this run.
    dirty: BTreeSet<u64>,
}

impl BitmapShadow {
    /// Read every bitmap block off the device.
    pub fn load(device: &dyn BlockDevice, sb: &Superblock) -> Result<Self> {
        let block_size = sb.block_size.as_usize();
        let mut bytes = Vec::with_capacity(block_size * sb.bitmap_blocks as usize);
        for idx in 0..u64::from(sb.bitmap_blocks) {
            let buf = device.read_block(BlockNumber(sb.bitmap_start.0 + idx))?;
            bytes.extend_from_slice(buf.as_slice());
        }
        Ok(Self {
            start: sb.bitmap_start,
            first_data: sb.first_data_block,
            block_size,
            bytes,
            dirty: BTreeSet::new(),
        })
    }

    fn bit_of(&self, addr: BlockNumber) -> u64 {
        addr.0.saturating_sub(self.first_data.0)
    }

    /// Allocation bit for a data-region address.
    #[must_use]
    pub fn get(&self, addr: BlockNumber) -> bool {
        bitmap_get(&self.bytes, self.bit_of(addr))
    }

    /// Flip an allocation bit in the shadow, marking its block dirty.
    pub fn set(&mut self, addr: BlockNumber, allocated: bool) {
        let bit = self.bit_of(addr);
        bitmap_set(&mut self.bytes, bit, allocated);
        self.dirty.insert(bit / (self.block_size as u64 * 8));
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Dirty bitmap blocks as `(device address, block bytes)` pairs.
    #[must_use]
    pub fn dirty_blocks(&self) -> Vec<(BlockNumber, &[u8])> {
        self.dirty
            .iter()
            .map(|idx| {
                let offset = usize::try_from(*idx).unwrap_or(usize::MAX) * self.block_size;
                (
                    BlockNumber(self.start.0 + idx),
                    &self.bytes[offset..offset + self.block_size],
                )
            })
            .collect()
    }

    /// Release the backing storage (commit & teardown).
    pub fn clear(&mut self) {
        self.bytes = Vec::new();
        self.dirty.clear();
    }
}

/// Allocation-bitmap validation pass.
///
/// Compares every address's classification against the bitmap shadow and
/// repairs the bitmap to match the observed reality.
pub fn pass5(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    let first = ctx.sb.first_data_block.0;
    let last = ctx.sb.last_fs_block.0;

    for raw in first..=last {
        let addr = BlockNumber(raw);
        if ctx.checkpoint(addr)? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }
        let allocated = ctx.map.query(addr)?.is_allocated();
        let marked = ctx.bitmap.get(addr);
        if allocated == marked {
            continue;
        }

        let describe = if allocated {
            "in use but marked free"
        } else {
            "free but marked in use"
        };
        if ctx.query(&format!(
            "Block {addr} is {describe} in the allocation bitmap; fix the bitmap?"
        ))? {
            ctx.bitmap.set(addr, allocated);
            ctx.tally.bitmap_bits_fixed += 1;
            debug!(
                target: "mend::check::pass5",
                block = raw,
                allocated,
                "bitmap bit corrected"
            );
        }
    }

    Ok(PassOutcome::Completed)
}
