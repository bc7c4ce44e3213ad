//! Shared run state.
//!
//! `FsckContext` replaces ambient globals: every pass receives it by
//! mutable reference and finds the classification map, the inode index,
//! the claim table, the cancellation flags, and the storage collaborator
//! in one place. Only the main thread mutates any of it; the signal path
//! is confined to the atomic interrupt flag inside `CancelFlags`.

use crate::bitmap::BitmapShadow;
use crate::block_map::BlockMap;
use crate::cancel::{self, CancelFlags, ControlChannel};
use crate::dup::ClaimTable;
use crate::index::InodeIndex;
use crate::lost_found::LostFound;
use mend_block::{BlockBuf, BlockDevice};
use mend_error::{MendError, Result};
use mend_ondisk::Superblock;
use mend_types::BlockNumber;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Operator-facing repair policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Assume "yes" to every repair question (suppress prompts).
    pub assume_yes: bool,
    /// Assume "no" to every repair question (dry classification only).
    pub assume_no: bool,
}

impl CheckOptions {
    /// True when repair questions actually reach the operator — the only
    /// mode in which the interrupt prompt is armed.
    #[must_use]
    pub fn interactive(&self) -> bool {
        !self.assume_yes && !self.assume_no
    }
}

/// Per-pass progress state read by the interrupt prompt.
#[derive(Debug)]
pub struct PassState {
    pub pass: &'static str,
    pub last_reported_block: u64,
    pub last_fs_block: u64,
}

impl PassState {
    #[must_use]
    pub fn new(last_fs_block: u64) -> Self {
        Self {
            pass: "",
            last_reported_block: 0,
            last_fs_block,
        }
    }

    /// Enter a pass: label it and restart progress reporting.
    pub fn begin(&mut self, pass: &'static str) {
        self.pass = pass;
        self.last_reported_block = 0;
    }

    /// Leave a pass: restart progress reporting for the next one.
    pub fn finish(&mut self) {
        self.last_reported_block = 0;
    }

    pub fn report(&mut self, block: u64) {
        self.last_reported_block = block;
    }
}

/// Counters for everything the run found and repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairTally {
    /// Blocks found claimed by more than one inode.
    pub dup_claims: u64,
    /// References detached from losing duplicate claimants.
    pub dup_refs_detached: u64,
    /// Owned pointers dropped because their target was unusable.
    pub ptrs_dropped: u64,
    /// Inode blocks with a valid magic but malformed contents.
    pub bad_inodes: u64,
    /// Directory entries removed (dangling or type-mismatched).
    pub entries_removed: u64,
    /// Orphans reattached under lost+found.
    pub orphans_relocated: u64,
    /// On-disk link counts rewritten.
    pub links_fixed: u64,
    /// Allocation bitmap bits corrected.
    pub bitmap_bits_fixed: u64,
    /// Repairs declined by the operator or by `-n`.
    pub queries_declined: u64,
}

/// Whether a scan loop should keep going after a poll point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Everything a pass needs, passed by reference — no ambient globals.
pub struct FsckContext<'a> {
    pub device: &'a dyn BlockDevice,
    pub sb: Superblock,
    pub opts: CheckOptions,
    pub map: BlockMap,
    pub index: InodeIndex,
    pub claims: ClaimTable,
    pub lost_found: LostFound,
    pub bitmap: BitmapShadow,
    pub state: PassState,
    pub tally: RepairTally,
    pub cancel: Arc<CancelFlags>,
    pub channel: Box<dyn ControlChannel>,
    system: BTreeSet<BlockNumber>,
}

impl<'a> FsckContext<'a> {
    /// Build the run context and load the allocation bitmap shadow.
    ///
    /// Fails when the device and superblock disagree on geometry — an
    /// initialization failure, before any pass runs.
    pub fn new(
        device: &'a dyn BlockDevice,
        sb: Superblock,
        opts: CheckOptions,
        cancel: Arc<CancelFlags>,
        channel: Box<dyn ControlChannel>,
    ) -> Result<Self> {
        if device.block_size() != sb.block_size.get() {
            return Err(MendError::Format(format!(
                "device block size {} does not match superblock {}",
                device.block_size(),
                sb.block_size
            )));
        }
        if sb.last_fs_block.0 >= device.block_count() {
            return Err(MendError::InvalidGeometry(format!(
                "last_fs_block {} beyond device end (block_count {})",
                sb.last_fs_block,
                device.block_count()
            )));
        }

        let map = BlockMap::new(sb.first_data_block, sb.last_fs_block)?;
        let bitmap = BitmapShadow::load(device, &sb)?;
        let system: BTreeSet<BlockNumber> = sb.system_inodes().into_iter().collect();
        let state = PassState::new(sb.last_fs_block.0);

        Ok(Self {
            device,
            sb,
            opts,
            map,
            index: InodeIndex::new(),
            claims: ClaimTable::new(),
            lost_found: LostFound::new(),
            bitmap,
            state,
            tally: RepairTally::default(),
            cancel,
            channel,
            system,
        })
    }

    /// True if `addr` is one of the superblock's reserved system inodes.
    #[must_use]
    pub fn is_system(&self, addr: BlockNumber) -> bool {
        self.system.contains(&addr)
    }

    pub fn read_block(&self, addr: BlockNumber) -> Result<BlockBuf> {
        self.device.read_block(addr)
    }

    /// Cooperative poll point — call once per block or structural unit.
    ///
    /// Updates progress, services a pending operator interrupt (in
    /// interactive mode only; `-y`/`-n` ignore the interrupt entirely),
    /// and reports whether the pass should stop early.
    pub fn checkpoint(&mut self, addr: BlockNumber) -> Result<ScanControl> {
        self.state.report(addr.0);
        if self.opts.interactive() && self.cancel.take_interrupt() {
            cancel::run_interrupt_prompt(&self.state, &self.cancel, self.channel.as_mut())?;
        }
        Ok(if self.cancel.stop_requested() {
            ScanControl::Stop
        } else {
            ScanControl::Continue
        })
    }

    /// Ask the operator whether to apply a repair.
    ///
    /// `-n` answers no and `-y` answers yes without prompting. While the
    /// question is pending, interrupt handling is suppressed; an
    /// interrupt that arrived mid-question is dropped when it resolves.
    pub fn query(&mut self, prompt: &str) -> Result<bool> {
        if self.opts.assume_no {
            info!(target: "mend::check", prompt, "repair declined (-n)");
            self.tally.queries_declined += 1;
            return Ok(false);
        }
        if self.opts.assume_yes {
            return Ok(true);
        }

        self.cancel.set_query_active(true);
        let answer = loop {
            eprint!("{prompt} (y/n) ");
            let mut line = String::new();
            let read = match self.channel.read_line(&mut line) {
                Ok(read) => read,
                Err(err) => {
                    self.cancel.set_query_active(false);
                    self.cancel.discard_interrupt();
                    return Err(MendError::Io(err));
                }
            };
            if read == 0 {
                eprintln!("\nend of input; assuming no.");
                break false;
            }
            match line.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
                Some('y') => break true,
                Some('n') => break false,
                _ => eprintln!("Please answer 'y' or 'n'."),
            }
        };
        self.cancel.set_query_active(false);
        self.cancel.discard_interrupt();
        if !answer {
            self.tally.queries_declined += 1;
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::ScriptChannel;
    use mend_block::MemBlockDevice;
    use mend_ondisk::ImageBuilder;

    fn minimal_ctx(device: &MemBlockDevice, sb: Superblock, opts: CheckOptions) -> FsckContext<'_> {
        FsckContext::new(
            device,
            sb,
            opts,
            Arc::new(CancelFlags::new()),
            Box::new(ScriptChannel::default()),
        )
        .expect("context")
    }

    fn build_volume() -> (MemBlockDevice, Superblock) {
        let builder = ImageBuilder::new(512, 16).expect("builder");
        let sb = builder.superblock();
        let image = builder.build().expect("image");
        let device = MemBlockDevice::from_image(512, &image).expect("device");
        (device, sb)
    }

    #[test]
    fn rejects_geometry_mismatch() {
        let (_, sb) = build_volume();
        let wrong_size = MemBlockDevice::new(1024, 64);
        assert!(FsckContext::new(
            &wrong_size,
            sb.clone(),
            CheckOptions::default(),
            Arc::new(CancelFlags::new()),
            Box::new(ScriptChannel::default()),
        )
        .is_err());

        let too_small = MemBlockDevice::new(512, 4);
        assert!(FsckContext::new(
            &too_small,
            sb,
            CheckOptions::default(),
            Arc::new(CancelFlags::new()),
            Box::new(ScriptChannel::default()),
        )
        .is_err());
    }

    #[test]
    fn assume_modes_short_circuit_queries() {
        let (device, sb) = build_volume();
        let mut ctx = minimal_ctx(
            &device,
            sb.clone(),
            CheckOptions {
                assume_yes: true,
                assume_no: false,
            },
        );
        assert!(ctx.query("fix?").expect("query"));
        assert_eq!(ctx.tally.queries_declined, 0);

        let mut ctx = minimal_ctx(
            &device,
            sb,
            CheckOptions {
                assume_yes: false,
                assume_no: true,
            },
        );
        assert!(!ctx.query("fix?").expect("query"));
        assert_eq!(ctx.tally.queries_declined, 1);
    }

    #[test]
    fn interactive_query_reads_channel() {
        let (device, sb) = build_volume();
        let mut ctx = FsckContext::new(
            &device,
            sb,
            CheckOptions::default(),
            Arc::new(CancelFlags::new()),
            Box::new(ScriptChannel::new(["maybe", "Y"])),
        )
        .expect("context");
        assert!(ctx.query("fix?").expect("query"));
        assert!(!ctx.cancel.query_active());
    }

    #[test]
    fn interrupt_during_query_is_dropped() {
        let (device, sb) = build_volume();
        let mut ctx = FsckContext::new(
            &device,
            sb,
            CheckOptions::default(),
            Arc::new(CancelFlags::new()),
            Box::new(ScriptChannel::new(["n"])),
        )
        .expect("context");
        ctx.cancel.request_interrupt();
        assert!(!ctx.query("fix?").expect("query"));
        // The mid-question interrupt never reaches a poll point.
        assert_eq!(
            ctx.checkpoint(BlockNumber(3)).expect("checkpoint"),
            ScanControl::Continue
        );
    }

    #[test]
    fn checkpoint_ignores_interrupt_in_assume_modes() {
        let (device, sb) = build_volume();
        let mut ctx = minimal_ctx(
            &device,
            sb,
            CheckOptions {
                assume_yes: true,
                assume_no: false,
            },
        );
        ctx.cancel.request_interrupt();
        assert_eq!(
            ctx.checkpoint(BlockNumber(5)).expect("checkpoint"),
            ScanControl::Continue
        );
        assert_eq!(ctx.state.last_reported_block, 5);
    }

    #[test]
    fn checkpoint_prompts_and_obeys_skip() {
        let (device, sb) = build_volume();
        let mut ctx = FsckContext::new(
            &device,
            sb,
            CheckOptions::default(),
            Arc::new(CancelFlags::new()),
            Box::new(ScriptChannel::new(["s"])),
        )
        .expect("context");
        ctx.state.begin("pass 1");
        ctx.cancel.request_interrupt();
        assert_eq!(
            ctx.checkpoint(BlockNumber(7)).expect("checkpoint"),
            ScanControl::Stop
        );
        assert!(ctx.cancel.skip_requested());
        assert!(!ctx.cancel.abort_requested());
    }

    #[test]
    fn system_set_comes_from_superblock() {
        let builder = ImageBuilder::new(512, 16).expect("builder");
        let first = builder.first_data_block();
        let sb = builder
            .with_journals(&[BlockNumber(first.0 + 3)])
            .with_statfs(BlockNumber(first.0 + 4))
            .superblock();
        let image = ImageBuilder::new(512, 16).expect("builder").build().expect("image");
        let device = MemBlockDevice::from_image(512, &image).expect("device");
        let ctx = minimal_ctx(&device, sb, CheckOptions::default());
        assert!(ctx.is_system(BlockNumber(first.0 + 3)));
        assert!(ctx.is_system(BlockNumber(first.0 + 4)));
        assert!(!ctx.is_system(first));
    }
}
