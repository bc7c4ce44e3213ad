//! End-to-end pipeline tests over in-memory volumes.
//!
//! Each test assembles a mendfs image with `ImageBuilder`, runs the
//! checker against a `MemBlockDevice`, and then re-reads the device to
//! verify what did (and did not) reach the storage collaborator.

use mend_block::{BlockDevice, MemBlockDevice};
use mend_check::{
    cancel::ScriptChannel, lost_found, pipeline, scan, BlockKind, CancelFlags, CheckOptions,
    CheckReport, FsckContext, PassOutcome, Phase, PHASES,
};
use mend_error::{MendError, Result};
use mend_ondisk::{DirLeaf, DiskInode, FileKind, ImageBuilder, Indirect, LeafEntry, Superblock};
use mend_types::BlockNumber;
use std::sync::Arc;

const BS: u32 = 512;

fn yes() -> CheckOptions {
    CheckOptions {
        assume_yes: true,
        assume_no: false,
    }
}

fn no() -> CheckOptions {
    CheckOptions {
        assume_yes: false,
        assume_no: true,
    }
}

fn dir_inode(link_count: u32, ptrs: &[u64]) -> DiskInode {
    DiskInode {
        kind: FileKind::Directory,
        link_count,
        size: 0,
        ptrs: ptrs.iter().copied().map(BlockNumber).collect(),
    }
}

fn file_inode(link_count: u32, ptrs: &[u64]) -> DiskInode {
    DiskInode {
        kind: FileKind::Regular,
        link_count,
        size: 0,
        ptrs: ptrs.iter().copied().map(BlockNumber).collect(),
    }
}

fn leaf(entries: &[(&str, u64, FileKind)]) -> DirLeaf {
    DirLeaf {
        entries: entries
            .iter()
            .map(|(name, target, kind)| LeafEntry {
                target: BlockNumber(*target),
                kind: *kind,
                name: name.as_bytes().to_vec(),
            })
            .collect(),
    }
}

fn device_from(builder: &ImageBuilder) -> MemBlockDevice {
    MemBlockDevice::from_image(BS, &builder.build().expect("build image")).expect("device")
}

fn make_ctx<'a>(
    device: &'a MemBlockDevice,
    sb: Superblock,
    opts: CheckOptions,
    cancel: Arc<CancelFlags>,
    responses: &[&str],
) -> FsckContext<'a> {
    FsckContext::new(
        device,
        sb,
        opts,
        cancel,
        Box::new(ScriptChannel::new(responses.iter().copied())),
    )
    .expect("context")
}

fn run_yes(device: &MemBlockDevice, sb: Superblock) -> CheckReport {
    let mut ctx = make_ctx(device, sb, yes(), Arc::new(CancelFlags::new()), &[]);
    pipeline::run(&mut ctx).expect("run")
}

fn read_inode(device: &MemBlockDevice, addr: u64) -> DiskInode {
    DiskInode::parse(device.read_block(BlockNumber(addr)).expect("read").as_slice())
        .expect("inode parse")
}

fn read_leaf(device: &MemBlockDevice, addr: u64) -> DirLeaf {
    DirLeaf::parse(device.read_block(BlockNumber(addr)).expect("read").as_slice())
        .expect("leaf parse")
}

fn read_indirect(device: &MemBlockDevice, addr: u64) -> Indirect {
    Indirect::parse(device.read_block(BlockNumber(addr)).expect("read").as_slice())
        .expect("indirect parse")
}

/// Root at 2 with leaf at 3; entries as given. Root link count 1 (the
/// superblock reference).
fn base_volume(entries: &[(&str, u64, FileKind)]) -> ImageBuilder {
    let mut builder = ImageBuilder::new(BS, 64).expect("builder");
    let root = builder.first_data_block();
    assert_eq!(root, BlockNumber(2));
    builder.add_leaf(BlockNumber(3), &leaf(entries)).expect("leaf");
    builder.add_inode(root, &dir_inode(1, &[3])).expect("root");
    builder
}

// ── Clean volume ──────────────────────────────────────────────────────

#[test]
fn clean_volume_needs_no_repairs() {
    let mut builder = base_volume(&[("file_a", 4, FileKind::Regular)]);
    builder.add_inode(BlockNumber(4), &file_inode(1, &[5])).expect("file");
    builder
        .add_indirect(BlockNumber(5), &Indirect { ptrs: vec![BlockNumber(6)] })
        .expect("indirect");
    builder.add_data(BlockNumber(6), 0xAA).expect("data");

    let device = device_from(&builder);
    let before = device.to_image();
    let report = run_yes(&device, builder.superblock());

    assert!(!report.aborted);
    assert_eq!(report.phases.len(), 7);
    assert!(report.phases.iter().all(|p| p.outcome == "completed"));
    assert_eq!(report.tally, Default::default());
    assert_eq!(report.commit.total_writes(), 0);
    assert_eq!(device.writes(), 0);
    assert_eq!(device.to_image(), before);

    // The report serializes for machine consumption.
    let json = serde_json::to_value(&report).expect("serialize");
    assert_eq!(json["phases"][0]["phase"], "pass 1");
    assert_eq!(json["aborted"], false);
}

#[test]
fn scan_classifies_every_reachable_block_and_frees_the_rest() {
    let mut builder = base_volume(&[("file_a", 4, FileKind::Regular)]);
    builder.add_inode(BlockNumber(4), &file_inode(1, &[5])).expect("file");
    builder
        .add_indirect(BlockNumber(5), &Indirect { ptrs: vec![BlockNumber(6)] })
        .expect("indirect");
    builder.add_data(BlockNumber(6), 0xAA).expect("data");

    let device = device_from(&builder);
    let sb = builder.superblock();
    let mut ctx = make_ctx(&device, sb.clone(), yes(), Arc::new(CancelFlags::new()), &[]);
    assert_eq!(scan::pass1(&mut ctx).expect("pass1"), PassOutcome::Completed);

    assert_eq!(ctx.map.query(BlockNumber(2)), Ok(BlockKind::Inode));
    assert_eq!(ctx.map.query(BlockNumber(3)), Ok(BlockKind::DirLeaf));
    assert_eq!(ctx.map.query(BlockNumber(4)), Ok(BlockKind::Inode));
    assert_eq!(ctx.map.query(BlockNumber(5)), Ok(BlockKind::Indirect));
    assert_eq!(ctx.map.query(BlockNumber(6)), Ok(BlockKind::Data));
    assert_eq!(ctx.map.query(BlockNumber(7)), Ok(BlockKind::Free));
    assert_eq!(ctx.map.count_of(BlockKind::Unclassified), 0);
    assert_eq!(
        ctx.map.count_of(BlockKind::Free),
        sb.data_region_len() - 5
    );
}

#[test]
fn system_inode_payload_classifies_as_meta() {
    let mut builder = base_volume(&[]);
    // A journal inode referenced only by the superblock.
    builder.add_inode(BlockNumber(10), &file_inode(1, &[11])).expect("journal");
    builder
        .add_indirect(BlockNumber(11), &Indirect { ptrs: vec![BlockNumber(12)] })
        .expect("journal indirect");
    builder.add_data(BlockNumber(12), 0x5A).expect("journal data");
    let builder = builder.with_journals(&[BlockNumber(10)]);

    let device = device_from(&builder);
    let mut ctx = make_ctx(
        &device,
        builder.superblock(),
        yes(),
        Arc::new(CancelFlags::new()),
        &[],
    );
    assert_eq!(scan::pass1(&mut ctx).expect("pass1"), PassOutcome::Completed);
    assert_eq!(ctx.map.query(BlockNumber(11)), Ok(BlockKind::Indirect));
    assert_eq!(ctx.map.query(BlockNumber(12)), Ok(BlockKind::Meta));

    // And the whole run leaves the consistent volume untouched.
    let report = run_yes(&device, builder.superblock());
    assert_eq!(report.commit.total_writes(), 0);
}

// ── Duplicate resolution ──────────────────────────────────────────────

#[test]
fn duplicate_block_goes_to_lower_addressed_inode() {
    let mut builder = base_volume(&[
        ("file_a", 4, FileKind::Regular),
        ("file_b", 5, FileKind::Regular),
    ]);
    // Inodes 4 and 5 both own data block 8 through their indirects.
    builder.add_inode(BlockNumber(4), &file_inode(1, &[6])).expect("a");
    builder.add_inode(BlockNumber(5), &file_inode(1, &[7])).expect("b");
    builder
        .add_indirect(BlockNumber(6), &Indirect { ptrs: vec![BlockNumber(8)] })
        .expect("ind a");
    builder
        .add_indirect(BlockNumber(7), &Indirect { ptrs: vec![BlockNumber(8)] })
        .expect("ind b");
    builder.add_data(BlockNumber(8), 0xDD).expect("contested");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    assert_eq!(report.tally.dup_claims, 1);
    assert_eq!(report.tally.dup_refs_detached, 1);

    // The lower-addressed inode keeps the block; the loser's indirect no
    // longer lists it and the loser was rewritten.
    assert_eq!(read_indirect(&device, 6).ptrs, vec![BlockNumber(8)]);
    assert_eq!(read_indirect(&device, 7).ptrs, Vec::<BlockNumber>::new());
    assert_eq!(report.commit.inodes_written, 1);
    assert_eq!(report.commit.indirects_written, 1);
}

#[test]
fn duplicate_leaf_withdraws_its_entries_from_the_loser() {
    let mut builder = base_volume(&[
        ("dir_a", 4, FileKind::Directory),
        ("dir_b", 5, FileKind::Directory),
    ]);
    // Directories 4 and 5 both claim leaf 6, whose single entry points at
    // file 7. The scan counts the entry twice; resolution must take the
    // loser's copy back out.
    builder
        .add_leaf(BlockNumber(6), &leaf(&[("shared", 7, FileKind::Regular)]))
        .expect("shared leaf");
    builder.add_inode(BlockNumber(4), &dir_inode(1, &[6])).expect("dir a");
    builder.add_inode(BlockNumber(5), &dir_inode(1, &[6])).expect("dir b");
    builder.add_inode(BlockNumber(7), &file_inode(1, &[])).expect("file");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    assert_eq!(report.tally.dup_claims, 1);
    assert_eq!(report.tally.dup_refs_detached, 1);
    // The observed count fell back to one reference, so no link repair.
    assert_eq!(report.tally.links_fixed, 0);
    assert_eq!(read_inode(&device, 7).link_count, 1);
    // The loser lost its leaf; the keeper did not.
    assert_eq!(read_inode(&device, 5).ptrs, Vec::<BlockNumber>::new());
    assert_eq!(read_inode(&device, 4).ptrs, vec![BlockNumber(6)]);
}

// ── Directory structure ───────────────────────────────────────────────

#[test]
fn dangling_entry_is_removed_without_decrement() {
    let mut builder = base_volume(&[
        ("foo", 50, FileKind::Regular),
        ("real", 4, FileKind::Regular),
    ]);
    builder.add_inode(BlockNumber(4), &file_inode(1, &[])).expect("real");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    assert_eq!(report.tally.entries_removed, 1);
    let root_leaf = read_leaf(&device, 3);
    assert_eq!(root_leaf.entries.len(), 1);
    assert_eq!(root_leaf.entries[0].name, b"real".to_vec());
    // The surviving target kept its correct link count.
    assert_eq!(read_inode(&device, 4).link_count, 1);
    assert_eq!(report.tally.links_fixed, 0);
}

#[test]
fn type_mismatched_entry_is_removed_and_decremented() {
    // Entry claims block 4 is a directory; it is a regular file. A second
    // entry holds the correct type, so the stale one must be dropped and
    // the observed count fall back to 1.
    let mut builder = base_volume(&[
        ("wrong", 4, FileKind::Directory),
        ("right", 4, FileKind::Regular),
    ]);
    builder.add_inode(BlockNumber(4), &file_inode(1, &[])).expect("file");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    assert_eq!(report.tally.entries_removed, 1);
    let root_leaf = read_leaf(&device, 3);
    assert_eq!(root_leaf.entries.len(), 1);
    assert_eq!(root_leaf.entries[0].name, b"right".to_vec());
    assert_eq!(read_inode(&device, 4).link_count, 1);
}

// ── Link counts ───────────────────────────────────────────────────────

#[test]
fn wrong_link_count_is_rewritten_to_observed() {
    let mut builder = base_volume(&[("file_a", 4, FileKind::Regular)]);
    // On-disk count says 3; exactly one directory entry references it.
    builder.add_inode(BlockNumber(4), &file_inode(3, &[])).expect("file");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    assert_eq!(report.tally.links_fixed, 1);
    assert_eq!(read_inode(&device, 4).link_count, 1);
}

// ── Connectivity & lost+found ─────────────────────────────────────────

#[test]
fn orphan_is_relocated_with_one_entry_and_one_link() {
    let mut builder = base_volume(&[]);
    // Inode 10 exists but nothing references it.
    builder.add_inode(BlockNumber(10), &file_inode(0, &[])).expect("orphan");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    assert_eq!(report.tally.orphans_relocated, 1);

    // Root gained exactly one entry: the recovery directory.
    let root_leaf = read_leaf(&device, 3);
    assert_eq!(root_leaf.entries.len(), 1);
    assert_eq!(root_leaf.entries[0].name, b"lost+found".to_vec());
    let lf_addr = root_leaf.entries[0].target;

    // The recovery directory holds one synthetic entry for the orphan.
    let lf_inode = read_inode(&device, lf_addr.0);
    assert_eq!(lf_inode.kind, FileKind::Directory);
    assert_eq!(lf_inode.link_count, 1);
    assert_eq!(lf_inode.ptrs.len(), 1);
    let lf_leaf = read_leaf(&device, lf_inode.ptrs[0].0);
    assert_eq!(lf_leaf.entries.len(), 1);
    assert_eq!(lf_leaf.entries[0].name, b"lost_block_10".to_vec());
    assert_eq!(lf_leaf.entries[0].target, BlockNumber(10));

    // The orphan gained exactly one link.
    assert_eq!(read_inode(&device, 10).link_count, 1);

    // The blocks allocated for lost+found reached the bitmap.
    let sb = builder.superblock();
    let bitmap = device.read_block(sb.bitmap_start).expect("bitmap").into_inner();
    assert!(sb.bitmap_bit(&bitmap, lf_addr));
    assert!(sb.bitmap_bit(&bitmap, lf_inode.ptrs[0]));
}

#[test]
fn detached_subtree_gains_exactly_one_recovery_entry() {
    let mut builder = base_volume(&[]);
    // Directory 10 (with leaf 11) points at file 12; the whole subtree is
    // unreachable from root.
    builder
        .add_leaf(BlockNumber(11), &leaf(&[("child", 12, FileKind::Regular)]))
        .expect("leaf");
    builder.add_inode(BlockNumber(10), &dir_inode(0, &[11])).expect("dir");
    builder.add_inode(BlockNumber(12), &file_inode(1, &[])).expect("child");

    let device = device_from(&builder);
    let report = run_yes(&device, builder.superblock());

    // Only the subtree root was relocated; the child stays linked through
    // its parent and keeps a single reference.
    assert_eq!(report.tally.orphans_relocated, 1);
    assert_eq!(read_inode(&device, 12).link_count, 1);
    assert_eq!(read_inode(&device, 10).link_count, 1);
}

#[test]
fn relocating_the_same_orphan_twice_fails() {
    let mut builder = base_volume(&[]);
    builder.add_inode(BlockNumber(10), &file_inode(0, &[])).expect("orphan");

    let device = device_from(&builder);
    let mut ctx = make_ctx(
        &device,
        builder.superblock(),
        yes(),
        Arc::new(CancelFlags::new()),
        &[],
    );
    assert_eq!(scan::pass1(&mut ctx).expect("pass1"), PassOutcome::Completed);

    lost_found::relocate(&mut ctx, BlockNumber(10)).expect("first relocation");
    assert!(matches!(
        lost_found::relocate(&mut ctx, BlockNumber(10)),
        Err(MendError::AlreadyRelocated { block: 10 })
    ));
    // No silent double-link: still exactly one synthetic entry.
    assert_eq!(ctx.index.lookup(BlockNumber(10)).unwrap().observed_link_count, 1);
}

// ── Bitmap validation ─────────────────────────────────────────────────

#[test]
fn bitmap_mismatches_are_repaired_at_commit() {
    let mut builder = base_volume(&[("file_a", 4, FileKind::Regular)]);
    builder.add_inode(BlockNumber(4), &file_inode(1, &[])).expect("file");
    // In use but marked free; free but marked in use.
    builder.set_allocated(BlockNumber(4), false);
    builder.set_allocated(BlockNumber(40), true);

    let device = device_from(&builder);
    let sb = builder.superblock();
    let report = run_yes(&device, sb.clone());

    assert_eq!(report.tally.bitmap_bits_fixed, 2);
    assert_eq!(report.commit.bitmap_blocks_written, 1);
    let bitmap = device.read_block(sb.bitmap_start).expect("bitmap").into_inner();
    assert!(sb.bitmap_bit(&bitmap, BlockNumber(4)));
    assert!(!sb.bitmap_bit(&bitmap, BlockNumber(40)));
}

// ── Fatal failures ────────────────────────────────────────────────────

#[test]
fn fatal_phase_writes_nothing() {
    let mut builder = base_volume(&[]);
    // An inode with a repairable defect (out-of-range pointer), so the
    // scan pass accumulates a dirty record...
    let mut bad = file_inode(0, &[]);
    bad.ptrs.push(BlockNumber(9999));
    builder.add_inode(BlockNumber(10), &bad).expect("bad inode");
    // ...and a missing root, so connectivity-validation goes fatal.
    let sb = {
        let mut sb = builder.superblock();
        sb.root_inode = BlockNumber(20); // a free block, never an inode
        sb
    };

    let device = device_from(&builder);
    let before = device.to_image();
    let mut ctx = make_ctx(&device, sb, yes(), Arc::new(CancelFlags::new()), &[]);
    let err = pipeline::run(&mut ctx).expect_err("fatal run");
    assert_eq!(err.class(), "internal");

    // Commit & teardown never ran: zero writes, zero flushes, identical
    // bytes.
    assert_eq!(device.writes(), 0);
    assert_eq!(device.syncs(), 0);
    assert_eq!(device.to_image(), before);
}

#[test]
fn io_failure_is_fatal_and_writes_nothing() {
    // A device that fails reads past a point mid-scan.
    struct FailingDevice {
        inner: MemBlockDevice,
        fail_at: u64,
    }
    impl BlockDevice for FailingDevice {
        fn read_block(&self, block: BlockNumber) -> Result<mend_block::BlockBuf> {
            if block.0 >= self.fail_at {
                return Err(MendError::Io(std::io::Error::other("bad sector")));
            }
            self.inner.read_block(block)
        }
        fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
            self.inner.write_block(block, data)
        }
        fn block_size(&self) -> u32 {
            self.inner.block_size()
        }
        fn block_count(&self) -> u64 {
            self.inner.block_count()
        }
        fn sync(&self) -> Result<()> {
            self.inner.sync()
        }
    }

    let builder = base_volume(&[]);
    let device = FailingDevice {
        inner: device_from(&builder),
        fail_at: 30,
    };
    let mut ctx = FsckContext::new(
        &device,
        builder.superblock(),
        yes(),
        Arc::new(CancelFlags::new()),
        Box::new(ScriptChannel::default()),
    )
    .expect("context");

    let err = pipeline::run(&mut ctx).expect_err("io fatal");
    assert_eq!(err.class(), "io");
    assert_eq!(device.inner.writes(), 0);
    assert_eq!(device.inner.syncs(), 0);
}

// ── Operator abort & skip ─────────────────────────────────────────────

fn abort_phase(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    ctx.cancel.set_abort();
    Ok(PassOutcome::Skipped)
}

fn unreachable_phase(_ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    Ok(PassOutcome::Fatal("this phase must never run".to_owned()))
}

fn skip_phase(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    ctx.cancel.set_skip();
    Ok(PassOutcome::Skipped)
}

fn noop_phase(_ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    Ok(PassOutcome::Completed)
}

#[test]
fn abort_commits_completed_phases_and_stops() {
    // Pass 1 repairs an out-of-range pointer, then the operator aborts.
    let mut builder = base_volume(&[("file_a", 4, FileKind::Regular)]);
    let mut bad = file_inode(1, &[]);
    bad.ptrs.push(BlockNumber(9999));
    builder.add_inode(BlockNumber(4), &bad).expect("bad inode");

    let device = device_from(&builder);
    let cancel = Arc::new(CancelFlags::new());
    let mut ctx = make_ctx(&device, builder.superblock(), yes(), cancel, &[]);

    let phases = [
        Phase {
            label: "pass 1",
            run: scan::pass1,
        },
        Phase {
            label: "abort here",
            run: abort_phase,
        },
        Phase {
            label: "never",
            run: unreachable_phase,
        },
    ];
    let report = pipeline::run_phases(&mut ctx, &phases).expect("aborted run");

    assert!(report.aborted);
    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.phases[0].outcome, "completed");
    assert_eq!(report.phases[1].outcome, "skipped");

    // The pass-1 repair was committed: the bad pointer is gone on disk.
    assert_eq!(report.tally.ptrs_dropped, 1);
    assert!(device.writes() > 0);
    assert_eq!(read_inode(&device, 4).ptrs, Vec::<BlockNumber>::new());
}

#[test]
fn skip_clears_flag_and_run_continues() {
    let builder = base_volume(&[]);
    let device = device_from(&builder);
    let cancel = Arc::new(CancelFlags::new());
    let mut ctx = make_ctx(&device, builder.superblock(), yes(), Arc::clone(&cancel), &[]);

    let phases = [
        Phase {
            label: "skipped",
            run: skip_phase,
        },
        Phase {
            label: "after",
            run: noop_phase,
        },
    ];
    let report = pipeline::run_phases(&mut ctx, &phases).expect("run");

    assert!(!report.aborted);
    assert_eq!(report.phases[0].outcome, "skipped");
    assert_eq!(report.phases[1].outcome, "completed");
    assert!(!cancel.skip_requested());
}

#[test]
fn interrupt_prompt_abort_stops_after_current_pass() {
    let builder = base_volume(&[]);
    let device = device_from(&builder);
    let cancel = Arc::new(CancelFlags::new());
    cancel.request_interrupt();

    let mut ctx = make_ctx(
        &device,
        builder.superblock(),
        CheckOptions::default(),
        Arc::clone(&cancel),
        &["a"],
    );
    let report = pipeline::run(&mut ctx).expect("aborted run");

    assert!(report.aborted);
    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.phases[0].phase, "pass 1");
    assert_eq!(report.phases[0].outcome, "skipped");
    assert_eq!(device.writes(), 0);
}

#[test]
fn interrupt_prompt_continue_finishes_the_run() {
    let builder = base_volume(&[]);
    let device = device_from(&builder);
    let cancel = Arc::new(CancelFlags::new());
    cancel.request_interrupt();

    // First answer is garbage, the re-prompt answers continue.
    let mut ctx = make_ctx(
        &device,
        builder.superblock(),
        CheckOptions::default(),
        cancel,
        &["x", "c"],
    );
    let report = pipeline::run(&mut ctx).expect("run");

    assert!(!report.aborted);
    assert_eq!(report.phases.len(), 7);
    assert!(report.phases.iter().all(|p| p.outcome == "completed"));
}

// ── Dry run (-n) ──────────────────────────────────────────────────────

#[test]
fn dry_run_reports_but_never_writes() {
    let mut builder = base_volume(&[
        ("foo", 50, FileKind::Regular),
        ("file_a", 4, FileKind::Regular),
    ]);
    builder.add_inode(BlockNumber(4), &file_inode(3, &[])).expect("file");
    builder.add_inode(BlockNumber(10), &file_inode(0, &[])).expect("orphan");
    builder.set_allocated(BlockNumber(40), true);

    let device = device_from(&builder);
    let before = device.to_image();
    let mut ctx = make_ctx(
        &device,
        builder.superblock(),
        no(),
        Arc::new(CancelFlags::new()),
        &[],
    );
    let report = pipeline::run(&mut ctx).expect("dry run");

    // Everything was found, nothing was touched.
    assert!(report.tally.queries_declined > 0);
    assert_eq!(report.tally.entries_removed, 0);
    assert_eq!(report.tally.links_fixed, 0);
    assert_eq!(report.tally.orphans_relocated, 0);
    assert_eq!(report.tally.bitmap_bits_fixed, 0);
    assert_eq!(report.commit.total_writes(), 0);
    assert_eq!(device.writes(), 0);
    assert_eq!(device.to_image(), before);
}

// ── Full-sequence sanity ──────────────────────────────────────────────

#[test]
fn fixed_phase_sequence_is_ordered() {
    let labels: Vec<&str> = PHASES.iter().map(|phase| phase.label).collect();
    assert_eq!(
        labels,
        vec!["pass 1", "pass 1b", "pass 1c", "pass 2", "pass 3", "pass 4", "pass 5"]
    );
}
