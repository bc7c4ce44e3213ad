//! Scan and classify (pass 1).
//!
//! One sweep over the entire data region. Every block that parses as an
//! inode is registered and its owned tree walked: directory leaves feed
//! their entries into the index (out-of-order targets queue for
//! retroactive reconciliation), indirect blocks surface their data
//! pointers. References that cannot possibly be valid — outside the data
//! region, or pointing at a block that does not parse as the structure
//! the owner claims — are repaired by dropping the reference.
//!
//! After the sweep, everything still unclassified is free space.

use crate::block_map::BlockKind;
use crate::context::{FsckContext, ScanControl};
use crate::index::{DirEntry, InodeRecord};
use crate::pipeline::PassOutcome;
use mend_error::Result;
use mend_ondisk::{DirLeaf, DiskInode, FileKind, Indirect};
use mend_types::{BlockNumber, ParseError};
use tracing::{debug, trace, warn};

pub fn pass1(ctx: &mut FsckContext<'_>) -> Result<PassOutcome> {
    let first = ctx.sb.first_data_block.0;
    let last = ctx.sb.last_fs_block.0;

    for raw in first..=last {
        let addr = BlockNumber(raw);
        if ctx.checkpoint(addr)? == ScanControl::Stop {
            return Ok(PassOutcome::Skipped);
        }
        if raw % 65536 == 0 {
            trace!(target: "mend::check::pass1", block = raw, "scan progress");
        }

        let buf = ctx.read_block(addr)?;
        let inode = match DiskInode::parse(buf.as_slice()) {
            Ok(inode) => inode,
            Err(ParseError::InvalidMagic { .. }) => continue,
            Err(err) => {
                // Inode magic with a malformed body: not salvageable as an
                // inode, left unclassified so the free sweep reclaims it.
                warn!(
                    target: "mend::check::pass1",
                    block = raw,
                    error = %err,
                    "malformed inode block"
                );
                ctx.tally.bad_inodes += 1;
                continue;
            }
        };

        ctx.index.register(InodeRecord::from_disk(addr, &inode))?;
        // The superblock's reference to root and to each system inode
        // counts as one link; directory entries supply the rest.
        if addr == ctx.sb.root_inode || ctx.is_system(addr) {
            if let Some(record) = ctx.index.lookup_mut(addr) {
                record.observed_link_count += 1;
            }
        }
        ctx.map.set(addr, BlockKind::Inode)?;
        walk_inode(ctx, addr, &inode)?;
    }

    let freed = ctx.map.finalize_free();
    debug!(
        target: "mend::check::pass1",
        inodes = ctx.index.len(),
        free_blocks = freed,
        "scan complete"
    );
    Ok(PassOutcome::Completed)
}

/// Classify everything one inode owns, repairing unusable references.
fn walk_inode(ctx: &mut FsckContext<'_>, addr: BlockNumber, inode: &DiskInode) -> Result<()> {
    let system = ctx.is_system(addr);

    for ptr in inode.ptrs.iter().copied() {
        if !ctx.sb.contains(ptr) {
            drop_ptr(ctx, addr, ptr, "owned pointer outside the data region")?;
            continue;
        }
        let buf = ctx.read_block(ptr)?;

        match inode.kind {
            FileKind::Directory => match DirLeaf::parse(buf.as_slice()) {
                Ok(leaf) => {
                    ctx.map.set(ptr, BlockKind::DirLeaf)?;
                    for raw_entry in leaf.entries {
                        ctx.index.record_entry(
                            addr,
                            DirEntry {
                                name: raw_entry.name,
                                target: raw_entry.target,
                                kind: raw_entry.kind,
                                origin: Some(ptr),
                            },
                        )?;
                    }
                }
                Err(err) => {
                    warn!(
                        target: "mend::check::pass1",
                        dir = addr.0,
                        leaf = ptr.0,
                        error = %err,
                        "unreadable directory leaf"
                    );
                    drop_ptr(ctx, addr, ptr, "directory leaf does not parse")?;
                }
            },
            FileKind::Regular | FileKind::Symlink | FileKind::Special => {
                match Indirect::parse(buf.as_slice()) {
                    Ok(indirect) => {
                        ctx.map.set(ptr, BlockKind::Indirect)?;
                        walk_indirect(ctx, addr, ptr, indirect, system)?;
                    }
                    Err(err) => {
                        warn!(
                            target: "mend::check::pass1",
                            inode = addr.0,
                            indirect = ptr.0,
                            error = %err,
                            "unreadable indirect block"
                        );
                        drop_ptr(ctx, addr, ptr, "indirect block does not parse")?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Classify the data pointers below one indirect block.
fn walk_indirect(
    ctx: &mut FsckContext<'_>,
    owner: BlockNumber,
    indirect: BlockNumber,
    parsed: Indirect,
    system: bool,
) -> Result<()> {
    let child_kind = if system { BlockKind::Meta } else { BlockKind::Data };
    let mut kept = Vec::with_capacity(parsed.ptrs.len());

    for data_ptr in parsed.ptrs {
        if !ctx.sb.contains(data_ptr) {
            let apply = ctx.query(&format!(
                "inode {owner}: data pointer {data_ptr} outside the data region; remove it?"
            ))?;
            if apply {
                ctx.tally.ptrs_dropped += 1;
                if let Some(record) = ctx.index.lookup_mut(owner) {
                    record.dirty = true;
                }
                continue;
            }
            kept.push(data_ptr);
            continue;
        }
        ctx.map.set(data_ptr, child_kind)?;
        kept.push(data_ptr);
    }

    if let Some(record) = ctx.index.lookup_mut(owner) {
        record.children.insert(indirect, kept);
    }
    Ok(())
}

/// Ask to remove an unusable owned pointer from its inode.
fn drop_ptr(
    ctx: &mut FsckContext<'_>,
    owner: BlockNumber,
    ptr: BlockNumber,
    why: &str,
) -> Result<()> {
    let apply = ctx.query(&format!(
        "inode {owner}: {why} (block {ptr}); remove the reference?"
    ))?;
    if apply {
        if let Some(record) = ctx.index.lookup_mut(owner) {
            if record.detach_ref(ptr) {
                record.dirty = true;
                ctx.tally.ptrs_dropped += 1;
            }
        }
    }
    Ok(())
}
