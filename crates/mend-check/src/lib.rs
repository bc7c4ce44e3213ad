#![forbid(unsafe_code)]
//! fsmend checker core.
//!
//! An offline consistency checker and repairer: scans the entire block
//! address space of a volume, classifies every block, detects and
//! resolves structural corruption, and either commits repairs back to
//! the volume or leaves it untouched on fatal failure.
//!
//! # Flow
//!
//! ```text
//! scan → dup detect → dup resolve → dir entries → connectivity → links → bitmap → commit
//! ```
//!
//! A single logical thread drives the whole pipeline. The only
//! concurrency is the SIGINT path, which sets one atomic flag; the
//! interrupt prompt itself runs on the main thread at the cooperative
//! poll points inside each pass (see [`cancel`]).

pub mod bitmap;
pub mod block_map;
pub mod cancel;
pub mod connect;
pub mod context;
pub mod dirent;
pub mod dup;
pub mod index;
pub mod links;
pub mod lost_found;
pub mod pipeline;
pub mod scan;

pub use bitmap::BitmapShadow;
pub use block_map::{BlockKind, BlockMap};
pub use cancel::{
    register_sigint, CancelFlags, ControlChannel, InterruptDecision, ScriptChannel, StdinChannel,
};
pub use context::{CheckOptions, FsckContext, PassState, RepairTally, ScanControl};
pub use dup::{ClaimTable, DupClaim};
pub use index::{DirEntry, InodeIndex, InodeRecord};
pub use lost_found::LostFound;
pub use pipeline::{run, run_phases, CheckReport, CommitStats, PassOutcome, Phase, PHASES};
