#![forbid(unsafe_code)]
//! Error types for fsmend.
//!
//! # Error Taxonomy
//!
//! fsmend uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `mend-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `MendError` | `mend-error` (this crate) | CLI- and pipeline-facing errors |
//!
//! `mend-error` is intentionally independent of `mend-types` and `mend-ondisk`
//! to avoid cyclic dependencies. Conversions from `ParseError` happen at the
//! crate boundaries that hold the context needed to choose a variant: the
//! checker wraps live-metadata parse failures as `Corruption` (the block
//! number is known), while mount-time superblock failures become `Format` or
//! `InvalidGeometry`.
//!
//! Structural inconsistencies found on a volume — duplicate claims, dangling
//! entries, link-count mismatches — are NOT errors. They are expected inputs,
//! repaired in place by the pass that finds them. Only unexpected conditions
//! (I/O failure, a violated internal invariant) surface as `MendError`, and
//! every one of them is fatal to the run.
//!
//! ## Classification
//!
//! Every variant maps to exactly one stable class label via
//! [`MendError::class`]. The mapping is exhaustive (no wildcard arms) so
//! adding a new variant is a compile error until its class is assigned. The
//! labels feed structured logs and the machine-readable check report.

use thiserror::Error;

/// Unified error type for all fsmend operations.
///
/// This is the canonical error type returned by the pass pipeline, the
/// storage layer, and the CLI. Internal crate-specific errors (e.g.
/// `ParseError` from `mend-types`) are converted into `MendError` at crate
/// boundaries.
#[derive(Debug, Error)]
pub enum MendError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk metadata corruption detected at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// Invalid on-disk format (wrong filesystem type, unsupported version).
    ///
    /// Used during startup validation when the image structure is
    /// fundamentally wrong (bad magic, unknown version).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Parse-layer error surfaced without block context.
    ///
    /// Carries the string representation of a `ParseError` from
    /// `mend-types`. Prefer `Corruption` or `Format` when the block number
    /// or startup context is known.
    #[error("parse error: {0}")]
    Parse(String),

    /// On-disk geometry is invalid or out of the supported range.
    ///
    /// Used during startup validation for block counts, bitmap coverage,
    /// or system inode addresses that are numerically invalid.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A block address fell outside the volume's data region.
    #[error("block {block} outside the data region")]
    OutOfRange { block: u64 },

    /// An inode was registered twice at the same block address.
    ///
    /// The scan pass visits each address exactly once, so a second
    /// registration is a violated internal invariant, not a volume defect.
    #[error("inode already registered at block {block}")]
    DuplicateKey { block: u64 },

    /// The same orphan was handed to the lost+found relocator twice.
    #[error("orphan at block {block} already relocated")]
    AlreadyRelocated { block: u64 },

    /// No free block available for a required allocation.
    #[error("no free blocks left on the volume")]
    NoSpace,

    /// Violated internal invariant with no more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PartialEq for MendError {
    /// Structural equality over the error variants.
    ///
    /// `std::io::Error` is not itself `PartialEq`, so the `Io` arm compares
    /// by [`std::io::ErrorKind`]. This relation exists so test assertions can
    /// compare `Result<_, MendError>` values directly; it is not used by the
    /// crate's runtime logic.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            (
                Self::Corruption { block: a, detail: ad },
                Self::Corruption { block: b, detail: bd },
            ) => a == b && ad == bd,
            (Self::Format(a), Self::Format(b)) => a == b,
            (Self::Parse(a), Self::Parse(b)) => a == b,
            (Self::InvalidGeometry(a), Self::InvalidGeometry(b)) => a == b,
            (Self::OutOfRange { block: a }, Self::OutOfRange { block: b }) => a == b,
            (Self::DuplicateKey { block: a }, Self::DuplicateKey { block: b }) => a == b,
            (Self::AlreadyRelocated { block: a }, Self::AlreadyRelocated { block: b }) => a == b,
            (Self::NoSpace, Self::NoSpace) => true,
            (Self::Internal(a), Self::Internal(b)) => a == b,
            _ => false,
        }
    }
}

impl MendError {
    /// Stable class label for structured logs and reports.
    ///
    /// The mapping is exhaustive — every variant has an explicit arm. Adding
    /// a new variant without updating this function is a compile error.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Corruption { .. } => "corruption",
            Self::Format(_) => "format",
            Self::Parse(_) => "parse",
            Self::InvalidGeometry(_) => "geometry",
            Self::OutOfRange { .. } => "out_of_range",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::AlreadyRelocated { .. } => "already_relocated",
            Self::NoSpace => "no_space",
            Self::Internal(_) => "internal",
        }
    }

    /// Process exit status for a run that failed with this error.
    ///
    /// All failures exit 1; success (no error) exits 0. Kept as a method so
    /// the policy lives next to the error type rather than in the binary.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Result alias using `MendError`.
pub type Result<T> = std::result::Result<T, MendError>;
