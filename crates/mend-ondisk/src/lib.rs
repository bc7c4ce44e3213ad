#![forbid(unsafe_code)]
//! mendfs on-disk structures.
//!
//! Fixed-offset little-endian layouts with magic-checked parses and the
//! matching encoders the repair path uses at commit time. The parsing layer
//! returns `ParseError` from `mend-types`; callers that know the block
//! number wrap failures into runtime errors at their own boundary.
//!
//! Layout summary (all fields little-endian):
//!
//! | Block | Contents |
//! |-------|----------|
//! | 0 | superblock |
//! | `bitmap_start..+bitmap_blocks` | allocation bitmap, 1 bit per data-region address |
//! | `first_data_block..=last_fs_block` | inodes, directory leaves, indirect blocks, data |

mod bitmap;
mod builder;
mod meta;
mod superblock;

pub use bitmap::{bitmap_count_set, bitmap_get, bitmap_set};
pub use builder::ImageBuilder;
pub use meta::{
    DirLeaf, DiskInode, Indirect, LeafEntry, INDIRECT_HEADER_LEN, INODE_HEADER_LEN,
    LEAF_HEADER_LEN,
};
pub use superblock::{Superblock, SUPERBLOCK_PROBE_LEN};

use mend_types::ParseError;
use serde::{Deserialize, Serialize};

/// On-disk object kind, shared by inode headers and directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Special,
}

impl FileKind {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Regular => 1,
            Self::Directory => 2,
            Self::Symlink => 3,
            Self::Special => 4,
        }
    }

    pub fn from_raw(raw: u8) -> Result<Self, ParseError> {
        match raw {
            1 => Ok(Self::Regular),
            2 => Ok(Self::Directory),
            3 => Ok(Self::Symlink),
            4 => Ok(Self::Special),
            _ => Err(ParseError::InvalidField {
                field: "file_kind",
                reason: "must be 1..=4",
            }),
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Special => "special",
        }
    }
}
