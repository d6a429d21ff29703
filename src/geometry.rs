//! Filesystem geometry the engine needs, supplied by the caller (§6.1).

use crate::record::RECORD_SIZE;

/// The slice of superblock fields the engine actually reads. The caller
/// builds this from whatever superblock type it already has; this crate
/// never parses one itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsGeometry {
    pub block_size: u32,
    pub log_groups_per_flex: u8,
    /// Number of distinct copies a data block gets when `DUP` is set.
    /// Must be `<= N_COPIES`.
    pub dupinode_dup_cnt: u8,
}

impl FsGeometry {
    /// Records per indirection block.
    pub fn fanout(&self) -> u64 {
        self.block_size as u64 / RECORD_SIZE as u64
    }
}
