//! Collaborator contracts (§6.1) and the inode handle the engine mutates.

use bitflags::bitflags;

use crate::error::BmptError;
use crate::geometry::FsGeometry;
use crate::header::{Header, HEADER_REGION_SIZE, HEADER_SIZE};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        /// The inode's block-pointer region is interpreted as a BMPT.
        const USES_BMPT = 0x0000_0001;
        /// Per-data-block duplication is requested for this inode.
        const DUP_RUN = 0x0000_0002;
    }
}

/// The caller's in-memory inode. The engine reads and mutates this struct
/// and persists it through [`InodeIo::write_inode`]; it never owns storage
/// for the inode itself.
#[derive(Clone, Debug)]
pub struct Inode {
    pub ino: u64,
    pub flags: InodeFlags,
    pub block_count: u64,
    header_region: [u8; HEADER_REGION_SIZE],
}

impl Inode {
    pub fn new(ino: u64, flags: InodeFlags, block_count: u64) -> Self {
        Self { ino, flags, block_count, header_region: [0; HEADER_REGION_SIZE] }
    }

    /// Builds an inode from an on-disk block-pointer region already read by
    /// the caller (e.g. via `read_inode`).
    pub fn from_raw_region(
        ino: u64,
        flags: InodeFlags,
        block_count: u64,
        header_region: [u8; HEADER_REGION_SIZE],
    ) -> Self {
        Self { ino, flags, block_count, header_region }
    }

    pub fn header_region(&self) -> &[u8; HEADER_REGION_SIZE] {
        &self.header_region
    }

    pub(crate) fn primary_bytes(&self) -> &[u8] {
        &self.header_region[..HEADER_SIZE]
    }

    pub(crate) fn set_header(&mut self, header: Header) {
        header.encode_into(&mut self.header_region[..HEADER_SIZE]);
    }

    /// The reserved second header. Never written by anything but [`crate::mapper::init`].
    pub fn secondary_header(&self) -> Option<Header> {
        Header::decode(&self.header_region[HEADER_SIZE..])
    }

    pub(crate) fn set_secondary_header(&mut self, header: Header) {
        header.encode_into(&mut self.header_region[HEADER_SIZE..]);
    }
}

/// Allocates and frees physical blocks.
pub trait BlockAllocator {
    fn alloc_block(&mut self, goal: u32) -> Result<u32, BmptError>;
    /// Marks `blkno` free. Idempotent for the engine's rollback paths.
    fn release_block(&mut self, blkno: u32);
}

/// Reads and writes physical blocks.
pub trait BlockIo {
    fn read_block(&mut self, blkno: u32, buf: &mut [u8]) -> Result<(), BmptError>;
    /// Writes the same `buf` to every block number in `blocks`.
    fn write_block_to_many(&mut self, blocks: &[u32], buf: &[u8]) -> Result<(), BmptError>;
}

/// Persists the inode struct, including its block-pointer region.
pub trait InodeIo {
    fn write_inode(&mut self, inode: &Inode) -> Result<(), BmptError>;
}

/// Read-only block-group topology queries.
pub trait GroupTopology {
    fn group_of_ino(&self, ino: u64) -> u32;
    fn group_first_block(&self, group: u32) -> u32;
    fn groups_count(&self) -> u32;
}

/// The full set of collaborators the engine needs to operate on one inode.
pub trait Device: BlockAllocator + BlockIo + InodeIo + GroupTopology {
    fn geometry(&self) -> &FsGeometry;
}
