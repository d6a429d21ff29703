//! An in-memory mock [`Device`] for exercising the engine end to end.
//!
//! There is no way to carry a real multi-gigabyte filesystem image into
//! this exercise, so blocks live in a `Vec<u8>` and the block-group
//! topology is a single trivial group.

use std::collections::HashMap;

use bmpt::{BlockAllocator, BlockIo, BmptError, Device, FsGeometry, GroupTopology, Inode, InodeIo};

pub const BLOCK_SIZE: u32 = 1024;

/// A single injectable I/O fault: fail the `nth` call to `op` from now on
/// (decrementing on every matching call until it hits zero, then erroring
/// once).
#[derive(Clone, Copy, Debug)]
pub struct Fault {
    pub op: FaultOp,
    pub after: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOp {
    WriteBlock,
    WriteInode,
}

pub struct MemDevice {
    geometry: FsGeometry,
    blocks: HashMap<u32, Vec<u8>>,
    free: Vec<u32>,
    next_block: u32,
    fault: Option<Fault>,
}

impl MemDevice {
    pub fn new() -> Self {
        Self::with_dup_cnt(3)
    }

    pub fn with_dup_cnt(dup_cnt: u8) -> Self {
        Self {
            geometry: FsGeometry { block_size: BLOCK_SIZE, log_groups_per_flex: 0, dupinode_dup_cnt: dup_cnt },
            blocks: HashMap::new(),
            free: Vec::new(),
            next_block: 1,
            fault: None,
        }
    }

    pub fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn block_exists(&self, blkno: u32) -> bool {
        self.blocks.contains_key(&blkno)
    }

    pub fn allocated_count(&self) -> usize {
        self.blocks.len()
    }

    fn maybe_fail(&mut self, op: FaultOp) -> Result<(), BmptError> {
        if let Some(f) = self.fault.as_mut() {
            if f.op == op {
                if f.after == 0 {
                    self.fault = None;
                    return Err(BmptError::Io(std::io::Error::other("injected fault")));
                }
                f.after -= 1;
            }
        }
        Ok(())
    }
}

impl Default for MemDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockAllocator for MemDevice {
    fn alloc_block(&mut self, _goal: u32) -> Result<u32, BmptError> {
        if let Some(blkno) = self.free.pop() {
            return Ok(blkno);
        }
        let blkno = self.next_block;
        self.next_block += 1;
        Ok(blkno)
    }

    fn release_block(&mut self, blkno: u32) {
        self.blocks.remove(&blkno);
        self.free.push(blkno);
    }
}

impl BlockIo for MemDevice {
    fn read_block(&mut self, blkno: u32, buf: &mut [u8]) -> Result<(), BmptError> {
        let data = self.blocks.entry(blkno).or_insert_with(|| vec![0u8; BLOCK_SIZE as usize]);
        buf.copy_from_slice(data);
        Ok(())
    }

    fn write_block_to_many(&mut self, blocks: &[u32], buf: &[u8]) -> Result<(), BmptError> {
        self.maybe_fail(FaultOp::WriteBlock)?;
        for &blkno in blocks {
            self.blocks.insert(blkno, buf.to_vec());
        }
        Ok(())
    }
}

impl InodeIo for MemDevice {
    fn write_inode(&mut self, _inode: &Inode) -> Result<(), BmptError> {
        self.maybe_fail(FaultOp::WriteInode)
    }
}

impl GroupTopology for MemDevice {
    fn group_of_ino(&self, _ino: u64) -> u32 {
        0
    }
    fn group_first_block(&self, _group: u32) -> u32 {
        0
    }
    fn groups_count(&self) -> u32 {
        1
    }
}

impl Device for MemDevice {
    fn geometry(&self) -> &FsGeometry {
        &self.geometry
    }
}

pub fn new_inode(ino: u64) -> Inode {
    Inode::new(ino, bmpt::InodeFlags::empty(), 0)
}
