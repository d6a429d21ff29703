//! Growth/branch builder (§4.3).

use crate::device::{BlockAllocator, Device, Inode};
use crate::error::BmptError;
use crate::geometry::FsGeometry;
use crate::goal::goal;
use crate::header::Header;
use crate::record::{encode_record_at, LogicalRecord, N_COPIES};
use crate::util::offset_at_level;

/// Tracks every block allocated during one `map` call so a failure anywhere
/// in the call can release exactly what this call allocated (§4.3.3,
/// §4.4.3). This is the scoped-acquisition pattern the design notes ask
/// for: a plain value threaded through the call, not a destructor, because
/// the "commit" point is an explicit write, not scope exit.
pub(crate) struct AllocTracker {
    blocks: Vec<u32>,
}

impl AllocTracker {
    pub(crate) fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    pub(crate) fn alloc<D: BlockAllocator>(&mut self, device: &mut D, goal: u32) -> Result<u32, BmptError> {
        let blkno = device.alloc_block(goal)?;
        self.blocks.push(blkno);
        Ok(blkno)
    }

    /// Releases every block allocated so far, in reverse allocation order.
    pub(crate) fn rollback<D: BlockAllocator>(&self, device: &mut D) {
        for &blkno in self.blocks.iter().rev() {
            device.release_block(blkno);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }
}

/// One freshly allocated indirection block: its `N` copy block numbers and
/// its in-memory content, not yet (or just) written.
pub(crate) struct ChainLevel {
    pub(crate) blocknos: [u32; N_COPIES],
    pub(crate) buf: Vec<u8>,
}

fn alloc_n_copies<D: Device>(
    device: &mut D,
    ino: u64,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
) -> Result<[u32; N_COPIES], BmptError> {
    let mut blocknos = [0u32; N_COPIES];
    for (slot, blkno) in blocknos.iter_mut().enumerate() {
        let g = goal(ino, slot, geometry, device);
        *blkno = tracker.alloc(device, g)?;
    }
    Ok(blocknos)
}

/// `build_branch` (§4.3.2): allocates a chain of `depth` fresh indirection
/// blocks for `target_block`, the deepest of which (index `depth - 1`) is
/// left with no leaf pointer — installing one is the mapper's job. The
/// chain is written bottom-up and returned; splicing its head into the
/// existing parent is deferred to the caller (§4.4.1 step 7).
pub(crate) fn build_branch<D: Device>(
    device: &mut D,
    ino: u64,
    target_block: u64,
    depth: u32,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
) -> Result<Vec<ChainLevel>, BmptError> {
    let fanout = geometry.fanout();
    let n = depth as usize;
    let mut chain = Vec::with_capacity(n);
    for _ in 0..n {
        let blocknos = alloc_n_copies(device, ino, geometry, tracker)?;
        chain.push(ChainLevel { blocknos, buf: vec![0u8; geometry.block_size as usize] });
    }

    // chain[i] lives at level (depth - 1 - i); its one populated slot points
    // at chain[i + 1], at the offset real lookups will actually probe.
    for i in 0..n.saturating_sub(1) {
        let level_of_this_block = depth - 1 - i as u32;
        let off = offset_at_level(target_block, level_of_this_block, fanout) as usize;
        let next = chain[i + 1].blocknos;
        encode_record_at(&mut chain[i].buf, off, LogicalRecord { copies: next, flags: 0 });
    }

    for level in chain.iter().rev() {
        device.write_block_to_many(&level.blocknos, &level.buf)?;
    }

    Ok(chain)
}

/// `increase_height` (§4.3.1): grows the tree by `new_levels - header.levels`
/// new apex levels, splicing the old root under the new one, and persists
/// the result via `write_inode` as its own commit point.
pub(crate) fn increase_height<D: Device>(
    device: &mut D,
    inode: &mut Inode,
    header: &mut Header,
    new_levels: u32,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
) -> Result<(), BmptError> {
    let add = new_levels - header.levels;
    let n = add as usize;
    let mut blocks = Vec::with_capacity(n);
    for _ in 0..n {
        let blocknos = alloc_n_copies(device, inode.ino, geometry, tracker)?;
        blocks.push(ChainLevel { blocknos, buf: vec![0u8; geometry.block_size as usize] });
    }

    for i in 0..n {
        if i != n - 1 {
            let next = blocks[i + 1].blocknos;
            encode_record_at(&mut blocks[i].buf, 0, LogicalRecord { copies: next, flags: 0 });
        } else {
            encode_record_at(&mut blocks[i].buf, 0, header.root);
        }
    }

    for level in blocks.iter().rev() {
        device.write_block_to_many(&level.blocknos, &level.buf)?;
    }

    header.levels = new_levels;
    header.root = LogicalRecord { copies: blocks[0].blocknos, flags: 0 };
    inode.set_header(*header);
    device.write_inode(inode)?;
    Ok(())
}
