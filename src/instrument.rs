//! Optional CSV I/O logging decorator (§10.2).

use std::io::Write;

use crate::device::{BlockAllocator, BlockIo, Device, GroupTopology, Inode, InodeIo};
use crate::error::BmptError;
use crate::geometry::FsGeometry;

/// A decorator that wraps any [`Device`] and logs block-level operations to
/// a CSV file.
pub struct InstrumentedDevice<D> {
    inner: D,
    io_log: std::io::BufWriter<std::fs::File>,
    remaining: usize,
}

impl<D> InstrumentedDevice<D> {
    pub fn new(inner: D, log_path: &str, limit: usize) -> Result<Self, BmptError> {
        let f = std::fs::File::create(log_path)?;
        let mut w = std::io::BufWriter::new(f);
        writeln!(w, "op,blkno,len").map_err(BmptError::Io)?;
        Ok(Self { inner, io_log: w, remaining: limit })
    }

    fn log(&mut self, op: &str, blkno: u32, len: usize) {
        if self.remaining == 0 {
            return;
        }
        let _ = writeln!(self.io_log, "{op},{blkno},{len}");
        self.remaining -= 1;
    }
}

impl<D: BlockAllocator> BlockAllocator for InstrumentedDevice<D> {
    fn alloc_block(&mut self, goal: u32) -> Result<u32, BmptError> {
        let blkno = self.inner.alloc_block(goal)?;
        self.log("alloc", blkno, 1);
        Ok(blkno)
    }

    fn release_block(&mut self, blkno: u32) {
        self.log("release", blkno, 1);
        self.inner.release_block(blkno);
    }
}

impl<D: BlockIo> BlockIo for InstrumentedDevice<D> {
    fn read_block(&mut self, blkno: u32, buf: &mut [u8]) -> Result<(), BmptError> {
        self.log("read", blkno, buf.len());
        self.inner.read_block(blkno, buf)
    }

    fn write_block_to_many(&mut self, blocks: &[u32], buf: &[u8]) -> Result<(), BmptError> {
        for &blkno in blocks {
            self.log("write", blkno, buf.len());
        }
        self.inner.write_block_to_many(blocks, buf)
    }
}

impl<D: InodeIo> InodeIo for InstrumentedDevice<D> {
    fn write_inode(&mut self, inode: &Inode) -> Result<(), BmptError> {
        self.log("write_inode", inode.ino as u32, 0);
        self.inner.write_inode(inode)
    }
}

impl<D: GroupTopology> GroupTopology for InstrumentedDevice<D> {
    fn group_of_ino(&self, ino: u64) -> u32 {
        self.inner.group_of_ino(ino)
    }
    fn group_first_block(&self, group: u32) -> u32 {
        self.inner.group_first_block(group)
    }
    fn groups_count(&self) -> u32 {
        self.inner.groups_count()
    }
}

impl<D: Device> Device for InstrumentedDevice<D> {
    fn geometry(&self) -> &FsGeometry {
        self.inner.geometry()
    }
}

/// Runtime choice between a bare device and an instrumented one, avoiding
/// dynamic dispatch while letting the decision happen at runtime.
pub enum MaybeInstrumented<D> {
    Bare(D),
    Instrumented(InstrumentedDevice<D>),
}

impl<D> MaybeInstrumented<D> {
    /// If `BMPT_IO_LOG` is set, wraps `inner` with CSV logging to that path,
    /// optionally capped by `BMPT_IO_LOG_LIMIT`.
    pub fn from_env(inner: D) -> Result<Self, BmptError> {
        if let Ok(path) = std::env::var("BMPT_IO_LOG") {
            let limit = std::env::var("BMPT_IO_LOG_LIMIT")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(usize::MAX);
            Ok(Self::Instrumented(InstrumentedDevice::new(inner, &path, limit)?))
        } else {
            Ok(Self::Bare(inner))
        }
    }
}

impl<D: BlockAllocator> BlockAllocator for MaybeInstrumented<D> {
    fn alloc_block(&mut self, goal: u32) -> Result<u32, BmptError> {
        match self {
            Self::Bare(d) => d.alloc_block(goal),
            Self::Instrumented(d) => d.alloc_block(goal),
        }
    }
    fn release_block(&mut self, blkno: u32) {
        match self {
            Self::Bare(d) => d.release_block(blkno),
            Self::Instrumented(d) => d.release_block(blkno),
        }
    }
}

impl<D: BlockIo> BlockIo for MaybeInstrumented<D> {
    fn read_block(&mut self, blkno: u32, buf: &mut [u8]) -> Result<(), BmptError> {
        match self {
            Self::Bare(d) => d.read_block(blkno, buf),
            Self::Instrumented(d) => d.read_block(blkno, buf),
        }
    }
    fn write_block_to_many(&mut self, blocks: &[u32], buf: &[u8]) -> Result<(), BmptError> {
        match self {
            Self::Bare(d) => d.write_block_to_many(blocks, buf),
            Self::Instrumented(d) => d.write_block_to_many(blocks, buf),
        }
    }
}

impl<D: InodeIo> InodeIo for MaybeInstrumented<D> {
    fn write_inode(&mut self, inode: &Inode) -> Result<(), BmptError> {
        match self {
            Self::Bare(d) => d.write_inode(inode),
            Self::Instrumented(d) => d.write_inode(inode),
        }
    }
}

impl<D: GroupTopology> GroupTopology for MaybeInstrumented<D> {
    fn group_of_ino(&self, ino: u64) -> u32 {
        match self {
            Self::Bare(d) => d.group_of_ino(ino),
            Self::Instrumented(d) => d.group_of_ino(ino),
        }
    }
    fn group_first_block(&self, group: u32) -> u32 {
        match self {
            Self::Bare(d) => d.group_first_block(group),
            Self::Instrumented(d) => d.group_first_block(group),
        }
    }
    fn groups_count(&self) -> u32 {
        match self {
            Self::Bare(d) => d.groups_count(),
            Self::Instrumented(d) => d.groups_count(),
        }
    }
}

impl<D: Device> Device for MaybeInstrumented<D> {
    fn geometry(&self) -> &FsGeometry {
        match self {
            Self::Bare(d) => d.geometry(),
            Self::Instrumented(d) => d.geometry(),
        }
    }
}
