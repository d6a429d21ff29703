//! A per-inode, fixed-fanout, multi-level block-mapping tree with
//! triple-copy physical redundancy and on-demand height growth.

mod branch;
pub mod device;
pub mod error;
pub mod geometry;
mod goal;
pub mod header;
pub mod instrument;
pub mod mapper;
pub mod record;
pub mod traverse;
mod util;

pub use device::{BlockAllocator, BlockIo, Device, GroupTopology, Inode, InodeFlags, InodeIo};
pub use error::BmptError;
pub use geometry::FsGeometry;
pub use header::{Header, HeaderFlags, HEADER_REGION_SIZE, HEADER_SIZE, MAGIC, MAX_LEVELS};
pub use instrument::{InstrumentedDevice, MaybeInstrumented};
pub use mapper::{init, map, map_alloc, map_read, map_set, MapInfo, Mode};
pub use record::{LogicalRecord, PhysicalRecord, N_COPIES, RECORD_SIZE};
pub use traverse::{punch, walk, PunchOutcome, WalkControl, WalkOutcome, WalkVisit};
