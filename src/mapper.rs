//! The mapper (§4.4): `map(inode, mode, logical_block) -> (record, info)`.

use bitflags::bitflags;

use crate::branch::{build_branch, increase_height, AllocTracker, ChainLevel};
use crate::device::{Device, Inode, InodeFlags};
use crate::error::BmptError;
use crate::geometry::FsGeometry;
use crate::header::{Header, MAX_LEVELS};
use crate::record::{decode_record_at, encode_record_at, LogicalRecord, N_COPIES};
use crate::util::{min_height, offset_at_level};

bitflags! {
    /// Operating mode for [`map`]. `ALLOC | SET` are the insert-capable modes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mode: u8 {
        const READ  = 0b001;
        const ALLOC = 0b010;
        const SET   = 0b100;
    }
}

impl Mode {
    pub fn is_insert(self) -> bool {
        self.intersects(Mode::ALLOC | Mode::SET)
    }
}

/// Metadata about what a successful [`map`] call actually did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MapInfo {
    /// The header lacked `magic` and was freshly initialized by this call.
    pub created_header: bool,
    /// `levels` increased to accommodate `logical_block`.
    pub grew_height: bool,
    /// Physical blocks allocated by this call (index and data, all copies).
    pub allocated_blocks: u32,
}

impl MapInfo {
    fn unchanged() -> Self {
        Self::default()
    }
}

/// `init` (§6.3): writes two fresh, empty headers into the inode and sets
/// its feature flags. Does not touch any block outside the inode itself.
pub fn init<D: Device>(device: &mut D, inode: &mut Inode, dup_on: bool) -> Result<(), BmptError> {
    let header = Header::empty(dup_on);
    inode.set_header(header);
    inode.set_secondary_header(header);
    inode.flags.insert(InodeFlags::USES_BMPT);
    inode.flags.set(InodeFlags::DUP_RUN, dup_on);
    device.write_inode(inode)
}

/// The generic mapper entry point (§4.4, §6.3).
///
/// `set_record` is required (and only used) when `mode` contains `SET`.
/// `alloc_payload` is the content written to a freshly allocated *data*
/// block; `None` zero-fills it.
pub fn map<D: Device>(
    device: &mut D,
    inode: &mut Inode,
    mode: Mode,
    logical_block: u64,
    set_record: Option<LogicalRecord>,
    alloc_payload: Option<&[u8]>,
) -> Result<(LogicalRecord, MapInfo), BmptError> {
    if !inode.flags.contains(InodeFlags::USES_BMPT) {
        return Err(BmptError::NotBmpt);
    }

    let geometry = *device.geometry();
    let fanout = geometry.fanout();
    let existing = Header::decode(inode.primary_bytes());
    let created_header = existing.is_none();

    let mut header = match existing {
        Some(h) => h,
        None => {
            if !mode.is_insert() {
                return Err(BmptError::BadHeader);
            }
            Header::empty(inode.flags.contains(InodeFlags::DUP_RUN))
        }
    };

    let need = min_height(logical_block, fanout);

    if mode == Mode::READ {
        // Pure lookup: never creates a header, never allocates, never writes.
        if need > header.levels {
            return Ok((LogicalRecord::null(), MapInfo::unchanged()));
        }
        let record = if header.levels == 0 {
            header.root
        } else {
            match descend(device, &header, logical_block, &geometry)? {
                Descent::Hole => LogicalRecord::null(),
                Descent::Leaf { buf, off, .. } => decode_record_at(&buf, off),
            }
        };
        return Ok((record, MapInfo::unchanged()));
    }

    let mut tracker = AllocTracker::new();
    let original_header = header;
    let mut grew = false;

    if need > header.levels {
        if need > MAX_LEVELS {
            return Err(BmptError::Corrupt("required height exceeds MAX_LEVELS"));
        }
        if let Err(e) = increase_height(device, inode, &mut header, need, &geometry, &mut tracker) {
            tracker.rollback(device);
            return Err(e);
        }
        grew = true;
    }

    let default_payload = vec![0u8; geometry.block_size as usize];
    let payload = alloc_payload.unwrap_or(&default_payload);

    let result = if header.levels == 0 {
        linear_insert(device, inode.ino, &header, mode, set_record, &geometry, &mut tracker, payload)
    } else {
        tree_insert(
            device,
            inode.ino,
            &header,
            mode,
            set_record,
            logical_block,
            &geometry,
            &mut tracker,
            payload,
        )
    };

    let outcome = match result {
        Ok(o) => o,
        Err(e) => {
            tracker.rollback(device);
            if grew {
                // `increase_height` already committed the new header via its
                // own `write_inode`, and that header now points at blocks
                // the rollback above just released. Restore the pre-growth
                // header and re-persist it, retrying once (§4.4.3): if the
                // corrective write fails twice, the on-disk header still
                // claims blocks that no longer exist, which this engine has
                // no way to reconcile further, so that second failure is
                // surfaced to the caller as fatal in place of the original.
                inode.set_header(original_header);
                if device.write_inode(inode).is_err() {
                    device.write_inode(inode)?;
                }
            }
            return Err(e);
        }
    };

    let changed = created_header || grew || tracker.len() > 0 || mode.contains(Mode::SET);
    if changed {
        inode.set_header(outcome.header);
        inode.block_count = inode.block_count.saturating_add(tracker.len() as u64);
        // Unlike the corrective re-write above, this bookkeeping write gets
        // no retry (§7): the engine retries I/O only for that one case.
        device.write_inode(inode)?;
    }

    Ok((
        outcome.record,
        MapInfo { created_header, grew_height: grew, allocated_blocks: tracker.len() as u32 },
    ))
}

/// Reads `logical_block` without ever mutating anything.
pub fn map_read<D: Device>(device: &mut D, inode: &Inode, logical_block: u64) -> Result<LogicalRecord, BmptError> {
    // `map` only takes `&mut Inode` because insert-capable modes may need to
    // mutate it; a local clone keeps the read path from requiring one.
    let mut scratch = inode.clone();
    let (rec, _) = map(device, &mut scratch, Mode::READ, logical_block, None, None)?;
    Ok(rec)
}

/// Allocates (or returns the existing) data block at `logical_block`.
pub fn map_alloc<D: Device>(
    device: &mut D,
    inode: &mut Inode,
    logical_block: u64,
    payload: Option<&[u8]>,
) -> Result<(LogicalRecord, MapInfo), BmptError> {
    map(device, inode, Mode::ALLOC, logical_block, None, payload)
}

/// Installs `record` directly at `logical_block`, growing the tree if needed.
pub fn map_set<D: Device>(
    device: &mut D,
    inode: &mut Inode,
    logical_block: u64,
    record: LogicalRecord,
) -> Result<MapInfo, BmptError> {
    let (_, info) = map(device, inode, Mode::SET, logical_block, Some(record), None)?;
    Ok(info)
}

struct Outcome {
    record: LogicalRecord,
    header: Header,
}

enum Descent {
    /// Read-only descent hit a null record at an interior level.
    Hole,
    /// Reached the leaf level; `off` is the record's index within `buf`.
    Leaf { blocknos: [u32; N_COPIES], buf: Vec<u8>, off: usize },
}

/// Read-only descent from `header.root` toward `logical_block` (requires
/// `header.levels >= 1`).
fn descend<D: Device>(
    device: &mut D,
    header: &Header,
    logical_block: u64,
    geometry: &FsGeometry,
) -> Result<Descent, BmptError> {
    let fanout = geometry.fanout();
    let mut cur_blocknos = header.root.copies;
    let mut buf = vec![0u8; geometry.block_size as usize];

    for level in (0..header.levels).rev() {
        device.read_block(cur_blocknos[0], &mut buf)?;
        let off = offset_at_level(logical_block, level, fanout) as usize;

        if level == 0 {
            return Ok(Descent::Leaf { blocknos: cur_blocknos, buf, off });
        }

        let rec = decode_record_at(&buf, off);
        if rec.is_null() {
            return Ok(Descent::Hole);
        }
        cur_blocknos = rec.copies;
    }

    unreachable!("header.levels >= 1 guarantees the loop returns at level 0")
}

enum DescentMut {
    Leaf { blocknos: [u32; N_COPIES], buf: Vec<u8>, off: usize },
    /// Descent hit a null interior record; a fresh chain was built beneath
    /// the existing parent and must be spliced in once the leaf is set.
    Branched {
        parent_blocknos: [u32; N_COPIES],
        parent_buf: Vec<u8>,
        parent_off: usize,
        chain: Vec<ChainLevel>,
    },
}

/// Like [`descend`], but builds missing branches as it goes, routing their
/// allocations through the caller's tracker (requires `header.levels >= 1`).
fn descend_tracked<D: Device>(
    device: &mut D,
    header: &Header,
    logical_block: u64,
    geometry: &FsGeometry,
    ino: u64,
    tracker: &mut AllocTracker,
) -> Result<DescentMut, BmptError> {
    let fanout = geometry.fanout();
    let mut cur_blocknos = header.root.copies;
    let mut buf = vec![0u8; geometry.block_size as usize];

    for level in (0..header.levels).rev() {
        device.read_block(cur_blocknos[0], &mut buf)?;
        let off = offset_at_level(logical_block, level, fanout) as usize;

        if level == 0 {
            return Ok(DescentMut::Leaf { blocknos: cur_blocknos, buf, off });
        }

        let rec = decode_record_at(&buf, off);
        if rec.is_null() {
            let chain = build_branch(device, ino, logical_block, level, geometry, tracker)?;
            return Ok(DescentMut::Branched { parent_blocknos: cur_blocknos, parent_buf: buf, parent_off: off, chain });
        }
        cur_blocknos = rec.copies;
    }

    unreachable!("header.levels >= 1 guarantees the loop returns at level 0")
}

#[allow(clippy::too_many_arguments)]
fn tree_insert<D: Device>(
    device: &mut D,
    ino: u64,
    header: &Header,
    mode: Mode,
    set_record: Option<LogicalRecord>,
    logical_block: u64,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
    payload: &[u8],
) -> Result<Outcome, BmptError> {
    match descend_tracked(device, header, logical_block, geometry, ino, tracker)? {
        DescentMut::Leaf { blocknos, mut buf, off } => {
            let existing = decode_record_at(&buf, off);
            let (record, needs_write) =
                resolve_leaf(device, mode, set_record, existing, header, ino, geometry, tracker, payload)?;
            if needs_write {
                encode_record_at(&mut buf, off, record);
                device.write_block_to_many(&blocknos, &buf)?;
            }
            Ok(Outcome { record, header: *header })
        }
        DescentMut::Branched { parent_blocknos, mut parent_buf, parent_off, mut chain } => {
            let fanout = geometry.fanout();
            let leaf_off = offset_at_level(logical_block, 0, fanout) as usize;
            // A freshly built chain's leaf slot is always empty, so this is
            // always an allocation (ALLOC) or a direct install (SET).
            let (record, _) =
                resolve_leaf(device, mode, set_record, LogicalRecord::null(), header, ino, geometry, tracker, payload)?;
            {
                let last = chain.last_mut().expect("build_branch returns at least one level");
                encode_record_at(&mut last.buf, leaf_off, record);
                device.write_block_to_many(&last.blocknos, &last.buf)?;
            }
            // Splicing the new chain into the existing parent is the final
            // write of this call (§4.4.1 step 7).
            let child0 = chain[0].blocknos;
            encode_record_at(&mut parent_buf, parent_off, LogicalRecord { copies: child0, flags: 0 });
            device.write_block_to_many(&parent_blocknos, &parent_buf)?;
            Ok(Outcome { record, header: *header })
        }
    }
}

/// Decides (and, for ALLOC on an empty slot, performs) the leaf write
/// (§4.4.1 step 6). Returns whether the caller still needs to persist it.
#[allow(clippy::too_many_arguments)]
fn resolve_leaf<D: Device>(
    device: &mut D,
    mode: Mode,
    set_record: Option<LogicalRecord>,
    existing: LogicalRecord,
    header: &Header,
    ino: u64,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
    payload: &[u8],
) -> Result<(LogicalRecord, bool), BmptError> {
    if mode.contains(Mode::SET) {
        let record = set_record.ok_or(BmptError::InvalidRequest("SET mode requires a record"))?;
        return Ok((record, true));
    }
    // ALLOC is idempotent on an already-populated leaf.
    if !existing.is_null() {
        return Ok((existing, false));
    }
    let record = alloc_leaf_record(device, ino, header, geometry, tracker, payload)?;
    Ok((record, true))
}

/// Allocates a fresh data block (leaf) with `dup_cnt` (or `1`) copies per
/// whether `DUP` is set, writing `payload` to every copy.
fn alloc_leaf_record<D: Device>(
    device: &mut D,
    ino: u64,
    header: &Header,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
    payload: &[u8],
) -> Result<LogicalRecord, BmptError> {
    let mut record = LogicalRecord::null();
    let count = if header.has_dup() { geometry.dupinode_dup_cnt as usize } else { 1 };
    for slot in 0..count {
        let g = crate::goal::goal(ino, slot, geometry, device);
        record.copies[slot] = tracker.alloc(device, g)?;
    }
    device.write_block_to_many(&record.copies[..count], payload)?;
    Ok(record)
}

fn linear_insert<D: Device>(
    device: &mut D,
    ino: u64,
    header: &Header,
    mode: Mode,
    set_record: Option<LogicalRecord>,
    geometry: &FsGeometry,
    tracker: &mut AllocTracker,
    payload: &[u8],
) -> Result<Outcome, BmptError> {
    let mut new_header = *header;
    let record = if mode.contains(Mode::SET) {
        let r = set_record.ok_or(BmptError::InvalidRequest("SET mode requires a record"))?;
        new_header.root = r;
        r
    } else if !header.root.is_null() {
        header.root
    } else {
        let r = alloc_leaf_record(device, ino, header, geometry, tracker, payload)?;
        new_header.root = r;
        r
    };
    Ok(Outcome { record, header: new_header })
}
