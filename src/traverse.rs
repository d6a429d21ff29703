//! Range traversal: `punch` releases blocks, `walk` visits records (§5).
//!
//! Both are built on the same recursive shape. An entry's `level` is its
//! *remaining indirection count*: `level == 0` means the entry is itself a
//! leaf (data) pointer, `level > 0` means it points to a child array one
//! level further down. The header's root is treated uniformly as a single
//! `level == header.levels` entry — not `header.levels - 1` — which lets one
//! recursive function handle both the direct tree (`levels == 0`, the root
//! itself a leaf) and any indirect tree without special-casing the root.

use crate::device::{Device, Inode};
use crate::error::BmptError;
use crate::geometry::FsGeometry;
use crate::header::Header;
use crate::record::{decode_record_at, encode_record_at, LogicalRecord};
use crate::util::span_at_level;

/// One past the largest representable logical block number.
const BLK_MAX: u64 = u32::MAX as u64 + 1;

fn clamp_range(start: u64, end: u64) -> (u64, u64) {
    let end = end.min(BLK_MAX);
    let start = start.min(end);
    (start, end)
}

fn block_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

fn release_nonzero_copies<D: Device>(device: &mut D, record: LogicalRecord, freed: &mut u64) {
    for &blkno in record.copies.iter().filter(|&&b| b != 0) {
        device.release_block(blkno);
        *freed += 1;
    }
}

/// Result of a [`punch`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PunchOutcome {
    pub freed_blocks: u64,
}

/// Releases every physical block (data and indirection) backing logical
/// blocks in `[start, end)`, clearing the records that pointed to them.
pub fn punch<D: Device>(device: &mut D, inode: &mut Inode, start: u64, end: u64) -> Result<PunchOutcome, BmptError> {
    let header = Header::decode(inode.primary_bytes()).ok_or(BmptError::BadHeader)?;
    let (lo, hi) = clamp_range(start, end);
    if lo >= hi {
        return Ok(PunchOutcome::default());
    }

    let geometry = *device.geometry();
    let mut freed = 0u64;
    let new_root = punch_entry(device, header.levels, 0, header.root, lo, hi, &geometry, &mut freed)?;

    let root_changed = new_root != Some(header.root);
    if root_changed || freed > 0 {
        let mut updated = header;
        updated.root = new_root.unwrap_or(LogicalRecord::null());
        if updated.root.is_null() {
            updated.levels = 0;
        }
        inode.set_header(updated);
        inode.block_count = inode.block_count.saturating_sub(freed);
        device.write_inode(inode)?;
    }

    Ok(PunchOutcome { freed_blocks: freed })
}

/// Recursively punches the subtree rooted at `record` (at `level`, covering
/// logical blocks `[base, base + span)`) against `[lo, hi)`. Returns the
/// record's replacement: `None` if the whole subtree was released, `Some`
/// (possibly unchanged) otherwise.
fn punch_entry<D: Device>(
    device: &mut D,
    level: u32,
    base: u64,
    record: LogicalRecord,
    lo: u64,
    hi: u64,
    geometry: &FsGeometry,
    freed: &mut u64,
) -> Result<Option<LogicalRecord>, BmptError> {
    if record.is_null() {
        return Ok(None);
    }

    let fanout = geometry.fanout();
    let span = span_at_level(level, fanout);
    let entry_hi = base.saturating_add(span);

    if lo <= base && entry_hi <= hi {
        release_subtree(device, level, record, geometry, freed)?;
        return Ok(None);
    }

    if level == 0 {
        // A leaf's span is always 1, so partial overlap is no overlap.
        return Ok(Some(record));
    }

    let mut buf = vec![0u8; geometry.block_size as usize];
    device.read_block(record.copies[0], &mut buf)?;
    let child_span = span_at_level(level - 1, fanout);
    let mut changed = false;

    for i in 0..fanout as usize {
        let child_base = base + i as u64 * child_span;
        if child_base >= hi {
            break;
        }
        let child_hi = child_base + child_span;
        if child_hi <= lo {
            continue;
        }
        let child = decode_record_at(&buf, i);
        if child.is_null() {
            continue;
        }
        match punch_entry(device, level - 1, child_base, child, lo, hi, geometry, freed)? {
            None => {
                encode_record_at(&mut buf, i, LogicalRecord::null());
                changed = true;
            }
            Some(r) if r != child => {
                encode_record_at(&mut buf, i, r);
                changed = true;
            }
            _ => {}
        }
    }

    if changed && block_all_zero(&buf) {
        // Every child was released; this array itself is now dead weight.
        release_nonzero_copies(device, record, freed);
        return Ok(None);
    }

    if changed {
        device.write_block_to_many(&record.copies[..record.active_copies().max(1)], &buf)?;
    }

    Ok(Some(record))
}

fn release_subtree<D: Device>(
    device: &mut D,
    level: u32,
    record: LogicalRecord,
    geometry: &FsGeometry,
    freed: &mut u64,
) -> Result<(), BmptError> {
    if level > 0 {
        let mut buf = vec![0u8; geometry.block_size as usize];
        device.read_block(record.copies[0], &mut buf)?;
        let fanout = geometry.fanout();
        for i in 0..fanout as usize {
            let child = decode_record_at(&buf, i);
            if !child.is_null() {
                release_subtree(device, level - 1, child, geometry, freed)?;
            }
        }
    }
    release_nonzero_copies(device, record, freed);
    Ok(())
}

/// What a [`walk`] visitor decides for one record.
///
/// `walk` is read-only: a visitor cannot edit the tree it is traversing.
/// (A mutable, `Changed`-aware walker exists for the directory-expand
/// collaborator, but that is a distinct, out-of-scope component — not part
/// of this core's public surface.)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Abort,
}

/// One record offered to a [`walk`] visitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkVisit {
    pub logical: u64,
    pub record: LogicalRecord,
    /// Distance from the root (`0` at the root record itself).
    pub depth: u32,
    /// Remaining indirection count (`0` at a leaf).
    pub level: u32,
    pub dup_run: bool,
}

/// Result of a [`walk`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkOutcome {
    pub aborted: bool,
}

/// Read-only, pre-order traversal. Visits every leaf (data-block) record
/// whose logical block falls in `[start, end)`, in ascending order;
/// additionally visits each interior record it descends through when
/// `call_on_index` is set. Never writes a block or the inode.
pub fn walk<D: Device, F: FnMut(&WalkVisit) -> WalkControl>(
    device: &mut D,
    inode: &Inode,
    start: u64,
    end: u64,
    call_on_index: bool,
    mut visitor: F,
) -> Result<WalkOutcome, BmptError> {
    let header = Header::decode(inode.primary_bytes()).ok_or(BmptError::BadHeader)?;
    let (lo, hi) = clamp_range(start, end);
    if lo >= hi {
        return Ok(WalkOutcome::default());
    }

    let geometry = *device.geometry();
    let dup_run = header.has_dup();
    let aborted = walk_entry(
        device,
        header.levels,
        0,
        0,
        header.root,
        lo,
        hi,
        &geometry,
        dup_run,
        call_on_index,
        &mut visitor,
    )?;

    Ok(WalkOutcome { aborted })
}

/// Returns `true` if the walk was aborted partway through this subtree.
#[allow(clippy::too_many_arguments)]
fn walk_entry<D: Device, F: FnMut(&WalkVisit) -> WalkControl>(
    device: &mut D,
    level: u32,
    depth: u32,
    base: u64,
    record: LogicalRecord,
    lo: u64,
    hi: u64,
    geometry: &FsGeometry,
    dup_run: bool,
    call_on_index: bool,
    visitor: &mut F,
) -> Result<bool, BmptError> {
    if record.is_null() {
        return Ok(false);
    }

    let fanout = geometry.fanout();
    let span = span_at_level(level, fanout);
    if base >= hi || base.saturating_add(span) <= lo {
        return Ok(false);
    }

    if level == 0 {
        let visit = WalkVisit { logical: base, record, depth, level, dup_run };
        return Ok(matches!(visitor(&visit), WalkControl::Abort));
    }

    if call_on_index {
        let visit = WalkVisit { logical: base, record, depth, level, dup_run };
        if matches!(visitor(&visit), WalkControl::Abort) {
            return Ok(true);
        }
    }

    let mut buf = vec![0u8; geometry.block_size as usize];
    device.read_block(record.copies[0], &mut buf)?;
    let child_span = span_at_level(level - 1, fanout);

    for i in 0..fanout as usize {
        let child_base = base + i as u64 * child_span;
        if child_base >= hi {
            break;
        }
        if child_base.saturating_add(child_span) <= lo {
            continue;
        }
        let child = decode_record_at(&buf, i);
        if child.is_null() {
            continue;
        }
        let stop =
            walk_entry(device, level - 1, depth + 1, child_base, child, lo, hi, geometry, dup_run, call_on_index, visitor)?;
        if stop {
            return Ok(true);
        }
    }

    Ok(false)
}
