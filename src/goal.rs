//! Goal selector (§4.2).

use crate::device::GroupTopology;
use crate::geometry::FsGeometry;

/// Preferred allocation block number for copy `slot` of inode `ino`.
///
/// Spreads copies across distinct flex-groups (when the filesystem has
/// flex groups) so a single group failure cannot destroy every copy.
pub(crate) fn goal<D: GroupTopology>(ino: u64, slot: usize, geometry: &FsGeometry, device: &D) -> u32 {
    let flex_mask: u32 = if geometry.log_groups_per_flex == 0 {
        0
    } else {
        (1u32 << geometry.log_groups_per_flex) - 1
    };
    let group = device.group_of_ino(ino);
    let base = group & !flex_mask;
    let groups_count = device.groups_count().max(1);
    let target = base.wrapping_add(slot as u32) % groups_count;
    device.group_first_block(target)
}
