mod support;

use bmpt::{init, map_alloc, map_read, punch, walk, WalkControl};
use support::{new_inode, MemDevice};

#[test]
fn punch_releases_a_single_direct_block() {
    let mut device = MemDevice::new();
    let mut inode = new_inode(1);
    init(&mut device, &mut inode, false).unwrap();

    map_alloc(&mut device, &mut inode, 0, None).unwrap();
    let before = device.allocated_count();

    let outcome = punch(&mut device, &mut inode, 0, 1).unwrap();
    assert_eq!(outcome.freed_blocks, 1);
    assert_eq!(device.allocated_count(), before - 1);

    let reread = map_read(&mut device, &inode, 0).unwrap();
    assert!(reread.is_null());
}

#[test]
fn punch_clears_a_range_across_an_indirection_block() {
    let mut device = MemDevice::new();
    let mut inode = new_inode(1);
    init(&mut device, &mut inode, false).unwrap();

    for b in 0..5u64 {
        map_alloc(&mut device, &mut inode, b, None).unwrap();
    }
    // Forces growth to height 1; all five leaves now live in one array block.
    let outcome = punch(&mut device, &mut inode, 1, 4).unwrap();
    assert_eq!(outcome.freed_blocks, 3);

    assert!(!map_read(&mut device, &inode, 0).unwrap().is_null());
    assert!(map_read(&mut device, &inode, 1).unwrap().is_null());
    assert!(map_read(&mut device, &inode, 2).unwrap().is_null());
    assert!(map_read(&mut device, &inode, 3).unwrap().is_null());
    assert!(!map_read(&mut device, &inode, 4).unwrap().is_null());
}

#[test]
fn punch_covering_everything_collapses_the_array_block_too() {
    let mut device = MemDevice::new();
    let mut inode = new_inode(1);
    init(&mut device, &mut inode, false).unwrap();

    for b in 0..3u64 {
        map_alloc(&mut device, &mut inode, b, None).unwrap();
    }
    let before = device.allocated_count();
    let outcome = punch(&mut device, &mut inode, 0, 64).unwrap();
    // 3 data blocks plus the one array block that held them.
    assert_eq!(outcome.freed_blocks, 4);
    assert_eq!(device.allocated_count(), before - 4);
}

#[test]
fn walk_visits_every_populated_leaf_in_range() {
    let mut device = MemDevice::new();
    let mut inode = new_inode(1);
    init(&mut device, &mut inode, false).unwrap();

    for b in [0u64, 1, 2, 63] {
        map_alloc(&mut device, &mut inode, b, None).unwrap();
    }

    let mut seen = Vec::new();
    let outcome = walk(&mut device, &inode, 0, 64, false, |visit| {
        seen.push(visit.logical);
        WalkControl::Continue
    })
    .unwrap();

    assert!(!outcome.aborted);
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 63]);
}

#[test]
fn walk_can_abort_early() {
    let mut device = MemDevice::new();
    let mut inode = new_inode(1);
    init(&mut device, &mut inode, false).unwrap();

    for b in 0u64..5 {
        map_alloc(&mut device, &mut inode, b, None).unwrap();
    }

    let mut visited = 0u32;
    let outcome = walk(&mut device, &inode, 0, 64, false, |_visit| {
        visited += 1;
        if visited == 2 {
            WalkControl::Abort
        } else {
            WalkControl::Continue
        }
    })
    .unwrap();

    assert!(outcome.aborted);
    assert_eq!(visited, 2);
}

#[test]
fn walk_visits_interior_records_when_call_on_index_is_set() {
    let mut device = MemDevice::new();
    let mut inode = new_inode(1);
    init(&mut device, &mut inode, false).unwrap();

    // fanout = 1024 / 16 = 64; blocks 0 and 64 force height 2, with one
    // interior record above the leaves.
    map_alloc(&mut device, &mut inode, 0, None).unwrap();
    map_alloc(&mut device, &mut inode, 64, None).unwrap();

    let mut leaves = 0u32;
    let mut interiors = 0u32;
    let outcome = walk(&mut device, &inode, 0, 4096, true, |visit| {
        if visit.level == 0 {
            leaves += 1;
        } else {
            interiors += 1;
        }
        WalkControl::Continue
    })
    .unwrap();

    assert!(!outcome.aborted);
    assert_eq!(leaves, 2);
    assert!(interiors > 0);
}
