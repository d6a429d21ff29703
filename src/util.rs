//! Addressing helpers shared by the mapper and traversers (§3.2).

/// Index within a level-`L` block's record array for logical block `b`.
pub(crate) fn offset_at_level(b: u64, level: u32, fanout: u64) -> u64 {
    (b / fanout.checked_pow(level).unwrap_or(u64::MAX)) % fanout
}

/// Smallest `k` with `b < fanout^k`.
pub(crate) fn min_height(b: u64, fanout: u64) -> u32 {
    let mut k = 0u32;
    let mut cap: u64 = 1;
    while b >= cap {
        cap = cap.saturating_mul(fanout);
        k += 1;
    }
    k
}

/// Range size covered by one record at level `L`.
pub(crate) fn span_at_level(level: u32, fanout: u64) -> u64 {
    fanout.checked_pow(level).unwrap_or(u64::MAX)
}
