//! On-disk/in-memory record codec (§4.1).

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of physical copies stored per record.
pub const N_COPIES: usize = 3;

/// Size in bytes of one on-disk record.
pub const RECORD_SIZE: usize = 16;

/// On-disk record: three little-endian copy slots plus a flags word.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct PhysicalRecord {
    pub copies: [U32; N_COPIES],
    pub flags: U32,
}

/// In-memory record, host byte order. Kept distinct from [`PhysicalRecord`]
/// so endian conversions only ever happen at the codec boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LogicalRecord {
    pub copies: [u32; N_COPIES],
    pub flags: u32,
}

impl LogicalRecord {
    pub const fn null() -> Self {
        Self { copies: [0; N_COPIES], flags: 0 }
    }

    /// A record is null iff its primary copy is zero.
    pub fn is_null(&self) -> bool {
        self.copies[0] == 0
    }

    pub fn clear(&mut self) {
        *self = Self::null();
    }

    pub fn encode(&self) -> PhysicalRecord {
        PhysicalRecord {
            copies: self.copies.map(U32::new),
            flags: U32::new(self.flags),
        }
    }

    /// Number of non-zero copy slots (absent copies are zero even when the
    /// primary is populated, per the "non-primary slots may be zero" rule).
    pub fn active_copies(&self) -> usize {
        self.copies.iter().filter(|&&b| b != 0).count()
    }
}

impl PhysicalRecord {
    pub fn decode(&self) -> LogicalRecord {
        LogicalRecord {
            copies: self.copies.map(|c| c.get()),
            flags: self.flags.get(),
        }
    }
}

/// Reads the record at `index` within a densely packed block of records.
pub(crate) fn decode_record_at(block: &[u8], index: usize) -> LogicalRecord {
    let off = index * RECORD_SIZE;
    let (phys, _) = PhysicalRecord::ref_from_prefix(&block[off..off + RECORD_SIZE])
        .expect("slice is exactly RECORD_SIZE bytes");
    phys.decode()
}

/// Writes `record` at `index` within a densely packed block of records.
pub(crate) fn encode_record_at(block: &mut [u8], index: usize, record: LogicalRecord) {
    let off = index * RECORD_SIZE;
    block[off..off + RECORD_SIZE].copy_from_slice(record.encode().as_bytes());
}
