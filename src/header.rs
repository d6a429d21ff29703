//! Tree header view (§3.1, §6.2).
//!
//! The header lives in the inode's block-pointer region as raw bytes; this
//! module is the only place that interprets those bytes, via an explicit
//! encode/decode boundary rather than aliasing the region as a struct.

use bitflags::bitflags;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::record::{LogicalRecord, PhysicalRecord, RECORD_SIZE};

pub const MAGIC: u32 = 0xF5E5_C5D5;
pub const MAX_LEVELS: u32 = 7;

/// `magic(4) + levels(4) + flags(4) + root record(16)`.
pub const HEADER_SIZE: usize = 4 + 4 + 4 + RECORD_SIZE;

/// Two headers are stored back to back in the inode's block-pointer area.
pub const HEADER_REGION_SIZE: usize = HEADER_SIZE * 2;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// Enables per-data-block duplication (`dup_cnt` copies per leaf).
        const DUP = 0x0000_0001;
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct RawHeader {
    magic: U32,
    levels: U32,
    flags: U32,
    root: PhysicalRecord,
}

/// An in-memory view of one 28-byte on-disk header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub levels: u32,
    pub flags: HeaderFlags,
    pub root: LogicalRecord,
}

impl Header {
    /// A freshly initialized, empty tree: direct, no root, `DUP` per `dup_on`.
    pub fn empty(dup_on: bool) -> Self {
        Self {
            levels: 0,
            flags: if dup_on { HeaderFlags::DUP } else { HeaderFlags::empty() },
            root: LogicalRecord::null(),
        }
    }

    pub fn has_dup(&self) -> bool {
        self.flags.contains(HeaderFlags::DUP)
    }

    /// Decodes a header from exactly [`HEADER_SIZE`] bytes. Returns `None`
    /// when the magic number is absent (no tree exists yet).
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (raw, _) = RawHeader::ref_from_prefix(buf).ok()?;
        if raw.magic.get() != MAGIC {
            return None;
        }
        Some(Self {
            levels: raw.levels.get(),
            flags: HeaderFlags::from_bits_truncate(raw.flags.get()),
            root: raw.root.decode(),
        })
    }

    /// Encodes this header into exactly [`HEADER_SIZE`] bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        let raw = RawHeader {
            magic: U32::new(MAGIC),
            levels: U32::new(self.levels),
            flags: U32::new(self.flags.bits()),
            root: self.root.encode(),
        };
        buf[..HEADER_SIZE].copy_from_slice(raw.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_missing_magic() {
        let buf = [0u8; HEADER_SIZE];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn round_trips_through_bytes() {
        let h = Header {
            levels: 3,
            flags: HeaderFlags::DUP,
            root: LogicalRecord { copies: [1, 2, 3], flags: 0 },
        };
        let mut buf = [0u8; HEADER_SIZE];
        h.encode_into(&mut buf);
        assert_eq!(Header::decode(&buf), Some(h));
    }

    #[test]
    fn empty_header_is_direct_with_null_root() {
        let h = Header::empty(true);
        assert_eq!(h.levels, 0);
        assert!(h.root.is_null());
        assert!(h.has_dup());
    }
}
