#![forbid(unsafe_code)]
//! On-disk format parsing for T2FS structures.
//!
//! Pure parsing crate: no I/O, no side effects. Parses byte slices into the
//! superblock, FAT entries and 64-byte directory records, and serialises
//! them back.

pub mod record;
pub mod superblock;

pub use record::{Record, RecordKind, RecordName};
pub use superblock::Superblock;

use t2fs_types::{ClusterNumber, FAT_BAD_SECTOR, FAT_END_OF_CHAIN, FAT_FREE, FAT_INVALID};

/// Decoded FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatEntry {
    Free,
    /// Reserved cluster, never allocated (clusters 0 and 1).
    Reserved,
    BadSector,
    EndOfChain,
    Next(ClusterNumber),
}

impl FatEntry {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            FAT_FREE => Self::Free,
            FAT_INVALID => Self::Reserved,
            FAT_BAD_SECTOR => Self::BadSector,
            FAT_END_OF_CHAIN => Self::EndOfChain,
            next => Self::Next(ClusterNumber(next)),
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Free => FAT_FREE,
            Self::Reserved => FAT_INVALID,
            Self::BadSector => FAT_BAD_SECTOR,
            Self::EndOfChain => FAT_END_OF_CHAIN,
            Self::Next(cluster) => cluster.0,
        }
    }

    #[must_use]
    pub fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}
