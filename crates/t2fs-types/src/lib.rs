#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Bytes per logical sector, shared with the device layer.
pub const SECTOR_SIZE: usize = 256;

pub const T2FS_ID: [u8; 4] = *b"T2FS";
pub const T2FS_VERSION: u16 = 0x7E22;
/// Bytes of sector 0 carrying superblock fields.
pub const SUPERBLOCK_FIELDS_LEN: usize = 32;

// ── FAT ─────────────────────────────────────────────────────────────────────

pub const FAT_ENTRY_SIZE: usize = 4;
pub const FAT_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / FAT_ENTRY_SIZE;

pub const FAT_FREE: u32 = 0x0000_0000;
/// Reserved cluster (clusters 0 and 1 of every image).
pub const FAT_INVALID: u32 = 0x0000_0001;
pub const FAT_BAD_SECTOR: u32 = 0xFFFF_FFFE;
pub const FAT_END_OF_CHAIN: u32 = 0xFFFF_FFFF;

// ── Directory records ───────────────────────────────────────────────────────

pub const RECORD_SIZE: usize = 64;
pub const RECORDS_PER_SECTOR: usize = SECTOR_SIZE / RECORD_SIZE;
/// Width of the NUL-terminated name field.
pub const RECORD_NAME_FIELD_LEN: usize = 51;
/// Longest storable name (one byte is kept for the terminator).
pub const MAX_NAME_LEN: usize = RECORD_NAME_FIELD_LEN - 1;

pub const RECORD_TYPE_INVALID: u8 = 0x00;
pub const RECORD_TYPE_REGULAR: u8 = 0x01;
pub const RECORD_TYPE_DIRECTORY: u8 = 0x02;
pub const RECORD_TYPE_LINK: u8 = 0x03;

pub const DOT: &str = ".";
pub const DOT_DOT: &str = "..";

/// Longest accepted path string, in bytes.
pub const MAX_PATH_LEN: usize = 1024;
/// Default size of the open-file table.
pub const MAX_OPENED_FILES: usize = 10;
/// Default size of the open-directory table.
pub const MAX_OPENED_DIRS: usize = 10;
/// Symbolic links followed before a lookup gives up.
pub const MAX_LINK_DEPTH: usize = 8;

/// Logical sector index on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorNumber(pub u64);

/// Cluster index, counted from the start of the data section.
///
/// Doubles as the FAT entry index for that cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterNumber(pub u32);

impl ClusterNumber {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ClusterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },
    #[error("unsupported version: expected {expected:#06x}, got {actual:#06x}")]
    InvalidVersion { expected: u16, actual: u16 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Write `value` little-endian at `offset`; `data` must be long enough.
#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    write_bytes(data, offset, &value.to_le_bytes())
}

/// Write `value` little-endian at `offset`; `data` must be long enough.
#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    write_bytes(data, offset, &value.to_le_bytes())
}

#[inline]
pub fn write_bytes(data: &mut [u8], offset: usize, bytes: &[u8]) -> Result<(), ParseError> {
    let actual = data.len().saturating_sub(offset);
    let dst = offset
        .checked_add(bytes.len())
        .and_then(|end| data.get_mut(offset..end))
        .ok_or(ParseError::InsufficientData {
            needed: bytes.len(),
            offset,
            actual,
        })?;
    dst.copy_from_slice(bytes);
    Ok(())
}

/// Bytes up to the first NUL, lossily decoded.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Number of `unit`-sized pieces needed to hold `len` bytes.
#[must_use]
pub fn div_ceil_u64(len: u64, unit: u64) -> u64 {
    if unit == 0 { 0 } else { len.div_ceil(unit) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_constants_are_consistent() {
        assert_eq!(1 + RECORD_NAME_FIELD_LEN + 3 * 4, RECORD_SIZE);
        assert_eq!(RECORDS_PER_SECTOR, 4);
        assert_eq!(FAT_ENTRIES_PER_SECTOR, 64);
    }

    #[test]
    fn le_readers_reject_short_input() {
        let data = [1_u8, 2, 3];
        assert_eq!(read_le_u16(&data, 1), Ok(0x0302));
        assert_eq!(
            read_le_u32(&data, 0),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 0,
                actual: 3
            })
        );
    }

    #[test]
    fn writers_round_trip_through_readers() {
        let mut data = [0_u8; 8];
        write_le_u32(&mut data, 4, 0xFFFF_FFFE).unwrap();
        write_le_u16(&mut data, 0, T2FS_VERSION).unwrap();
        assert_eq!(read_le_u32(&data, 4), Ok(FAT_BAD_SECTOR));
        assert_eq!(read_le_u16(&data, 0), Ok(T2FS_VERSION));
        assert!(write_le_u32(&mut data, 6, 1).is_err());
    }

    #[test]
    fn trim_nul_stops_at_terminator() {
        assert_eq!(trim_nul_padded(b"dir5\0\0garbage"), "dir5");
        assert_eq!(trim_nul_padded(b"full"), "full");
        assert_eq!(trim_nul_padded(b"\0"), "");
    }

    #[test]
    fn div_ceil_handles_exact_and_partial_units() {
        assert_eq!(div_ceil_u64(0, 1024), 0);
        assert_eq!(div_ceil_u64(1024, 1024), 1);
        assert_eq!(div_ceil_u64(1025, 1024), 2);
        assert_eq!(div_ceil_u64(5, 0), 0);
    }
}
