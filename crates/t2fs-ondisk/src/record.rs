//! 64-byte directory records.
//!
//! | Bytes | Field |
//! |-------|-------|
//! | 0 | type tag |
//! | 1..52 | name, NUL-terminated |
//! | 52..56 | size in bytes |
//! | 56..60 | size in clusters |
//! | 60..64 | first cluster |

use serde::{Deserialize, Serialize};
use std::fmt;
use t2fs_types::{
    ClusterNumber, MAX_NAME_LEN, ParseError, RECORD_NAME_FIELD_LEN, RECORD_SIZE,
    RECORD_TYPE_DIRECTORY, RECORD_TYPE_INVALID, RECORD_TYPE_LINK, RECORD_TYPE_REGULAR,
    ensure_slice, read_le_u32, trim_nul_padded, write_le_u32,
};

const NAME_OFFSET: usize = 1;
const SIZE_BYTES_OFFSET: usize = NAME_OFFSET + RECORD_NAME_FIELD_LEN;
const SIZE_CLUSTERS_OFFSET: usize = SIZE_BYTES_OFFSET + 4;
const FIRST_CLUSTER_OFFSET: usize = SIZE_CLUSTERS_OFFSET + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Free slot.
    Invalid,
    Regular,
    Directory,
    Link,
}

impl RecordKind {
    pub fn from_tag(tag: u8) -> Result<Self, ParseError> {
        match tag {
            RECORD_TYPE_INVALID => Ok(Self::Invalid),
            RECORD_TYPE_REGULAR => Ok(Self::Regular),
            RECORD_TYPE_DIRECTORY => Ok(Self::Directory),
            RECORD_TYPE_LINK => Ok(Self::Link),
            _ => Err(ParseError::InvalidField {
                field: "type_val",
                reason: "unknown record type tag",
            }),
        }
    }

    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            Self::Invalid => RECORD_TYPE_INVALID,
            Self::Regular => RECORD_TYPE_REGULAR,
            Self::Directory => RECORD_TYPE_DIRECTORY,
            Self::Link => RECORD_TYPE_LINK,
        }
    }
}

/// Bounded record name: at most [`MAX_NAME_LEN`] bytes, no `/` or NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordName(String);

impl RecordName {
    pub fn new(name: &str) -> Result<Self, ParseError> {
        if name.is_empty() {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "cannot be empty",
            });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "exceeds 50 bytes",
            });
        }
        if name.bytes().any(|b| b == b'/' || b == 0) {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "contains '/' or NUL",
            });
        }
        Ok(Self(name.to_owned()))
    }

    /// Name of the synthetic root record. Never written to disk.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Name field as stored; free slots may hold stale or empty names.
    fn from_field(field: &[u8]) -> Self {
        Self(trim_nul_padded(field))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    pub name: RecordName,
    pub size_bytes: u32,
    pub size_clusters: u32,
    pub first_cluster: ClusterNumber,
}

impl Record {
    #[must_use]
    pub fn new(
        kind: RecordKind,
        name: RecordName,
        size_bytes: u32,
        size_clusters: u32,
        first_cluster: ClusterNumber,
    ) -> Self {
        Self {
            kind,
            name,
            size_bytes,
            size_clusters,
            first_cluster,
        }
    }

    /// Tombstone written over deleted entries.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            kind: RecordKind::Invalid,
            name: RecordName::default(),
            size_bytes: 0,
            size_clusters: 0,
            first_cluster: ClusterNumber(0),
        }
    }

    /// Parse one record slot.
    pub fn parse(slot: &[u8]) -> Result<Self, ParseError> {
        let slot = ensure_slice(slot, 0, RECORD_SIZE)?;
        let kind = RecordKind::from_tag(slot[0])?;
        Ok(Self {
            kind,
            name: RecordName::from_field(&slot[NAME_OFFSET..SIZE_BYTES_OFFSET]),
            size_bytes: read_le_u32(slot, SIZE_BYTES_OFFSET)?,
            size_clusters: read_le_u32(slot, SIZE_CLUSTERS_OFFSET)?,
            first_cluster: ClusterNumber(read_le_u32(slot, FIRST_CLUSTER_OFFSET)?),
        })
    }

    /// Serialise into a 64-byte slot, NUL-padding the name.
    pub fn write_to(&self, slot: &mut [u8]) -> Result<(), ParseError> {
        if slot.len() < RECORD_SIZE {
            return Err(ParseError::InsufficientData {
                needed: RECORD_SIZE,
                offset: 0,
                actual: slot.len(),
            });
        }
        let name = self.name.as_str().as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(ParseError::InvalidField {
                field: "name",
                reason: "exceeds 50 bytes",
            });
        }
        slot[..RECORD_SIZE].fill(0);
        slot[0] = self.kind.tag();
        slot[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
        write_le_u32(slot, SIZE_BYTES_OFFSET, self.size_bytes)?;
        write_le_u32(slot, SIZE_CLUSTERS_OFFSET, self.size_clusters)?;
        write_le_u32(slot, FIRST_CLUSTER_OFFSET, self.first_cluster.0)?;
        Ok(())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.kind != RecordKind::Invalid
    }

    /// `.` or `..` synthetic entry.
    #[must_use]
    pub fn is_dot_entry(&self) -> bool {
        self.kind == RecordKind::Directory && matches!(self.name.as_str(), "." | "..")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_slot() {
        let record = Record::new(
            RecordKind::Regular,
            RecordName::new("file1.txt").unwrap(),
            1234,
            2,
            ClusterNumber(9),
        );
        let mut slot = [0xAA_u8; RECORD_SIZE];
        record.write_to(&mut slot).unwrap();
        assert_eq!(slot[0], RECORD_TYPE_REGULAR);
        assert_eq!(&slot[1..10], b"file1.txt");
        assert_eq!(slot[10], 0);
        assert_eq!(&slot[52..56], &1234_u32.to_le_bytes());
        assert_eq!(Record::parse(&slot).unwrap(), record);
    }

    #[test]
    fn longest_name_keeps_its_terminator() {
        let long = "n".repeat(MAX_NAME_LEN);
        let record = Record::new(
            RecordKind::Directory,
            RecordName::new(&long).unwrap(),
            1024,
            1,
            ClusterNumber(3),
        );
        let mut slot = [0_u8; RECORD_SIZE];
        record.write_to(&mut slot).unwrap();
        assert_eq!(slot[NAME_OFFSET + MAX_NAME_LEN], 0);
        assert_eq!(Record::parse(&slot).unwrap().name.as_str(), long);
    }

    #[test]
    fn names_are_bounded_and_slash_free() {
        assert!(RecordName::new("").is_err());
        assert!(RecordName::new(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(RecordName::new("a/b").is_err());
        assert!(RecordName::new("a\0b").is_err());
        assert!(RecordName::new("..").is_ok());
    }

    #[test]
    fn unknown_type_tag_is_a_parse_error() {
        let mut slot = [0_u8; RECORD_SIZE];
        slot[0] = 9;
        assert!(matches!(
            Record::parse(&slot),
            Err(ParseError::InvalidField {
                field: "type_val",
                ..
            })
        ));
    }

    #[test]
    fn zeroed_slot_is_a_free_record() {
        let record = Record::parse(&[0_u8; RECORD_SIZE]).unwrap();
        assert!(!record.is_valid());
        assert_eq!(record, Record::invalid());
    }

    #[test]
    fn dot_entries_are_recognised() {
        let dot = Record::new(
            RecordKind::Directory,
            RecordName::new(".").unwrap(),
            1024,
            1,
            ClusterNumber(4),
        );
        assert!(dot.is_dot_entry());
        let file = Record::new(
            RecordKind::Regular,
            RecordName::new("..").unwrap(),
            0,
            1,
            ClusterNumber(4),
        );
        assert!(!file.is_dot_entry());
    }
}
