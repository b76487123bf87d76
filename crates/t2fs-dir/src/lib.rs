#![forbid(unsafe_code)]
//! Directory clusters.
//!
//! A directory occupies exactly one cluster: a flat array of 64-byte
//! record slots. Slot order is the enumeration order. Deleted entries are
//! tombstoned in place, and the lowest invalid slot is reused first.

use t2fs_error::{Result, T2fsError};
use t2fs_ondisk::{Record, RecordKind, RecordName};
use t2fs_types::{ClusterNumber, DOT, DOT_DOT, ParseError, RECORD_SIZE};
use tracing::trace;

/// Outcome of looking for a place to put `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotLookup {
    /// A valid record with that name already exists at `slot`.
    Duplicate { slot: usize, record: Record },
    /// Lowest free slot.
    Free(usize),
    /// No free slot and no duplicate.
    Full,
}

/// Borrowed view of one directory cluster.
#[derive(Debug, Clone)]
pub struct DirBlock<B> {
    cluster: ClusterNumber,
    bytes: B,
}

impl<B: AsRef<[u8]>> DirBlock<B> {
    pub fn new(cluster: ClusterNumber, bytes: B) -> Self {
        Self { cluster, bytes }
    }

    #[must_use]
    pub fn cluster(&self) -> ClusterNumber {
        self.cluster
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_ref()
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.bytes.as_ref().len() / RECORD_SIZE
    }

    fn corrupt(&self, slot: usize, err: &ParseError) -> T2fsError {
        T2fsError::Corruption {
            cluster: self.cluster.0,
            detail: format!("directory slot {slot}: {err}"),
        }
    }

    /// Decode the record at `slot`.
    pub fn record(&self, slot: usize) -> Result<Record> {
        let start = slot * RECORD_SIZE;
        let bytes = self
            .bytes
            .as_ref()
            .get(start..start + RECORD_SIZE)
            .ok_or_else(|| {
                self.corrupt(
                    slot,
                    &ParseError::InsufficientData {
                        needed: RECORD_SIZE,
                        offset: start,
                        actual: self.bytes.as_ref().len(),
                    },
                )
            })?;
        Record::parse(bytes).map_err(|err| self.corrupt(slot, &err))
    }

    /// Valid records with their slot index, in slot order.
    pub fn valid_records(&self) -> Result<Vec<(usize, Record)>> {
        let mut out = Vec::new();
        for slot in 0..self.slot_count() {
            let record = self.record(slot)?;
            if record.is_valid() {
                out.push((slot, record));
            }
        }
        Ok(out)
    }

    /// Valid record named `name`, if any.
    pub fn find_by_name(&self, name: &str) -> Result<Option<(usize, Record)>> {
        for slot in 0..self.slot_count() {
            let record = self.record(slot)?;
            if record.is_valid() && record.name.as_str() == name {
                trace!(cluster = self.cluster.0, slot, name, "name found");
                return Ok(Some((slot, record)));
            }
        }
        Ok(None)
    }

    /// One pass that reports a same-named valid record before any free slot.
    pub fn lookup_slot(&self, name: &str) -> Result<SlotLookup> {
        let mut free = None;
        for slot in 0..self.slot_count() {
            let record = self.record(slot)?;
            if record.is_valid() {
                if record.name.as_str() == name {
                    return Ok(SlotLookup::Duplicate { slot, record });
                }
            } else if free.is_none() {
                free = Some(slot);
            }
        }
        Ok(free.map_or(SlotLookup::Full, SlotLookup::Free))
    }

    /// First valid non-dot record whose chain starts at `cluster`.
    pub fn find_by_cluster(&self, cluster: ClusterNumber) -> Result<Option<(usize, Record)>> {
        for slot in 0..self.slot_count() {
            let record = self.record(slot)?;
            if record.is_valid() && !record.is_dot_entry() && record.first_cluster == cluster {
                return Ok(Some((slot, record)));
            }
        }
        Ok(None)
    }

    /// Cluster named by the `..` entry.
    pub fn parent_cluster(&self) -> Result<Option<ClusterNumber>> {
        Ok(self
            .find_by_name(DOT_DOT)?
            .map(|(_, record)| record.first_cluster))
    }

    /// True when only `.` and `..` are valid.
    pub fn is_empty_dir(&self) -> Result<bool> {
        Ok(self
            .valid_records()?
            .iter()
            .all(|(_, record)| record.is_dot_entry()))
    }

    /// Next valid record at or after `from`, `.` and `..` included.
    pub fn next_valid(&self, from: usize) -> Result<Option<(usize, Record)>> {
        for slot in from..self.slot_count() {
            let record = self.record(slot)?;
            if record.is_valid() {
                return Ok(Some((slot, record)));
            }
        }
        Ok(None)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DirBlock<B> {
    /// Overwrite `slot` with `record`.
    pub fn write_record(&mut self, slot: usize, record: &Record) -> Result<()> {
        let start = slot * RECORD_SIZE;
        let cluster = self.cluster;
        let len = self.bytes.as_ref().len();
        let dst = self
            .bytes
            .as_mut()
            .get_mut(start..start + RECORD_SIZE)
            .ok_or_else(|| T2fsError::Corruption {
                cluster: cluster.0,
                detail: format!("directory slot {slot} out of range ({len} bytes)"),
            })?;
        record.write_to(dst).map_err(|err| T2fsError::Corruption {
            cluster: cluster.0,
            detail: format!("directory slot {slot}: {err}"),
        })?;
        trace!(cluster = cluster.0, slot, name = %record.name, "record written");
        Ok(())
    }

    /// Tombstone `slot`.
    pub fn invalidate(&mut self, slot: usize) -> Result<()> {
        self.write_record(slot, &Record::invalid())
    }

    /// Zero the cluster and lay down `.` (this cluster) and `..` (`parent`).
    pub fn init(&mut self, parent: ClusterNumber) -> Result<()> {
        self.bytes.as_mut().fill(0);
        let cluster_bytes = u32::try_from(self.bytes.as_ref().len()).unwrap_or(u32::MAX);
        let dot = dot_record(DOT, cluster_bytes, self.cluster)?;
        let dot_dot = dot_record(DOT_DOT, cluster_bytes, parent)?;
        self.write_record(0, &dot)?;
        self.write_record(1, &dot_dot)
    }
}

fn dot_record(name: &str, cluster_bytes: u32, target: ClusterNumber) -> Result<Record> {
    let name = RecordName::new(name).map_err(|err| T2fsError::InvalidPath(err.to_string()))?;
    Ok(Record::new(
        RecordKind::Directory,
        name,
        cluster_bytes,
        1,
        target,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CLUSTER: usize = 512;

    fn record(kind: RecordKind, name: &str, first: u32) -> Record {
        Record::new(kind, RecordName::new(name).unwrap(), 0, 1, ClusterNumber(first))
    }

    fn new_dir(cluster: u32, parent: u32) -> DirBlock<Vec<u8>> {
        let mut dir = DirBlock::new(ClusterNumber(cluster), vec![0xFF; CLUSTER]);
        dir.init(ClusterNumber(parent)).unwrap();
        dir
    }

    #[test]
    fn init_contains_dot_and_dotdot() {
        let dir = new_dir(7, 2);
        assert_eq!(dir.slot_count(), 8);
        let (slot, dot) = dir.find_by_name(".").unwrap().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(dot.first_cluster, ClusterNumber(7));
        assert_eq!(dot.size_bytes, 512);
        assert_eq!(dir.parent_cluster().unwrap(), Some(ClusterNumber(2)));
        assert!(dir.is_empty_dir().unwrap());
        for slot in 2..8 {
            assert!(!dir.record(slot).unwrap().is_valid());
        }
    }

    #[test]
    fn free_slot_is_lowest_invalid() {
        let mut dir = new_dir(7, 2);
        assert_eq!(dir.lookup_slot("a").unwrap(), SlotLookup::Free(2));
        dir.write_record(2, &record(RecordKind::Regular, "a", 9)).unwrap();
        dir.write_record(3, &record(RecordKind::Regular, "b", 10)).unwrap();
        dir.invalidate(2).unwrap();
        assert_eq!(dir.lookup_slot("c").unwrap(), SlotLookup::Free(2));
        assert!(dir.find_by_name("a").unwrap().is_none());
    }

    #[test]
    fn lookup_prefers_duplicate_over_free_slot() {
        let mut dir = new_dir(7, 2);
        dir.write_record(4, &record(RecordKind::Regular, "x", 9)).unwrap();
        match dir.lookup_slot("x").unwrap() {
            SlotLookup::Duplicate { slot, record } => {
                assert_eq!(slot, 4);
                assert_eq!(record.first_cluster, ClusterNumber(9));
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(dir.lookup_slot("y").unwrap(), SlotLookup::Free(2));
    }

    #[test]
    fn full_directory_reports_full() {
        let mut dir = new_dir(7, 2);
        for slot in 2..8 {
            let name = format!("f{slot}");
            dir.write_record(slot, &record(RecordKind::Regular, &name, 9)).unwrap();
        }
        assert_eq!(dir.lookup_slot("new").unwrap(), SlotLookup::Full);
        assert!(!dir.is_empty_dir().unwrap());
    }

    #[test]
    fn find_by_cluster_skips_dot_entries() {
        let mut dir = new_dir(7, 7);
        assert!(dir.find_by_cluster(ClusterNumber(7)).unwrap().is_none());
        dir.write_record(5, &record(RecordKind::Directory, "sub", 7)).unwrap();
        let (slot, found) = dir.find_by_cluster(ClusterNumber(7)).unwrap().unwrap();
        assert_eq!(slot, 5);
        assert_eq!(found.name.as_str(), "sub");
    }

    #[test]
    fn next_valid_walks_in_slot_order() {
        let mut dir = new_dir(7, 2);
        dir.write_record(3, &record(RecordKind::Regular, "b", 9)).unwrap();
        dir.write_record(6, &record(RecordKind::Link, "l", 10)).unwrap();
        let (slot, dot) = dir.next_valid(0).unwrap().unwrap();
        assert_eq!((slot, dot.name.as_str()), (0, "."));
        let (slot, dot_dot) = dir.next_valid(slot + 1).unwrap().unwrap();
        assert_eq!((slot, dot_dot.first_cluster), (1, ClusterNumber(2)));
        let (slot, first) = dir.next_valid(slot + 1).unwrap().unwrap();
        assert_eq!((slot, first.name.as_str()), (3, "b"));
        let (slot, second) = dir.next_valid(slot + 1).unwrap().unwrap();
        assert_eq!((slot, second.kind), (6, RecordKind::Link));
        assert!(dir.next_valid(slot + 1).unwrap().is_none());
    }

    #[test]
    fn unknown_type_tag_is_corruption() {
        let mut bytes = vec![0_u8; CLUSTER];
        bytes[RECORD_SIZE] = 0x7F;
        let dir = DirBlock::new(ClusterNumber(3), bytes);
        let err = dir.find_by_name("x").unwrap_err();
        assert!(matches!(err, T2fsError::Corruption { cluster: 3, .. }));
    }

    #[test]
    fn write_past_last_slot_fails() {
        let mut dir = new_dir(7, 2);
        assert!(
            dir.write_record(8, &record(RecordKind::Regular, "z", 1))
                .is_err()
        );
    }

    proptest! {
        #[test]
        fn slot_writes_are_isolated(
            names in proptest::collection::btree_set("[a-z]{1,12}", 1..6),
        ) {
            let mut dir = new_dir(7, 2);
            for (i, name) in names.iter().enumerate() {
                let SlotLookup::Free(slot) = dir.lookup_slot(name).unwrap() else {
                    panic!("no free slot for {name}");
                };
                prop_assert_eq!(slot, i + 2);
                dir.write_record(slot, &record(RecordKind::Regular, name, 10 + i as u32)).unwrap();
            }
            for (i, name) in names.iter().enumerate() {
                let (slot, found) = dir.find_by_name(name).unwrap().unwrap();
                prop_assert_eq!(slot, i + 2);
                prop_assert_eq!(found.first_cluster, ClusterNumber(10 + i as u32));
            }
            prop_assert_eq!(dir.valid_records().unwrap().len(), names.len() + 2);
        }
    }
}
