//! Bounded open-file and open-directory tables.

use std::fmt;

use serde::{Deserialize, Serialize};
use t2fs_error::T2fsError;
use t2fs_ondisk::Record;
use t2fs_types::ClusterNumber;

use crate::path::ResolvedPath;

/// Handle returned by `create`/`open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileHandle(pub usize);

/// Handle returned by `opendir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirHandle(pub usize);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DirHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn invalid_handle(index: usize) -> T2fsError {
    T2fsError::InvalidHandle(i64::try_from(index).unwrap_or(i64::MAX))
}

/// An open regular file.
#[derive(Debug, Clone)]
pub(crate) struct OpenFile {
    /// Copy of the directory record, kept in step with the disk.
    pub record: Record,
    /// Byte offset of the next read or write.
    pub cursor: u64,
    /// Path the file was opened through.
    pub path: ResolvedPath,
    /// Directory cluster holding `record`.
    pub parent: ClusterNumber,
}

/// An open directory session.
#[derive(Debug, Clone)]
pub(crate) struct OpenDir {
    pub cluster: ClusterNumber,
    /// Byte offset into the directory cluster of the next slot to examine.
    pub offset: usize,
    pub path: ResolvedPath,
}

#[derive(Debug)]
enum Slot<T> {
    Free,
    Live(T),
    /// The entry behind the handle is gone. The slot stays taken until the
    /// handle is closed, and every other use fails with `InvalidHandle`.
    Orphaned,
}

/// Fixed-capacity slot arena. The lowest free slot is always reused first.
#[derive(Debug)]
pub(crate) struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    in_use: usize,
}

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Free);
        Self { slots, in_use: 0 }
    }

    pub fn is_full(&self) -> bool {
        self.in_use == self.slots.len()
    }

    /// Taken slots, orphaned ones included.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Store `value` in the lowest free slot; `None` when full.
    pub fn insert(&mut self, value: T) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free))?;
        self.slots[index] = Slot::Live(value);
        self.in_use += 1;
        Some(index)
    }

    pub fn get(&self, index: usize) -> Result<&T, T2fsError> {
        match self.slots.get(index) {
            Some(Slot::Live(value)) => Ok(value),
            _ => Err(invalid_handle(index)),
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut T, T2fsError> {
        match self.slots.get_mut(index) {
            Some(Slot::Live(value)) => Ok(value),
            _ => Err(invalid_handle(index)),
        }
    }

    /// Free a taken slot. Returns the value, or `None` for an orphaned slot.
    pub fn remove(&mut self, index: usize) -> Result<Option<T>, T2fsError> {
        let slot = self
            .slots
            .get_mut(index)
            .filter(|slot| !matches!(slot, Slot::Free))
            .ok_or_else(|| invalid_handle(index))?;
        self.in_use -= 1;
        match std::mem::replace(slot, Slot::Free) {
            Slot::Live(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Orphan every live entry matching `pred`. Returns how many were hit.
    pub fn orphan_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut hit = 0;
        for slot in &mut self.slots {
            if matches!(&*slot, Slot::Live(value) if pred(value)) {
                *slot = Slot::Orphaned;
                hit += 1;
            }
        }
        hit
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Live(value) => Some((index, value)),
                _ => None,
            })
    }
}
