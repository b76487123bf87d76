//! Regular-file operations: create, delete, open, close, read, write,
//! seek and truncate.

use t2fs_block::SectorDevice;
use t2fs_dir::{DirBlock, SlotLookup};
use t2fs_error::{Result, T2fsError};
use t2fs_ondisk::{FatEntry, Record, RecordKind};
use t2fs_types::{ClusterNumber, div_ceil_u64};
use tracing::{debug, trace};

use crate::handles::{FileHandle, OpenFile};
use crate::path::resolve_path;
use crate::T2fs;

impl<D: SectorDevice> T2fs<D> {
    /// Create `path` as an empty regular file and open it.
    ///
    /// An existing file or link of the same name is truncated in place: its
    /// chain is released and its slot reused. An existing directory fails
    /// with `NotAFile`.
    pub fn create(&mut self, path: &str) -> Result<FileHandle> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        if rp.head_is_dot() {
            self.walk_dir(&rp.both, 0)?;
        }
        if rp.is_root() || rp.head_is_dot() {
            return Err(T2fsError::NotAFile(rp.both));
        }
        let name = Self::entry_name(&rp)?;
        if self.files.is_full() {
            return Err(T2fsError::TooManyOpenFiles);
        }
        let parent = self.walk_dir(&rp.tail, 0)?;
        let mut block = self.dir_block(parent)?;
        let (slot, replaced) = match block.lookup_slot(name.as_str())? {
            SlotLookup::Duplicate { record, .. } if record.kind == RecordKind::Directory => {
                return Err(T2fsError::NotAFile(rp.both));
            }
            SlotLookup::Duplicate { slot, record } => (slot, Some(record)),
            SlotLookup::Free(slot) => (slot, None),
            SlotLookup::Full => return Err(T2fsError::DirectoryFull(rp.tail)),
        };

        let cluster = self.fat.first_fit(&self.dev)?;
        if let Some(old) = &replaced {
            self.fat.release_chain(&self.dev, old.first_cluster)?;
        }
        let record = Record::new(RecordKind::Regular, name, 0, 1, cluster);
        block.write_record(slot, &record)?;
        self.store_dir(&block)?;
        self.fat.set_entry(&self.dev, cluster, FatEntry::EndOfChain)?;
        if let Some(old) = &replaced {
            self.refresh_handles(old.first_cluster, &record);
        }

        debug!(
            path = %rp.both,
            cluster = cluster.0,
            replaced = replaced.is_some(),
            "file created"
        );
        let index = self
            .files
            .insert(OpenFile {
                record,
                cursor: 0,
                path: rp,
                parent,
            })
            .ok_or(T2fsError::TooManyOpenFiles)?;
        Ok(FileHandle(index))
    }

    /// Remove a regular file or link and release its chain.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        let Some(head) = rp.head.as_deref().filter(|_| !rp.head_is_dot()) else {
            return Err(T2fsError::NotAFile(rp.both));
        };
        let parent = self.walk_dir(&rp.tail, 0)?;
        let mut block = self.dir_block(parent)?;
        let (slot, record) = block
            .find_by_name(head)?
            .ok_or_else(|| T2fsError::NotFound(rp.both.clone()))?;
        if !matches!(record.kind, RecordKind::Regular | RecordKind::Link) {
            return Err(T2fsError::NotAFile(rp.both));
        }
        block.invalidate(slot)?;
        self.store_dir(&block)?;
        let released = self.fat.release_chain(&self.dev, record.first_cluster)?;
        let orphaned = self
            .files
            .orphan_where(|file| file.record.first_cluster == record.first_cluster);
        debug!(path = %rp.both, kind = ?record.kind, released, orphaned, "entry deleted");
        Ok(())
    }

    /// Open an existing regular file, following links.
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        if self.files.is_full() {
            return Err(T2fsError::TooManyOpenFiles);
        }
        let located = self.locate(&rp, 0)?;
        let located = self.follow(located, 0)?;
        if located.record.kind != RecordKind::Regular {
            return Err(T2fsError::NotAFile(rp.both));
        }
        debug!(path = %rp.both, cluster = located.record.first_cluster.0, "file opened");
        let index = self
            .files
            .insert(OpenFile {
                record: located.record,
                cursor: 0,
                path: rp,
                parent: located.parent,
            })
            .ok_or(T2fsError::TooManyOpenFiles)?;
        Ok(FileHandle(index))
    }

    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        match self.files.remove(handle.0)? {
            Some(file) => debug!(handle = handle.0, path = %file.path.both, "file closed"),
            None => debug!(handle = handle.0, "closed handle of a deleted file"),
        }
        Ok(())
    }

    /// Read from the cursor into `buf`, clamped to the file size.
    ///
    /// Returns the number of bytes copied; 0 at or past end of file.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let file = self.files.get(handle.0)?;
        let first = file.record.first_cluster;
        let size = u64::from(file.record.size_bytes);
        let cursor = file.cursor;
        if cursor >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = usize::try_from((size - cursor).min(buf.len() as u64)).unwrap_or(buf.len());

        let cs = self.cluster_size();
        let chain = self.fat.chain(first)?;
        let mut copied = 0;
        while copied < len {
            let pos = cursor + copied as u64;
            let index = usize::try_from(pos / cs as u64).unwrap_or(usize::MAX);
            let within = usize::try_from(pos % cs as u64).unwrap_or(0);
            let cluster = chain.get(index).ok_or_else(|| T2fsError::Corruption {
                cluster: first.0,
                detail: format!("chain of {} clusters is shorter than {size} bytes", chain.len()),
            })?;
            let data = self.read_cluster(*cluster)?;
            let n = (cs - within).min(len - copied);
            buf[copied..copied + n].copy_from_slice(&data[within..within + n]);
            copied += n;
        }

        self.files.get_mut(handle.0)?.cursor = cursor + copied as u64;
        trace!(handle = handle.0, cursor, copied, "read");
        Ok(copied)
    }

    /// Write `data` at the cursor, growing the chain as needed.
    ///
    /// A cursor past end of file leaves a zero-filled gap. Returns the number
    /// of bytes written.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let (mut record, cursor, parent) = {
            let file = self.files.get(handle.0)?;
            (file.record.clone(), file.cursor, file.parent)
        };
        if data.is_empty() {
            return Ok(0);
        }
        let offset_error = || T2fsError::InvalidOffset(i64::try_from(cursor).unwrap_or(i64::MAX));
        let end = cursor
            .checked_add(data.len() as u64)
            .filter(|end| *end <= u64::from(u32::MAX))
            .ok_or_else(offset_error)?;

        let mut dir = self.dir_block(parent)?;
        let slot = Self::record_slot(&dir, &record)?;

        let cs = self.cluster_size();
        let cs64 = cs as u64;
        let old_size = u64::from(record.size_bytes);
        let new_size = old_size.max(end);
        let mut chain = self.fat.chain(record.first_cluster)?;
        let old_clusters = chain.len();
        let needed = usize::try_from(div_ceil_u64(new_size, cs64).max(1)).unwrap_or(usize::MAX);
        if needed > old_clusters {
            let tail = chain[old_clusters - 1];
            let extra = u32::try_from(needed - old_clusters).map_err(|_| offset_error())?;
            let added = self.fat.extend_chain(&self.dev, tail, extra)?;
            debug!(
                first = record.first_cluster.0,
                added = added.len(),
                "file chain extended"
            );
            chain.extend(added);
        }

        let dirty_start = cursor.min(old_size);
        let first_index = usize::try_from(dirty_start / cs64).unwrap_or(usize::MAX);
        let last_index = usize::try_from((end - 1) / cs64).unwrap_or(usize::MAX);
        for index in first_index..=last_index {
            let start = index as u64 * cs64;
            let stop = start + cs64;
            let mut buf = if index < old_clusters {
                self.read_cluster(chain[index])?
            } else {
                vec![0_u8; cs]
            };
            let gap = (old_size.max(start), cursor.min(stop));
            if gap.0 < gap.1 {
                buf[(gap.0 - start) as usize..(gap.1 - start) as usize].fill(0);
            }
            let lo = cursor.max(start);
            let hi = end.min(stop);
            if lo < hi {
                buf[(lo - start) as usize..(hi - start) as usize]
                    .copy_from_slice(&data[(lo - cursor) as usize..(hi - cursor) as usize]);
            }
            self.write_cluster(chain[index], &buf)?;
        }

        record.size_bytes = u32::try_from(new_size).map_err(|_| offset_error())?;
        record.size_clusters = u32::try_from(chain.len()).map_err(|_| offset_error())?;
        dir.write_record(slot, &record)?;
        self.store_dir(&dir)?;

        self.files.get_mut(handle.0)?.cursor = end;
        self.refresh_handles(record.first_cluster, &record);
        trace!(handle = handle.0, cursor, written = data.len(), size = new_size, "write");
        Ok(data.len())
    }

    /// Move the cursor. `-1` seeks to end of file; other negative offsets
    /// fail with `InvalidOffset`. Seeking past end of file is allowed.
    pub fn seek(&mut self, handle: FileHandle, offset: i64) -> Result<()> {
        let file = self.files.get_mut(handle.0)?;
        file.cursor = match offset {
            -1 => u64::from(file.record.size_bytes),
            o => u64::try_from(o).map_err(|_| T2fsError::InvalidOffset(o))?,
        };
        trace!(handle = handle.0, cursor = file.cursor, "seek");
        Ok(())
    }

    /// Cut the file at the cursor and release clusters past the new end.
    ///
    /// At least one cluster is always kept. A cursor at or past end of file
    /// leaves the file untouched.
    pub fn truncate(&mut self, handle: FileHandle) -> Result<()> {
        let (mut record, cursor, parent) = {
            let file = self.files.get(handle.0)?;
            (file.record.clone(), file.cursor, file.parent)
        };
        if cursor >= u64::from(record.size_bytes) {
            return Ok(());
        }
        let mut dir = self.dir_block(parent)?;
        let slot = Self::record_slot(&dir, &record)?;

        let keep = div_ceil_u64(cursor, self.cluster_size() as u64).max(1);
        let keep = u32::try_from(keep).unwrap_or(u32::MAX);
        let released = self
            .fat
            .truncate_chain(&self.dev, record.first_cluster, keep)?;

        record.size_bytes = u32::try_from(cursor).unwrap_or(record.size_bytes);
        record.size_clusters = u32::try_from(self.fat.chain(record.first_cluster)?.len())
            .unwrap_or(record.size_clusters);
        dir.write_record(slot, &record)?;
        self.store_dir(&dir)?;
        self.refresh_handles(record.first_cluster, &record);
        debug!(
            handle = handle.0,
            size = record.size_bytes,
            released,
            "file truncated"
        );
        Ok(())
    }

    /// Slot in `dir` still holding the file `record` describes.
    ///
    /// A same-named entry with a different chain is another file, so it
    /// counts as missing.
    fn record_slot(dir: &DirBlock<Vec<u8>>, record: &Record) -> Result<usize> {
        match dir.find_by_name(record.name.as_str())? {
            Some((slot, found)) if found.first_cluster == record.first_cluster => Ok(slot),
            _ => Err(T2fsError::NotFound(record.name.to_string())),
        }
    }

    /// Point every open handle on the chain starting at `first` at `record`.
    fn refresh_handles(&mut self, first: ClusterNumber, record: &Record) {
        for (_, file) in self.files.iter_mut() {
            if file.record.first_cluster == first {
                file.record = record.clone();
            }
        }
    }
}
