//! Directory operations, links and the current directory.

use t2fs_block::SectorDevice;
use t2fs_dir::{DirBlock, SlotLookup};
use t2fs_error::{Result, T2fsError};
use t2fs_ondisk::{FatEntry, Record, RecordKind};
use t2fs_types::{ClusterNumber, DOT, DOT_DOT, RECORD_SIZE};
use tracing::{debug, info, warn};

use crate::handles::{DirHandle, OpenDir};
use crate::path::{join, resolve_path};
use crate::{DirEntry, T2fs};

impl<D: SectorDevice> T2fs<D> {
    /// Create an empty directory holding only `.` and `..`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        if rp.head_is_dot() {
            self.walk_dir(&rp.both, 0)?;
        }
        if rp.is_root() || rp.head_is_dot() {
            return Err(T2fsError::AlreadyExists(rp.both));
        }
        let name = Self::entry_name(&rp)?;
        let parent = self.walk_dir(&rp.tail, 0)?;
        let mut block = self.dir_block(parent)?;
        let slot = match block.lookup_slot(name.as_str())? {
            SlotLookup::Duplicate { .. } => return Err(T2fsError::AlreadyExists(rp.both)),
            SlotLookup::Full => return Err(T2fsError::DirectoryFull(rp.tail)),
            SlotLookup::Free(slot) => slot,
        };

        let cluster = self.fat.allocate(&self.dev)?;
        let cs = self.cluster_size();
        let record = Record::new(
            RecordKind::Directory,
            name,
            u32::try_from(cs).unwrap_or(u32::MAX),
            1,
            cluster,
        );
        block.write_record(slot, &record)?;
        self.store_dir(&block)?;

        let mut child = DirBlock::new(cluster, vec![0_u8; cs]);
        child.init(parent)?;
        self.store_dir(&child)?;
        self.fat.refresh(&self.dev)?;

        info!(path = %rp.both, cluster = cluster.0, parent = parent.0, "directory created");
        Ok(())
    }

    /// Remove an empty directory. A link to a directory removes its target.
    ///
    /// Removing the current directory moves the current directory to the root.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        if rp.is_root() || rp.head_is_dot() {
            return Err(T2fsError::InvalidPath(format!("cannot remove {}", rp.both)));
        }
        let located = self.locate(&rp, 0)?;
        let located = self.follow(located, 0)?;
        if located.record.kind != RecordKind::Directory {
            return Err(T2fsError::NotADirectory(rp.both));
        }
        let target = located.record.first_cluster;
        let root = self.sb.root_cluster();
        if target == root {
            return Err(T2fsError::InvalidPath(format!("cannot remove {}", rp.both)));
        }

        let mut child = self.dir_block(target)?;
        if !child.is_empty_dir()? {
            return Err(T2fsError::DirectoryNotEmpty(rp.both));
        }
        let parent = child.parent_cluster()?.unwrap_or(located.parent);
        for name in [DOT, DOT_DOT] {
            if let Some((slot, _)) = child.find_by_name(name)? {
                child.invalidate(slot)?;
            }
        }
        self.store_dir(&child)?;

        let mut parent_block = self.dir_block(parent)?;
        let (slot, _) = parent_block
            .find_by_cluster(target)?
            .ok_or_else(|| T2fsError::Corruption {
                cluster: parent.0,
                detail: format!("no entry for directory cluster {target}"),
            })?;
        parent_block.invalidate(slot)?;
        self.store_dir(&parent_block)?;
        self.fat.set_entry(&self.dev, target, FatEntry::Free)?;

        let orphaned = self.dirs.orphan_where(|dir| dir.cluster == target);
        if orphaned > 0 {
            debug!(path = %rp.both, orphaned, "open sessions on removed directory orphaned");
        }
        if self.cwd == target {
            warn!(path = %rp.both, "removed the current directory; moving to root");
            self.cwd = root;
        }
        info!(path = %rp.both, cluster = target.0, "directory removed");
        Ok(())
    }

    /// Change the current directory, following a trailing link.
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        let located = self.locate(&rp, 0)?;
        let located = self.follow(located, 0)?;
        if located.record.kind != RecordKind::Directory {
            return Err(T2fsError::NotADirectory(rp.both));
        }
        self.cwd = located.record.first_cluster;
        debug!(path = %rp.both, cluster = self.cwd.0, "current directory changed");
        Ok(())
    }

    /// Absolute path of the current directory.
    pub fn getcwd(&self) -> Result<String> {
        self.dir_path(self.cwd)
    }

    /// Absolute path of the directory at `cluster`, rebuilt by climbing `..`
    /// entries and looking each directory up in its parent.
    fn dir_path(&self, cluster: ClusterNumber) -> Result<String> {
        let root = self.sb.root_cluster();
        let mut names = Vec::new();
        let mut cur = cluster;
        while cur != root {
            if names.len() > self.sb.cluster_count() as usize {
                return Err(T2fsError::Corruption {
                    cluster: cluster.0,
                    detail: "directory tree loops above this directory".to_owned(),
                });
            }
            let parent = self.parent_of(cur)?;
            let (_, record) = self
                .dir_block(parent)?
                .find_by_cluster(cur)?
                .ok_or_else(|| T2fsError::Corruption {
                    cluster: cur.0,
                    detail: format!("directory not listed in parent cluster {parent}"),
                })?;
            names.push(record.name.as_str().to_owned());
            cur = parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Write the current directory into `buf`, NUL-terminated.
    ///
    /// Returns the path length without the terminator.
    pub fn getcwd_into(&self, buf: &mut [u8]) -> Result<usize> {
        let cwd = self.getcwd()?;
        let needed = cwd.len() + 1;
        if buf.len() < needed {
            return Err(T2fsError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        buf[..cwd.len()].copy_from_slice(cwd.as_bytes());
        buf[cwd.len()] = 0;
        Ok(cwd.len())
    }

    /// Open a directory for enumeration, following links.
    pub fn opendir(&mut self, path: &str) -> Result<DirHandle> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        if self.dirs.is_full() {
            return Err(T2fsError::TooManyOpenDirs);
        }
        let located = self.locate(&rp, 0)?;
        let located = self.follow(located, 0)?;
        if located.record.kind != RecordKind::Directory {
            return Err(T2fsError::NotADirectory(rp.both));
        }
        let cluster = located.record.first_cluster;
        debug!(path = %rp.both, cluster = cluster.0, "directory opened");
        let index = self
            .dirs
            .insert(OpenDir {
                cluster,
                offset: 0,
                path: rp,
            })
            .ok_or(T2fsError::TooManyOpenDirs)?;
        Ok(DirHandle(index))
    }

    /// Next entry of an open directory, skipping `.` and `..`.
    ///
    /// At the end of the cluster the session rewinds and `EndOfDirectory`
    /// is returned.
    pub fn readdir(&mut self, handle: DirHandle) -> Result<DirEntry> {
        let (cluster, offset) = {
            let dir = self.dirs.get(handle.0)?;
            (dir.cluster, dir.offset)
        };
        let next = self.dir_block(cluster)?.next_valid(offset / RECORD_SIZE)?;
        let dir = self.dirs.get_mut(handle.0)?;
        match next {
            Some((slot, record)) => {
                dir.offset = (slot + 1) * RECORD_SIZE;
                Ok(DirEntry::from(&record))
            }
            None => {
                dir.offset = 0;
                Err(T2fsError::EndOfDirectory)
            }
        }
    }

    pub fn closedir(&mut self, handle: DirHandle) -> Result<()> {
        match self.dirs.remove(handle.0)? {
            Some(dir) => debug!(handle = handle.0, path = %dir.path.both, "directory closed"),
            None => debug!(handle = handle.0, "closed session of a removed directory"),
        }
        Ok(())
    }

    /// Create a symbolic link at `linkname` pointing at `target`.
    ///
    /// The target must exist. What is stored is the absolute path of the
    /// entry the target resolved to, with every link on the way already
    /// followed, so relative targets are taken from the current directory at
    /// link time.
    pub fn link(&mut self, linkname: &str, target: &str) -> Result<()> {
        let target_rp = resolve_path(target, self.options.max_path_len)?;
        let resolved = self.locate(&target_rp, 0)?;
        let stored = match target_rp.head.as_deref() {
            Some(head) if !target_rp.head_is_dot() => join(&self.dir_path(resolved.parent)?, head),
            _ => self.dir_path(resolved.record.first_cluster)?,
        };

        let rp = resolve_path(linkname, self.options.max_path_len)?;
        if rp.head_is_dot() {
            self.walk_dir(&rp.both, 0)?;
        }
        if rp.is_root() || rp.head_is_dot() {
            return Err(T2fsError::AlreadyExists(rp.both));
        }
        let name = Self::entry_name(&rp)?;
        let cs = self.cluster_size();
        if stored.len() > cs {
            return Err(T2fsError::InvalidPath(format!(
                "link target is {} bytes, a cluster holds {cs}",
                stored.len()
            )));
        }
        let parent = self.walk_dir(&rp.tail, 0)?;
        let mut block = self.dir_block(parent)?;
        let slot = match block.lookup_slot(name.as_str())? {
            SlotLookup::Duplicate { .. } => return Err(T2fsError::AlreadyExists(rp.both)),
            SlotLookup::Full => return Err(T2fsError::DirectoryFull(rp.tail)),
            SlotLookup::Free(slot) => slot,
        };

        let cluster = self.fat.allocate(&self.dev)?;
        let mut payload = vec![0_u8; cs];
        payload[..stored.len()].copy_from_slice(stored.as_bytes());
        self.write_cluster(cluster, &payload)?;

        let record = Record::new(
            RecordKind::Link,
            name,
            u32::try_from(stored.len()).unwrap_or(u32::MAX),
            1,
            cluster,
        );
        block.write_record(slot, &record)?;
        self.store_dir(&block)?;
        debug!(link = %rp.both, target = %stored, cluster = cluster.0, "link created");
        Ok(())
    }
}
