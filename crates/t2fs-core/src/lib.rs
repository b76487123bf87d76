#![forbid(unsafe_code)]
//! T2FS filesystem engine.
//!
//! [`T2fs`] owns a mounted image: the sector device, the parsed superblock,
//! the FAT mirror, the open-file and open-directory tables and the current
//! directory. Every operation takes `&mut self`; callers that share one
//! instance across threads wrap it in a lock.
//!
//! ```ignore
//! let dev = ByteSectorDevice::in_memory(1024);
//! t2fs_core::format(&dev, &FormatOptions::default())?;
//! let mut fs = T2fs::mount(dev)?;
//! let fh = fs.create("/hello.txt")?;
//! fs.write(fh, b"hello")?;
//! ```

mod dir_ops;
mod file_ops;
mod handles;
pub mod mkfs;
pub mod path;

use serde::{Deserialize, Serialize};
use t2fs_block::SectorDevice;
use t2fs_dir::DirBlock;
use t2fs_fat::FatTable;
use t2fs_ondisk::{Record, RecordName};
use t2fs_types::{MAX_LINK_DEPTH, MAX_OPENED_DIRS, MAX_OPENED_FILES, MAX_PATH_LEN, SectorNumber};
use tracing::info;

pub use handles::{DirHandle, FileHandle};
pub use mkfs::{FormatOptions, format};
pub use path::{ResolvedPath, resolve_path};
pub use t2fs_block::{ByteSectorDevice, FileByteDevice, MemoryByteDevice};
pub use t2fs_error::{Result, T2fsError};
pub use t2fs_ondisk::{FatEntry, RecordKind, Superblock};
pub use t2fs_types::{ClusterNumber, SECTOR_SIZE};

use handles::{OpenDir, OpenFile, SlotTable};

/// Identification string for this implementation.
#[must_use]
pub fn identify() -> &'static str {
    concat!("t2fs-core ", env!("CARGO_PKG_VERSION"), " (T2FS 0x7E22, 256-byte sectors)")
}

/// Limits applied to a mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    pub max_open_files: usize,
    pub max_open_dirs: usize,
    /// Longest path accepted by any operation, in bytes.
    pub max_path_len: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            max_open_files: MAX_OPENED_FILES,
            max_open_dirs: MAX_OPENED_DIRS,
            max_path_len: MAX_PATH_LEN,
        }
    }
}

/// Geometry derived from the superblock at mount time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub sector_size: usize,
    pub sectors_per_cluster: u32,
    pub cluster_size: usize,
    /// Directory slots in one cluster.
    pub records_per_cluster: usize,
    pub cluster_count: u32,
    pub fat_sector_start: u32,
    pub fat_sectors: u32,
    pub data_sector_start: u32,
    pub root_cluster: u32,
    pub free_clusters: u32,
}

/// One directory entry as reported by `readdir` and `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: RecordKind,
    /// Size in bytes.
    pub size: u32,
    /// Size in clusters.
    pub clusters: u32,
    pub first_cluster: ClusterNumber,
}

impl From<&Record> for DirEntry {
    fn from(record: &Record) -> Self {
        Self {
            name: record.name.as_str().to_owned(),
            kind: record.kind,
            size: record.size_bytes,
            clusters: record.size_clusters,
            first_cluster: record.first_cluster,
        }
    }
}

/// Directory entry found by a lookup, with the cluster of the directory holding it.
#[derive(Debug, Clone)]
pub(crate) struct Located {
    pub parent: ClusterNumber,
    pub record: Record,
}

/// A mounted T2FS image.
pub struct T2fs<D: SectorDevice> {
    dev: D,
    sb: Superblock,
    fat: FatTable,
    cwd: ClusterNumber,
    files: SlotTable<OpenFile>,
    dirs: SlotTable<OpenDir>,
    options: OpenOptions,
}

impl<D: SectorDevice> std::fmt::Debug for T2fs<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("T2fs")
            .field("superblock", &self.sb)
            .field("cwd", &self.cwd)
            .field("open_files", &self.files.in_use())
            .field("open_dirs", &self.dirs.in_use())
            .field("sector_count", &self.dev.sector_count())
            .finish_non_exhaustive()
    }
}

impl<D: SectorDevice> T2fs<D> {
    /// Mount with default limits.
    pub fn mount(dev: D) -> Result<Self> {
        Self::mount_with_options(dev, OpenOptions::default())
    }

    /// Parse and validate sector 0, load the FAT and start at the root.
    ///
    /// An unreadable sector 0 or a wrong id/version is `CorruptSuperblock`;
    /// a layout that does not fit the device is `InvalidGeometry`.
    pub fn mount_with_options(dev: D, options: OpenOptions) -> Result<Self> {
        let sector = dev.read_sector(SectorNumber(0)).map_err(|err| {
            T2fsError::CorruptSuperblock(format!("sector 0 unreadable: {err}"))
        })?;
        let sb = Superblock::parse_sector(sector.as_slice())
            .map_err(|err| T2fsError::CorruptSuperblock(err.to_string()))?;
        sb.validate_geometry()
            .map_err(|err| T2fsError::InvalidGeometry(err.to_string()))?;
        if u64::from(sb.sector_count) > dev.sector_count() {
            return Err(T2fsError::InvalidGeometry(format!(
                "superblock claims {} sectors, device has {}",
                sb.sector_count,
                dev.sector_count()
            )));
        }

        let fat = FatTable::load(&dev, &sb)?;
        info!(
            sectors = sb.sector_count,
            sectors_per_cluster = sb.sectors_per_cluster,
            clusters = sb.cluster_count(),
            free = fat.free_count(),
            "mounted T2FS image"
        );
        Ok(Self {
            cwd: sb.root_cluster(),
            files: SlotTable::with_capacity(options.max_open_files),
            dirs: SlotTable::with_capacity(options.max_open_dirs),
            dev,
            sb,
            fat,
            options,
        })
    }

    /// Give the device back.
    pub fn into_device(self) -> D {
        self.dev
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        Geometry {
            sector_size: SECTOR_SIZE,
            sectors_per_cluster: self.sb.sectors_per_cluster,
            cluster_size: self.sb.cluster_size(),
            records_per_cluster: self.sb.records_per_cluster(),
            cluster_count: self.sb.cluster_count(),
            fat_sector_start: self.sb.fat_sector_start,
            fat_sectors: self.sb.fat_sector_count(),
            data_sector_start: self.sb.data_sector_start,
            root_cluster: self.sb.root_dir_cluster,
            free_clusters: self.fat.free_count(),
        }
    }

    /// First data sector of the current directory.
    #[must_use]
    pub fn current_dir_sector(&self) -> SectorNumber {
        self.sb.cluster_first_sector(self.cwd)
    }

    #[must_use]
    pub fn open_file_count(&self) -> usize {
        self.files.in_use()
    }

    #[must_use]
    pub fn open_dir_count(&self) -> usize {
        self.dirs.in_use()
    }

    /// Flush the device.
    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }

    /// Entry metadata for `path`. Links are reported as links.
    pub fn stat(&self, path: &str) -> Result<DirEntry> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        let located = self.locate(&rp, 0)?;
        Ok(DirEntry::from(&located.record))
    }

    /// Absolute path stored in the link at `path`.
    pub fn read_link(&self, path: &str) -> Result<String> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        let located = self.locate(&rp, 0)?;
        if located.record.kind != RecordKind::Link {
            return Err(T2fsError::InvalidPath(format!("{} is not a link", rp.both)));
        }
        self.link_target(&located.record)
    }

    /// Clusters of the chain owned by the entry at `path`, in order.
    pub fn fat_chain(&self, path: &str) -> Result<Vec<ClusterNumber>> {
        let rp = resolve_path(path, self.options.max_path_len)?;
        let located = self.locate(&rp, 0)?;
        self.fat.chain(located.record.first_cluster)
    }

    // ── Cluster I/O ─────────────────────────────────────────────────────────

    fn cluster_size(&self) -> usize {
        self.sb.cluster_size()
    }

    fn read_cluster(&self, cluster: ClusterNumber) -> Result<Vec<u8>> {
        if cluster.0 >= self.sb.cluster_count() {
            return Err(T2fsError::Corruption {
                cluster: cluster.0,
                detail: "cluster outside the data section".to_owned(),
            });
        }
        let first = self.sb.cluster_first_sector(cluster);
        let mut out = Vec::with_capacity(self.cluster_size());
        for i in 0..u64::from(self.sb.sectors_per_cluster) {
            let sector = self.dev.read_sector(SectorNumber(first.0 + i))?;
            out.extend_from_slice(sector.as_slice());
        }
        Ok(out)
    }

    fn write_cluster(&self, cluster: ClusterNumber, data: &[u8]) -> Result<()> {
        if cluster.0 >= self.sb.cluster_count() {
            return Err(T2fsError::Corruption {
                cluster: cluster.0,
                detail: "cluster outside the data section".to_owned(),
            });
        }
        let first = self.sb.cluster_first_sector(cluster);
        for (i, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
            self.dev.write_sector(SectorNumber(first.0 + i as u64), chunk)?;
        }
        Ok(())
    }

    fn dir_block(&self, cluster: ClusterNumber) -> Result<DirBlock<Vec<u8>>> {
        Ok(DirBlock::new(cluster, self.read_cluster(cluster)?))
    }

    fn store_dir(&self, block: &DirBlock<Vec<u8>>) -> Result<()> {
        self.write_cluster(block.cluster(), block.as_bytes())
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    fn root_record(&self) -> Record {
        Record::new(
            RecordKind::Directory,
            RecordName::root(),
            u32::try_from(self.cluster_size()).unwrap_or(u32::MAX),
            1,
            self.sb.root_cluster(),
        )
    }

    /// Cluster named by the `..` entry of `dir`. The root is its own parent.
    fn parent_of(&self, dir: ClusterNumber) -> Result<ClusterNumber> {
        if dir == self.sb.root_cluster() {
            return Ok(dir);
        }
        self.dir_block(dir)?
            .parent_cluster()?
            .ok_or_else(|| T2fsError::Corruption {
                cluster: dir.0,
                detail: "directory has no '..' entry".to_owned(),
            })
    }

    /// Walk a directory path from the root (absolute) or the current
    /// directory (relative) and return the cluster it names.
    fn walk_dir(&self, dir_path: &str, depth: usize) -> Result<ClusterNumber> {
        let mut cur = if dir_path.starts_with('/') {
            self.sb.root_cluster()
        } else {
            self.cwd
        };
        for token in dir_path.split('/') {
            match token {
                "" | "." => {}
                ".." => cur = self.parent_of(cur)?,
                name => {
                    let (_, record) = self
                        .dir_block(cur)?
                        .find_by_name(name)?
                        .ok_or_else(|| T2fsError::NotFound(dir_path.to_owned()))?;
                    let target = self.follow(
                        Located {
                            parent: cur,
                            record,
                        },
                        depth,
                    )?;
                    if target.record.kind != RecordKind::Directory {
                        return Err(T2fsError::NotADirectory(name.to_owned()));
                    }
                    cur = target.record.first_cluster;
                }
            }
        }
        Ok(cur)
    }

    /// Find the entry `path` names without following a trailing link.
    fn locate(&self, path: &ResolvedPath, depth: usize) -> Result<Located> {
        let Some(head) = path.head.as_deref() else {
            return Ok(Located {
                parent: self.sb.root_cluster(),
                record: self.root_record(),
            });
        };
        if path.head_is_dot() {
            let cluster = self.walk_dir(&path.both, depth)?;
            if cluster == self.sb.root_cluster() {
                return Ok(Located {
                    parent: cluster,
                    record: self.root_record(),
                });
            }
            let parent = self.parent_of(cluster)?;
            let name =
                RecordName::new(head).map_err(|err| T2fsError::InvalidPath(err.to_string()))?;
            let size = u32::try_from(self.cluster_size()).unwrap_or(u32::MAX);
            return Ok(Located {
                parent,
                record: Record::new(RecordKind::Directory, name, size, 1, cluster),
            });
        }
        let parent = self.walk_dir(&path.tail, depth)?;
        let (_, record) = self
            .dir_block(parent)?
            .find_by_name(head)?
            .ok_or_else(|| T2fsError::NotFound(path.both.clone()))?;
        Ok(Located { parent, record })
    }

    /// Dereference links until a non-link entry is reached.
    fn follow(&self, mut located: Located, mut depth: usize) -> Result<Located> {
        while located.record.kind == RecordKind::Link {
            if depth >= MAX_LINK_DEPTH {
                return Err(T2fsError::InvalidPath(format!(
                    "more than {MAX_LINK_DEPTH} levels of links"
                )));
            }
            depth += 1;
            let target = self.link_target(&located.record)?;
            let rp = resolve_path(&target, self.options.max_path_len)?;
            located = self.locate(&rp, depth)?;
        }
        Ok(located)
    }

    /// Path stored in a link's payload cluster.
    fn link_target(&self, record: &Record) -> Result<String> {
        let data = self.read_cluster(record.first_cluster)?;
        let len = (record.size_bytes as usize).min(data.len());
        String::from_utf8(data[..len].to_vec()).map_err(|err| T2fsError::Corruption {
            cluster: record.first_cluster.0,
            detail: format!("link payload is not UTF-8: {err}"),
        })
    }

    /// Validated entry name for a path that must name a new entry.
    fn entry_name(path: &ResolvedPath) -> Result<RecordName> {
        let head = match path.head.as_deref() {
            Some(head) if !path.head_is_dot() => head,
            _ => {
                return Err(T2fsError::InvalidPath(format!(
                    "{} does not name an entry",
                    path.both
                )));
            }
        };
        RecordName::new(head).map_err(|err| T2fsError::InvalidPath(format!("{head}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use t2fs_block::MemoryByteDevice;

    fn mounted() -> T2fs<ByteSectorDevice<MemoryByteDevice>> {
        let dev = ByteSectorDevice::in_memory(512);
        format(&dev, &FormatOptions::default()).expect("format");
        T2fs::mount(dev).expect("mount")
    }

    #[test]
    fn geometry_matches_superblock() {
        let fs = mounted();
        let g = fs.geometry();
        assert_eq!(g.sector_size, SECTOR_SIZE);
        assert_eq!(g.cluster_size, SECTOR_SIZE * 4);
        assert_eq!(g.records_per_cluster, 16);
        assert_eq!(g.root_cluster, fs.superblock().root_dir_cluster);
        assert_eq!(
            fs.current_dir_sector(),
            fs.superblock().cluster_first_sector(fs.superblock().root_cluster())
        );
        assert!(g.free_clusters < g.cluster_count);
    }

    #[test]
    fn root_and_dot_paths_resolve_to_directories() {
        let mut fs = mounted();
        fs.mkdir("/a").expect("mkdir");
        let root = fs.superblock().root_cluster();

        let located = fs
            .locate(&resolve_path("/", MAX_PATH_LEN).expect("path"), 0)
            .expect("locate root");
        assert_eq!(located.record.first_cluster, root);
        assert_eq!(located.record.kind, RecordKind::Directory);

        let a = fs.stat("/a").expect("stat").first_cluster;
        let dot = fs
            .locate(&resolve_path("/a/.", MAX_PATH_LEN).expect("path"), 0)
            .expect("locate dot");
        assert_eq!(dot.record.first_cluster, a);
        assert_eq!(dot.parent, root);

        let up = fs
            .locate(&resolve_path("/a/..", MAX_PATH_LEN).expect("path"), 0)
            .expect("locate dot-dot");
        assert_eq!(up.record.first_cluster, root);
    }

    #[test]
    fn parent_of_root_is_root() {
        let fs = mounted();
        let root = fs.superblock().root_cluster();
        assert_eq!(fs.parent_of(root).expect("parent"), root);
    }

    #[test]
    fn cluster_io_rejects_clusters_past_the_data_section() {
        let fs = mounted();
        let past = ClusterNumber(fs.superblock().cluster_count());
        assert!(matches!(
            fs.read_cluster(past),
            Err(T2fsError::Corruption { .. })
        ));
        let data = vec![0_u8; fs.cluster_size()];
        assert!(matches!(
            fs.write_cluster(past, &data),
            Err(T2fsError::Corruption { .. })
        ));
    }

    #[test]
    fn entry_name_rejects_dot_heads() {
        let rp = resolve_path("/a/..", MAX_PATH_LEN).expect("path");
        assert!(matches!(
            T2fs::<ByteSectorDevice<MemoryByteDevice>>::entry_name(&rp),
            Err(T2fsError::InvalidPath(_))
        ));
    }
}
