#![forbid(unsafe_code)]
//! File Allocation Table manager.
//!
//! ## Design
//!
//! The whole FAT is mirrored in memory and written through on every
//! mutation, so the on-disk table matches the mirror whenever a call
//! returns. Allocation is first-fit: the lowest-indexed FREE entry wins.
//!
//! 1. **Sector arithmetic**: FAT sector ↔ byte offset inside the FAT region.
//! 2. **FatTable**: mirror, first-fit scan, entry mutation, refresh.
//! 3. **Chains**: traversal, extension, truncation and release.

use t2fs_block::SectorDevice;
use t2fs_error::{Result, T2fsError};
use t2fs_ondisk::{FatEntry, Superblock};
use t2fs_types::{
    ClusterNumber, FAT_ENTRIES_PER_SECTOR, FAT_ENTRY_SIZE, SECTOR_SIZE, SectorNumber, read_le_u32,
};
use tracing::{debug, trace, warn};

// ── Sector arithmetic ───────────────────────────────────────────────────────

/// Byte offset, relative to the FAT region, of FAT sector `sector`.
///
/// With the canonical layout (`fat_start == 1`) this is `(sector - 1) * SECTOR_SIZE`.
#[must_use]
pub fn fat_log_to_phys(fat_start: u32, sector: u32) -> u64 {
    u64::from(sector.saturating_sub(fat_start)) * SECTOR_SIZE as u64
}

/// FAT sector (relative to the region) holding byte offset `offset`.
#[must_use]
pub fn fat_phys_to_log(offset: u64) -> u64 {
    offset / SECTOR_SIZE as u64
}

/// Cluster whose entry sits at byte `entry_byte` of FAT sector `sector`.
#[must_use]
pub fn cluster_at(fat_start: u32, sector: u32, entry_byte: usize) -> u64 {
    fat_log_to_phys(fat_start, sector) / FAT_ENTRY_SIZE as u64 + (entry_byte / FAT_ENTRY_SIZE) as u64
}

// ── FatTable ────────────────────────────────────────────────────────────────

/// In-memory mirror of the on-disk FAT.
#[derive(Debug, Clone)]
pub struct FatTable {
    entries: Vec<u32>,
    fat_start: u32,
    fat_sectors: u32,
    cluster_count: u32,
}

impl FatTable {
    /// Read the whole FAT region described by `sb`.
    pub fn load(dev: &dyn SectorDevice, sb: &Superblock) -> Result<Self> {
        let mut table = Self {
            entries: Vec::new(),
            fat_start: sb.fat_sector_start,
            fat_sectors: sb.fat_sector_count(),
            cluster_count: sb.cluster_count(),
        };
        table.refresh(dev)?;
        debug!(
            fat_start = table.fat_start,
            fat_sectors = table.fat_sectors,
            clusters = table.cluster_count,
            free = table.free_count(),
            "FAT loaded"
        );
        Ok(table)
    }

    /// Write a fresh FAT for a newly formatted image.
    ///
    /// Clusters 0 and 1 are reserved, the root cluster is terminated, and
    /// every entry past the last usable cluster is marked bad so it can
    /// never be handed out.
    pub fn format(dev: &dyn SectorDevice, sb: &Superblock) -> Result<Self> {
        let fat_sectors = sb.fat_sector_count();
        let cluster_count = sb.cluster_count();
        let total = fat_sectors as usize * FAT_ENTRIES_PER_SECTOR;
        let mut entries = vec![FatEntry::Free.to_raw(); total];
        for (index, raw) in entries.iter_mut().enumerate() {
            if index < 2 {
                *raw = FatEntry::Reserved.to_raw();
            } else if index >= cluster_count as usize {
                *raw = FatEntry::BadSector.to_raw();
            }
        }
        let root = sb.root_cluster();
        if root.0 >= cluster_count {
            return Err(T2fsError::InvalidGeometry(format!(
                "root cluster {root} outside {cluster_count} clusters"
            )));
        }
        entries[root.index()] = FatEntry::EndOfChain.to_raw();
        let table = Self {
            entries,
            fat_start: sb.fat_sector_start,
            fat_sectors,
            cluster_count,
        };
        table.flush_all(dev)?;
        debug!(
            fat_sectors,
            clusters = cluster_count,
            bad = total.saturating_sub(cluster_count as usize),
            "FAT formatted"
        );
        Ok(table)
    }

    /// Reload the mirror from disk.
    pub fn refresh(&mut self, dev: &dyn SectorDevice) -> Result<()> {
        let mut entries = Vec::with_capacity(self.fat_sectors as usize * FAT_ENTRIES_PER_SECTOR);
        for sector in self.sectors() {
            let buf = dev.read_sector(sector)?;
            for entry in 0..FAT_ENTRIES_PER_SECTOR {
                let raw = read_le_u32(buf.as_slice(), entry * FAT_ENTRY_SIZE).map_err(|err| {
                    T2fsError::Corruption {
                        cluster: 0,
                        detail: format!("FAT sector {sector}: {err}"),
                    }
                })?;
                entries.push(raw);
            }
        }
        self.entries = entries;
        trace!(entries = self.entries.len(), "FAT refreshed");
        Ok(())
    }

    fn sectors(&self) -> impl Iterator<Item = SectorNumber> + use<> {
        let start = u64::from(self.fat_start);
        (start..start + u64::from(self.fat_sectors)).map(SectorNumber)
    }

    /// Number of clusters the FAT can hand out.
    #[must_use]
    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    fn check_range(&self, cluster: ClusterNumber) -> Result<()> {
        if cluster.0 >= self.cluster_count {
            return Err(T2fsError::Corruption {
                cluster: cluster.0,
                detail: format!("cluster outside FAT (cluster_count={})", self.cluster_count),
            });
        }
        Ok(())
    }

    /// Decoded entry for `cluster`.
    pub fn entry(&self, cluster: ClusterNumber) -> Result<FatEntry> {
        self.check_range(cluster)?;
        Ok(FatEntry::from_raw(self.entries[cluster.index()]))
    }

    /// Count of FREE entries in the mirror.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        let free = self
            .entries
            .iter()
            .take(self.cluster_count as usize)
            .filter(|raw| FatEntry::from_raw(**raw).is_free())
            .count();
        u32::try_from(free).unwrap_or(u32::MAX)
    }

    /// Scan the on-disk FAT sector by sector for the first FREE entry.
    ///
    /// Lowest cluster index wins. Fails with `NoFreeSpace` when every usable
    /// entry is taken, or with the device error if a FAT sector cannot be read.
    pub fn first_fit(&self, dev: &dyn SectorDevice) -> Result<ClusterNumber> {
        for sector in self.sectors() {
            let buf = dev.read_sector(sector)?;
            let logical = u32::try_from(sector.0).unwrap_or(u32::MAX);
            for entry_byte in (0..SECTOR_SIZE).step_by(FAT_ENTRY_SIZE) {
                let cluster = cluster_at(self.fat_start, logical, entry_byte);
                if cluster >= u64::from(self.cluster_count) {
                    return Err(T2fsError::NoFreeSpace);
                }
                let raw = read_le_u32(buf.as_slice(), entry_byte).map_err(|err| {
                    T2fsError::Corruption {
                        cluster: 0,
                        detail: format!("FAT sector {sector}: {err}"),
                    }
                })?;
                if FatEntry::from_raw(raw).is_free() {
                    let cluster = ClusterNumber(
                        u32::try_from(cluster).map_err(|_| T2fsError::NoFreeSpace)?,
                    );
                    trace!(cluster = cluster.0, "first_fit");
                    return Ok(cluster);
                }
            }
        }
        Err(T2fsError::NoFreeSpace)
    }

    /// Set the entry for `cluster` and write its FAT sector through to disk.
    ///
    /// Clusters marked bad are never reassigned.
    pub fn set_entry(
        &mut self,
        dev: &dyn SectorDevice,
        cluster: ClusterNumber,
        value: FatEntry,
    ) -> Result<()> {
        self.check_range(cluster)?;
        if FatEntry::from_raw(self.entries[cluster.index()]) == FatEntry::BadSector {
            return Err(T2fsError::BadSector(cluster.0));
        }
        self.entries[cluster.index()] = value.to_raw();
        self.write_sector_of(dev, cluster)?;
        trace!(cluster = cluster.0, value = ?value, "FAT entry set");
        Ok(())
    }

    fn write_sector_of(&self, dev: &dyn SectorDevice, cluster: ClusterNumber) -> Result<()> {
        let rel = cluster.index() / FAT_ENTRIES_PER_SECTOR;
        self.write_region_sector(dev, rel)
    }

    fn write_region_sector(&self, dev: &dyn SectorDevice, rel: usize) -> Result<()> {
        let mut buf = [0_u8; SECTOR_SIZE];
        let first = rel * FAT_ENTRIES_PER_SECTOR;
        for (i, raw) in self.entries[first..first + FAT_ENTRIES_PER_SECTOR]
            .iter()
            .enumerate()
        {
            buf[i * FAT_ENTRY_SIZE..(i + 1) * FAT_ENTRY_SIZE].copy_from_slice(&raw.to_le_bytes());
        }
        let sector = SectorNumber(u64::from(self.fat_start) + rel as u64);
        dev.write_sector(sector, &buf)
    }

    /// Rewrite every FAT sector from the mirror.
    pub fn flush_all(&self, dev: &dyn SectorDevice) -> Result<()> {
        for rel in 0..self.fat_sectors as usize {
            self.write_region_sector(dev, rel)?;
        }
        debug!(sectors = self.fat_sectors, "FAT flushed");
        Ok(())
    }

    // ── Chains ──────────────────────────────────────────────────────────────

    /// Clusters of the chain starting at `first`, in order.
    ///
    /// Fails with `Corruption` if the chain runs into a non-chain entry or
    /// loops.
    pub fn chain(&self, first: ClusterNumber) -> Result<Vec<ClusterNumber>> {
        let mut out = Vec::new();
        let mut cur = first;
        loop {
            if out.len() > self.cluster_count as usize {
                return Err(T2fsError::Corruption {
                    cluster: first.0,
                    detail: "cluster chain does not terminate".to_owned(),
                });
            }
            out.push(cur);
            match self.entry(cur)? {
                FatEntry::EndOfChain => return Ok(out),
                FatEntry::Next(next) => cur = next,
                other => {
                    return Err(T2fsError::Corruption {
                        cluster: cur.0,
                        detail: format!("chain entry is {other:?}"),
                    });
                }
            }
        }
    }

    /// Take the first free cluster and terminate it.
    pub fn allocate(&mut self, dev: &dyn SectorDevice) -> Result<ClusterNumber> {
        let cluster = self.first_fit(dev)?;
        self.set_entry(dev, cluster, FatEntry::EndOfChain)?;
        debug!(cluster = cluster.0, "cluster allocated");
        Ok(cluster)
    }

    /// Append `count` freshly allocated clusters after `tail`.
    ///
    /// Each cluster is terminated before it is linked, so a failure midway
    /// leaves a well-formed (shorter) chain.
    pub fn extend_chain(
        &mut self,
        dev: &dyn SectorDevice,
        tail: ClusterNumber,
        count: u32,
    ) -> Result<Vec<ClusterNumber>> {
        let mut added = Vec::with_capacity(count as usize);
        let mut tail = tail;
        for _ in 0..count {
            let next = self.allocate(dev)?;
            self.set_entry(dev, tail, FatEntry::Next(next))?;
            added.push(next);
            tail = next;
        }
        Ok(added)
    }

    /// Keep the first `keep` clusters (at least one) and free the rest.
    ///
    /// Returns the number of clusters released.
    pub fn truncate_chain(
        &mut self,
        dev: &dyn SectorDevice,
        first: ClusterNumber,
        keep: u32,
    ) -> Result<u32> {
        let chain = self.chain(first)?;
        let keep = keep.max(1) as usize;
        if keep >= chain.len() {
            return Ok(0);
        }
        self.set_entry(dev, chain[keep - 1], FatEntry::EndOfChain)?;
        for cluster in &chain[keep..] {
            self.set_entry(dev, *cluster, FatEntry::Free)?;
        }
        let released = u32::try_from(chain.len() - keep).unwrap_or(u32::MAX);
        debug!(first = first.0, keep, released, "chain truncated");
        Ok(released)
    }

    /// Free every cluster of the chain starting at `first`.
    ///
    /// A malformed chain is released up to the first bad link.
    pub fn release_chain(&mut self, dev: &dyn SectorDevice, first: ClusterNumber) -> Result<u32> {
        let mut cur = first;
        let mut released = 0_u32;
        loop {
            if released > self.cluster_count {
                warn!(first = first.0, "chain loops; stopped releasing");
                break;
            }
            let entry = self.entry(cur)?;
            if matches!(entry, FatEntry::BadSector | FatEntry::Free | FatEntry::Reserved) {
                warn!(first = first.0, cluster = cur.0, entry = ?entry, "chain hits a non-chain entry");
                break;
            }
            self.set_entry(dev, cur, FatEntry::Free)?;
            released += 1;
            match entry {
                FatEntry::Next(next) => cur = next,
                _ => break,
            }
        }
        debug!(first = first.0, released, "chain released");
        Ok(released)
    }
}
