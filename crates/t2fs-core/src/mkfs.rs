//! Image formatting.

use serde::{Deserialize, Serialize};
use t2fs_block::SectorDevice;
use t2fs_error::{Result, T2fsError};
use t2fs_fat::FatTable;
use t2fs_ondisk::Superblock;
use t2fs_types::{FAT_ENTRIES_PER_SECTOR, SECTOR_SIZE, SectorNumber, T2FS_ID, T2FS_VERSION};
use tracing::info;

/// First cluster the root directory may occupy: 0 and 1 are reserved.
const ROOT_CLUSTER: u32 = 2;

/// Geometry requested from [`format`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    /// Sectors to use. `None` takes the whole device.
    pub sector_count: Option<u32>,
    pub sectors_per_cluster: u32,
    /// FAT region size. `None` sizes it to cover every data cluster.
    pub fat_sectors: Option<u32>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            sector_count: None,
            sectors_per_cluster: 4,
            fat_sectors: None,
        }
    }
}

fn fat_sectors_for(sector_count: u32, sectors_per_cluster: u32) -> u32 {
    let clusters = sector_count.saturating_sub(1) / sectors_per_cluster;
    clusters.div_ceil(FAT_ENTRIES_PER_SECTOR as u32).max(1)
}

/// Write an empty T2FS image onto `dev` and return its superblock.
///
/// Layout: superblock in sector 0, FAT from sector 1, data section right
/// after the FAT. The root directory is cluster 2 with every slot invalid.
pub fn format(dev: &dyn SectorDevice, options: &FormatOptions) -> Result<Superblock> {
    let device_sectors = u32::try_from(dev.sector_count()).unwrap_or(u32::MAX);
    let sector_count = options.sector_count.unwrap_or(device_sectors);
    if sector_count > device_sectors {
        return Err(T2fsError::InvalidGeometry(format!(
            "{sector_count} sectors requested, device has {device_sectors}"
        )));
    }
    let spc = options.sectors_per_cluster;
    if spc == 0 {
        return Err(T2fsError::InvalidGeometry(
            "sectors_per_cluster must be at least 1".to_owned(),
        ));
    }
    let fat_sectors = options
        .fat_sectors
        .unwrap_or_else(|| fat_sectors_for(sector_count, spc));
    if fat_sectors == 0 {
        return Err(T2fsError::InvalidGeometry("empty FAT region".to_owned()));
    }
    let disk_size = sector_count
        .checked_mul(SECTOR_SIZE as u32)
        .ok_or_else(|| T2fsError::InvalidGeometry(format!("{sector_count} sectors overflow")))?;

    let sb = Superblock {
        id: T2FS_ID,
        version: T2FS_VERSION,
        superblock_size: 1,
        disk_size,
        sector_count,
        sectors_per_cluster: spc,
        fat_sector_start: 1,
        root_dir_cluster: ROOT_CLUSTER,
        data_sector_start: 1 + fat_sectors,
    };
    // The root plus at least one cluster for data.
    if sb.cluster_count() < ROOT_CLUSTER + 2 {
        return Err(T2fsError::InvalidGeometry(format!(
            "only {} clusters fit in {sector_count} sectors",
            sb.cluster_count()
        )));
    }
    sb.validate_geometry()
        .map_err(|err| T2fsError::InvalidGeometry(err.to_string()))?;

    let bytes = sb
        .to_sector()
        .map_err(|err| T2fsError::InvalidGeometry(err.to_string()))?;
    dev.write_sector(SectorNumber(0), &bytes)?;
    FatTable::format(dev, &sb)?;

    let root_start = sb.cluster_first_sector(sb.root_cluster());
    let zero = [0_u8; SECTOR_SIZE];
    for i in 0..u64::from(spc) {
        dev.write_sector(SectorNumber(root_start.0 + i), &zero)?;
    }
    dev.sync()?;

    info!(
        sectors = sector_count,
        sectors_per_cluster = spc,
        fat_sectors,
        clusters = sb.cluster_count(),
        "formatted T2FS image"
    );
    Ok(sb)
}
