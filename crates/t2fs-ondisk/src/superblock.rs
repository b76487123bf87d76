//! Sector-0 superblock.
//!
//! Layout (little-endian):
//!
//! | Bytes | Field |
//! |-------|-------|
//! | 0..4 | id `"T2FS"` |
//! | 4..6 | version `0x7E22` |
//! | 6..8 | superblock size (sectors) |
//! | 8..12 | disk size (bytes) |
//! | 12..16 | sector count |
//! | 16..20 | sectors per cluster |
//! | 20..24 | FAT start sector |
//! | 24..28 | root directory cluster |
//! | 28..32 | data section start sector |

use serde::{Deserialize, Serialize};
use t2fs_types::{
    ClusterNumber, FAT_ENTRIES_PER_SECTOR, ParseError, RECORDS_PER_SECTOR, SECTOR_SIZE,
    SUPERBLOCK_FIELDS_LEN, SectorNumber, T2FS_ID, T2FS_VERSION, ensure_slice, read_fixed,
    read_le_u16, read_le_u32, write_bytes, write_le_u16, write_le_u32,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub id: [u8; 4],
    pub version: u16,
    pub superblock_size: u16,
    pub disk_size: u32,
    pub sector_count: u32,
    pub sectors_per_cluster: u32,
    pub fat_sector_start: u32,
    pub root_dir_cluster: u32,
    pub data_sector_start: u32,
}

impl Superblock {
    /// Parse the superblock fields out of sector 0.
    ///
    /// Checks id and version only; call [`Self::validate_geometry`] before
    /// trusting the layout.
    pub fn parse_sector(sector: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(sector, 0, SUPERBLOCK_FIELDS_LEN)?;

        let id: [u8; 4] = read_fixed(sector, 0)?;
        if id != T2FS_ID {
            return Err(ParseError::InvalidMagic {
                expected: T2FS_ID,
                actual: id,
            });
        }

        let version = read_le_u16(sector, 4)?;
        if version != T2FS_VERSION {
            return Err(ParseError::InvalidVersion {
                expected: T2FS_VERSION,
                actual: version,
            });
        }

        Ok(Self {
            id,
            version,
            superblock_size: read_le_u16(sector, 6)?,
            disk_size: read_le_u32(sector, 8)?,
            sector_count: read_le_u32(sector, 12)?,
            sectors_per_cluster: read_le_u32(sector, 16)?,
            fat_sector_start: read_le_u32(sector, 20)?,
            root_dir_cluster: read_le_u32(sector, 24)?,
            data_sector_start: read_le_u32(sector, 28)?,
        })
    }

    /// Serialise into a full sector (unused bytes zeroed).
    pub fn to_sector(&self) -> Result<[u8; SECTOR_SIZE], ParseError> {
        let mut out = [0_u8; SECTOR_SIZE];
        write_bytes(&mut out, 0, &self.id)?;
        write_le_u16(&mut out, 4, self.version)?;
        write_le_u16(&mut out, 6, self.superblock_size)?;
        write_le_u32(&mut out, 8, self.disk_size)?;
        write_le_u32(&mut out, 12, self.sector_count)?;
        write_le_u32(&mut out, 16, self.sectors_per_cluster)?;
        write_le_u32(&mut out, 20, self.fat_sector_start)?;
        write_le_u32(&mut out, 24, self.root_dir_cluster)?;
        write_le_u32(&mut out, 28, self.data_sector_start)?;
        Ok(out)
    }

    /// Validate the region layout: superblock, then FAT, then data.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        if self.sectors_per_cluster == 0 {
            return Err(ParseError::InvalidField {
                field: "sectors_per_cluster",
                reason: "cannot be zero",
            });
        }
        if self.fat_sector_start == 0 {
            return Err(ParseError::InvalidField {
                field: "fat_sector_start",
                reason: "FAT cannot overlap the superblock",
            });
        }
        if self.data_sector_start <= self.fat_sector_start {
            return Err(ParseError::InvalidField {
                field: "data_sector_start",
                reason: "data section must follow a non-empty FAT",
            });
        }
        if self.data_sector_start >= self.sector_count {
            return Err(ParseError::InvalidField {
                field: "data_sector_start",
                reason: "data section starts past the end of the disk",
            });
        }
        if self.root_dir_cluster >= self.cluster_count() {
            return Err(ParseError::InvalidField {
                field: "root_dir_cluster",
                reason: "root directory cluster outside the data section",
            });
        }
        Ok(())
    }

    /// Cluster size in bytes.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        SECTOR_SIZE * self.sectors_per_cluster as usize
    }

    #[must_use]
    pub fn records_per_cluster(&self) -> usize {
        RECORDS_PER_SECTOR * self.sectors_per_cluster as usize
    }

    #[must_use]
    pub fn fat_sector_count(&self) -> u32 {
        self.data_sector_start.saturating_sub(self.fat_sector_start)
    }

    /// Usable clusters: bounded by both the data section and the FAT size.
    #[must_use]
    pub fn cluster_count(&self) -> u32 {
        if self.sectors_per_cluster == 0 {
            return 0;
        }
        let by_data =
            self.sector_count.saturating_sub(self.data_sector_start) / self.sectors_per_cluster;
        let by_fat = self
            .fat_sector_count()
            .saturating_mul(FAT_ENTRIES_PER_SECTOR as u32);
        by_data.min(by_fat)
    }

    #[must_use]
    pub fn root_cluster(&self) -> ClusterNumber {
        ClusterNumber(self.root_dir_cluster)
    }

    /// First sector of `cluster` in the data section.
    #[must_use]
    pub fn cluster_first_sector(&self, cluster: ClusterNumber) -> SectorNumber {
        SectorNumber(
            u64::from(self.data_sector_start)
                + u64::from(cluster.0) * u64::from(self.sectors_per_cluster),
        )
    }

    #[must_use]
    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Superblock {
        Superblock {
            id: T2FS_ID,
            version: T2FS_VERSION,
            superblock_size: 1,
            disk_size: 1024 * 256,
            sector_count: 1024,
            sectors_per_cluster: 4,
            fat_sector_start: 1,
            root_dir_cluster: 2,
            data_sector_start: 5,
        }
    }

    #[test]
    fn superblock_round_trips_through_sector() {
        let sb = sample();
        let sector = sb.to_sector().unwrap();
        assert_eq!(&sector[0..4], b"T2FS");
        assert_eq!(&sector[4..6], &[0x22, 0x7E]);
        assert_eq!(Superblock::parse_sector(&sector).unwrap(), sb);
    }

    #[test]
    fn wrong_id_is_rejected() {
        let mut sector = sample().to_sector().unwrap();
        sector[0..4].copy_from_slice(b"EXT4");
        assert!(matches!(
            Superblock::parse_sector(&sector),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut sector = sample().to_sector().unwrap();
        sector[4..6].copy_from_slice(&0x7E21_u16.to_le_bytes());
        assert_eq!(
            Superblock::parse_sector(&sector),
            Err(ParseError::InvalidVersion {
                expected: 0x7E22,
                actual: 0x7E21
            })
        );
    }

    #[test]
    fn truncated_sector_is_rejected() {
        let sector = sample().to_sector().unwrap();
        assert!(matches!(
            Superblock::parse_sector(&sector[..20]),
            Err(ParseError::InsufficientData { .. })
        ));
    }

    #[test]
    fn geometry_helpers_follow_layout() {
        let sb = sample();
        sb.validate_geometry().unwrap();
        assert_eq!(sb.cluster_size(), 1024);
        assert_eq!(sb.records_per_cluster(), 16);
        assert_eq!(sb.fat_sector_count(), 4);
        // (1024 - 5) / 4 = 254 data clusters, FAT holds 256 entries.
        assert_eq!(sb.cluster_count(), 254);
        assert_eq!(sb.cluster_first_sector(ClusterNumber(2)), SectorNumber(13));
    }

    #[test]
    fn geometry_validation_rejects_bad_layouts() {
        let mut sb = sample();
        sb.sectors_per_cluster = 0;
        assert!(sb.validate_geometry().is_err());

        let mut sb = sample();
        sb.data_sector_start = sb.fat_sector_start;
        assert!(sb.validate_geometry().is_err());

        let mut sb = sample();
        sb.root_dir_cluster = 10_000;
        assert!(sb.validate_geometry().is_err());

        let mut sb = sample();
        sb.fat_sector_start = 0;
        assert!(sb.validate_geometry().is_err());
    }
}
