//! Boot sector parsing and derived geometry.

use fsh_types::{
    BOOT_REGION_SIZE, BOOT_SIGNATURE, BOOT_SIGNATURE_OFFSET, ClusterNumber, FAT_ENTRY_WIDTH,
    ParseError, SectorNumber, read_le_u16, read_le_u32,
};
use serde::{Deserialize, Serialize};

/// Parsed boot-sector parameters plus derived offsets. Immutable after
/// validation; every cluster/FAT locator in the engine goes through the
/// helpers here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub num_fats: u32,
    /// FAT size in sectors (the 32-bit field; the 16-bit field must be zero).
    pub fat_size: u32,
    pub total_sectors: u32,
    pub root_cluster: ClusterNumber,
    pub fsinfo_sector: u32,
    /// `reserved + num_fats * fat_size` — the FAT32 root directory region is
    /// empty, so no root-entry sectors contribute.
    pub first_data_sector: u32,
    /// Highest cluster number addressing the data region.
    pub end_of_fat_cluster: u32,
}

impl BootInfo {
    /// Parse and validate the first sector of an image.
    ///
    /// Checks every mount invariant: signature bytes, sector and cluster
    /// sizes, the FAT32-only fields (`root_ent_cnt == 0`, 16-bit FAT size
    /// zero, 32-bit FAT size non-zero), and a non-degenerate sector count.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < BOOT_REGION_SIZE {
            return Err(ParseError::InsufficientData {
                needed: BOOT_REGION_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let signature = read_le_u16(region, BOOT_SIGNATURE_OFFSET)?;
        let expected = u16::from_le_bytes(BOOT_SIGNATURE);
        if signature != expected {
            return Err(ParseError::InvalidSignature {
                expected,
                actual: signature,
            });
        }

        let bytes_per_sector = u32::from(read_le_u16(region, 11)?);
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(ParseError::InvalidField {
                field: "bytes_per_sector",
                reason: "must be 512, 1024, 2048, or 4096",
            });
        }

        let sectors_per_cluster = u32::from(region[13]);
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(ParseError::InvalidField {
                field: "sectors_per_cluster",
                reason: "must be a power of two in 1..=128",
            });
        }

        let root_ent_cnt = read_le_u16(region, 17)?;
        if root_ent_cnt != 0 {
            return Err(ParseError::InvalidField {
                field: "root_ent_cnt",
                reason: "must be zero on FAT32",
            });
        }

        let fat_size_16 = read_le_u16(region, 22)?;
        if fat_size_16 != 0 {
            return Err(ParseError::InvalidField {
                field: "fat_size_16",
                reason: "must be zero on FAT32",
            });
        }

        let fat_size = read_le_u32(region, 36)?;
        if fat_size == 0 {
            return Err(ParseError::InvalidField {
                field: "fat_size_32",
                reason: "cannot be zero",
            });
        }

        let total_sectors = read_le_u32(region, 32)?;
        if total_sectors == 0 {
            return Err(ParseError::InvalidField {
                field: "total_sectors",
                reason: "cannot be zero",
            });
        }

        let reserved_sectors = u32::from(read_le_u16(region, 14)?);
        let num_fats = u32::from(region[16]);
        if num_fats == 0 {
            return Err(ParseError::InvalidField {
                field: "num_fats",
                reason: "cannot be zero",
            });
        }

        let root_cluster = ClusterNumber(read_le_u32(region, 44)?);
        let fsinfo_sector = u32::from(read_le_u16(region, 48)?);

        // root_dir_sectors is zero on FAT32 (root_ent_cnt == 0 above), so the
        // data region begins right after the reserved sectors and the FATs.
        let first_data_sector = num_fats
            .checked_mul(fat_size)
            .and_then(|fats| fats.checked_add(reserved_sectors))
            .ok_or(ParseError::InvalidField {
                field: "first_data_sector",
                reason: "overflow",
            })?;

        if total_sectors <= first_data_sector {
            return Err(ParseError::InvalidField {
                field: "total_sectors",
                reason: "image has no data region",
            });
        }

        let end_of_fat_cluster = (total_sectors - first_data_sector) / sectors_per_cluster + 1;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            fat_size,
            total_sectors,
            root_cluster,
            fsinfo_sector,
            first_data_sector,
            end_of_fat_cluster,
        })
    }

    /// First sector of the data region of cluster `n`.
    #[must_use]
    pub fn first_sector_of_cluster(&self, n: ClusterNumber) -> SectorNumber {
        SectorNumber((n.0 - 2) * self.sectors_per_cluster + self.first_data_sector)
    }

    /// Absolute byte offset of the first data byte of cluster `n`.
    #[must_use]
    pub fn cluster_byte_offset(&self, n: ClusterNumber) -> u64 {
        u64::from(self.first_sector_of_cluster(n).0) * u64::from(self.bytes_per_sector)
    }

    /// Sector (within FAT copy 0) holding the FAT entry of cluster `n`.
    #[must_use]
    pub fn fat_sector_of(&self, n: ClusterNumber) -> SectorNumber {
        SectorNumber(self.reserved_sectors + (n.0 * FAT_ENTRY_WIDTH) / self.bytes_per_sector)
    }

    /// Byte offset of cluster `n`'s FAT entry within its FAT sector.
    #[must_use]
    pub fn fat_offset_of(&self, n: ClusterNumber) -> u32 {
        (n.0 * FAT_ENTRY_WIDTH) % self.bytes_per_sector
    }

    /// Absolute byte position of cluster `n`'s entry in FAT copy `copy`.
    #[must_use]
    pub fn fat_entry_pos(&self, copy: u32, n: ClusterNumber) -> u64 {
        let sector = u64::from(self.fat_sector_of(n).0) + u64::from(copy) * u64::from(self.fat_size);
        sector * u64::from(self.bytes_per_sector) + u64::from(self.fat_offset_of(n))
    }

    /// Bytes per cluster.
    #[must_use]
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Directory records per cluster.
    #[must_use]
    pub fn entries_per_cluster(&self) -> u32 {
        self.cluster_size() / fsh_types::DIR_ENTRY_SIZE as u32
    }

    /// Absolute byte position of an FSInfo field given its in-sector offset.
    #[must_use]
    pub fn fsinfo_field_pos(&self, field_offset: u64) -> u64 {
        u64::from(self.fsinfo_sector) * u64::from(self.bytes_per_sector) + field_offset
    }

    #[must_use]
    pub fn end_of_fat(&self) -> ClusterNumber {
        ClusterNumber(self.end_of_fat_cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsh_types::write_le_u16 as w16;
    use fsh_types::write_le_u32 as w32;

    fn boot_region() -> Vec<u8> {
        let mut region = vec![0_u8; BOOT_REGION_SIZE];
        w16(&mut region, 11, 512).unwrap(); // bytes per sector
        region[13] = 1; // sectors per cluster
        w16(&mut region, 14, 2).unwrap(); // reserved sectors
        region[16] = 2; // number of FATs
        w16(&mut region, 17, 0).unwrap(); // root entry count
        w16(&mut region, 22, 0).unwrap(); // 16-bit FAT size
        w32(&mut region, 32, 1024).unwrap(); // total sectors
        w32(&mut region, 36, 8).unwrap(); // 32-bit FAT size
        w32(&mut region, 44, 2).unwrap(); // root cluster
        w16(&mut region, 48, 1).unwrap(); // FSInfo sector
        region[510] = 0x55;
        region[511] = 0xAA;
        region
    }

    #[test]
    fn parses_valid_boot_sector() {
        let info = BootInfo::parse(&boot_region()).expect("parse");
        assert_eq!(info.bytes_per_sector, 512);
        assert_eq!(info.sectors_per_cluster, 1);
        assert_eq!(info.num_fats, 2);
        assert_eq!(info.root_cluster, ClusterNumber(2));
        assert_eq!(info.first_data_sector, 2 + 2 * 8);
        assert_eq!(info.end_of_fat_cluster, (1024 - 18) / 1 + 1);
    }

    #[test]
    fn derived_locators() {
        let info = BootInfo::parse(&boot_region()).expect("parse");
        assert_eq!(info.first_sector_of_cluster(ClusterNumber(2)).0, 18);
        assert_eq!(info.cluster_byte_offset(ClusterNumber(2)), 18 * 512);
        assert_eq!(info.fat_sector_of(ClusterNumber(2)).0, 2);
        assert_eq!(info.fat_offset_of(ClusterNumber(2)), 8);
        assert_eq!(info.fat_entry_pos(0, ClusterNumber(2)), 2 * 512 + 8);
        assert_eq!(info.fat_entry_pos(1, ClusterNumber(2)), (2 + 8) * 512 + 8);
        // An entry far enough in to land on the next FAT sector.
        assert_eq!(info.fat_sector_of(ClusterNumber(130)).0, 3);
        assert_eq!(info.fat_offset_of(ClusterNumber(130)), 8);
        assert_eq!(info.cluster_size(), 512);
        assert_eq!(info.entries_per_cluster(), 16);
        assert_eq!(info.fsinfo_field_pos(488), 512 + 488);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut region = boot_region();
        region[511] = 0xAB;
        assert!(matches!(
            BootInfo::parse(&region),
            Err(ParseError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn rejects_bad_geometry() {
        for (offset, value) in [(11_usize, 513_u16), (17, 1), (22, 4)] {
            let mut region = boot_region();
            w16(&mut region, offset, value).unwrap();
            assert!(BootInfo::parse(&region).is_err(), "offset {offset}");
        }

        let mut region = boot_region();
        region[13] = 3; // not a power of two
        assert!(BootInfo::parse(&region).is_err());

        let mut region = boot_region();
        w32(&mut region, 36, 0).unwrap(); // zero FAT size
        assert!(BootInfo::parse(&region).is_err());

        let mut region = boot_region();
        w32(&mut region, 32, 0).unwrap(); // zero total sectors
        assert!(BootInfo::parse(&region).is_err());

        let mut region = boot_region();
        w32(&mut region, 32, 10).unwrap(); // smaller than the metadata region
        assert!(BootInfo::parse(&region).is_err());
    }

    #[test]
    fn accepts_eight_sectors_per_cluster() {
        let mut region = boot_region();
        region[13] = 8;
        let info = BootInfo::parse(&region).expect("parse");
        assert_eq!(info.sectors_per_cluster, 8);
    }

    #[test]
    fn rejects_short_region() {
        assert!(matches!(
            BootInfo::parse(&[0_u8; 100]),
            Err(ParseError::InsufficientData { .. })
        ));
    }
}
