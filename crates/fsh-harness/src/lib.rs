#![forbid(unsafe_code)]
//! Test support for the FAT32 shell workspace.
//!
//! [`ImageBuilder`] synthesises a minimal valid FAT32 image: boot sector,
//! FSInfo, mirrored FATs with the root chain terminated, and a zeroed data
//! region. The invariant checkers re-derive everything from raw bytes on
//! purpose — they must not trust the FAT and directory code they are used
//! to verify.

use anyhow::{Context, Result, bail};
use fsh_image::Image;
use fsh_ondisk::BootInfo;
use fsh_types::{
    ATTR_LONG_NAME, BOOT_REGION_SIZE, ClusterNumber, DIR_ENTRY_SIZE, ENTRY_DELETED,
    ENTRY_NEVER_USED, FAT_ENTRY_MASK, FAT_EOC, FAT_EOC_MIN, FSINFO_FREE_COUNT_OFFSET,
    FSINFO_NEXT_FREE_OFFSET, write_le_u16, write_le_u32,
};
use std::collections::HashSet;

// ── Image builder ───────────────────────────────────────────────────────────

/// Builder for a freshly formatted FAT32 image.
///
/// Defaults: 512-byte sectors, 1 sector per cluster, 2 reserved sectors
/// (boot + FSInfo), 2 FATs, 64 data clusters. The root directory occupies
/// cluster 2; the free count and the next-free hint are seeded accordingly.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    num_fats: u32,
    data_clusters: u32,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 2,
            num_fats: 2,
            data_clusters: 64,
        }
    }
}

impl ImageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bytes_per_sector(mut self, value: u32) -> Self {
        self.bytes_per_sector = value;
        self
    }

    #[must_use]
    pub fn sectors_per_cluster(mut self, value: u32) -> Self {
        self.sectors_per_cluster = value;
        self
    }

    #[must_use]
    pub fn data_clusters(mut self, value: u32) -> Self {
        self.data_clusters = value;
        self
    }

    /// Size in sectors of one FAT copy for the configured geometry.
    #[must_use]
    pub fn fat_size(&self) -> u32 {
        ((self.data_clusters + 2) * 4).div_ceil(self.bytes_per_sector)
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let fat_size = self.fat_size();
        let total_sectors = self.reserved_sectors
            + self.num_fats * fat_size
            + self.data_clusters * self.sectors_per_cluster;
        let mut bytes = vec![0_u8; (total_sectors * self.bytes_per_sector) as usize];

        // Boot sector.
        write_le_u16(&mut bytes, 11, self.bytes_per_sector as u16).unwrap();
        bytes[13] = self.sectors_per_cluster as u8;
        write_le_u16(&mut bytes, 14, self.reserved_sectors as u16).unwrap();
        bytes[16] = self.num_fats as u8;
        write_le_u32(&mut bytes, 32, total_sectors).unwrap();
        write_le_u32(&mut bytes, 36, fat_size).unwrap();
        write_le_u32(&mut bytes, 44, 2).unwrap(); // root cluster
        write_le_u16(&mut bytes, 48, 1).unwrap(); // FSInfo sector
        bytes[510] = 0x55;
        bytes[511] = 0xAA;

        // FSInfo: the root directory consumes one cluster.
        let fsinfo = self.bytes_per_sector as usize;
        write_le_u32(
            &mut bytes,
            fsinfo + FSINFO_FREE_COUNT_OFFSET as usize,
            self.data_clusters - 1,
        )
        .unwrap();
        write_le_u32(&mut bytes, fsinfo + FSINFO_NEXT_FREE_OFFSET as usize, 3).unwrap();

        // FAT copies: media entry, reserved entry, root chain terminator.
        for copy in 0..self.num_fats {
            let base =
                ((self.reserved_sectors + copy * fat_size) * self.bytes_per_sector) as usize;
            write_le_u32(&mut bytes, base, 0x0FFF_FFF8).unwrap();
            write_le_u32(&mut bytes, base + 4, FAT_EOC).unwrap();
            write_le_u32(&mut bytes, base + 8, FAT_EOC).unwrap();
        }

        bytes
    }
}

// ── Invariant checkers ──────────────────────────────────────────────────────

/// Parse and validate the boot region of an image.
pub fn parse_boot(image: &Image) -> Result<BootInfo> {
    let mut region = vec![0_u8; BOOT_REGION_SIZE];
    image
        .read_bytes(0, &mut region)
        .context("reading boot region")?;
    BootInfo::parse(&region).context("parsing boot sector")
}

fn raw_fat_entry(image: &Image, boot: &BootInfo, copy: u32, n: u32) -> Result<u32> {
    Ok(image.read_u32(boot.fat_entry_pos(copy, ClusterNumber(n)))?)
}

/// Every FAT copy must hold the same masked link value for every cluster.
pub fn check_fat_mirroring(image: &Image, boot: &BootInfo) -> Result<()> {
    for n in 2..=boot.end_of_fat_cluster {
        let reference = raw_fat_entry(image, boot, 0, n)? & FAT_ENTRY_MASK;
        for copy in 1..boot.num_fats {
            let other = raw_fat_entry(image, boot, copy, n)? & FAT_ENTRY_MASK;
            if other != reference {
                bail!("FAT copy {copy} diverges at cluster {n}: {reference:#x} vs {other:#x}");
            }
        }
    }
    Ok(())
}

/// FSInfo's free count must equal the number of zero FAT entries in
/// clusters [2, end_of_fat].
pub fn check_free_count(image: &Image, boot: &BootInfo) -> Result<()> {
    let mut zeros = 0_u32;
    for n in 2..=boot.end_of_fat_cluster {
        if raw_fat_entry(image, boot, 0, n)? & FAT_ENTRY_MASK == 0 {
            zeros += 1;
        }
    }
    let recorded = image.read_u32(boot.fsinfo_field_pos(FSINFO_FREE_COUNT_OFFSET))?;
    if recorded != zeros {
        bail!("FSInfo free count {recorded} != {zeros} zero FAT entries");
    }
    Ok(())
}

/// Raw live entries (name, attr, cluster) of one directory cluster chain.
fn raw_live_entries(
    image: &Image,
    boot: &BootInfo,
    dir: u32,
) -> Result<Vec<([u8; 11], u8, u32)>> {
    let mut out = Vec::new();
    let mut cluster = dir;
    let mut steps = 0_u32;

    loop {
        if steps > boot.end_of_fat_cluster {
            bail!("directory chain starting at {dir} does not terminate");
        }
        steps += 1;

        let base = boot.cluster_byte_offset(ClusterNumber(cluster));
        for i in 0..boot.entries_per_cluster() {
            let mut raw = [0_u8; DIR_ENTRY_SIZE];
            image.read_bytes(base + u64::from(i) * DIR_ENTRY_SIZE as u64, &mut raw)?;
            let attr = raw[11];
            if attr & ATTR_LONG_NAME == ATTR_LONG_NAME {
                continue;
            }
            if raw[0] == ENTRY_NEVER_USED || raw[0] == ENTRY_DELETED {
                continue;
            }
            let mut name = [0_u8; 11];
            name.copy_from_slice(&raw[..11]);
            let hi = u32::from(u16::from_le_bytes([raw[20], raw[21]]));
            let lo = u32::from(u16::from_le_bytes([raw[26], raw[27]]));
            out.push((name, attr, hi << 16 | lo));
        }

        let next = raw_fat_entry(image, boot, 0, cluster)? & FAT_ENTRY_MASK;
        if next >= FAT_EOC_MIN {
            return Ok(out);
        }
        cluster = next;
    }
}

/// Every live entry reachable from the root must head an acyclic chain that
/// terminates within the cluster count.
pub fn check_chains_acyclic(image: &Image, boot: &BootInfo) -> Result<()> {
    let mut pending = vec![boot.root_cluster.0];
    let mut seen_dirs = HashSet::new();

    while let Some(dir) = pending.pop() {
        if !seen_dirs.insert(dir) {
            continue;
        }
        for (name, attr, cluster) in raw_live_entries(image, boot, dir)? {
            if name.starts_with(b".") {
                continue;
            }
            if cluster == 0 {
                continue;
            }

            let mut cur = cluster;
            let mut steps = 0_u32;
            loop {
                if steps > boot.end_of_fat_cluster {
                    bail!("chain of entry {name:?} in directory {dir} does not terminate");
                }
                steps += 1;
                let next = raw_fat_entry(image, boot, 0, cur)? & FAT_ENTRY_MASK;
                if next >= FAT_EOC_MIN {
                    break;
                }
                if next == 0 {
                    bail!("chain of entry {name:?} in directory {dir} links a free cluster");
                }
                cur = next;
            }

            if attr & fsh_types::ATTR_DIRECTORY != 0 {
                pending.push(cluster);
            }
        }
    }
    Ok(())
}

/// Run every quantified invariant check.
pub fn verify_invariants(image: &Image, boot: &BootInfo) -> Result<()> {
    check_fat_mirroring(image, boot)?;
    check_free_count(image, boot)?;
    check_chains_acyclic(image, boot)?;
    Ok(())
}
