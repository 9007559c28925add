#![forbid(unsafe_code)]
//! Directory-table operations.
//!
//! Enumerates the 32-byte records of a directory cluster chain as a lazy
//! sequence, looks up entries by display name, allocates record slots
//! (extending the chain when every slot is taken), and saves records back.
//! Path handling lives in [`path`].

pub mod path;

use fsh_error::{FshError, Result};
use fsh_fat::Fat;
use fsh_image::Image;
use fsh_ondisk::{BootInfo, DirEntry, FatTimestamp, Record, decode_record};
use fsh_types::{ClusterNumber, DIR_ENTRY_SIZE};
use tracing::trace;

/// Which record slots an enumeration yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Records whose first name byte marks a live entry.
    Live,
    /// Reusable slots: never-used records and tombstones.
    Vacant,
}

/// Directory-table accessor bound to an image and its geometry.
#[derive(Clone, Copy)]
pub struct DirTable<'a> {
    image: &'a Image,
    boot: &'a BootInfo,
}

impl<'a> DirTable<'a> {
    #[must_use]
    pub fn new(image: &'a Image, boot: &'a BootInfo) -> Self {
        Self { image, boot }
    }

    /// Lazily enumerate the records of `dir`'s cluster chain in physical
    /// order. Long-name records are skipped; the scan exhausts every
    /// cluster of the chain (deletion produces tombstones mid-cluster, so
    /// no trailing-zero early exit is assumed).
    #[must_use]
    pub fn entries(&self, dir: ClusterNumber, mode: ListMode) -> EntryIter<'a> {
        EntryIter {
            image: self.image,
            boot: self.boot,
            mode,
            cluster: if dir.is_data_cluster() { Some(dir) } else { None },
            record: 0,
            steps: 0,
            failed: false,
        }
    }

    /// First live entry whose display name equals `name` (ASCII
    /// case-insensitive).
    pub fn find(&self, dir: ClusterNumber, name: &str) -> Result<DirEntry> {
        let wanted = name.to_ascii_lowercase();
        for entry in self.entries(dir, ListMode::Live) {
            let entry = entry?;
            if entry.short_name() == wanted {
                return Ok(entry);
            }
        }
        Err(FshError::NoSuchPath)
    }

    /// Byte offset of the first vacant record slot in `dir`, extending the
    /// chain by one zeroed cluster when every slot is live.
    pub fn allocate_slot(&self, dir: ClusterNumber) -> Result<u64> {
        for entry in self.entries(dir, ListMode::Vacant) {
            return Ok(entry?.entry_loc);
        }

        let fat = Fat::new(self.image, self.boot);
        let extension = fat.allocate(Some(dir))?;
        trace!(
            target: "fsh::dir",
            event = "dir_extended",
            dir = dir.0,
            cluster = extension.0
        );
        Ok(self.boot.cluster_byte_offset(extension))
    }

    /// Encode `entry` with a fresh write timestamp and store it at its slot.
    pub fn save(&self, entry: &DirEntry, ts: FatTimestamp) -> Result<()> {
        self.image.write_bytes(entry.entry_loc, &entry.encode(ts))
    }
}

/// Lazy record sequence over a directory cluster chain. Finite and
/// non-restartable; the caller decides when to collect.
pub struct EntryIter<'a> {
    image: &'a Image,
    boot: &'a BootInfo,
    mode: ListMode,
    cluster: Option<ClusterNumber>,
    record: u32,
    steps: u32,
    failed: bool,
}

impl EntryIter<'_> {
    fn next_record(&mut self) -> Result<Option<DirEntry>> {
        loop {
            let Some(cluster) = self.cluster else {
                return Ok(None);
            };

            if self.record == self.boot.entries_per_cluster() {
                let fat = Fat::new(self.image, self.boot);
                fat.guard_steps(self.steps)?;
                self.steps += 1;
                self.record = 0;
                let next = fat.next_of(cluster)?;
                self.cluster = if next.is_end_of_chain() {
                    None
                } else if next.is_data_cluster() {
                    Some(next)
                } else {
                    return Err(FshError::CorruptChain);
                };
                continue;
            }

            let pos = self.boot.cluster_byte_offset(cluster)
                + u64::from(self.record) * DIR_ENTRY_SIZE as u64;
            self.record += 1;

            let mut raw = [0_u8; DIR_ENTRY_SIZE];
            self.image.read_bytes(pos, &mut raw)?;
            let Record::Slot(entry) = decode_record(&raw, pos) else {
                continue;
            };

            let wanted = match self.mode {
                ListMode::Live => entry.is_live(),
                ListMode::Vacant => entry.is_vacant(),
            };
            if wanted {
                return Ok(Some(entry));
            }
        }
    }
}

impl Iterator for EntryIter<'_> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
