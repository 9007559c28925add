#![forbid(unsafe_code)]
//! Cluster-chain primitives over the File Allocation Table.
//!
//! All mutations write both FAT copies and keep the FSInfo free-cluster
//! count and next-free hint current. Chain walks are guarded against
//! cycles: a well-formed chain reaches an end-of-chain marker in at most
//! `end_of_fat_cluster` steps, and exceeding that bound is reported as
//! `CorruptChain` rather than looping.

use fsh_error::{FshError, Result};
use fsh_image::Image;
use fsh_ondisk::BootInfo;
use fsh_types::{
    ClusterNumber, FAT_ENTRY_MASK, FAT_EOC, FSINFO_FREE_COUNT_OFFSET, FSINFO_NEXT_FREE_OFFSET,
    FSINFO_NO_HINT, FIRST_DATA_CLUSTER,
};
use std::collections::HashSet;
use tracing::{debug, trace};

/// FAT accessor bound to an image and its validated geometry.
#[derive(Clone, Copy)]
pub struct Fat<'a> {
    image: &'a Image,
    boot: &'a BootInfo,
}

impl<'a> Fat<'a> {
    #[must_use]
    pub fn new(image: &'a Image, boot: &'a BootInfo) -> Self {
        Self { image, boot }
    }

    /// Masked link value of cluster `n`, read from FAT copy 0.
    pub fn next_of(&self, n: ClusterNumber) -> Result<ClusterNumber> {
        let raw = self.image.read_u32(self.boot.fat_entry_pos(0, n))?;
        Ok(ClusterNumber(raw & FAT_ENTRY_MASK))
    }

    /// Write the low 28 bits of `value` into cluster `n`'s entry in every
    /// FAT copy, preserving the reserved top nibble of each copy.
    pub fn set_next(&self, n: ClusterNumber, value: u32) -> Result<()> {
        for copy in 0..self.boot.num_fats {
            let pos = self.boot.fat_entry_pos(copy, n);
            let current = self.image.read_u32(pos)?;
            let merged = (current & !FAT_ENTRY_MASK) | (value & FAT_ENTRY_MASK);
            self.image.write_u32(pos, merged)?;
        }
        Ok(())
    }

    pub fn free_count(&self) -> Result<u32> {
        self.image
            .read_u32(self.boot.fsinfo_field_pos(FSINFO_FREE_COUNT_OFFSET))
    }

    pub fn set_free_count(&self, value: u32) -> Result<()> {
        self.image
            .write_u32(self.boot.fsinfo_field_pos(FSINFO_FREE_COUNT_OFFSET), value)
    }

    pub fn next_free_hint(&self) -> Result<u32> {
        self.image
            .read_u32(self.boot.fsinfo_field_pos(FSINFO_NEXT_FREE_OFFSET))
    }

    pub fn set_next_free_hint(&self, cluster: ClusterNumber) -> Result<()> {
        self.image
            .write_u32(self.boot.fsinfo_field_pos(FSINFO_NEXT_FREE_OFFSET), cluster.0)
    }

    /// Allocate one cluster: scan upward from the FSInfo hint (cluster 2
    /// when there is no hint), wrapping to cluster 2 for one more pass.
    /// The new cluster is linked after the tail of `append_to` when given,
    /// marked end-of-chain, zero-filled, and recorded as the new hint.
    pub fn allocate(&self, append_to: Option<ClusterNumber>) -> Result<ClusterNumber> {
        let hint = self.next_free_hint()?;
        let start = if hint == FSINFO_NO_HINT || hint < FIRST_DATA_CLUSTER {
            FIRST_DATA_CLUSTER
        } else {
            hint
        };

        let mut found = self.scan_free(start)?;
        if found.is_none() && start > FIRST_DATA_CLUSTER {
            found = self.scan_free(FIRST_DATA_CLUSTER)?;
        }
        let Some(cluster) = found else {
            debug!(target: "fsh::fat", event = "alloc_no_space", start = start);
            return Err(FshError::NoSpace);
        };

        if let Some(chain) = append_to {
            let tail = self.chain_tail(chain)?;
            self.set_next(tail, cluster.0)?;
        }

        self.set_next(cluster, FAT_EOC)?;
        self.set_next_free_hint(cluster)?;
        let free = self.free_count()?;
        self.set_free_count(free.saturating_sub(1))?;
        self.zero_cluster(cluster)?;

        trace!(
            target: "fsh::fat",
            event = "cluster_allocated",
            cluster = cluster.0,
            appended = append_to.is_some()
        );
        Ok(cluster)
    }

    /// First free cluster at or above `start`, up to the end of the FAT.
    fn scan_free(&self, start: u32) -> Result<Option<ClusterNumber>> {
        for n in start..=self.boot.end_of_fat_cluster {
            if self.next_of(ClusterNumber(n))?.is_free_link() {
                return Ok(Some(ClusterNumber(n)));
            }
        }
        Ok(None)
    }

    /// Release every cluster of the chain headed at `head`, returning the
    /// number released. Revisiting a cluster fails with `CorruptChain`.
    pub fn free_chain(&self, head: ClusterNumber) -> Result<u32> {
        let mut visited = HashSet::new();
        let mut cur = head;
        let mut released = 0_u32;

        loop {
            if !visited.insert(cur.0) {
                return Err(FshError::CorruptChain);
            }
            let next = self.next_of(cur)?;
            self.set_next(cur, 0)?;
            let free = self.free_count()?;
            self.set_free_count(free + 1)?;
            released += 1;

            if next.is_end_of_chain() {
                break;
            }
            if next.is_free_link() {
                // A live chain must terminate with an end-of-chain marker,
                // not a free link.
                return Err(FshError::CorruptChain);
            }
            cur = next;
        }

        debug!(target: "fsh::fat", event = "chain_freed", head = head.0, released = released);
        Ok(released)
    }

    /// Number of clusters in the chain headed at `head`, counted as
    /// link-walk steps until the end-of-chain marker.
    pub fn chain_length(&self, head: ClusterNumber) -> Result<u32> {
        let mut cur = head;
        let mut count = 0_u32;
        loop {
            self.guard_steps(count)?;
            let next = self.next_of(cur)?;
            count += 1;
            if next.is_end_of_chain() {
                return Ok(count);
            }
            if next.is_free_link() {
                return Err(FshError::CorruptChain);
            }
            cur = next;
        }
    }

    /// Last cluster of the chain headed at `head`.
    pub fn chain_tail(&self, head: ClusterNumber) -> Result<ClusterNumber> {
        let mut cur = head;
        let mut steps = 0_u32;
        loop {
            self.guard_steps(steps)?;
            let next = self.next_of(cur)?;
            if next.is_end_of_chain() {
                return Ok(cur);
            }
            if next.is_free_link() {
                return Err(FshError::CorruptChain);
            }
            steps += 1;
            cur = next;
        }
    }

    /// Zero-fill the data region of cluster `n`.
    pub fn zero_cluster(&self, n: ClusterNumber) -> Result<()> {
        let zeros = vec![0_u8; self.boot.cluster_size() as usize];
        self.image
            .write_bytes(self.boot.cluster_byte_offset(n), &zeros)
    }

    /// Fail with `CorruptChain` once a walk exceeds the cluster count.
    pub fn guard_steps(&self, steps: u32) -> Result<()> {
        if steps > self.boot.end_of_fat_cluster {
            return Err(FshError::CorruptChain);
        }
        Ok(())
    }
}
