#![forbid(unsafe_code)]
//! Reclamation of tombstoned directory entries.
//!
//! `undelete` does not recover file contents. For each tombstone in a
//! directory it re-homes a plausible cluster chain near the entry's old
//! head, renames the slot to `RECVD_<n>`, and makes it live again. The
//! reclaimed entry is capped at 99 per directory.

use fsh_dir::{DirTable, ListMode};
use fsh_error::Result;
use fsh_fat::Fat;
use fsh_image::Image;
use fsh_ondisk::{BootInfo, FatTimestamp};
use fsh_types::{ClusterNumber, FAT_EOC, SHORT_NAME_LEN};
use tracing::debug;

/// Display-name prefix given to reclaimed entries.
pub const RECOVERED_PREFIX: &str = "recvd_";
/// Per-directory cap on reclaimed entries.
pub const MAX_RECOVERED_PER_DIR: u32 = 99;

/// Reclaim every tombstoned entry of `dir`, best effort. Returns the new
/// display names, in slot order.
pub fn reclaim_deleted(
    image: &Image,
    boot: &BootInfo,
    dir: ClusterNumber,
    ts: FatTimestamp,
) -> Result<Vec<String>> {
    let table = DirTable::new(image, boot);
    let fat = Fat::new(image, boot);
    let stride = boot.cluster_size();

    let mut count = 0_u32;
    for entry in table.entries(dir, ListMode::Live) {
        if entry?.short_name().starts_with(RECOVERED_PREFIX) {
            count += 1;
        }
    }

    let mut recovered = Vec::new();
    for slot in table.entries(dir, ListMode::Vacant) {
        let mut entry = slot?;
        if !entry.is_deleted() {
            continue;
        }
        if count >= MAX_RECOVERED_PER_DIR {
            break;
        }

        // A directory gets one cluster; a file gets enough for its recorded
        // size. The slot still carries its pre-deletion head cluster.
        let required = if entry.is_dir() {
            1
        } else {
            entry.size.div_ceil(stride)
        };

        if required == 0 || entry.cluster.0 == 0 {
            // Nothing to re-home; the reclaimed entry becomes an empty file.
            entry.set_cluster(ClusterNumber(0));
        } else {
            let Some(cells) = collect_free_run(fat, boot, entry.cluster, required)? else {
                // The scan ran off the FAT; leave this tombstone alone.
                continue;
            };
            for pair in cells.windows(2) {
                fat.set_next(pair[0], pair[1].0)?;
            }
            let last = cells[cells.len() - 1];
            fat.set_next(last, FAT_EOC)?;
            let free = fat.free_count()?;
            fat.set_free_count(free.saturating_sub(required))?;
            entry.set_cluster(cells[0]);
        }

        count += 1;
        entry.name = recovered_name(count);
        table.save(&entry, ts)?;
        debug!(
            target: "fsh::repair",
            event = "entry_reclaimed",
            dir = dir.0,
            name = %entry.short_name(),
            clusters = required
        );
        recovered.push(entry.short_name());
    }

    Ok(recovered)
}

/// Collect `count` free FAT cells scanning upward from `from`. Returns
/// `None` when the scan passes the end of the FAT; no cell is written.
fn collect_free_run(
    fat: Fat<'_>,
    boot: &BootInfo,
    from: ClusterNumber,
    count: u32,
) -> Result<Option<Vec<ClusterNumber>>> {
    let mut cells = Vec::with_capacity(count as usize);
    let mut candidate = from.0;

    while cells.len() < count as usize {
        if candidate > boot.end_of_fat_cluster {
            return Ok(None);
        }
        if fat.next_of(ClusterNumber(candidate))?.is_free_link() {
            cells.push(ClusterNumber(candidate));
        }
        candidate += 1;
    }
    Ok(Some(cells))
}

/// Raw 11-byte name `RECVD_<n>`, space-padded.
fn recovered_name(n: u32) -> [u8; SHORT_NAME_LEN] {
    let mut name = [b' '; SHORT_NAME_LEN];
    let text = format!("RECVD_{n}");
    name[..text.len()].copy_from_slice(text.as_bytes());
    name
}
