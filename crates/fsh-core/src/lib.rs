#![forbid(unsafe_code)]
//! The volume engine.
//!
//! [`Volume`] owns the mounted image, the validated geometry, the current
//! directory, and the open table, and exposes one method per shell command.
//! Every durable change goes through [`fsh_image::Image`] writes; there is
//! no in-memory mirror of the directory tree. Strictly single-threaded and
//! synchronous — no operation suspends and none is cancelled.

mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use fsh_dir::{DirTable, ListMode, path};
use fsh_dir::path::PathResolver;
use fsh_error::{FshError, Result};
use fsh_fat::Fat;
use fsh_file::FileIo;
use fsh_image::Image;
use fsh_ondisk::{
    BootInfo, DOT_NAME, DOTDOT_NAME, DirEntry, display_name, validate_name,
};
use fsh_types::{ATTR_DIRECTORY, BOOT_REGION_SIZE, ClusterNumber, ParseError};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

// ── Open table ──────────────────────────────────────────────────────────────

/// Access mode of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    #[must_use]
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

impl std::str::FromStr for OpenMode {
    type Err = FshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "rw" => Ok(Self::ReadWrite),
            _ => Err(FshError::BadMode),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenFile {
    entry: DirEntry,
    mode: OpenMode,
}

// ── fsinfo summary ──────────────────────────────────────────────────────────

/// Fields reported by the `fsinfo` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsSummary {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub total_sectors: u32,
    pub num_fats: u32,
    pub fat_size_sectors: u32,
    /// `free_count * sectors_per_cluster`.
    pub free_sectors: u32,
}

// ── Volume ──────────────────────────────────────────────────────────────────

/// A mounted FAT32 volume. The image is acquired at mount and released on
/// drop on every exit path, including mount-time failure.
pub struct Volume {
    image: Image,
    boot: BootInfo,
    cwd: ClusterNumber,
    location: String,
    open_table: Vec<OpenFile>,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("image", &self.image)
            .field("boot", &self.boot)
            .field("cwd", &self.cwd)
            .field("location", &self.location)
            .field("open_table", &self.open_table)
            .finish_non_exhaustive()
    }
}

impl Volume {
    /// Mount an image file: open it read-write, validate the boot sector,
    /// and select the root directory.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        let image = Image::open(path)?;
        Self::mount_image(image, Box::new(SystemClock))
    }

    /// Mount an already-opened image with an explicit clock.
    pub fn mount_image(image: Image, clock: Box<dyn Clock>) -> Result<Self> {
        if image.len() < BOOT_REGION_SIZE as u64 {
            return Err(FshError::InvalidImage(ParseError::InsufficientData {
                needed: BOOT_REGION_SIZE,
                offset: 0,
                actual: image.len() as usize,
            }));
        }
        let mut region = [0_u8; BOOT_REGION_SIZE];
        image.read_bytes(0, &mut region)?;
        let boot = BootInfo::parse(&region)?;
        debug!(
            target: "fsh::core",
            event = "volume_mounted",
            bytes_per_sector = boot.bytes_per_sector,
            sectors_per_cluster = boot.sectors_per_cluster,
            total_sectors = boot.total_sectors
        );

        Ok(Self {
            cwd: boot.root_cluster,
            location: "/".to_owned(),
            open_table: Vec::new(),
            clock,
            image,
            boot,
        })
    }

    /// Printable path of the current directory.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn boot(&self) -> &BootInfo {
        &self.boot
    }

    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Boot-sector fields plus the free-sector figure for `fsinfo`.
    pub fn summary(&self) -> Result<FsSummary> {
        let fat = Fat::new(&self.image, &self.boot);
        Ok(FsSummary {
            bytes_per_sector: self.boot.bytes_per_sector,
            sectors_per_cluster: self.boot.sectors_per_cluster,
            total_sectors: self.boot.total_sectors,
            num_fats: self.boot.num_fats,
            fat_size_sectors: self.boot.fat_size,
            free_sectors: fat.free_count()? * self.boot.sectors_per_cluster,
        })
    }

    /// Short names of the live entries in the directory at `target`
    /// (default: the CWD), in physical order.
    pub fn list_dir(&self, target: Option<&str>) -> Result<Vec<String>> {
        let components = path::parse(target.unwrap_or("."));
        let resolver = PathResolver::new(&self.image, &self.boot);
        let dir = resolver.resolve(self.cwd, &components, 0..components.len())?;

        let table = DirTable::new(&self.image, &self.boot);
        table
            .entries(dir, ListMode::Live)
            .map(|entry| entry.map(|e| e.short_name()))
            .collect()
    }

    /// Change the CWD (default: the root) and regenerate the printable
    /// location. The CWD is untouched on failure.
    pub fn change_dir(&mut self, target: Option<&str>) -> Result<()> {
        let components = path::parse(target.unwrap_or("/"));
        let resolver = PathResolver::new(&self.image, &self.boot);
        let dir = resolver.resolve(self.cwd, &components, 0..components.len())?;
        self.cwd = dir;
        self.location = resolver.gen_path(dir)?;
        Ok(())
    }

    /// Allocation size of the named entry: cluster-chain length times
    /// cluster size.
    pub fn entry_size(&self, target: &str) -> Result<u64> {
        let (dir, name) = self.split_target(target)?;
        let table = DirTable::new(&self.image, &self.boot);
        let entry = table.find(dir, &name)?;
        let fat = Fat::new(&self.image, &self.boot);
        let clusters = fat.chain_length(entry.cluster)?;
        Ok(u64::from(clusters) * u64::from(self.boot.cluster_size()))
    }

    /// Create an empty file: attribute 0, cluster 0, size 0.
    pub fn create_file(&mut self, target: &str) -> Result<()> {
        let (dir, name) = self.split_target(target)?;
        let raw = validate_name(&name).map_err(|_| FshError::NameInvalid)?;
        let entry = self.new_entry(dir, raw, 0)?;
        let table = DirTable::new(&self.image, &self.boot);
        table.save(&entry, self.clock.now())
    }

    /// Create a directory: allocate its data cluster and write `.` and `..`
    /// as the first two records.
    pub fn make_dir(&mut self, target: &str) -> Result<()> {
        let (dir, name) = self.split_target(target)?;
        let raw = validate_name(&name).map_err(|_| FshError::NameInvalid)?;
        let mut entry = self.new_entry(dir, raw, ATTR_DIRECTORY)?;

        let fat = Fat::new(&self.image, &self.boot);
        let cluster = fat.allocate(None)?;
        entry.set_cluster(cluster);

        // The cluster is freshly zeroed, so the dot records are its first
        // two slots and everything after them reads as never-used.
        let base = self.boot.cluster_byte_offset(cluster);
        let dot = DirEntry {
            name: DOT_NAME,
            attr: ATTR_DIRECTORY,
            cluster,
            size: 0,
            entry_loc: base,
        };
        let dotdot = DirEntry {
            name: DOTDOT_NAME,
            attr: ATTR_DIRECTORY,
            cluster: if dir == self.boot.root_cluster {
                ClusterNumber(0)
            } else {
                dir
            },
            size: 0,
            entry_loc: base + fsh_types::DIR_ENTRY_SIZE as u64,
        };

        let table = DirTable::new(&self.image, &self.boot);
        let ts = self.clock.now();
        table.save(&dot, ts)?;
        table.save(&dotdot, ts)?;
        table.save(&entry, ts)
    }

    /// Remove a file from the CWD: force-close it, free its chain, and
    /// tombstone its record. Directory entries are skipped; a name matching
    /// only a directory reports `NoSuchPath`. Returns the clusters released.
    pub fn remove_file(&mut self, name: &str) -> Result<u32> {
        self.close_quietly(name);

        let wanted = name.to_ascii_lowercase();
        let table = DirTable::new(&self.image, &self.boot);
        let mut found = None;
        for entry in table.entries(self.cwd, ListMode::Live) {
            let entry = entry?;
            if entry.short_name() == wanted && !entry.is_dir() {
                found = Some(entry);
                break;
            }
        }
        let mut entry = found.ok_or(FshError::NoSuchPath)?;

        let fat = Fat::new(&self.image, &self.boot);
        let released = if entry.cluster.0 != 0 {
            fat.free_chain(entry.cluster)?
        } else {
            0
        };

        entry.mark_deleted();
        table.save(&entry, self.clock.now())?;
        debug!(target: "fsh::core", event = "file_removed", name = %wanted, released = released);
        Ok(released)
    }

    /// Remove an empty directory from the CWD.
    pub fn remove_dir(&mut self, name: &str) -> Result<()> {
        if name.starts_with('.') {
            return Err(FshError::NoSuchPath);
        }
        let table = DirTable::new(&self.image, &self.boot);
        let mut entry = table.find(self.cwd, name)?;
        if !entry.is_dir() {
            return Err(FshError::NotADirectory);
        }

        // Anything beyond the `.` and `..` records blocks the removal.
        let mut live = 0_u32;
        for child in table.entries(entry.cluster, ListMode::Live) {
            child?;
            live += 1;
            if live > 2 {
                return Err(FshError::DirNotEmpty);
            }
        }

        entry.mark_deleted();
        table.save(&entry, self.clock.now())?;

        if entry.cluster.0 != 0 {
            let fat = Fat::new(&self.image, &self.boot);
            fat.free_chain(entry.cluster)?;
        }
        Ok(())
    }

    /// Add a CWD file to the open table.
    pub fn open_file(&mut self, name: &str, mode: OpenMode) -> Result<()> {
        let wanted = name.to_ascii_lowercase();
        if self
            .open_table
            .iter()
            .any(|open| open.entry.short_name() == wanted)
        {
            return Err(FshError::AlreadyOpen);
        }

        let table = DirTable::new(&self.image, &self.boot);
        let entry = table.find(self.cwd, &wanted)?;
        if entry.is_dir() {
            return Err(FshError::IsADirectory);
        }

        self.open_table.push(OpenFile { entry, mode });
        Ok(())
    }

    /// Remove the first matching entry from the open table.
    pub fn close_file(&mut self, name: &str) -> Result<()> {
        let wanted = name.to_ascii_lowercase();
        let index = self
            .open_table
            .iter()
            .position(|open| open.entry.short_name() == wanted)
            .ok_or(FshError::NotOpen)?;
        self.open_table.remove(index);
        Ok(())
    }

    /// Read `len` bytes at `start` from an open file. Requires read access.
    pub fn read_file(&mut self, name: &str, start: u32, len: u32) -> Result<Vec<u8>> {
        let index = self.open_index(name)?;
        if !self.open_table[index].mode.can_read() {
            return Err(FshError::BadMode);
        }

        let io = FileIo::new(&self.image, &self.boot);
        let mut buf = vec![0_u8; len as usize];
        let got = io.read_at(&self.open_table[index].entry, start, &mut buf)?;
        buf.truncate(got as usize);
        Ok(buf)
    }

    /// Write `data` at `start` into an open file. Requires write access.
    /// Returns the byte count written.
    pub fn write_file(&mut self, name: &str, start: u32, data: &[u8]) -> Result<u32> {
        let index = self.open_index(name)?;
        if !self.open_table[index].mode.can_write() {
            return Err(FshError::BadMode);
        }

        let io = FileIo::new(&self.image, &self.boot);
        let mut entry = self.open_table[index].entry;
        let written = io.write_at(&mut entry, start, data, self.clock.now())?;
        self.open_table[index].entry = entry;
        Ok(written)
    }

    /// Reclaim tombstoned entries in the CWD. Returns the new names.
    pub fn undelete(&mut self) -> Result<Vec<String>> {
        fsh_repair::reclaim_deleted(&self.image, &self.boot, self.cwd, self.clock.now())
    }

    // ── helpers ─────────────────────────────────────────────────────────

    /// Resolve everything but the last component of `target` against the
    /// CWD; the last component is the operand name.
    fn split_target(&self, target: &str) -> Result<(ClusterNumber, String)> {
        let components = path::parse(target);
        let Some((name, _)) = components.split_last() else {
            return Err(FshError::NameInvalid);
        };
        let resolver = PathResolver::new(&self.image, &self.boot);
        let dir = resolver.resolve(self.cwd, &components, 0..components.len() - 1)?;
        Ok((dir, name.clone()))
    }

    /// Reject duplicates, then place a fresh record in `dir`'s first vacant
    /// slot. The record is not saved yet.
    fn new_entry(&self, dir: ClusterNumber, raw: [u8; 11], attr: u8) -> Result<DirEntry> {
        let table = DirTable::new(&self.image, &self.boot);
        if table.find(dir, &display_name(&raw)).is_ok() {
            return Err(FshError::AlreadyExists);
        }
        let entry_loc = table.allocate_slot(dir)?;
        Ok(DirEntry {
            name: raw,
            attr,
            cluster: ClusterNumber(0),
            size: 0,
            entry_loc,
        })
    }

    fn open_index(&self, name: &str) -> Result<usize> {
        let wanted = name.to_ascii_lowercase();
        self.open_table
            .iter()
            .position(|open| open.entry.short_name() == wanted)
            .ok_or(FshError::NotOpen)
    }

    fn close_quietly(&mut self, name: &str) {
        let wanted = name.to_ascii_lowercase();
        self.open_table
            .retain(|open| open.entry.short_name() != wanted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsh_harness::ImageBuilder;
    use fsh_ondisk::FatTimestamp;

    fn mounted() -> Volume {
        let image = Image::from_bytes(ImageBuilder::new().data_clusters(64).build());
        let clock = FixedClock(FatTimestamp::from_parts(2024, 5, 17, 10, 30, 0));
        Volume::mount_image(image, Box::new(clock)).expect("mount")
    }

    #[test]
    fn mount_rejects_garbage() {
        let err = Volume::mount_image(
            Image::from_bytes(vec![0_u8; 4096]),
            Box::new(SystemClock),
        )
        .unwrap_err();
        assert!(matches!(err, FshError::InvalidImage(_)));

        let err = Volume::mount_image(Image::from_bytes(vec![0_u8; 64]), Box::new(SystemClock))
            .unwrap_err();
        assert!(matches!(err, FshError::InvalidImage(_)));
    }

    #[test]
    fn mount_selects_root() {
        let volume = mounted();
        assert_eq!(volume.location(), "/");
        assert!(volume.list_dir(None).expect("ls").is_empty());
    }

    #[test]
    fn summary_reports_free_sectors() {
        let volume = mounted();
        let summary = volume.summary().expect("summary");
        assert_eq!(summary.bytes_per_sector, 512);
        assert_eq!(summary.sectors_per_cluster, 1);
        assert_eq!(summary.num_fats, 2);
        assert_eq!(summary.free_sectors, 63);
    }

    #[test]
    fn open_mode_parsing() {
        assert_eq!("r".parse::<OpenMode>().unwrap(), OpenMode::Read);
        assert_eq!("w".parse::<OpenMode>().unwrap(), OpenMode::Write);
        assert_eq!("rw".parse::<OpenMode>().unwrap(), OpenMode::ReadWrite);
        assert!(matches!(
            "wr".parse::<OpenMode>(),
            Err(FshError::BadMode)
        ));
        assert!("".parse::<OpenMode>().is_err());
    }

    #[test]
    fn create_list_and_duplicate() {
        let mut volume = mounted();
        volume.create_file("hello.txt").expect("create");
        assert_eq!(volume.list_dir(None).expect("ls"), ["hello.txt"]);
        assert!(matches!(
            volume.create_file("HELLO.TXT"),
            Err(FshError::AlreadyExists)
        ));
        assert!(matches!(
            volume.create_file("bad name"),
            Err(FshError::NameInvalid)
        ));
    }

    #[test]
    fn mkdir_writes_dot_entries_first() {
        let mut volume = mounted();
        volume.make_dir("foo").expect("mkdir");
        volume.change_dir(Some("foo")).expect("cd");
        assert_eq!(volume.location(), "/foo");
        assert_eq!(volume.list_dir(None).expect("ls"), [".", ".."]);

        // Nested directory records its parent cluster in `..`.
        volume.make_dir("bar").expect("mkdir");
        volume.change_dir(Some("bar")).expect("cd");
        assert_eq!(volume.location(), "/foo/bar");
        volume.change_dir(Some("..")).expect("cd ..");
        assert_eq!(volume.location(), "/foo");
        volume.change_dir(Some("..")).expect("cd ..");
        assert_eq!(volume.location(), "/");
    }

    #[test]
    fn cd_failure_keeps_cwd() {
        let mut volume = mounted();
        volume.make_dir("x").expect("mkdir");
        assert!(matches!(
            volume.change_dir(Some("/x/y/z")),
            Err(FshError::NoSuchPath)
        ));
        assert_eq!(volume.location(), "/");
    }

    #[test]
    fn open_close_and_modes() {
        let mut volume = mounted();
        volume.create_file("f").expect("create");
        volume.make_dir("d").expect("mkdir");

        assert!(matches!(
            volume.open_file("d", OpenMode::Read),
            Err(FshError::IsADirectory)
        ));
        assert!(matches!(
            volume.open_file("nope", OpenMode::Read),
            Err(FshError::NoSuchPath)
        ));

        volume.open_file("f", OpenMode::Read).expect("open");
        assert!(matches!(
            volume.open_file("f", OpenMode::Write),
            Err(FshError::AlreadyOpen)
        ));

        // Read-only file refuses writes and vice versa.
        assert!(matches!(
            volume.write_file("f", 0, b"x"),
            Err(FshError::BadMode)
        ));
        volume.close_file("f").expect("close");
        assert!(matches!(volume.close_file("f"), Err(FshError::NotOpen)));

        volume.open_file("f", OpenMode::Write).expect("reopen");
        assert!(matches!(
            volume.read_file("f", 0, 1),
            Err(FshError::BadMode)
        ));
    }

    #[test]
    fn rm_auto_closes() {
        let mut volume = mounted();
        volume.create_file("f").expect("create");
        volume.open_file("f", OpenMode::ReadWrite).expect("open");
        volume.remove_file("f").expect("rm");
        assert!(matches!(
            volume.read_file("f", 0, 1),
            Err(FshError::NotOpen)
        ));
    }

    #[test]
    fn rm_skips_directories() {
        let mut volume = mounted();
        volume.make_dir("d").expect("mkdir");
        assert!(matches!(volume.remove_file("d"), Err(FshError::NoSuchPath)));
        assert_eq!(volume.list_dir(None).expect("ls"), ["d"]);
    }

    #[test]
    fn rmdir_rules() {
        let mut volume = mounted();
        volume.make_dir("d").expect("mkdir");
        volume.create_file("f").expect("create");

        assert!(matches!(
            volume.remove_dir("f"),
            Err(FshError::NotADirectory)
        ));
        assert!(matches!(
            volume.remove_dir(".."),
            Err(FshError::NoSuchPath)
        ));

        volume.create_file("d/inner").expect("create inner");
        assert!(matches!(volume.remove_dir("d"), Err(FshError::DirNotEmpty)));

        volume.change_dir(Some("d")).expect("cd");
        volume.remove_file("inner").expect("rm inner");
        volume.change_dir(None).expect("cd /");
        volume.remove_dir("d").expect("rmdir");
        assert_eq!(volume.list_dir(None).expect("ls"), ["f"]);
    }

    #[test]
    fn size_bills_whole_clusters() {
        let mut volume = mounted();
        volume.create_file("f").expect("create");
        volume.open_file("f", OpenMode::Write).expect("open");
        volume.write_file("f", 0, b"hello").expect("write");
        assert_eq!(volume.entry_size("f").expect("size"), 512);

        let big = vec![b'A'; 1024];
        volume.write_file("f", 0, &big).expect("write big");
        assert_eq!(volume.entry_size("f").expect("size"), 1024);
    }

    #[test]
    fn write_visible_after_reopen() {
        let mut volume = mounted();
        volume.create_file("hello.txt").expect("create");
        volume.open_file("hello.txt", OpenMode::Write).expect("open w");
        volume.write_file("hello.txt", 0, b"hello").expect("write");
        volume.close_file("hello.txt").expect("close");

        volume.open_file("hello.txt", OpenMode::Read).expect("open r");
        let read = volume.read_file("hello.txt", 0, 5).expect("read");
        assert_eq!(read, b"hello");
        // A read past the recorded size stops at the chain, not at size.
        let long = volume.read_file("hello.txt", 0, 600).expect("long read");
        assert_eq!(long.len(), 512);
    }
}
