//! Path parsing, resolution, and synthesis.
//!
//! A path is lower-cased and split on `/`. A leading slash produces the
//! synthetic first component `"/"` meaning "restart at the root"; empty
//! components and trailing slashes are discarded. Resolution walks
//! directory clusters from the CWD; synthesis walks `..` links back up to
//! the root.

use crate::{DirTable, ListMode};
use fsh_error::{FshError, Result};
use fsh_image::Image;
use fsh_ondisk::BootInfo;
use fsh_types::ClusterNumber;
use std::ops::Range;

/// Split a path string into ordered components.
#[must_use]
pub fn parse(path: &str) -> Vec<String> {
    let lowered = path.to_ascii_lowercase();
    let mut components = Vec::new();
    if lowered.starts_with('/') {
        components.push("/".to_owned());
    }
    components.extend(
        lowered
            .split('/')
            .filter(|part| !part.is_empty())
            .map(str::to_owned),
    );
    components
}

/// Resolver bound to an image and its geometry.
#[derive(Clone, Copy)]
pub struct PathResolver<'a> {
    image: &'a Image,
    boot: &'a BootInfo,
}

impl<'a> PathResolver<'a> {
    #[must_use]
    pub fn new(image: &'a Image, boot: &'a BootInfo) -> Self {
        Self { image, boot }
    }

    fn table(&self) -> DirTable<'a> {
        DirTable::new(self.image, self.boot)
    }

    /// Walk `components[range]` starting at `cwd` and return the final
    /// directory cluster. `"/"` restarts at the root (only meaningful at
    /// index 0), `.` is a no-op, `..` follows the parent link (a recorded
    /// cluster of 0 means the parent is the root), and anything else must
    /// match a live directory entry. A missing component or a
    /// non-directory match fails with `NoSuchPath`.
    pub fn resolve(
        &self,
        cwd: ClusterNumber,
        components: &[String],
        range: Range<usize>,
    ) -> Result<ClusterNumber> {
        let table = self.table();
        let mut cursor = cwd;

        for index in range {
            let component = components
                .get(index)
                .ok_or(FshError::NoSuchPath)?
                .as_str();

            if component == "/" && index == 0 {
                cursor = self.boot.root_cluster;
                continue;
            }
            if component == "." || (component == ".." && cursor == self.boot.root_cluster) {
                // The root carries no dot entries; `.` anywhere and `..` at
                // the root leave the cursor in place.
                continue;
            }

            let entry = table.find(cursor, component)?;
            if !entry.is_dir() {
                return Err(FshError::NoSuchPath);
            }
            cursor = if component == ".." && entry.cluster.0 == 0 {
                self.boot.root_cluster
            } else {
                entry.cluster
            };
        }

        Ok(cursor)
    }

    /// Synthesise the absolute path of a directory cluster by walking the
    /// `..` links upward, collecting at each parent the name of the child
    /// just left.
    pub fn gen_path(&self, cluster: ClusterNumber) -> Result<String> {
        let table = self.table();
        let mut parts: Vec<String> = Vec::new();
        let mut child = cluster;
        let mut depth = 0_u32;

        while child != self.boot.root_cluster {
            if depth > self.boot.end_of_fat_cluster {
                return Err(FshError::CorruptChain);
            }
            depth += 1;

            let dotdot = table.find(child, "..")?;
            let parent = if dotdot.cluster.0 == 0 {
                self.boot.root_cluster
            } else {
                dotdot.cluster
            };

            let mut name = None;
            for entry in table.entries(parent, ListMode::Live) {
                let entry = entry?;
                let display = entry.short_name();
                if entry.is_dir() && entry.cluster == child && display != "." && display != ".." {
                    name = Some(display);
                    break;
                }
            }
            parts.push(name.ok_or(FshError::NoSuchPath)?);
            child = parent;
        }

        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }
}
