#![forbid(unsafe_code)]
//! Byte-level access to a FAT32 image.
//!
//! The image is an ordered byte sequence whose length is fixed at mount.
//! Every accessor takes an absolute byte offset, verifies
//! `pos + width <= len`, and reads or writes little-endian values in place.
//! There is no caching layer between the accessors and the backing store, so
//! a read always observes every prior write.

use fsh_error::{FshError, Result};
use std::cell::RefCell;
use std::fs::OpenOptions;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::trace;

#[derive(Debug)]
enum Backing {
    /// Positioned pread/pwrite against the image file; no seek state.
    File(File),
    /// In-memory image, used by tests and tooling.
    Memory(RefCell<Vec<u8>>),
}

/// A mounted image. The file handle is held for the lifetime of the value
/// and released on drop on every exit path.
#[derive(Debug)]
pub struct Image {
    backing: Backing,
    len: u64,
}

impl Image {
    /// Open an image file read-write. The length is captured once; the file
    /// is never grown or truncated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        trace!(target: "fsh::image", event = "image_open", len = len);
        Ok(Self {
            backing: Backing::File(file),
            len,
        })
    }

    /// Wrap an in-memory byte buffer as an image.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            backing: Backing::Memory(RefCell::new(bytes)),
            len,
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Recover the underlying buffer of a memory-backed image.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self.backing {
            Backing::File(_) => None,
            Backing::Memory(bytes) => Some(bytes.into_inner()),
        }
    }

    fn check(&self, pos: u64, len: u64) -> Result<()> {
        let end = pos.checked_add(len).ok_or(FshError::ImageBounds {
            pos,
            len,
            image_len: self.len,
        })?;
        if end > self.len {
            return Err(FshError::ImageBounds {
                pos,
                len,
                image_len: self.len,
            });
        }
        Ok(())
    }

    pub fn read_bytes(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.check(pos, buf.len() as u64)?;
        match &self.backing {
            Backing::File(file) => file.read_exact_at(buf, pos)?,
            Backing::Memory(bytes) => {
                let bytes = bytes.borrow();
                let start = pos as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
            }
        }
        Ok(())
    }

    pub fn write_bytes(&self, pos: u64, data: &[u8]) -> Result<()> {
        self.check(pos, data.len() as u64)?;
        match &self.backing {
            Backing::File(file) => file.write_all_at(data, pos)?,
            Backing::Memory(bytes) => {
                let mut bytes = bytes.borrow_mut();
                let start = pos as usize;
                bytes[start..start + data.len()].copy_from_slice(data);
            }
        }
        Ok(())
    }

    pub fn read_u8(&self, pos: u64) -> Result<u8> {
        let mut buf = [0_u8; 1];
        self.read_bytes(pos, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&self, pos: u64) -> Result<u16> {
        let mut buf = [0_u8; 2];
        self.read_bytes(pos, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&self, pos: u64) -> Result<u32> {
        let mut buf = [0_u8; 4];
        self.read_bytes(pos, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_u8(&self, pos: u64, value: u8) -> Result<()> {
        self.write_bytes(pos, &[value])
    }

    pub fn write_u16(&self, pos: u64, value: u16) -> Result<()> {
        self.write_bytes(pos, &value.to_le_bytes())
    }

    pub fn write_u32(&self, pos: u64, value: u32) -> Result<()> {
        self.write_bytes(pos, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_round_trip() {
        let img = Image::from_bytes(vec![0_u8; 64]);
        img.write_u32(0, 0xDEAD_BEEF).expect("write u32");
        img.write_u16(4, 0x1234).expect("write u16");
        img.write_u8(6, 0xAB).expect("write u8");
        assert_eq!(img.read_u32(0).expect("read u32"), 0xDEAD_BEEF);
        assert_eq!(img.read_u16(4).expect("read u16"), 0x1234);
        assert_eq!(img.read_u8(6).expect("read u8"), 0xAB);

        // Little-endian on disk.
        let mut raw = [0_u8; 4];
        img.read_bytes(0, &mut raw).expect("read bytes");
        assert_eq!(raw, [0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn bounds_are_enforced() {
        let img = Image::from_bytes(vec![0_u8; 8]);
        assert!(img.read_u32(5).is_err());
        assert!(img.write_u16(7, 0).is_err());
        assert!(img.read_u8(8).is_err());
        assert!(img.read_u8(7).is_ok());
        assert!(matches!(
            img.read_u32(u64::MAX),
            Err(FshError::ImageBounds { .. })
        ));
    }

    #[test]
    fn reads_observe_prior_writes() {
        let img = Image::from_bytes(vec![0_u8; 16]);
        img.write_bytes(3, b"abc").expect("write");
        let mut buf = [0_u8; 5];
        img.read_bytes(2, &mut buf).expect("read");
        assert_eq!(&buf, b"\0abc\0");
    }

    #[test]
    fn file_backed_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        tmp.write_all(&[0_u8; 128]).expect("fill");
        tmp.flush().expect("flush");

        let img = Image::open(tmp.path()).expect("open");
        assert_eq!(img.len(), 128);
        img.write_u32(100, 0x0102_0304).expect("write");
        assert_eq!(img.read_u32(100).expect("read"), 0x0102_0304);
        drop(img);

        // The write went to the file, not a hidden cache.
        let reopened = Image::open(tmp.path()).expect("reopen");
        assert_eq!(reopened.read_u32(100).expect("read"), 0x0102_0304);
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = Image::open("/nonexistent/fat32.img").unwrap_err();
        assert!(matches!(err, FshError::Io(_)));
    }
}
