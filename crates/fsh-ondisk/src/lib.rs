#![forbid(unsafe_code)]
//! On-disk format parsing and encoding for FAT32 structures.
//!
//! Pure codec crate — no I/O, no side effects. Parses the boot sector into
//! [`BootInfo`], decodes and encodes 32-byte directory records, normalises
//! 8.3 short names, and packs FAT write timestamps.

pub mod boot;
pub mod dirent;
pub mod timestamp;

pub use boot::BootInfo;
pub use dirent::{
    DOT_NAME, DOTDOT_NAME, DirEntry, Record, SlotState, decode_record, display_name,
    validate_name,
};
pub use timestamp::FatTimestamp;
