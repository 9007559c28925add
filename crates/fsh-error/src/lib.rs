#![forbid(unsafe_code)]
//! Error types for the FAT32 shell.
//!
//! Defines `FshError` and a `Result<T>` alias used throughout the workspace.
//! Engine operations surface these as failure values; the shell formats a
//! message per command and keeps the prompt loop alive. Only `InvalidImage`
//! at mount time is fatal to the process.

use fsh_types::ParseError;
use thiserror::Error;

/// Unified error type for all engine operations.
#[derive(Debug, Error)]
pub enum FshError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access out of image bounds: offset {pos}, len {len}, image is {image_len} bytes")]
    ImageBounds { pos: u64, len: u64, image_len: u64 },

    #[error("invalid FAT32 image: {0}")]
    InvalidImage(#[from] ParseError),

    #[error("no such path")]
    NoSuchPath,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("file already open")]
    AlreadyOpen,

    #[error("invalid 8.3 name")]
    NameInvalid,

    #[error("no free clusters left")]
    NoSpace,

    #[error("file not open")]
    NotOpen,

    #[error("access mode does not permit the operation")]
    BadMode,

    #[error("offset beyond the end of the cluster chain")]
    OutOfBounds,

    #[error("corrupt cluster chain")]
    CorruptChain,

    #[error("directory not empty")]
    DirNotEmpty,
}

/// Result alias using `FshError`.
pub type Result<T> = std::result::Result<T, FshError>;
