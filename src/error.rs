//! Error types for Mach-O load-command patching.
//!
//! Every fallible operation in this crate returns [`Result`]. Variants are
//! grouped by failure kind: I/O at the filesystem boundary, malformed input,
//! unsupported architectures, and insertion-space exhaustion.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for load-command patch operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Malformed Binary Errors ====================
    #[error("unrecognized magic number: {0:#010x}")]
    UnknownMagic(u32),

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("load command at offset {offset:#x} extends beyond the declared command region")]
    LoadCommandOverflow { offset: usize },

    #[error("load command at offset {offset:#x} has invalid size {cmdsize}")]
    BadCommandSize { offset: usize, cmdsize: u32 },

    #[error("fat arch slice at {offset:#x}+{size:#x} exceeds file size {file_size:#x}")]
    SliceOutOfBounds {
        offset: u64,
        size: u64,
        file_size: u64,
    },

    #[error("fat arch slices at {first:#x} and {second:#x} overlap")]
    OverlappingSlices { first: u64, second: u64 },

    #[error("fat binary declares no architecture slices")]
    EmptyFatBinary,

    // ==================== Architecture Errors ====================
    #[error("unsupported CPU type: {0:#x}")]
    UnsupportedCpuType(u32),

    // ==================== Insertion Errors ====================
    #[error("insufficient space for new load command (need {needed} bytes, have {available})")]
    InsufficientSpace { needed: usize, available: usize },

    #[error("offset field at {field_offset:#x} cannot represent shifted value {value:#x}")]
    OffsetOverflow { field_offset: usize, value: u64 },
}

/// A specialized Result type for load-command patch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if the input was not a valid Mach-O or FAT binary.
    ///
    /// Useful for callers that probe arbitrary files and only want to know
    /// whether the file was rejected rather than failed mid-operation.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::UnknownMagic(_)
                | Error::BufferTooSmall { .. }
                | Error::LoadCommandOverflow { .. }
                | Error::BadCommandSize { .. }
                | Error::SliceOutOfBounds { .. }
                | Error::OverlappingSlices { .. }
                | Error::EmptyFatBinary
        )
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }
}
