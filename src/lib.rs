//! dyject - insert and check dylib load commands in Mach-O binaries.
//!
//! This library edits the load-command region of Mach-O executables, adding
//! `LC_LOAD_DYLIB` (or `LC_LOAD_WEAK_DYLIB`) entries for a given install
//! name. Thin and FAT (universal) binaries are supported, 32- and 64-bit,
//! in either byte order. Everything outside the load-command region and the
//! file offsets that must move with it is preserved byte for byte.
//!
//! # Features
//!
//! - In-place fast path when the header padding has room for the new command
//! - General content-shifting path with a single explicit offset-fixup pass
//! - All-or-nothing FAT patching: a failing slice leaves the file untouched
//! - Atomic persistence (temp file + rename)
//! - Idempotent: re-inserting an existing install name is a no-op
//!
//! # Example
//!
//! ```no_run
//! use dyject::{has_load_dylib, insert_load_dylib};
//!
//! fn main() -> dyject::Result<()> {
//!     let name = "@executable_path/Frameworks/AutoProxy.framework/AutoProxy";
//!
//!     let report = insert_load_dylib("MyApp.app/MyApp", name)?;
//!     for slice in &report.slices {
//!         println!("{}: {:?}", slice.arch, slice.outcome);
//!     }
//!
//!     assert!(has_load_dylib("MyApp.app/MyApp", name)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod macho;
pub mod patch;
pub mod util;

// Re-export main types
pub use error::{Error, Result};
pub use patch::{
    image_has_install_name, patch_image, LoadKind, PatchReport, SliceOutcome, SliceReport,
};

use std::fs;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info};

/// Options for load-command insertion.
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Which load command kind to insert
    pub kind: LoadKind,
}

/// Inserts a dylib load command into every slice of a binary.
///
/// Slices that already reference `install_name` are left alone; the file is
/// rewritten (atomically) only when at least one slice changed. Any slice
/// failure aborts the whole operation with the on-disk file untouched.
///
/// # Arguments
///
/// * `binary` - Path to the Mach-O executable to patch
/// * `install_name` - The dylib install name to insert; used as opaque text
///
/// # Returns
///
/// A [`PatchReport`] with one entry per architecture slice.
pub fn insert_load_dylib<P: AsRef<Path>>(binary: P, install_name: &str) -> Result<PatchReport> {
    insert_load_dylib_with(binary, install_name, InsertOptions::default())
}

/// Inserts a dylib load command with explicit options.
pub fn insert_load_dylib_with<P: AsRef<Path>>(
    binary: P,
    install_name: &str,
    options: InsertOptions,
) -> Result<PatchReport> {
    let path = binary.as_ref();
    let data = fs::read(path).map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    let (patched, report) = patch_image(&data, install_name.as_bytes(), options.kind)?;

    if report.changed() {
        patch::persist_atomic(path, &patched)?;
        info!(
            binary = %path.display(),
            install_name,
            slices = report.slices.len(),
            "inserted load command"
        );
    } else {
        debug!(
            binary = %path.display(),
            install_name,
            "all slices already reference the dylib; file left untouched"
        );
    }

    Ok(report)
}

/// Returns true if at least one slice of a binary references `install_name`.
///
/// Read-only: the file is memory-mapped for the duration of the call and
/// unmapped on every exit path. Malformed input is an error, never `false`.
pub fn has_load_dylib<P: AsRef<Path>>(binary: P, install_name: &str) -> Result<bool> {
    let path = binary.as_ref();
    let file = File::open(path).map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;
    let map = unsafe { Mmap::map(&file) }.map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    image_has_install_name(&map, install_name.as_bytes())
}
