//! File handling shared by the memory-mapped storage backend.

use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use tracing::debug;

use crate::types::{Result, StoreError};

/// Opens a file in read-write mode, creating it when missing.
pub fn open_rw(path: impl AsRef<Path>) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(StoreError::from)
}

/// Returns the current length of the file in bytes.
pub fn file_len(file: &File) -> Result<u64> {
    Ok(file.metadata().map_err(StoreError::from)?.len())
}

/// Extends the file to `len` bytes. Shrinking is refused.
pub fn extend_to(file: &File, len: u64) -> Result<()> {
    let current = file_len(file)?;
    if len < current {
        return Err(StoreError::Invalid("file cannot shrink"));
    }
    if len == current {
        return Ok(());
    }
    debug!(from = current, to = len, "io.extend_to");
    file.set_len(len).map_err(StoreError::from)
}

/// Rounds `len` up to a multiple of `unit`.
pub fn round_up(len: u64, unit: u64) -> u64 {
    debug_assert!(unit > 0);
    len.div_ceil(unit) * unit
}

/// Page size of the operating system's virtual memory.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn os_page_size() -> usize {
    // SAFETY: sysconf has no preconditions and only reads process state.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw > 0 {
        raw as usize
    } else {
        4096
    }
}

/// Page size of the operating system's virtual memory.
#[cfg(not(unix))]
pub fn os_page_size() -> usize {
    4096
}
