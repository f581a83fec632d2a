#![allow(unsafe_code)]
//! Byte-space providers behind a [`PageStorage`](super::PageStorage).

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::debug;

use crate::primitives::io;
use crate::types::{Result, StoreError};

/// Which backend a storage runs on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendKind {
    /// Growable heap buffer; contents vanish on close.
    InMemory,
    /// Shared memory mapping of a file.
    MemoryMapped,
}

pub(crate) enum Backend {
    InMemory(Vec<u8>),
    MemoryMapped(MappedFile),
}

impl Backend {
    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            Backend::InMemory(_) => BackendKind::InMemory,
            Backend::MemoryMapped(_) => BackendKind::MemoryMapped,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Backend::InMemory(buf) => buf,
            Backend::MemoryMapped(mapped) => &mapped.map,
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Backend::InMemory(buf) => buf,
            Backend::MemoryMapped(mapped) => &mut mapped.map,
        }
    }

    /// Grows the byte space to at least `len` bytes and returns the new length.
    ///
    /// The mapped backend rounds the length up to whole OS pages.
    pub(crate) fn resize(&mut self, len: usize) -> Result<usize> {
        let current = self.bytes().len();
        if len < current {
            return Err(StoreError::Invalid("storage cannot shrink"));
        }
        match self {
            Backend::InMemory(buf) => {
                buf.resize(len, 0);
                Ok(buf.len())
            }
            Backend::MemoryMapped(mapped) => mapped.grow(len),
        }
    }

    pub(crate) fn sync(&self) -> Result<()> {
        match self {
            Backend::InMemory(_) => Ok(()),
            Backend::MemoryMapped(mapped) => mapped.map.flush().map_err(StoreError::from),
        }
    }

    pub(crate) fn close(self) -> Result<()> {
        match self {
            Backend::InMemory(_) => Ok(()),
            Backend::MemoryMapped(mapped) => {
                mapped.map.flush()?;
                mapped.file.sync_all()?;
                debug!(path = %mapped.path.display(), "pager.mapped.closed");
                Ok(())
            }
        }
    }
}

pub(crate) struct MappedFile {
    path: PathBuf,
    file: File,
    map: MmapMut,
}

impl MappedFile {
    /// Opens (or creates) `path` and maps at least `min_len` bytes of it.
    ///
    /// Returns the mapping and whether the file was empty before opening.
    pub(crate) fn open(path: &Path, min_len: usize) -> Result<(Self, bool)> {
        let file = io::open_rw(path)?;
        let existing = io::file_len(&file)?;
        let fresh = existing == 0;
        if fresh {
            let len = io::round_up(min_len as u64, io::os_page_size() as u64);
            io::extend_to(&file, len)?;
        }
        let map = map_file(&file)?;
        debug!(
            path = %path.display(),
            len = map.len(),
            fresh,
            "pager.mapped.open"
        );
        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                map,
            },
            fresh,
        ))
    }

    fn grow(&mut self, len: usize) -> Result<usize> {
        let target = io::round_up(len as u64, io::os_page_size() as u64);
        self.map.flush()?;
        io::extend_to(&self.file, target)?;
        self.map = map_file(&self.file)?;
        debug!(path = %self.path.display(), len = self.map.len(), "pager.mapped.grow");
        Ok(self.map.len())
    }
}

fn map_file(file: &File) -> Result<MmapMut> {
    // SAFETY: the file is opened read-write by this process and owned by the
    // storage for the lifetime of the mapping. Slices into the mapping are
    // borrowed from the storage, so a remap (which needs `&mut`) cannot leave
    // dangling views behind.
    let map = unsafe { MmapMut::map_mut(file)? };
    Ok(map)
}
