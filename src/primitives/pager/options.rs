use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::types::{page::MIN_PAGE_SIZE, Result, StoreError};

use super::backend::BackendKind;

/// Grow margin applied by the in-memory backend when none is configured.
pub const DEFAULT_MEMORY_GROW_MARGIN: f64 = 0.5;
/// Grow margin applied by the memory-mapped backend when none is configured.
pub const DEFAULT_MAPPED_GROW_MARGIN: f64 = 0.1;
/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Configuration for opening a [`PageStorage`](super::PageStorage).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageOptions {
    /// Size of each page in bytes. Must be a multiple of 8 and at least 64.
    pub page_size: u32,
    /// Fraction of extra pages added whenever the storage grows.
    /// `None` picks the backend default.
    pub grow_margin: Option<f64>,
    /// Number of pages (header included) to reserve when creating a storage.
    pub initial_pages: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            grow_margin: None,
            initial_pages: 1,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    storage: StorageOptions,
}

impl StorageOptions {
    /// Default options with a custom page size.
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    /// Parses the `[storage]` table of a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        file.storage.validate()?;
        Ok(file.storage)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks the options for values the storage cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(StoreError::Invalid("page size below minimum"));
        }
        if self.page_size % 8 != 0 {
            return Err(StoreError::Invalid("page size must be a multiple of 8"));
        }
        if let Some(margin) = self.grow_margin {
            if !margin.is_finite() || margin < 0.0 {
                return Err(StoreError::Invalid("grow margin must be finite and >= 0"));
            }
        }
        Ok(())
    }

    /// The grow margin in effect for the given backend.
    pub fn grow_margin_for(&self, kind: BackendKind) -> f64 {
        self.grow_margin.unwrap_or(match kind {
            BackendKind::InMemory => DEFAULT_MEMORY_GROW_MARGIN,
            BackendKind::MemoryMapped => DEFAULT_MAPPED_GROW_MARGIN,
        })
    }
}
