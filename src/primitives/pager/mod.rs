//! Fixed-size page allocation over in-memory or memory-mapped byte spaces.

mod backend;
mod meta;
mod options;
mod storage;

pub use backend::BackendKind;
pub use meta::{read_header, StorageHeader};
pub use options::{
    StorageOptions, DEFAULT_MAPPED_GROW_MARGIN, DEFAULT_MEMORY_GROW_MARGIN, DEFAULT_PAGE_SIZE,
};
pub use storage::PageStorage;
