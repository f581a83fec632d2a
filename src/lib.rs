//! Embedded page store: a persistent free-list page allocator, a named
//! atom directory living inside its pages, and a B+ tree whose nodes are
//! pages.
//!
//! ```no_run
//! use rtgraph_store::{BPTree, BPTreeOptions, NativeI32, PageStorage, StorageOptions};
//!
//! # fn main() -> rtgraph_store::Result<()> {
//! let mut storage = PageStorage::open_mapped("graph.db", &StorageOptions::default())?;
//! let mut tree = BPTree::open(&mut storage, "edges", BPTreeOptions::new(4, 4), NativeI32)?;
//! tree.insert(&mut storage, &1i32.to_ne_bytes(), &100i32.to_ne_bytes())?;
//! let found = tree.find(&storage, &1i32.to_ne_bytes())?;
//! assert_eq!(tree.read_value(&storage, &found)?, Some(&100i32.to_ne_bytes()[..]));
//! storage.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::pager::{BackendKind, PageStorage, StorageOptions};
pub use storage::atom::PageAtom;
pub use storage::btree::{
    BPTree, BPTreeIter, BPTreeOptions, ByteOrder, KeyComparator, NativeI32, NativeI64, NativeU32,
    NativeU64,
};
pub use types::{PageAddr, Result, StoreError};
