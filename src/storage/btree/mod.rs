#![forbid(unsafe_code)]

//! Page-resident B+ tree with fixed-size keys and values.

mod compare;
mod cursor;
/// Page-size-derived node layout.
pub mod layout;
mod page;
mod stats;
mod tree;

pub use compare::{ByteOrder, KeyComparator, NativeI32, NativeI64, NativeU32, NativeU64};
pub use cursor::BPTreeIter;
pub use layout::NodeLayout;
pub use stats::{BPTreeStats, BPTreeStatsSnapshot};
pub use tree::{BPTree, BPTreeOptions};
