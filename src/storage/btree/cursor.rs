use crate::types::PageAddr;

/// Position of one entry in a tree: a leaf page and a logical index inside
/// its ring.
///
/// An iterator is a plain value. It is only meaningful for the tree that
/// produced it and only until that tree is next modified; every insert or
/// remove advances the tree's stamp, and operations on an iterator carrying
/// an older stamp are refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BPTreeIter {
    pub(crate) leaf: PageAddr,
    pub(crate) index: u32,
    pub(crate) stamp: u64,
}

impl BPTreeIter {
    /// Iterator pointing nowhere.
    pub const INVALID: BPTreeIter = BPTreeIter {
        leaf: PageAddr::NULL,
        index: 0,
        stamp: 0,
    };

    pub(crate) fn at(leaf: PageAddr, index: usize, stamp: u64) -> Self {
        Self {
            leaf,
            index: index as u32,
            stamp,
        }
    }

    /// Whether the iterator was produced at an entry, as opposed to
    /// [`BPTreeIter::INVALID`]. This does not check the stamp, so a
    /// positioned iterator may still be stale; use
    /// [`BPTree::is_valid`](super::BPTree::is_valid) for that.
    pub fn is_positioned(&self) -> bool {
        self.stamp != 0
    }

    /// Leaf page the iterator points into.
    pub fn leaf(&self) -> PageAddr {
        self.leaf
    }

    /// Logical index of the entry inside its leaf.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Tree stamp at the time the iterator was produced.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }
}

impl Default for BPTreeIter {
    fn default() -> Self {
        Self::INVALID
    }
}
