use std::cmp::Ordering;

use serde::Deserialize;
use tracing::{debug, warn};

use super::compare::{ByteOrder, KeyComparator};
use super::cursor::BPTreeIter;
use super::layout::NodeLayout;
use super::page::{self, NodeKind};
use super::stats::BPTreeStats;
use crate::primitives::pager::PageStorage;
use crate::storage::atom::PageAtom;
use crate::types::{PageAddr, Result, StoreError};

mod api;
mod internal;
mod leaf;
mod maintenance;
mod verify;

/// Deepest tree a descent will follow before reporting corruption.
const MAX_DEPTH: usize = 64;

/// Key and value sizes of a tree.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BPTreeOptions {
    /// Size of every key in bytes.
    pub key_size: usize,
    /// Size of every value in bytes.
    pub value_size: usize,
}

impl BPTreeOptions {
    /// Options for fixed `key_size` keys and `value_size` values.
    pub fn new(key_size: usize, value_size: usize) -> Self {
        Self {
            key_size,
            value_size,
        }
    }

    /// Parses the `[bptree]` table of a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: TreeConfig = toml::from_str(text)?;
        file.bptree.validate()?;
        Ok(file.bptree)
    }

    /// Checks that the sizes describe a storable tree.
    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(StoreError::Invalid("key size must be non-zero"));
        }
        if self.key_size > u32::MAX as usize || self.value_size > u32::MAX as usize {
            return Err(StoreError::Invalid("key or value size too large"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TreeConfig {
    bptree: BPTreeOptions,
}

/// B+ tree of fixed-size keys and values stored directly in storage pages.
///
/// Index nodes hold separators and child addresses; leaves hold entries in
/// a ring buffer and are doubly linked in key order. The root, first leaf
/// and last leaf addresses are kept in three atoms of the storage's global
/// directory, so a tree is found again by name after reopening the storage.
///
/// The handle itself is transient: it caches the node layout, the atom
/// handles, and a stamp that advances on every insert or remove. It never
/// owns the storage; every call takes the storage explicitly.
///
/// Duplicate keys are allowed. A new key is placed after every equal key
/// already present, and [`BPTree::find`] returns the most recent one.
pub struct BPTree<C: KeyComparator = ByteOrder> {
    name: String,
    layout: NodeLayout,
    compare: C,
    root: PageAtom,
    first_leaf: PageAtom,
    last_leaf: PageAtom,
    stamp: u64,
    stats: BPTreeStats,
}

impl<C: KeyComparator> BPTree<C> {
    /// Opens the tree called `name`, creating an empty one on first use.
    ///
    /// A fresh tree is an index root with a single empty leaf child, which is
    /// both the first and the last leaf.
    pub fn open(
        storage: &mut PageStorage,
        name: &str,
        options: BPTreeOptions,
        compare: C,
    ) -> Result<Self> {
        options.validate()?;
        if let Some(required) = compare.key_size() {
            if required != options.key_size {
                return Err(StoreError::Invalid("comparator expects another key size"));
            }
        }
        let layout = NodeLayout::compute(storage.page_size(), options.key_size, options.value_size)?;
        let directory = storage.global_atoms();
        let null = PageAddr::NULL.to_ne_bytes();
        let (root, _) =
            PageAtom::find_or_create(storage, directory, &atom_name(name, "root"), &null)?;
        let (first_leaf, _) =
            PageAtom::find_or_create(storage, directory, &atom_name(name, "first_leaf"), &null)?;
        let (last_leaf, _) =
            PageAtom::find_or_create(storage, directory, &atom_name(name, "last_leaf"), &null)?;

        let tree = Self {
            name: name.to_owned(),
            layout,
            compare,
            root,
            first_leaf,
            last_leaf,
            stamp: 1,
            stats: BPTreeStats::default(),
        };

        let root_addr = tree.root.read_addr(storage)?;
        if root_addr.is_null() {
            tree.init_empty(storage)?;
        } else {
            page::expect_index(storage.lookup(root_addr)?, &tree.layout)?;
            if tree.first_leaf.read_addr(storage)?.is_null()
                || tree.last_leaf.read_addr(storage)?.is_null()
            {
                return Err(StoreError::Corruption("tree has a root but no leaf chain"));
            }
            debug!(tree = name, root = root_addr.0, "bptree.open.existing");
        }
        Ok(tree)
    }

    fn init_empty(&self, storage: &mut PageStorage) -> Result<()> {
        let root = storage.alloc()?;
        let leaf = storage.alloc()?;
        {
            let page = storage.lookup_mut(root)?;
            page::init_index(page, PageAddr::NULL);
            page::write_index(page, &self.layout, &[], &[leaf]);
        }
        page::init_leaf(storage.lookup_mut(leaf)?, root);
        self.root.write_addr(storage, root)?;
        self.first_leaf.write_addr(storage, leaf)?;
        self.last_leaf.write_addr(storage, leaf)?;
        debug!(
            tree = %self.name,
            root = root.0,
            leaf = leaf.0,
            leaf_capacity = self.layout.leaf_capacity,
            index_max_children = self.layout.index_max_children,
            "bptree.open.created"
        );
        Ok(())
    }

    /// Tree name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node layout computed for this tree's sizes and the storage page size.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// Current stamp. It advances on every insert and remove.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Operation counters of this handle.
    pub fn stats(&self) -> &BPTreeStats {
        &self.stats
    }

    /// Address of the root index node.
    pub fn root_page(&self, storage: &PageStorage) -> Result<PageAddr> {
        self.root.read_addr(storage)
    }

    /// Whether `iter` points at an entry of this tree as it is now.
    pub fn is_valid(&self, iter: &BPTreeIter) -> bool {
        iter.is_positioned() && iter.stamp == self.stamp
    }

    fn set_root(&self, storage: &mut PageStorage, root: PageAddr) -> Result<()> {
        self.root.write_addr(storage, root)
    }

    fn bump_stamp(&mut self) {
        self.stamp += 1;
    }

    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare.compare(a, b)
    }

    /// Checks the stamp of a caller-supplied iterator, logging stale use.
    fn check_iter(&self, iter: &BPTreeIter, op: &'static str) -> bool {
        if self.is_valid(iter) {
            return true;
        }
        if iter.is_positioned() {
            warn!(
                tree = %self.name,
                op,
                iter_stamp = iter.stamp,
                tree_stamp = self.stamp,
                "bptree.iter.stale"
            );
        }
        false
    }

    /// Resolves a current iterator to its leaf page.
    fn resolve<'s>(&self, storage: &'s PageStorage, iter: &BPTreeIter) -> Result<&'s [u8]> {
        let page = storage.lookup(iter.leaf)?;
        page::expect_leaf(page, &self.layout)?;
        if iter.index() >= page::count(page) {
            return Err(StoreError::Invalid("iterator does not point at an entry"));
        }
        Ok(page)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.layout.key_size {
            return Err(StoreError::Invalid("key has the wrong size"));
        }
        Ok(())
    }

    /// Walks from the root to the leaf whose range covers `key`.
    fn descend(&self, storage: &PageStorage, key: &[u8]) -> Result<PageAddr> {
        self.stats.inc_searches();
        let mut addr = self.root.read_addr(storage)?;
        for _ in 0..MAX_DEPTH {
            let node = storage.lookup(addr)?;
            match page::kind(node)? {
                NodeKind::Leaf => {
                    page::expect_leaf(node, &self.layout)?;
                    return Ok(addr);
                }
                NodeKind::Index => {
                    page::expect_index(node, &self.layout)?;
                    self.stats.inc_index_visits();
                    let child = self.index_search(node, key);
                    addr = page::index_child(node, &self.layout, child);
                }
            }
        }
        Err(StoreError::Corruption("tree deeper than the depth limit"))
    }

    /// Picks the child of an index node whose subtree may hold `key`: the
    /// last child whose lower separator is `<= key`.
    ///
    /// Bisects with `keys[lo] <= key < keys[hi]`, so each step compares one
    /// key and both boundary results stay cached in `lo` and `hi`.
    fn index_search(&self, node: &[u8], key: &[u8]) -> usize {
        let keys = page::count(node).saturating_sub(1);
        if keys == 0 {
            return 0;
        }
        let sep = |i: usize| page::index_key(node, &self.layout, i);
        if self.cmp(sep(0), key) == Ordering::Greater {
            return 0;
        }
        if self.cmp(sep(keys - 1), key) != Ordering::Greater {
            return keys;
        }
        let (mut lo, mut hi) = (0, keys - 1);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.cmp(sep(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo + 1
    }

    /// Logical index of the last entry `<= key` in a leaf, or `None` when the
    /// leaf is empty or every entry is greater. Equal keys resolve to the
    /// highest index.
    fn leaf_search(&self, leaf: &[u8], key: &[u8]) -> Option<usize> {
        let n = page::count(leaf);
        if n == 0 {
            return None;
        }
        let at = |i: usize| page::leaf_key(leaf, &self.layout, i);
        if self.cmp(at(0), key) == Ordering::Greater {
            return None;
        }
        if self.cmp(at(n - 1), key) != Ordering::Greater {
            return Some(n - 1);
        }
        let (mut lo, mut hi) = (0, n - 1);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.cmp(at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Some(lo)
    }

    /// First entry at or after logical `index` of `leaf`, following next
    /// links across empty tails.
    fn pos_after(
        &self,
        storage: &PageStorage,
        mut leaf: PageAddr,
        mut index: usize,
    ) -> Result<BPTreeIter> {
        for _ in 0..storage.num_pages() {
            let node = storage.lookup(leaf)?;
            page::expect_leaf(node, &self.layout)?;
            if index < page::count(node) {
                return Ok(BPTreeIter::at(leaf, index, self.stamp));
            }
            leaf = page::leaf_next(node);
            if leaf.is_null() {
                return Ok(BPTreeIter::INVALID);
            }
            index = 0;
        }
        Err(StoreError::Corruption("leaf chain does not terminate"))
    }

    /// Last entry before logical `index` of `leaf`, following prev links.
    fn pos_before(
        &self,
        storage: &PageStorage,
        mut leaf: PageAddr,
        mut index: usize,
    ) -> Result<BPTreeIter> {
        for _ in 0..storage.num_pages() {
            let node = storage.lookup(leaf)?;
            page::expect_leaf(node, &self.layout)?;
            if index > 0 {
                let index = index.min(page::count(node));
                if index > 0 {
                    return Ok(BPTreeIter::at(leaf, index - 1, self.stamp));
                }
            }
            leaf = page::leaf_prev(node);
            if leaf.is_null() {
                return Ok(BPTreeIter::INVALID);
            }
            index = usize::MAX;
        }
        Err(StoreError::Corruption("leaf chain does not terminate"))
    }
}

impl<C: KeyComparator> std::fmt::Debug for BPTree<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPTree")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("stamp", &self.stamp)
            .finish()
    }
}

fn atom_name(tree: &str, slot: &str) -> String {
    format!("bptree:{tree}:{slot}")
}
