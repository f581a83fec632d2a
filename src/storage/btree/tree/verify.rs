use std::cmp::Ordering;

use super::{BPTree, MAX_DEPTH};
use crate::primitives::pager::PageStorage;
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::page::{self, NodeKind};
use crate::types::{PageAddr, Result, StoreError};

struct Walk {
    leaves: Vec<PageAddr>,
    leaf_depth: Option<usize>,
    visited: u64,
}

impl<C: KeyComparator> BPTree<C> {
    /// Checks the structural invariants of the whole tree.
    ///
    /// Verifies key order inside nodes and across the leaf chain, separator
    /// bounds, parent pointers, minimum occupancy, uniform leaf depth, the
    /// prev/next links and the first/last leaf atoms. Returns the first
    /// violation found as [`StoreError::Corruption`].
    pub fn verify(&self, storage: &PageStorage) -> Result<()> {
        let root = self.root.read_addr(storage)?;
        if page::kind(storage.lookup(root)?)? != NodeKind::Index {
            return Err(StoreError::Corruption("root is not an index node"));
        }
        let mut walk = Walk {
            leaves: Vec::new(),
            leaf_depth: None,
            visited: 0,
        };
        self.verify_node(storage, root, PageAddr::NULL, None, None, 0, true, &mut walk)?;
        self.verify_chain(storage, &walk.leaves)
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node(
        &self,
        storage: &PageStorage,
        addr: PageAddr,
        parent: PageAddr,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        only_child: bool,
        walk: &mut Walk,
    ) -> Result<()> {
        walk.visited += 1;
        if depth > MAX_DEPTH || walk.visited > storage.num_pages() {
            return Err(StoreError::Corruption("tree walk does not terminate"));
        }
        let node = storage.lookup(addr)?;
        if page::parent(node) != parent {
            return Err(StoreError::Corruption("wrong parent pointer"));
        }
        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lo| self.cmp(lo, key) != Ordering::Greater)
                && upper.map_or(true, |hi| self.cmp(key, hi) != Ordering::Greater)
        };
        match page::kind(node)? {
            NodeKind::Index => {
                page::expect_index(node, &self.layout)?;
                let children = page::count(node);
                if !parent.is_null() && children < self.layout.index_min_children() {
                    return Err(StoreError::Corruption("index node below minimum occupancy"));
                }
                let key = |i: usize| page::index_key(node, &self.layout, i);
                for i in 0..children - 1 {
                    if !in_bounds(key(i)) {
                        return Err(StoreError::Corruption("separator outside parent bounds"));
                    }
                    if i > 0 && self.cmp(key(i - 1), key(i)) == Ordering::Greater {
                        return Err(StoreError::Corruption("separators out of order"));
                    }
                }
                for i in 0..children {
                    let lo = if i == 0 { lower } else { Some(key(i - 1)) };
                    let hi = if i == children - 1 { upper } else { Some(key(i)) };
                    let child = page::index_child(node, &self.layout, i);
                    let only = children == 1;
                    self.verify_node(storage, child, addr, lo, hi, depth + 1, only, walk)?;
                }
            }
            NodeKind::Leaf => {
                page::expect_leaf(node, &self.layout)?;
                let count = page::count(node);
                if !only_child && count < self.layout.leaf_min() {
                    return Err(StoreError::Corruption("leaf below minimum occupancy"));
                }
                let key = |i: usize| page::leaf_key(node, &self.layout, i);
                for i in 0..count {
                    if !in_bounds(key(i)) {
                        return Err(StoreError::Corruption("leaf key outside parent bounds"));
                    }
                    if i > 0 && self.cmp(key(i - 1), key(i)) == Ordering::Greater {
                        return Err(StoreError::Corruption("leaf keys out of order"));
                    }
                }
                match walk.leaf_depth {
                    None => walk.leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(StoreError::Corruption("leaves at different depths"));
                    }
                    Some(_) => {}
                }
                walk.leaves.push(addr);
            }
        }
        Ok(())
    }

    fn verify_chain(&self, storage: &PageStorage, leaves: &[PageAddr]) -> Result<()> {
        let (Some(first), Some(last)) = (leaves.first(), leaves.last()) else {
            return Err(StoreError::Corruption("tree has no leaves"));
        };
        if self.first_leaf.read_addr(storage)? != *first {
            return Err(StoreError::Corruption("first leaf atom does not match the tree"));
        }
        if self.last_leaf.read_addr(storage)? != *last {
            return Err(StoreError::Corruption("last leaf atom does not match the tree"));
        }
        for (i, addr) in leaves.iter().enumerate() {
            let node = storage.lookup(*addr)?;
            let prev = if i == 0 { PageAddr::NULL } else { leaves[i - 1] };
            let next = leaves.get(i + 1).copied().unwrap_or(PageAddr::NULL);
            if page::leaf_prev(node) != prev || page::leaf_next(node) != next {
                return Err(StoreError::Corruption("leaf chain links disagree with the tree"));
            }
            let last_slot = page::leaf_last_slot(node, &self.layout);
            if let (Some(last), false) = (last_slot, next.is_null()) {
                let following = storage.lookup(next)?;
                if page::count(following) > 0
                    && self.cmp(
                        page::slot_key(node, &self.layout, last),
                        page::leaf_key(following, &self.layout, 0),
                    ) == Ordering::Greater
                {
                    return Err(StoreError::Corruption("keys out of order across leaves"));
                }
            }
        }
        Ok(())
    }
}
