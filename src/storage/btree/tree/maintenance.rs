use tracing::{debug, trace};

use super::{BPTree, MAX_DEPTH};
use crate::primitives::pager::PageStorage;
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::cursor::BPTreeIter;
use crate::storage::btree::page;
use crate::types::{PageAddr, Result, StoreError};

/// A node, its same-parent sibling, and the separator between them.
struct Pair {
    parent: PageAddr,
    left: PageAddr,
    right: PageAddr,
    separator: usize,
    /// Whether the underfull node is the right one of the pair.
    underfull_is_right: bool,
}

impl<C: KeyComparator> BPTree<C> {
    /// Removes the entry [`BPTree::find`] returns for `key`, if any.
    ///
    /// Invalidates every outstanding iterator, even when nothing matched.
    pub fn remove(&mut self, storage: &mut PageStorage, key: &[u8]) -> Result<bool> {
        let found = self.find(storage, key)?;
        self.bump_stamp();
        if !found.is_positioned() {
            return Ok(false);
        }
        self.remove_entry(storage, found.leaf, found.index())?;
        Ok(true)
    }

    /// Removes the entry under `iter`. Returns `false` without touching the
    /// tree when the iterator is stale or invalid.
    pub fn remove_at(&mut self, storage: &mut PageStorage, iter: &BPTreeIter) -> Result<bool> {
        if !self.check_iter(iter, "remove_at") {
            return Ok(false);
        }
        self.resolve(storage, iter)?;
        self.bump_stamp();
        self.remove_entry(storage, iter.leaf, iter.index())?;
        Ok(true)
    }

    fn remove_entry(
        &mut self,
        storage: &mut PageStorage,
        leaf: PageAddr,
        index: usize,
    ) -> Result<()> {
        page::leaf_remove(storage.lookup_mut(leaf)?, &self.layout, index);
        self.rebalance_leaf(storage, leaf)
    }

    /// Finds the sibling `node` is paired with: the left one when there is
    /// one, otherwise the right one. `None` when `node` is an only child.
    fn pair_for(&self, storage: &PageStorage, node: PageAddr) -> Result<Option<Pair>> {
        let parent = page::parent(storage.lookup(node)?);
        if parent.is_null() {
            return Ok(None);
        }
        let parent_node = storage.lookup(parent)?;
        page::expect_index(parent_node, &self.layout)?;
        if page::count(parent_node) < 2 {
            return Ok(None);
        }
        let pos = page::child_position(parent_node, &self.layout, node)?;
        let pair = if pos > 0 {
            Pair {
                parent,
                left: page::index_child(parent_node, &self.layout, pos - 1),
                right: node,
                separator: pos - 1,
                underfull_is_right: true,
            }
        } else {
            Pair {
                parent,
                left: node,
                right: page::index_child(parent_node, &self.layout, 1),
                separator: 0,
                underfull_is_right: false,
            }
        };
        Ok(Some(pair))
    }

    /// Restores the minimum occupancy of a leaf after a removal by
    /// borrowing one entry from its sibling or merging the two.
    fn rebalance_leaf(&mut self, storage: &mut PageStorage, leaf: PageAddr) -> Result<()> {
        let layout = self.layout;
        if page::count(storage.lookup(leaf)?) >= layout.leaf_min() {
            return Ok(());
        }
        let Some(pair) = self.pair_for(storage, leaf)? else {
            return Ok(());
        };
        let left_n = page::count(storage.lookup(pair.left)?);
        let right_n = page::count(storage.lookup(pair.right)?);

        if left_n + right_n <= layout.leaf_capacity {
            let (mut contents, right_next) = {
                let node = storage.lookup(pair.left)?;
                (page::read_leaf(node, &layout), page::leaf_next(storage.lookup(pair.right)?))
            };
            let right_contents = page::read_leaf(storage.lookup(pair.right)?, &layout);
            contents.keys.extend_from_slice(&right_contents.keys);
            contents.values.extend_from_slice(&right_contents.values);
            {
                let node = storage.lookup_mut(pair.left)?;
                page::write_leaf(node, &layout, &contents.keys, &contents.values);
                page::set_leaf_next(node, right_next);
            }
            if right_next.is_null() {
                self.last_leaf.write_addr(storage, pair.left)?;
            } else {
                page::set_leaf_prev(storage.lookup_mut(right_next)?, pair.left);
            }
            storage.free(pair.right)?;
            page::index_remove(storage.lookup_mut(pair.parent)?, &layout, pair.separator);
            self.stats.inc_leaf_merges();
            trace!(
                target: "rtgraph_store::bptree::merge",
                tree = %self.name,
                left = pair.left.0,
                right = pair.right.0,
                entries = left_n + right_n,
                "merged leaves"
            );
            return self.rebalance_index(storage, pair.parent);
        }

        let (key, value) = {
            let (donor, index) = if pair.underfull_is_right {
                (pair.left, left_n - 1)
            } else {
                (pair.right, 0)
            };
            let node = storage.lookup(donor)?;
            (
                page::leaf_key(node, &layout, index).to_vec(),
                page::leaf_value(node, &layout, index).to_vec(),
            )
        };
        if pair.underfull_is_right {
            page::leaf_remove(storage.lookup_mut(pair.left)?, &layout, left_n - 1);
            page::leaf_insert(storage.lookup_mut(pair.right)?, &layout, 0, &key, &value);
        } else {
            page::leaf_remove(storage.lookup_mut(pair.right)?, &layout, 0);
            page::leaf_insert(storage.lookup_mut(pair.left)?, &layout, left_n, &key, &value);
        }
        let separator = page::leaf_key(storage.lookup(pair.right)?, &layout, 0).to_vec();
        page::set_index_key(storage.lookup_mut(pair.parent)?, &layout, pair.separator, &separator);
        self.stats.inc_leaf_borrows();
        Ok(())
    }

    /// Restores the minimum child count of an index node, walking up while
    /// merges leave parents underfull. A root left with a single index child
    /// is replaced by that child.
    fn rebalance_index(&mut self, storage: &mut PageStorage, mut node: PageAddr) -> Result<()> {
        let layout = self.layout;
        for _ in 0..MAX_DEPTH {
            let (parent, children) = {
                let n = storage.lookup(node)?;
                page::expect_index(n, &layout)?;
                (page::parent(n), page::count(n))
            };
            if parent.is_null() {
                return self.collapse_root(storage, node);
            }
            if children >= layout.index_min_children() {
                return Ok(());
            }
            let Some(pair) = self.pair_for(storage, node)? else {
                return Err(StoreError::Corruption("non-root index node without siblings"));
            };
            let left = page::read_index(storage.lookup(pair.left)?, &layout);
            let right = page::read_index(storage.lookup(pair.right)?, &layout);
            let separator =
                page::index_key(storage.lookup(pair.parent)?, &layout, pair.separator).to_vec();

            if left.children.len() + right.children.len() <= layout.index_max_children {
                let mut keys = left.keys;
                keys.extend_from_slice(&separator);
                keys.extend_from_slice(&right.keys);
                let mut merged = left.children;
                merged.extend_from_slice(&right.children);
                page::write_index(storage.lookup_mut(pair.left)?, &layout, &keys, &merged);
                for child in &right.children {
                    page::set_parent(storage.lookup_mut(*child)?, pair.left);
                }
                storage.free(pair.right)?;
                page::index_remove(storage.lookup_mut(pair.parent)?, &layout, pair.separator);
                self.stats.inc_index_merges();
                trace!(
                    target: "rtgraph_store::bptree::merge",
                    tree = %self.name,
                    left = pair.left.0,
                    right = pair.right.0,
                    children = merged.len(),
                    "merged index nodes"
                );
                node = pair.parent;
                continue;
            }

            self.rotate_child(storage, &pair, left, right, separator)?;
            return Ok(());
        }
        Err(StoreError::Corruption("tree deeper than the depth limit"))
    }

    /// Moves one child from the fuller node of `pair` to the underfull one
    /// through the parent separator.
    fn rotate_child(
        &mut self,
        storage: &mut PageStorage,
        pair: &Pair,
        mut left: page::IndexContents,
        mut right: page::IndexContents,
        separator: Vec<u8>,
    ) -> Result<()> {
        let layout = self.layout;
        let ks = layout.key_size;
        let (moved, new_separator, receiver) = if pair.underfull_is_right {
            let moved = left.children.pop().ok_or(StoreError::Corruption("empty index node"))?;
            let split = left.keys.len() - ks;
            let new_separator = left.keys.split_off(split);
            right.keys.splice(0..0, separator);
            right.children.insert(0, moved);
            (moved, new_separator, pair.right)
        } else {
            let moved = right.children.remove(0);
            let rest = right.keys.split_off(ks);
            let new_separator = std::mem::replace(&mut right.keys, rest);
            left.keys.extend_from_slice(&separator);
            left.children.push(moved);
            (moved, new_separator, pair.left)
        };
        page::write_index(storage.lookup_mut(pair.left)?, &layout, &left.keys, &left.children);
        page::write_index(storage.lookup_mut(pair.right)?, &layout, &right.keys, &right.children);
        page::set_parent(storage.lookup_mut(moved)?, receiver);
        let parent = storage.lookup_mut(pair.parent)?;
        page::set_index_key(parent, &layout, pair.separator, &new_separator);
        self.stats.inc_index_borrows();
        Ok(())
    }

    fn collapse_root(&mut self, storage: &mut PageStorage, mut root: PageAddr) -> Result<()> {
        let layout = self.layout;
        for _ in 0..MAX_DEPTH {
            let child = {
                let node = storage.lookup(root)?;
                if page::count(node) != 1 {
                    return Ok(());
                }
                page::index_child(node, &layout, 0)
            };
            if page::kind(storage.lookup(child)?)? != page::NodeKind::Index {
                return Ok(());
            }
            page::set_parent(storage.lookup_mut(child)?, PageAddr::NULL);
            self.set_root(storage, child)?;
            storage.free(root)?;
            self.stats.inc_root_collapses();
            debug!(tree = %self.name, old_root = root.0, root = child.0, "bptree.root.collapse");
            root = child;
        }
        Err(StoreError::Corruption("tree deeper than the depth limit"))
    }
}
