use std::cmp::Ordering;

use tracing::trace;

use super::BPTree;
use crate::primitives::pager::PageStorage;
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::page;
use crate::types::{PageAddr, Result, StoreError};

impl<C: KeyComparator> BPTree<C> {
    /// Inserts an entry after every entry with an equal key.
    ///
    /// Invalidates every outstanding iterator. A full leaf splits in two and
    /// the split propagates up the index levels, growing a new root when the
    /// old one overflows.
    pub fn insert(&mut self, storage: &mut PageStorage, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        if value.len() != self.layout.value_size {
            return Err(StoreError::Invalid("value has the wrong size"));
        }
        self.bump_stamp();
        let leaf = self.descend(storage, key)?;
        let (pos, full) = {
            let node = storage.lookup(leaf)?;
            let pos = self.leaf_search(node, key).map_or(0, |i| i + 1);
            (pos, page::count(node) == self.layout.leaf_capacity)
        };
        if !full {
            page::leaf_insert(storage.lookup_mut(leaf)?, &self.layout, pos, key, value);
            return Ok(());
        }
        self.split_leaf(storage, leaf, pos, key, value)
    }

    /// Splits a full leaf while inserting an entry at logical `pos`.
    ///
    /// The left leaf keeps the larger half; the first key of the new right
    /// leaf becomes the separator in the parent.
    fn split_leaf(
        &mut self,
        storage: &mut PageStorage,
        leaf: PageAddr,
        pos: usize,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let layout = self.layout;
        let (mut contents, parent, next) = {
            let node = storage.lookup(leaf)?;
            (page::read_leaf(node, &layout), page::parent(node), page::leaf_next(node))
        };
        let ks = layout.key_size;
        let vs = layout.value_size;
        contents.keys.splice(pos * ks..pos * ks, key.iter().copied());
        contents.values.splice(pos * vs..pos * vs, value.iter().copied());

        let total = contents.len(&layout);
        let left_n = (total + 1) / 2;
        let right = storage.alloc()?;
        {
            let node = storage.lookup_mut(right)?;
            page::init_leaf(node, parent);
            page::write_leaf(
                node,
                &layout,
                &contents.keys[left_n * ks..],
                &contents.values[left_n * vs..],
            );
            page::set_leaf_prev(node, leaf);
            page::set_leaf_next(node, next);
        }
        {
            let node = storage.lookup_mut(leaf)?;
            page::write_leaf(
                node,
                &layout,
                &contents.keys[..left_n * ks],
                &contents.values[..left_n * vs],
            );
            page::set_leaf_next(node, right);
        }
        if next.is_null() {
            self.last_leaf.write_addr(storage, right)?;
        } else {
            page::set_leaf_prev(storage.lookup_mut(next)?, right);
        }
        self.stats.inc_leaf_splits();
        trace!(
            target: "rtgraph_store::bptree::split",
            tree = %self.name,
            left = leaf.0,
            right = right.0,
            left_entries = left_n,
            right_entries = total - left_n,
            "split leaf"
        );

        let separator = contents.keys[left_n * ks..(left_n + 1) * ks].to_vec();
        debug_assert_ne!(
            self.cmp(&contents.keys[(left_n - 1) * ks..left_n * ks], &separator),
            Ordering::Greater
        );
        self.insert_into_parent(storage, leaf, separator, right)
    }
}
