use std::cmp::Ordering;
use std::ops::ControlFlow;

use tracing::debug;

use super::{BPTree, MAX_DEPTH};
use crate::primitives::pager::PageStorage;
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::cursor::BPTreeIter;
use crate::storage::btree::page::{self, NodeKind};
use crate::types::{Result, StoreError};

impl<C: KeyComparator> BPTree<C> {
    /// Finds the most recently inserted entry whose key equals `key`.
    ///
    /// Returns an invalid iterator when no entry matches.
    pub fn find(&self, storage: &PageStorage, key: &[u8]) -> Result<BPTreeIter> {
        let (less, _) = self.find_nearest(storage, key)?;
        if !less.is_positioned() {
            return Ok(less);
        }
        let leaf = self.resolve(storage, &less)?;
        if self.cmp(page::leaf_key(leaf, &self.layout, less.index()), key) == Ordering::Equal {
            Ok(less)
        } else {
            Ok(BPTreeIter::INVALID)
        }
    }

    /// Brackets `key`: returns the last entry `<= key` and the entry right
    /// after it. Either side is invalid only at the corresponding end of the
    /// tree.
    pub fn find_nearest(
        &self,
        storage: &PageStorage,
        key: &[u8],
    ) -> Result<(BPTreeIter, BPTreeIter)> {
        self.check_key(key)?;
        let leaf = self.descend(storage, key)?;
        let node = storage.lookup(leaf)?;
        match self.leaf_search(node, key) {
            Some(index) => Ok((
                BPTreeIter::at(leaf, index, self.stamp),
                self.pos_after(storage, leaf, index + 1)?,
            )),
            None => Ok((
                self.pos_before(storage, leaf, 0)?,
                self.pos_after(storage, leaf, 0)?,
            )),
        }
    }

    /// Iterator at the smallest entry, invalid when the tree is empty.
    pub fn first(&self, storage: &PageStorage) -> Result<BPTreeIter> {
        let leaf = self.first_leaf.read_addr(storage)?;
        self.pos_after(storage, leaf, 0)
    }

    /// Iterator at the largest entry, invalid when the tree is empty.
    pub fn last(&self, storage: &PageStorage) -> Result<BPTreeIter> {
        let leaf = self.last_leaf.read_addr(storage)?;
        self.pos_before(storage, leaf, usize::MAX)
    }

    /// Steps forward; stepping past the last entry yields an invalid iterator.
    pub fn next(&self, storage: &PageStorage, iter: BPTreeIter) -> Result<BPTreeIter> {
        if !self.check_iter(&iter, "next") {
            return Ok(BPTreeIter::INVALID);
        }
        self.resolve(storage, &iter)?;
        self.pos_after(storage, iter.leaf, iter.index() + 1)
    }

    /// Steps backward; stepping before the first entry yields an invalid
    /// iterator.
    pub fn prev(&self, storage: &PageStorage, iter: BPTreeIter) -> Result<BPTreeIter> {
        if !self.check_iter(&iter, "prev") {
            return Ok(BPTreeIter::INVALID);
        }
        self.resolve(storage, &iter)?;
        self.pos_before(storage, iter.leaf, iter.index())
    }

    /// Key bytes under the iterator, read in place from the leaf page.
    pub fn read_key<'s>(
        &self,
        storage: &'s PageStorage,
        iter: &BPTreeIter,
    ) -> Result<Option<&'s [u8]>> {
        if !self.check_iter(iter, "read_key") {
            return Ok(None);
        }
        let leaf = self.resolve(storage, iter)?;
        Ok(Some(page::leaf_key(leaf, &self.layout, iter.index())))
    }

    /// Value bytes under the iterator, read in place from the leaf page.
    pub fn read_value<'s>(
        &self,
        storage: &'s PageStorage,
        iter: &BPTreeIter,
    ) -> Result<Option<&'s [u8]>> {
        if !self.check_iter(iter, "read_value") {
            return Ok(None);
        }
        let leaf = self.resolve(storage, iter)?;
        Ok(Some(page::leaf_value(leaf, &self.layout, iter.index())))
    }

    /// Overwrites the value under the iterator in place.
    ///
    /// Keys do not move, so the stamp is left alone and other iterators stay
    /// valid. Returns `false` for a stale or invalid iterator.
    pub fn write_value(
        &self,
        storage: &mut PageStorage,
        iter: &BPTreeIter,
        value: &[u8],
    ) -> Result<bool> {
        if value.len() != self.layout.value_size {
            return Err(StoreError::Invalid("value has the wrong size"));
        }
        if !self.check_iter(iter, "write_value") {
            return Ok(false);
        }
        self.resolve(storage, iter)?;
        let leaf = storage.lookup_mut(iter.leaf)?;
        page::leaf_value_mut(leaf, &self.layout, iter.index()).copy_from_slice(value);
        Ok(true)
    }

    /// Visits every entry in key order until `visit` breaks.
    pub fn foreach<F>(&self, storage: &PageStorage, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    {
        let mut iter = self.first(storage)?;
        while iter.is_positioned() {
            let leaf = self.resolve(storage, &iter)?;
            let key = page::leaf_key(leaf, &self.layout, iter.index());
            let value = page::leaf_value(leaf, &self.layout, iter.index());
            if visit(key, value).is_break() {
                break;
            }
            iter = self.next(storage, iter)?;
        }
        Ok(())
    }

    /// Number of entries, counted along the leaf chain.
    pub fn len(&self, storage: &PageStorage) -> Result<usize> {
        let mut total = 0usize;
        let mut leaf = self.first_leaf.read_addr(storage)?;
        let mut steps = 0u64;
        while !leaf.is_null() {
            steps += 1;
            if steps > storage.num_pages() {
                return Err(StoreError::Corruption("leaf chain does not terminate"));
            }
            let node = storage.lookup(leaf)?;
            page::expect_leaf(node, &self.layout)?;
            total += page::count(node);
            leaf = page::leaf_next(node);
        }
        Ok(total)
    }

    /// Whether the tree holds no entries.
    pub fn is_empty(&self, storage: &PageStorage) -> Result<bool> {
        Ok(!self.first(storage)?.is_positioned())
    }

    /// Frees every page of the tree and deletes its atoms.
    ///
    /// Opening the same name afterwards creates a new, empty tree.
    pub fn destroy(self, storage: &mut PageStorage) -> Result<()> {
        let root = self.root.read_addr(storage)?;
        let mut pages = Vec::new();
        let mut level = vec![root];
        let mut depth = 0;
        while !level.is_empty() {
            depth += 1;
            if depth > MAX_DEPTH {
                return Err(StoreError::Corruption("tree deeper than the depth limit"));
            }
            let mut below = Vec::new();
            for addr in level {
                let node = storage.lookup(addr)?;
                if page::kind(node)? == NodeKind::Index {
                    page::expect_index(node, &self.layout)?;
                    let children = page::count(node);
                    below.extend((0..children).map(|i| page::index_child(node, &self.layout, i)));
                }
                pages.push(addr);
                if pages.len() as u64 > storage.num_pages() {
                    return Err(StoreError::Corruption("tree references more pages than exist"));
                }
            }
            level = below;
        }
        let freed = pages.len();
        for addr in pages {
            storage.free(addr)?;
        }
        self.root.delete(storage)?;
        self.first_leaf.delete(storage)?;
        self.last_leaf.delete(storage)?;
        debug!(tree = %self.name, pages = freed, "bptree.destroy");
        Ok(())
    }
}
