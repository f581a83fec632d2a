use tracing::{debug, trace};

use super::{BPTree, MAX_DEPTH};
use crate::primitives::pager::PageStorage;
use crate::storage::btree::compare::KeyComparator;
use crate::storage::btree::page;
use crate::types::{PageAddr, Result, StoreError};

impl<C: KeyComparator> BPTree<C> {
    /// Links `right`, the new sibling split off `left`, into the parent of
    /// `left` under `separator`, splitting index nodes upwards as needed.
    pub(super) fn insert_into_parent(
        &mut self,
        storage: &mut PageStorage,
        mut left: PageAddr,
        mut separator: Vec<u8>,
        mut right: PageAddr,
    ) -> Result<()> {
        let layout = self.layout;
        for _ in 0..MAX_DEPTH {
            let parent = page::parent(storage.lookup(left)?);
            if parent.is_null() {
                return self.grow_root(storage, left, &separator, right);
            }
            let (pos, children) = {
                let node = storage.lookup(parent)?;
                page::expect_index(node, &layout)?;
                (page::child_position(node, &layout, left)?, page::count(node))
            };
            page::set_parent(storage.lookup_mut(right)?, parent);
            if children < layout.index_max_children {
                page::index_insert(storage.lookup_mut(parent)?, &layout, pos, &separator, right);
                return Ok(());
            }

            let mut contents = page::read_index(storage.lookup(parent)?, &layout);
            let ks = layout.key_size;
            contents.keys.splice(pos * ks..pos * ks, separator.iter().copied());
            contents.children.insert(pos + 1, right);

            let total = contents.children.len();
            let left_c = (total + 1) / 2;
            let promoted = contents.keys[(left_c - 1) * ks..left_c * ks].to_vec();
            let grandparent = page::parent(storage.lookup(parent)?);
            let sibling = storage.alloc()?;
            {
                let node = storage.lookup_mut(sibling)?;
                page::init_index(node, grandparent);
                page::write_index(
                    node,
                    &layout,
                    &contents.keys[left_c * ks..],
                    &contents.children[left_c..],
                );
            }
            page::write_index(
                storage.lookup_mut(parent)?,
                &layout,
                &contents.keys[..(left_c - 1) * ks],
                &contents.children[..left_c],
            );
            for child in &contents.children[left_c..] {
                page::set_parent(storage.lookup_mut(*child)?, sibling);
            }
            self.stats.inc_index_splits();
            trace!(
                target: "rtgraph_store::bptree::split",
                tree = %self.name,
                left = parent.0,
                right = sibling.0,
                left_children = left_c,
                right_children = total - left_c,
                "split index node"
            );

            left = parent;
            separator = promoted;
            right = sibling;
        }
        Err(StoreError::Corruption("tree deeper than the depth limit"))
    }

    /// Replaces the root with a new index node over `left` and `right`.
    fn grow_root(
        &mut self,
        storage: &mut PageStorage,
        left: PageAddr,
        separator: &[u8],
        right: PageAddr,
    ) -> Result<()> {
        let root = storage.alloc()?;
        {
            let node = storage.lookup_mut(root)?;
            page::init_index(node, PageAddr::NULL);
            page::write_index(node, &self.layout, separator, &[left, right]);
        }
        page::set_parent(storage.lookup_mut(left)?, root);
        page::set_parent(storage.lookup_mut(right)?, root);
        self.set_root(storage, root)?;
        self.stats.inc_root_splits();
        debug!(
            tree = %self.name,
            root = root.0,
            left = left.0,
            right = right.0,
            "bptree.root.split"
        );
        Ok(())
    }
}
