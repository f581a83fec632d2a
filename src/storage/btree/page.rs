//! Node accessors over raw page bytes.
//!
//! Index node:
//!
//! ```text
//! +---------+-------------+----------+------------------+---------------------+
//! |flags:u32|children:u32 |parent:u64| keys[children-1] | pad | child:u64[..] |
//! +---------+-------------+----------+------------------+---------------------+
//! ```
//!
//! Leaf node:
//!
//! ```text
//! +---------+---------+----------+----------+-----+--------+--------+---------+-----+-----------+
//! |flags:u32|count:u32|parent:u64|origin:u32| pad |prev:u64|next:u64|key ring | pad |value ring |
//! +---------+---------+----------+----------+-----+--------+--------+---------+-----+-----------+
//! ```
//!
//! Leaf entries live in a ring: logical entry `i` is stored in slot
//! `(origin + i) % capacity`, so inserting or removing near either end moves
//! only the shorter side.

use crate::primitives::bytes::ne;
use crate::types::{PageAddr, Result, StoreError};

use super::layout::NodeLayout;

const FLAGS_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const PARENT_OFFSET: usize = 8;
const ORIGIN_OFFSET: usize = 16;
const PREV_OFFSET: usize = 24;
const NEXT_OFFSET: usize = 32;

const FLAG_INDEX: u32 = 1;
const FLAG_LEAF: u32 = 2;

/// Kind of a tree page, decoded from its flags word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum NodeKind {
    Index,
    Leaf,
}

pub(crate) fn kind(page: &[u8]) -> Result<NodeKind> {
    match ne::get_u32(page, FLAGS_OFFSET) {
        FLAG_INDEX => Ok(NodeKind::Index),
        FLAG_LEAF => Ok(NodeKind::Leaf),
        _ => Err(StoreError::Corruption("page is not a tree node")),
    }
}

pub(crate) fn expect_leaf(page: &[u8], layout: &NodeLayout) -> Result<()> {
    if kind(page)? != NodeKind::Leaf {
        return Err(StoreError::Corruption("expected a leaf node"));
    }
    if count(page) > layout.leaf_capacity
        || ne::get_u32(page, ORIGIN_OFFSET) as usize >= layout.leaf_capacity
    {
        return Err(StoreError::Corruption("leaf header out of range"));
    }
    Ok(())
}

pub(crate) fn expect_index(page: &[u8], layout: &NodeLayout) -> Result<()> {
    if kind(page)? != NodeKind::Index {
        return Err(StoreError::Corruption("expected an index node"));
    }
    let children = count(page);
    if children == 0 || children > layout.index_max_children {
        return Err(StoreError::Corruption("index child count out of range"));
    }
    Ok(())
}

pub(crate) fn init_index(page: &mut [u8], parent: PageAddr) {
    page.fill(0);
    ne::put_u32(page, FLAGS_OFFSET, FLAG_INDEX);
    set_parent(page, parent);
}

pub(crate) fn init_leaf(page: &mut [u8], parent: PageAddr) {
    page.fill(0);
    ne::put_u32(page, FLAGS_OFFSET, FLAG_LEAF);
    set_parent(page, parent);
}

/// Entry count of a leaf or child count of an index node.
pub(crate) fn count(page: &[u8]) -> usize {
    ne::get_u32(page, COUNT_OFFSET) as usize
}

pub(crate) fn set_count(page: &mut [u8], count: usize) {
    ne::put_u32(page, COUNT_OFFSET, count as u32);
}

pub(crate) fn parent(page: &[u8]) -> PageAddr {
    ne::get_addr(page, PARENT_OFFSET)
}

pub(crate) fn set_parent(page: &mut [u8], parent: PageAddr) {
    ne::put_addr(page, PARENT_OFFSET, parent);
}

// --- index nodes ---

pub(crate) fn index_key<'a>(page: &'a [u8], layout: &NodeLayout, i: usize) -> &'a [u8] {
    let start = layout.index_keys_off + i * layout.key_size;
    &page[start..start + layout.key_size]
}

pub(crate) fn index_child(page: &[u8], layout: &NodeLayout, i: usize) -> PageAddr {
    ne::get_addr(page, layout.index_children_off + i * 8)
}

pub(crate) fn set_index_child(page: &mut [u8], layout: &NodeLayout, i: usize, child: PageAddr) {
    ne::put_addr(page, layout.index_children_off + i * 8, child);
}

pub(crate) fn set_index_key(page: &mut [u8], layout: &NodeLayout, i: usize, key: &[u8]) {
    let start = layout.index_keys_off + i * layout.key_size;
    page[start..start + layout.key_size].copy_from_slice(key);
}

/// Position of `child` among the children of an index node.
pub(crate) fn child_position(page: &[u8], layout: &NodeLayout, child: PageAddr) -> Result<usize> {
    (0..count(page))
        .find(|i| index_child(page, layout, *i) == child)
        .ok_or(StoreError::Corruption("child missing from its parent"))
}

/// Inserts separator `key` at key position `pos` and `child` right after it.
pub(crate) fn index_insert(
    page: &mut [u8],
    layout: &NodeLayout,
    pos: usize,
    key: &[u8],
    child: PageAddr,
) {
    let children = count(page);
    debug_assert!(children < layout.index_max_children);
    let ks = layout.key_size;
    let keys_from = layout.index_keys_off + pos * ks;
    let keys_to = layout.index_keys_off + (children - 1) * ks;
    page.copy_within(keys_from..keys_to, keys_from + ks);
    page[keys_from..keys_from + ks].copy_from_slice(key);
    let child_from = layout.index_children_off + (pos + 1) * 8;
    let child_to = layout.index_children_off + children * 8;
    page.copy_within(child_from..child_to, child_from + 8);
    ne::put_addr(page, child_from, child);
    set_count(page, children + 1);
}

/// Removes the separator at key position `pos` and the child right after it.
pub(crate) fn index_remove(page: &mut [u8], layout: &NodeLayout, pos: usize) {
    let children = count(page);
    debug_assert!(children >= 2 && pos < children - 1);
    let ks = layout.key_size;
    let keys_at = layout.index_keys_off + pos * ks;
    let keys_end = layout.index_keys_off + (children - 1) * ks;
    page.copy_within(keys_at + ks..keys_end, keys_at);
    let child_at = layout.index_children_off + (pos + 1) * 8;
    let child_end = layout.index_children_off + children * 8;
    page.copy_within(child_at + 8..child_end, child_at);
    set_count(page, children - 1);
}

/// Separators and children of an index node, copied out.
pub(crate) struct IndexContents {
    pub keys: Vec<u8>,
    pub children: Vec<PageAddr>,
}

pub(crate) fn read_index(page: &[u8], layout: &NodeLayout) -> IndexContents {
    let children = count(page);
    let start = layout.index_keys_off;
    let keys = page[start..start + children.saturating_sub(1) * layout.key_size].to_vec();
    let children = (0..children).map(|i| index_child(page, layout, i)).collect();
    IndexContents { keys, children }
}

pub(crate) fn write_index(page: &mut [u8], layout: &NodeLayout, keys: &[u8], children: &[PageAddr]) {
    debug_assert_eq!(keys.len(), (children.len() - 1) * layout.key_size);
    debug_assert!(children.len() <= layout.index_max_children);
    let start = layout.index_keys_off;
    page[start..start + keys.len()].copy_from_slice(keys);
    for (i, child) in children.iter().enumerate() {
        set_index_child(page, layout, i, *child);
    }
    set_count(page, children.len());
}

// --- leaf nodes ---

pub(crate) fn leaf_origin(page: &[u8]) -> usize {
    ne::get_u32(page, ORIGIN_OFFSET) as usize
}

fn set_leaf_origin(page: &mut [u8], origin: usize) {
    ne::put_u32(page, ORIGIN_OFFSET, origin as u32);
}

pub(crate) fn leaf_prev(page: &[u8]) -> PageAddr {
    ne::get_addr(page, PREV_OFFSET)
}

pub(crate) fn set_leaf_prev(page: &mut [u8], prev: PageAddr) {
    ne::put_addr(page, PREV_OFFSET, prev);
}

pub(crate) fn leaf_next(page: &[u8]) -> PageAddr {
    ne::get_addr(page, NEXT_OFFSET)
}

pub(crate) fn set_leaf_next(page: &mut [u8], next: PageAddr) {
    ne::put_addr(page, NEXT_OFFSET, next);
}

/// Ring slot of logical entry `i`.
pub(crate) fn slot(page: &[u8], layout: &NodeLayout, i: usize) -> usize {
    (leaf_origin(page) + i) % layout.leaf_capacity
}

/// Ring slot of the last logical entry, if any.
pub(crate) fn leaf_last_slot(page: &[u8], layout: &NodeLayout) -> Option<usize> {
    count(page).checked_sub(1).map(|last| slot(page, layout, last))
}

fn key_range(layout: &NodeLayout, slot: usize) -> std::ops::Range<usize> {
    let start = layout.leaf_keys_off + slot * layout.key_size;
    start..start + layout.key_size
}

fn value_range(layout: &NodeLayout, slot: usize) -> std::ops::Range<usize> {
    let start = layout.leaf_values_off + slot * layout.value_size;
    start..start + layout.value_size
}

/// Key stored in ring slot `slot`.
pub(crate) fn slot_key<'a>(page: &'a [u8], layout: &NodeLayout, slot: usize) -> &'a [u8] {
    &page[key_range(layout, slot)]
}

/// Key of logical entry `i`.
pub(crate) fn leaf_key<'a>(page: &'a [u8], layout: &NodeLayout, i: usize) -> &'a [u8] {
    slot_key(page, layout, slot(page, layout, i))
}

/// Value of logical entry `i`.
pub(crate) fn leaf_value<'a>(page: &'a [u8], layout: &NodeLayout, i: usize) -> &'a [u8] {
    &page[value_range(layout, slot(page, layout, i))]
}

pub(crate) fn leaf_value_mut<'a>(page: &'a mut [u8], layout: &NodeLayout, i: usize) -> &'a mut [u8] {
    let range = value_range(layout, slot(page, layout, i));
    &mut page[range]
}

fn move_slot(page: &mut [u8], layout: &NodeLayout, from: usize, to: usize) {
    let src = key_range(layout, from);
    page.copy_within(src, key_range(layout, to).start);
    let src = value_range(layout, from);
    page.copy_within(src, value_range(layout, to).start);
}

fn write_slot(page: &mut [u8], layout: &NodeLayout, slot: usize, key: &[u8], value: &[u8]) {
    page[key_range(layout, slot)].copy_from_slice(key);
    page[value_range(layout, slot)].copy_from_slice(value);
}

/// Inserts an entry at logical position `pos`, shifting whichever side of
/// the ring is shorter. The leaf must not be full.
pub(crate) fn leaf_insert(page: &mut [u8], layout: &NodeLayout, pos: usize, key: &[u8], value: &[u8]) {
    let n = count(page);
    let cap = layout.leaf_capacity;
    debug_assert!(n < cap && pos <= n);
    let origin = leaf_origin(page);
    if n - pos <= pos {
        for i in (pos..n).rev() {
            move_slot(page, layout, (origin + i) % cap, (origin + i + 1) % cap);
        }
        write_slot(page, layout, (origin + pos) % cap, key, value);
    } else {
        let new_origin = (origin + cap - 1) % cap;
        for i in 0..pos {
            move_slot(page, layout, (origin + i) % cap, (new_origin + i) % cap);
        }
        set_leaf_origin(page, new_origin);
        write_slot(page, layout, (new_origin + pos) % cap, key, value);
    }
    set_count(page, n + 1);
}

/// Removes the entry at logical position `pos`, closing the gap from the
/// shorter side.
pub(crate) fn leaf_remove(page: &mut [u8], layout: &NodeLayout, pos: usize) {
    let n = count(page);
    let cap = layout.leaf_capacity;
    debug_assert!(pos < n);
    let origin = leaf_origin(page);
    if n - 1 - pos <= pos {
        for i in pos + 1..n {
            move_slot(page, layout, (origin + i) % cap, (origin + i - 1) % cap);
        }
    } else {
        for i in (0..pos).rev() {
            move_slot(page, layout, (origin + i) % cap, (origin + i + 1) % cap);
        }
        set_leaf_origin(page, (origin + 1) % cap);
    }
    set_count(page, n - 1);
    if n == 1 {
        set_leaf_origin(page, 0);
    }
}

/// Keys and values of a leaf in logical order, each packed back to back.
pub(crate) struct LeafContents {
    pub keys: Vec<u8>,
    pub values: Vec<u8>,
}

impl LeafContents {
    pub(crate) fn len(&self, layout: &NodeLayout) -> usize {
        self.keys.len() / layout.key_size
    }
}

pub(crate) fn read_leaf(page: &[u8], layout: &NodeLayout) -> LeafContents {
    let n = count(page);
    let mut keys = Vec::with_capacity(n * layout.key_size);
    let mut values = Vec::with_capacity(n * layout.value_size);
    for i in 0..n {
        keys.extend_from_slice(leaf_key(page, layout, i));
        values.extend_from_slice(leaf_value(page, layout, i));
    }
    LeafContents { keys, values }
}

/// Rewrites the entries of a leaf from packed keys and values, resetting the
/// ring origin to slot 0. Header links are left alone.
pub(crate) fn write_leaf(page: &mut [u8], layout: &NodeLayout, keys: &[u8], values: &[u8]) {
    let n = keys.len() / layout.key_size;
    debug_assert!(n <= layout.leaf_capacity);
    debug_assert_eq!(values.len(), n * layout.value_size);
    let start = layout.leaf_keys_off;
    page[start..start + keys.len()].copy_from_slice(keys);
    let start = layout.leaf_values_off;
    page[start..start + values.len()].copy_from_slice(values);
    set_leaf_origin(page, 0);
    set_count(page, n);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> NodeLayout {
        NodeLayout::compute(256, 4, 4).unwrap()
    }

    fn keys(page: &[u8], layout: &NodeLayout) -> Vec<u32> {
        (0..count(page))
            .map(|i| ne::get_u32(leaf_key(page, layout, i), 0))
            .collect()
    }

    fn insert(page: &mut [u8], layout: &NodeLayout, pos: usize, k: u32) {
        leaf_insert(page, layout, pos, &k.to_ne_bytes(), &(k * 10).to_ne_bytes());
    }

    #[test]
    fn ring_insert_front_wraps_origin() {
        let layout = layout();
        let mut page = vec![0u8; 256];
        init_leaf(&mut page, PageAddr::NULL);
        insert(&mut page, &layout, 0, 5);
        insert(&mut page, &layout, 1, 6);
        insert(&mut page, &layout, 0, 4);
        assert_eq!(leaf_origin(&page), layout.leaf_capacity - 1);
        insert(&mut page, &layout, 0, 3);
        assert_eq!(keys(&page, &layout), vec![3, 4, 5, 6]);
        assert_eq!(
            ne::get_u32(leaf_value(&page, &layout, 1), 0),
            40,
            "values travel with keys"
        );
        assert_eq!(leaf_last_slot(&page, &layout), Some(1));
    }

    #[test]
    fn ring_fills_to_capacity_in_any_order() {
        let layout = layout();
        let cap = layout.leaf_capacity;
        let mut page = vec![0u8; 256];
        init_leaf(&mut page, PageAddr::NULL);
        let mut model: Vec<u32> = Vec::new();
        for k in 0..cap as u32 {
            let pos = (k as usize * 7) % (model.len() + 1);
            insert(&mut page, &layout, pos, k);
            model.insert(pos, k);
            assert_eq!(keys(&page, &layout), model);
        }
        while !model.is_empty() {
            let pos = (model.len() * 5 / 7) % model.len();
            leaf_remove(&mut page, &layout, pos);
            model.remove(pos);
            assert_eq!(keys(&page, &layout), model);
        }
        assert_eq!(leaf_origin(&page), 0);
    }

    #[test]
    fn write_leaf_normalizes_ring() {
        let layout = layout();
        let mut page = vec![0u8; 256];
        init_leaf(&mut page, PageAddr::NULL);
        for k in [2u32, 1, 0] {
            insert(&mut page, &layout, 0, k);
        }
        let contents = read_leaf(&page, &layout);
        assert_eq!(contents.len(&layout), 3);
        write_leaf(&mut page, &layout, &contents.keys, &contents.values);
        assert_eq!(leaf_origin(&page), 0);
        assert_eq!(keys(&page, &layout), vec![0, 1, 2]);
    }

    #[test]
    fn index_insert_and_remove_shift_children() {
        let layout = layout();
        let mut page = vec![0u8; 256];
        init_index(&mut page, PageAddr::NULL);
        write_index(&mut page, &layout, &[], &[PageAddr(256)]);
        index_insert(&mut page, &layout, 0, &20u32.to_ne_bytes(), PageAddr(768));
        index_insert(&mut page, &layout, 0, &10u32.to_ne_bytes(), PageAddr(512));
        let contents = read_index(&page, &layout);
        assert_eq!(
            contents.children,
            vec![PageAddr(256), PageAddr(512), PageAddr(768)]
        );
        assert_eq!(ne::get_u32(index_key(&page, &layout, 1), 0), 20);
        assert_eq!(child_position(&page, &layout, PageAddr(768)).unwrap(), 2);
        index_remove(&mut page, &layout, 0);
        assert_eq!(count(&page), 2);
        assert_eq!(index_child(&page, &layout, 1), PageAddr(768));
        assert_eq!(ne::get_u32(index_key(&page, &layout, 0), 0), 20);
        assert!(child_position(&page, &layout, PageAddr(512)).is_err());
    }

    #[test]
    fn kind_rejects_garbage() {
        let layout = layout();
        let page = vec![0xFFu8; 256];
        assert!(matches!(kind(&page), Err(StoreError::Corruption(_))));
        let mut leaf = vec![0u8; 256];
        init_leaf(&mut leaf, PageAddr::NULL);
        assert!(expect_leaf(&leaf, &layout).is_ok());
        assert!(expect_index(&leaf, &layout).is_err());
    }
}
