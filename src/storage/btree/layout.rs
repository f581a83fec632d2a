use crate::types::{
    page::{align_up, ALIGN},
    Result, StoreError,
};

/// Bytes before the key array of an index node: flags, child count, parent.
pub const INDEX_HEADER_LEN: usize = 16;
/// Bytes before the key array of a leaf node: flags, count, parent, origin,
/// previous and next leaf.
pub const LEAF_HEADER_LEN: usize = 40;

/// Byte offsets and element counts of index and leaf nodes for one
/// combination of page size, key size, and value size.
///
/// Computed once when a tree is opened; every node accessor takes it as a
/// parameter instead of casting page bytes to structs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeLayout {
    /// Page size the layout was computed for.
    pub page_size: usize,
    /// Size of every key in bytes.
    pub key_size: usize,
    /// Size of every value in bytes.
    pub value_size: usize,
    /// Offset of the key array in an index node.
    pub index_keys_off: usize,
    /// Offset of the child address array in an index node.
    pub index_children_off: usize,
    /// Maximum number of children of an index node.
    pub index_max_children: usize,
    /// Offset of the key ring in a leaf node.
    pub leaf_keys_off: usize,
    /// Offset of the value ring in a leaf node.
    pub leaf_values_off: usize,
    /// Number of entries a leaf ring holds.
    pub leaf_capacity: usize,
}

impl NodeLayout {
    /// Packs as many keys per page as fit once alignment padding is paid.
    ///
    /// Each count starts from an estimate that assumes the worst padding and
    /// then grows while the exact layout still fits.
    pub fn compute(page_size: usize, key_size: usize, value_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(StoreError::Invalid("key size must be non-zero"));
        }
        let slack = ALIGN - 1;

        let mut children = page_size
            .saturating_sub(INDEX_HEADER_LEN + slack)
            .saturating_add(key_size)
            / (key_size + 8);
        while index_fits(page_size, key_size, children + 1) {
            children += 1;
        }
        while children > 0 && !index_fits(page_size, key_size, children) {
            children -= 1;
        }

        let mut capacity =
            page_size.saturating_sub(LEAF_HEADER_LEN + slack) / (key_size + value_size);
        while leaf_fits(page_size, key_size, value_size, capacity + 1) {
            capacity += 1;
        }
        while capacity > 0 && !leaf_fits(page_size, key_size, value_size, capacity) {
            capacity -= 1;
        }

        if children < 3 {
            return Err(StoreError::Invalid("page too small for three index children"));
        }
        if capacity < 2 {
            return Err(StoreError::Invalid("page too small for two leaf entries"));
        }
        Ok(Self {
            page_size,
            key_size,
            value_size,
            index_keys_off: INDEX_HEADER_LEN,
            index_children_off: align_up(INDEX_HEADER_LEN + (children - 1) * key_size, ALIGN),
            index_max_children: children,
            leaf_keys_off: LEAF_HEADER_LEN,
            leaf_values_off: align_up(LEAF_HEADER_LEN + capacity * key_size, ALIGN),
            leaf_capacity: capacity,
        })
    }

    /// Bytes of one key/value pair.
    pub fn entry_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Fewest entries a leaf keeps while it has siblings.
    pub fn leaf_min(&self) -> usize {
        self.leaf_capacity / 2
    }

    /// Fewest children a non-root index node keeps.
    pub fn index_min_children(&self) -> usize {
        (self.index_max_children + 1) / 2
    }
}

fn index_fits(page_size: usize, key_size: usize, children: usize) -> bool {
    if children == 0 {
        return true;
    }
    align_up(INDEX_HEADER_LEN + (children - 1) * key_size, ALIGN) + children * 8 <= page_size
}

fn leaf_fits(page_size: usize, key_size: usize, value_size: usize, capacity: usize) -> bool {
    align_up(LEAF_HEADER_LEN + capacity * key_size, ALIGN) + capacity * value_size <= page_size
}
