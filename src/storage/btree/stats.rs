use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of B+ tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BPTreeStatsSnapshot {
    /// Number of root-to-leaf descents
    pub searches: u64,
    /// Number of index pages visited during descents
    pub index_visits: u64,
    /// Number of leaf splits performed
    pub leaf_splits: u64,
    /// Number of index splits performed
    pub index_splits: u64,
    /// Number of leaf merges performed
    pub leaf_merges: u64,
    /// Number of index merges performed
    pub index_merges: u64,
    /// Number of entries moved between sibling leaves
    pub leaf_borrows: u64,
    /// Number of children rotated between sibling index nodes
    pub index_borrows: u64,
    /// Number of times the tree grew a new root
    pub root_splits: u64,
    /// Number of times a single-child root was collapsed
    pub root_collapses: u64,
}

/// Per-handle counters for B+ tree operations.
///
/// Counters live on the handle and are not persisted.
#[derive(Default, Debug)]
pub struct BPTreeStats {
    searches: AtomicU64,
    index_visits: AtomicU64,
    leaf_splits: AtomicU64,
    index_splits: AtomicU64,
    leaf_merges: AtomicU64,
    index_merges: AtomicU64,
    leaf_borrows: AtomicU64,
    index_borrows: AtomicU64,
    root_splits: AtomicU64,
    root_collapses: AtomicU64,
}

impl BPTreeStats {
    /// Returns the number of root-to-leaf descents.
    pub fn searches(&self) -> u64 {
        self.searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of leaf splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of index splits.
    pub fn index_splits(&self) -> u64 {
        self.index_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of leaf merges.
    pub fn leaf_merges(&self) -> u64 {
        self.leaf_merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of index merges.
    pub fn index_merges(&self) -> u64 {
        self.index_merges.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_searches(&self) {
        self.searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_visits(&self) {
        self.index_visits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_splits(&self) {
        self.index_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_merges(&self) {
        self.leaf_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_merges(&self) {
        self.index_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_borrows(&self) {
        self.leaf_borrows.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_index_borrows(&self) {
        self.index_borrows.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_collapses(&self) {
        self.root_collapses.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BPTreeStatsSnapshot {
        BPTreeStatsSnapshot {
            searches: self.searches(),
            index_visits: self.index_visits.load(AtomicOrdering::Relaxed),
            leaf_splits: self.leaf_splits(),
            index_splits: self.index_splits(),
            leaf_merges: self.leaf_merges(),
            index_merges: self.index_merges(),
            leaf_borrows: self.leaf_borrows.load(AtomicOrdering::Relaxed),
            index_borrows: self.index_borrows.load(AtomicOrdering::Relaxed),
            root_splits: self.root_splits.load(AtomicOrdering::Relaxed),
            root_collapses: self.root_collapses.load(AtomicOrdering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self, tree: &str) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "rtgraph_store::bptree::stats",
            tree,
            searches = snapshot.searches,
            index_visits = snapshot.index_visits,
            leaf_splits = snapshot.leaf_splits,
            index_splits = snapshot.index_splits,
            leaf_merges = snapshot.leaf_merges,
            index_merges = snapshot.index_merges,
            leaf_borrows = snapshot.leaf_borrows,
            index_borrows = snapshot.index_borrows,
            root_splits = snapshot.root_splits,
            root_collapses = snapshot.root_collapses,
            "bptree stats snapshot"
        );
    }
}
