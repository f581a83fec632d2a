//! Page-resident data structures built on [`PageStorage`](crate::primitives::pager::PageStorage).

/// Named fixed-size values stored in circular page lists.
pub mod atom;

/// B+ tree with fixed-size keys and values.
pub mod btree;
