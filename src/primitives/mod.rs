//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, file operations, and the page allocator.

/// Byte-level utilities.
///
/// Fixed-width native-endian field access used by every on-page structure.
pub mod bytes;

/// File helpers for the memory-mapped backend.
pub mod io;

/// Page allocation over in-memory or memory-mapped byte spaces.
pub mod pager;
