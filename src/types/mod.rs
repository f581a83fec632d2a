#![forbid(unsafe_code)]
//! Shared identifiers, the crate error type, and on-disk layout constants.

use std::fmt;

/// Byte offset of a page inside a [`PageStorage`](crate::primitives::pager::PageStorage).
///
/// Addresses are always multiples of the storage page size. Address 0 is the
/// storage header page, which is never handed out by the allocator, so it
/// doubles as the null pointer inside tree nodes.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageAddr(pub u64);

impl PageAddr {
    /// The null address (also the header page).
    pub const NULL: PageAddr = PageAddr(0);

    /// Returns true for the null address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Decodes an address stored in native byte order.
    pub fn from_ne_bytes(bytes: [u8; 8]) -> Self {
        PageAddr(u64::from_ne_bytes(bytes))
    }

    /// Encodes the address in native byte order.
    pub fn to_ne_bytes(self) -> [u8; 8] {
        self.0.to_ne_bytes()
    }
}

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Errors produced by the page storage, atom directory, and B+-tree.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying file or mapping failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persistent data violates a structural invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed an argument the operation cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A page address lies past the end of the storage.
    #[error("page address {addr} beyond last page {max}")]
    AddressOutOfRange {
        /// Offending address.
        addr: PageAddr,
        /// Highest valid page address.
        max: PageAddr,
    },
    /// The mapped file does not start with the expected magic string.
    #[error("file magic mismatch")]
    BadMagic,
    /// The mapped file was written by an incompatible build.
    #[error("architecture fingerprint mismatch: expected {expected:02x?}, found {found:02x?}")]
    ArchMismatch {
        /// Fingerprint of the running build.
        expected: [u8; 4],
        /// Fingerprint stored in the file.
        found: [u8; 4],
    },
    /// The mapped file was created with a different page size.
    #[error("page size mismatch: expected {expected}, found {found}")]
    PageSizeMismatch {
        /// Page size requested by the caller.
        expected: u32,
        /// Page size persisted in the file header.
        found: u32,
    },
    /// Configuration text failed to parse.
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;

pub mod page {
    //! Byte layout of the storage header page and of atom page footers.

    use core::ops::Range;

    /// Magic string at the start of every mapped file, nul padded to [`header::MAGIC`].
    pub const FILE_MAGIC: &[u8] = b"RTGraph Database File v1";

    /// Smallest page size the storage accepts.
    pub const MIN_PAGE_SIZE: u32 = 64;

    /// Alignment of every on-page record and array.
    pub const ALIGN: usize = 8;

    /// Bytes reserved at the start of page 0 for the storage header.
    pub const HEADER_LEN: usize = 48;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        /// Nul-padded file magic.
        pub const MAGIC: Range<usize> = 0..32;
        /// Architecture fingerprint of the build that created the file.
        pub const ARCH: Range<usize> = 32..36;
        /// Page size as a native-endian `u32`.
        pub const PAGE_SIZE: Range<usize> = 36..40;
        /// Head of the free-page list.
        pub const FREE_HEAD: Range<usize> = 40..48;
    }

    /// Bytes at the tail of every atom-bearing page.
    pub const FOOTER_LEN: usize = 16;

    /// Offset of the first atom record, relative to the footer start.
    pub const FOOTER_FIRST_USABLE: Range<usize> = 0..8;
    /// Offset of the next page in the circular list, relative to the footer start.
    pub const FOOTER_NEXT_PAGE: Range<usize> = 8..16;

    /// Four bytes describing the data layout of the running build.
    pub fn arch_fingerprint() -> [u8; 4] {
        let endian = if cfg!(target_endian = "little") { 1 } else { 2 };
        [
            core::mem::align_of::<u64>() as u8,
            core::mem::size_of::<usize>() as u8,
            core::mem::align_of::<usize>() as u8,
            endian,
        ]
    }

    /// Rounds `value` up to the next multiple of `align` (a power of two).
    pub const fn align_up(value: usize, align: usize) -> usize {
        (value + align - 1) & !(align - 1)
    }

}
