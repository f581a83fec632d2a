use tracing::warn;

use crate::primitives::bytes::ne;
use crate::types::{
    page::{
        arch_fingerprint, header, FILE_MAGIC, FOOTER_FIRST_USABLE, FOOTER_LEN, FOOTER_NEXT_PAGE,
        HEADER_LEN,
    },
    PageAddr, Result, StoreError,
};

/// Storage metadata persisted in the first bytes of page 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageHeader {
    /// Page size the storage was created with.
    pub page_size: u32,
    /// Head of the free-page LIFO list, or null when empty.
    pub free_head: PageAddr,
}

/// Formats page 0 of a fresh storage.
///
/// Besides the header fields this writes the atom footer of page 0, turning
/// the bytes between the header and the footer into the root page of the
/// global atom directory. The directory list starts out self-linked.
pub fn write_header(page0: &mut [u8], page_size: u32) {
    debug_assert_eq!(page0.len(), page_size as usize);
    page0.fill(0);
    page0[..FILE_MAGIC.len()].copy_from_slice(FILE_MAGIC);
    page0[header::ARCH].copy_from_slice(&arch_fingerprint());
    ne::put_u32(page0, header::PAGE_SIZE.start, page_size);
    ne::put_addr(page0, header::FREE_HEAD.start, PageAddr::NULL);
    let footer = page0.len() - FOOTER_LEN;
    ne::put_u64(page0, footer + FOOTER_FIRST_USABLE.start, HEADER_LEN as u64);
    ne::put_addr(page0, footer + FOOTER_NEXT_PAGE.start, PageAddr::NULL);
}

/// Validates the header of an existing file.
///
/// Mismatches are logged and reported as errors so the caller can decide to
/// recreate the file.
pub fn read_header(bytes: &[u8], expected_page_size: u32) -> Result<StorageHeader> {
    if bytes.len() < HEADER_LEN {
        warn!(len = bytes.len(), "pager.header.truncated");
        return Err(StoreError::BadMagic);
    }
    let magic = &bytes[header::MAGIC];
    let magic_ok = magic.starts_with(FILE_MAGIC)
        && magic[FILE_MAGIC.len()..].iter().all(|b| *b == 0);
    if !magic_ok {
        warn!("pager.header.bad_magic");
        return Err(StoreError::BadMagic);
    }
    let mut found = [0u8; 4];
    found.copy_from_slice(&bytes[header::ARCH]);
    let expected = arch_fingerprint();
    if found != expected {
        warn!(?expected, ?found, "pager.header.arch_mismatch");
        return Err(StoreError::ArchMismatch { expected, found });
    }
    let page_size = ne::get_u32(bytes, header::PAGE_SIZE.start);
    if page_size != expected_page_size {
        warn!(
            expected = expected_page_size,
            found = page_size,
            "pager.header.page_size_mismatch"
        );
        return Err(StoreError::PageSizeMismatch {
            expected: expected_page_size,
            found: page_size,
        });
    }
    if (bytes.len() as u64) < page_size as u64 {
        return Err(StoreError::Corruption("file shorter than its header page"));
    }
    let free_head = ne::get_addr(bytes, header::FREE_HEAD.start);
    if free_head.0 % page_size as u64 != 0 {
        return Err(StoreError::Corruption("free list head misaligned"));
    }
    Ok(StorageHeader {
        page_size,
        free_head,
    })
}

/// Reads the free-list head from page 0.
pub fn free_head(page0: &[u8]) -> PageAddr {
    ne::get_addr(page0, header::FREE_HEAD.start)
}

/// Stores a new free-list head in page 0.
pub fn set_free_head(page0: &mut [u8], head: PageAddr) {
    ne::put_addr(page0, header::FREE_HEAD.start, head);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_header_validates() {
        let mut buf = vec![0xFFu8; 256];
        write_header(&mut buf, 256);
        let hdr = read_header(&buf, 256).unwrap();
        assert_eq!(hdr.page_size, 256);
        assert!(hdr.free_head.is_null());
        assert_eq!(ne::get_u64(&buf, 256 - FOOTER_LEN), HEADER_LEN as u64);
    }

    #[test]
    fn corrupt_magic_is_reported() {
        let mut buf = vec![0u8; 128];
        write_header(&mut buf, 128);
        buf[0] = b'X';
        assert!(matches!(read_header(&buf, 128), Err(StoreError::BadMagic)));
        assert!(matches!(read_header(&buf[..10], 128), Err(StoreError::BadMagic)));
    }

    #[test]
    fn foreign_fingerprint_is_reported() {
        let mut buf = vec![0u8; 128];
        write_header(&mut buf, 128);
        buf[header::ARCH.start] ^= 0xFF;
        assert!(matches!(
            read_header(&buf, 128),
            Err(StoreError::ArchMismatch { .. })
        ));
    }

    #[test]
    fn page_size_must_match() {
        let mut buf = vec![0u8; 128];
        write_header(&mut buf, 128);
        match read_header(&buf, 256) {
            Err(StoreError::PageSizeMismatch { expected, found }) => {
                assert_eq!(expected, 256);
                assert_eq!(found, 128);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
