#![forbid(unsafe_code)]
//! Durable named values stored inline in storage pages.
//!
//! An atom list is a circular, singly-linked chain of pages. Each page ends
//! with a footer `{first_usable, next_page}`; the bytes between
//! `first_usable` and the footer are tiled by records:
//!
//! ```text
//! +--------+------------+----------------------+------------------+
//! | len:u32| vsize:u32  | key bytes, nul, pad  | value bytes, pad |
//! +--------+------------+----------------------+------------------+
//! ```
//!
//! A record whose first key byte is nul is free space. A zero length field
//! marks an untouched tail that is free up to the footer. Deleted records are
//! only coalesced when a later [`PageAtom::new`] scans past them.

use tracing::debug;

use crate::primitives::bytes::ne;
use crate::primitives::pager::PageStorage;
use crate::types::{
    page::{align_up, ALIGN, FOOTER_FIRST_USABLE, FOOTER_LEN, FOOTER_NEXT_PAGE},
    PageAddr, Result, StoreError,
};

const LEN_OFFSET: usize = 0;
const VSIZE_OFFSET: usize = 4;
const KEY_OFFSET: usize = 8;
/// Smallest record able to carry a key byte.
const MIN_RECORD: usize = KEY_OFFSET + ALIGN;
/// A free record is only split when the leftover is at least this large.
const SPLIT_REMAINDER: usize = 4 * ALIGN;

/// Handle to a live atom: the page it lives in and its byte offset there.
///
/// Handles stay valid until the atom is deleted; records never move.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PageAtom {
    page: PageAddr,
    offset: u32,
}

#[derive(Clone, Copy, Debug)]
struct Record {
    len: usize,
    live: bool,
}

#[derive(Clone, Copy, Debug)]
struct Footer {
    first_usable: usize,
    next: PageAddr,
}

impl PageAtom {
    /// Page holding the atom.
    pub fn page(&self) -> PageAddr {
        self.page
    }

    /// Byte offset of the atom record inside its page.
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Formats a fresh, empty, self-linked atom page and returns its address.
    pub fn create_list(storage: &mut PageStorage) -> Result<PageAddr> {
        let addr = storage.alloc()?;
        write_footer(
            storage.lookup_mut(addr)?,
            Footer {
                first_usable: 0,
                next: addr,
            },
        );
        Ok(addr)
    }

    /// Finds the live atom named `key` in the list starting at `initial`.
    pub fn find(storage: &PageStorage, initial: PageAddr, key: &str) -> Result<Option<PageAtom>> {
        let mut found = None;
        walk_list(storage, initial, |page_addr, page| {
            let footer = read_footer(page)?;
            let end = usable_end(page);
            let mut off = footer.first_usable;
            while off < end {
                let rec = read_record(page, off, end)?;
                if rec.live && record_key(page, off, rec.len)? == key.as_bytes() {
                    found = Some(PageAtom {
                        page: page_addr,
                        offset: off as u32,
                    });
                    return Ok(false);
                }
                off += rec.len;
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Creates an atom named `key` with a zeroed value of `value_size` bytes.
    ///
    /// The whole list is first searched for a free record of exactly the
    /// needed size. Failing that, the first free record that leaves a
    /// remainder large enough to stay useful is split. Adjacent free records
    /// are merged while scanning. When no page has room, a new page is linked
    /// in right after `initial`. Uniqueness of `key` is the caller's concern.
    pub fn new(
        storage: &mut PageStorage,
        initial: PageAddr,
        key: &str,
        value_size: usize,
    ) -> Result<PageAtom> {
        let needed = record_size(storage, key, value_size)?;
        let pages = list_pages(storage, initial)?;
        for fit in [Fit::Exact, Fit::Split] {
            for &page_addr in &pages {
                let page = storage.lookup_mut(page_addr)?;
                if let Some(off) = claim_in_page(page, needed, fit)? {
                    write_record(page, off, key, value_size);
                    return Ok(PageAtom {
                        page: page_addr,
                        offset: off as u32,
                    });
                }
            }
        }

        let addr = storage.alloc()?;
        let initial_footer = read_footer(storage.lookup(initial)?)?;
        {
            let page = storage.lookup_mut(addr)?;
            write_footer(
                page,
                Footer {
                    first_usable: 0,
                    next: initial_footer.next,
                },
            );
            let end = usable_end(page);
            let len = carve(page, 0, end, needed);
            debug_assert!(len >= needed);
            write_record(page, 0, key, value_size);
        }
        write_footer(
            storage.lookup_mut(initial)?,
            Footer {
                first_usable: initial_footer.first_usable,
                next: addr,
            },
        );
        debug!(initial = initial.0, page = addr.0, key, "atom.new.page_linked");
        Ok(PageAtom {
            page: addr,
            offset: 0,
        })
    }

    /// Tombstones the atom. Its space is reclaimed lazily by a later [`PageAtom::new`].
    pub fn delete(self, storage: &mut PageStorage) -> Result<()> {
        self.check_live(storage)?;
        let page = storage.lookup_mut(self.page)?;
        page[self.offset() + KEY_OFFSET] = 0;
        Ok(())
    }

    /// Finds `key`, creating it with `default` as its value on a miss.
    ///
    /// Returns the handle and whether the atom was created.
    pub fn find_or_create(
        storage: &mut PageStorage,
        initial: PageAddr,
        key: &str,
        default: &[u8],
    ) -> Result<(PageAtom, bool)> {
        if let Some(atom) = Self::find(storage, initial, key)? {
            return Ok((atom, false));
        }
        let atom = Self::new(storage, initial, key, default.len())?;
        atom.value_mut(storage)?.copy_from_slice(default);
        Ok((atom, true))
    }

    /// Lists every live atom in the list starting at `initial`, in scan order.
    pub fn iter(storage: &PageStorage, initial: PageAddr) -> Result<Vec<(String, PageAtom)>> {
        let mut out = Vec::new();
        walk_list(storage, initial, |page_addr, page| {
            let footer = read_footer(page)?;
            let end = usable_end(page);
            let mut off = footer.first_usable;
            while off < end {
                let rec = read_record(page, off, end)?;
                if rec.live {
                    let key = std::str::from_utf8(record_key(page, off, rec.len)?)
                        .map_err(|_| StoreError::Corruption("atom key is not utf-8"))?;
                    out.push((
                        key.to_owned(),
                        PageAtom {
                            page: page_addr,
                            offset: off as u32,
                        },
                    ));
                }
                off += rec.len;
            }
            Ok(true)
        })?;
        Ok(out)
    }

    /// The atom's key.
    pub fn key<'a>(&self, storage: &'a PageStorage) -> Result<&'a str> {
        let page = storage.lookup(self.page)?;
        let rec = self.check_live_in(page)?;
        std::str::from_utf8(record_key(page, self.offset(), rec.len)?)
            .map_err(|_| StoreError::Corruption("atom key is not utf-8"))
    }

    /// The atom's value bytes.
    pub fn value<'a>(&self, storage: &'a PageStorage) -> Result<&'a [u8]> {
        let page = storage.lookup(self.page)?;
        let rec = self.check_live_in(page)?;
        let range = value_range(page, self.offset(), rec.len)?;
        Ok(&page[range])
    }

    /// Mutable access to the atom's value bytes.
    pub fn value_mut<'a>(&self, storage: &'a mut PageStorage) -> Result<&'a mut [u8]> {
        let page = storage.lookup_mut(self.page)?;
        let rec = self.check_live_in(page)?;
        let range = value_range(page, self.offset(), rec.len)?;
        Ok(&mut page[range])
    }

    /// Reads an 8-byte page address value.
    pub fn read_addr(&self, storage: &PageStorage) -> Result<PageAddr> {
        let value = self.value(storage)?;
        if value.len() != 8 {
            return Err(StoreError::Corruption("atom does not hold a page address"));
        }
        Ok(ne::get_addr(value, 0))
    }

    /// Stores an 8-byte page address value.
    pub fn write_addr(&self, storage: &mut PageStorage, addr: PageAddr) -> Result<()> {
        let value = self.value_mut(storage)?;
        if value.len() != 8 {
            return Err(StoreError::Corruption("atom does not hold a page address"));
        }
        ne::put_addr(value, 0, addr);
        Ok(())
    }

    fn check_live(&self, storage: &PageStorage) -> Result<Record> {
        self.check_live_in(storage.lookup(self.page)?)
    }

    fn check_live_in(&self, page: &[u8]) -> Result<Record> {
        let end = usable_end(page);
        let off = self.offset();
        if off % ALIGN != 0 || off >= end {
            return Err(StoreError::Invalid("atom offset outside usable area"));
        }
        let rec = read_record(page, off, end)?;
        if !rec.live {
            return Err(StoreError::Invalid("atom has been deleted"));
        }
        Ok(rec)
    }
}

fn record_size(storage: &PageStorage, key: &str, value_size: usize) -> Result<usize> {
    if key.is_empty() {
        return Err(StoreError::Invalid("atom key must not be empty"));
    }
    if key.as_bytes().contains(&0) {
        return Err(StoreError::Invalid("atom key must not contain nul"));
    }
    let needed = KEY_OFFSET + align_up(key.len() + 1, ALIGN) + align_up(value_size, ALIGN);
    if needed > storage.page_size() - FOOTER_LEN || value_size > u32::MAX as usize {
        return Err(StoreError::Invalid("atom does not fit in a page"));
    }
    Ok(needed)
}

/// Collects the pages of the list in scan order, starting with `initial`.
fn list_pages(storage: &PageStorage, initial: PageAddr) -> Result<Vec<PageAddr>> {
    let mut pages = Vec::new();
    walk_list(storage, initial, |addr, _| {
        pages.push(addr);
        Ok(true)
    })?;
    Ok(pages)
}

/// Visits every page of the circular list until `visit` returns `false` or
/// the walk arrives back at `initial`.
fn walk_list<F>(storage: &PageStorage, initial: PageAddr, mut visit: F) -> Result<()>
where
    F: FnMut(PageAddr, &[u8]) -> Result<bool>,
{
    let mut current = initial;
    let mut steps = 0u64;
    loop {
        let page = storage.lookup(current)?;
        if !visit(current, page)? {
            return Ok(());
        }
        let next = read_footer(page)?.next;
        if next == initial {
            return Ok(());
        }
        steps += 1;
        if steps >= storage.num_pages() {
            return Err(StoreError::Corruption("atom page list does not return to its start"));
        }
        current = next;
    }
}

fn usable_end(page: &[u8]) -> usize {
    page.len() - FOOTER_LEN
}

fn read_footer(page: &[u8]) -> Result<Footer> {
    let base = usable_end(page);
    let first_usable = ne::get_u64(page, base + FOOTER_FIRST_USABLE.start);
    if first_usable > base as u64 || first_usable as usize % ALIGN != 0 {
        return Err(StoreError::Corruption("atom footer start out of range"));
    }
    Ok(Footer {
        first_usable: first_usable as usize,
        next: ne::get_addr(page, base + FOOTER_NEXT_PAGE.start),
    })
}

fn write_footer(page: &mut [u8], footer: Footer) {
    let base = usable_end(page);
    ne::put_u64(page, base + FOOTER_FIRST_USABLE.start, footer.first_usable as u64);
    ne::put_addr(page, base + FOOTER_NEXT_PAGE.start, footer.next);
}

fn read_record(page: &[u8], off: usize, end: usize) -> Result<Record> {
    let raw = ne::get_u32(page, off + LEN_OFFSET) as usize;
    if raw == 0 {
        return Ok(Record {
            len: end - off,
            live: false,
        });
    }
    if raw % ALIGN != 0 || off + raw > end {
        return Err(StoreError::Corruption("atom record length out of range"));
    }
    let live = raw >= MIN_RECORD && page[off + KEY_OFFSET] != 0;
    Ok(Record { len: raw, live })
}

fn record_key(page: &[u8], off: usize, len: usize) -> Result<&[u8]> {
    let region = &page[off + KEY_OFFSET..off + len];
    let nul = region
        .iter()
        .position(|b| *b == 0)
        .ok_or(StoreError::Corruption("atom key is not terminated"))?;
    Ok(&region[..nul])
}

fn value_range(page: &[u8], off: usize, len: usize) -> Result<std::ops::Range<usize>> {
    let key_len = record_key(page, off, len)?.len();
    let start = off + KEY_OFFSET + align_up(key_len + 1, ALIGN);
    let size = ne::get_u32(page, off + VSIZE_OFFSET) as usize;
    if start + size > off + len {
        return Err(StoreError::Corruption("atom value exceeds its record"));
    }
    Ok(start..start + size)
}

/// Which free records a scan may claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fit {
    /// Only records of exactly the needed length.
    Exact,
    /// Exact records, or records leaving at least [`SPLIT_REMAINDER`] bytes.
    Split,
}

/// Scans one page for a free record able to host `needed` bytes under `fit`,
/// merging runs of free records on the way. Returns the claimed offset.
fn claim_in_page(page: &mut [u8], needed: usize, fit: Fit) -> Result<Option<usize>> {
    let footer = read_footer(page)?;
    let end = usable_end(page);
    let mut off = footer.first_usable;
    while off < end {
        let rec = read_record(page, off, end)?;
        if rec.live {
            off += rec.len;
            continue;
        }
        let mut len = rec.len;
        while off + len < end {
            let next = read_record(page, off + len, end)?;
            if next.live {
                break;
            }
            len += next.len;
        }
        if len != rec.len {
            ne::put_u32(page, off + LEN_OFFSET, len as u32);
            page[off + KEY_OFFSET] = 0;
        }
        if len == needed || (fit == Fit::Split && len >= needed + SPLIT_REMAINDER) {
            carve(page, off, off + len, needed);
            if len != needed {
                debug!(offset = off, free = len, needed, "atom.new.split");
            }
            return Ok(Some(off));
        }
        off += len;
    }
    Ok(None)
}

/// Reserves `needed` bytes at `off` out of the free span `[off, end)`.
///
/// The leftover becomes a new free record when it is worth keeping;
/// otherwise the claimed record absorbs it. Returns the claimed length.
fn carve(page: &mut [u8], off: usize, end: usize, needed: usize) -> usize {
    let span = end - off;
    let len = if span - needed >= SPLIT_REMAINDER {
        let rest = off + needed;
        ne::put_u32(page, rest + LEN_OFFSET, (span - needed) as u32);
        page[rest + KEY_OFFSET] = 0;
        needed
    } else {
        span
    };
    ne::put_u32(page, off + LEN_OFFSET, len as u32);
    len
}

fn write_record(page: &mut [u8], off: usize, key: &str, value_size: usize) {
    let len = ne::get_u32(page, off + LEN_OFFSET) as usize;
    ne::put_u32(page, off + VSIZE_OFFSET, value_size as u32);
    let body = &mut page[off + KEY_OFFSET..off + len];
    body.fill(0);
    body[..key.len()].copy_from_slice(key.as_bytes());
}
