use std::path::Path;

use tracing::debug;

use crate::primitives::bytes::ne;
use crate::types::{PageAddr, Result, StoreError};

use super::backend::{Backend, BackendKind, MappedFile};
use super::meta;
use super::options::StorageOptions;

/// Fixed-size page allocator over a flat byte space.
///
/// Page 0 holds the storage header and the root of the global atom
/// directory; every other page is either on the free list or owned by a
/// caller. Free pages form a LIFO list whose next pointers live in the first
/// eight bytes of each free page, so the whole allocator state persists with
/// the pages themselves.
pub struct PageStorage {
    backend: Backend,
    page_size: usize,
    num_pages: u64,
    grow_margin: f64,
}

impl PageStorage {
    /// Creates an empty storage backed by a heap buffer.
    pub fn in_memory(options: &StorageOptions) -> Result<Self> {
        options.validate()?;
        let page_size = options.page_size as usize;
        let mut storage = Self {
            backend: Backend::InMemory(vec![0u8; page_size]),
            page_size,
            num_pages: 1,
            grow_margin: options.grow_margin_for(BackendKind::InMemory),
        };
        meta::write_header(storage.header_page_mut(), options.page_size);
        storage.reserve(options.initial_pages)?;
        debug!(page_size, "pager.in_memory.created");
        Ok(storage)
    }

    /// Opens a memory-mapped storage file, creating and formatting it when
    /// the file is missing or empty.
    ///
    /// An existing file must carry the expected magic, the architecture
    /// fingerprint of this build, and the configured page size. Validation
    /// failures are returned (and logged) so the caller may recreate the file.
    pub fn open_mapped(path: impl AsRef<Path>, options: &StorageOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let page_size = options.page_size as usize;
        let (mapped, fresh) = MappedFile::open(path, page_size)?;
        let backend = Backend::MemoryMapped(mapped);
        let len = backend.bytes().len();
        if !fresh {
            meta::read_header(backend.bytes(), options.page_size)?;
        }
        let mut storage = Self {
            backend,
            page_size,
            num_pages: (len / page_size) as u64,
            grow_margin: options.grow_margin_for(BackendKind::MemoryMapped),
        };
        if fresh {
            meta::write_header(storage.header_page_mut(), options.page_size);
            let pages = storage.num_pages;
            storage.push_range(1, pages);
            storage.reserve(options.initial_pages)?;
        }
        debug!(
            path = %path.display(),
            page_size,
            num_pages = storage.num_pages,
            fresh,
            "pager.mapped.opened"
        );
        Ok(storage)
    }

    /// Backend this storage runs on.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the byte space, header page included.
    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    /// Fraction of extra pages added on growth.
    pub fn grow_margin(&self) -> f64 {
        self.grow_margin
    }

    /// Highest valid page address.
    pub fn page_addr_max(&self) -> PageAddr {
        PageAddr((self.num_pages - 1) * self.page_size as u64)
    }

    /// Address of the global atom directory root (the header page).
    pub fn global_atoms(&self) -> PageAddr {
        PageAddr::NULL
    }

    /// Head of the free list.
    pub fn free_head(&self) -> PageAddr {
        meta::free_head(self.header_page())
    }

    /// Allocates a zero-filled page, growing the byte space when the free
    /// list is empty.
    pub fn alloc(&mut self) -> Result<PageAddr> {
        loop {
            let head = self.free_head();
            if !head.is_null() {
                let next = ne::get_addr(self.lookup(head)?, 0);
                if !next.is_null() {
                    self.check_addr(next)?;
                }
                meta::set_free_head(self.header_page_mut(), next);
                self.lookup_mut(head)?.fill(0);
                return Ok(head);
            }
            self.grow()?;
        }
    }

    /// Returns a page to the free list.
    pub fn free(&mut self, addr: PageAddr) -> Result<()> {
        if addr.is_null() {
            return Err(StoreError::Invalid("cannot free the header page"));
        }
        self.check_addr(addr)?;
        let head = self.free_head();
        ne::put_addr(self.lookup_mut(addr)?, 0, head);
        meta::set_free_head(self.header_page_mut(), addr);
        Ok(())
    }

    /// Read-only view of the page at `addr`.
    pub fn lookup(&self, addr: PageAddr) -> Result<&[u8]> {
        let start = self.check_addr(addr)?;
        Ok(&self.backend.bytes()[start..start + self.page_size])
    }

    /// Writable view of the page at `addr`.
    pub fn lookup_mut(&mut self, addr: PageAddr) -> Result<&mut [u8]> {
        let start = self.check_addr(addr)?;
        let page_size = self.page_size;
        Ok(&mut self.backend.bytes_mut()[start..start + page_size])
    }

    /// Grows the storage to hold at least `pages` pages, pushing every new
    /// page onto the free list. Requests smaller than the current size fail.
    pub fn resize(&mut self, pages: u64) -> Result<()> {
        if pages < self.num_pages {
            return Err(StoreError::Invalid("storage cannot shrink"));
        }
        if pages == self.num_pages {
            return Ok(());
        }
        let bytes = usize::try_from(pages)
            .ok()
            .and_then(|p| p.checked_mul(self.page_size))
            .ok_or(StoreError::Invalid("storage size overflows address space"))?;
        let old = self.num_pages;
        let len = self.backend.resize(bytes)?;
        let new = (len / self.page_size) as u64;
        self.push_range(old, new);
        self.num_pages = new;
        debug!(from = old, to = new, "pager.resize");
        Ok(())
    }

    /// Counts the pages on the free list.
    pub fn free_page_count(&self) -> Result<u64> {
        let mut count = 0u64;
        let mut cursor = self.free_head();
        while !cursor.is_null() {
            count += 1;
            if count >= self.num_pages {
                return Err(StoreError::Corruption("free list cycle"));
            }
            cursor = ne::get_addr(self.lookup(cursor)?, 0);
        }
        Ok(count)
    }

    /// Flushes mapped pages to disk. No-op for the in-memory backend.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }

    /// Flushes and releases the storage.
    pub fn close(self) -> Result<()> {
        self.backend.close()
    }

    fn reserve(&mut self, pages: u64) -> Result<()> {
        if pages > self.num_pages {
            self.resize(pages)?;
        }
        Ok(())
    }

    fn grow(&mut self) -> Result<()> {
        let wanted = self.num_pages + 1;
        let scaled = ((wanted as f64) * (1.0 + self.grow_margin)).ceil() as u64;
        debug!(
            num_pages = self.num_pages,
            target = scaled.max(wanted),
            "pager.alloc.grow"
        );
        self.resize(scaled.max(wanted))
    }

    /// Pushes pages `[from, to)` so the lowest address is popped first.
    fn push_range(&mut self, from: u64, to: u64) {
        let page_size = self.page_size as u64;
        for page_no in (from..to).rev() {
            let addr = PageAddr(page_no * page_size);
            let head = self.free_head();
            let start = addr.0 as usize;
            ne::put_addr(self.backend.bytes_mut(), start, head);
            meta::set_free_head(self.header_page_mut(), addr);
        }
    }

    fn check_addr(&self, addr: PageAddr) -> Result<usize> {
        if addr.0 % self.page_size as u64 != 0 {
            return Err(StoreError::Invalid("page address not page aligned"));
        }
        let max = self.page_addr_max();
        if addr > max {
            return Err(StoreError::AddressOutOfRange { addr, max });
        }
        Ok(addr.0 as usize)
    }

    fn header_page(&self) -> &[u8] {
        &self.backend.bytes()[..self.page_size]
    }

    fn header_page_mut(&mut self) -> &mut [u8] {
        let page_size = self.page_size;
        &mut self.backend.bytes_mut()[..page_size]
    }
}

impl std::fmt::Debug for PageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStorage")
            .field("backend", &self.backend.kind())
            .field("page_size", &self.page_size)
            .field("num_pages", &self.num_pages)
            .field("grow_margin", &self.grow_margin)
            .finish()
    }
}
