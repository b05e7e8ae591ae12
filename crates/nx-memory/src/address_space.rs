//! Page-table backed guest address space

use crate::constants::*;
use crate::guest::GuestMemory;
use crate::pages::{is_page_aligned, page_align_up, PageFlags};
use nx_core::error::{AccessKind, MemoryError};
use nx_core::VAddr;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Memory region descriptor returned by [`AddressSpace::query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Base address
    pub base: u64,
    /// Size in bytes
    pub size: u64,
    /// Page flags (empty for free regions)
    pub flags: PageFlags,
    /// Whether the region is backed by mapped pages
    pub mapped: bool,
}

impl MemoryRegion {
    /// One past the last byte of the region
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

struct Page {
    data: Box<[u8]>,
    flags: PageFlags,
}

impl Page {
    fn zeroed(flags: PageFlags) -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
            flags,
        }
    }
}

/// Piece of a guest access that falls inside a single page
#[derive(Debug, Clone, Copy)]
struct Chunk {
    page: u64,
    offset: usize,
    len: usize,
    pos: usize,
}

/// Splits `[addr, addr + len)` on page boundaries
struct PageChunks {
    addr: u64,
    len: usize,
    pos: usize,
}

impl PageChunks {
    fn new(addr: u64, len: usize) -> Self {
        Self { addr, len, pos: 0 }
    }
}

impl Iterator for PageChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.len {
            return None;
        }
        let addr = self.addr + self.pos as u64;
        let offset = (addr & PAGE_MASK) as usize;
        let len = (PAGE_SIZE as usize - offset).min(self.len - self.pos);
        let chunk = Chunk {
            page: addr >> PAGE_BITS,
            offset,
            len,
            pos: self.pos,
        };
        self.pos += len;
        Some(chunk)
    }
}

/// Guest virtual address space of a single process
///
/// Pages are allocated lazily on `map` and zero-filled. Reads take the shared
/// lock; writes and compare-exchanges take the exclusive lock, so a
/// compare-exchange is atomic with respect to every other store.
pub struct AddressSpace {
    pages: RwLock<BTreeMap<u64, Page>>,
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: RwLock::new(BTreeMap::new()),
        })
    }

    fn check_range(addr: u64, len: u64) -> Result<(), MemoryError> {
        match addr.checked_add(len) {
            Some(end) if end <= ADDRESS_SPACE_SIZE => Ok(()),
            _ => Err(MemoryError::InvalidAddress(addr)),
        }
    }

    fn check_mapping_args(addr: u64, size: u64) -> Result<u64, MemoryError> {
        if !is_page_aligned(addr) {
            return Err(MemoryError::AlignmentError {
                addr,
                align: PAGE_SIZE,
            });
        }
        if size == 0 {
            return Err(MemoryError::InvalidSize(size));
        }
        let size = page_align_up(size).ok_or(MemoryError::InvalidSize(size))?;
        Self::check_range(addr, size)?;
        Ok(size >> PAGE_BITS)
    }

    /// Map zero-filled pages covering `[addr, addr + size)`
    pub fn map(&self, addr: u64, size: u64, flags: PageFlags) -> Result<(), MemoryError> {
        let count = Self::check_mapping_args(addr, size)?;
        let first = addr >> PAGE_BITS;

        let mut pages = self.pages.write();
        if let Some((&page, _)) = pages.range(first..first + count).next() {
            return Err(MemoryError::AlreadyMapped(page << PAGE_BITS));
        }
        for page in first..first + count {
            pages.insert(page, Page::zeroed(flags));
        }

        tracing::debug!(
            "Mapped 0x{:x} bytes at 0x{:016x} ({:?})",
            count << PAGE_BITS,
            addr,
            flags
        );
        Ok(())
    }

    /// Unmap `[addr, addr + size)`; every page must currently be mapped
    pub fn unmap(&self, addr: u64, size: u64) -> Result<(), MemoryError> {
        let count = Self::check_mapping_args(addr, size)?;
        let first = addr >> PAGE_BITS;

        let mut pages = self.pages.write();
        if let Some(page) = (first..first + count).find(|p| !pages.contains_key(p)) {
            return Err(MemoryError::InvalidAddress(page << PAGE_BITS));
        }
        for page in first..first + count {
            pages.remove(&page);
        }

        tracing::debug!("Unmapped 0x{:x} bytes at 0x{:016x}", count << PAGE_BITS, addr);
        Ok(())
    }

    /// Change the protection of `[addr, addr + size)`
    pub fn protect(&self, addr: u64, size: u64, flags: PageFlags) -> Result<(), MemoryError> {
        let count = Self::check_mapping_args(addr, size)?;
        let first = addr >> PAGE_BITS;

        let mut pages = self.pages.write();
        if let Some(page) = (first..first + count).find(|p| !pages.contains_key(p)) {
            return Err(MemoryError::InvalidAddress(page << PAGE_BITS));
        }
        for (_, page) in pages.range_mut(first..first + count) {
            page.flags = flags;
        }

        tracing::trace!("Protected 0x{:016x}+0x{:x} as {:?}", addr, size, flags);
        Ok(())
    }

    /// Check if the page containing `addr` is mapped
    pub fn is_mapped(&self, addr: u64) -> bool {
        self.pages.read().contains_key(&(addr >> PAGE_BITS))
    }

    /// Total number of mapped bytes
    pub fn mapped_size(&self) -> u64 {
        (self.pages.read().len() as u64) << PAGE_BITS
    }

    /// Describe the region around `addr`.
    ///
    /// Mapped regions are maximal runs of contiguous pages with identical
    /// flags. Free regions span the gap between neighbouring mappings.
    /// Returns `None` outside the address space.
    pub fn query(&self, addr: u64) -> Option<MemoryRegion> {
        if addr >= ADDRESS_SPACE_SIZE {
            return None;
        }
        let index = addr >> PAGE_BITS;
        let pages = self.pages.read();

        let Some(page) = pages.get(&index) else {
            let first = pages
                .range(..index)
                .next_back()
                .map_or(0, |(&p, _)| p + 1);
            let end = pages
                .range(index..)
                .next()
                .map_or(ADDRESS_SPACE_SIZE >> PAGE_BITS, |(&p, _)| p);
            return Some(MemoryRegion {
                base: first << PAGE_BITS,
                size: (end - first) << PAGE_BITS,
                flags: PageFlags::empty(),
                mapped: false,
            });
        };

        let flags = page.flags;
        let mut first = index;
        for (&p, page) in pages.range(..index).rev() {
            if p + 1 != first || page.flags != flags {
                break;
            }
            first = p;
        }
        let mut last = index;
        for (&p, page) in pages.range(index + 1..) {
            if p != last + 1 || page.flags != flags {
                break;
            }
            last = p;
        }

        Some(MemoryRegion {
            base: first << PAGE_BITS,
            size: (last - first + 1) << PAGE_BITS,
            flags,
            mapped: true,
        })
    }

    /// Find the lowest unmapped, page-aligned range of `size` bytes inside
    /// `[region_base, region_base + region_size)`
    pub fn find_free_area(&self, region_base: u64, region_size: u64, size: u64) -> Option<u64> {
        let needed = page_align_up(size)? >> PAGE_BITS;
        let mut cursor = page_align_up(region_base)? >> PAGE_BITS;
        let end = region_base.checked_add(region_size)? >> PAGE_BITS;
        if needed == 0 {
            return None;
        }

        let pages = self.pages.read();
        for (&page, _) in pages.range(cursor..end) {
            if page - cursor >= needed {
                return Some(cursor << PAGE_BITS);
            }
            cursor = page + 1;
        }
        (end.saturating_sub(cursor) >= needed).then_some(cursor << PAGE_BITS)
    }

    fn validate(
        pages: &BTreeMap<u64, Page>,
        addr: u64,
        len: usize,
        required: PageFlags,
        kind: AccessKind,
    ) -> Result<(), MemoryError> {
        Self::check_range(addr, len as u64)?;
        for chunk in PageChunks::new(addr, len) {
            let fault = (chunk.page << PAGE_BITS) + chunk.offset as u64;
            match pages.get(&chunk.page) {
                None => return Err(MemoryError::InvalidAddress(fault)),
                Some(page) if !page.flags.contains(required) => {
                    return Err(MemoryError::AccessViolation { addr: fault, kind })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Read `buf.len()` bytes at `addr`. On error `buf` is left untouched.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let pages = self.pages.read();
        Self::validate(&pages, addr, buf.len(), PageFlags::READ, AccessKind::Read)?;
        for chunk in PageChunks::new(addr, buf.len()) {
            let page = &pages[&chunk.page];
            buf[chunk.pos..chunk.pos + chunk.len]
                .copy_from_slice(&page.data[chunk.offset..chunk.offset + chunk.len]);
        }
        Ok(())
    }

    /// Read `len` bytes into a fresh buffer
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at `addr`. Nothing is written unless every byte is
    /// mapped writable.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        let mut pages = self.pages.write();
        Self::validate(&pages, addr, data.len(), PageFlags::WRITE, AccessKind::Write)?;
        Self::copy_in(&mut pages, addr, data);
        Ok(())
    }

    /// Atomically replace `expected` with `new` at `addr`.
    ///
    /// Returns `Ok(false)` when the current contents differ from `expected`.
    pub fn compare_exchange(&self, addr: u64, expected: &[u8], new: &[u8]) -> Result<bool, MemoryError> {
        if expected.len() != new.len() {
            return Err(MemoryError::InvalidSize(new.len() as u64));
        }
        let mut pages = self.pages.write();
        Self::validate(&pages, addr, new.len(), PageFlags::RW, AccessKind::Write)?;

        let matches = PageChunks::new(addr, new.len()).all(|chunk| {
            pages[&chunk.page].data[chunk.offset..chunk.offset + chunk.len]
                == expected[chunk.pos..chunk.pos + chunk.len]
        });
        if matches {
            Self::copy_in(&mut pages, addr, new);
        }
        Ok(matches)
    }

    fn copy_in(pages: &mut BTreeMap<u64, Page>, addr: u64, data: &[u8]) {
        for chunk in PageChunks::new(addr, data.len()) {
            if let Some(page) = pages.get_mut(&chunk.page) {
                page.data[chunk.offset..chunk.offset + chunk.len]
                    .copy_from_slice(&data[chunk.pos..chunk.pos + chunk.len]);
            }
        }
    }
}

impl GuestMemory for AddressSpace {
    fn read_block(&self, addr: VAddr, buf: &mut [u8]) -> bool {
        match self.read(addr, buf) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("Guest read failed: {}", e);
                false
            }
        }
    }

    fn write_block(&self, addr: VAddr, data: &[u8]) -> bool {
        match self.write(addr, data) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!("Guest write failed: {}", e);
                false
            }
        }
    }

    fn compare_exchange_block(&self, addr: VAddr, expected: &[u8], new: &[u8]) -> bool {
        self.compare_exchange(addr, expected, new).unwrap_or(false)
    }

    fn page_flags(&self, addr: VAddr) -> Option<PageFlags> {
        self.pages.read().get(&(addr >> PAGE_BITS)).map(|p| p.flags)
    }
}
