//! # Per-core free lists over an external link table
//!
//! Free pages are chained by page index rather than by pointers written into
//! the pages themselves. The links live in a table of `u32` words carved from
//! the head of the managed range, one word per page:
//!
//! ```text
//! start                                                       end
//! +-------------+----------+----------+----------+-- ... --+
//! | link table  | page 0   | page 1   | page 2   |         |
//! +-------------+----------+----------+----------+-- ... --+
//!   ^ links[i] belongs to page i
//! ```
//!
//! Each word is either the index of the next free page, [`END`] for the last
//! free page of a list, or [`ALLOCATED`] while the page is handed out. That
//! leaves every byte of a freed page to the junk fill and lets `free` catch
//! a page that is already free.
//!
//! A link word is only written by the holder of the per-core lock whose list
//! contains the page, or by the page's owner while it is [`ALLOCATED`].

use crate::{FreeError, InitError};
use core::ptr::NonNull;
use core::slice;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::memory::{PAGE_SIZE, page_round_down, page_round_up};

/// Link value terminating a free list.
const END: u32 = u32::MAX - 1;

/// Link value of a page that is currently allocated.
const ALLOCATED: u32 = u32::MAX;

/// The physical range under management, fixed at init.
pub(crate) struct Frames {
    links: &'static [AtomicU32],
    /// First managed page; page `i` starts at `base + i * PAGE_SIZE`.
    base: NonNull<u8>,
    /// Exclusive upper bound of the managed range.
    end: usize,
    table_pages: usize,
}

// Safety: `base` is only used to derive page pointers; ownership of the pages
// is tracked through the link table.
unsafe impl Send for Frames {}
unsafe impl Sync for Frames {}

impl Frames {
    /// Splits `[start, end)` into the link table and the pages it tracks.
    ///
    /// Every page starts out [`ALLOCATED`]; the caller frees them.
    ///
    /// # Safety
    /// `[start, end)` must be valid for reads and writes, unused by anything
    /// else, and stay so for the rest of the program.
    pub(crate) unsafe fn carve(start: *mut u8, end: *mut u8) -> Result<Self, InitError> {
        let first = page_round_up(start.addr());
        let last = page_round_down(end.addr());
        if last <= first {
            return Err(InitError::Empty {
                start: start.addr(),
                end: end.addr(),
            });
        }

        let total = (last - first) / PAGE_SIZE;
        let table_pages = (total * size_of::<AtomicU32>()).div_ceil(PAGE_SIZE);
        let count = total - table_pages;
        if count == 0 {
            return Err(InitError::Empty {
                start: start.addr(),
                end: end.addr(),
            });
        }
        if count >= END as usize {
            return Err(InitError::TooLarge { pages: count });
        }

        let table = start.with_addr(first).cast::<AtomicU32>();
        for i in 0..count {
            // SAFETY: the table pages lie inside the caller's range.
            unsafe { table.add(i).write(AtomicU32::new(ALLOCATED)) };
        }

        // SAFETY: initialized above; the range lives forever per the contract.
        let links = unsafe { slice::from_raw_parts(table.cast_const(), count) };
        let base = NonNull::new(start.with_addr(first + table_pages * PAGE_SIZE))
            .ok_or(InitError::Empty {
                start: start.addr(),
                end: end.addr(),
            })?;

        Ok(Self {
            links,
            base,
            end: last,
            table_pages,
        })
    }

    /// Number of pages under management.
    #[inline]
    pub(crate) const fn count(&self) -> usize {
        self.links.len()
    }

    /// Pages spent on the link table.
    #[inline]
    pub(crate) const fn table_pages(&self) -> usize {
        self.table_pages
    }

    #[inline]
    pub(crate) fn start(&self) -> usize {
        self.base.as_ptr().addr()
    }

    #[inline]
    pub(crate) const fn end(&self) -> usize {
        self.end
    }

    /// Pointer to page `index`.
    #[inline]
    pub(crate) fn page(&self, index: u32) -> NonNull<u8> {
        // SAFETY: index < count keeps us inside the managed range.
        unsafe { self.base.add(index as usize * PAGE_SIZE) }
    }

    /// Maps a page address to its index, rejecting anything that is not the
    /// base of a managed page.
    pub(crate) fn index_of(&self, addr: usize) -> Result<u32, FreeError> {
        if addr % PAGE_SIZE != 0 {
            return Err(FreeError::Misaligned { addr });
        }
        if addr < self.start() {
            return Err(FreeError::BelowRange {
                addr,
                start: self.start(),
            });
        }
        if addr >= self.end {
            return Err(FreeError::AboveRange {
                addr,
                end: self.end,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(((addr - self.start()) / PAGE_SIZE) as u32)
    }

    #[inline]
    fn link(&self, index: u32) -> &AtomicU32 {
        &self.links[index as usize]
    }

    pub(crate) fn is_allocated(&self, index: u32) -> bool {
        self.link(index).load(Ordering::Acquire) == ALLOCATED
    }

    /// Moves page `index` out of the allocated state ahead of pushing it.
    pub(crate) fn claim_for_free(&self, index: u32, addr: usize) -> Result<(), FreeError> {
        self.link(index)
            .compare_exchange(ALLOCATED, END, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| FreeError::DoubleFree { addr })
    }
}

/// One core's list of free pages. Guarded by that core's lock.
pub(crate) struct FreeList {
    head: u32,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: END, len: 0 }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push(&mut self, frames: &Frames, index: u32) {
        frames.link(index).store(self.head, Ordering::Relaxed);
        self.head = index;
        self.len += 1;
    }

    pub(crate) fn pop(&mut self, frames: &Frames) -> Option<u32> {
        if self.head == END {
            return None;
        }
        let index = self.head;
        self.head = frames.link(index).load(Ordering::Relaxed);
        frames.link(index).store(ALLOCATED, Ordering::Release);
        self.len -= 1;
        Some(index)
    }
}
