//! # Page Frames

use core::fmt;
use core::ptr::NonNull;
use kernel_info::memory::PAGE_SIZE;

/// Byte written over every page when it is freed.
///
/// A stale reference into freed memory reads `0x01` bytes rather than
/// plausible leftovers.
pub const PAGE_FREE_FILL: u8 = 0x01;

/// Byte written over every page right before it is handed out.
///
/// Distinct from [`PAGE_FREE_FILL`], so a dump tells "freed" from "fresh but
/// not yet initialized by its new owner".
pub const PAGE_ALLOC_FILL: u8 = 0x05;

/// Exclusive ownership of one [`PAGE_SIZE`] page of physical memory.
///
/// Returned by [`PageAllocator::alloc`](crate::frame_alloc::PageAllocator::alloc)
/// and consumed by [`PageAllocator::free`](crate::frame_alloc::PageAllocator::free).
/// Code that needs to park a page outside Rust ownership (e.g. in a page
/// table entry) goes through [`into_raw`](Self::into_raw) and
/// [`from_raw`](Self::from_raw), like a `Box`.
pub struct PageFrame {
    ptr: NonNull<u8>,
}

// Safety: a `PageFrame` is the only handle to its page.
unsafe impl Send for PageFrame {}
unsafe impl Sync for PageFrame {}

impl PageFrame {
    /// Re-assembles a frame from a pointer obtained through [`into_raw`](Self::into_raw).
    ///
    /// # Safety
    /// The caller must own the `PAGE_SIZE` bytes at `ptr` exclusively, and
    /// no other `PageFrame` for the same address may exist.
    #[inline]
    #[must_use]
    pub const unsafe fn from_raw(ptr: NonNull<u8>) -> Self {
        Self { ptr }
    }

    /// Gives up ownership without freeing the page.
    #[inline]
    #[must_use]
    pub const fn into_raw(self) -> NonNull<u8> {
        self.ptr
    }

    /// Address of the first byte of the page.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr().addr()
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        unsafe { self.ptr.cast::<[u8; PAGE_SIZE]>().as_ref() }
    }

    #[inline]
    pub const fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        unsafe { self.ptr.cast::<[u8; PAGE_SIZE]>().as_mut() }
    }

    /// Overwrites the whole page with `byte`.
    #[inline]
    pub fn fill(&mut self, byte: u8) {
        // SAFETY: we own the page.
        unsafe { self.ptr.as_ptr().write_bytes(byte, PAGE_SIZE) }
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFrame(0x{:016X})", self.addr())
    }
}
