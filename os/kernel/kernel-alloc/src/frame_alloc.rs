//! # Per-core physical page allocator
//!
//! Every core owns a free list behind its own spinlock, so the hot
//! alloc/free path never contends on a global lock. A core whose list runs
//! dry steals a single page from the next non-empty core in round-robin
//! order, starting right after itself.
//!
//! Free-list critical sections run with interrupts masked: an interrupt
//! handler that allocates on the same core would otherwise spin forever on
//! the lock its own core already holds.

use crate::free_list::{FreeList, Frames};
use crate::page::{PAGE_ALLOC_FILL, PAGE_FREE_FILL, PageFrame};
use crate::{FreeError, InitError};
use kernel_info::memory::PAGE_SIZE;
use kernel_info::param;
use kernel_sync::{Cpu, IrqGuard, SpinLock, SyncOnceCell};
use log::{debug, info, trace};

/// Physical page allocator with one free list per core.
///
/// Constructed empty (usable in a `static`) and populated once by
/// [`init`](Self::init):
///
/// ```rust,no_run
/// use kernel_alloc::frame_alloc::PageAllocator;
/// use kernel_sync::X86Cpu;
///
/// static KMEM: PageAllocator<X86Cpu> = PageAllocator::new(X86Cpu);
///
/// # let (end, phystop) = (core::ptr::null_mut(), core::ptr::null_mut());
/// // Safety: [end, PHYSTOP) is unused RAM owned by the allocator from now on.
/// unsafe { KMEM.init(end, phystop) }.expect("page allocator init");
///
/// if let Some(page) = KMEM.alloc() {
///     KMEM.free(page);
/// }
/// ```
pub struct PageAllocator<C: Cpu, const NCPU: usize = { param::NCPU }> {
    cpu: C,
    kmem: [SpinLock<FreeList>; NCPU],
    frames: SyncOnceCell<Frames>,
}

impl<C: Cpu, const NCPU: usize> PageAllocator<C, NCPU> {
    pub const fn new(cpu: C) -> Self {
        Self {
            cpu,
            kmem: [const { SpinLock::named("kmem", FreeList::new()) }; NCPU],
            frames: SyncOnceCell::new(),
        }
    }

    /// Takes ownership of `[start, end)` and frees every whole page in it
    /// onto the executing core's list.
    ///
    /// A few pages at the bottom of the range hold the allocator's link
    /// table and are never handed out.
    ///
    /// # Safety
    /// `[start, end)` must be valid, writable memory used by nothing else,
    /// for the rest of the program.
    ///
    /// # Errors
    /// Fails if the range holds no usable page, has more pages than the link
    /// table can index, or the allocator was already initialized.
    pub unsafe fn init(&self, start: *mut u8, end: *mut u8) -> Result<(), InitError> {
        if self.frames.is_initialized() {
            return Err(InitError::AlreadyInitialized);
        }

        let frames = unsafe { Frames::carve(start, end) }?;
        let frames = self
            .frames
            .try_init(frames)
            .map_err(|_| InitError::AlreadyInitialized)?;

        info!(
            "kalloc: {} pages in [{:#x}, {:#x}), {} page(s) of link table",
            frames.count(),
            frames.start(),
            frames.end(),
            frames.table_pages()
        );

        let first = frames.page(0).as_ptr();
        unsafe { self.free_range(first, first.with_addr(frames.end())) };
        Ok(())
    }

    /// Frees every whole page inside `[start, end)`.
    ///
    /// # Safety
    /// The caller must own every page in the range, as if each had come
    /// from [`alloc`](Self::alloc).
    ///
    /// # Panics
    /// Same conditions as [`free`](Self::free).
    pub unsafe fn free_range(&self, start: *mut u8, end: *mut u8) {
        let mut p = start.with_addr(start.addr().next_multiple_of(PAGE_SIZE));
        while p.addr() + PAGE_SIZE <= end.addr() {
            if let Some(ptr) = core::ptr::NonNull::new(p) {
                self.free(unsafe { PageFrame::from_raw(ptr) });
            }
            p = p.wrapping_add(PAGE_SIZE);
        }
    }

    /// Returns `page` to the executing core's free list.
    ///
    /// # Panics
    /// Freeing a misaligned address, one outside the managed range, or a
    /// page that is already free is a kernel bug and halts via `panic!`.
    pub fn free(&self, mut page: PageFrame) {
        let addr = page.addr();
        let result = self
            .frames
            .get()
            .ok_or(FreeError::Uninitialized)
            .and_then(|frames| {
                let index = frames.index_of(addr)?;
                frames.claim_for_free(index, addr)?;
                Ok((frames, index))
            });
        let (frames, index) = match result {
            Ok(found) => found,
            Err(err) => panic!("kfree: {err}"),
        };

        // Fill with junk to catch dangling refs.
        page.fill(PAGE_FREE_FILL);
        // Ownership passes to the free list; the frame is rebuilt from its index.
        let ptr = page.into_raw();
        debug_assert_eq!(ptr, frames.page(index));

        let irq = IrqGuard::new(&self.cpu);
        let id = irq.cpu_id();
        self.list(id, "kfree").with_lock(|list| list.push(frames, index));
        drop(irq);
    }

    /// Allocates one page, stealing from another core if the executing
    /// core has none.
    ///
    /// The page comes back filled with [`PAGE_ALLOC_FILL`]. Returns `None`
    /// when every core's list is empty.
    pub fn alloc(&self) -> Option<PageFrame> {
        let frames = self.frames.get()?;

        let irq = IrqGuard::new(&self.cpu);
        let id = irq.cpu_id();
        let index = self
            .list(id, "kalloc")
            .with_lock(|list| list.pop(frames))
            .or_else(|| self.steal(frames, id));

        let Some(index) = index else {
            debug!("kalloc: out of pages on core {id}");
            return None;
        };

        // SAFETY: popping the page from a free list made it ours.
        let mut page = unsafe { PageFrame::from_raw(frames.page(index)) };
        page.fill(PAGE_ALLOC_FILL);
        drop(irq);
        Some(page)
    }

    /// Takes one page from the first non-empty list after core `id`,
    /// wrapping around.
    fn steal(&self, frames: &Frames, id: usize) -> Option<u32> {
        (1..NCPU).map(|i| (id + i) % NCPU).find_map(|victim| {
            let index = self.kmem[victim].with_lock(|list| list.pop(frames))?;
            trace!(
                "kalloc: core {id} stole page {:#x} from core {victim}",
                frames.page(index).as_ptr().addr()
            );
            Some(index)
        })
    }

    fn list(&self, id: usize, op: &str) -> &SpinLock<FreeList> {
        match self.kmem.get(id) {
            Some(list) => list,
            None => panic!("{op}: core id {id} outside 0..{NCPU}"),
        }
    }

    /// Pages on core `id`'s free list.
    ///
    /// # Panics
    /// If `id` is not a valid core index.
    pub fn free_pages(&self, id: usize) -> usize {
        let _irq = IrqGuard::new(&self.cpu);
        self.list(id, "free_pages").with_lock(|list| list.len())
    }

    /// Free pages across all cores.
    ///
    /// Each list is counted under its own lock, so the sum is only exact
    /// while no other core allocates or frees.
    pub fn total_free(&self) -> usize {
        (0..NCPU).map(|id| self.free_pages(id)).sum()
    }

    /// Number of pages under management, free or not.
    pub fn capacity(&self) -> usize {
        self.frames.get().map_or(0, Frames::count)
    }

    /// Whether `addr` is the base of a managed page that is currently free.
    pub fn is_free(&self, addr: usize) -> bool {
        self.frames.get().is_some_and(|frames| {
            frames
                .index_of(addr)
                .is_ok_and(|index| !frames.is_allocated(index))
        })
    }
}
