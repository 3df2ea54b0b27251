//! # Physical Memory Layout

use static_assertions::const_assert;

/// Size of a physical page in bytes; the page allocator's only granularity.
pub const PAGE_SIZE: usize = 4096;

/// log2([`PAGE_SIZE`]).
pub const PAGE_SHIFT: u32 = 12;

/// Physical address at which the kernel image is loaded.
///
/// The linker places `.text` here; the first free byte after the image
/// (the `end` symbol) is where the page allocator's range begins.
pub const KERNBASE: usize = 0x8000_0000;

/// Top of usable physical memory (exclusive).
///
/// Every page handed out by the page allocator lies in `[end, PHYSTOP)`.
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

/// Round `addr` up to the next page boundary.
#[inline]
#[must_use]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Round `addr` down to its page boundary.
#[inline]
#[must_use]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

const_assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
const_assert!(KERNBASE % PAGE_SIZE == 0);
const_assert!(PHYSTOP % PAGE_SIZE == 0);
const_assert!(PHYSTOP > KERNBASE);
