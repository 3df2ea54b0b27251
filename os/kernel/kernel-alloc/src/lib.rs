//! # Physical Page Allocation
//!
//! This crate owns the pool of free physical pages that backs user memory,
//! kernel stacks, page-table pages and pipe buffers. It hands out whole
//! [`PAGE_SIZE`](kernel_info::memory::PAGE_SIZE) pages and nothing smaller;
//! sub-page allocation is the business of the layers above.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              PageAllocator (per core)               │
//! │    • alloc / free of single 4 KiB pages             │
//! │    • round-robin stealing between cores             │
//! │    • junk fill on free and on alloc                 │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Free lists over an external link table       │
//! │    • one u32 link per page, carved from the range   │
//! │    • allocated / free state per page                │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Page Allocator ([`frame_alloc`])
//! * **Per-core lists**: each core allocates and frees against its own list
//!   under its own spinlock, with interrupts masked
//! * **Stealing**: an empty core takes one page from the next non-empty core
//! * **Failure is recoverable**: running out of pages yields `None`
//! * **Misuse is fatal**: freeing a misaligned, out-of-range or already free
//!   address panics
//!
//! ### Page Frames ([`page`])
//! * **Ownership**: [`PageFrame`] is the only handle to an allocated page
//! * **Fill patterns**: [`PAGE_FREE_FILL`] and [`PAGE_ALLOC_FILL`] make stale
//!   and uninitialized reads recognizable
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::{PAGE_ALLOC_FILL, frame_alloc::PageAllocator};
//! use kernel_sync::X86Cpu;
//!
//! static KMEM: PageAllocator<X86Cpu> = PageAllocator::new(X86Cpu);
//!
//! fn map_fresh_page() -> Option<usize> {
//!     let page = KMEM.alloc()?;
//!     assert!(page.as_bytes().iter().all(|&b| b == PAGE_ALLOC_FILL));
//!     Some(page.into_raw().as_ptr().addr())
//! }
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod frame_alloc;
mod free_list;
pub mod page;

pub use frame_alloc::PageAllocator;
pub use page::{PAGE_ALLOC_FILL, PAGE_FREE_FILL, PageFrame};

/// Why a page could not be freed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    #[error("{addr:#x} is not page-aligned")]
    Misaligned { addr: usize },
    #[error("{addr:#x} lies below the managed range starting at {start:#x}")]
    BelowRange { addr: usize, start: usize },
    #[error("{addr:#x} lies at or above the end of physical memory {end:#x}")]
    AboveRange { addr: usize, end: usize },
    #[error("page {addr:#x} is already free")]
    DoubleFree { addr: usize },
    #[error("page allocator is not initialized")]
    Uninitialized,
}

/// Why [`PageAllocator::init`] rejected a range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("range [{start:#x}, {end:#x}) holds no usable page")]
    Empty { start: usize, end: usize },
    #[error("{pages} pages exceed what the link table can index")]
    TooLarge { pages: usize },
    #[error("page allocator is already initialized")]
    AlreadyInitialized,
}
