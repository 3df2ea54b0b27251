//! # Kernel Configuration
//!
//! Compile-time constants shared by the kernel's memory and storage
//! subsystems. Everything in here is `const` and checked at compile time, so
//! a misconfigured layout fails the build rather than the boot.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Page geometry**: [`PAGE_SIZE`](memory::PAGE_SIZE) and rounding helpers
//! * **Physical range**: [`KERNBASE`](memory::KERNBASE) and
//!   [`PHYSTOP`](memory::PHYSTOP) bracket the memory the page allocator owns
//!
//! ### Parameters ([`param`])
//! * **Cores**: [`NCPU`](param::NCPU) bounds the per-core free lists
//! * **Buffer cache**: pool size, bucket count and block size
//!
//! ```text
//! Physical Memory Layout:
//!
//! KERNBASE  ┌─────────────────────────────────┐
//!           │   Kernel Text & Data            │
//! end       ├─────────────────────────────────┤
//!           │   Page allocator link table     │
//!           ├─────────────────────────────────┤
//!           │   Free pages (per-core lists)   │
//! PHYSTOP   └─────────────────────────────────┘
//! ```
//!
//! Consumers take these as defaults for their const generic sizes, so tests
//! can build smaller instances without touching the kernel's configuration:
//!
//! ```rust
//! use kernel_info::memory::{PAGE_SIZE, page_round_up};
//! use kernel_info::param::{NBUCKET, NBUF};
//!
//! assert_eq!(page_round_up(1), PAGE_SIZE);
//! assert!(NBUF >= NBUCKET);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod param;
