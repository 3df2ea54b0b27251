//! # Block Buffer Cache
//!
//! An in-memory cache of disk blocks shared by every task in the kernel. It
//! has two jobs:
//!
//! * keep recently used blocks in memory, so repeated reads skip the disk;
//! * make sure at most one copy of any block exists, and that only one task
//!   at a time works on that copy.
//!
//! ## Structure
//!
//! ```text
//!             ┌────────────────────┐
//!             │  bcache (eviction) │  held only while recycling a buffer
//!             └─────────┬──────────┘
//!      ┌──────────┬─────┴────┬──────────┐
//!  ┌───▼───┐  ┌───▼───┐  ┌───▼───┐  ┌───▼────┐
//!  │bucket0│  │bucket1│  │  ...  │  │bucket12│  blockno % NBUCKET
//!  └───┬───┘  └───┬───┘  └───────┘  └────────┘
//!   buf ⇄ buf   buf                             sleep lock per buffer
//! ```
//!
//! Lookups of cached blocks take a single bucket lock. Only a miss takes the
//! pool-wide `bcache` lock, re-checks, and recycles the unreferenced buffer
//! that was released the longest time ago. Interrupts are masked on the
//! executing core while any of these spinlocks is held.
//!
//! ## Usage
//!
//! ```rust
//! use core::sync::atomic::AtomicU64;
//! use kernel_bio::{BlockDevice, BufferCache};
//! use kernel_info::param::BSIZE;
//! use kernel_sync::host::{HostCpu, HostScheduler};
//!
//! struct Zeroes;
//!
//! impl BlockDevice for Zeroes {
//!     fn read_block(&self, _dev: u32, _blockno: u32, data: &mut [u8; BSIZE]) {
//!         data.fill(0);
//!     }
//!     fn write_block(&self, _dev: u32, _blockno: u32, _data: &[u8; BSIZE]) {}
//! }
//!
//! let bcache: BufferCache<_, _, _, _> =
//!     BufferCache::new(Zeroes, HostScheduler::new(), AtomicU64::new(0), HostCpu);
//!
//! let mut buf = bcache.read(1, 42);
//! assert!(buf.is_valid());
//! buf[0] = 0xff;
//! buf.write();
//! buf.release();
//!
//! assert!(bcache.is_cached(1, 42));
//! ```
//!
//! ## Fatal conditions
//!
//! Writing or releasing a buffer from a task that does not hold it, and
//! asking for a block while every buffer is referenced, are kernel bugs.
//! They panic with a message naming the operation (`bwrite`, `brelse`,
//! `bget`, `bunpin`).

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bucket;
mod buf;
mod cache;
mod device;

pub use buf::{Buf, BufPin};
pub use cache::BufferCache;
pub use device::{BlockDevice, Clock};

/// A structural invariant found broken by [`BufferCache::audit`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("bucket {bucket} has inconsistent links")]
    BrokenLinks { bucket: usize },
    #[error("buffer {index} is listed twice")]
    Duplicate { index: usize },
    #[error("buffer {index} is on no bucket")]
    Missing { index: usize },
    #[error("buffer {index} is on bucket {bucket} but belongs on bucket {expected}")]
    WrongBucket {
        index: usize,
        bucket: usize,
        expected: usize,
    },
    #[error("dev {dev} block {blockno} is cached twice")]
    Aliased { dev: u32, blockno: u32 },
}
