//! # Kernel Parameters
//!
//! Sizing of the per-core and pooled kernel resources.

use static_assertions::const_assert;

/// Maximum number of processing cores.
pub const NCPU: usize = 8;

/// Largest number of blocks any single filesystem operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Number of buffers in the block buffer cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets in the block buffer cache.
///
/// Prime, so that strided block numbers spread across buckets.
pub const NBUCKET: usize = 13;

/// Size of a disk block in bytes.
pub const BSIZE: usize = 1024;

const_assert!(NCPU > 0);
const_assert!(NBUF >= NBUCKET);
const_assert!(BSIZE.is_power_of_two());
