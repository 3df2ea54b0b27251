//! Collaborators the buffer cache drives: the disk and the LRU clock.

use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::param::BSIZE;

/// Block-granular storage behind the cache.
///
/// Both calls block until the transfer completes and may suspend the calling
/// task while the device works. Retrying failed transfers is the device's
/// business; the cache never retries.
pub trait BlockDevice: Sync {
    /// Fills `data` with block `blockno` of device `dev`.
    fn read_block(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]);

    /// Persists `data` as block `blockno` of device `dev`.
    fn write_block(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]);
}

/// Monotonically non-decreasing logical time, used to order releases.
pub trait Clock: Sync {
    fn now(&self) -> u64;
}

/// A tick counter advanced elsewhere, e.g. by the timer interrupt.
impl Clock for AtomicU64 {
    #[inline]
    fn now(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }
}
