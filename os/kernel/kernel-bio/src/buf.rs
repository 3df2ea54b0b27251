use crate::cache::BufferCache;
use crate::device::{BlockDevice, Clock};
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering;
use kernel_info::param::BSIZE;
use kernel_sync::{Cpu, Scheduler, SleepLockGuard};

/// A locked, referenced block buffer.
///
/// Dereferences to the block's bytes. The buffer is released when the `Buf`
/// is dropped or passed to [`release`](Self::release); both require the task
/// that locked it to still be the one running.
pub struct Buf<'a, D, S, C, P, const NBUF: usize>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    cache: &'a BufferCache<D, S, C, P, NBUF>,
    index: usize,
    data: ManuallyDrop<SleepLockGuard<'a, [u8; BSIZE], S>>,
}

impl<'a, D, S, C, P, const NBUF: usize> Buf<'a, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    pub(crate) const fn new(
        cache: &'a BufferCache<D, S, C, P, NBUF>,
        index: usize,
        data: SleepLockGuard<'a, [u8; BSIZE], S>,
    ) -> Self {
        Self {
            cache,
            index,
            data: ManuallyDrop::new(data),
        }
    }

    /// Position of the buffer in the pool.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn dev(&self) -> u32 {
        self.cache.slot(self.index).dev.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn blockno(&self) -> u32 {
        self.cache.slot(self.index).blockno.load(Ordering::Relaxed)
    }

    /// Whether the bytes reflect the block on the device.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cache.slot(self.index).valid.load(Ordering::Relaxed)
    }

    /// Current number of references, this one included.
    #[must_use]
    pub fn refcnt(&self) -> u32 {
        self.cache.slot(self.index).refcnt.load(Ordering::Relaxed)
    }

    /// Writes the bytes through to the device.
    ///
    /// # Panics
    /// If the running task is not the one holding the buffer.
    pub fn write(&self) {
        self.cache.write_slot(self.index, &self.data);
    }

    /// Keeps the buffer resident after it is released, until the returned
    /// token is handed to [`BufferCache::unpin`] on the same cache.
    #[must_use = "an unpinned BufPin keeps the buffer resident forever"]
    pub fn pin(&self) -> BufPin<'a, D, S, C, P, NBUF> {
        self.cache.pin_slot(self.index)
    }

    /// Releases the buffer. Same as dropping it.
    ///
    /// # Panics
    /// If the running task is not the one holding the buffer.
    pub fn release(self) {
        drop(self);
    }
}

impl<D, S, C, P, const NBUF: usize> Drop for Buf<'_, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    fn drop(&mut self) {
        self.cache.check_release(self.index);
        // SAFETY: `data` is never touched again.
        drop(unsafe { ManuallyDrop::take(&mut self.data) });
        self.cache.release_slot(self.index);
    }
}

impl<D, S, C, P, const NBUF: usize> Deref for Buf<'_, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<D, S, C, P, const NBUF: usize> DerefMut for Buf<'_, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<D, S, C, P, const NBUF: usize> fmt::Debug for Buf<'_, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("index", &self.index)
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .field("valid", &self.is_valid())
            .field("refcnt", &self.refcnt())
            .finish_non_exhaustive()
    }
}

/// An extra reference on a buffer, taken by [`Buf::pin`].
///
/// Remembers the cache it was taken on; only that cache accepts it back.
pub struct BufPin<'a, D, S, C, P, const NBUF: usize>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    cache: &'a BufferCache<D, S, C, P, NBUF>,
    index: usize,
}

impl<'a, D, S, C, P, const NBUF: usize> BufPin<'a, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    pub(crate) const fn new(cache: &'a BufferCache<D, S, C, P, NBUF>, index: usize) -> Self {
        Self { cache, index }
    }

    pub(crate) const fn cache(&self) -> &'a BufferCache<D, S, C, P, NBUF> {
        self.cache
    }

    /// Position of the pinned buffer in the pool.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<D, S, C, P, const NBUF: usize> fmt::Debug for BufPin<'_, D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufPin")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
