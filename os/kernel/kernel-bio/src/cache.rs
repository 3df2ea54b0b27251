//! # Buffer cache
//!
//! ## Locking
//!
//! * `buckets[b]` guards bucket `b`'s list and the `refcnt` and
//!   `last_released` of every buffer on it.
//! * `lock` ("bcache") serializes evictions. A buffer's identity changes only
//!   under `lock` plus the lock of every bucket the buffer moves between.
//! * A buffer's sleep lock guards its bytes and its `valid` flag.
//!
//! Order: `lock`, then the target bucket, then the victim's bucket. Two
//! bucket locks are only ever held together under `lock`, which rules out
//! two evictions locking each other's buckets in opposite order. No spinlock
//! is held while waiting for a sleep lock.
//!
//! Every `lock` and bucket critical section runs inside an [`IrqGuard`], so
//! no interrupt can preempt a core while other cores spin on its lock.

use crate::bucket::Bucket;
use crate::buf::{Buf, BufPin};
use crate::device::{BlockDevice, Clock};
use crate::AuditError;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use kernel_info::param::{self, BSIZE, NBUCKET};
use kernel_sync::{Cpu, IrqGuard, Scheduler, SleepLock, SpinLock, SpinLockGuard};
use log::{debug, trace};

/// One cached block.
pub(crate) struct Slot {
    pub(crate) dev: AtomicU32,
    pub(crate) blockno: AtomicU32,
    /// Cleared until the first time the buffer is tagged with a block.
    pub(crate) mapped: AtomicBool,
    pub(crate) refcnt: AtomicU32,
    /// `Clock::now() + 1` at the last release; 0 for never released.
    pub(crate) last_released: AtomicU64,
    pub(crate) valid: AtomicBool,
    pub(crate) data: SleepLock<[u8; BSIZE]>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            dev: AtomicU32::new(0),
            blockno: AtomicU32::new(0),
            mapped: AtomicBool::new(false),
            refcnt: AtomicU32::new(0),
            last_released: AtomicU64::new(0),
            valid: AtomicBool::new(false),
            data: SleepLock::new("buffer", [0; BSIZE]),
        }
    }

    fn holds(&self, dev: u32, blockno: u32) -> bool {
        self.mapped.load(Ordering::Relaxed)
            && self.dev.load(Ordering::Relaxed) == dev
            && self.blockno.load(Ordering::Relaxed) == blockno
    }

    /// Bucket the buffer is on: by block number once mapped, 0 before.
    pub(crate) fn home(&self) -> usize {
        if self.mapped.load(Ordering::Relaxed) {
            bucket_of(self.blockno.load(Ordering::Relaxed))
        } else {
            0
        }
    }
}

#[inline]
const fn bucket_of(blockno: u32) -> usize {
    blockno as usize % NBUCKET
}

/// Fixed pool of `NBUF` block buffers, hashed by block number into
/// [`NBUCKET`] buckets and recycled least-recently-released first.
///
/// [`read`](Self::read) and [`acquire`](Self::acquire) return a [`Buf`]
/// that holds the buffer's sleep lock; dropping it releases the buffer.
pub struct BufferCache<D, S, C, P, const NBUF: usize = { param::NBUF }>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    device: D,
    sched: S,
    clock: C,
    cpu: P,
    lock: SpinLock<()>,
    buckets: [SpinLock<Bucket<NBUF>>; NBUCKET],
    slots: [Slot; NBUF],
}

impl<D, S, C, P, const NBUF: usize> BufferCache<D, S, C, P, NBUF>
where
    D: BlockDevice,
    S: Scheduler,
    C: Clock,
    P: Cpu,
{
    /// Creates the pool with every buffer unmapped on bucket 0.
    pub const fn new(device: D, sched: S, clock: C, cpu: P) -> Self {
        let mut buckets =
            [const { SpinLock::named("bcache.bucket", Bucket::<NBUF>::new()) }; NBUCKET];
        *buckets[0].get_mut() = Bucket::holding_all();
        Self {
            device,
            sched,
            clock,
            cpu,
            lock: SpinLock::named("bcache", ()),
            buckets,
            slots: [const { Slot::new() }; NBUF],
        }
    }

    /// Returns a locked buffer holding the current contents of the block.
    ///
    /// # Panics
    /// When every buffer is referenced.
    pub fn read(&self, dev: u32, blockno: u32) -> Buf<'_, D, S, C, P, NBUF> {
        let mut buf = self.get(dev, blockno);
        if !buf.is_valid() {
            trace!("bread: loading dev {dev} block {blockno}");
            self.device.read_block(dev, blockno, &mut buf);
            self.slot(buf.index()).valid.store(true, Ordering::Relaxed);
        }
        buf
    }

    /// Returns a locked buffer for the block without loading it from the
    /// device. Meant for callers about to overwrite the whole block.
    ///
    /// The contents are only meaningful if [`Buf::is_valid`] says so.
    ///
    /// # Panics
    /// When every buffer is referenced.
    pub fn acquire(&self, dev: u32, blockno: u32) -> Buf<'_, D, S, C, P, NBUF> {
        self.get(dev, blockno)
    }

    /// Finds or recycles the buffer for `(dev, blockno)` and locks it.
    fn get(&self, dev: u32, blockno: u32) -> Buf<'_, D, S, C, P, NBUF> {
        let index = self.claim(dev, blockno);
        self.lock_slot(index)
    }

    /// Takes a reference on the buffer for `(dev, blockno)`, recycling one
    /// if the block is not cached.
    fn claim(&self, dev: u32, blockno: u32) -> usize {
        let target = bucket_of(blockno);
        let _irq = IrqGuard::new(&self.cpu);

        let bucket = self.buckets[target].lock();
        if let Some(i) = self.lookup(&bucket, dev, blockno) {
            self.slots[i].refcnt.fetch_add(1, Ordering::Relaxed);
            return i;
        }
        drop(bucket);

        let evicting = self.lock.lock();
        let mut bucket = self.buckets[target].lock();

        // Someone may have cached it between the two lock acquisitions.
        if let Some(i) = self.lookup(&bucket, dev, blockno) {
            self.slots[i].refcnt.fetch_add(1, Ordering::Relaxed);
            return i;
        }

        let victim = loop {
            let Some(i) = self.least_recently_released() else {
                panic!("bget: no buffers");
            };
            let home = self.slots[i].home();
            if home == target {
                if self.slots[i].refcnt.load(Ordering::Relaxed) == 0 {
                    bucket.remove(i);
                    break i;
                }
            } else {
                let mut other = self.lock_other_bucket(&evicting, home);
                if self.slots[i].refcnt.load(Ordering::Relaxed) == 0 {
                    other.remove(i);
                    break i;
                }
            }
            trace!("bget: buffer {i} was claimed during eviction, rescanning");
        };

        let slot = &self.slots[victim];
        if slot.mapped.load(Ordering::Relaxed) {
            debug!(
                "bget: dev {dev} block {blockno} evicts buffer {victim} (dev {} block {})",
                slot.dev.load(Ordering::Relaxed),
                slot.blockno.load(Ordering::Relaxed)
            );
        } else {
            debug!("bget: dev {dev} block {blockno} takes unused buffer {victim}");
        }
        slot.dev.store(dev, Ordering::Relaxed);
        slot.blockno.store(blockno, Ordering::Relaxed);
        slot.mapped.store(true, Ordering::Relaxed);
        slot.valid.store(false, Ordering::Relaxed);
        slot.refcnt.store(1, Ordering::Relaxed);
        bucket.push_front(victim);
        victim
    }

    fn lookup(&self, bucket: &Bucket<NBUF>, dev: u32, blockno: u32) -> Option<usize> {
        bucket.iter().find(|&i| self.slots[i].holds(dev, blockno))
    }

    /// The unreferenced buffer released longest ago, lowest index on ties.
    ///
    /// The counts are read without their bucket locks; the caller re-checks
    /// the winner under its bucket lock.
    fn least_recently_released(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.refcnt.load(Ordering::Relaxed) != 0 {
                continue;
            }
            let stamp = slot.last_released.load(Ordering::Relaxed);
            if best.is_none_or(|(_, oldest)| stamp < oldest) {
                best = Some((i, stamp));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Locks a second bucket. Only legal while holding the eviction lock.
    fn lock_other_bucket<'a>(
        &'a self,
        _evicting: &SpinLockGuard<'_, ()>,
        bucket: usize,
    ) -> SpinLockGuard<'a, Bucket<NBUF>> {
        self.buckets[bucket].lock()
    }

    /// Runs `f` on `slot` under its bucket lock with interrupts masked.
    ///
    /// The caller must hold a reference on the slot, which pins its bucket.
    fn with_home_bucket<R>(&self, slot: &Slot, f: impl FnOnce() -> R) -> R {
        let _irq = IrqGuard::new(&self.cpu);
        let _bucket = self.buckets[slot.home()].lock();
        f()
    }

    fn lock_slot(&self, index: usize) -> Buf<'_, D, S, C, P, NBUF> {
        let data = self.slots[index].data.lock(&self.sched);
        Buf::new(self, index, data)
    }

    /// Persists the buffer's bytes. Called through [`Buf::write`].
    pub(crate) fn write_slot(&self, index: usize, data: &[u8; BSIZE]) {
        let slot = &self.slots[index];
        if !slot.data.holding(&self.sched) {
            panic!(
                "bwrite: buffer {index} is not locked by {}",
                self.sched.current_task()
            );
        }
        self.device.write_block(
            slot.dev.load(Ordering::Relaxed),
            slot.blockno.load(Ordering::Relaxed),
            data,
        );
    }

    /// Checks that the caller holds `index` before its guard is dropped.
    pub(crate) fn check_release(&self, index: usize) {
        if !self.slots[index].data.holding(&self.sched) {
            panic!(
                "brelse: buffer {index} is not locked by {}",
                self.sched.current_task()
            );
        }
    }

    /// Drops one reference after the sleep lock has been released, and
    /// stamps the release time.
    pub(crate) fn release_slot(&self, index: usize) {
        let slot = &self.slots[index];
        let now = self.clock.now().saturating_add(1);
        self.with_home_bucket(slot, || {
            let refcnt = slot.refcnt.load(Ordering::Relaxed);
            if refcnt == 0 {
                panic!("brelse: buffer {index} is not referenced");
            }
            slot.refcnt.store(refcnt - 1, Ordering::Relaxed);
            slot.last_released.store(now, Ordering::Relaxed);
        });
    }

    pub(crate) fn pin_slot(&self, index: usize) -> BufPin<'_, D, S, C, P, NBUF> {
        let slot = &self.slots[index];
        self.with_home_bucket(slot, || {
            slot.refcnt.fetch_add(1, Ordering::Relaxed);
        });
        BufPin::new(self, index)
    }

    /// Drops the reference taken by [`Buf::pin`].
    ///
    /// # Panics
    /// If `pin` was taken on another cache, or the buffer has no references
    /// left.
    pub fn unpin(&self, pin: BufPin<'_, D, S, C, P, NBUF>) {
        let index = pin.index();
        if !ptr::eq(pin.cache(), self) {
            panic!("bunpin: pin for buffer {index} belongs to another buffer cache");
        }
        let slot = &self.slots[index];
        self.with_home_bucket(slot, || {
            let refcnt = slot.refcnt.load(Ordering::Relaxed);
            if refcnt == 0 {
                panic!("bunpin: buffer {index} is not referenced");
            }
            slot.refcnt.store(refcnt - 1, Ordering::Relaxed);
        });
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Whether a buffer currently carries `(dev, blockno)`, valid or not.
    pub fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        let _irq = IrqGuard::new(&self.cpu);
        let bucket = self.buckets[bucket_of(blockno)].lock();
        self.lookup(&bucket, dev, blockno).is_some()
    }

    /// Number of buffers in the pool.
    #[inline]
    pub const fn capacity(&self) -> usize {
        NBUF
    }

    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Checks the structural invariants of the whole pool.
    ///
    /// Takes the eviction lock and then every bucket lock in ascending
    /// order, so the pool is frozen while it is inspected.
    ///
    /// # Errors
    /// The first violation found.
    pub fn audit(&self) -> Result<(), AuditError> {
        let _irq = IrqGuard::new(&self.cpu);
        let _evicting = self.lock.lock();
        let buckets: [_; NBUCKET] = core::array::from_fn(|b| self.buckets[b].lock());

        let mut seen = [false; NBUF];
        for (b, bucket) in buckets.iter().enumerate() {
            bucket.walk(b, |i| {
                if core::mem::replace(&mut seen[i], true) {
                    return Err(AuditError::Duplicate { index: i });
                }
                let home = self.slots[i].home();
                if home != b {
                    return Err(AuditError::WrongBucket {
                        index: i,
                        bucket: b,
                        expected: home,
                    });
                }
                Ok(())
            })?;
        }
        if let Some(index) = seen.iter().position(|&on_list| !on_list) {
            return Err(AuditError::Missing { index });
        }

        for (i, a) in self.slots.iter().enumerate() {
            if !a.mapped.load(Ordering::Relaxed) {
                continue;
            }
            let dev = a.dev.load(Ordering::Relaxed);
            let blockno = a.blockno.load(Ordering::Relaxed);
            if self.slots[i + 1..].iter().any(|b| b.holds(dev, blockno)) {
                return Err(AuditError::Aliased { dev, blockno });
            }
        }
        Ok(())
    }
}
