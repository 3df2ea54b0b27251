use crate::{Scheduler, SpinLock, TaskId};
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    ptr,
};

/// Ownership record of a [`SleepLock`], protected by its inner spinlock.
struct SleepState {
    holder: Option<TaskId>,
}

/// Long-term lock for data that is held across blocking operations.
///
/// Contended acquisitions suspend the calling task through the
/// [`Scheduler`] instead of spinning. The inner spinlock only guards the
/// ownership record and is never held while a task waits, so a sleeping
/// waiter blocks nobody but itself.
pub struct SleepLock<T> {
    state: SpinLock<SleepState>,
    name: &'static str,
    data: UnsafeCell<T>,
}

// Safety: the holder record serializes access to `data`.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            state: SpinLock::named("sleep lock", SleepState { holder: None }),
            name,
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Wait channel for tasks queued on this lock.
    #[inline]
    fn channel(&self) -> usize {
        ptr::from_ref(self).addr()
    }

    /// Acquires the lock, suspending the calling task while another task holds it.
    pub fn lock<'a, S: Scheduler>(&'a self, sched: &'a S) -> SleepLockGuard<'a, T, S> {
        let me = sched.current_task();
        let mut state = self.state.lock();
        while state.holder.is_some() {
            sched.sleep(self.channel(), state);
            state = self.state.lock();
        }
        state.holder = Some(me);
        drop(state);
        SleepLockGuard { lock: self, sched }
    }

    /// Acquires the lock only if nobody holds it.
    pub fn try_lock<'a, S: Scheduler>(&'a self, sched: &'a S) -> Option<SleepLockGuard<'a, T, S>> {
        let mut state = self.state.lock();
        if state.holder.is_some() {
            return None;
        }
        state.holder = Some(sched.current_task());
        drop(state);
        Some(SleepLockGuard { lock: self, sched })
    }

    /// Whether the task currently executing holds this lock.
    pub fn holding<S: Scheduler>(&self, sched: &S) -> bool {
        let me = sched.current_task();
        self.state.with_lock(|state| state.holder == Some(me))
    }

    /// The task holding the lock, if any.
    pub fn holder(&self) -> Option<TaskId> {
        self.state.with_lock(|state| state.holder)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock<S: Scheduler>(&self, sched: &S) {
        self.state.with_lock(|state| state.holder = None);
        sched.wakeup(self.channel());
    }
}

impl<T> fmt::Debug for SleepLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepLock")
            .field("name", &self.name)
            .field("holder", &self.holder())
            .finish_non_exhaustive()
    }
}

/// Grants access to the data of a held [`SleepLock`]; releases it on drop.
pub struct SleepLockGuard<'a, T, S: Scheduler> {
    lock: &'a SleepLock<T>,
    sched: &'a S,
}

impl<'a, T, S: Scheduler> SleepLockGuard<'a, T, S> {
    /// The lock this guard was obtained from.
    #[inline]
    #[must_use]
    pub const fn lock(&self) -> &'a SleepLock<T> {
        self.lock
    }

    /// Whether the task executing right now is the one recorded as holder.
    ///
    /// A guard moved to a different task still unlocks on drop, but this
    /// returns `false` there.
    #[inline]
    #[must_use]
    pub fn held_by_current(&self) -> bool {
        self.lock.holding(self.sched)
    }
}

impl<T, S: Scheduler> Deref for SleepLockGuard<'_, T, S> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, S: Scheduler> DerefMut for SleepLockGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, S: Scheduler> Drop for SleepLockGuard<'_, T, S> {
    fn drop(&mut self) {
        self.lock.unlock(self.sched);
    }
}
