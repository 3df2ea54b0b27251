use crate::SpinLockGuard;
use core::fmt;

/// Identifies a schedulable task (a process or kernel thread).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}", self.0)
    }
}

/// The task-suspension mechanism blocking locks are built on.
///
/// Channels are opaque `usize` values; by convention the address of the
/// object being waited for.
pub trait Scheduler: Sync {
    /// The task executing on the current core.
    fn current_task(&self) -> TaskId;

    /// Atomically releases `guard` and suspends the calling task until some
    /// other task calls [`wakeup`](Self::wakeup) on `channel`.
    ///
    /// A wakeup issued after `guard` is released must not be lost. Returning
    /// spuriously is permitted; callers re-check their condition in a loop.
    fn sleep<T>(&self, channel: usize, guard: SpinLockGuard<'_, T>);

    /// Makes every task sleeping on `channel` runnable again.
    fn wakeup(&self, channel: usize);
}
