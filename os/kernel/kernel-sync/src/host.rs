//! # Hosted collaborators
//!
//! [`Cpu`] and [`Scheduler`] implementations backed by OS threads, so kernel
//! subsystems can be exercised by ordinary `cargo test` runs. Every thread
//! models one task running on one core:
//!
//! * the core id is a per-thread value set with [`HostCpu::bind_current_thread`]
//!   (threads default to core 0),
//! * the interrupt-enable flag is per thread and starts out enabled,
//! * task ids are handed out lazily, one per thread.

extern crate std;

use crate::{Cpu, Scheduler, SpinLockGuard, TaskId};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

std::thread_local! {
    static CORE_ID: Cell<usize> = const { Cell::new(0) };
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
    static TASK_ID: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Next task id to hand out; zero is never used.
static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

/// [`Cpu`] whose core identity and interrupt flag are per OS thread.
#[derive(Debug, Default, Copy, Clone)]
pub struct HostCpu;

impl HostCpu {
    /// Makes the calling thread execute as core `id` from now on.
    pub fn bind_current_thread(id: usize) {
        CORE_ID.with(|c| c.set(id));
    }
}

impl Cpu for HostCpu {
    fn id(&self) -> usize {
        CORE_ID.with(Cell::get)
    }

    fn interrupts_enabled(&self) -> bool {
        INTERRUPTS_ENABLED.with(Cell::get)
    }

    fn disable_interrupts(&self) {
        INTERRUPTS_ENABLED.with(|c| c.set(false));
    }

    fn enable_interrupts(&self) {
        INTERRUPTS_ENABLED.with(|c| c.set(true));
    }
}

/// [`Scheduler`] that suspends OS threads on a condition variable.
///
/// Each channel carries a wakeup generation. A sleeper records the
/// generation while holding the scheduler mutex, only then releases the
/// caller's spinlock, and waits until the generation moves. A wakeup has to
/// take the same mutex to bump the generation, so it cannot slip in between.
#[derive(Debug, Default)]
pub struct HostScheduler {
    generations: Mutex<HashMap<usize, u64>>,
    wake: Condvar,
}

impl HostScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for HostScheduler {
    fn current_task(&self) -> TaskId {
        TASK_ID.with(|id| {
            id.get().unwrap_or_else(|| {
                let fresh = TaskId(NEXT_TASK.fetch_add(1, Ordering::Relaxed));
                id.set(Some(fresh));
                fresh
            })
        })
    }

    fn sleep<T>(&self, channel: usize, guard: SpinLockGuard<'_, T>) {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seen = generations.get(&channel).copied().unwrap_or(0);
        drop(guard);

        while generations.get(&channel).copied().unwrap_or(0) == seen {
            generations = self
                .wake
                .wait(generations)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wakeup(&self, channel: usize) {
        let mut generations = self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generations.entry(channel).or_insert(0) += 1;
        drop(generations);
        self.wake.notify_all();
    }
}
