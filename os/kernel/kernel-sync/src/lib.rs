//! # Kernel synchronization primitives
//!
//! Two kinds of mutual exclusion, plus the processor and scheduler seams they
//! depend on:
//!
//! * [`SpinLock`] busy-waits and protects short, bounded critical sections.
//!   Combine it with an [`IrqGuard`] when an interrupt handler on the same
//!   core could take the same lock.
//! * [`SleepLock`] suspends the calling task through a [`Scheduler`] and is
//!   the only primitive that may be held across blocking operations.
//! * [`Cpu`] identifies the executing core and masks its interrupts;
//!   [`X86Cpu`] implements it on bare metal.
//! * [`SyncOnceCell`] holds singleton state populated by an explicit init call.
//!
//! With the `std` feature, [`host`] provides thread-backed implementations of
//! [`Cpu`] and [`Scheduler`] for running kernel code in tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "std"))]
pub mod host;
pub mod irq;
mod sched;
mod sleep_lock;
mod spin_lock;
mod sync_once_cell;

pub use irq::{Cpu, IrqGuard, X86Cpu};
pub use sched::{Scheduler, TaskId};
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
