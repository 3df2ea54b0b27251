mod common;

use common::{MemDisk, Ticks, cache};
use kernel_bio::{AuditError, BufferCache};
use kernel_info::param::BSIZE;
use kernel_sync::Cpu;
use kernel_sync::host::{HostCpu, HostScheduler};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// [`HostCpu`] that counts how often interrupts get masked.
struct CountingCpu {
    masks: Arc<AtomicUsize>,
}

impl Cpu for CountingCpu {
    fn id(&self) -> usize {
        HostCpu.id()
    }

    fn interrupts_enabled(&self) -> bool {
        HostCpu.interrupts_enabled()
    }

    fn disable_interrupts(&self) {
        self.masks.fetch_add(1, Ordering::SeqCst);
        HostCpu.disable_interrupts();
    }

    fn enable_interrupts(&self) {
        HostCpu.enable_interrupts();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast::<&str>()
            .map(|s| (*s).to_string())
            .unwrap_or_default(),
    }
}

fn disk<const N: usize>(c: &common::Cache<N>) -> &MemDisk {
    c.device()
}

#[test]
fn read_loads_once_then_hits() {
    let c = cache::<4>();

    let buf = c.read(1, 5);
    assert!(buf.is_valid());
    assert_eq!((buf.dev(), buf.blockno()), (1, 5));
    assert!(buf.iter().all(|&b| b == 5));
    assert_eq!(buf.refcnt(), 1);
    buf.release();
    assert_eq!(disk(&c).reads(), 1);

    let buf = c.read(1, 5);
    assert!(buf.is_valid());
    drop(buf);
    assert_eq!(disk(&c).reads(), 1);
    assert!(c.is_cached(1, 5));
    assert!(!c.is_cached(2, 5));
}

#[test]
fn acquire_skips_the_load_and_write_goes_through() {
    let c = cache::<4>();

    let mut buf = c.acquire(1, 7);
    assert!(!buf.is_valid());
    buf.fill(0xab);
    buf.write();
    drop(buf);

    assert_eq!(disk(&c).reads(), 0);
    assert_eq!(disk(&c).writes(), 1);
    assert_eq!(disk(&c).block(1, 7), Some([0xab; BSIZE]));

    // write leaves the validity flag alone, so the next read loads
    let buf = c.read(1, 7);
    assert!(buf.is_valid());
    assert!(buf.iter().all(|&b| b == 0xab));
    assert_eq!(disk(&c).reads(), 1);
}

#[test]
fn same_block_on_two_devices_uses_two_buffers() {
    let c = cache::<4>();
    let a = c.read(1, 3);
    let b = c.read(2, 3);
    assert_ne!(a.index(), b.index());
    assert!(c.audit().is_ok());
}

#[test]
fn concurrent_requests_share_one_buffer() {
    let c = cache::<4>();

    let first = c.read(1, 9);
    let index = first.index();

    thread::scope(|s| {
        let waiter = s.spawn(|| c.read(1, 9).index());

        // the waiter takes its reference before blocking on the sleep lock
        while first.refcnt() < 2 {
            thread::yield_now();
        }
        drop(first);

        assert_eq!(waiter.join().unwrap(), index);
    });

    // both references were dropped again
    let buf = c.acquire(1, 9);
    assert_eq!(buf.refcnt(), 1);
    assert!(buf.is_valid());
    assert_eq!(disk(&c).reads(), 1);
}

#[test]
fn least_recently_released_buffer_is_recycled() {
    let c = cache::<3>();

    // 1 and 14 share bucket 1
    for blockno in [1, 14, 27] {
        c.read(1, blockno).release();
    }

    c.read(1, 2).release();
    assert!(!c.is_cached(1, 1));
    assert!(c.is_cached(1, 14) && c.is_cached(1, 27) && c.is_cached(1, 2));

    let again = c.read(1, 1);
    assert!(again.is_valid());
    assert!(again.iter().all(|&b| b == 1));
    drop(again);
    assert!(!c.is_cached(1, 14));
    assert_eq!(disk(&c).reads(), 5);
    assert!(c.audit().is_ok());
}

#[test]
fn a_hit_refreshes_the_release_time() {
    let c = cache::<2>();
    c.read(1, 1).release();
    c.read(1, 2).release();

    c.read(1, 1).release();
    c.read(1, 3).release();

    assert!(c.is_cached(1, 1));
    assert!(!c.is_cached(1, 2));
}

#[test]
fn never_used_buffers_go_first() {
    let c = cache::<3>();
    c.read(1, 1).release();
    c.read(1, 2).release();
    c.read(1, 3).release();

    assert!(c.is_cached(1, 1) && c.is_cached(1, 2) && c.is_cached(1, 3));
    assert_eq!(disk(&c).reads(), 3);
}

#[test]
fn pinned_buffer_stays_resident() {
    let c = cache::<2>();

    let buf = c.read(1, 1);
    let pin = buf.pin();
    assert_eq!(buf.refcnt(), 2);
    drop(buf);

    c.read(1, 2).release();
    c.read(1, 3).release();
    assert!(c.is_cached(1, 1));
    assert!(!c.is_cached(1, 2));

    c.unpin(pin);
    c.read(1, 4).release();
    assert!(!c.is_cached(1, 1));
}

#[test]
#[should_panic(expected = "bget: no buffers")]
fn every_buffer_referenced_is_fatal() {
    let c = cache::<2>();
    let _a = c.read(1, 1);
    let _b = c.read(1, 2);
    let _ = c.read(1, 3);
}

#[test]
fn write_from_another_task_is_fatal() {
    let c = cache::<2>();
    let buf = c.read(1, 1);

    let outcome = thread::scope(|s| {
        s.spawn(|| panic::catch_unwind(AssertUnwindSafe(|| buf.write())))
            .join()
            .unwrap()
    });

    let msg = panic_message(outcome.unwrap_err());
    assert!(msg.starts_with("bwrite: buffer 0 is not locked by task"), "{msg}");
    assert_eq!(disk(&c).writes(), 0);

    // the holder can still write and release
    buf.write();
    buf.release();
    assert_eq!(disk(&c).writes(), 1);
}

#[test]
fn release_from_another_task_is_fatal() {
    let c = cache::<2>();
    let buf = c.read(1, 1);

    let outcome = thread::scope(|s| s.spawn(move || buf.release()).join());

    let msg = panic_message(outcome.unwrap_err());
    assert!(msg.starts_with("brelse: buffer 0"), "{msg}");
}

#[test]
fn unpin_on_another_cache_is_fatal() {
    let a = cache::<2>();
    let b = cache::<2>();

    let buf = a.read(1, 1);
    let pin = buf.pin();
    drop(buf);

    // buffer 0 of `b` is referenced, so a wrong decrement would be silent
    let held = b.read(7, 7);
    assert_eq!(held.index(), pin.index());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| b.unpin(pin)));
    let msg = panic_message(outcome.unwrap_err());
    assert!(msg.starts_with("bunpin: pin for buffer 0 belongs to another"), "{msg}");

    assert_eq!(held.refcnt(), 1);
    held.release();
    assert!(b.audit().is_ok());
}

#[test]
fn spinlock_sections_mask_interrupts() {
    let masks = Arc::new(AtomicUsize::new(0));
    let c = BufferCache::<_, _, _, _, 4>::new(
        MemDisk::default(),
        HostScheduler::new(),
        Ticks::default(),
        CountingCpu {
            masks: Arc::clone(&masks),
        },
    );

    let buf = c.read(1, 1);
    let pin = buf.pin();
    buf.release();
    c.unpin(pin);
    assert!(c.is_cached(1, 1));
    assert!(c.audit().is_ok());

    // claim, pin, release, unpin, is_cached and audit each mask once
    assert_eq!(masks.load(Ordering::SeqCst), 6);
    assert!(HostCpu.interrupts_enabled());
}

#[test]
fn audit_holds_after_buffers_move_between_buckets() {
    let c = cache::<4>();
    for round in 0..5 {
        for blockno in 0..6 {
            let mut buf = c.read(round, blockno * 13 + round);
            buf[0] = 1;
        }
        assert_eq!(c.audit(), Ok(()));
    }
}

#[test]
fn audit_errors_read_well() {
    assert_eq!(
        AuditError::WrongBucket {
            index: 3,
            bucket: 0,
            expected: 5
        }
        .to_string(),
        "buffer 3 is on bucket 0 but belongs on bucket 5"
    );
    assert_eq!(
        AuditError::Aliased { dev: 1, blockno: 9 }.to_string(),
        "dev 1 block 9 is cached twice"
    );
}
