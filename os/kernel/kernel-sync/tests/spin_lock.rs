use kernel_sync::SpinLock;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn guard_holds_the_lock_until_dropped() {
    let l = SpinLock::named("bcache", 0_u32);
    assert!(!l.is_locked());

    let mut g = l.lock();
    *g = 41;
    assert!(l.is_locked());
    assert_eq!(g.lock_name(), "bcache");
    drop(g);

    assert!(!l.is_locked());
    assert_eq!(l.with_lock(|v| *v + 1), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1_u8);
    assert_eq!(l.name(), "spinlock");

    let held = l.try_lock().expect("uncontended");
    assert!(l.try_lock().is_none());

    drop(held);
    assert!(l.try_lock().is_some());
}

#[test]
fn debug_output_names_the_lock() {
    let l = SpinLock::named("kmem", Vec::<usize>::new());
    let g = l.lock();
    let s = format!("{l:?}");
    assert!(s.contains("kmem"), "{s}");
    assert!(s.contains("locked: true"), "{s}");
    drop(g);
    assert!(format!("{l:?}").contains("locked: false"));
}

#[test]
fn get_mut_needs_no_locking() {
    let mut l = SpinLock::named("bcache.bucket", vec![0_usize, 1, 2]);
    l.get_mut().retain(|&i| i != 1);
    assert!(!l.is_locked());
    assert_eq!(l.lock().as_slice(), &[0, 2]);
}

/// Threads move items between two lists under their locks, in a fixed
/// order, and check that nobody else is inside a critical section with them.
#[test]
fn contended_transfers_conserve_every_item() {
    let threads = 8;
    let rounds = 2_000;

    let lists = Arc::new([
        SpinLock::named("kmem", (0..64_usize).collect::<Vec<_>>()),
        SpinLock::named("kmem", Vec::new()),
    ]);
    let inside = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let (lists, inside, start) = (Arc::clone(&lists), Arc::clone(&inside), Arc::clone(&start));
            thread::spawn(move || {
                start.wait();
                for r in 0..rounds {
                    let (from, to) = if (t + r) % 2 == 0 { (0, 1) } else { (1, 0) };
                    let taken = lists[from].with_lock(|list| {
                        assert_eq!(inside[from].fetch_add(1, Ordering::SeqCst), 0);
                        let item = list.pop();
                        inside[from].fetch_sub(1, Ordering::SeqCst);
                        item
                    });
                    if let Some(item) = taken {
                        lists[to].with_lock(|list| {
                            assert_eq!(inside[to].fetch_add(1, Ordering::SeqCst), 0);
                            list.push(item);
                            inside[to].fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let mut all: Vec<usize> = lists.iter().flat_map(|l| l.with_lock(|v| v.clone())).collect();
    all.sort_unstable();
    assert_eq!(all, (0..64).collect::<Vec<_>>());
}

#[test]
fn panicking_holder_still_unlocks() {
    let l = SpinLock::named("kmem", 0_u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("kfree: boom");
        });
    }));
    assert!(res.is_err());

    assert!(!l.is_locked());
    assert_eq!(l.with_lock(|v| *v), 123);
}
