mod common;

use common::{Cache, cache};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 4;
const BLOCKS: u32 = 20;
const ROUNDS: usize = 1_500;

fn counter(buf: &[u8]) -> u64 {
    u64::from_le_bytes(buf[..8].try_into().unwrap())
}

/// Runs `work` on a helper thread and fails the test if it does not finish
/// in time, instead of hanging on a deadlock.
fn with_watchdog(secs: u64, work: impl FnOnce() + Send + 'static) {
    let (done, finished) = mpsc::channel();
    let worker = thread::spawn(move || {
        work();
        let _ = done.send(());
    });
    match finished.recv_timeout(Duration::from_secs(secs)) {
        Ok(()) => worker.join().unwrap(),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // the work panicked; surface its panic
            worker.join().unwrap();
        }
        Err(mpsc::RecvTimeoutError::Timeout) => panic!("buffer cache deadlocked"),
    }
}

#[test]
fn random_readers_writers_and_pins_keep_the_invariants() {
    with_watchdog(60, || {
        let c: Arc<Cache<10>> = Arc::new(cache());
        let increments: Arc<[AtomicU64]> = (0..BLOCKS).map(|_| AtomicU64::new(0)).collect();
        let stop = Arc::new(AtomicBool::new(false));
        // workers, the auditor and this thread
        let start = Arc::new(Barrier::new(WORKERS + 2));

        let auditor = {
            let (c, stop, start) = (Arc::clone(&c), Arc::clone(&stop), Arc::clone(&start));
            thread::spawn(move || {
                start.wait();
                while !stop.load(Ordering::Relaxed) {
                    assert_eq!(c.audit(), Ok(()));
                    thread::yield_now();
                }
            })
        };

        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let (c, increments, start) =
                    (Arc::clone(&c), Arc::clone(&increments), Arc::clone(&start));
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut pinned = None;
                    start.wait();

                    for _ in 0..ROUNDS {
                        let blockno = rng.gen_range(0..BLOCKS);
                        let mut buf = c.read(1, blockno);
                        assert_eq!((buf.dev(), buf.blockno()), (1, blockno));
                        assert!(buf.is_valid());

                        if rng.gen_bool(0.5) {
                            let next = counter(&buf[..]) + 1;
                            buf[..8].copy_from_slice(&next.to_le_bytes());
                            buf.write();
                            increments[blockno as usize].fetch_add(1, Ordering::Relaxed);
                        }

                        // at most one pin per worker, so two buffers each is
                        // the most a worker ever references
                        if pinned.is_none() && rng.gen_bool(0.1) {
                            pinned = Some(buf.pin());
                        }
                        // a referenced buffer is never recycled under its holder
                        thread::yield_now();
                        assert_eq!((buf.dev(), buf.blockno()), (1, blockno));
                        assert!(buf.refcnt() >= 1);
                        buf.release();

                        if rng.gen_bool(0.2) {
                            if let Some(pin) = pinned.take() {
                                c.unpin(pin);
                            }
                        }
                    }
                    if let Some(pin) = pinned.take() {
                        c.unpin(pin);
                    }
                })
            })
            .collect();

        start.wait();
        for w in workers {
            w.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        auditor.join().unwrap();

        assert_eq!(c.audit(), Ok(()));
        for blockno in 0..BLOCKS {
            let buf = c.read(1, blockno);
            let expected = increments[blockno as usize].load(Ordering::Relaxed);
            // unwritten blocks read back as the block number in every byte
            let base = u64::from_le_bytes([blockno.to_le_bytes()[0]; 8]);
            assert_eq!(counter(&buf[..]), base + expected, "block {blockno}");
        }
    });
}

#[test]
fn contended_block_counts_every_increment() {
    with_watchdog(60, || {
        let c: Arc<Cache<4>> = Arc::new(cache());
        let start = Arc::new(Barrier::new(WORKERS));
        let base = u64::from_le_bytes([7; 8]);

        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let (c, start) = (Arc::clone(&c), Arc::clone(&start));
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..500 {
                        let mut buf = c.read(3, 7);
                        let next = counter(&buf[..]) + 1;
                        buf[..8].copy_from_slice(&next.to_le_bytes());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let buf = c.read(3, 7);
        assert_eq!(counter(&buf[..]), base + (WORKERS as u64) * 500);
        // the block never left the cache, so it was loaded once
        assert_eq!(c.device().reads(), 1);
    });
}
