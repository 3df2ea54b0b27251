#![allow(dead_code)]

use kernel_bio::{BlockDevice, BufferCache, Clock};
use kernel_info::param::BSIZE;
use kernel_sync::Cpu;
use kernel_sync::host::{HostCpu, HostScheduler};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub type Cache<const N: usize> = BufferCache<MemDisk, HostScheduler, Ticks, HostCpu, N>;

pub fn cache<const N: usize>() -> Cache<N> {
    BufferCache::new(
        MemDisk::default(),
        HostScheduler::new(),
        Ticks::default(),
        HostCpu,
    )
}

/// In-memory disk. A block never written reads back as the low byte of its
/// block number repeated in every byte.
/// Both operations assert that interrupts are enabled on the calling thread.
#[derive(Default)]
pub struct MemDisk {
    blocks: Mutex<HashMap<(u32, u32), [u8; BSIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemDisk {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn block(&self, dev: u32, blockno: u32) -> Option<[u8; BSIZE]> {
        self.blocks.lock().unwrap().get(&(dev, blockno)).copied()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]) {
        assert!(HostCpu.interrupts_enabled(), "disk read with interrupts masked");
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.blocks.lock().unwrap().get(&(dev, blockno)) {
            Some(stored) => data.copy_from_slice(stored),
            None => data.fill(blockno.to_le_bytes()[0]),
        }
    }

    fn write_block(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        assert!(HostCpu.interrupts_enabled(), "disk write with interrupts masked");
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blocks.lock().unwrap().insert((dev, blockno), *data);
    }
}

/// Clock that advances on every reading, so releases are strictly ordered.
#[derive(Default)]
pub struct Ticks(AtomicU64);

impl Clock for Ticks {
    fn now(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}
