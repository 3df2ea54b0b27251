//! Hash bucket lists.
//!
//! Buffers are named by their index into the pool. A bucket keeps its own
//! `next`/`prev` tables, so a buffer's links are always guarded by the lock
//! of the bucket it is on, and moving a buffer is an unlink from one bucket
//! followed by a push onto another.

use crate::AuditError;

pub(crate) struct Bucket<const NBUF: usize> {
    head: Option<usize>,
    next: [Option<usize>; NBUF],
    prev: [Option<usize>; NBUF],
}

impl<const NBUF: usize> Bucket<NBUF> {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            next: [None; NBUF],
            prev: [None; NBUF],
        }
    }

    /// A bucket holding every buffer of the pool, `0` first.
    pub(crate) const fn holding_all() -> Self {
        let mut bucket = Self::new();
        let mut i = 0;
        while i < NBUF {
            if i > 0 {
                bucket.prev[i] = Some(i - 1);
            }
            if i + 1 < NBUF {
                bucket.next[i] = Some(i + 1);
            }
            i += 1;
        }
        if NBUF > 0 {
            bucket.head = Some(0);
        }
        bucket
    }

    pub(crate) const fn push_front(&mut self, i: usize) {
        self.prev[i] = None;
        self.next[i] = self.head;
        if let Some(old) = self.head {
            self.prev[old] = Some(i);
        }
        self.head = Some(i);
    }

    /// Unlinks `i`, which must be on this bucket.
    pub(crate) const fn remove(&mut self, i: usize) {
        let (prev, next) = (self.prev[i], self.next[i]);
        match prev {
            Some(p) => self.next[p] = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.prev[n] = prev;
        }
        self.next[i] = None;
        self.prev[i] = None;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let i = cursor?;
            cursor = self.next[i];
            Some(i)
        })
    }

    /// Walks the list checking that `prev` mirrors `next` and that it ends
    /// within `NBUF` steps, calling `visit` on every member.
    pub(crate) fn walk(
        &self,
        bucket: usize,
        mut visit: impl FnMut(usize) -> Result<(), AuditError>,
    ) -> Result<(), AuditError> {
        let mut prev = None;
        let mut cursor = self.head;
        let mut steps = 0;
        while let Some(i) = cursor {
            steps += 1;
            if steps > NBUF || self.prev[i] != prev {
                return Err(AuditError::BrokenLinks { bucket });
            }
            visit(i)?;
            prev = Some(i);
            cursor = self.next[i];
        }
        Ok(())
    }
}
