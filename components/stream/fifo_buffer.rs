/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A fixed-capacity byte FIFO with a pointer-stable readable region:
//! consumers peek at the pending bytes in place and mark them
//! consumed afterwards.  The write side compacts pending bytes to the
//! front when the tail is exhausted, so a reader that consumes slowly
//! never shrinks the writable window permanently.

use std::sync::Arc;

use crate::slice_pool::{SliceAllocation, SlicePool};

pub struct FifoBuffer {
    buffer: Option<Box<[u8]>>,
    start: usize,
    end: usize,
    pool: Option<(Arc<SlicePool>, usize)>,
}

impl FifoBuffer {
    pub fn new(size: usize) -> FifoBuffer {
        assert!(size > 0);

        FifoBuffer {
            buffer: Some(vec![0u8; size].into_boxed_slice()),
            start: 0,
            end: 0,
            pool: None,
        }
    }

    /// Allocate the storage from a slice pool; it is returned there on
    /// drop.
    pub fn from_pool(pool: &Arc<SlicePool>) -> FifoBuffer {
        let allocation = pool.alloc();
        FifoBuffer {
            buffer: Some(allocation.data),
            start: 0,
            end: 0,
            pool: Some((Arc::clone(pool), allocation.area)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().unwrap().len()
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Number of pending (readable) bytes.
    pub fn available(&self) -> usize {
        debug_assert!(self.end >= self.start);
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.end == self.capacity()
    }

    /// The pending bytes, in place.  Empty slice when there is
    /// nothing to read.
    pub fn read(&self) -> &[u8] {
        &self.buffer.as_ref().unwrap()[self.start..self.end]
    }

    /// Mark `length` pending bytes as consumed.  The slice returned by
    /// [`read`](Self::read) stays valid; this may be called
    /// repeatedly.
    pub fn consume(&mut self, length: usize) {
        assert!(self.start + length <= self.end);
        self.start += length;
    }

    fn shift(&mut self) {
        if self.start == 0 {
            return;
        }

        let buffer = self.buffer.as_mut().unwrap();
        if self.end > self.start {
            buffer.copy_within(self.start..self.end, 0);
        }
        self.end -= self.start;
        self.start = 0;
    }

    /// The writable tail.  Compacts first if the tail is exhausted;
    /// empty slice when the buffer is full.
    pub fn write(&mut self) -> &mut [u8] {
        let capacity = self.capacity();

        if self.end == capacity {
            self.shift();
        } else if self.start > 0 && self.start == self.end {
            self.start = 0;
            self.end = 0;
        }

        let end = self.end;
        &mut self.buffer.as_mut().unwrap()[end..capacity]
    }

    /// Commit `length` bytes written into the slice obtained from
    /// [`write`](Self::write).
    pub fn append(&mut self, length: usize) {
        debug_assert!(self.end + length <= self.capacity());
        self.end += length;
    }

    /// Copy as much of `src` as fits; returns the number of bytes
    /// taken (0 when full).
    pub fn push(&mut self, src: &[u8]) -> usize {
        let w = self.write();
        let n = src.len().min(w.len());
        w[..n].copy_from_slice(&src[..n]);
        self.append(n);
        n
    }
}

impl Drop for FifoBuffer {
    fn drop(&mut self) {
        if let Some((pool, area)) = self.pool.take() {
            let data = self.buffer.take().unwrap();
            pool.free(SliceAllocation { area, data });
        }
    }
}
