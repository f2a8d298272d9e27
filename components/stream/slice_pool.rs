/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A process-global allocator for fixed-size byte slices, grouped in
//! areas.  I/O buffers (socket input FIFOs, pipe buffers) all come
//! from here so that a proxy with ten thousand idle connections does
//! not fragment the heap; fully freed areas give their memory back.

use std::sync::{Arc, Mutex};

/// One slice handed out by a [`SlicePool`], tagged with the area it
/// came from.  Return it with [`SlicePool::free`].
pub struct SliceAllocation {
    pub area: usize,
    pub data: Box<[u8]>,
}

struct Area {
    /// Slices currently handed out from this area.
    allocated: usize,
    /// Freed slices kept for reuse while the area is live.
    free: Vec<Box<[u8]>>,
    /// How many slices were ever created for this area.
    created: usize,
}

struct PoolInner {
    areas: Vec<Area>,
}

/// Thread-safe at allocate/free granularity; everything else in this
/// workspace is single-threaded.
pub struct SlicePool {
    slice_size: usize,
    slices_per_area: usize,
    inner: Mutex<PoolInner>,
}

impl SlicePool {
    pub fn new(slice_size: usize, slices_per_area: usize) -> Arc<SlicePool> {
        assert!(slice_size > 0);
        assert!(slices_per_area > 0);

        Arc::new(SlicePool {
            slice_size,
            slices_per_area,
            inner: Mutex::new(PoolInner { areas: Vec::new() }),
        })
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    pub fn alloc(&self) -> SliceAllocation {
        let mut inner = self.inner.lock().unwrap();

        let area = match inner
            .areas
            .iter()
            .position(|a| !a.free.is_empty() || a.created < self.slices_per_area)
        {
            Some(i) => i,
            None => {
                inner.areas.push(Area {
                    allocated: 0,
                    free: Vec::new(),
                    created: 0,
                });
                inner.areas.len() - 1
            }
        };

        let a = &mut inner.areas[area];
        a.allocated += 1;
        let data = match a.free.pop() {
            Some(data) => data,
            None => {
                a.created += 1;
                vec![0u8; self.slice_size].into_boxed_slice()
            }
        };

        SliceAllocation { area, data }
    }

    pub fn free(&self, allocation: SliceAllocation) {
        let mut inner = self.inner.lock().unwrap();
        let a = &mut inner.areas[allocation.area];
        assert!(a.allocated > 0);
        a.allocated -= 1;

        if a.allocated == 0 {
            /* the area is empty: hand its memory back instead of
               hoarding it */
            a.free.clear();
            a.created = 0;
            drop(allocation.data);
        } else {
            a.free.push(allocation.data);
        }
    }
}

use std::sync::OnceLock;

static GLOBAL_POOL: OnceLock<Arc<SlicePool>> = OnceLock::new();

/// The process-global pool used for socket input buffers (8 kiB
/// slices).
pub fn global_pool() -> &'static Arc<SlicePool> {
    GLOBAL_POOL.get_or_init(|| SlicePool::new(8192, 1024))
}
