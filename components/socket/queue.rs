/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A queue that runs at most N jobs at a time; the rest wait their
//! turn.  Dequeueing happens through a deferred event so a completed
//! job never starts its successor in the same stack frame.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::event_loop::{DeferEvent, EventLoop};

type JobCallback = Box<dyn FnOnce()>;

struct QueueInner {
    waiting: VecDeque<(u64, JobCallback)>,
    running: Vec<u64>,
    next_id: u64,
    limit: usize,
}

pub struct LimitedConcurrencyQueue {
    inner: Rc<RefCell<QueueInner>>,
    defer_start: DeferEvent,
}

impl LimitedConcurrencyQueue {
    pub fn new(event_loop: &EventLoop, limit: usize) -> Rc<LimitedConcurrencyQueue> {
        let inner = Rc::new(RefCell::new(QueueInner {
            waiting: VecDeque::new(),
            running: Vec::new(),
            next_id: 1,
            limit,
        }));

        let inner2 = Rc::clone(&inner);
        let defer_start = DeferEvent::new(event_loop, move || {
            Self::start_next(&inner2);
        });

        Rc::new(LimitedConcurrencyQueue { inner, defer_start })
    }

    fn start_next(inner: &Rc<RefCell<QueueInner>>) {
        let callback = {
            let mut q = inner.borrow_mut();
            if q.waiting.is_empty() || q.running.len() >= q.limit {
                return;
            }
            let (id, callback) = q.waiting.pop_front().unwrap();
            q.running.push(id);
            callback
        };

        callback();

        /* maybe there is room for another one */
        Self::start_next(inner);
    }

    /// Schedule a job; its callback runs synchronously if there is
    /// room, otherwise when a running job finishes.
    pub fn schedule(self: &Rc<Self>, callback: JobCallback) -> LimitedConcurrencyJob {
        let mut run_now = None;
        let id = {
            let mut q = self.inner.borrow_mut();
            let id = q.next_id;
            q.next_id += 1;

            if q.waiting.is_empty() && q.running.len() < q.limit {
                q.running.push(id);
                run_now = Some(callback);
            } else {
                q.waiting.push_back((id, callback));
            }
            id
        };

        let job = LimitedConcurrencyJob {
            queue: Rc::clone(self),
            id,
        };

        if let Some(callback) = run_now {
            callback();
        }

        job
    }

    fn finish(&self, id: u64) {
        let was_running = {
            let mut q = self.inner.borrow_mut();
            match q.running.iter().position(|&r| r == id) {
                Some(i) => {
                    q.running.swap_remove(i);
                    true
                }
                None => {
                    q.waiting.retain(|(w, _)| *w != id);
                    false
                }
            }
        };

        if was_running {
            self.defer_start.schedule();
        }
    }

    pub fn running_count(&self) -> usize {
        self.inner.borrow().running.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.borrow().waiting.len()
    }
}

/// A job handle; dropping it cancels a waiting job or vacates a
/// running slot.
pub struct LimitedConcurrencyJob {
    queue: Rc<LimitedConcurrencyQueue>,
    id: u64,
}

impl LimitedConcurrencyJob {
    pub fn is_running(&self) -> bool {
        self.queue.inner.borrow().running.contains(&self.id)
    }

    pub fn is_waiting(&self) -> bool {
        self.queue
            .inner
            .borrow()
            .waiting
            .iter()
            .any(|(id, _)| *id == self.id)
    }
}

impl Drop for LimitedConcurrencyJob {
    fn drop(&mut self) {
        self.queue.finish(self.id);
    }
}
