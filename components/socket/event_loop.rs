/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A single-threaded cooperative event loop: fd readiness callbacks
//! via mio, a coarse timer heap, and a deferred-callback queue for
//! work that must run on the next iteration rather than in the
//! current stack frame.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

pub type ReadyCallback = Rc<RefCell<dyn FnMut(Readiness)>>;
type TimerCallback = Rc<RefCell<dyn FnMut()>>;

struct TimerState {
    deadline: Instant,
    callback: TimerCallback,
    /// Bumped on re-schedule so stale heap entries are skipped.
    generation: u64,
}

struct LoopInner {
    poll: RefCell<Poll>,
    events: RefCell<Events>,

    sources: RefCell<FxHashMap<usize, ReadyCallback>>,
    next_token: Cell<usize>,

    timers: RefCell<FxHashMap<u64, TimerState>>,
    timer_heap: RefCell<BinaryHeap<Reverse<(Instant, u64, u64)>>>,
    next_timer_id: Cell<u64>,

    deferred: RefCell<VecDeque<Box<dyn FnOnce()>>>,

    stop: Cell<bool>,
}

#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    pub fn new() -> io::Result<EventLoop> {
        Ok(EventLoop {
            inner: Rc::new(LoopInner {
                poll: RefCell::new(Poll::new()?),
                events: RefCell::new(Events::with_capacity(256)),
                sources: RefCell::new(FxHashMap::default()),
                next_token: Cell::new(1),
                timers: RefCell::new(FxHashMap::default()),
                timer_heap: RefCell::new(BinaryHeap::new()),
                next_timer_id: Cell::new(1),
                deferred: RefCell::new(VecDeque::new()),
                stop: Cell::new(false),
            }),
        })
    }

    /// Register a non-blocking fd; `callback` fires on readiness.
    pub fn register_fd(
        &self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        callback: ReadyCallback,
    ) -> io::Result<SourceHandle> {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);

        self.inner.sources.borrow_mut().insert(token, callback);

        let handle = SourceHandle {
            event_loop: self.clone(),
            fd,
            token,
            registered: Cell::new(false),
        };
        handle.set_interest(readable, writable)?;
        Ok(handle)
    }

    /// Run `callback` on the next loop iteration.
    pub fn defer<F: FnOnce() + 'static>(&self, callback: F) {
        self.inner.deferred.borrow_mut().push_back(Box::new(callback));
    }

    fn schedule_timer(&self, id: u64, deadline: Instant, callback: TimerCallback) {
        let mut timers = self.inner.timers.borrow_mut();
        let generation = self.inner.next_timer_id.get();
        self.inner.next_timer_id.set(generation + 1);
        timers.insert(
            id,
            TimerState {
                deadline,
                callback,
                generation,
            },
        );
        self.inner
            .timer_heap
            .borrow_mut()
            .push(Reverse((deadline, generation, id)));
    }

    fn cancel_timer(&self, id: u64) {
        self.inner.timers.borrow_mut().remove(&id);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let timers = self.inner.timers.borrow();
        timers.values().map(|t| t.deadline).min()
    }

    fn run_deferred(&self) -> bool {
        let mut any = false;
        loop {
            let Some(callback) = self.inner.deferred.borrow_mut().pop_front() else {
                break;
            };
            any = true;
            callback();
        }
        any
    }

    fn fire_timers(&self) {
        let now = Instant::now();
        loop {
            let entry = {
                let mut heap = self.inner.timer_heap.borrow_mut();
                match heap.peek() {
                    Some(Reverse((deadline, _, _))) if *deadline <= now => heap.pop(),
                    _ => None,
                }
            };
            let Some(Reverse((_, generation, id))) = entry else {
                break;
            };

            let callback = {
                let mut timers = self.inner.timers.borrow_mut();
                match timers.get(&id) {
                    Some(t) if t.generation == generation => {
                        let cb = Rc::clone(&t.callback);
                        timers.remove(&id);
                        Some(cb)
                    }
                    _ => None, /* stale heap entry */
                }
            };

            if let Some(callback) = callback {
                (callback.borrow_mut())();
            }
        }
    }

    /// One loop iteration.  Returns false when there is nothing left
    /// to wait for.
    pub fn run_once(&self) -> io::Result<bool> {
        if self.run_deferred() {
            return Ok(true);
        }

        let has_sources = !self.inner.sources.borrow().is_empty();
        let next_deadline = self.next_deadline();

        if !has_sources && next_deadline.is_none() {
            return Ok(false);
        }

        let timeout = next_deadline.map(|d| d.saturating_duration_since(Instant::now()));

        {
            let mut poll = self.inner.poll.borrow_mut();
            let mut events = self.inner.events.borrow_mut();
            match poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        /* collect callbacks first: a callback may deregister other
           sources */
        let mut pending: Vec<(ReadyCallback, Readiness)> = Vec::new();
        {
            let events = self.inner.events.borrow();
            let sources = self.inner.sources.borrow();
            for event in events.iter() {
                let Token(token) = event.token();
                if let Some(callback) = sources.get(&token) {
                    pending.push((
                        Rc::clone(callback),
                        Readiness {
                            readable: event.is_readable() || event.is_read_closed(),
                            writable: event.is_writable(),
                            error: event.is_error(),
                        },
                    ));
                }
            }
        }

        for (callback, readiness) in pending {
            (callback.borrow_mut())(readiness);
        }

        self.fire_timers();
        self.run_deferred();

        Ok(true)
    }

    /// Run until stopped or idle.
    pub fn run(&self) -> io::Result<()> {
        self.inner.stop.set(false);
        while !self.inner.stop.get() && self.run_once()? {}
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.stop.set(true);
    }
}

/// A registered fd.  Deregisters on drop.
pub struct SourceHandle {
    event_loop: EventLoop,
    fd: RawFd,
    token: usize,
    registered: Cell<bool>,
}

impl SourceHandle {
    /// Update read/write interest; disabling both parks the fd.
    pub fn set_interest(&self, readable: bool, writable: bool) -> io::Result<()> {
        let poll = self.event_loop.inner.poll.borrow_mut();
        let registry = poll.registry();
        let mut source = SourceFd(&self.fd);

        let interest = match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };

        match interest {
            Some(interest) => {
                if self.registered.get() {
                    registry.reregister(&mut source, Token(self.token), interest)?;
                } else {
                    registry.register(&mut source, Token(self.token), interest)?;
                    self.registered.set(true);
                }
            }
            None => {
                if self.registered.get() {
                    registry.deregister(&mut source)?;
                    self.registered.set(false);
                }
            }
        }
        Ok(())
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        if self.registered.get() {
            let poll = self.event_loop.inner.poll.borrow_mut();
            let _ = poll.registry().deregister(&mut SourceFd(&self.fd));
        }
        self.event_loop.inner.sources.borrow_mut().remove(&self.token);
    }
}

/// A cancellable one-shot timer.
pub struct TimerEvent {
    event_loop: EventLoop,
    id: u64,
    callback: TimerCallback,
    pending: Rc<Cell<bool>>,
}

impl TimerEvent {
    pub fn new<F: FnMut() + 'static>(event_loop: &EventLoop, mut callback: F) -> TimerEvent {
        let id = event_loop.inner.next_timer_id.get();
        event_loop.inner.next_timer_id.set(id + 1);

        let pending = Rc::new(Cell::new(false));
        let pending2 = Rc::clone(&pending);
        let callback: TimerCallback = Rc::new(RefCell::new(move || {
            pending2.set(false);
            callback();
        }));

        TimerEvent {
            event_loop: event_loop.clone(),
            id,
            callback,
            pending,
        }
    }

    pub fn schedule(&self, duration: Duration) {
        self.pending.set(true);
        self.event_loop.schedule_timer(
            self.id,
            Instant::now() + duration,
            Rc::clone(&self.callback),
        );
    }

    pub fn cancel(&self) {
        if self.pending.replace(false) {
            self.event_loop.cancel_timer(self.id);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }
}

impl Drop for TimerEvent {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Runs its callback on the next loop iteration, collapsing repeated
/// schedules into one run.
pub struct DeferEvent {
    event_loop: EventLoop,
    callback: Rc<RefCell<dyn FnMut()>>,
    scheduled: Rc<Cell<bool>>,
    alive: Rc<Cell<bool>>,
}

impl DeferEvent {
    pub fn new<F: FnMut() + 'static>(event_loop: &EventLoop, callback: F) -> DeferEvent {
        DeferEvent {
            event_loop: event_loop.clone(),
            callback: Rc::new(RefCell::new(callback)),
            scheduled: Rc::new(Cell::new(false)),
            alive: Rc::new(Cell::new(true)),
        }
    }

    pub fn schedule(&self) {
        if self.scheduled.replace(true) {
            return;
        }

        let callback = Rc::clone(&self.callback);
        let scheduled = Rc::clone(&self.scheduled);
        let alive = Rc::clone(&self.alive);
        self.event_loop.defer(move || {
            if !scheduled.replace(false) {
                /* cancelled before it could run */
                return;
            }
            if alive.get() {
                (callback.borrow_mut())();
            }
        });
    }

    pub fn cancel(&self) {
        self.scheduled.set(false);
    }
}

impl Drop for DeferEvent {
    fn drop(&mut self) {
        self.alive.set(false);
    }
}

/// Weak-reference plumbing for loop callbacks that dispatch into an
/// `Rc<RefCell<T>>` entity.
pub fn weak_ready_callback<T: 'static>(
    target: &Rc<RefCell<T>>,
    mut method: impl FnMut(&mut T, Readiness) + 'static,
) -> ReadyCallback {
    let weak: Weak<RefCell<T>> = Rc::downgrade(target);
    Rc::new(RefCell::new(move |readiness: Readiness| {
        if let Some(target) = weak.upgrade() {
            method(&mut target.borrow_mut(), readiness);
        }
    }))
}
