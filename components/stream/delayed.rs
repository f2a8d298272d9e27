/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An istream whose content arrives later: the consumer may start
//! reading immediately, and the producer fills in the real stream (or
//! EOF, or an error) through the control handle when it becomes
//! known.  This is how an inline widget occupies its slot in the
//! template output before its backend has responded.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cancellable::CancellablePointer;
use crate::error::StreamError;
use crate::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

enum DelayedState {
    Pending,
    Ready(BoxIstream),
    Eof,
    Error(StreamError),
    /// The consumer claimed the inner stream (or was dropped).
    Spent,
}

struct DelayedShared {
    state: DelayedState,
    /// Cancelled when the consumer drops the istream before the
    /// producer delivered anything.
    cancel: CancellablePointer,
}

pub struct DelayedIstream {
    shared: Rc<RefCell<DelayedShared>>,
    inner: Option<BoxIstream>,
}

#[derive(Clone)]
pub struct DelayedControl {
    shared: Rc<RefCell<DelayedShared>>,
}

pub fn new_delayed() -> (DelayedIstream, DelayedControl) {
    let shared = Rc::new(RefCell::new(DelayedShared {
        state: DelayedState::Pending,
        cancel: CancellablePointer::new(),
    }));

    (
        DelayedIstream {
            shared: Rc::clone(&shared),
            inner: None,
        },
        DelayedControl { shared },
    )
}

impl DelayedControl {
    pub fn set(&self, stream: BoxIstream) {
        let mut shared = self.shared.borrow_mut();
        if matches!(shared.state, DelayedState::Pending) {
            shared.state = DelayedState::Ready(stream);
            shared.cancel.clear();
        }
    }

    pub fn set_eof(&self) {
        let mut shared = self.shared.borrow_mut();
        if matches!(shared.state, DelayedState::Pending) {
            shared.state = DelayedState::Eof;
            shared.cancel.clear();
        }
    }

    pub fn set_error(&self, error: StreamError) {
        let mut shared = self.shared.borrow_mut();
        if matches!(shared.state, DelayedState::Pending) {
            shared.state = DelayedState::Error(error);
            shared.cancel.clear();
        }
    }

    /// Register the operation to cancel when the consumer abandons
    /// the stream early.
    pub fn set_cancel<F: FnMut() + 'static>(&self, f: F) {
        self.shared.borrow_mut().cancel.set_fn(f);
    }

    /// Has the consumer gone away?
    pub fn is_abandoned(&self) -> bool {
        matches!(self.shared.borrow().state, DelayedState::Spent)
            && Rc::strong_count(&self.shared) == 1
    }
}

impl DelayedIstream {
    /// Claim the inner stream if the producer has delivered one.
    fn poll_shared(&mut self, handler: &mut dyn IstreamHandler) -> Option<ReadResult> {
        if self.inner.is_some() {
            return None;
        }

        let state = {
            let mut shared = self.shared.borrow_mut();
            match shared.state {
                DelayedState::Pending => return Some(ReadResult::Blocked),
                _ => std::mem::replace(&mut shared.state, DelayedState::Spent),
            }
        };

        match state {
            DelayedState::Ready(stream) => {
                self.inner = Some(stream);
                None
            }
            DelayedState::Eof => {
                handler.on_eof();
                Some(ReadResult::Eof)
            }
            DelayedState::Error(error) => {
                handler.on_error(error);
                Some(ReadResult::Error)
            }
            DelayedState::Pending | DelayedState::Spent => unreachable!(),
        }
    }
}

impl Istream for DelayedIstream {
    fn available(&self, partial: bool) -> Available {
        if let Some(inner) = &self.inner {
            return inner.available(partial);
        }

        match &self.shared.borrow().state {
            DelayedState::Ready(stream) => stream.available(partial),
            DelayedState::Eof => Available::Exact(0),
            _ => Available::Unknown,
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if let Some(result) = self.poll_shared(handler) {
            return result;
        }

        self.inner.as_mut().unwrap().read(handler)
    }

    fn skip(&mut self, n: u64) -> u64 {
        match &mut self.inner {
            Some(inner) => inner.skip(n),
            None => 0,
        }
    }
}

impl Drop for DelayedIstream {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        if matches!(shared.state, DelayedState::Pending) {
            shared.state = DelayedState::Spent;
            shared.cancel.cancel();
        } else {
            shared.state = DelayedState::Spent;
        }
    }
}
