/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::RefCell;
use std::rc::Rc;

/// A handle to a long-running operation.  Cancelling must release the
/// socket lease and all other resources before returning; calling it
/// after EOF/error is forbidden.
pub trait Cancellable {
    fn cancel(&mut self);
}

/// Caller-side slot for the [`Cancellable`] of an operation in
/// flight.  Empty once the operation has completed.
#[derive(Default)]
pub struct CancellablePointer(Option<Rc<RefCell<dyn Cancellable>>>);

impl CancellablePointer {
    pub fn new() -> Self {
        CancellablePointer(None)
    }

    pub fn set(&mut self, c: Rc<RefCell<dyn Cancellable>>) {
        self.0 = Some(c);
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// Take the handle out, leaving the pointer empty.
    pub fn take(&mut self) -> Option<Rc<RefCell<dyn Cancellable>>> {
        self.0.take()
    }

    pub fn cancel(&mut self) {
        if let Some(c) = self.0.take() {
            c.borrow_mut().cancel();
        }
    }
}

struct FnCancel<F: FnMut()>(F);

impl<F: FnMut()> Cancellable for FnCancel<F> {
    fn cancel(&mut self) {
        (self.0)();
    }
}

impl CancellablePointer {
    /// Wrap a closure as the cancellation action.
    pub fn set_fn<F: FnMut() + 'static>(&mut self, f: F) {
        self.set(Rc::new(RefCell::new(FnCancel(f))));
    }
}
