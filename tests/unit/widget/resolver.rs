/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget resolver: concurrent lookups for one widget share a
//! single registry call; callbacks fire in registration order;
//! cancelling the last listener cancels the upstream lookup.

use std::cell::RefCell;
use std::rc::Rc;

use stream::cancellable::{Cancellable, CancellablePointer};
use widget::registry::{ClassLookupService, RegistryCallback, WidgetRegistry};
use widget::{
    HttpAddress, ResourceAddress, Widget, WidgetClass, WidgetRef, resolve_widget,
};

/// A registry collaborator under manual control: lookups park until
/// the test completes them.
#[derive(Default)]
struct FakeServiceState {
    requested: u32,
    aborted: Rc<RefCell<u32>>,
    pending: Option<RegistryCallback>,
}

struct FakeService {
    state: Rc<RefCell<FakeServiceState>>,
}

struct FakeLookupCancel {
    aborted: Rc<RefCell<u32>>,
}

impl Cancellable for FakeLookupCancel {
    fn cancel(&mut self) {
        *self.aborted.borrow_mut() += 1;
    }
}

impl ClassLookupService for FakeService {
    fn lookup_widget_class(
        &self,
        _name: &str,
        callback: RegistryCallback,
        cancel_ptr: &mut CancellablePointer,
    ) {
        let mut state = self.state.borrow_mut();
        state.requested += 1;
        state.pending = Some(callback);
        cancel_ptr.set(Rc::new(RefCell::new(FakeLookupCancel {
            aborted: Rc::clone(&state.aborted),
        })));
    }
}

fn make_registry() -> (Rc<WidgetRegistry>, Rc<RefCell<FakeServiceState>>) {
    let state = Rc::new(RefCell::new(FakeServiceState {
        aborted: Rc::new(RefCell::new(0)),
        ..Default::default()
    }));
    let registry = WidgetRegistry::new(Rc::new(FakeService {
        state: Rc::clone(&state),
    }));
    (registry, state)
}

fn make_widget() -> WidgetRef {
    let widget = Widget::new(None);
    widget.borrow_mut().set_class_name("foo");
    widget
}

fn finish(state: &Rc<RefCell<FakeServiceState>>) {
    let callback = state.borrow_mut().pending.take().expect("no pending lookup");
    let cls = Rc::new(WidgetClass::new(ResourceAddress::Http(HttpAddress::new(
        false, "server", "/",
    ))));
    callback(Some(cls));
}

#[test]
fn test_two_listeners_one_lookup() {
    let (registry, state) = make_registry();
    let widget = make_widget();

    let order = Rc::new(RefCell::new(Vec::new()));
    let mut cancel1 = CancellablePointer::new();
    let mut cancel2 = CancellablePointer::new();

    {
        let order = Rc::clone(&order);
        resolve_widget(
            &widget,
            &registry,
            Box::new(move || order.borrow_mut().push(1)),
            &mut cancel1,
        );
    }
    {
        let order = Rc::clone(&order);
        resolve_widget(
            &widget,
            &registry,
            Box::new(move || order.borrow_mut().push(2)),
            &mut cancel2,
        );
    }

    /* exactly one registry call for both listeners */
    assert_eq!(state.borrow().requested, 1);
    assert!(order.borrow().is_empty());

    finish(&state);

    /* both callbacks fired, in registration order, and the class
       was promoted onto the widget first */
    assert_eq!(*order.borrow(), vec![1, 2]);
    assert!(widget.borrow().cls.is_some());
    assert!(widget.borrow().has_default_view());
}

#[test]
fn test_cancel_last_listener_aborts_lookup() {
    let (registry, state) = make_registry();
    let widget = make_widget();

    let mut cancel = CancellablePointer::new();
    resolve_widget(&widget, &registry, Box::new(|| panic!("must not fire")), &mut cancel);

    assert_eq!(state.borrow().requested, 1);

    cancel.cancel();

    let aborted = *state.borrow().aborted.borrow();
    assert_eq!(aborted, 1);
    assert!(widget.borrow().resolver.is_none());
}

#[test]
fn test_cancel_one_of_two_detaches() {
    let (registry, state) = make_registry();
    let widget = make_widget();

    let fired = Rc::new(RefCell::new(false));
    let mut cancel1 = CancellablePointer::new();
    let mut cancel2 = CancellablePointer::new();

    resolve_widget(
        &widget,
        &registry,
        Box::new(|| panic!("cancelled listener must not fire")),
        &mut cancel1,
    );
    {
        let fired = Rc::clone(&fired);
        resolve_widget(
            &widget,
            &registry,
            Box::new(move || *fired.borrow_mut() = true),
            &mut cancel2,
        );
    }

    cancel1.cancel();

    /* the lookup is still in flight */
    assert_eq!(*state.borrow().aborted.borrow(), 0);

    finish(&state);
    assert!(*fired.borrow());
}

#[test]
fn test_already_resolved_fires_immediately() {
    let (registry, state) = make_registry();
    let widget = make_widget();

    let mut cancel = CancellablePointer::new();
    resolve_widget(&widget, &registry, Box::new(|| {}), &mut cancel);
    finish(&state);

    let fired = Rc::new(RefCell::new(false));
    let mut cancel2 = CancellablePointer::new();
    {
        let fired = Rc::clone(&fired);
        resolve_widget(
            &widget,
            &registry,
            Box::new(move || *fired.borrow_mut() = true),
            &mut cancel2,
        );
    }

    /* no second registry call */
    assert_eq!(state.borrow().requested, 1);
    assert!(*fired.borrow());
}

#[test]
fn test_failed_lookup_is_cached() {
    let (registry, state) = make_registry();
    let widget = make_widget();

    let mut cancel = CancellablePointer::new();
    resolve_widget(&widget, &registry, Box::new(|| {}), &mut cancel);

    let callback = state.borrow_mut().pending.take().unwrap();
    callback(None);

    assert!(widget.borrow().cls.is_none());

    /* further attempts fail fast without a new lookup */
    let fired = Rc::new(RefCell::new(false));
    let mut cancel2 = CancellablePointer::new();
    {
        let fired = Rc::clone(&fired);
        resolve_widget(
            &widget,
            &registry,
            Box::new(move || *fired.borrow_mut() = true),
            &mut cancel2,
        );
    }

    assert_eq!(state.borrow().requested, 1);
    assert!(*fired.borrow());
}
