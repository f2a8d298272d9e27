/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Inline-widget driver edge cases: abandoning the embed istream
//! cancels the class resolution; error responses leave the slot
//! empty.

use std::cell::RefCell;
use std::rc::Rc;

use processor::embed_inline_widget;
use socket::event_loop::EventLoop;
use stream::StringSink;
use stream::cancellable::{Cancellable, CancellablePointer};
use stream::istream::ReadResult;
use widget::registry::{ClassLookupService, RegistryCallback, WidgetRegistry};
use widget::{SessionId, Widget, WidgetContext, WidgetRef};

use crate::support::FailingResourceLoader;

/// A lookup that never completes, with abort accounting.
struct HangingService {
    aborted: Rc<RefCell<u32>>,
    requested: Rc<RefCell<u32>>,
}

struct HangingCancel {
    aborted: Rc<RefCell<u32>>,
}

impl Cancellable for HangingCancel {
    fn cancel(&mut self) {
        *self.aborted.borrow_mut() += 1;
    }
}

impl ClassLookupService for HangingService {
    fn lookup_widget_class(
        &self,
        _name: &str,
        _callback: RegistryCallback,
        cancel_ptr: &mut CancellablePointer,
    ) {
        *self.requested.borrow_mut() += 1;
        cancel_ptr.set(Rc::new(RefCell::new(HangingCancel {
            aborted: Rc::clone(&self.aborted),
        })));
    }
}

fn hanging_context() -> (Rc<WidgetContext>, Rc<RefCell<u32>>, Rc<RefCell<u32>>) {
    let aborted = Rc::new(RefCell::new(0));
    let requested = Rc::new(RefCell::new(0));

    let registry = WidgetRegistry::new(Rc::new(HangingService {
        aborted: Rc::clone(&aborted),
        requested: Rc::clone(&requested),
    }));

    let ctx = WidgetContext::new(
        EventLoop::new().expect("event loop"),
        Rc::new(FailingResourceLoader),
        Rc::new(FailingResourceLoader),
        Some(registry),
        None,
        None,
        Some("localhost:8080"),
        Some("localhost:8080"),
        Some("/beng.html"),
        Some("http://localhost:8080/beng.html"),
        "/beng.html",
        None,
        None,
        None,
        SessionId::default(),
        Some("foo"),
        None,
    );

    (ctx, aborted, requested)
}

fn make_widget(ctx: &Rc<WidgetContext>) -> WidgetRef {
    let root = ctx.add_root_widget(Widget::new_root(Some("foo")));
    let widget = Widget::new(None);
    widget.borrow_mut().set_class_name("slow");
    widget::add_child(&root, &widget);
    widget::set_id(&widget, "w");
    widget
}

#[test]
fn test_abandoning_the_embed_cancels_the_resolver() {
    let (ctx, aborted, requested) = hanging_context();
    let widget = make_widget(&ctx);

    let istream = embed_inline_widget(&ctx, &widget, false);
    assert_eq!(*requested.borrow(), 1);
    assert_eq!(*aborted.borrow(), 0);

    /* the resolution is parked; the slot blocks */
    let mut sink = StringSink::new(istream);
    assert_eq!(sink.read(), ReadResult::Blocked);

    /* walking away must release the upstream lookup */
    drop(sink);
    assert_eq!(*aborted.borrow(), 1);
}

#[test]
fn test_backend_error_fails_the_slot() {
    let (ctx, _aborted, _requested) = hanging_context();

    /* a widget with a pre-resolved class goes straight to the
       failing backend */
    let root = ctx.add_root_widget(Widget::new_root(Some("foo")));
    let cls = crate::support::make_test_class("1").unwrap();
    let widget = Widget::new(Some(cls));
    widget::add_child(&root, &widget);
    widget::set_id(&widget, "w");

    let istream = embed_inline_widget(&ctx, &widget, false);
    let result = StringSink::new(istream).run_to_completion();
    assert!(result.is_err());
}
