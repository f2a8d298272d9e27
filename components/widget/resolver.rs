/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget resolver: looks up a widget's class asynchronously,
//! de-duplicating concurrent lookups for the same widget.  On
//! completion the class (and the default view) is promoted onto the
//! widget before any listener runs.  Cancelling the last listener
//! cancels the upstream lookup; a failed lookup is cached so further
//! attempts fail fast.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use stream::cancellable::{Cancellable, CancellablePointer};

use crate::registry::WidgetRegistry;
use crate::{Widget, WidgetRef};

pub type ResolverCallback = Box<dyn FnOnce()>;

struct Listener {
    id: u64,
    callback: ResolverCallback,
}

pub struct WidgetResolver {
    widget: Weak<RefCell<Widget>>,
    listeners: Vec<Listener>,
    next_id: u64,
    finished: bool,
    /// Cancels the registry lookup.
    cancel: CancellablePointer,
}

impl WidgetResolver {
    fn new(widget: &WidgetRef) -> Rc<RefCell<WidgetResolver>> {
        Rc::new(RefCell::new(WidgetResolver {
            widget: Rc::downgrade(widget),
            listeners: Vec::new(),
            next_id: 1,
            finished: false,
            cancel: CancellablePointer::new(),
        }))
    }

    fn add_listener(&mut self, callback: ResolverCallback) -> u64 {
        debug_assert!(!self.finished);

        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push(Listener { id, callback });
        id
    }
}

struct ListenerCancel {
    resolver: Rc<RefCell<WidgetResolver>>,
    id: u64,
}

impl Cancellable for ListenerCancel {
    fn cancel(&mut self) {
        let mut resolver = self.resolver.borrow_mut();

        let Some(index) = resolver.listeners.iter().position(|l| l.id == self.id) else {
            return;
        };
        resolver.listeners.remove(index);

        if resolver.listeners.is_empty() && !resolver.finished {
            /* the last listener has been cancelled: abort the
               registry lookup and detach from the widget */
            resolver.cancel.cancel();

            if let Some(widget) = resolver.widget.upgrade() {
                widget.borrow_mut().resolver = None;
            }
        }
    }
}

fn resolver_finish(resolver: &Rc<RefCell<WidgetResolver>>, cls: Option<Rc<crate::WidgetClass>>) {
    let (widget, listeners) = {
        let mut r = resolver.borrow_mut();
        debug_assert!(!r.finished);
        r.finished = true;
        r.cancel.clear();
        (r.widget.upgrade(), std::mem::take(&mut r.listeners))
    };

    if let Some(widget) = widget {
        /* promote the class onto the widget before any listener
           runs */
        let mut w = widget.borrow_mut();
        debug_assert!(w.cls.is_none());

        w.cls = cls.clone();

        let view = cls
            .as_ref()
            .and_then(|cls| cls.find_view(w.from_template.view_name.as_deref()));
        w.from_template.view = view.clone();
        w.from_request.view = view.clone();

        w.session_sync_pending = cls.as_ref().map(|c| c.stateful).unwrap_or(false)
            /* the widget session code requires a valid view */
            && view.is_some();
    }

    for listener in listeners {
        (listener.callback)();
    }
}

/// Resolve the widget's class, sharing an in-flight lookup with
/// other callers.  The callback always fires (with the class
/// promoted onto the widget on success); inspect `widget.cls`
/// afterwards.
pub fn resolve_widget(
    widget: &WidgetRef,
    registry: &Rc<WidgetRegistry>,
    callback: ResolverCallback,
    cancel_ptr: &mut CancellablePointer,
) {
    let (class_name, existing) = {
        let w = widget.borrow();
        debug_assert!(w.class_name.is_some());

        if w.cls.is_some() {
            /* already resolved successfully */
            drop(w);
            callback();
            return;
        }

        (w.class_name.clone().unwrap(), w.resolver.clone())
    };

    let (resolver, is_new) = match existing {
        Some(resolver) => {
            if resolver.borrow().finished {
                /* resolution already failed; fail fast */
                callback();
                return;
            }
            (resolver, false)
        }
        None => {
            let resolver = WidgetResolver::new(widget);
            widget.borrow_mut().resolver = Some(Rc::clone(&resolver));
            (resolver, true)
        }
    };

    let id = resolver.borrow_mut().add_listener(callback);
    cancel_ptr.set(Rc::new(RefCell::new(ListenerCancel {
        resolver: Rc::clone(&resolver),
        id,
    })));

    if is_new {
        let resolver2 = Rc::clone(&resolver);
        let mut upstream_cancel = CancellablePointer::new();
        registry.lookup_widget_class(
            &class_name,
            Box::new(move |cls| resolver_finish(&resolver2, cls)),
            &mut upstream_cancel,
        );

        if !resolver.borrow().finished {
            if let Some(upstream) = upstream_cancel.take() {
                resolver.borrow_mut().cancel.set(upstream);
            }
        }
    }
}
