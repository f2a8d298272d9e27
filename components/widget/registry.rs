/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget-class registry: resolves class names through the
//! (asynchronous) translation collaborator and caches positive
//! results for the process lifetime.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use stream::cancellable::CancellablePointer;

use crate::class::WidgetClass;

pub type RegistryCallback = Box<dyn FnOnce(Option<Rc<WidgetClass>>)>;

/// The translation collaborator that actually knows the classes.
pub trait ClassLookupService {
    fn lookup_widget_class(
        &self,
        name: &str,
        callback: RegistryCallback,
        cancel_ptr: &mut CancellablePointer,
    );
}

pub struct WidgetRegistry {
    service: Rc<dyn ClassLookupService>,
    cache: RefCell<FxHashMap<String, Rc<WidgetClass>>>,
}

impl WidgetRegistry {
    pub fn new(service: Rc<dyn ClassLookupService>) -> Rc<WidgetRegistry> {
        Rc::new(WidgetRegistry {
            service,
            cache: RefCell::new(FxHashMap::default()),
        })
    }

    pub fn lookup_widget_class(
        self: &Rc<Self>,
        name: &str,
        callback: RegistryCallback,
        cancel_ptr: &mut CancellablePointer,
    ) {
        if let Some(cls) = self.cache.borrow().get(name).cloned() {
            callback(Some(cls));
            return;
        }

        let registry = Rc::clone(self);
        let name2 = name.to_string();
        self.service.lookup_widget_class(
            name,
            Box::new(move |cls| {
                if let Some(cls) = &cls {
                    registry
                        .cache
                        .borrow_mut()
                        .insert(name2, Rc::clone(cls));
                }
                callback(cls);
            }),
            cancel_ptr,
        );
    }
}
