/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-request context shared by all widgets of one composition:
//! request identity, URIs, args, session binding, and the
//! collaborator handles (resource loader, registry, event loop).

use std::cell::RefCell;
use std::rc::Rc;

use http::header::HeaderMap;
use socket::event_loop::EventLoop;

use crate::args::Args;
use crate::registry::WidgetRegistry;
use crate::request::ResourceLoader;
use crate::session::{RealmSession, SessionId, SessionManager};
use crate::WidgetRef;

pub struct WidgetContext {
    pub event_loop: EventLoop,

    pub resource_loader: Rc<dyn ResourceLoader>,
    pub filter_resource_loader: Rc<dyn ResourceLoader>,

    pub widget_registry: Option<Rc<WidgetRegistry>>,

    pub site_name: Option<String>,

    /// When set, only untrusted widgets with this host are allowed;
    /// all trusted widgets are rejected.
    pub untrusted_host: Option<String>,

    pub local_host: Option<String>,
    pub remote_host: Option<String>,

    /// The request URI (path + query).
    pub uri: Option<String>,

    /// The absolute form of the request URI.
    pub absolute_uri: Option<String>,

    /// The base URI which was requested by the client, before
    /// semicolon arguments.
    pub external_base_uri: String,

    /// Parsed semicolon arguments of the external URI.
    pub args: Option<Args>,

    pub request_headers: Option<HeaderMap>,

    pub session_manager: Option<Rc<SessionManager>>,
    pub session_cookie: Option<String>,
    pub session_id: SessionId,
    pub realm: Option<String>,

    root_widgets: RefCell<Vec<WidgetRef>>,
}

impl WidgetContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_loop: EventLoop,
        resource_loader: Rc<dyn ResourceLoader>,
        filter_resource_loader: Rc<dyn ResourceLoader>,
        widget_registry: Option<Rc<WidgetRegistry>>,
        site_name: Option<&str>,
        untrusted_host: Option<&str>,
        local_host: Option<&str>,
        remote_host: Option<&str>,
        uri: Option<&str>,
        absolute_uri: Option<&str>,
        external_base_uri: &str,
        args: Option<Args>,
        session_manager: Option<Rc<SessionManager>>,
        session_cookie: Option<&str>,
        session_id: SessionId,
        realm: Option<&str>,
        request_headers: Option<HeaderMap>,
    ) -> Rc<WidgetContext> {
        Rc::new(WidgetContext {
            event_loop,
            resource_loader,
            filter_resource_loader,
            widget_registry,
            site_name: site_name.map(str::to_string),
            untrusted_host: untrusted_host.map(str::to_string),
            local_host: local_host.map(str::to_string),
            remote_host: remote_host.map(str::to_string),
            uri: uri.map(str::to_string),
            absolute_uri: absolute_uri.map(str::to_string),
            external_base_uri: external_base_uri.to_string(),
            args,
            request_headers,
            session_manager,
            session_cookie: session_cookie.map(str::to_string),
            session_id,
            realm: realm.map(str::to_string),
            root_widgets: RefCell::new(Vec::new()),
        })
    }

    /// Keep a root widget alive for the request's lifetime; the tree
    /// is torn down when the context is dropped.
    pub fn add_root_widget(&self, widget: WidgetRef) -> WidgetRef {
        self.root_widgets.borrow_mut().push(Rc::clone(&widget));
        widget
    }

    pub fn args_get(&self, key: &str) -> Option<&str> {
        self.args
            .as_ref()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Run `f` on this request's realm session, if there is one.
    pub fn with_realm_session<R>(&self, f: impl FnOnce(&mut RealmSession) -> R) -> Option<R> {
        let manager = self.session_manager.as_ref()?;
        let realm = self.realm.as_deref()?;
        let session = manager.get(self.session_id)?;
        let mut session = session.borrow_mut();
        let realm_session = session.get_realm(realm, true)?;
        Some(f(realm_session))
    }
}
