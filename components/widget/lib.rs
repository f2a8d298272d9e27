/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget composition model: the per-request widget instance
//! tree, class resolution, session binding, URI algebra, approval,
//! and the CSRF/session-id primitives.

pub mod address;
pub mod approval;
pub mod args;
pub mod class;
pub mod context;
pub mod csrf;
pub mod error;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod session;
pub mod uri;
pub mod view;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use http::header::HeaderMap;
use http::Method;
use socket::queue::LimitedConcurrencyQueue;
use stream::istream::BoxIstream;

pub use address::{HttpAddress, ResourceAddress, WasAddress};
pub use class::WidgetClass;
pub use context::WidgetContext;
pub use error::{WidgetError, WidgetErrorCode};
pub use registry::{ClassLookupService, WidgetRegistry};
pub use resolver::resolve_widget;
pub use session::{RealmSession, Session, SessionId, SessionManager, WidgetSession};
pub use view::{Transformation, WidgetView};

/// Separates the ids in an id path.
pub const WIDGET_REF_SEPARATOR: char = ':';

pub type WidgetRef = Rc<RefCell<Widget>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Inline,
    None,
}

/// The approval level for embedding a widget into its container,
/// based on SELF_CONTAINER and the group policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// Approval was given.
    Given,
    /// Approval was denied.
    Denied,
    /// Approval has not been verified yet.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Each resource has its own set of widget sessions.
    Resource,
    /// All resources on this site share the same widget sessions.
    Site,
}

/// Widget attributes specified by the template.
#[derive(Default)]
pub struct FromTemplate {
    pub path_info: String,
    pub query_string: Option<String>,
    pub headers: Option<HeaderMap>,
    pub view_name: Option<String>,

    /// The view selected by the template.  Undefined until the
    /// resolver finishes; `None` afterwards is fatal for this
    /// widget.
    pub view: Option<Rc<WidgetView>>,
}

/// Parameters forwarded from the HTTP request when this widget is
/// focused (or an ancestor of the focused one).
#[derive(Default)]
pub struct FromRequest {
    /// The remaining focus path relative to this widget; `None` when
    /// the focused widget is not a descendant.
    pub focus_ref: Option<Vec<String>>,

    pub path_info: Option<String>,
    pub query_string: Option<String>,
    pub body: Option<BoxIstream>,

    /// The view requested by the client, else the template's.
    pub view: Option<Rc<WidgetView>>,

    pub method: Method,

    /// Is this the "top frame" widget requested by the client?
    pub frame: bool,

    /// The client-selected view is unauthorized and only allowed if
    /// the response is not processable.
    pub unauthorized_view: bool,
}

/// Parameters to be forwarded to the focused widget, which is a
/// descendant of this one.
pub struct ForFocused {
    pub method: Method,
    pub path_info: Option<String>,
    pub query_string: Option<String>,
    pub body: Option<BoxIstream>,
}

/// A widget instance: a node in the per-request composition tree.
/// Parents own their children; parent pointers are weak.
pub struct Widget {
    pub parent: Weak<RefCell<Widget>>,
    pub children: Vec<WidgetRef>,

    /// Throttles concurrent requests to child widgets.
    pub child_throttler: Option<Rc<LimitedConcurrencyQueue>>,

    pub class_name: Option<String>,
    pub quoted_class_name: Option<String>,

    /// The widget class; `None` until the resolver finishes.
    pub cls: Option<Rc<WidgetClass>>,

    /// The in-flight class resolution, shared by all interested
    /// parties.
    pub resolver: Option<Rc<RefCell<resolver::WidgetResolver>>>,

    /// The instance id from the template.
    pub id: Option<String>,

    /// The id chain identifying this widget in the top-level
    /// template.
    pub id_path: Option<String>,

    /// Prefix for this widget's XML ids.
    pub prefix: Option<String>,

    pub display: Display,
    pub approval: Approval,
    pub session_scope: SessionScope,

    /// Set by the resolver for stateful classes; consumed by
    /// [`Widget::load_from_session`].
    pub session_sync_pending: bool,

    /// Set while waiting for the response to decide whether the
    /// request may be saved to the session.
    pub session_save_pending: bool,

    pub from_template: FromTemplate,
    pub from_request: FromRequest,
    pub for_focused: Option<ForFocused>,
}

impl Widget {
    fn bare(cls: Option<Rc<WidgetClass>>) -> Widget {
        Widget {
            parent: Weak::new(),
            children: Vec::new(),
            child_throttler: None,
            class_name: None,
            quoted_class_name: None,
            cls,
            resolver: None,
            id: None,
            id_path: None,
            prefix: None,
            display: Display::Inline,
            approval: Approval::Given,
            session_scope: SessionScope::Resource,
            session_sync_pending: false,
            session_save_pending: false,
            from_template: FromTemplate::default(),
            from_request: FromRequest {
                method: Method::GET,
                ..FromRequest::default()
            },
            for_focused: None,
        }
    }

    pub fn new(cls: Option<Rc<WidgetClass>>) -> WidgetRef {
        let widget = Widget::bare(cls.clone());
        let widget = Rc::new(RefCell::new(widget));
        if let Some(cls) = cls {
            let mut w = widget.borrow_mut();
            w.from_template.view = cls.find_view(None);
            w.from_request.view = w.from_template.view.clone();
        }
        widget
    }

    /// The synthetic root of a request's widget tree.
    pub fn new_root(id: Option<&str>) -> WidgetRef {
        let mut widget = Widget::bare(None);
        widget.id = id.map(str::to_string);
        widget.id_path = Some(String::new());
        widget.prefix = Some("C_".to_string());
        Rc::new(RefCell::new(widget))
    }

    pub fn is_root(&self) -> bool {
        self.parent.upgrade().is_none()
    }

    pub fn get_id_path(&self) -> Option<&str> {
        self.id_path.as_deref()
    }

    pub fn get_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn get_quoted_class_name(&self) -> Option<&str> {
        self.quoted_class_name.as_deref()
    }

    /// This widget's name for log messages.
    pub fn log_name(&self) -> String {
        match (&self.class_name, &self.id_path) {
            (Some(class_name), Some(id_path)) => format!("{}#{}", class_name, id_path),
            (Some(class_name), None) => class_name.clone(),
            _ => "[unknown]".to_string(),
        }
    }

    pub fn set_class_name(&mut self, class_name: &str) {
        self.class_name = Some(class_name.to_string());
        self.quoted_class_name = Some(quote_xml_id(class_name));
    }

    pub fn get_default_path_info(&self) -> &str {
        &self.from_template.path_info
    }

    pub fn get_requested_path_info(&self) -> &str {
        self.from_request
            .path_info
            .as_deref()
            .unwrap_or(&self.from_template.path_info)
    }

    pub fn get_path_info(&self, stateful: bool) -> &str {
        if stateful {
            self.get_requested_path_info()
        } else {
            self.get_default_path_info()
        }
    }

    pub fn has_default_view(&self) -> bool {
        self.from_template.view.is_some()
    }

    pub fn get_default_view(&self) -> Option<Rc<WidgetView>> {
        self.from_template.view.clone()
    }

    /// The view that determines the server address.
    pub fn get_address_view(&self) -> Option<Rc<WidgetView>> {
        self.get_default_view()
    }

    pub fn get_effective_view(&self) -> Option<Rc<WidgetView>> {
        self.from_request.view.clone()
    }

    /// The view that determines the response transformations.
    pub fn get_transformation_view(&self) -> Option<Rc<WidgetView>> {
        self.get_effective_view()
    }

    pub fn is_container_by_default(&self) -> bool {
        self.get_default_view()
            .map(|v| v.is_container())
            .unwrap_or(false)
    }

    pub fn has_processor(&self) -> bool {
        self.get_effective_view()
            .map(|v| v.has_processor())
            .unwrap_or(false)
    }

    pub fn is_container(&self) -> bool {
        self.get_effective_view()
            .map(|v| v.is_container())
            .unwrap_or(false)
    }

    pub fn has_focus(&self) -> bool {
        matches!(&self.from_request.focus_ref, Some(path) if path.is_empty())
    }

    pub fn descendant_has_focus(&self) -> bool {
        matches!(&self.from_request.focus_ref, Some(path) if !path.is_empty())
    }

    /// Should the current request be synchronized with the session?
    pub fn should_sync_session(&self) -> bool {
        /* never save to the session when this is a POST request */
        if self.from_request.body.is_some() {
            return false;
        }

        /* save to the session only if the effective view features
           the HTML processor */
        self.has_processor()
    }

    /// Free resources associated with a widget that will not be
    /// requested after all.
    pub fn cancel(&mut self) {
        self.from_request.body = None;
        self.for_focused = None;
    }

    /// Discard data for the focused widget, which was not found in
    /// this container's template.
    pub fn discard_for_focused(&mut self) {
        self.for_focused = None;
    }

    /// Is it allowed to embed this widget in a page with the given
    /// untrusted host?
    pub fn check_host(
        &self,
        untrusted_host: Option<&str>,
        _site_name: Option<&str>,
    ) -> Result<(), WidgetError> {
        let cls = self.cls.as_ref().expect("unresolved widget");

        match &cls.untrusted_host {
            None => {
                if untrusted_host.is_some() {
                    /* untrusted hosts must only ever see untrusted
                       widgets */
                    return Err(WidgetError::new(
                        WidgetErrorCode::Forbidden,
                        format!(
                            "refusing to embed trusted widget '{}' in untrusted page",
                            self.log_name()
                        ),
                    ));
                }
            }
            Some(class_host) => {
                if untrusted_host != Some(class_host.as_str()) {
                    return Err(WidgetError::new(
                        WidgetErrorCode::Forbidden,
                        format!(
                            "untrusted host mismatch for widget '{}'",
                            self.log_name()
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Copy in-session state; `ws` is this widget's session node.
    pub fn load_from_widget_session(&mut self, ws: &WidgetSession) {
        self.from_request.path_info = ws.path_info.clone();
        self.from_request.query_string = ws.query_string.clone();
    }

    pub fn save_to_widget_session(&self, ws: &mut WidgetSession) {
        ws.path_info = self.from_request.path_info.clone();
        ws.query_string = self
            .from_request
            .query_string
            .clone()
            .filter(|s| !s.is_empty());
    }
}

/// Replace characters that would break an XML id.
pub fn quote_xml_id(s: &str) -> String {
    s.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Attach `child` under `parent`.
pub fn add_child(parent: &WidgetRef, child: &WidgetRef) {
    child.borrow_mut().parent = Rc::downgrade(parent);
    parent.borrow_mut().children.push(Rc::clone(child));
}

/// Set the widget id and derive `id_path` and `prefix` from the
/// parent chain.
pub fn set_id(widget: &WidgetRef, id: &str) {
    let parent = widget.borrow().parent.upgrade();

    let mut w = widget.borrow_mut();
    w.id = Some(id.to_string());

    if let Some(parent) = parent {
        let parent = parent.borrow();

        if let Some(parent_path) = &parent.id_path {
            w.id_path = Some(if parent_path.is_empty() {
                id.to_string()
            } else {
                format!("{}{}{}", parent_path, WIDGET_REF_SEPARATOR, id)
            });
        }

        if let Some(parent_prefix) = &parent.prefix {
            w.prefix = Some(format!("{}{}__", parent_prefix, quote_xml_id(id)));
        }
    }
}

/// Find a direct child by id.
pub fn find_child(parent: &Widget, child_id: &str) -> Option<WidgetRef> {
    parent
        .children
        .iter()
        .find(|c| c.borrow().id.as_deref() == Some(child_id))
        .cloned()
}

/// Recursion guard: is the class name of `widget` already present in
/// its ancestor chain?
pub fn check_recursion(widget: &WidgetRef) -> bool {
    let class_name = match &widget.borrow().class_name {
        Some(name) => name.clone(),
        None => return false,
    };

    let mut current = widget.borrow().parent.upgrade();
    while let Some(ancestor) = current {
        let a = ancestor.borrow();
        if a.class_name.as_deref() == Some(&class_name) {
            return true;
        }
        current = a.parent.upgrade();
    }

    false
}

/// Resolve this widget's session node within a realm and apply `f`
/// to it.
pub fn with_widget_session<R>(
    widget: &WidgetRef,
    realm: &mut RealmSession,
    create: bool,
    f: impl FnOnce(&mut WidgetSession) -> R,
) -> Option<R> {
    fn lookup<'a>(
        widget: &WidgetRef,
        realm: &'a mut RealmSession,
        create: bool,
    ) -> Option<&'a mut WidgetSession> {
        let (id, scope, parent) = {
            let w = widget.borrow();
            (w.id.clone()?, w.session_scope, w.parent.upgrade())
        };

        match parent {
            None => realm.get_widget(&id, create),
            Some(parent) => match scope {
                SessionScope::Resource => {
                    /* bound to the resource: find the parent's
                       session first */
                    let parent_session = lookup(&parent, realm, create)?;
                    parent_session.get_child(&id, create)
                }
                SessionScope::Site => {
                    /* site-global: straight from the realm */
                    realm.get_widget(&id, create)
                }
            },
        }
    }

    lookup(widget, realm, create).map(f)
}

/// Load `path_info`/`query_string` from the session; called when
/// `session_sync_pending` was set by the resolver.
pub fn load_from_session(widget: &WidgetRef, realm: &mut RealmSession) {
    {
        let mut w = widget.borrow_mut();
        debug_assert!(w.session_sync_pending);
        w.session_sync_pending = false;

        if !w.should_sync_session() {
            return;
        }

        if w.has_focus() {
            /* postpone until the response tells us whether the view
               is processable */
            w.session_save_pending = true;
            return;
        }
    }

    let state = with_widget_session(widget, realm, false, |ws| ws.clone());
    if let Some(ws) = state {
        widget.borrow_mut().load_from_widget_session(&ws);
    }
}

/// Save the current request to the session; called after the
/// response when `session_save_pending` was set.
pub fn save_to_session(widget: &WidgetRef, realm: &mut RealmSession) {
    {
        let mut w = widget.borrow_mut();
        debug_assert!(w.session_save_pending);
        w.session_save_pending = false;

        if !w.should_sync_session() {
            return;
        }
    }

    let snapshot = {
        let w = widget.borrow();
        (
            w.from_request.path_info.clone(),
            w.from_request.query_string.clone(),
        )
    };

    with_widget_session(widget, realm, true, |ws| {
        ws.path_info = snapshot.0;
        ws.query_string = snapshot.1.filter(|s| !s.is_empty());
    });
}

/// Copy request parameters down from the parent's `for_focused`
/// slot when this widget (or one of its descendants) is focused.
pub fn copy_from_request(widget: &WidgetRef) -> Result<(), WidgetError> {
    let parent = widget.borrow().parent.upgrade();
    let Some(parent) = parent else {
        return Ok(());
    };

    let focus = {
        let p = parent.borrow();
        match &p.from_request.focus_ref {
            Some(path) if !path.is_empty() => Some(path.clone()),
            _ => None,
        }
    };

    let Some(focus) = focus else {
        return Ok(());
    };

    let my_id = match &widget.borrow().id {
        Some(id) => id.clone(),
        None => return Ok(()),
    };

    if focus[0] != my_id {
        return Ok(());
    }

    let rest: Vec<String> = focus[1..].to_vec();

    if rest.is_empty() {
        /* this is the focused widget: it receives method, body and
           query string */
        let for_focused = parent.borrow_mut().for_focused.take();
        let mut w = widget.borrow_mut();
        w.from_request.focus_ref = Some(Vec::new());

        if let Some(for_focused) = for_focused {
            w.from_request.method = for_focused.method;
            w.from_request.body = for_focused.body;
            if for_focused.path_info.is_some() {
                w.from_request.path_info = for_focused.path_info;
            }
            if for_focused.query_string.is_some() {
                w.from_request.query_string = for_focused.query_string;
            }
        }
    } else {
        /* pass the parameters further down */
        let for_focused = parent.borrow_mut().for_focused.take();
        let mut w = widget.borrow_mut();
        w.from_request.focus_ref = Some(rest);
        w.for_focused = for_focused;
    }

    Ok(())
}
