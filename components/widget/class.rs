/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashSet;
use std::rc::Rc;

use crate::address::ResourceAddress;
use crate::view::WidgetView;

/// The resolved description of a widget type, looked up by name
/// through the translation collaborator.
#[derive(Debug, Clone)]
pub struct WidgetClass {
    /// The first view is the default view, which also determines the
    /// widget server address.
    pub views: Vec<Rc<WidgetView>>,

    /// Prefix for `@/` URIs: resources shipped with the widget class
    /// rather than generated by the widget server.
    pub local_uri: Option<String>,

    pub untrusted_host: Option<String>,
    pub untrusted_prefix: Option<String>,
    pub untrusted_site_suffix: Option<String>,
    pub untrusted_raw_site_suffix: Option<String>,

    /// Does the widget have per-session state (path_info, query
    /// string)?
    pub stateful: bool,

    pub require_csrf_token: bool,

    /// The group this class belongs to, for container approval.
    pub group: Option<String>,

    /// Groups this class allows as children (the container policy).
    pub container_groups: HashSet<String>,

    /// May the browser address this widget directly?
    pub direct_addressing: bool,
}

impl WidgetClass {
    pub fn new(address: ResourceAddress) -> WidgetClass {
        WidgetClass {
            views: vec![Rc::new(WidgetView::new(None, address))],
            local_uri: None,
            untrusted_host: None,
            untrusted_prefix: None,
            untrusted_site_suffix: None,
            untrusted_raw_site_suffix: None,
            stateful: false,
            require_csrf_token: false,
            group: None,
            container_groups: HashSet::new(),
            direct_addressing: false,
        }
    }

    /// Look a view up by name; `None` finds the default view.
    pub fn find_view(&self, name: Option<&str>) -> Option<Rc<WidgetView>> {
        match name {
            None => self.views.first().cloned(),
            Some(name) => self
                .views
                .iter()
                .find(|v| v.name.as_deref() == Some(name))
                .cloned(),
        }
    }

    pub fn has_groups(&self) -> bool {
        !self.container_groups.is_empty()
    }

    /// May this (container) class embed a child of class `child`?
    pub fn may_embed(&self, child: &WidgetClass) -> bool {
        match &child.group {
            Some(group) => self.container_groups.contains(group),
            None => false,
        }
    }
}
