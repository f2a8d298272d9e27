/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! `<c:widget>` element parsing: collects the child widget's
//! attributes (`type`, `id`, `display`, `session`) and child
//! elements (`<c:path-info>`, `<c:param>`, `<c:header>`,
//! `<c:view>`) while the XML processor walks the template.

use std::rc::Rc;

use log::debug;
use markup::escape::EscapeClass;
use markup::xml::{XmlParserAttribute, XmlTagType};
use widget::{Display, SessionScope, Widget, WidgetRef};

use crate::xml::{ProcState, Tag};

pub(crate) struct CurrentWidget {
    /// Offset of the `<c:widget` opener, for the replacement span.
    pub start_offset: u64,
    pub widget: Option<WidgetRef>,
    pub param_name: Vec<u8>,
    pub param_value: Vec<u8>,
    /// Accumulated `<c:param>` values, URI-escaped,
    /// `name=value&name=value`.
    pub params: Vec<u8>,
}

impl CurrentWidget {
    pub fn new() -> CurrentWidget {
        CurrentWidget {
            start_offset: 0,
            widget: None,
            param_name: Vec::new(),
            param_value: Vec::new(),
            params: Vec::new(),
        }
    }
}

fn header_name_valid(name: &[u8]) -> bool {
    /* the name must start with "X-" */
    if name.len() < 3 || !matches!(name[0], b'x' | b'X') || name[1] != b'-' {
        return false;
    }

    /* the rest must be letters, digits or dashes */
    name[2..]
        .iter()
        .all(|&ch| ch.is_ascii_alphanumeric() || ch == b'-')
}

fn uri_escape_into(out: &mut Vec<u8>, value: &[u8]) {
    for &ch in value {
        if ch.is_ascii_alphanumeric() || matches!(ch, b'-' | b'_' | b'.' | b'~') {
            out.push(ch);
        } else {
            out.extend_from_slice(format!("%{:02x}", ch).as_bytes());
        }
    }
}

fn widget_attr_finished(
    widget: &WidgetRef,
    name: &str,
    value: &[u8],
) -> Result<(), &'static str> {
    match name {
        "type" => {
            if value.is_empty() {
                return Err("empty widget class name");
            }
            widget
                .borrow_mut()
                .set_class_name(&String::from_utf8_lossy(value));
        }
        "id" => {
            if !value.is_empty() {
                widget::set_id(widget, &String::from_utf8_lossy(value));
            }
        }
        "display" => match value {
            b"inline" => widget.borrow_mut().display = Display::Inline,
            b"none" => widget.borrow_mut().display = Display::None,
            _ => return Err("invalid widget 'display' attribute"),
        },
        "session" => match value {
            b"resource" => widget.borrow_mut().session_scope = SessionScope::Resource,
            b"site" => widget.borrow_mut().session_scope = SessionScope::Site,
            _ => return Err("invalid widget 'session' attribute"),
        },
        _ => {}
    }

    Ok(())
}

impl ProcState {
    pub(crate) fn cancel_widget(&mut self) {
        debug_assert!(self.cwidget.widget.is_some());
        self.cwidget.widget = None;
        self.tag = Tag::Ignore;
    }

    /// A tag started while a `<c:widget>` is being collected.
    pub(crate) fn on_start_element_in_widget(
        &mut self,
        tag_type: XmlTagType,
        name: &str,
    ) -> bool {
        let name = name.strip_prefix("c:").unwrap_or(name);

        match name {
            "widget" => {
                if tag_type == XmlTagType::Close {
                    self.tag = Tag::Widget;
                }
            }
            "path-info" => {
                self.tag = Tag::WidgetPathInfo;
            }
            "param" | "parameter" => {
                self.tag = Tag::WidgetParam;
                self.cwidget.param_name.clear();
                self.cwidget.param_value.clear();
            }
            "header" => {
                self.tag = Tag::WidgetHeader;
                self.cwidget.param_name.clear();
                self.cwidget.param_value.clear();
            }
            "view" => {
                self.tag = Tag::WidgetView;
            }
            _ => {
                self.tag = Tag::Ignore;
                return false;
            }
        }

        true
    }

    /// Create the child widget for a `<c:widget>` opener.
    pub(crate) fn start_widget_element(&mut self) {
        debug_assert!(self.cwidget.widget.is_none());

        let child = Widget::new(None);
        child.borrow_mut().parent = Rc::downgrade(&self.container);

        self.tag = Tag::Widget;
        self.cwidget.widget = Some(child);
        self.cwidget.params.clear();
    }

    /// Attribute dispatch for the widget-element tags.
    pub(crate) fn container_attr_finished(&mut self, attr: &XmlParserAttribute<'_>) {
        match self.tag {
            Tag::Widget => {
                let widget = self.cwidget.widget.clone().expect("no widget");
                if let Err(msg) = widget_attr_finished(&widget, attr.name, attr.value) {
                    debug!("bad <c:widget> attribute: {}", msg);
                    self.cancel_widget();
                }
            }

            Tag::WidgetParam | Tag::WidgetHeader => {
                debug_assert!(self.cwidget.widget.is_some());

                if attr.name == "name" {
                    self.cwidget.param_name = attr.value.to_vec();
                } else if attr.name == "value" {
                    self.cwidget.param_value = attr.value.to_vec();
                }
            }

            Tag::WidgetPathInfo => {
                debug_assert!(self.cwidget.widget.is_some());

                if attr.name == "value" {
                    let widget = self.cwidget.widget.as_ref().unwrap();
                    widget.borrow_mut().from_template.path_info =
                        String::from_utf8_lossy(attr.value).into_owned();
                }
            }

            Tag::WidgetView => {
                debug_assert!(self.cwidget.widget.is_some());

                if attr.name == "name" {
                    if attr.value.is_empty() {
                        debug!("empty view name");
                        return;
                    }

                    let widget = self.cwidget.widget.as_ref().unwrap();
                    widget.borrow_mut().from_template.view_name =
                        Some(String::from_utf8_lossy(attr.value).into_owned());
                }
            }

            _ => {}
        }
    }

    /// Element-end dispatch for `<c:param>` and `<c:header>`.
    pub(crate) fn finish_widget_child_element(&mut self, tag_type: XmlTagType) {
        match self.tag {
            Tag::WidgetParam => {
                debug_assert!(self.cwidget.widget.is_some());

                if self.cwidget.param_name.is_empty() {
                    return;
                }

                let mut value = self.cwidget.param_value.clone();
                if value.contains(&b'&') {
                    value = EscapeClass::Html.unescape(&value).into_owned();
                }

                if !self.cwidget.params.is_empty() {
                    self.cwidget.params.push(b'&');
                }

                let name = self.cwidget.param_name.clone();
                let params = &mut self.cwidget.params;
                uri_escape_into(params, &name);
                params.push(b'=');
                uri_escape_into(params, &value);
            }

            Tag::WidgetHeader => {
                debug_assert!(self.cwidget.widget.is_some());

                if tag_type == XmlTagType::Close {
                    return;
                }

                if !header_name_valid(&self.cwidget.param_name) {
                    debug!("invalid widget HTTP header name");
                    return;
                }

                let mut value = self.cwidget.param_value.clone();
                if value.contains(&b'&') {
                    value = EscapeClass::Html.unescape(&value).into_owned();
                }

                let name = String::from_utf8_lossy(&self.cwidget.param_name).into_owned();
                let value = String::from_utf8_lossy(&value).into_owned();

                if let (Ok(name), Ok(value)) = (
                    http::header::HeaderName::from_bytes(name.as_bytes()),
                    http::header::HeaderValue::from_str(&value),
                ) {
                    let widget = self.cwidget.widget.as_ref().unwrap();
                    widget
                        .borrow_mut()
                        .from_template
                        .headers
                        .get_or_insert_with(Default::default)
                        .append(name, value);
                }
            }

            _ => {}
        }
    }

    /// The accumulated `<c:param>` query string, if any.
    pub(crate) fn take_widget_params(&mut self) -> Option<String> {
        if self.cwidget.params.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&std::mem::take(&mut self.cwidget.params)).into_owned())
    }
}
