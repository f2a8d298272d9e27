/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget URI algebra, exercised the way the URI rewriter uses
//! it: a widget with the HTTP backend `http://widget-server/1/` and
//! `id_path = "1"` against the external template `/index.html`.

use std::rc::Rc;

use widget::uri::{
    uri_add_raw_site_suffix, uri_has_authority, uri_replace_hostname,
};
use widget::{HttpAddress, ResourceAddress, Widget, WidgetClass, WidgetRef};

fn make_widget(uri: &str, id: &str) -> WidgetRef {
    let root = Widget::new_root(Some("foobar"));

    let cls = Rc::new(WidgetClass::new(ResourceAddress::Http(HttpAddress::new(
        false,
        "widget-server",
        uri,
    ))));

    let widget = Widget::new(Some(cls));
    widget::add_child(&root, &widget);
    widget::set_id(&widget, id);

    /* keep the root alive through the widget's parent pointer */
    std::mem::forget(root);

    widget
}

fn external(
    widget: &WidgetRef,
    stateful: bool,
    value: Option<&str>,
    frame: Option<&str>,
    view: Option<&str>,
) -> Option<String> {
    widget
        .borrow()
        .external_uri("/index.html", None, stateful, value, frame, view)
}

#[test]
fn test_direct_base() {
    let widget = make_widget("/1/", "1");

    assert_eq!(
        widget.borrow().absolute_uri(true, Some("123")).as_deref(),
        Some("http://widget-server/1/123")
    );
    assert_eq!(
        widget.borrow().absolute_uri(true, Some("")).as_deref(),
        Some("http://widget-server/1/")
    );
    assert_eq!(
        widget.borrow().absolute_uri(true, None).as_deref(),
        Some("http://widget-server/1/")
    );
}

#[test]
fn test_focus_and_partial() {
    let widget = make_widget("/1/", "1");

    assert_eq!(
        external(&widget, true, Some("123"), None, None).as_deref(),
        Some("/index.html;focus=1&path=123")
    );
    assert_eq!(
        external(&widget, true, Some("123"), Some("1"), None).as_deref(),
        Some("/index.html;focus=1&path=123&frame=1")
    );
    assert_eq!(
        external(&widget, true, Some(""), None, None).as_deref(),
        Some("/index.html;focus=1&path=")
    );
    assert_eq!(
        external(&widget, true, None, None, None).as_deref(),
        Some("/index.html;focus=1")
    );
}

#[test]
fn test_query_string_forwarding() {
    let widget = make_widget("/1/", "1");

    assert_eq!(
        external(
            &widget,
            true,
            Some("123?user=root&password=hansilein"),
            None,
            None
        )
        .as_deref(),
        Some("/index.html;focus=1&path=123?user=root&password=hansilein")
    );
}

#[test]
fn test_template_path_info() {
    let widget = make_widget("/1/", "1");
    widget.borrow_mut().from_template.path_info = "456/".to_string();

    assert_eq!(
        widget.borrow().absolute_uri(true, None).as_deref(),
        Some("http://widget-server/1/456/")
    );
    assert_eq!(
        widget.borrow().absolute_uri(true, Some("123")).as_deref(),
        Some("http://widget-server/1/456/123")
    );
    assert_eq!(
        external(&widget, true, Some("123"), None, None).as_deref(),
        Some("/index.html;focus=1&path=456$2f123")
    );
    assert_eq!(
        external(&widget, true, Some(""), None, None).as_deref(),
        Some("/index.html;focus=1&path=456$2f")
    );
}

#[test]
fn test_template_query_string() {
    let widget = make_widget("/1/", "1");
    widget.borrow_mut().from_template.path_info = "456/".to_string();
    widget.borrow_mut().from_template.query_string = Some("a=b".to_string());

    assert_eq!(
        widget.borrow().absolute_uri(true, None).as_deref(),
        Some("http://widget-server/1/456/?a=b")
    );
    assert_eq!(
        widget.borrow().absolute_uri(true, Some("123")).as_deref(),
        Some("http://widget-server/1/456/123?a=b")
    );
    assert_eq!(
        widget.borrow().absolute_uri(true, Some("?c=d")).as_deref(),
        Some("http://widget-server/1/456/?a=b&c=d")
    );

    /* the template query string never leaks into focus URIs */
    assert_eq!(
        external(&widget, true, Some("123"), None, None).as_deref(),
        Some("/index.html;focus=1&path=456$2f123")
    );
}

#[test]
fn test_session_state() {
    let widget = make_widget("/1/", "1");
    widget.borrow_mut().from_template.query_string = Some("a=b".to_string());
    widget.borrow_mut().from_request.path_info = Some("789/".to_string());
    widget.borrow_mut().from_request.query_string = Some("e=f".to_string());

    assert_eq!(
        widget.borrow().absolute_uri(true, None).as_deref(),
        Some("http://widget-server/1/789/?a=b&e=f")
    );
    assert_eq!(
        external(&widget, true, Some("123"), None, None).as_deref(),
        Some("/index.html;focus=1&path=789$2f123")
    );
    assert_eq!(
        external(&widget, true, Some(""), None, None).as_deref(),
        Some("/index.html;focus=1&path=789$2f?e=f")
    );

    /* stateless: session data is ignored */
    assert_eq!(
        widget.borrow().absolute_uri(false, Some("123")).as_deref(),
        Some("http://widget-server/1/123?a=b")
    );
    assert_eq!(
        external(&widget, false, Some("123"), None, None).as_deref(),
        Some("/index.html;focus=1&path=123")
    );
}

#[test]
fn test_base_without_trailing_slash() {
    let widget = make_widget("/2", "1");

    assert_eq!(
        widget.borrow().absolute_uri(true, Some("123")).as_deref(),
        Some("http://widget-server/123")
    );
    assert_eq!(
        widget.borrow().absolute_uri(true, Some("@/foo")).as_deref(),
        Some("http://widget-server/@/foo")
    );

    /* base mismatch */
    assert_eq!(widget.borrow().relative_uri(true, "123"), None);
    assert_eq!(external(&widget, true, Some("123"), None, None), None);

    /* a valid path */
    assert_eq!(
        widget.borrow().relative_uri(true, "2").as_deref(),
        Some("")
    );
    assert_eq!(
        external(&widget, true, Some("2"), None, None).as_deref(),
        Some("/index.html;focus=1&path=")
    );
    assert_eq!(
        external(&widget, true, Some("2/foo"), None, None).as_deref(),
        Some("/index.html;focus=1&path=$2ffoo")
    );
}

#[test]
fn test_view_argument() {
    let widget = make_widget("/2", "1");

    assert_eq!(
        external(&widget, false, None, None, Some("foo")).as_deref(),
        Some("/index.html;focus=1&view=foo")
    );
}

#[test]
fn test_untrusted_rewrites() {
    assert_eq!(
        uri_replace_hostname("/index.html;focus=uh_id&path=123", "untrusted.host"),
        "//untrusted.host/index.html;focus=uh_id&path=123"
    );

    assert_eq!(
        uri_add_raw_site_suffix(
            "/index.html;focus=urss_id&path=123",
            Some("mysite"),
            None,
            "_urss"
        ),
        "//mysite_urss/index.html;focus=urss_id&path=123"
    );
}

#[test]
fn test_uri_has_authority() {
    assert!(uri_has_authority("http://host/path"));
    assert!(uri_has_authority("//host/path"));
    assert!(!uri_has_authority("/path"));
    assert!(!uri_has_authority("relative"));
    assert!(!uri_has_authority("mailto:user@host"));
}
