/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget URI rewriter, end to end: resolver, mode dispatch,
//! untrusted-host rewrites and HTML escaping of the output.

use std::rc::Rc;

use markup::escape::EscapeClass;
use processor::{RewriteUriMode, rewrite_widget_uri};
use stream::StringSink;
use widget::{Widget, WidgetContext, WidgetRef};

use crate::support::{CannedResourceLoader, make_context};

struct Fixture {
    ctx: Rc<WidgetContext>,
    root: WidgetRef,
}

fn fixture(site_name: Option<&str>) -> Fixture {
    let loader = Rc::new(CannedResourceLoader::new());
    let ctx = make_context(loader, true, site_name, "/index.html", None);
    let root = ctx.add_root_widget(Widget::new_root(Some("foobar")));
    Fixture { ctx, root }
}

impl Fixture {
    fn widget(&self, class_name: &str, id: &str) -> WidgetRef {
        let widget = Widget::new(None);
        widget.borrow_mut().set_class_name(class_name);
        widget::add_child(&self.root, &widget);
        widget::set_id(&widget, id);
        widget
    }

    fn check(
        &self,
        widget: &WidgetRef,
        value: &str,
        mode: RewriteUriMode,
        stateful: bool,
        view: Option<&str>,
        expected: Option<&str>,
    ) {
        /* attribute values arrive HTML-escaped */
        let escaped_value = EscapeClass::Html.escape_str(value);

        let istream = rewrite_widget_uri(
            &self.ctx,
            widget,
            escaped_value.as_bytes(),
            mode,
            stateful,
            view,
            EscapeClass::Html,
        );

        match expected {
            None => {
                if let Some(istream) = istream {
                    /* unresolved classes produce their verdict
                       asynchronously: an unchanged (or empty) value */
                    let result = StringSink::new(istream).run_to_completion().unwrap();
                    assert!(
                        result == escaped_value || result.is_empty(),
                        "expected no rewrite, got {:?}",
                        result
                    );
                }
            }
            Some(expected) => {
                let istream = istream.expect("expected a rewritten stream");
                let result = StringSink::new(istream).run_to_completion().unwrap();
                assert_eq!(result, EscapeClass::Html.escape_str(expected));
            }
        }
    }
}

#[test]
fn test_modes_with_normal_widget() {
    let f = fixture(None);
    let widget = f.widget("1", "1");

    f.check(
        &widget,
        "123",
        RewriteUriMode::Direct,
        true,
        None,
        Some("http://widget-server/1/123"),
    );
    f.check(
        &widget,
        "123",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path=123"),
    );
    f.check(
        &widget,
        "123",
        RewriteUriMode::Partial,
        true,
        None,
        Some("/index.html;focus=1&path=123&frame=1"),
    );

    /* with query string */
    f.check(
        &widget,
        "123?user=root&password=hansilein",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path=123?user=root&password=hansilein"),
    );

    /* with empty value */
    f.check(
        &widget,
        "",
        RewriteUriMode::Direct,
        true,
        None,
        Some("http://widget-server/1/"),
    );
    f.check(
        &widget,
        "",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path="),
    );
}

#[test]
fn test_configured_path_info() {
    let f = fixture(None);
    let widget = f.widget("1", "1");
    widget.borrow_mut().from_template.path_info = "456/".to_string();

    f.check(
        &widget,
        "123",
        RewriteUriMode::Direct,
        true,
        None,
        Some("http://widget-server/1/456/123"),
    );
    f.check(
        &widget,
        "123",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path=456$2f123"),
    );
    f.check(
        &widget,
        "",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path=456$2f"),
    );
}

#[test]
fn test_base_mismatch() {
    let f = fixture(None);
    let widget = f.widget("2", "1");

    f.check(
        &widget,
        "123",
        RewriteUriMode::Direct,
        true,
        None,
        Some("http://widget-server/123"),
    );
    f.check(&widget, "123", RewriteUriMode::Focus, true, None, None);
    f.check(&widget, "123", RewriteUriMode::Partial, true, None, None);

    /* valid path */
    f.check(
        &widget,
        "2",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path="),
    );
    f.check(
        &widget,
        "2/foo",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/index.html;focus=1&path=$2ffoo"),
    );

    /* with view */
    f.check(
        &widget,
        "",
        RewriteUriMode::Focus,
        false,
        Some("foo"),
        Some("/index.html;focus=1&path=&view=foo"),
    );
}

#[test]
fn test_local_uri() {
    let f = fixture(None);
    let widget = f.widget("3", "id3");

    f.check(
        &widget,
        "@/foo",
        RewriteUriMode::Direct,
        true,
        None,
        Some("/resources/3/foo"),
    );
    f.check(
        &widget,
        "@/foo",
        RewriteUriMode::Focus,
        true,
        None,
        Some("/resources/3/foo"),
    );
    f.check(
        &widget,
        "@/foo",
        RewriteUriMode::Partial,
        true,
        None,
        Some("/resources/3/foo"),
    );
}

#[test]
fn test_response_mode() {
    let f = fixture(None);
    let widget = f.widget("3", "id3");

    /* the widget's inline response substitutes the URI */
    let istream = rewrite_widget_uri(
        &f.ctx,
        &widget,
        b"123",
        RewriteUriMode::Response,
        true,
        None,
        EscapeClass::Html,
    )
    .expect("stream");
    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, "3");
}

#[test]
fn test_untrusted_host() {
    let f = fixture(Some("mysite"));
    let widget = f.widget("untrusted_host", "uh_id");

    f.check(
        &widget,
        "123",
        RewriteUriMode::Focus,
        false,
        None,
        Some("//untrusted.host/index.html;focus=uh_id&path=123"),
    );
    f.check(
        &widget,
        "/1/123",
        RewriteUriMode::Focus,
        false,
        None,
        Some("//untrusted.host/index.html;focus=uh_id&path=123"),
    );
}

#[test]
fn test_untrusted_raw_site_suffix() {
    let f = fixture(Some("mysite"));
    let widget = f.widget("untrusted_raw_site_suffix", "urss_id");

    f.check(
        &widget,
        "123",
        RewriteUriMode::Focus,
        false,
        None,
        Some("//mysite_urss/index.html;focus=urss_id&path=123"),
    );
    f.check(
        &widget,
        "/1/123",
        RewriteUriMode::Focus,
        false,
        None,
        Some("//mysite_urss/index.html;focus=urss_id&path=123"),
    );
}

#[test]
fn test_absolute_uris_are_left_alone() {
    let f = fixture(None);
    let widget = f.widget("1", "1");

    assert!(
        rewrite_widget_uri(
            &f.ctx,
            &widget,
            b"http://other.host/x",
            RewriteUriMode::Focus,
            true,
            None,
            EscapeClass::Html,
        )
        .is_none()
    );
}
