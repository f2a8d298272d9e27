/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end template processing: entity expansion, SCRIPT-mode
//! opacity, `<c:widget>` expansion, and recursive processing of a
//! container widget's response with focus rewrites.

use std::rc::Rc;

use processor::{ProcessorOptions, processor_process};
use stream::{StringSink, istream_string};
use widget::{Widget, WidgetContext};

use crate::support::{CannedResourceLoader, make_context};

const INPUT: &str = "\
\nfoo &c:url;
<script><c:widget id=\"foo\" type=\"bar\"/></script>
<c:widget id=\"foo\" type=\"bar\"/>
<b>&c:uri;</b>
<c:widget id=\"p\" type=\"processed\"/>
";

const EXPECTED: &str = "\
\nfoo &c:url;
<script><c:widget id=\"foo\" type=\"bar\"/></script>
bar
<b>http://localhost:8080/beng.html?%27%%22%3c%3e</b>

<META http-equiv=\"refresh\" content=\"999;URL='/beng.html?&apos;%&quot;&lt;&gt;;focus=p&amp;path=refresh'\">Refresh</meta>
<a href=\"/beng.html?&apos;%&quot;&lt;&gt;;focus=p&amp;path=relative\">

";

fn make_processor_context() -> Rc<WidgetContext> {
    make_context(
        Rc::new(CannedResourceLoader::new()),
        true,
        None,
        "/beng.html?'%\"<>",
        Some("http://localhost:8080/beng.html?'%\"<>"),
    )
}

#[test]
fn test_template_end_to_end() {
    let ctx = make_processor_context();
    let widget = ctx.add_root_widget(Widget::new_root(None));

    let istream = processor_process(
        istream_string(INPUT),
        &widget,
        &ctx,
        ProcessorOptions::CONTAINER,
    );

    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, EXPECTED);
}

#[test]
fn test_widget_without_registry_is_ignored() {
    let ctx = make_context(
        Rc::new(CannedResourceLoader::new()),
        false,
        None,
        "/beng.html",
        Some("http://localhost:8080/beng.html"),
    );
    let widget = ctx.add_root_widget(Widget::new_root(None));

    let input = "a<c:widget id=\"x\" type=\"bar\"/>b";
    let istream = processor_process(
        istream_string(input),
        &widget,
        &ctx,
        ProcessorOptions::CONTAINER,
    );

    /* without a registry the element is not recognized and stays */
    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, input);
}

#[test]
fn test_unknown_widget_class_leaves_empty_slot() {
    let ctx = make_processor_context();
    let widget = ctx.add_root_widget(Widget::new_root(None));

    let input = "a<c:widget id=\"x\" type=\"nonexistent\"/>b";
    let istream = processor_process(
        istream_string(input),
        &widget,
        &ctx,
        ProcessorOptions::CONTAINER,
    );

    /* the lookup fails; the slot collapses to nothing and the
       template continues */
    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, "ab");
}

#[test]
fn test_widget_display_none() {
    let ctx = make_processor_context();
    let widget = ctx.add_root_widget(Widget::new_root(None));

    let input = "a<c:widget id=\"x\" type=\"bar\" display=\"none\"/>b";
    let istream = processor_process(
        istream_string(input),
        &widget,
        &ctx,
        ProcessorOptions::CONTAINER,
    );

    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, "ab");
}

#[test]
fn test_widget_params_become_query_string() {
    let ctx = make_processor_context();
    let root = ctx.add_root_widget(Widget::new_root(None));

    let input = "<c:widget id=\"x\" type=\"bar\">\
                 <c:param name=\"a\" value=\"1 2\"/>\
                 <c:param name=\"b\" value=\"3\"/>\
                 </c:widget>";
    let istream = processor_process(
        istream_string(input),
        &root,
        &ctx,
        ProcessorOptions::CONTAINER,
    );

    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, "bar");

    /* the parameters were URI-escaped and accumulated */
    let child = root.borrow().children[0].clone();
    assert_eq!(
        child.borrow().from_template.query_string.as_deref(),
        Some("a=1%202&b=3")
    );
}

#[test]
fn test_max_widget_depth() {
    let ctx = make_processor_context();
    let root = ctx.add_root_widget(Widget::new_root(None));

    /* a "bar" container whose template embeds another "bar" */
    let outer = Widget::new(None);
    outer.borrow_mut().set_class_name("bar");
    widget::add_child(&root, &outer);
    widget::set_id(&outer, "outer");

    let input = "x<c:widget id=\"inner\" type=\"bar\"/>y";
    let istream = processor_process(
        istream_string(input),
        &outer,
        &ctx,
        ProcessorOptions::CONTAINER,
    );

    /* the recursion guard refuses the nested instance */
    let result = StringSink::new(istream).run_to_completion().unwrap();
    assert_eq!(result, "xy");
}
