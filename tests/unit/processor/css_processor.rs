/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::rc::Rc;

use processor::{CssProcessorOptions, css_processor};
use stream::{StringSink, istream_string};
use widget::Widget;

use crate::support::{FailingResourceLoader, make_context};

fn run_css(input: &str, options: CssProcessorOptions) -> String {
    let ctx = make_context(
        Rc::new(FailingResourceLoader),
        true,
        None,
        "/beng.html?'%\"<>",
        Some("http://localhost:8080/beng.html?'%\"<>"),
    );
    let widget = ctx.add_root_widget(Widget::new_root(None));

    let istream = css_processor(istream_string(input), &widget, &ctx, options);
    StringSink::new(istream).run_to_completion().unwrap()
}

#[test]
fn test_mode_declaration_is_removed() {
    let input = "body {\n  font-family: serif;\n  -c-mode: partial;\n  background-image: url(foo.jpg);\n}\n";
    let expected = "body {\n  font-family: serif;\n  \n  background-image: url(foo.jpg);\n}\n";

    assert_eq!(
        run_css(input, CssProcessorOptions::REWRITE_URL),
        expected
    );
}

#[test]
fn test_view_declaration_is_removed() {
    let input = "a { -c-view: big; color: red; }";
    let expected = "a {  color: red; }";

    assert_eq!(
        run_css(input, CssProcessorOptions::REWRITE_URL),
        expected
    );
}

#[test]
fn test_declarations_survive_without_rewrite_option() {
    let input = "a { -c-mode: partial; }";
    assert_eq!(run_css(input, CssProcessorOptions::empty()), input);
}

#[test]
fn test_root_container_urls_are_not_rewritten() {
    let input = "a { background: url(\"x.png\"); }";
    assert_eq!(run_css(input, CssProcessorOptions::REWRITE_URL), input);
}

#[test]
fn test_plain_css_passes_through() {
    let input = ".cls { margin: 0; }\n#id { padding: 1px; }\n";
    assert_eq!(run_css(input, CssProcessorOptions::REWRITE_URL), input);
}
