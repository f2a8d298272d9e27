/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The CSS processor: rewrites `url(...)` and `@import` values,
//! honors the proprietary `-c-mode`/`-c-view` declarations (which
//! are deleted from the output), and prefixes underscore class/id
//! selectors.

use std::rc::Rc;

use markup::css::{CssParser, CssParserHandler, CssValue};
use markup::escape::EscapeClass;
use markup::syntax::underscore_prefix;
use stream::istream::BoxIstream;
use stream::istream_string;
use stream::replace::{ReplaceCore, ReplaceIstream, ReplaceParser};
use widget::{WidgetContext, WidgetRef};

use crate::rewrite::{RewriteUriMode, parse_uri_mode, rewrite_widget_uri};
use crate::CssProcessorOptions;

struct CssUriRewrite {
    mode: RewriteUriMode,
    view: Option<String>,
}

struct CssProcState {
    container: WidgetRef,
    ctx: Rc<WidgetContext>,
    options: CssProcessorOptions,
    uri_rewrite: CssUriRewrite,
}

struct CssProcessorParser {
    parser: CssParser,
    state: CssProcState,
}

impl ReplaceParser for CssProcessorParser {
    fn parse(&mut self, core: &mut ReplaceCore, data: &[u8]) -> usize {
        let mut sink = CssSink {
            core,
            state: &mut self.state,
        };
        self.parser.feed(data, &mut sink)
    }

    fn parse_end(&mut self, core: &mut ReplaceCore) {
        core.finish();
    }
}

struct CssSink<'a> {
    core: &'a mut ReplaceCore,
    state: &'a mut CssProcState,
}

impl CssParserHandler for CssSink<'_> {
    fn on_class_name(&mut self, name: &CssValue<'_>) {
        debug_assert!(!name.value.is_empty());

        if !self.state.options.contains(CssProcessorOptions::PREFIX_CLASS) {
            return;
        }

        let n = underscore_prefix(name.value);
        if n == 3 {
            /* triple underscore: widget path prefix */
            let Some(prefix) = self.state.container.borrow().get_prefix().map(str::to_string)
            else {
                return;
            };
            self.core
                .add(name.start, name.start + 3, Some(istream_string(prefix)));
        } else if n == 2 {
            /* double underscore: class name prefix */
            let Some(class_name) = self
                .state
                .container
                .borrow()
                .get_quoted_class_name()
                .map(str::to_string)
            else {
                return;
            };
            self.core
                .add(name.start, name.start + 2, Some(istream_string(class_name)));
        }
    }

    fn on_xml_id(&mut self, id: &CssValue<'_>) {
        debug_assert!(!id.value.is_empty());

        if !self.state.options.contains(CssProcessorOptions::PREFIX_ID) {
            return;
        }

        let n = underscore_prefix(id.value);
        if n == 3 {
            let Some(prefix) = self.state.container.borrow().get_prefix().map(str::to_string)
            else {
                return;
            };
            self.core
                .add(id.start, id.start + 3, Some(istream_string(prefix)));
        } else if n == 2 {
            let Some(class_name) = self
                .state
                .container
                .borrow()
                .get_quoted_class_name()
                .map(str::to_string)
            else {
                return;
            };
            self.core
                .add(id.start, id.start + 1, Some(istream_string(class_name)));
        }
    }

    fn on_block(&mut self) {
        self.state.uri_rewrite.mode = RewriteUriMode::Partial;
        self.state.uri_rewrite.view = None;
    }

    fn on_property_keyword(&mut self, name: &str, value: &[u8], start: u64, end: u64) {
        if !self.state.options.contains(CssProcessorOptions::REWRITE_URL) {
            return;
        }

        if name == "-c-mode" {
            self.state.uri_rewrite.mode = parse_uri_mode(value);
            self.core.add(start, end, None);
        } else if name == "-c-view" {
            self.state.uri_rewrite.view =
                Some(String::from_utf8_lossy(value).into_owned());
            self.core.add(start, end, None);
        }
    }

    fn on_url(&mut self, url: &CssValue<'_>) {
        if !self.state.options.contains(CssProcessorOptions::REWRITE_URL)
            || self.state.container.borrow().is_root()
        {
            return;
        }

        let istream = rewrite_widget_uri(
            &self.state.ctx,
            &self.state.container,
            url.value,
            self.state.uri_rewrite.mode,
            false,
            self.state.uri_rewrite.view.as_deref(),
            EscapeClass::Css,
        );

        if let Some(istream) = istream {
            self.core.add(url.start, url.end, Some(istream));
        }
    }

    fn on_import(&mut self, url: &CssValue<'_>) {
        if !self.state.options.contains(CssProcessorOptions::REWRITE_URL)
            || self.state.container.borrow().is_root()
        {
            return;
        }

        let istream = rewrite_widget_uri(
            &self.state.ctx,
            &self.state.container,
            url.value,
            RewriteUriMode::Partial,
            false,
            None,
            EscapeClass::Css,
        );

        if let Some(istream) = istream {
            self.core.add(url.start, url.end, Some(istream));
        }
    }
}

/// Process a CSS document (a stylesheet response or the contents of
/// a `<style>` element).
pub fn css_processor(
    input: BoxIstream,
    widget: &WidgetRef,
    ctx: &Rc<WidgetContext>,
    options: CssProcessorOptions,
) -> BoxIstream {
    Box::new(ReplaceIstream::new(
        input,
        CssProcessorParser {
            parser: CssParser::new(false),
            state: CssProcState {
                container: Rc::clone(widget),
                ctx: Rc::clone(ctx),
                options,
                uri_rewrite: CssUriRewrite {
                    mode: RewriteUriMode::Partial,
                    view: None,
                },
            },
        },
    ))
}
