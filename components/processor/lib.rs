/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The template engine: streaming XML/HTML and CSS processors that
//! rewrite URIs and expand `<c:widget>` elements, the inline-widget
//! driver that fetches and splices child responses, and the glue
//! that dispatches widget requests through the protocol clients.

pub mod container;
pub mod css;
pub mod frame;
pub mod inline;
pub mod loader;
pub mod request;
pub mod rewrite;
pub mod text;
pub mod xml;

use bitflags::bitflags;
use widget::view::options;

bitflags! {
    /// XML processor options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessorOptions: u32 {
        /// Rewrite URLs in well-known attributes.
        const REWRITE_URL = options::REWRITE_URL;
        /// Default the rewrite base to the widget, mode to focus.
        const FOCUS_WIDGET = options::FOCUS_WIDGET;
        /// A widget may embed its own class.
        const SELF_CONTAINER = options::SELF_CONTAINER;
        /// Expand underscore prefixes in `class` attributes.
        const PREFIX_CSS_CLASS = options::PREFIX_CSS_CLASS;
        /// Expand underscore prefixes in `id`/`for` attributes.
        const PREFIX_XML_ID = options::PREFIX_XML_ID;
        /// Feed `<style>` contents to the CSS processor.
        const STYLE = options::STYLE;
        /// Expand `<c:widget>` elements.
        const CONTAINER = options::CONTAINER;
    }
}

bitflags! {
    /// CSS processor options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CssProcessorOptions: u32 {
        const REWRITE_URL = 1 << 0;
        const PREFIX_CLASS = 1 << 1;
        const PREFIX_ID = 1 << 2;
    }
}

pub use css::css_processor;
pub use inline::embed_inline_widget;
pub use loader::DirectResourceLoader;
pub use request::widget_http_request;
pub use rewrite::{RewriteUriMode, parse_uri_mode, rewrite_widget_uri};
pub use text::text_processor;
pub use xml::{processable, processor_process};
