/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Streaming parsers for the template markup: a character-at-a-time
//! HTML/XML tokenizer and a CSS tokenizer, both emitting events with
//! absolute byte offsets so a substitution engine can rewrite the
//! source in place.  Neither builds a tree.

pub mod css;
pub mod escape;
pub mod syntax;
pub mod xml;

pub use css::{CssParser, CssParserHandler, CssValue};
pub use escape::{EscapeClass, EscapeIstream};
pub use xml::{XmlParser, XmlParserAttribute, XmlParserHandler, XmlParserTag, XmlTagType};
