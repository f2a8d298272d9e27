/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A small streaming CSS tokenizer.  It does not understand the full
//! grammar; it recognizes exactly what the CSS processor needs:
//! class names, xml ids, blocks, property declarations, `url(...)`
//! values and `@import`.

use crate::syntax::{
    is_css_ident_char, is_css_ident_start, is_css_nmchar, is_whitespace_or_null,
};

const NAME_BUFFER_SIZE: usize = 64;
const URL_BUFFER_SIZE: usize = 1024;

/// A token with its absolute source range.
pub struct CssValue<'a> {
    pub start: u64,
    pub end: u64,
    pub value: &'a [u8],
}

pub trait CssParserHandler {
    /// A class selector name (after '.') was found.
    fn on_class_name(&mut self, _name: &CssValue<'_>) {}

    /// An id selector name (after '#') was found.
    fn on_xml_id(&mut self, _id: &CssValue<'_>) {}

    /// A new block begins.
    fn on_block(&mut self) {}

    /// A property declaration with a keyword value; `start`/`end`
    /// span the whole declaration including the semicolon.
    fn on_property_keyword(&mut self, _name: &str, _value: &[u8], _start: u64, _end: u64) {}

    /// A `url(...)` value was found.
    fn on_url(&mut self, _url: &CssValue<'_>) {}

    /// An `@import "..."` was found.
    fn on_import(&mut self, _url: &CssValue<'_>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    Block,
    ClassName,
    XmlId,
    DiscardQuoted,
    Property,
    PostProperty,
    PreValue,
    Value,
    PreUrl,
    Url,
    /// An '@' was found; feeding characters into `name_buffer`.
    At,
    PreImport,
    Import,
}

struct Buffer<const N: usize> {
    data: [u8; N],
    len: usize,
}

impl<const N: usize> Buffer<N> {
    fn new() -> Self {
        Buffer {
            data: [0; N],
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, ch: u8) {
        if self.len < N - 1 {
            self.data[self.len] = ch;
            self.len += 1;
        }
    }

    fn append_truncated(&mut self, src: &[u8]) {
        let n = src.len().min(N - self.len);
        self.data[self.len..self.len + n].copy_from_slice(&src[..n]);
        self.len += n;
    }

    fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

pub struct CssParser {
    /// True when the input consists of a single block (an inline
    /// `style` attribute).
    block: bool,

    position: u64,
    state: State,

    quote: u8,

    name_start: u64,
    name_buffer: Buffer<NAME_BUFFER_SIZE>,

    value_buffer: Buffer<NAME_BUFFER_SIZE>,

    url_start: u64,
    url_buffer: Buffer<URL_BUFFER_SIZE>,
}

fn at_url_start(value: &[u8]) -> bool {
    value.len() >= 4
        && &value[value.len() - 4..] == b"url("
        && (value.len() == 4 || is_whitespace_or_null(value[value.len() - 5]))
}

impl CssParser {
    pub fn new(block: bool) -> CssParser {
        CssParser {
            block,
            position: 0,
            state: if block { State::Block } else { State::None },
            quote: 0,
            name_start: 0,
            name_buffer: Buffer::new(),
            value_buffer: Buffer::new(),
            url_start: 0,
            url_buffer: Buffer::new(),
        }
    }

    /// Feed bytes into the tokenizer; consumes everything.
    pub fn feed(&mut self, data: &[u8], handler: &mut dyn CssParserHandler) -> usize {
        debug_assert!(!data.is_empty());

        let end = data.len();
        let mut i = 0usize;

        while i < end {
            match self.state {
                State::None => {
                    while i < end && self.state == State::None {
                        match data[i] {
                            b'{' => {
                                /* start of block */
                                self.state = State::Block;
                                handler.on_block();
                            }
                            b'.' => {
                                self.state = State::ClassName;
                                self.name_start = self.position + i as u64 + 1;
                                self.name_buffer.clear();
                            }
                            b'#' => {
                                self.state = State::XmlId;
                                self.name_start = self.position + i as u64 + 1;
                                self.name_buffer.clear();
                            }
                            b'@' => {
                                self.state = State::At;
                                self.name_buffer.clear();
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                }

                State::ClassName => {
                    while i < end {
                        let ch = data[i];
                        if !is_css_nmchar(ch) {
                            if !self.name_buffer.is_empty() {
                                let name = CssValue {
                                    start: self.name_start,
                                    end: self.position + i as u64,
                                    value: self.name_buffer.as_slice(),
                                };
                                handler.on_class_name(&name);
                            }

                            self.state = State::None;
                            break;
                        }

                        self.name_buffer.push(ch);
                        i += 1;
                    }
                }

                State::XmlId => {
                    while i < end {
                        let ch = data[i];
                        if !is_css_nmchar(ch) {
                            if !self.name_buffer.is_empty() {
                                let name = CssValue {
                                    start: self.name_start,
                                    end: self.position + i as u64,
                                    value: self.name_buffer.as_slice(),
                                };
                                handler.on_xml_id(&name);
                            }

                            self.state = State::None;
                            break;
                        }

                        self.name_buffer.push(ch);
                        i += 1;
                    }
                }

                State::Block => {
                    while i < end && self.state == State::Block {
                        match data[i] {
                            b'}' => {
                                /* end of block */
                                if !self.block {
                                    self.state = State::None;
                                }
                            }
                            b':' => {
                                /* colon introduces the property
                                   value */
                                self.state = State::PreValue;
                                self.name_buffer.clear();
                            }
                            b'\'' | b'"' => {
                                self.state = State::DiscardQuoted;
                                self.quote = data[i];
                            }
                            ch => {
                                if is_css_ident_start(ch) {
                                    self.state = State::Property;
                                    self.name_start = self.position + i as u64;
                                    self.name_buffer.clear();
                                    self.name_buffer.push(ch);
                                }
                            }
                        }
                        i += 1;
                    }
                }

                State::DiscardQuoted => {
                    let quote = self.quote;
                    match data[i..].iter().position(|&ch| ch == quote) {
                        None => {
                            self.position += end as u64;
                            return end;
                        }
                        Some(rel) => {
                            self.state = State::Block;
                            i += rel + 1;
                        }
                    }
                }

                State::Property => {
                    while i < end {
                        let ch = data[i];
                        if !is_css_ident_char(ch) {
                            self.state = State::PostProperty;
                            break;
                        }

                        self.name_buffer.push(ch);
                        i += 1;
                    }
                }

                State::PostProperty => {
                    while i < end && self.state == State::PostProperty {
                        match data[i] {
                            b'}' => {
                                /* end of block */
                                if !self.block {
                                    self.state = State::None;
                                }
                            }
                            b':' => {
                                self.state = State::PreValue;
                            }
                            b'\'' | b'"' => {
                                self.state = State::DiscardQuoted;
                                self.quote = data[i];
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                }

                State::PreValue => {
                    while i < end && is_whitespace_or_null(data[i]) {
                        i += 1;
                    }
                    if i < end {
                        match data[i] {
                            b'}' => {
                                if !self.block {
                                    self.state = State::None;
                                }
                                i += 1;
                            }
                            b';' => {
                                self.state = State::Block;
                                i += 1;
                            }
                            _ => {
                                self.state = State::Value;
                                self.value_buffer.clear();
                            }
                        }
                    }
                }

                State::Value => {
                    while i < end && self.state == State::Value {
                        match data[i] {
                            b'}' => {
                                if !self.block {
                                    self.state = State::None;
                                }
                            }
                            b';' => {
                                if !self.name_buffer.is_empty() {
                                    let name = String::from_utf8_lossy(
                                        self.name_buffer.as_slice(),
                                    )
                                    .into_owned();

                                    handler.on_property_keyword(
                                        &name,
                                        self.value_buffer.as_slice(),
                                        self.name_start,
                                        self.position + i as u64 + 1,
                                    );
                                }

                                self.state = State::Block;
                            }
                            b'\'' | b'"' => {
                                self.state = State::DiscardQuoted;
                                self.quote = data[i];
                            }
                            ch => {
                                self.value_buffer.push(ch);
                                if at_url_start(self.value_buffer.as_slice()) {
                                    self.state = State::PreUrl;
                                }
                            }
                        }
                        i += 1;
                    }
                }

                State::PreUrl => {
                    while i < end && is_whitespace_or_null(data[i]) {
                        i += 1;
                    }
                    if i < end {
                        match data[i] {
                            b'}' => {
                                if !self.block {
                                    self.state = State::None;
                                }
                                i += 1;
                            }
                            b'\'' | b'"' => {
                                self.state = State::Url;
                                self.quote = data[i];
                                i += 1;
                                self.url_start = self.position + i as u64;
                                self.url_buffer.clear();
                            }
                            _ => {
                                self.state = State::Block;
                            }
                        }
                    }
                }

                State::Url => {
                    let quote = self.quote;
                    match data[i..].iter().position(|&ch| ch == quote) {
                        None => {
                            self.url_buffer.append_truncated(&data[i..]);
                            self.position += end as u64;
                            return end;
                        }
                        Some(rel) => {
                            /* found the end of the URL */
                            self.url_buffer.append_truncated(&data[i..i + rel]);

                            let url_end = self.position + (i + rel) as u64;
                            i += rel + 1;
                            self.state = State::Block;

                            let url = CssValue {
                                start: self.url_start,
                                end: url_end,
                                value: self.url_buffer.as_slice(),
                            };
                            handler.on_url(&url);
                        }
                    }
                }

                State::At => {
                    while i < end {
                        let ch = data[i];
                        if !is_css_nmchar(ch) {
                            if self.name_buffer.as_slice() == b"import" {
                                self.state = State::PreImport;
                            } else {
                                self.state = State::None;
                            }
                            break;
                        }

                        self.name_buffer.push(ch);
                        i += 1;
                    }
                }

                State::PreImport => {
                    while i < end {
                        let ch = data[i];
                        if !is_whitespace_or_null(ch) {
                            if ch == b'"' {
                                i += 1;
                                self.state = State::Import;
                                self.url_start = self.position + i as u64;
                                self.url_buffer.clear();
                            } else {
                                self.state = State::None;
                            }
                            break;
                        }

                        i += 1;
                    }
                }

                State::Import => {
                    match data[i..].iter().position(|&ch| ch == b'"') {
                        None => {
                            self.url_buffer.append_truncated(&data[i..]);
                            self.position += end as u64;
                            return end;
                        }
                        Some(rel) => {
                            self.url_buffer.append_truncated(&data[i..i + rel]);

                            let url_end = self.position + (i + rel) as u64;
                            i += rel + 1;
                            self.state = State::None;

                            let url = CssValue {
                                start: self.url_start,
                                end: url_end,
                                value: self.url_buffer.as_slice(),
                            };
                            handler.on_import(&url);
                        }
                    }
                }
            }
        }

        self.position += data.len() as u64;
        data.len()
    }
}
