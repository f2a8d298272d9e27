/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A character-at-a-time HTML/XML tokenizer.  It is forgiving the
//! way browsers are: overlong names degrade to "boring" tags, sloppy
//! attribute syntax is tolerated, and inside `<script>` only `</`
//! ends the element content.

use stream::ExpansibleBuffer;

use crate::syntax::{is_html_name_char, is_html_name_start_char, is_whitespace_or_null};

const NAME_BUFFER_SIZE: usize = 64;
const ATTR_VALUE_INITIAL: usize = 512;
const ATTR_VALUE_LIMIT: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlTagType {
    Open,
    Close,
    Short,
    /// XML processing instruction.
    Pi,
}

pub struct XmlParserTag<'a> {
    pub start: u64,
    pub end: u64,
    pub name: &'a str,
    pub tag_type: XmlTagType,
}

pub struct XmlParserAttribute<'a> {
    pub name_start: u64,
    pub value_start: u64,
    pub value_end: u64,
    pub end: u64,
    pub name: &'a str,
    pub value: &'a [u8],
}

pub trait XmlParserHandler {
    /// A tag has started, and its name is known.  Returning false
    /// skips attribute parsing for this tag (no
    /// `on_tag_finished()` either).
    fn on_tag_start(&mut self, tag: &XmlParserTag<'_>) -> bool;

    /// Returning false stops the parser.
    fn on_tag_finished(&mut self, tag: &XmlParserTag<'_>) -> bool;

    /// Consulted right after a finished tag: should the parser treat
    /// the following content as SCRIPT (only `</` ends it)?
    fn enter_script_after_tag(&mut self) -> bool {
        false
    }

    fn on_attribute_finished(&mut self, attr: &XmlParserAttribute<'_>);

    /// Character data between tags.  May consume fewer bytes than
    /// offered to exert back-pressure.
    fn on_cdata(&mut self, text: &[u8], escaped: bool, start: u64) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    None,
    /// Within a SCRIPT element; only "</" breaks out.
    Script,
    /// Found '<' within a SCRIPT element.
    ScriptElementName,
    ElementName,
    ElementTag,
    /// Inside the element tag, ignoring attributes.
    ElementBoring,
    AttrName,
    AfterAttrName,
    BeforeAttrValue,
    AttrValue,
    /// Compatibility with broken HTML: unquoted attribute value.
    AttrValueCompat,
    /// Found a slash, waiting for the '>'.
    Short,
    Inside,
    /// Parsing a declaration name beginning with "<!".
    DeclarationName,
    CdataSection,
    Comment,
}

pub struct XmlParser {
    position: u64,
    state: State,
    stopped: bool,

    /* element */
    tag_start: u64,
    tag_end: u64,
    tag_type: XmlTagType,
    tag_name: [u8; NAME_BUFFER_SIZE],
    tag_name_length: usize,

    /* attribute */
    attr_name: [u8; NAME_BUFFER_SIZE],
    attr_name_length: usize,
    attr_name_start: u64,
    attr_value_start: u64,
    attr_value_delimiter: u8,
    attr_value: ExpansibleBuffer,

    /// In a CDATA section, how many characters of "]]>" have
    /// matched?
    cdend_match: usize,

    /// In a comment, how many consecutive minus characters?
    minus_count: usize,
}

impl Default for XmlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlParser {
    pub fn new() -> XmlParser {
        XmlParser {
            position: 0,
            state: State::None,
            stopped: false,
            tag_start: 0,
            tag_end: 0,
            tag_type: XmlTagType::Open,
            tag_name: [0; NAME_BUFFER_SIZE],
            tag_name_length: 0,
            attr_name: [0; NAME_BUFFER_SIZE],
            attr_name_length: 0,
            attr_name_start: 0,
            attr_value_start: 0,
            attr_value_delimiter: 0,
            attr_value: ExpansibleBuffer::new(ATTR_VALUE_INITIAL, ATTR_VALUE_LIMIT),
            cdend_match: 0,
            minus_count: 0,
        }
    }

    /// Switch into SCRIPT content mode; only `</` will end it.
    pub fn script(&mut self) {
        debug_assert!(self.state == State::None || self.state == State::Inside);
        self.state = State::Script;
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn invoke_attribute_finished(&mut self, handler: &mut dyn XmlParserHandler, end: u64) {
        let name =
            std::str::from_utf8(&self.attr_name[..self.attr_name_length]).unwrap_or("");
        let attr = XmlParserAttribute {
            name_start: self.attr_name_start,
            value_start: self.attr_value_start,
            value_end: if end > self.attr_value_start && self.attr_value_delimiter != 0 {
                end - 1
            } else {
                end
            },
            end,
            name,
            value: self.attr_value.as_slice(),
        };
        handler.on_attribute_finished(&attr);
    }

    /// Feed bytes into the tokenizer; returns the number consumed (a
    /// short count when a cdata consumer pushed back, or when the
    /// handler stopped the parser).
    pub fn feed(&mut self, data: &[u8], handler: &mut dyn XmlParserHandler) -> usize {
        debug_assert!(!data.is_empty());

        if self.stopped {
            return data.len();
        }

        let end = data.len();
        let mut i = 0usize;

        while i < end {
            match self.state {
                State::None | State::Script => {
                    /* find the next tag opener */
                    match data[i..].iter().position(|&ch| ch == b'<') {
                        None => {
                            let nbytes =
                                handler.on_cdata(&data[i..], true, self.position + i as u64);
                            debug_assert!(nbytes <= end - i);

                            let consumed = i + nbytes;
                            self.position += consumed as u64;
                            return consumed;
                        }
                        Some(rel) => {
                            if rel > 0 {
                                let nbytes = handler.on_cdata(
                                    &data[i..i + rel],
                                    true,
                                    self.position + i as u64,
                                );
                                debug_assert!(nbytes <= rel);

                                if nbytes < rel {
                                    let consumed = i + nbytes;
                                    self.position += consumed as u64;
                                    return consumed;
                                }
                            }

                            let p = i + rel;
                            self.tag_start = self.position + p as u64;
                            self.state = if self.state == State::None {
                                State::ElementName
                            } else {
                                State::ScriptElementName
                            };
                            self.tag_name_length = 0;
                            self.tag_type = XmlTagType::Open;
                            i = p + 1;
                        }
                    }
                }

                State::ScriptElementName => {
                    if data[i] == b'/' {
                        self.state = State::ElementName;
                        self.tag_type = XmlTagType::Close;
                        i += 1;
                    } else {
                        /* it wasn't a closing tag: replay the '<' as
                           cdata and go back to script content */
                        let nbytes = handler.on_cdata(b"<", true, self.position + i as u64);

                        if nbytes == 0 {
                            self.position += i as u64;
                            return i;
                        }

                        self.state = State::Script;
                    }
                }

                State::ElementName => {
                    while i < end {
                        let ch = data[i];
                        if is_html_name_char(ch) {
                            if self.tag_name_length == NAME_BUFFER_SIZE {
                                /* name buffer overflowing */
                                self.state = State::None;
                                break;
                            }

                            self.tag_name[self.tag_name_length] = ch.to_ascii_lowercase();
                            self.tag_name_length += 1;
                            i += 1;
                        } else if ch == b'/' && self.tag_name_length == 0 {
                            self.tag_type = XmlTagType::Close;
                            i += 1;
                        } else if ch == b'?' && self.tag_name_length == 0 {
                            /* start of a processing instruction */
                            self.tag_type = XmlTagType::Pi;
                            i += 1;
                        } else if (is_whitespace_or_null(ch) || ch == b'/' || ch == b'?'
                            || ch == b'>')
                            && self.tag_name_length > 0
                        {
                            let tag = XmlParserTag {
                                start: self.tag_start,
                                end: 0,
                                name: std::str::from_utf8(
                                    &self.tag_name[..self.tag_name_length],
                                )
                                .unwrap_or(""),
                                tag_type: self.tag_type,
                            };
                            let interesting = handler.on_tag_start(&tag);

                            self.state = if interesting {
                                State::ElementTag
                            } else {
                                State::ElementBoring
                            };
                            break;
                        } else if ch == b'!' && self.tag_name_length == 0 {
                            self.state = State::DeclarationName;
                            i += 1;
                            break;
                        } else {
                            self.state = State::None;
                            break;
                        }
                    }
                }

                State::ElementTag => {
                    let mut leave = false;
                    while i < end && !leave {
                        let ch = data[i];
                        if is_whitespace_or_null(ch) {
                            i += 1;
                        } else if ch == b'/' && self.tag_type == XmlTagType::Open {
                            self.tag_type = XmlTagType::Short;
                            self.state = State::Short;
                            i += 1;
                            leave = true;
                        } else if ch == b'?' && self.tag_type == XmlTagType::Pi {
                            self.state = State::Short;
                            i += 1;
                            leave = true;
                        } else if ch == b'>' {
                            self.state = State::Inside;
                            i += 1;
                            self.tag_end = self.position + i as u64;

                            if !self.invoke_tag_finished(handler) {
                                return i;
                            }
                            leave = true;
                        } else if is_html_name_start_char(ch) {
                            self.state = State::AttrName;
                            self.attr_name_start = self.position + i as u64;
                            self.attr_name_length = 0;
                            self.attr_value.clear();
                            self.attr_value_delimiter = 0;
                            leave = true;
                        } else {
                            /* tolerate the syntax error and close the
                               element tag here */
                            self.tag_end = self.position + i as u64;
                            self.state = State::Inside;

                            if !self.invoke_tag_finished(handler) {
                                return i;
                            }

                            self.state = State::None;
                            leave = true;
                        }
                    }
                }

                State::ElementBoring => {
                    /* ignore this tag */
                    match data[i..].iter().position(|&ch| ch == b'>') {
                        Some(rel) => {
                            i += rel + 1;
                            self.state = State::None;
                        }
                        None => i = end,
                    }
                }

                State::AttrName => {
                    while i < end {
                        let ch = data[i];
                        if is_html_name_char(ch) {
                            if self.attr_name_length == NAME_BUFFER_SIZE {
                                /* name buffer overflowing */
                                self.state = State::ElementTag;
                                break;
                            }

                            self.attr_name[self.attr_name_length] = ch.to_ascii_lowercase();
                            self.attr_name_length += 1;
                            i += 1;
                        } else {
                            self.state = State::AfterAttrName;
                            break;
                        }
                    }
                }

                State::AfterAttrName => {
                    let mut leave = false;
                    while i < end && !leave {
                        let ch = data[i];
                        if ch == b'=' {
                            self.state = State::BeforeAttrValue;
                            i += 1;
                            leave = true;
                        } else if is_whitespace_or_null(ch) {
                            i += 1;
                        } else {
                            /* no value; the current position is the
                               best start/end offset we have */
                            self.attr_value_start = self.position + i as u64;
                            let end_offset = self.position + i as u64;

                            self.invoke_attribute_finished(handler, end_offset);
                            self.state = State::ElementTag;
                            leave = true;
                        }
                    }
                }

                State::BeforeAttrValue => {
                    let mut leave = false;
                    while i < end && !leave {
                        let ch = data[i];
                        if ch == b'"' || ch == b'\'' {
                            self.state = State::AttrValue;
                            self.attr_value_delimiter = ch;
                            i += 1;
                            self.attr_value_start = self.position + i as u64;
                            leave = true;
                        } else if is_whitespace_or_null(ch) {
                            i += 1;
                        } else {
                            self.state = State::AttrValueCompat;
                            self.attr_value_delimiter = 0;
                            self.attr_value_start = self.position + i as u64;
                            leave = true;
                        }
                    }
                }

                State::AttrValue => {
                    let delimiter = self.attr_value_delimiter;
                    match data[i..].iter().position(|&ch| ch == delimiter) {
                        None => {
                            if !self.attr_value.write(&data[i..]) {
                                self.state = State::ElementTag;
                            } else {
                                i = end;
                            }
                        }
                        Some(rel) => {
                            if !self.attr_value.write(&data[i..i + rel]) {
                                self.state = State::ElementTag;
                            } else {
                                i += rel + 1;
                                let end_offset = self.position + i as u64;
                                self.invoke_attribute_finished(handler, end_offset);
                                self.state = State::ElementTag;
                            }
                        }
                    }
                }

                State::AttrValueCompat => {
                    let mut leave = false;
                    while i < end && !leave {
                        let ch = data[i];
                        if !is_whitespace_or_null(ch) && ch != b'>' {
                            if !self.attr_value.write(&data[i..i + 1]) {
                                self.state = State::ElementTag;
                                leave = true;
                            } else {
                                i += 1;
                            }
                        } else {
                            let end_offset = self.position + i as u64;
                            self.invoke_attribute_finished(handler, end_offset);
                            self.state = State::ElementTag;
                            leave = true;
                        }
                    }
                }

                State::Short => {
                    let mut leave = false;
                    while i < end && !leave {
                        let ch = data[i];
                        if is_whitespace_or_null(ch) {
                            i += 1;
                        } else if ch == b'>' {
                            self.state = State::None;
                            i += 1;
                            self.tag_end = self.position + i as u64;

                            if !self.invoke_tag_finished(handler) {
                                return i;
                            }
                            leave = true;
                        } else {
                            /* tolerate the syntax error and close the
                               element tag here */
                            self.tag_end = self.position + i as u64;
                            self.state = State::Inside;

                            if !self.invoke_tag_finished(handler) {
                                return i;
                            }

                            self.state = State::None;
                            leave = true;
                        }
                    }
                }

                State::Inside => {
                    self.state = State::None;
                }

                State::DeclarationName => {
                    while i < end {
                        let ch = data[i];
                        if ch.is_ascii_alphanumeric()
                            || ch == b':'
                            || ch == b'-'
                            || ch == b'_'
                            || ch == b'['
                        {
                            if self.tag_name_length == NAME_BUFFER_SIZE {
                                /* name buffer overflowing */
                                self.state = State::None;
                                break;
                            }

                            self.tag_name[self.tag_name_length] = ch.to_ascii_lowercase();
                            self.tag_name_length += 1;
                            i += 1;

                            if self.tag_name_length == 7
                                && &self.tag_name[..7] == b"[cdata["
                            {
                                self.state = State::CdataSection;
                                self.cdend_match = 0;
                                break;
                            }

                            if self.tag_name_length == 2 && &self.tag_name[..2] == b"--" {
                                self.state = State::Comment;
                                self.minus_count = 0;
                                break;
                            }
                        } else {
                            self.state = State::None;
                            break;
                        }
                    }
                }

                State::CdataSection => {
                    let mut p = i;
                    let mut leave = false;
                    while i < end && !leave {
                        let ch = data[i];
                        if ch == b']' && self.cdend_match < 2 {
                            if i > p {
                                /* flush the bytes before the
                                   bracket */
                                let cdata_start = self.position + p as u64;
                                let nbytes =
                                    handler.on_cdata(&data[p..i], false, cdata_start);
                                debug_assert!(nbytes <= i - p);

                                if nbytes < i - p {
                                    let consumed = p + nbytes;
                                    self.position += consumed as u64;
                                    return consumed;
                                }
                            }

                            i += 1;
                            p = i;
                            self.cdend_match += 1;
                        } else if ch == b'>' && self.cdend_match == 2 {
                            i += 1;
                            p = i;
                            self.state = State::None;
                            leave = true;
                        } else {
                            if self.cdend_match > 0 {
                                /* we had a partial "]]>" match; replay
                                   the brackets we already skipped */
                                debug_assert!(self.cdend_match < 3);

                                let nbytes = handler.on_cdata(
                                    &b"]]"[..self.cdend_match],
                                    false,
                                    self.position + i as u64,
                                );
                                debug_assert!(nbytes <= self.cdend_match);

                                self.cdend_match -= nbytes;

                                if self.cdend_match > 0 {
                                    self.position += i as u64;
                                    return i;
                                }

                                p = i;
                            }

                            i += 1;
                        }
                    }

                    if i > p {
                        let cdata_start = self.position + p as u64;
                        let nbytes = handler.on_cdata(&data[p..i], false, cdata_start);
                        debug_assert!(nbytes <= i - p);

                        if nbytes < i - p {
                            let consumed = p + nbytes;
                            self.position += consumed as u64;
                            return consumed;
                        }
                    }
                }

                State::Comment => match self.minus_count {
                    0 => {
                        /* find a minus which could introduce "-->" */
                        match data[i..].iter().position(|&ch| ch == b'-') {
                            Some(rel) => {
                                i += rel + 1;
                                self.minus_count = 1;
                            }
                            None => i = end,
                        }
                    }
                    1 => {
                        if data[i] == b'-' {
                            self.minus_count = 2;
                        } else {
                            self.minus_count = 0;
                        }
                        i += 1;
                    }
                    2 => {
                        if data[i] == b'>' {
                            /* end of comment */
                            self.state = State::None;
                            i += 1;
                        } else if data[i] == b'-' {
                            /* yet another minus: stay at 2 */
                            i += 1;
                        } else {
                            self.minus_count = 0;
                        }
                    }
                    _ => unreachable!(),
                },
            }
        }

        self.position += data.len() as u64;
        data.len()
    }

    fn invoke_tag_finished(&mut self, handler: &mut dyn XmlParserHandler) -> bool {
        let tag = XmlParserTag {
            start: self.tag_start,
            end: self.tag_end,
            name: std::str::from_utf8(&self.tag_name[..self.tag_name_length]).unwrap_or(""),
            tag_type: self.tag_type,
        };
        if !handler.on_tag_finished(&tag) {
            self.stopped = true;
            return false;
        }

        if handler.enter_script_after_tag()
            && (self.state == State::None || self.state == State::Inside)
        {
            self.state = State::Script;
        }

        true
    }
}
