/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Escaping rules for values spliced into markup: HTML attribute /
//! text escaping and CSS string escaping, plus an istream filter
//! applying them on the fly.

use std::borrow::Cow;

use stream::error::StreamError;
use stream::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeClass {
    Html,
    Css,
}

impl EscapeClass {
    fn escape_char(self, ch: u8) -> Option<&'static [u8]> {
        match self {
            EscapeClass::Html => match ch {
                b'&' => Some(b"&amp;"),
                b'<' => Some(b"&lt;"),
                b'>' => Some(b"&gt;"),
                b'"' => Some(b"&quot;"),
                b'\'' => Some(b"&apos;"),
                _ => None,
            },
            EscapeClass::Css => match ch {
                b'\\' => Some(b"\\\\"),
                b'"' => Some(b"\\\""),
                b'\'' => Some(b"\\'"),
                _ => None,
            },
        }
    }

    /// Does `s` contain any character that must be escaped?
    pub fn escape_find(self, s: &[u8]) -> bool {
        s.iter().any(|&ch| self.escape_char(ch).is_some())
    }

    pub fn escape<'a>(self, s: &'a [u8]) -> Cow<'a, [u8]> {
        if !self.escape_find(s) {
            return Cow::Borrowed(s);
        }

        let mut out = Vec::with_capacity(s.len() + 16);
        for &ch in s {
            match self.escape_char(ch) {
                Some(escaped) => out.extend_from_slice(escaped),
                None => out.push(ch),
            }
        }
        Cow::Owned(out)
    }

    pub fn escape_str(self, s: &str) -> String {
        String::from_utf8_lossy(&self.escape(s.as_bytes())).into_owned()
    }

    /// Does `s` contain an escape sequence?
    pub fn unescape_find(self, s: &[u8]) -> bool {
        match self {
            EscapeClass::Html => s.contains(&b'&'),
            EscapeClass::Css => s.contains(&b'\\'),
        }
    }

    pub fn unescape<'a>(self, s: &'a [u8]) -> Cow<'a, [u8]> {
        if !self.unescape_find(s) {
            return Cow::Borrowed(s);
        }

        match self {
            EscapeClass::Html => {
                let mut out = Vec::with_capacity(s.len());
                let mut i = 0;
                while i < s.len() {
                    if s[i] == b'&' {
                        let rest = &s[i..];
                        let entity: &[(&[u8], u8)] = &[
                            (b"&amp;", b'&'),
                            (b"&lt;", b'<'),
                            (b"&gt;", b'>'),
                            (b"&quot;", b'"'),
                            (b"&apos;", b'\''),
                        ];
                        match entity.iter().find(|(e, _)| rest.starts_with(e)) {
                            Some((e, ch)) => {
                                out.push(*ch);
                                i += e.len();
                            }
                            None => {
                                out.push(b'&');
                                i += 1;
                            }
                        }
                    } else {
                        out.push(s[i]);
                        i += 1;
                    }
                }
                Cow::Owned(out)
            }
            EscapeClass::Css => {
                let mut out = Vec::with_capacity(s.len());
                let mut i = 0;
                while i < s.len() {
                    if s[i] == b'\\' && i + 1 < s.len() {
                        out.push(s[i + 1]);
                        i += 2;
                    } else {
                        out.push(s[i]);
                        i += 1;
                    }
                }
                Cow::Owned(out)
            }
        }
    }

    pub fn unescape_str(self, s: &str) -> String {
        String::from_utf8_lossy(&self.unescape(s.as_bytes())).into_owned()
    }
}

/// Applies an [`EscapeClass`] to everything flowing through.
pub struct EscapeIstream {
    input: Option<BoxIstream>,
    class: EscapeClass,

    pending: Vec<u8>,
    pending_pos: usize,

    input_eof: bool,
}

impl EscapeIstream {
    pub fn new(input: BoxIstream, class: EscapeClass) -> EscapeIstream {
        EscapeIstream {
            input: Some(input),
            class,
            pending: Vec::new(),
            pending_pos: 0,
            input_eof: false,
        }
    }

    fn flush(&mut self, handler: &mut dyn IstreamHandler, progressed: &mut bool) -> bool {
        while self.pending_pos < self.pending.len() {
            let n = handler.on_data(&self.pending[self.pending_pos..]);
            if n == 0 {
                return false;
            }
            self.pending_pos += n;
            *progressed = true;
        }
        self.pending.clear();
        self.pending_pos = 0;
        true
    }
}

struct EscapeAdapter<'a> {
    class: EscapeClass,
    pending: &'a mut Vec<u8>,
    input_eof: &'a mut bool,
    error: &'a mut Option<StreamError>,
}

impl IstreamHandler for EscapeAdapter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        match self.class.escape(data) {
            Cow::Borrowed(_) => self.pending.extend_from_slice(data),
            Cow::Owned(escaped) => self.pending.extend_from_slice(&escaped),
        }
        data.len()
    }

    fn on_eof(&mut self) {
        *self.input_eof = true;
    }

    fn on_error(&mut self, error: StreamError) {
        *self.error = Some(error);
    }
}

impl Istream for EscapeIstream {
    fn available(&self, partial: bool) -> Available {
        if partial {
            match &self.input {
                Some(input) => input.available(true),
                None => Available::Exact((self.pending.len() - self.pending_pos) as u64),
            }
        } else {
            Available::Unknown
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let mut progressed = false;

        if !self.flush(handler, &mut progressed) {
            return if progressed {
                ReadResult::Progress
            } else {
                ReadResult::Blocked
            };
        }

        if self.input_eof {
            handler.on_eof();
            return ReadResult::Eof;
        }

        let mut error = None;
        let result = {
            let Self {
                input,
                class,
                pending,
                input_eof,
                ..
            } = self;
            let mut adapter = EscapeAdapter {
                class: *class,
                pending,
                input_eof,
                error: &mut error,
            };
            input.as_mut().unwrap().read(&mut adapter)
        };

        match result {
            ReadResult::Error => {
                handler.on_error(error.expect("error result without error"));
                ReadResult::Error
            }
            ReadResult::Eof | ReadResult::Progress => {
                if result == ReadResult::Eof {
                    self.input = None;
                }
                if self.flush(handler, &mut progressed) && self.input_eof {
                    handler.on_eof();
                    return ReadResult::Eof;
                }
                if progressed {
                    ReadResult::Progress
                } else {
                    ReadResult::Blocked
                }
            }
            ReadResult::Blocked => {
                if progressed {
                    ReadResult::Progress
                } else {
                    ReadResult::Blocked
                }
            }
        }
    }
}
