/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The text processor pre-pass: expands `&c:*;` entities from widget
//! and request state before the XML processor sees the document.
//! Unknown entities pass through untouched.

use std::rc::Rc;

use stream::error::StreamError;
use stream::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};
use widget::args::uri_escape;
use widget::{WidgetContext, WidgetRef};

/// Longest recognized entity, including `&` and `;`.
const ENTITY_MAX: usize = 16;

fn expand_entity(name: &str, widget: &WidgetRef, ctx: &WidgetContext) -> Option<String> {
    let w = widget.borrow();
    match name {
        "type" => Some(w.class_name.clone().unwrap_or_default()),
        "class" => Some(w.quoted_class_name.clone().unwrap_or_default()),
        "id" => Some(w.id.clone().unwrap_or_default()),
        "path" => Some(w.id_path.clone().unwrap_or_default()),
        "prefix" => Some(w.prefix.clone().unwrap_or_default()),
        "uri" => Some(uri_escape(ctx.absolute_uri.as_deref().unwrap_or(""))),
        "base" => Some(uri_escape(&ctx.external_base_uri)),
        "frame" => Some(uri_escape(ctx.args_get("frame").unwrap_or(""))),
        "view" => Some(
            w.get_effective_view()
                .and_then(|v| v.name.clone())
                .unwrap_or_default(),
        ),
        "session" => Some(ctx.session_id.format()),
        _ => None,
    }
}

/// Wrap `input` in the entity-expansion filter.
pub fn text_processor(
    input: BoxIstream,
    widget: &WidgetRef,
    ctx: &Rc<WidgetContext>,
) -> BoxIstream {
    Box::new(TextIstream {
        input: Some(input),
        widget: Rc::clone(widget),
        ctx: Rc::clone(ctx),
        pending: Vec::new(),
        pending_pos: 0,
        partial: Vec::new(),
        input_eof: false,
    })
}

struct TextIstream {
    input: Option<BoxIstream>,
    widget: WidgetRef,
    ctx: Rc<WidgetContext>,

    /// Expanded output waiting for the consumer.
    pending: Vec<u8>,
    pending_pos: usize,

    /// A potential entity crossing the chunk boundary.
    partial: Vec<u8>,

    input_eof: bool,
}

impl TextIstream {
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

    /// Transform `data`, appending output to `pending` and keeping a
    /// trailing partial entity in `partial`.
    fn transform(&mut self, data: &[u8]) {
        if self.partial.is_empty() {
            self.transform_inner(data);
        } else {
            let mut work = std::mem::take(&mut self.partial);
            work.extend_from_slice(data);
            self.transform_inner(&work);
        }
    }

    fn transform_inner(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            let Some(rel) = data[i..].iter().position(|&ch| ch == b'&') else {
                self.pending.extend_from_slice(&data[i..]);
                return;
            };

            self.pending.extend_from_slice(&data[i..i + rel]);
            let amp = i + rel;

            /* find the ';' within the entity length bound */
            let rest = &data[amp..];
            let limit = rest.len().min(ENTITY_MAX);
            match rest[..limit].iter().position(|&ch| ch == b';') {
                Some(semi) => {
                    let entity = &rest[..semi + 1];
                    let expanded = entity
                        .strip_prefix(b"&c:")
                        .and_then(|e| e.strip_suffix(b";"))
                        .and_then(|name| std::str::from_utf8(name).ok())
                        .and_then(|name| expand_entity(name, &self.widget, &self.ctx));

                    match expanded {
                        Some(value) => self.pending.extend_from_slice(value.as_bytes()),
                        None => self.pending.extend_from_slice(entity),
                    }
                    i = amp + semi + 1;
                }
                None => {
                    if rest.len() < ENTITY_MAX && !self.input_eof {
                        /* maybe the entity continues in the next
                           chunk */
                        self.partial.extend_from_slice(rest);
                    } else {
                        /* no entity here */
                        self.pending.extend_from_slice(rest);
                    }
                    return;
                }
            }
        }
    }

    fn finish_partial(&mut self) {
        if !self.partial.is_empty() {
            let partial = std::mem::take(&mut self.partial);
            self.pending.extend_from_slice(&partial);
        }
    }
}

struct TextAdapter<'a> {
    this: &'a mut TextIstream,
    error: &'a mut Option<StreamError>,
}

impl IstreamHandler for TextAdapter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.this.transform(data);
        data.len()
    }

    fn on_eof(&mut self) {
        self.this.input_eof = true;
    }

    fn on_error(&mut self, error: StreamError) {
        *self.error = Some(error);
    }
}

impl Istream for TextIstream {
    fn available(&self, partial: bool) -> Available {
        if partial {
            Available::Exact((self.pending.len() - self.pending_pos) as u64)
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

        if self.input_eof && self.input.is_none() {
            handler.on_eof();
            return ReadResult::Eof;
        }

        let mut error = None;
        let result = {
            let Some(mut input) = self.input.take() else {
                handler.on_eof();
                return ReadResult::Eof;
            };
            let r = {
                let mut adapter = TextAdapter {
                    this: self,
                    error: &mut error,
                };
                input.read(&mut adapter)
            };
            if r != ReadResult::Eof && r != ReadResult::Error {
                self.input = Some(input);
            }
            r
        };

        match result {
            ReadResult::Error => {
                handler.on_error(error.expect("error result without error"));
                ReadResult::Error
            }
            ReadResult::Eof => {
                self.input_eof = true;
                self.finish_partial();
                if self.flush(handler, &mut progressed) {
                    handler.on_eof();
                    ReadResult::Eof
                } else {
                    ReadResult::Progress
                }
            }
            ReadResult::Progress | ReadResult::Blocked => {
                self.flush(handler, &mut progressed);
                if progressed {
                    ReadResult::Progress
                } else {
                    ReadResult::Blocked
                }
            }
        }
    }
}
