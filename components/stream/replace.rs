/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The substitution engine under the template processors: retains the
//! input stream, lets a parser register ordered substitutions
//! `(start, end, replacement)` against absolute input offsets, and
//! emits the rewritten stream incrementally.
//!
//! Plain input bytes are only released up to the "settled" offset the
//! parser has vouched for, so a substitution can still be added for
//! any byte the parser has not finished analyzing.

use std::collections::VecDeque;

use crate::error::StreamError;
use crate::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

/// The parser half of a [`ReplaceIstream`]: receives the raw input
/// and drives the substitution list through [`ReplaceCore`].
pub trait ReplaceParser {
    /// Feed input bytes; returns the number of bytes consumed (the
    /// remainder is re-presented later).
    fn parse(&mut self, core: &mut ReplaceCore, data: &[u8]) -> usize;

    /// The input has ended.  Must call [`ReplaceCore::finish`].
    fn parse_end(&mut self, core: &mut ReplaceCore);
}

struct Substitution {
    start: u64,
    end: u64,
    /// `None` deletes the range.
    stream: Option<BoxIstream>,
}

/// Substitution bookkeeping shared with the parser.
pub struct ReplaceCore {
    /// The retained input.
    buffer: Vec<u8>,

    /// Absolute offset of the next byte to emit.
    position: u64,

    /// Plain bytes below this offset are final and may be emitted.
    settled: u64,

    /// Lower bound for the next substitution's start offset.
    last_start: u64,

    subs: VecDeque<Substitution>,

    finished: bool,
}

impl ReplaceCore {
    fn new() -> ReplaceCore {
        ReplaceCore {
            buffer: Vec::new(),
            position: 0,
            settled: 0,
            last_start: 0,
            subs: VecDeque::new(),
            finished: false,
        }
    }

    /// Total input bytes retained so far.
    pub fn source_length(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Replace the input range `[start, end)` with `stream` (`None`
    /// deletes it).  Starts must be monotonically non-decreasing
    /// within one parse pass.
    pub fn add(&mut self, start: u64, end: u64, stream: Option<BoxIstream>) {
        debug_assert!(start <= end);
        debug_assert!(start >= self.last_start);
        debug_assert!(start >= self.position);

        self.last_start = start;
        if end > self.settled {
            self.settled = end;
        }
        self.subs.push_back(Substitution { start, end, stream });
    }

    /// The parser will not add a substitution below `offset`; plain
    /// bytes up to it may now flow.
    pub fn settle(&mut self, offset: u64) {
        debug_assert!(offset >= self.last_start);

        if offset > self.settled {
            self.settled = offset;
        }
        if offset > self.last_start {
            self.last_start = offset;
        }
    }

    /// Grow the last substitution (identified by its `start`) to
    /// cover input up to `new_end`.  Used while `<style>` CDATA keeps
    /// arriving for an already-registered CSS substitution.
    pub fn extend(&mut self, start: u64, new_end: u64) {
        let last = self
            .subs
            .back_mut()
            .expect("extend without a substitution");
        debug_assert_eq!(last.start, start);
        debug_assert!(new_end >= last.end);

        last.end = new_end;
        if new_end > self.settled {
            self.settled = new_end;
        }
        if new_end > self.last_start {
            self.last_start = new_end;
        }
    }

    /// All input has been analyzed; everything left is final.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    fn emit_plain(
        &mut self,
        limit: u64,
        handler: &mut dyn IstreamHandler,
        progressed: &mut bool,
    ) -> bool {
        while self.position < limit {
            let chunk = &self.buffer[self.position as usize..limit as usize];
            let nbytes = handler.on_data(chunk);
            if nbytes == 0 {
                return false;
            }
            self.position += nbytes as u64;
            *progressed = true;
        }
        true
    }
}

enum EmitResult {
    /// Blocked on the consumer; retrying is futile until it reads
    /// again.
    HandlerBlocked,
    /// Blocked on input or on an unfinished substitution stream.
    NeedInput,
    /// A substitution stream failed.
    Error(StreamError),
    /// Everything has been emitted.
    Finished,
}

/// Swallows the substitution stream's EOF (the replace stream goes
/// on) and captures its error.
struct SubstAdapter<'a> {
    handler: &'a mut dyn IstreamHandler,
    error: &'a mut Option<StreamError>,
}

impl IstreamHandler for SubstAdapter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.handler.on_data(data)
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, error: StreamError) {
        *self.error = Some(error);
    }
}

/// Appends input to the retained buffer and forwards it to the
/// parser.
struct FeedAdapter<'a, P: ReplaceParser> {
    core: &'a mut ReplaceCore,
    parser: &'a mut P,
    error: &'a mut Option<StreamError>,
}

impl<P: ReplaceParser> IstreamHandler for FeedAdapter<'_, P> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.core.buffer.extend_from_slice(data);
        let consumed = self.parser.parse(self.core, data);
        debug_assert!(consumed <= data.len());
        if consumed < data.len() {
            /* unconsumed bytes will be presented again */
            self.core.buffer.truncate(self.core.buffer.len() - (data.len() - consumed));
        }
        consumed
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, error: StreamError) {
        *self.error = Some(error);
    }
}

pub struct ReplaceIstream<P: ReplaceParser> {
    input: Option<BoxIstream>,
    core: ReplaceCore,
    parser: P,
}

impl<P: ReplaceParser> ReplaceIstream<P> {
    pub fn new(input: BoxIstream, parser: P) -> ReplaceIstream<P> {
        ReplaceIstream {
            input: Some(input),
            core: ReplaceCore::new(),
            parser,
        }
    }

    fn emit(&mut self, handler: &mut dyn IstreamHandler, progressed: &mut bool) -> EmitResult {
        loop {
            if let Some(start) = self.core.subs.front().map(|s| s.start) {
                if self.core.position < start {
                    if !self.core.emit_plain(start, handler, progressed) {
                        return EmitResult::HandlerBlocked;
                    }
                }

                let front = self.core.subs.front_mut().unwrap();
                let end = front.end;

                let result = match &mut front.stream {
                    None => ReadResult::Eof,
                    Some(stream) => {
                        let mut error = None;
                        let r = {
                            let mut adapter = SubstAdapter {
                                handler: &mut *handler,
                                error: &mut error,
                            };
                            stream.read(&mut adapter)
                        };
                        if let ReadResult::Error = r {
                            return EmitResult::Error(error.expect("error result without error"));
                        }
                        r
                    }
                };

                match result {
                    ReadResult::Eof => {
                        self.core.position = end;
                        self.core.subs.pop_front();
                    }
                    ReadResult::Progress => {
                        *progressed = true;
                    }
                    ReadResult::Blocked => return EmitResult::NeedInput,
                    ReadResult::Error => unreachable!(),
                }
            } else {
                let limit = if self.core.finished {
                    self.core.source_length()
                } else {
                    self.core.settled
                };

                if self.core.position < limit {
                    if !self.core.emit_plain(limit, handler, progressed) {
                        return EmitResult::HandlerBlocked;
                    }
                }

                if self.core.finished && self.core.position == self.core.source_length() {
                    return EmitResult::Finished;
                }

                return EmitResult::NeedInput;
            }
        }
    }
}

impl<P: ReplaceParser> Istream for ReplaceIstream<P> {
    fn available(&self, partial: bool) -> Available {
        if self.input.is_none() && self.core.subs.is_empty() {
            return Available::Exact(self.core.source_length() - self.core.position);
        }

        if partial {
            /* lower bound: the plain bytes that are already
               emittable */
            let limit = if self.core.finished {
                self.core.source_length()
            } else {
                self.core.settled
            };
            let next_sub = self
                .core
                .subs
                .front()
                .map(|s| s.start)
                .unwrap_or(limit);
            return Available::Exact(next_sub.min(limit).saturating_sub(self.core.position));
        }

        Available::Unknown
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let mut progressed = false;

        loop {
            match self.emit(handler, &mut progressed) {
                EmitResult::HandlerBlocked => {
                    return if progressed {
                        ReadResult::Progress
                    } else {
                        ReadResult::Blocked
                    };
                }
                EmitResult::Error(error) => {
                    handler.on_error(error);
                    return ReadResult::Error;
                }
                EmitResult::Finished => {
                    handler.on_eof();
                    return ReadResult::Eof;
                }
                EmitResult::NeedInput => {
                    if self.input.is_none() {
                        /* a substitution is still waiting for its
                           own producer */
                        return if progressed {
                            ReadResult::Progress
                        } else {
                            ReadResult::Blocked
                        };
                    }

                    let mut error = None;
                    let result = {
                        let Self {
                            input,
                            core,
                            parser,
                        } = self;
                        let mut adapter = FeedAdapter {
                            core,
                            parser,
                            error: &mut error,
                        };
                        input.as_mut().unwrap().read(&mut adapter)
                    };

                    match result {
                        ReadResult::Progress => {}
                        ReadResult::Eof => {
                            self.input = None;
                            self.parser.parse_end(&mut self.core);
                            debug_assert!(self.core.finished);
                        }
                        ReadResult::Blocked => {
                            return if progressed {
                                ReadResult::Progress
                            } else {
                                ReadResult::Blocked
                            };
                        }
                        ReadResult::Error => {
                            handler.on_error(error.expect("error result without error"));
                            return ReadResult::Error;
                        }
                    }
                }
            }
        }
    }
}
