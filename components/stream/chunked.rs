/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! HTTP/1.1 chunked transfer encoding applied to an istream.  Used
//! for request bodies whose length is unknown up front.

use crate::error::StreamError;
use crate::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

pub struct ChunkedIstream {
    input: Option<BoxIstream>,

    /// Literal bytes (chunk header, chunk trailer, final chunk)
    /// waiting to be delivered before more payload may flow.
    pending: Vec<u8>,
    pending_pos: usize,

    /// Payload bytes the current chunk header has announced but which
    /// have not been delivered yet.
    missing_from_current_chunk: usize,

    input_eof: bool,
}

fn queue(pending: &mut Vec<u8>, pending_pos: &mut usize, bytes: &[u8]) {
    if *pending_pos == pending.len() {
        pending.clear();
        *pending_pos = 0;
    }
    pending.extend_from_slice(bytes);
}

fn flush(
    pending: &mut Vec<u8>,
    pending_pos: &mut usize,
    handler: &mut dyn IstreamHandler,
    progressed: &mut bool,
) -> bool {
    while *pending_pos < pending.len() {
        let n = handler.on_data(&pending[*pending_pos..]);
        if n == 0 {
            return false;
        }
        *pending_pos += n;
        *progressed = true;
    }
    true
}

struct ChunkAdapter<'a, 'b> {
    pending: &'a mut Vec<u8>,
    pending_pos: &'a mut usize,
    missing: &'a mut usize,
    input_eof: &'a mut bool,
    handler: &'b mut dyn IstreamHandler,
    progressed: &'b mut bool,
}

impl IstreamHandler for ChunkAdapter<'_, '_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        if *self.missing == 0 {
            /* open a new chunk sized after what the input presented;
               unconsumed bytes are re-presented later and complete
               it */
            let header = format!("{:x}\r\n", data.len());
            queue(self.pending, self.pending_pos, header.as_bytes());
            *self.missing = data.len();
        }

        if !flush(self.pending, self.pending_pos, self.handler, self.progressed) {
            return 0;
        }

        let take = data.len().min(*self.missing);
        let nbytes = self.handler.on_data(&data[..take]);
        if nbytes > 0 {
            *self.progressed = true;
        }
        *self.missing -= nbytes;

        if *self.missing == 0 && nbytes > 0 {
            /* chunk complete */
            queue(self.pending, self.pending_pos, b"\r\n");
            flush(self.pending, self.pending_pos, self.handler, self.progressed);
        }

        nbytes
    }

    fn on_eof(&mut self) {
        debug_assert_eq!(*self.missing, 0);
        *self.input_eof = true;
        queue(self.pending, self.pending_pos, b"0\r\n\r\n");
    }

    fn on_error(&mut self, error: StreamError) {
        self.handler.on_error(error);
    }
}

impl ChunkedIstream {
    pub fn new(input: BoxIstream) -> ChunkedIstream {
        ChunkedIstream {
            input: Some(input),
            pending: Vec::new(),
            pending_pos: 0,
            missing_from_current_chunk: 0,
            input_eof: false,
        }
    }
}

impl Istream for ChunkedIstream {
    fn available(&self, partial: bool) -> Available {
        if !partial {
            /* the encoded length is not predictable */
            return Available::Unknown;
        }

        match self.input.as_ref() {
            Some(input) => input.available(true),
            None => Available::Exact((self.pending.len() - self.pending_pos) as u64),
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let mut progressed = false;

        if !flush(
            &mut self.pending,
            &mut self.pending_pos,
            handler,
            &mut progressed,
        ) {
            return if progressed {
                ReadResult::Progress
            } else {
                ReadResult::Blocked
            };
        }

        if self.input_eof {
            /* the final chunk has been delivered */
            handler.on_eof();
            return ReadResult::Eof;
        }

        let result = {
            let Self {
                input,
                pending,
                pending_pos,
                missing_from_current_chunk,
                input_eof,
            } = self;

            let mut adapter = ChunkAdapter {
                pending,
                pending_pos,
                missing: missing_from_current_chunk,
                input_eof,
                handler: &mut *handler,
                progressed: &mut progressed,
            };
            input.as_mut().unwrap().read(&mut adapter)
        };

        match result {
            ReadResult::Eof => {
                self.input = None;
                if flush(
                    &mut self.pending,
                    &mut self.pending_pos,
                    handler,
                    &mut progressed,
                ) {
                    handler.on_eof();
                    ReadResult::Eof
                } else {
                    ReadResult::Progress
                }
            }
            ReadResult::Error => ReadResult::Error,
            ReadResult::Progress => ReadResult::Progress,
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
