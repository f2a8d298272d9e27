/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Recovery site for istream errors: a callback inspects the error
//! and either swallows it (the stream ends with a clean EOF, i.e. an
//! empty slot in the template output) or substitutes another error.

use std::os::fd::RawFd;

use crate::error::StreamError;
use crate::istream::{
    Available, BoxIstream, DirectResult, FdType, FdTypeMask, Istream, IstreamHandler, ReadResult,
};

pub type CatchCallback = Box<dyn FnMut(StreamError) -> Option<StreamError>>;

pub struct CatchIstream {
    input: Option<BoxIstream>,
    callback: CatchCallback,
}

impl CatchIstream {
    pub fn new(input: BoxIstream, callback: CatchCallback) -> CatchIstream {
        CatchIstream {
            input: Some(input),
            callback,
        }
    }
}

struct CatchAdapter<'a> {
    handler: &'a mut dyn IstreamHandler,
    error: &'a mut Option<StreamError>,
}

impl IstreamHandler for CatchAdapter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.handler.on_data(data)
    }

    fn direct_mask(&self) -> FdTypeMask {
        self.handler.direct_mask()
    }

    fn on_direct(&mut self, fd: RawFd, fd_type: FdType, max: usize) -> DirectResult {
        self.handler.on_direct(fd, fd_type, max)
    }

    fn on_eof(&mut self) {
        self.handler.on_eof();
    }

    fn on_error(&mut self, error: StreamError) {
        *self.error = Some(error);
    }
}

impl Istream for CatchIstream {
    fn available(&self, partial: bool) -> Available {
        match &self.input {
            Some(input) => {
                if partial {
                    input.available(true)
                } else {
                    /* the error recovery may truncate the stream, so
                       an exact promise cannot be kept */
                    Available::Unknown
                }
            }
            None => Available::Exact(0),
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Some(input) = &mut self.input else {
            handler.on_eof();
            return ReadResult::Eof;
        };

        let mut error = None;
        let result = {
            let mut adapter = CatchAdapter {
                handler: &mut *handler,
                error: &mut error,
            };
            input.read(&mut adapter)
        };

        match result {
            ReadResult::Error => {
                self.input = None;
                match (self.callback)(error.expect("error result without error")) {
                    None => {
                        handler.on_eof();
                        ReadResult::Eof
                    }
                    Some(substitute) => {
                        handler.on_error(substitute);
                        ReadResult::Error
                    }
                }
            }
            other => other,
        }
    }

    fn skip(&mut self, n: u64) -> u64 {
        match &mut self.input {
            Some(input) => input.skip(n),
            None => 0,
        }
    }
}
