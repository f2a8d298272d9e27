/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::VecDeque;
use std::os::fd::RawFd;

use crate::error::StreamError;
use crate::istream::{
    Available, BoxIstream, DirectResult, FdType, FdTypeMask, Istream, IstreamHandler, ReadResult,
};

/// Serves the concatenation of several istreams.  The HTTP client
/// glues request line, header block and body together with this.
pub struct ConcatIstream {
    inputs: VecDeque<BoxIstream>,
}

impl ConcatIstream {
    pub fn new(inputs: Vec<BoxIstream>) -> ConcatIstream {
        ConcatIstream {
            inputs: inputs.into(),
        }
    }
}

/// Forwards data to the outer handler but swallows the inner EOF:
/// only the last input's end is the concatenation's end.
struct CatAdapter<'a> {
    handler: &'a mut dyn IstreamHandler,
}

impl IstreamHandler for CatAdapter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.handler.on_data(data)
    }

    fn direct_mask(&self) -> FdTypeMask {
        self.handler.direct_mask()
    }

    fn on_direct(&mut self, fd: RawFd, fd_type: FdType, max: usize) -> DirectResult {
        self.handler.on_direct(fd, fd_type, max)
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, error: StreamError) {
        self.handler.on_error(error);
    }
}

impl Istream for ConcatIstream {
    fn available(&self, partial: bool) -> Available {
        let mut sum = 0u64;
        for input in &self.inputs {
            match input.available(partial) {
                Available::Exact(n) => sum += n,
                Available::Unknown => {
                    if !partial {
                        return Available::Unknown;
                    }
                    /* partial: the sum so far is a valid lower
                       bound */
                    return Available::Exact(sum);
                }
            }
        }
        Available::Exact(sum)
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        while let Some(front) = self.inputs.front_mut() {
            let mut adapter = CatAdapter {
                handler: &mut *handler,
            };
            match front.read(&mut adapter) {
                ReadResult::Eof => {
                    self.inputs.pop_front();
                }
                other => return other,
            }
        }

        handler.on_eof();
        ReadResult::Eof
    }

    fn skip(&mut self, mut n: u64) -> u64 {
        let mut skipped = 0;
        for input in &mut self.inputs {
            if n == 0 {
                break;
            }
            let s = input.skip(n);
            skipped += s;
            n -= s;
            if n > 0 {
                break;
            }
        }
        skipped
    }
}
