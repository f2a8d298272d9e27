/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

/// An istream serving a byte buffer from memory.
pub struct MemoryIstream {
    data: Vec<u8>,
    position: usize,
}

impl MemoryIstream {
    pub fn new<T: Into<Vec<u8>>>(data: T) -> MemoryIstream {
        MemoryIstream {
            data: data.into(),
            position: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl Istream for MemoryIstream {
    fn available(&self, _partial: bool) -> Available {
        Available::Exact(self.remaining() as u64)
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if self.remaining() == 0 {
            handler.on_eof();
            return ReadResult::Eof;
        }

        let nbytes = handler.on_data(&self.data[self.position..]);
        if nbytes == 0 {
            return ReadResult::Blocked;
        }

        self.position += nbytes;
        debug_assert!(self.position <= self.data.len());

        if self.remaining() == 0 {
            handler.on_eof();
            ReadResult::Eof
        } else {
            ReadResult::Progress
        }
    }

    fn skip(&mut self, n: u64) -> u64 {
        let n = (n as usize).min(self.remaining());
        self.position += n;
        n as u64
    }
}

/// An istream with no content at all.
pub struct NullIstream;

impl Istream for NullIstream {
    fn available(&self, _partial: bool) -> Available {
        Available::Exact(0)
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        handler.on_eof();
        ReadResult::Eof
    }
}

pub fn istream_memory<T: Into<Vec<u8>>>(data: T) -> BoxIstream {
    Box::new(MemoryIstream::new(data))
}

pub fn istream_string<S: Into<String>>(s: S) -> BoxIstream {
    Box::new(MemoryIstream::new(s.into().into_bytes()))
}

pub fn istream_null() -> BoxIstream {
    Box::new(NullIstream)
}
