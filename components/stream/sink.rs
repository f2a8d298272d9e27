/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A pump that drains an istream into a byte buffer.  Mostly a test
//! helper, but also the collector for small internal bodies.

use crate::error::StreamError;
use crate::istream::{BoxIstream, Istream, IstreamHandler, ReadResult};

pub struct StringSink {
    input: Option<BoxIstream>,
    data: Vec<u8>,
    result: Option<Result<(), StreamError>>,
}

struct Collector<'a> {
    data: &'a mut Vec<u8>,
    error: &'a mut Option<StreamError>,
}

impl IstreamHandler for Collector<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.data.extend_from_slice(data);
        data.len()
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, error: StreamError) {
        *self.error = Some(error);
    }
}

impl StringSink {
    pub fn new(input: BoxIstream) -> StringSink {
        StringSink {
            input: Some(input),
            data: Vec::new(),
            result: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Drive the stream once.  Returns the underlying read result.
    pub fn read(&mut self) -> ReadResult {
        let Some(input) = &mut self.input else {
            return ReadResult::Eof;
        };

        let mut error = None;
        let result = {
            let mut collector = Collector {
                data: &mut self.data,
                error: &mut error,
            };
            input.read(&mut collector)
        };

        match result {
            ReadResult::Eof => {
                self.input = None;
                self.result = Some(Ok(()));
            }
            ReadResult::Error => {
                self.input = None;
                self.result = Some(Err(error.expect("error result without error")));
            }
            _ => {}
        }

        result
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pump until the stream ends; panics if it stalls without any
    /// asynchronous producer to wake it up.
    pub fn run_to_completion(mut self) -> Result<String, StreamError> {
        let mut stalled = 0;
        while !self.is_finished() {
            match self.read() {
                ReadResult::Blocked => {
                    stalled += 1;
                    assert!(stalled < 2, "istream stalled without a pending producer");
                }
                _ => stalled = 0,
            }
        }

        match self.result.unwrap() {
            Ok(()) => Ok(String::from_utf8_lossy(&self.data).into_owned()),
            Err(e) => Err(e),
        }
    }
}
