/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use stream::error::StreamError;
use stream::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};
use stream::{
    CatchIstream, ChunkedIstream, ConcatIstream, StringSink, istream_memory, istream_null,
    istream_string, new_delayed, new_optional,
};

fn collect(istream: BoxIstream) -> String {
    StringSink::new(istream).run_to_completion().unwrap()
}

/// A handler that consumes at most N bytes per call, to exercise
/// partial-consumption paths.
struct Trickle {
    data: Vec<u8>,
    limit: usize,
    eof: bool,
    error: Option<StreamError>,
}

impl IstreamHandler for Trickle {
    fn on_data(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.limit);
        self.data.extend_from_slice(&data[..n]);
        n
    }

    fn on_eof(&mut self) {
        self.eof = true;
    }

    fn on_error(&mut self, error: StreamError) {
        self.error = Some(error);
    }
}

#[test]
fn test_memory_istream() {
    let mut istream = istream_memory(b"foobar".to_vec());
    assert_eq!(istream.available(false), Available::Exact(6));

    let mut handler = Trickle {
        data: Vec::new(),
        limit: 4,
        eof: false,
        error: None,
    };

    assert_eq!(istream.read(&mut handler), ReadResult::Progress);
    assert_eq!(handler.data, b"foob");

    assert_eq!(istream.read(&mut handler), ReadResult::Eof);
    assert_eq!(handler.data, b"foobar");
    assert!(handler.eof);
}

#[test]
fn test_null_istream() {
    assert_eq!(collect(istream_null()), "");
}

#[test]
fn test_concat() {
    let parts: Vec<BoxIstream> = vec![
        istream_string("foo"),
        istream_null(),
        istream_string("bar"),
    ];
    let cat = ConcatIstream::new(parts);
    assert_eq!(cat.available(false), Available::Exact(6));
    assert_eq!(collect(Box::new(cat)), "foobar");
}

#[test]
fn test_chunked_encoding() {
    let chunked = ChunkedIstream::new(istream_string("hello"));
    assert_eq!(collect(Box::new(chunked)), "5\r\nhello\r\n0\r\n\r\n");
}

#[test]
fn test_chunked_empty() {
    let chunked = ChunkedIstream::new(istream_null());
    assert_eq!(collect(Box::new(chunked)), "0\r\n\r\n");
}

#[test]
fn test_delayed_set_before_read() {
    let (delayed, control) = new_delayed();
    control.set(istream_string("late"));
    assert_eq!(collect(Box::new(delayed)), "late");
}

#[test]
fn test_delayed_blocks_until_set() {
    let (mut delayed, control) = new_delayed();

    let mut handler = Trickle {
        data: Vec::new(),
        limit: usize::MAX,
        eof: false,
        error: None,
    };
    assert_eq!(delayed.read(&mut handler), ReadResult::Blocked);

    control.set(istream_string("now"));
    assert_eq!(delayed.read(&mut handler), ReadResult::Eof);
    assert_eq!(handler.data, b"now");
}

#[test]
fn test_delayed_error() {
    let (mut delayed, control) = new_delayed();
    control.set_error(StreamError::message("boom"));

    let mut handler = Trickle {
        data: Vec::new(),
        limit: usize::MAX,
        eof: false,
        error: None,
    };
    assert_eq!(delayed.read(&mut handler), ReadResult::Error);
    assert!(handler.error.is_some());
    assert!(!handler.eof);
}

#[test]
fn test_optional_resume() {
    let (optional, control) = new_optional(istream_string("body"));
    let mut optional: BoxIstream = Box::new(optional);

    let mut handler = Trickle {
        data: Vec::new(),
        limit: usize::MAX,
        eof: false,
        error: None,
    };
    assert_eq!(optional.read(&mut handler), ReadResult::Blocked);

    control.resume();
    assert_eq!(optional.read(&mut handler), ReadResult::Eof);
    assert_eq!(handler.data, b"body");
}

#[test]
fn test_optional_discard() {
    let (optional, control) = new_optional(istream_string("body"));
    control.discard();
    assert_eq!(collect(Box::new(optional)), "");
}

#[test]
fn test_catch_swallows_error() {
    let (delayed, control) = new_delayed();
    control.set_error(StreamError::message("inner failure"));

    let mut caught: Option<String> = None;
    let catch = CatchIstream::new(
        Box::new(delayed),
        Box::new(move |error| {
            caught = Some(error.to_string());
            None
        }),
    );

    /* the error becomes a clean EOF (an empty slot) */
    assert_eq!(collect(Box::new(catch)), "");
}

#[test]
fn test_eof_exactly_once() {
    let mut istream = istream_string("x");
    let mut handler = Trickle {
        data: Vec::new(),
        limit: usize::MAX,
        eof: false,
        error: None,
    };

    assert_eq!(istream.read(&mut handler), ReadResult::Eof);
    assert!(handler.eof);
    assert!(handler.error.is_none());
}
