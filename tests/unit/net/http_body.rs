/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use net::http::body::{BodyProgress, BodyReader, ChunkedDecoder};
use stream::error::StreamError;
use stream::istream::IstreamHandler;

struct Collector(Vec<u8>);

impl IstreamHandler for Collector {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.0.extend_from_slice(data);
        data.len()
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, _error: StreamError) {}
}

fn decode_chunked(input: &[u8], chunk_size: usize) -> Result<(Vec<u8>, bool), StreamError> {
    let mut decoder = ChunkedDecoder::new();
    let mut collector = Collector(Vec::new());
    let mut finished = false;

    let mut position = 0;
    while position < input.len() {
        let end = (position + chunk_size).min(input.len());
        let (consumed, progress) = decoder.feed(&input[position..end], &mut collector)?;
        position += consumed;

        if progress == BodyProgress::Eof {
            finished = true;
            break;
        }
        assert!(consumed > 0);
    }

    Ok((collector.0, finished))
}

#[test]
fn test_chunked_decode() {
    let input = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let (data, finished) = decode_chunked(input, input.len()).unwrap();
    assert!(finished);
    assert_eq!(data, b"hello world");
}

#[test]
fn test_chunked_decode_arbitrary_chunking() {
    let input = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    for chunk_size in 1..=input.len() {
        let (data, finished) = decode_chunked(input, chunk_size).unwrap();
        assert!(finished, "chunk size {}", chunk_size);
        assert_eq!(data, b"hello world", "chunk size {}", chunk_size);
    }
}

#[test]
fn test_chunked_extension_is_ignored() {
    let input = b"5;name=value\r\nhello\r\n0\r\n\r\n";
    let (data, finished) = decode_chunked(input, input.len()).unwrap();
    assert!(finished);
    assert_eq!(data, b"hello");
}

#[test]
fn test_chunked_trailer_is_ignored() {
    let input = b"3\r\nabc\r\n0\r\nx-trailer: 1\r\n\r\n";
    let (data, finished) = decode_chunked(input, input.len()).unwrap();
    assert!(finished);
    assert_eq!(data, b"abc");
}

#[test]
fn test_chunked_garbage_size() {
    let input = b"zz\r\nxx\r\n";
    assert!(decode_chunked(input, input.len()).is_err());
}

#[test]
fn test_chunked_missing_crlf() {
    let input = b"3\r\nabcXX";
    assert!(decode_chunked(input, input.len()).is_err());
}

#[test]
fn test_length_body() {
    let mut body = BodyReader::with_length(5);
    let mut collector = Collector(Vec::new());

    let (consumed, progress) = body.feed(b"he", &mut collector).unwrap();
    assert_eq!(consumed, 2);
    assert_eq!(progress, BodyProgress::More);

    /* excess bytes beyond the announced length are not consumed */
    let (consumed, progress) = body.feed(b"lloXYZ", &mut collector).unwrap();
    assert_eq!(consumed, 3);
    assert_eq!(progress, BodyProgress::Eof);

    assert!(body.is_eof());
    assert_eq!(collector.0, b"hello");
}

#[test]
fn test_length_body_socket_eof_premature() {
    let mut body = BodyReader::with_length(10);
    let mut collector = Collector(Vec::new());
    body.feed(b"12345", &mut collector).unwrap();

    assert!(body.socket_eof().is_err());
}

#[test]
fn test_until_eof_body() {
    let mut body = BodyReader::until_eof();
    let mut collector = Collector(Vec::new());

    body.feed(b"abc", &mut collector).unwrap();
    body.feed(b"def", &mut collector).unwrap();
    assert!(body.socket_eof().is_ok());
    assert!(body.is_eof());
    assert_eq!(collector.0, b"abcdef");

    /* a close-delimited body can never mark a reusable socket */
    assert!(!body.has_end());
}
