/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use http::header::HeaderMap;
use http::{Method, StatusCode};
use net::ajp::{AjpResponseParser, AjpResponseSink, serialize_forward_request};
use stream::error::StreamError;

#[derive(Default)]
struct Sink {
    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
    body: Vec<u8>,
    end: bool,
}

impl AjpResponseSink for Sink {
    fn on_headers(&mut self, status: StatusCode, headers: HeaderMap) {
        self.status = Some(status);
        self.headers = Some(headers);
    }

    fn on_body_data(&mut self, data: &[u8]) -> usize {
        self.body.extend_from_slice(data);
        data.len()
    }

    fn on_end(&mut self) {
        self.end = true;
    }
}

fn ajp_string(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s);
    out.push(0);
}

/// Wrap a payload into an `"AB"` server packet.
fn server_packet(payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![b'A', b'B'];
    packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn send_headers_packet(status: u16, headers: &[(&[u8], &[u8])]) -> Vec<u8> {
    let mut payload = vec![4u8]; /* SEND_HEADERS */
    payload.extend_from_slice(&status.to_be_bytes());
    ajp_string(&mut payload, b"OK");
    payload.extend_from_slice(&(headers.len() as u16).to_be_bytes());
    for (name, value) in headers {
        ajp_string(&mut payload, name);
        ajp_string(&mut payload, value);
    }
    server_packet(&payload)
}

fn body_chunk_packet(data: &[u8], junk: usize) -> Vec<u8> {
    let mut payload = vec![3u8]; /* SEND_BODY_CHUNK */
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(data);
    payload.extend_from_slice(&vec![0xAAu8; junk]);
    server_packet(&payload)
}

fn end_response_packet() -> Vec<u8> {
    server_packet(&[5u8]) /* END_RESPONSE */
}

/// Feed the input in chunks through an accumulation buffer, the way
/// the buffered socket would.
fn parse(input: &[u8], chunk_size: usize) -> Result<Sink, StreamError> {
    let mut parser = AjpResponseParser::new();
    let mut sink = Sink::default();

    let mut buffer: Vec<u8> = Vec::new();
    let mut position = 0;
    while position < input.len() && !parser.is_finished() {
        let end = (position + chunk_size).min(input.len());
        buffer.extend_from_slice(&input[position..end]);
        position = end;

        let consumed = parser.feed(&buffer, &mut sink)?;
        buffer.drain(..consumed);
    }

    Ok(sink)
}

fn full_response() -> Vec<u8> {
    let mut input = Vec::new();
    input.extend_from_slice(&send_headers_packet(
        200,
        &[(b"content-type", b"text/html")],
    ));
    input.extend_from_slice(&body_chunk_packet(b"hello ", 0));
    input.extend_from_slice(&body_chunk_packet(b"world", 2));
    input.extend_from_slice(&end_response_packet());
    input
}

#[test]
fn test_response_round_trip() {
    let input = full_response();
    let sink = parse(&input, input.len()).unwrap();

    assert_eq!(sink.status, Some(StatusCode::OK));
    assert_eq!(
        sink.headers.as_ref().unwrap().get("content-type").unwrap(),
        "text/html"
    );
    assert_eq!(sink.body, b"hello world");
    assert!(sink.end);
}

#[test]
fn test_response_arbitrary_chunking() {
    let input = full_response();
    for chunk_size in 1..=input.len() {
        let sink = parse(&input, chunk_size).unwrap();
        assert_eq!(sink.body, b"hello world", "chunk size {}", chunk_size);
        assert!(sink.end, "chunk size {}", chunk_size);
    }
}

#[test]
fn test_bad_magic() {
    let mut input = full_response();
    input[0] = b'X';

    let mut parser = AjpResponseParser::new();
    let mut sink = Sink::default();
    assert!(parser.feed(&input, &mut sink).is_err());
}

#[test]
fn test_body_chunk_before_headers() {
    let input = body_chunk_packet(b"oops", 0);

    let mut parser = AjpResponseParser::new();
    let mut sink = Sink::default();
    assert!(parser.feed(&input, &mut sink).is_err());
}

#[test]
fn test_coded_response_header() {
    /* 0xA003 = content-length in the response header code table */
    let mut payload = vec![4u8];
    payload.extend_from_slice(&200u16.to_be_bytes());
    ajp_string(&mut payload, b"OK");
    payload.extend_from_slice(&1u16.to_be_bytes());
    payload.extend_from_slice(&[0xA0, 0x03]);
    ajp_string(&mut payload, b"42");
    let input = server_packet(&payload);

    let sink = parse(&input, input.len()).unwrap();
    assert_eq!(
        sink.headers.as_ref().unwrap().get("content-length").unwrap(),
        "42"
    );
}

#[test]
fn test_forward_request_layout() {
    let mut headers = HeaderMap::new();
    headers.insert("host", "example.com".parse().unwrap());

    let buffer = serialize_forward_request(&Method::GET, "/index.html", &headers, None)
        .expect("serialized");
    let data = buffer.as_slice();

    /* client magic and patched length */
    assert_eq!(&data[..2], &[0x12, 0x34]);
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    assert_eq!(length, data.len() - 4);

    /* FORWARD_REQUEST with method code GET=2 */
    assert_eq!(data[4], 2);
    assert_eq!(data[5], 2);

    /* protocol string follows */
    assert_eq!(&data[6..8], &4u16.to_be_bytes());
    assert_eq!(&data[8..12], b"http");

    /* the attribute terminator ends the packet */
    assert_eq!(*data.last().unwrap(), 0xFF);
}

#[test]
fn test_forward_request_rejects_unknown_method() {
    let headers = HeaderMap::new();
    let method: Method = "PATCH".parse().unwrap();
    assert!(serialize_forward_request(&method, "/", &headers, None).is_none());
}

#[test]
fn test_get_body_chunk_is_ignored() {
    let mut input = send_headers_packet(200, &[]);
    input.extend_from_slice(&server_packet(&[6u8])); /* GET_BODY_CHUNK */
    input.extend_from_slice(&body_chunk_packet(b"x", 0));
    input.extend_from_slice(&end_response_packet());

    let sink = parse(&input, input.len()).unwrap();
    assert_eq!(sink.body, b"x");
    assert!(sink.end);
}
