/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use net::memcached::{
    HEADER_SIZE, MEMCACHED_OPAQUE, MemcachedResponseParser, memcached_request_packet, opcode,
};
use stream::StringSink;
use stream::error::StreamError;
use stream::istream::IstreamHandler;
use stream::istream_string;

/// A GET hit: 4 bytes extras (flags), 3 bytes key, 5 bytes value.
fn get_hit_response() -> Vec<u8> {
    let extras = [0xde, 0xad, 0xbe, 0xef];
    let key = b"key";
    let value = b"value";
    let body_length = (extras.len() + key.len() + value.len()) as u32;

    let mut packet = Vec::new();
    packet.push(0x81); /* response magic */
    packet.push(opcode::GET);
    packet.extend_from_slice(&(key.len() as u16).to_be_bytes());
    packet.push(extras.len() as u8);
    packet.push(0); /* data type */
    packet.extend_from_slice(&0u16.to_be_bytes()); /* status */
    packet.extend_from_slice(&body_length.to_be_bytes());
    packet.extend_from_slice(&MEMCACHED_OPAQUE.to_be_bytes());
    packet.extend_from_slice(&[0u8; 8]); /* cas */
    packet.extend_from_slice(&extras);
    packet.extend_from_slice(key);
    packet.extend_from_slice(value);
    packet
}

struct ValueCollector(Vec<u8>);

impl IstreamHandler for ValueCollector {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.0.extend_from_slice(data);
        data.len()
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, _error: StreamError) {}
}

fn parse_response(packet: &[u8], chunk_size: usize) -> (MemcachedResponseParser, Vec<u8>) {
    let mut parser = MemcachedResponseParser::new();
    let mut value = ValueCollector(Vec::new());

    let mut position = 0;
    while position < packet.len() {
        let end = (position + chunk_size).min(packet.len());
        let chunk = &packet[position..end];

        let consumed = if parser.is_ready() {
            parser.feed_value(chunk, &mut value)
        } else {
            parser.feed_meta(chunk).unwrap()
        };

        assert!(consumed > 0 || parser.is_finished());
        position += consumed;
    }

    (parser, value.0)
}

#[test]
fn test_get_hit() {
    let packet = get_hit_response();
    let (parser, value) = parse_response(&packet, packet.len());

    assert!(parser.is_finished());
    assert_eq!(parser.header().opcode, opcode::GET);
    assert_eq!(parser.header().status, 0);
    assert_eq!(parser.header().opaque, MEMCACHED_OPAQUE);
    assert_eq!(parser.extras(), &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(parser.key(), b"key");
    assert_eq!(value, b"value");
}

#[test]
fn test_get_hit_arbitrary_chunking() {
    let packet = get_hit_response();

    for chunk_size in 1..=packet.len() {
        let (parser, value) = parse_response(&packet, chunk_size);
        assert!(parser.is_finished(), "chunk size {}", chunk_size);
        assert_eq!(parser.extras(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parser.key(), b"key");
        assert_eq!(value, b"value", "chunk size {}", chunk_size);
    }
}

#[test]
fn test_wrong_magic_is_rejected() {
    let mut packet = get_hit_response();
    packet[0] = 0x80; /* request magic in a response */

    let mut parser = MemcachedResponseParser::new();
    assert!(parser.feed_meta(&packet).is_err());
}

#[test]
fn test_inconsistent_lengths_are_rejected() {
    let mut packet = get_hit_response();
    /* body_length smaller than extras+key */
    packet[8..12].copy_from_slice(&2u32.to_be_bytes());

    let mut parser = MemcachedResponseParser::new();
    assert!(parser.feed_meta(&packet).is_err());
}

#[test]
fn test_request_packet_layout() {
    let request =
        memcached_request_packet(opcode::GET, &[], b"key", None).expect("packet");
    let data = StringSink::new(request).run_to_completion().unwrap();
    let data = data.as_bytes();

    assert_eq!(data.len(), HEADER_SIZE + 3);
    assert_eq!(data[0], 0x80);
    assert_eq!(data[1], opcode::GET);
    assert_eq!(u16::from_be_bytes([data[2], data[3]]), 3); /* key length */
    assert_eq!(data[4], 0); /* extras length */
    assert_eq!(
        u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        3
    ); /* body length */
    assert_eq!(
        u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
        MEMCACHED_OPAQUE
    );
    assert_eq!(&data[HEADER_SIZE..], b"key");
}

#[test]
fn test_request_packet_with_value() {
    let request = memcached_request_packet(
        opcode::SET,
        &[0, 0, 0, 0, 0, 0, 0, 0],
        b"k",
        Some(istream_string("v")),
    )
    .expect("packet");

    let data = StringSink::new(request).run_to_completion().unwrap();
    let data = data.as_bytes();

    assert_eq!(data.len(), HEADER_SIZE + 8 + 1 + 1);
    assert_eq!(data[4], 8); /* extras length */
    assert_eq!(
        u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        10
    );
    assert_eq!(*data.last().unwrap(), b'v');
}

#[test]
fn test_request_packet_requires_known_value_length() {
    let (delayed, _control) = stream::new_delayed();
    assert!(memcached_request_packet(opcode::SET, &[], b"k", Some(Box::new(delayed))).is_none());
}
