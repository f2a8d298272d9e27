/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use stream::FifoBuffer;

#[test]
fn test_write_then_read_round_trip() {
    let mut buffer = FifoBuffer::new(16);
    assert!(buffer.is_empty());
    assert!(!buffer.is_full());

    assert_eq!(buffer.push(b"hello world"), 11);
    assert_eq!(buffer.available(), 11);
    assert_eq!(buffer.read(), b"hello world");

    buffer.consume(6);
    assert_eq!(buffer.read(), b"world");

    buffer.consume(5);
    assert!(buffer.is_empty());
}

#[test]
fn test_full_rejects_writes() {
    let mut buffer = FifoBuffer::new(8);
    assert_eq!(buffer.push(b"12345678"), 8);
    assert!(buffer.is_full());

    /* no room left */
    assert_eq!(buffer.push(b"x"), 0);

    buffer.consume(8);
    assert!(buffer.is_empty());
    assert_eq!(buffer.push(b"abc"), 3);
    assert_eq!(buffer.read(), b"abc");
}

#[test]
fn test_compaction_recovers_tail_space() {
    let mut buffer = FifoBuffer::new(8);
    assert_eq!(buffer.push(b"abcdefgh"), 8);
    buffer.consume(4);

    /* the tail is exhausted, but write() shifts pending bytes to
       the front */
    assert_eq!(buffer.push(b"1234"), 4);
    assert_eq!(buffer.read(), b"efgh1234");
}

#[test]
fn test_read_pointer_stability() {
    let mut buffer = FifoBuffer::new(16);
    buffer.push(b"abcdef");

    /* consume may be called repeatedly while the same read window
       stays valid */
    let first = buffer.read()[0];
    buffer.consume(1);
    let second = buffer.read()[0];
    assert_eq!(first, b'a');
    assert_eq!(second, b'b');
}

#[test]
fn test_clear() {
    let mut buffer = FifoBuffer::new(8);
    buffer.push(b"abc");
    buffer.clear();
    assert!(buffer.is_empty());
    assert_eq!(buffer.push(b"12345678"), 8);
}
