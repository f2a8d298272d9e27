/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use http::header::HeaderMap;
use net::was::command;
use net::was::control::{WasControlSender, parse_control_packets};

fn drain(sender: &mut WasControlSender) -> Vec<u8> {
    /* the queue holds the exact wire format */
    sender.pending().to_vec()
}

fn collect_packets(data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut packets = Vec::new();
    let consumed = parse_control_packets(data, 8192, &mut |packet| {
        packets.push((packet.command, packet.payload.to_vec()));
        true
    })
    .unwrap();
    assert_eq!(consumed, data.len());
    packets
}

#[test]
fn test_packet_round_trip() {
    let mut sender = WasControlSender::new();
    sender.send_empty(command::REQUEST);
    sender.send_string(command::URI, "/index.html");
    sender.send_u64(command::LENGTH, 1234);
    sender.send_empty(command::NO_DATA);

    let wire = drain(&mut sender);
    let packets = collect_packets(&wire);

    assert_eq!(packets.len(), 4);
    assert_eq!(packets[0], (command::REQUEST, vec![]));
    assert_eq!(packets[1], (command::URI, b"/index.html".to_vec()));
    assert_eq!(packets[2].0, command::LENGTH);
    assert_eq!(
        u64::from_le_bytes(packets[2].1.as_slice().try_into().unwrap()),
        1234
    );
    assert_eq!(packets[3], (command::NO_DATA, vec![]));
}

#[test]
fn test_header_packets() {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "text/html".parse().unwrap());

    let mut sender = WasControlSender::new();
    sender.send_headers(command::HEADER, &headers);

    let wire = drain(&mut sender);
    let packets = collect_packets(&wire);

    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].0, command::HEADER);
    assert_eq!(packets[0].1, b"content-type=text/html".to_vec());
}

#[test]
fn test_incomplete_packet_is_left_in_buffer() {
    let mut sender = WasControlSender::new();
    sender.send(command::PARAMETER, b"a=b");
    let wire = drain(&mut sender);

    /* withhold the last byte */
    let mut packets = Vec::new();
    let consumed = parse_control_packets(&wire[..wire.len() - 1], 8192, &mut |packet| {
        packets.push(packet.command);
        true
    })
    .unwrap();

    assert_eq!(consumed, 0);
    assert!(packets.is_empty());
}

#[test]
fn test_oversized_packet_is_rejected() {
    /* a header announcing more than the buffer can ever hold */
    let mut wire = vec![command::HEADER];
    wire.extend_from_slice(&9000u16.to_le_bytes());

    assert!(parse_control_packets(&wire, 8192, &mut |_| true).is_err());
}

#[test]
fn test_bulk_mode_withholds_flush() {
    let mut sender = WasControlSender::new();
    assert!(!sender.in_bulk());

    sender.bulk_on();
    assert!(sender.in_bulk());
    sender.send_empty(command::REQUEST);
    assert!(!sender.is_empty());

    sender.bulk_off();
    assert!(!sender.in_bulk());
}
