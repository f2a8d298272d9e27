/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use http::header::HeaderMap;
use net::headers::{header_parse_line, http_header_param, strip_hop_by_hop};

#[test]
fn test_parse_line() {
    let mut headers = HeaderMap::new();
    header_parse_line(&mut headers, b"Content-Type: text/html");
    assert_eq!(headers.get("content-type").unwrap(), "text/html");
}

#[test]
fn test_parse_line_strips_leading_whitespace() {
    let mut headers = HeaderMap::new();
    header_parse_line(&mut headers, b"x-test:\t  value");
    assert_eq!(headers.get("x-test").unwrap(), "value");
}

#[test]
fn test_parse_line_without_colon_is_dropped() {
    let mut headers = HeaderMap::new();
    header_parse_line(&mut headers, b"no colon here");
    assert!(headers.is_empty());
}

#[test]
fn test_strip_hop_by_hop() {
    let mut headers = HeaderMap::new();
    header_parse_line(&mut headers, b"connection: keep-alive");
    header_parse_line(&mut headers, b"transfer-encoding: chunked");
    header_parse_line(&mut headers, b"content-length: 42");
    header_parse_line(&mut headers, b"proxy-authenticate: Basic");
    header_parse_line(&mut headers, b"upgrade: h2c");
    header_parse_line(&mut headers, b"content-type: text/plain");

    strip_hop_by_hop(&mut headers);

    assert_eq!(headers.len(), 1);
    assert!(headers.get("content-type").is_some());
}

#[test]
fn test_header_param() {
    assert_eq!(
        http_header_param("text/html; charset=utf-8", "charset"),
        Some("utf-8")
    );
    assert_eq!(
        http_header_param("text/html; charset=\"utf-8\"", "charset"),
        Some("utf-8")
    );
    assert_eq!(http_header_param("text/html", "charset"), None);
    assert_eq!(http_header_param("text/html; foo=bar", "charset"), None);
}
