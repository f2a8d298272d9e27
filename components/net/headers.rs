/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Header-block plumbing shared by the protocol codecs: line
//! parsing into an [`http::HeaderMap`], serialization into a wire
//! buffer, hop-by-hop stripping and parameter extraction.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use stream::GrowingBuffer;

/// Parse one `name: value` line (without the terminating CRLF) into
/// the map.  Malformed lines are dropped silently, like any
/// tolerant HTTP/1.x parser.
pub fn header_parse_line(headers: &mut HeaderMap, line: &[u8]) {
    let Some(colon) = line.iter().position(|&ch| ch == b':') else {
        return;
    };

    let name = &line[..colon];
    let mut value = &line[colon + 1..];
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }

    let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name),
        HeaderValue::from_bytes(value),
    ) else {
        return;
    };

    headers.append(name, value);
}

/// Serialize one header line.
pub fn header_write(buffer: &mut GrowingBuffer, name: &str, value: &[u8]) {
    buffer.write_str(name);
    buffer.write(b": ");
    buffer.write(value);
    buffer.write(b"\r\n");
}

/// Serialize a whole map.
pub fn headers_write(buffer: &mut GrowingBuffer, headers: &HeaderMap) {
    for (name, value) in headers {
        header_write(buffer, name.as_str(), value.as_bytes());
    }
}

/// Strip the hop-by-hop headers that must not be forwarded.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(http::header::CONNECTION);
    headers.remove(http::header::TRANSFER_ENCODING);
    headers.remove(http::header::CONTENT_LENGTH);
    headers.remove(http::header::PROXY_AUTHENTICATE);
    headers.remove(http::header::UPGRADE);
}

/// Extract a `; name=value` parameter from a header value.
pub fn http_header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let (_, params) = value.split_once(';')?;
    let params = params.trim_start();

    let (param_name, param_value) = params.split_once('=')?;
    if param_name != name {
        return None;
    }

    if let Some(stripped) = param_value.strip_prefix('"') {
        Some(stripped.split('"').next().unwrap_or(stripped))
    } else {
        Some(param_value)
    }
}
