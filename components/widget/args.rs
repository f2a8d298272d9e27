/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The semicolon-argument codec of external URIs:
//! `;key=value[&key=value]`.  Values are escaped with `$XX`
//! hexadecimal in addition to the usual `%XX`, because `%` has
//! already been eaten by the browser at this point.

/// An ordered argument list.
pub type Args = Vec<(String, String)>;

fn is_unreserved(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, b'-' | b'_' | b'.' | b'~')
}

/// Escape a value with `$XX` (lower-case hex).
pub fn args_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &ch in value.as_bytes() {
        if is_unreserved(ch) {
            out.push(ch as char);
        } else {
            out.push('$');
            out.push_str(&format!("{:02x}", ch));
        }
    }
    out
}

fn hex_value(ch: u8) -> Option<u8> {
    (ch as char).to_digit(16).map(|d| d as u8)
}

/// Undo [`args_escape`] (also accepts `%XX`).
pub fn args_unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if (bytes[i] == b'$' || bytes[i] == b'%') && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `key=value&key=value`.
pub fn args_parse(s: &str) -> Args {
    let mut args = Args::new();
    for pair in s.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, value)) => args.push((key.to_string(), args_unescape(value))),
            None => args.push((pair.to_string(), String::new())),
        }
    }
    args
}

/// Format existing args plus replacements.  Existing entries whose
/// key appears in `replace` are dropped; the replacements are
/// appended in their given order (a `None` value removes the key).
pub fn args_format(args: Option<&Args>, replace: &[(&str, Option<&str>)]) -> String {
    let mut out = String::new();

    if let Some(args) = args {
        for (key, value) in args {
            if replace.iter().any(|(k, _)| k == key) {
                continue;
            }
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&args_escape(value));
        }
    }

    for (key, value) in replace {
        let Some(value) = value else { continue };
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }

    out
}

/// Escape table for values expanded into URIs by the text processor:
/// quotes, angle brackets, space and control characters become `%XX`;
/// everything else (including `%` itself) passes through.
pub fn uri_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &ch in value.as_bytes() {
        if ch <= 0x20 || ch >= 0x7f || matches!(ch, b'"' | b'\'' | b'<' | b'>') {
            out.push('%');
            out.push_str(&format!("{:02x}", ch));
        } else {
            out.push(ch as char);
        }
    }
    out
}
