/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Character classification for the HTML/XML and CSS tokenizers.

pub const fn is_whitespace_or_null(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\r' | b'\n' | 0)
}

pub const fn is_html_name_start_char(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b':' || ch == b'_'
}

pub const fn is_html_name_char(ch: u8) -> bool {
    is_html_name_start_char(ch) || ch.is_ascii_digit() || ch == b'-' || ch == b'.'
}

pub const fn is_css_nonascii(ch: u8) -> bool {
    !ch.is_ascii()
}

pub const fn is_css_nmstart(ch: u8) -> bool {
    ch == b'_' || ch.is_ascii_alphabetic() || is_css_nonascii(ch) || ch == b'\\'
}

pub const fn is_css_nmchar(ch: u8) -> bool {
    is_css_nmstart(ch) || ch.is_ascii_digit() || ch == b'-'
}

pub const fn is_css_ident_start(ch: u8) -> bool {
    ch == b'-' || is_css_nmstart(ch)
}

pub const fn is_css_ident_char(ch: u8) -> bool {
    is_css_nmchar(ch)
}

/// Count the number of leading underscores.  Returns 0 unless the
/// underscores are followed by a different name character.
pub fn underscore_prefix(s: &[u8]) -> usize {
    s.iter().position(|&ch| ch != b'_').unwrap_or(s.len())
}

pub fn is_underscore_prefix(s: &[u8]) -> bool {
    let n = underscore_prefix(s);
    n == 2 || n == 3
}
