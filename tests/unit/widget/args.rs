/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use widget::args::{args_escape, args_format, args_parse, args_unescape, uri_escape};

#[test]
fn test_escape_dollar_hex() {
    assert_eq!(args_escape("456/"), "456$2f");
    assert_eq!(args_escape("456/123"), "456$2f123");
    assert_eq!(args_escape("plain-value_1.2~3"), "plain-value_1.2~3");
    assert_eq!(args_escape("a=b&c"), "a$3db$26c");
}

#[test]
fn test_unescape_accepts_dollar_and_percent() {
    assert_eq!(args_unescape("456$2f123"), "456/123");
    assert_eq!(args_unescape("456%2f123"), "456/123");
    assert_eq!(args_unescape("$zz"), "$zz");
}

#[test]
fn test_round_trip() {
    for value in ["", "abc", "a/b/c", "x y&z=1;2", "100%"] {
        assert_eq!(args_unescape(&args_escape(value)), value);
    }
}

#[test]
fn test_parse() {
    let args = args_parse("focus=1&path=456$2f123&frame=1");
    assert_eq!(
        args,
        vec![
            ("focus".to_string(), "1".to_string()),
            ("path".to_string(), "456/123".to_string()),
            ("frame".to_string(), "1".to_string()),
        ]
    );
}

#[test]
fn test_format_replacements_in_order() {
    let formatted = args_format(
        None,
        &[
            ("focus", Some("1")),
            ("path", Some("123")),
            ("frame", None),
            ("view", None),
        ],
    );
    assert_eq!(formatted, "focus=1&path=123");
}

#[test]
fn test_format_preserves_existing_args() {
    let existing = vec![("session".to_string(), "abc".to_string())];
    let formatted = args_format(Some(&existing), &[("focus", Some("2"))]);
    assert_eq!(formatted, "session=abc&focus=2");
}

#[test]
fn test_format_replaces_existing_key() {
    let existing = vec![
        ("focus".to_string(), "old".to_string()),
        ("session".to_string(), "abc".to_string()),
    ];
    let formatted = args_format(Some(&existing), &[("focus", Some("new"))]);
    assert_eq!(formatted, "session=abc&focus=new");
}

#[test]
fn test_uri_escape_table() {
    /* quotes and angle brackets are escaped, '%' passes through */
    assert_eq!(
        uri_escape("http://localhost:8080/beng.html?'%\"<>"),
        "http://localhost:8080/beng.html?%27%%22%3c%3e"
    );
    assert_eq!(uri_escape("a b"), "a%20b");
    assert_eq!(uri_escape("plain/path?x=1&y=2"), "plain/path?x=1&y=2");
}
