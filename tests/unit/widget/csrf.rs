/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::time::{Duration, SystemTime};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use widget::csrf::{CsrfHash, CsrfToken};
use widget::session::SessionId;

fn salt() -> SessionId {
    let mut prng = SmallRng::seed_from_u64(42);
    let mut id = SessionId::default();
    id.generate(&mut prng);
    id
}

#[test]
fn test_time_round_trip() {
    let now = SystemTime::now();
    let a = CsrfHash::import_time(now);
    assert_eq!(a, CsrfHash::import_time(CsrfHash::export_time(a)));
}

#[test]
fn test_format_and_parse() {
    let salt = salt();
    assert!(salt.is_defined());

    let a = CsrfToken::generate(SystemTime::now(), &salt);

    let s = a.format();
    assert_eq!(s.len(), CsrfToken::STRING_LENGTH);
    assert!(s.bytes().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));

    let b = CsrfToken::parse(&s).expect("parse");
    assert_eq!(
        CsrfHash::import_time(b.time),
        CsrfHash::import_time(a.time)
    );
    assert_eq!(b.hash, a.hash);

    assert_eq!(b.format(), s);
}

#[test]
fn test_same_minute_same_token() {
    let salt = salt();
    let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_020);

    /* two timestamps within the same minute yield equal tokens */
    let a = CsrfToken::generate(t, &salt);
    let b = CsrfToken::generate(t + Duration::from_secs(10), &salt);
    assert_eq!(a.hash, b.hash);

    /* a different minute yields a different hash */
    let c = CsrfToken::generate(t + Duration::from_secs(120), &salt);
    assert_ne!(a.hash, c.hash);
}

#[test]
fn test_different_salt_different_token() {
    let t = SystemTime::now();

    let salt_a = salt();
    let salt_b = {
        let mut prng = SmallRng::seed_from_u64(43);
        let mut id = SessionId::default();
        id.generate(&mut prng);
        id
    };

    let a = CsrfToken::generate(t, &salt_a);
    let b = CsrfToken::generate(t, &salt_b);
    assert_ne!(a.hash, b.hash);
}

#[test]
fn test_verify() {
    let salt = salt();
    let now = SystemTime::now();

    let token = CsrfToken::generate(now, &salt);
    assert!(token.verify(&salt, now));

    /* tokens from the previous minute are still acceptable */
    assert!(token.verify(&salt, now + Duration::from_secs(60)));

    /* but not older ones */
    assert!(!token.verify(&salt, now + Duration::from_secs(180)));
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(CsrfToken::parse("").is_none());
    assert!(CsrfToken::parse("tooshort").is_none());
    assert!(CsrfToken::parse(&"x".repeat(32)).is_none());
}
