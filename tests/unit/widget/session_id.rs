/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use rand::SeedableRng;
use rand::rngs::SmallRng;
use widget::session::SessionId;

fn prng() -> SmallRng {
    SmallRng::seed_from_u64(0x5eed)
}

#[test]
fn test_is_defined() {
    let mut prng = prng();

    let mut a = SessionId::default();
    a.clear();
    assert!(!a.is_defined());
    assert_eq!(a, a);

    let mut b = SessionId::default();
    b.generate(&mut prng);
    assert!(b.is_defined());
    assert_eq!(b, b);
    assert_ne!(a, b);
    assert_ne!(b, a);
}

#[test]
fn test_format_and_parse() {
    let mut prng = prng();

    let mut a = SessionId::default();
    a.generate(&mut prng);
    assert!(a.is_defined());

    let s = a.format();
    assert_eq!(s.len(), 32);
    assert!(s.bytes().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));

    let b = SessionId::parse(&s).expect("parse");
    assert_eq!(b, a);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(SessionId::parse("").is_none());
    assert!(SessionId::parse("zz").is_none());
    assert!(SessionId::parse(&"g".repeat(32)).is_none());

    /* upper-case hex is not canonical */
    let mut prng = prng();
    let mut a = SessionId::default();
    a.generate(&mut prng);
    assert!(SessionId::parse(&a.format().to_uppercase()).is_none());
}

#[test]
fn test_cluster_hash() {
    let mut prng = prng();

    for cluster_size in 2..=16u32 {
        for cluster_node in 0..cluster_size {
            let mut a = SessionId::default();
            a.generate(&mut prng);
            assert!(a.is_defined());

            a.set_cluster_node(cluster_size, cluster_node);
            assert_eq!(a.cluster_hash() % cluster_size, cluster_node);
        }
    }
}

#[test]
fn test_cluster_node_survives_round_trip() {
    let mut prng = prng();

    let mut a = SessionId::default();
    a.generate(&mut prng);
    a.set_cluster_node(8, 5);

    let b = SessionId::parse(&a.format()).unwrap();
    assert_eq!(b.cluster_hash() % 8, 5);
}
