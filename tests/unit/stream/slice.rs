/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use stream::SlicePool;

fn fill(data: &mut [u8], seed: u8) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8);
    }
}

fn check(data: &[u8], seed: u8) -> bool {
    data.iter()
        .enumerate()
        .all(|(i, &byte)| byte == seed.wrapping_add(i as u8))
}

#[test]
fn test_small() {
    let slice_size = 13;
    let per_area = 600;

    let pool = SlicePool::new(slice_size, per_area);

    let allocation0 = pool.alloc();
    let area0 = allocation0.area;
    assert_eq!(allocation0.data.len(), slice_size);
    pool.free(allocation0);

    let mut allocations = Vec::new();
    for i in 0..per_area {
        let mut allocation = pool.alloc();
        assert_eq!(allocation.area, area0);
        fill(&mut allocation.data, i as u8);
        allocations.push(allocation);
    }

    /* the first area is exhausted now */
    let mut more = Vec::new();
    for i in 0..per_area {
        let mut allocation = pool.alloc();
        fill(&mut allocation.data, (per_area + i) as u8);
        more.push(allocation);
    }

    assert_ne!(more.last().unwrap().area, area0);

    for (i, allocation) in allocations.into_iter().enumerate() {
        assert!(check(&allocation.data, i as u8));
        pool.free(allocation);
    }

    for (i, allocation) in more.into_iter().enumerate() {
        assert!(check(&allocation.data, (per_area + i) as u8));
        pool.free(allocation);
    }
}

#[test]
fn test_reuse_freed_slice() {
    let pool = SlicePool::new(64, 4);

    let a = pool.alloc();
    let b = pool.alloc();
    let area = a.area;
    pool.free(a);

    /* the freed slice is handed out again before the area grows */
    let c = pool.alloc();
    assert_eq!(c.area, area);

    pool.free(b);
    pool.free(c);
}
