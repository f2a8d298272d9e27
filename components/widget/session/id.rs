/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use rand::RngCore;

/// The session id: 128 bits as two u64 halves.  The second half
/// carries the cluster hash in its lower 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId {
    data: [u64; 2],
}

/// Only the lower 32 bits count for cluster stickiness; that is what
/// the load balancer truncates to.
type StickyHash = u32;

fn to_cluster_node(id: u64, cluster_size: u32, cluster_node: u32) -> u64 {
    let remainder = (id as StickyHash) % cluster_size;
    debug_assert!(remainder < cluster_size);

    id - remainder as u64 + cluster_node as u64
}

impl SessionId {
    pub fn is_defined(&self) -> bool {
        self.data.iter().any(|&i| i != 0)
    }

    pub fn clear(&mut self) {
        self.data = [0, 0];
    }

    pub fn generate<R: RngCore>(&mut self, prng: &mut R) {
        for i in &mut self.data {
            *i = prng.next_u64();
        }
    }

    /// Manipulate the modulo of [`cluster_hash`](Self::cluster_hash)
    /// so that it selects the given cluster node.
    pub fn set_cluster_node(&mut self, cluster_size: u32, cluster_node: u32) {
        assert!(cluster_size > 0);
        assert!(cluster_node < cluster_size);

        self.data[1] = to_cluster_node(self.data[1], cluster_size, cluster_node);
    }

    pub fn cluster_hash(&self) -> StickyHash {
        self.data[1] as StickyHash
    }

    pub fn hash_value(&self) -> u64 {
        self.data[0]
    }

    /// The raw bytes, for hashing into derived tokens.
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.data[0].to_le_bytes());
        bytes[8..].copy_from_slice(&self.data[1].to_le_bytes());
        bytes
    }

    /// Parse the 32-digit lower-case hex form.
    pub fn parse(s: &str) -> Option<SessionId> {
        if s.len() != 32 {
            return None;
        }
        if s.bytes().any(|ch| ch.is_ascii_uppercase()) {
            return None;
        }

        let mut data = [0u64; 2];
        for (i, half) in data.iter_mut().enumerate() {
            *half = u64::from_str_radix(&s[i * 16..(i + 1) * 16], 16).ok()?;
        }
        Some(SessionId { data })
    }

    /// 32 lower-case hex digits: both halves big-endian.
    pub fn format(&self) -> String {
        format!("{:016x}{:016x}", self.data[0], self.data[1])
    }
}
