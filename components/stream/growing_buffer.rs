/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An append-only buffer for assembling small wire artifacts (request
//! lines, header blocks, protocol packets) before they are streamed
//! out.

use crate::istream::BoxIstream;
use crate::memory::MemoryIstream;

#[derive(Default)]
pub struct GrowingBuffer {
    data: Vec<u8>,
}

impl GrowingBuffer {
    pub fn new() -> GrowingBuffer {
        GrowingBuffer { data: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> GrowingBuffer {
        GrowingBuffer {
            data: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }

    pub fn write_str(&mut self, src: &str) {
        self.write(src.as_bytes());
    }

    pub fn write_u8(&mut self, b: u8) {
        self.data.push(b);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.write(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.write(&v.to_be_bytes());
    }

    /// Reserve `n` bytes and return their offset, to be patched later
    /// with [`patch`](Self::patch).
    pub fn reserve(&mut self, n: usize) -> usize {
        let offset = self.data.len();
        self.data.resize(offset + n, 0);
        offset
    }

    pub fn patch(&mut self, offset: usize, src: &[u8]) {
        self.data[offset..offset + src.len()].copy_from_slice(src);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn into_istream(self) -> BoxIstream {
        Box::new(MemoryIstream::new(self.data))
    }
}
