/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A reusable contiguous buffer with a hard growth limit.  The
//! markup parsers collect attribute values and widget parameters in
//! these; the hard limit bounds what a hostile template can make us
//! buffer.

pub struct ExpansibleBuffer {
    data: Vec<u8>,
    hard_limit: usize,
}

impl ExpansibleBuffer {
    pub fn new(initial_size: usize, hard_limit: usize) -> ExpansibleBuffer {
        assert!(initial_size > 0);
        assert!(hard_limit >= initial_size);

        ExpansibleBuffer {
            data: Vec::with_capacity(initial_size),
            hard_limit,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Append; returns false (leaving the buffer unchanged) if the
    /// operation would exceed the hard limit.
    pub fn write(&mut self, src: &[u8]) -> bool {
        if self.data.len() + src.len() > self.hard_limit {
            return false;
        }

        self.data.extend_from_slice(src);
        true
    }

    pub fn write_str(&mut self, src: &str) -> bool {
        self.write(src.as_bytes())
    }

    /// Replace the contents; returns false if `src` exceeds the hard
    /// limit.
    pub fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.hard_limit {
            return false;
        }

        self.data.clear();
        self.data.extend_from_slice(src);
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// The contents as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
