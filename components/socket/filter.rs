/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The byte-transform seam under the buffered socket.  The upper
//! layer always sees plain text; a filter translates between that
//! and whatever is on the wire (TLS, or nothing at all for the nop
//! filter used in tests and debugging).

use stream::FifoBuffer;

pub trait SocketFilter {
    /// Bytes arrived from the kernel; append the decoded plain text
    /// to `input` and return how many raw bytes were consumed.
    fn decrypt(&mut self, raw: &[u8], input: &mut FifoBuffer) -> usize;

    /// Encode plain text for the wire; returns the encoded bytes and
    /// how much plain text was consumed.
    fn encrypt(&mut self, plain: &[u8], out: &mut Vec<u8>) -> usize;

    /// The peer has closed the connection.
    fn closed(&mut self) {}
}

/// Copies bytes unchanged.  Exists to exercise the filter plumbing
/// without a TLS stack.
pub struct NopSocketFilter;

impl SocketFilter for NopSocketFilter {
    fn decrypt(&mut self, raw: &[u8], input: &mut FifoBuffer) -> usize {
        input.push(raw)
    }

    fn encrypt(&mut self, plain: &[u8], out: &mut Vec<u8>) -> usize {
        out.extend_from_slice(plain);
        plain.len()
    }
}
