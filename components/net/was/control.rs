/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The WAS control-channel codec: typed packets
//! `{u8 command, u16 length, payload}` in both directions, with a
//! "bulk" mode that batches outgoing packets until flushed.

use http::header::HeaderMap;
use socket::buffered::{SocketIo, WriteResult};
use stream::error::StreamError;

use crate::error::ProtocolError;
use crate::was::CONTROL_HEADER_SIZE;

/// One parsed packet view.
pub struct WasPacket<'a> {
    pub command: u8,
    pub payload: &'a [u8],
}

/// Parse as many complete packets as `data` holds; `sink` returns
/// false to stop.  Returns bytes consumed, or an error when a packet
/// cannot ever fit into `buffer_capacity`.
pub fn parse_control_packets(
    data: &[u8],
    buffer_capacity: usize,
    sink: &mut dyn FnMut(WasPacket<'_>) -> bool,
) -> Result<usize, StreamError> {
    let mut i = 0usize;

    while data.len() - i >= CONTROL_HEADER_SIZE {
        let command = data[i];
        let length = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;

        if data.len() - i < CONTROL_HEADER_SIZE + length {
            if CONTROL_HEADER_SIZE + length > buffer_capacity {
                return Err(StreamError::new(ProtocolError::garbage(format!(
                    "was-control: packet too long ({})",
                    length
                ))));
            }
            break;
        }

        let payload = &data[i + CONTROL_HEADER_SIZE..i + CONTROL_HEADER_SIZE + length];
        i += CONTROL_HEADER_SIZE + length;

        if !sink(WasPacket { command, payload }) {
            break;
        }
    }

    Ok(i)
}

/// The sending half: queues packets and flushes them to the control
/// socket.  In bulk mode nothing is written until
/// [`bulk_off`](Self::bulk_off).
pub struct WasControlSender {
    output: Vec<u8>,
    output_pos: usize,
    bulk: u32,
}

impl Default for WasControlSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WasControlSender {
    pub fn new() -> WasControlSender {
        WasControlSender {
            output: Vec::new(),
            output_pos: 0,
            bulk: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.output_pos == self.output.len()
    }

    /// The queued wire bytes that have not been written yet.
    pub fn pending(&self) -> &[u8] {
        &self.output[self.output_pos..]
    }

    pub fn send(&mut self, command: u8, payload: &[u8]) {
        debug_assert!(payload.len() <= u16::MAX as usize);

        if self.output_pos == self.output.len() {
            self.output.clear();
            self.output_pos = 0;
        }

        self.output.push(command);
        self.output
            .extend_from_slice(&(payload.len() as u16).to_le_bytes());
        self.output.extend_from_slice(payload);
    }

    pub fn send_empty(&mut self, command: u8) {
        self.send(command, &[]);
    }

    pub fn send_string(&mut self, command: u8, payload: &str) {
        self.send(command, payload.as_bytes());
    }

    pub fn send_u64(&mut self, command: u8, payload: u64) {
        self.send(command, &payload.to_le_bytes());
    }

    pub fn send_u32(&mut self, command: u8, payload: u32) {
        self.send(command, &payload.to_le_bytes());
    }

    /// Send a header map as repeated `name=value` packets.
    pub fn send_headers(&mut self, command: u8, headers: &HeaderMap) {
        for (name, value) in headers {
            let mut payload = Vec::with_capacity(name.as_str().len() + 1 + value.len());
            payload.extend_from_slice(name.as_str().as_bytes());
            payload.push(b'=');
            payload.extend_from_slice(value.as_bytes());
            self.send(command, &payload);
        }
    }

    /// Enable bulk mode: batch control writes.
    pub fn bulk_on(&mut self) {
        self.bulk += 1;
    }

    /// Disable bulk mode; the caller must flush.
    pub fn bulk_off(&mut self) {
        debug_assert!(self.bulk > 0);
        self.bulk -= 1;
    }

    pub fn in_bulk(&self) -> bool {
        self.bulk > 0
    }

    /// Write queued packets to the socket.  Returns false on a fatal
    /// write error.
    pub fn flush(&mut self, io: &mut SocketIo) -> bool {
        if self.in_bulk() {
            return true;
        }

        while self.output_pos < self.output.len() {
            match io.write(&self.output[self.output_pos..]) {
                WriteResult::Written(n) => self.output_pos += n,
                WriteResult::Blocking => {
                    io.schedule_write();
                    return true;
                }
                WriteResult::Broken | WriteResult::Error(_) => return false,
            }
        }

        true
    }
}
