/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Web Application Socket: a control channel carrying typed packets
//! plus two dedicated pipes for request and response bodies.

pub mod client;
pub mod control;
pub mod server;

/// Control-channel commands.
pub mod command {
    pub const NOP: u8 = 0;
    pub const REQUEST: u8 = 1;
    pub const METHOD: u8 = 2;
    pub const URI: u8 = 3;
    pub const SCRIPT_NAME: u8 = 4;
    pub const PATH_INFO: u8 = 5;
    pub const QUERY_STRING: u8 = 6;
    pub const HEADER: u8 = 7;
    pub const PARAMETER: u8 = 8;
    pub const STATUS: u8 = 9;
    pub const NO_DATA: u8 = 10;
    pub const DATA: u8 = 11;
    pub const LENGTH: u8 = 12;
    pub const STOP: u8 = 13;
    pub const PREMATURE: u8 = 14;
}

/// Wire size of a control-packet header: `{u8 command, u16 length}`.
pub const CONTROL_HEADER_SIZE: usize = 3;

use std::io;
use std::os::fd::RawFd;

use stream::error::StreamError;
use stream::istream::IstreamHandler;

/// Writes body bytes into a data pipe, tracking the sent count.
pub(crate) struct PipeWriter<'a> {
    pub fd: RawFd,
    pub sent: &'a mut u64,
    pub blocked: &'a mut bool,
    pub failed: &'a mut Option<io::Error>,
}

impl IstreamHandler for PipeWriter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        let nbytes =
            unsafe { libc::write(self.fd, data.as_ptr() as *const libc::c_void, data.len()) };

        if nbytes >= 0 {
            *self.sent += nbytes as u64;
            return nbytes as usize;
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            *self.blocked = true;
        } else {
            *self.failed = Some(err);
        }
        0
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, _error: StreamError) {}
}
