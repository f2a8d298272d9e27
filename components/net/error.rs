/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::error::Error;
use std::fmt;

/// The error taxonomy shared by the protocol clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// The peer sent something that is not the protocol (malformed
    /// status line, bad magic, broken framing).
    Garbage,
    /// The bytes were well-formed but semantically wrong (missing
    /// Content-Length on keep-alive, unexpected packet ordering).
    Unspecified,
    /// The kernel reported an I/O error.
    Io,
}

#[derive(Debug)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    message: String,
}

impl ProtocolError {
    pub fn new<S: Into<String>>(kind: ProtocolErrorKind, message: S) -> ProtocolError {
        ProtocolError {
            kind,
            message: message.into(),
        }
    }

    pub fn garbage<S: Into<String>>(message: S) -> ProtocolError {
        ProtocolError::new(ProtocolErrorKind::Garbage, message)
    }

    pub fn unspecified<S: Into<String>>(message: S) -> ProtocolError {
        ProtocolError::new(ProtocolErrorKind::Unspecified, message)
    }

    pub fn io<S: Into<String>>(message: S) -> ProtocolError {
        ProtocolError::new(ProtocolErrorKind::Io, message)
    }

    pub fn kind(&self) -> ProtocolErrorKind {
        self.kind
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ProtocolError {}
