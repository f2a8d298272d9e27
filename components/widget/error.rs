/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetErrorCode {
    Unspecified,

    /// The content-type of the server's response does not meet our
    /// expectations.
    WrongType,

    /// The response body is encoded in an unsupported way.
    UnsupportedEncoding,

    /// The requested view does not exist.
    NoSuchView,

    /// Looking for a child widget inside a widget that is not a
    /// container.
    NotAContainer,

    /// The client request is forbidden due to formal reasons.
    Forbidden,
}

#[derive(Debug)]
pub struct WidgetError {
    code: WidgetErrorCode,
    message: String,
}

impl WidgetError {
    pub fn new<S: Into<String>>(code: WidgetErrorCode, message: S) -> WidgetError {
        WidgetError {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> WidgetErrorCode {
        self.code
    }
}

impl fmt::Display for WidgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for WidgetError {}
