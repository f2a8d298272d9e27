/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

pub mod body;
pub mod client;
pub mod response;
pub mod server;

use http::{Method, StatusCode};

/// Does a response with this status never carry a body?
pub fn status_is_empty(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Does a request with this method expect a bodyless response?
pub fn method_is_empty(method: &Method) -> bool {
    *method == Method::HEAD
}
