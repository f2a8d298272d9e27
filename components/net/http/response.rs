/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use http::header::HeaderMap;
use http::StatusCode;
use stream::error::StreamError;
use stream::istream::BoxIstream;

/// Receives the outcome of a backend request: exactly one of
/// `on_response` / `on_error` is invoked, exactly once.
pub trait HttpResponseHandler {
    fn on_response(
        self: Box<Self>,
        status: StatusCode,
        headers: HeaderMap,
        body: Option<BoxIstream>,
    );

    fn on_error(self: Box<Self>, error: StreamError);
}
