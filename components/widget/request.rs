/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The seam between the widget model and the protocol clients: a
//! widget request is dispatched through a [`ResourceLoader`], which
//! picks the right client (HTTP, AJP, WAS, local file) for the
//! address.

use http::header::HeaderMap;
use http::Method;
pub use net::http::response::HttpResponseHandler;
use stream::cancellable::CancellablePointer;
use stream::istream::BoxIstream;

use crate::address::ResourceAddress;

/// Dispatches one backend request.  Implementations connect (or
/// lease) the backend, speak its protocol and deliver the response
/// through the handler.  `uri` is the path (plus query string)
/// relative to the server, already including the widget's path_info.
pub trait ResourceLoader {
    #[allow(clippy::too_many_arguments)]
    fn send_request(
        &self,
        address: &ResourceAddress,
        method: Method,
        uri: String,
        headers: HeaderMap,
        body: Option<BoxIstream>,
        handler: Box<dyn HttpResponseHandler>,
        cancel_ptr: &mut CancellablePointer,
    );
}
