/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The wire-protocol state machines: HTTP/1.x client and server,
//! AJPv13 client, WAS client/server and the memcached binary client.
//! Each is a full-duplex request/response codec on a leased socket,
//! streaming bodies through istreams without buffering them whole.

pub mod ajp;
pub mod error;
pub mod headers;
pub mod http;
pub mod memcached;
pub mod was;

pub use crate::http::client::http_client_request;
pub use crate::http::response::HttpResponseHandler;
pub use error::{ProtocolError, ProtocolErrorKind};
