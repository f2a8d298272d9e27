/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The default resource loader: picks the protocol client matching a
//! widget address.  HTTP and AJP backends are dialed with a
//! non-blocking connect (the client's write pump rides the
//! connection establishment); WAS backends need a process-spawning
//! collaborator; local files are served straight from an istream.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::OwnedFd;
use std::path::Path;
use std::rc::Rc;

use http::header::{HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use log::debug;
use net::ajp::ajp_client_request;
use net::http::client::http_client_request;
use net::http::response::HttpResponseHandler;
use net::was::client::{WasConnection, was_client_request};
use socket::connect::tcp_connect;
use socket::event_loop::EventLoop;
use socket::lease::CloseLease;
use stream::cancellable::CancellablePointer;
use stream::error::StreamError;
use stream::istream::{BoxIstream, FdType};
use stream::FileIstream;
use widget::request::ResourceLoader;
use widget::{HttpAddress, ResourceAddress, WasAddress};

/// Supplies a connected WAS child process for an address; this is
/// the spawner collaborator's seam.
pub type WasConnector = Box<dyn Fn(&WasAddress) -> io::Result<WasConnection>>;

pub struct DirectResourceLoader {
    event_loop: EventLoop,
    was_connector: Option<WasConnector>,
}

impl DirectResourceLoader {
    pub fn new(event_loop: EventLoop) -> Rc<DirectResourceLoader> {
        Rc::new(DirectResourceLoader {
            event_loop,
            was_connector: None,
        })
    }

    pub fn with_was_connector(
        event_loop: EventLoop,
        was_connector: WasConnector,
    ) -> Rc<DirectResourceLoader> {
        Rc::new(DirectResourceLoader {
            event_loop,
            was_connector: Some(was_connector),
        })
    }
}

/// Begin a non-blocking connect; the caller's write pump completes
/// it.
fn dial(host_and_port: &str, default_port: u16) -> io::Result<OwnedFd> {
    let address: SocketAddr = if host_and_port.contains(':') {
        host_and_port
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::other("no address"))?
    } else {
        (host_and_port, default_port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::other("no address"))?
    };

    tcp_connect(address)
}

fn serve_local_file(path: &Path, handler: Box<dyn HttpResponseHandler>) {
    let istream = match FileIstream::open(path) {
        Ok(istream) => istream,
        Err(e) => {
            handler.on_error(StreamError::new(e).prefixed("failed to open file: "));
            return;
        }
    };

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("xml") => "text/xml",
        Some("css") => "text/css",
        Some("txt") => "text/plain",
        Some("js") => "text/javascript",
        _ => "application/octet-stream",
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static(content_type),
    );

    handler.on_response(
        StatusCode::OK,
        headers,
        Some(Box::new(istream) as BoxIstream),
    );
}

impl ResourceLoader for DirectResourceLoader {
    fn send_request(
        &self,
        address: &ResourceAddress,
        method: Method,
        uri: String,
        mut headers: HeaderMap,
        body: Option<BoxIstream>,
        handler: Box<dyn HttpResponseHandler>,
        cancel_ptr: &mut CancellablePointer,
    ) {
        match address {
            ResourceAddress::Http(HttpAddress { host_and_port, .. }) => {
                let fd = match dial(host_and_port, 80) {
                    Ok(fd) => fd,
                    Err(e) => {
                        handler.on_error(
                            StreamError::new(e)
                                .prefixed(&format!("failed to connect to '{}': ", host_and_port)),
                        );
                        return;
                    }
                };

                if !headers.contains_key(http::header::HOST) {
                    if let Ok(host) = HeaderValue::from_str(host_and_port) {
                        headers.insert(http::header::HOST, host);
                    }
                }

                http_client_request(
                    &self.event_loop,
                    fd,
                    FdType::Socket,
                    Box::new(CloseLease),
                    None,
                    host_and_port,
                    method,
                    &uri,
                    headers,
                    body,
                    true,
                    handler,
                    cancel_ptr,
                );
            }

            ResourceAddress::Ajp(HttpAddress { host_and_port, .. }) => {
                let fd = match dial(host_and_port, 8009) {
                    Ok(fd) => fd,
                    Err(e) => {
                        handler.on_error(
                            StreamError::new(e)
                                .prefixed(&format!("failed to connect to '{}': ", host_and_port)),
                        );
                        return;
                    }
                };

                ajp_client_request(
                    &self.event_loop,
                    fd,
                    FdType::Socket,
                    Box::new(CloseLease),
                    host_and_port,
                    method,
                    &uri,
                    headers,
                    body,
                    handler,
                    cancel_ptr,
                );
            }

            ResourceAddress::Was(was_address) => {
                let Some(connector) = &self.was_connector else {
                    handler.on_error(StreamError::message(
                        "no WAS spawner configured for this loader",
                    ));
                    return;
                };

                let connection = match connector(was_address) {
                    Ok(connection) => connection,
                    Err(e) => {
                        handler.on_error(
                            StreamError::new(e).prefixed("failed to spawn WAS application: "),
                        );
                        return;
                    }
                };

                /* split the request path back into script_name and
                   path_info relative to the application */
                let (path, query_string) = match uri.split_once('?') {
                    Some((path, query)) => (path.to_string(), Some(query.to_string())),
                    None => (uri.clone(), None),
                };

                was_client_request(
                    &self.event_loop,
                    connection,
                    Box::new(|connection: Option<WasConnection>, _reuse: bool| {
                        drop(connection);
                    }),
                    method,
                    &path,
                    Some(&was_address.path),
                    None,
                    query_string.as_deref(),
                    &headers,
                    &[],
                    body,
                    handler,
                    cancel_ptr,
                );
            }

            ResourceAddress::LocalFile(base) => {
                debug!("serving local file below {:?}", base);

                let relative = uri.trim_start_matches('/');
                let path = base.join(relative.split('?').next().unwrap_or(relative));
                serve_local_file(&path, handler);
            }
        }
    }
}
