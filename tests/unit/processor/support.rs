/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Shared fixtures: a synchronous widget-class lookup service and
//! resource loaders for the processor tests.

use std::cell::RefCell;
use std::rc::Rc;

use http::header::{HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use net::http::response::HttpResponseHandler;
use socket::event_loop::EventLoop;
use stream::cancellable::CancellablePointer;
use stream::error::StreamError;
use stream::istream::BoxIstream;
use stream::istream_string;
use widget::registry::{ClassLookupService, RegistryCallback, WidgetRegistry};
use widget::request::ResourceLoader;
use widget::view::{Transformation, WidgetView, options};
use widget::{
    HttpAddress, ResourceAddress, SessionId, WidgetClass, WidgetContext,
};

/// Resolves the well-known test classes synchronously.
pub struct TestLookupService;

impl ClassLookupService for TestLookupService {
    fn lookup_widget_class(
        &self,
        name: &str,
        callback: RegistryCallback,
        _cancel_ptr: &mut CancellablePointer,
    ) {
        callback(make_test_class(name));
    }
}

fn http_class(uri: &str) -> WidgetClass {
    WidgetClass::new(ResourceAddress::Http(HttpAddress::new(
        false,
        "widget-server",
        uri,
    )))
}

pub fn make_test_class(name: &str) -> Option<Rc<WidgetClass>> {
    match name {
        "1" => Some(Rc::new(http_class("/1/"))),
        "2" => Some(Rc::new(http_class("/2"))),
        "3" => {
            let mut cls = http_class("/3");
            cls.local_uri = Some("/resources/3/".to_string());
            Some(Rc::new(cls))
        }
        "untrusted_host" => {
            let mut cls = http_class("/1/");
            cls.untrusted_host = Some("untrusted.host".to_string());
            Some(Rc::new(cls))
        }
        "untrusted_raw_site_suffix" => {
            let mut cls = http_class("/1/");
            cls.untrusted_raw_site_suffix = Some("_urss".to_string());
            Some(Rc::new(cls))
        }
        "bar" => Some(Rc::new(WidgetClass::new(ResourceAddress::Http(
            HttpAddress::new(false, "bar.server", "/bar/"),
        )))),
        "processed" => {
            let mut view = WidgetView::new(
                None,
                ResourceAddress::Http(HttpAddress::new(false, "widget.server", "/processed/")),
            );
            view.transformations.push(Transformation::Process {
                options: options::REWRITE_URL | options::FOCUS_WIDGET | options::PREFIX_XML_ID,
            });

            let mut cls = WidgetClass::new(ResourceAddress::Http(HttpAddress::new(
                false,
                "widget.server",
                "/processed/",
            )));
            cls.views = vec![Rc::new(view)];
            Some(Rc::new(cls))
        }
        _ => None,
    }
}

/// Fails every request; for tests that never reach the backend.
pub struct FailingResourceLoader;

impl ResourceLoader for FailingResourceLoader {
    fn send_request(
        &self,
        _address: &ResourceAddress,
        _method: Method,
        _uri: String,
        _headers: HeaderMap,
        _body: Option<BoxIstream>,
        handler: Box<dyn HttpResponseHandler>,
        _cancel_ptr: &mut CancellablePointer,
    ) {
        handler.on_error(StreamError::message("test loader always fails"));
    }
}

/// Serves canned responses for the widget servers of the test
/// classes, synchronously.
pub struct CannedResourceLoader {
    pub requests: RefCell<Vec<String>>,
}

impl CannedResourceLoader {
    pub fn new() -> CannedResourceLoader {
        CannedResourceLoader {
            requests: RefCell::new(Vec::new()),
        }
    }
}

impl ResourceLoader for CannedResourceLoader {
    fn send_request(
        &self,
        address: &ResourceAddress,
        _method: Method,
        uri: String,
        _headers: HeaderMap,
        _body: Option<BoxIstream>,
        handler: Box<dyn HttpResponseHandler>,
        _cancel_ptr: &mut CancellablePointer,
    ) {
        self.requests.borrow_mut().push(uri.clone());

        let host = match address {
            ResourceAddress::Http(a) => a.host_and_port.as_str(),
            _ => "",
        };

        let mut headers = HeaderMap::new();

        match (host, uri.as_str()) {
            ("bar.server", _) => {
                headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html"),
                );
                handler.on_response(StatusCode::OK, headers, Some(istream_string("bar")));
            }
            ("widget.server", "/processed/") => {
                headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("text/html"),
                );
                let body = "\n<META http-equiv=\"refresh\" content=\"999;URL='refresh'\">Refresh</meta>\n<a href=\"relative\">\n";
                handler.on_response(StatusCode::OK, headers, Some(istream_string(body)));
            }
            ("widget-server", _) => {
                /* the RESPONSE-mode rewrite target */
                headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                );
                handler.on_response(StatusCode::OK, headers, Some(istream_string("3")));
            }
            _ => {
                handler.on_error(StreamError::message(format!(
                    "no canned response for {}{}",
                    host, uri
                )));
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn make_context(
    loader: Rc<dyn ResourceLoader>,
    registry: bool,
    site_name: Option<&str>,
    external_base_uri: &str,
    absolute_uri: Option<&str>,
) -> Rc<WidgetContext> {
    let event_loop = EventLoop::new().expect("event loop");

    let registry = if registry {
        Some(WidgetRegistry::new(Rc::new(TestLookupService)))
    } else {
        None
    };

    WidgetContext::new(
        event_loop,
        Rc::clone(&loader),
        loader,
        registry,
        site_name,
        None,
        Some("localhost:8080"),
        Some("localhost:8080"),
        Some(external_base_uri),
        absolute_uri,
        external_base_uri,
        None,
        None,
        None,
        SessionId::default(),
        Some("foo"),
        None,
    )
}
