/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Dispatch one widget request to its backend and apply the view's
//! transformation chain to the response.

use std::rc::Rc;

use http::header::{CONTENT_LENGTH, HeaderMap};
use http::StatusCode;
use net::http::response::HttpResponseHandler;
use stream::cancellable::CancellablePointer;
use stream::error::StreamError;
use stream::istream::BoxIstream;
use widget::error::{WidgetError, WidgetErrorCode};
use widget::view::Transformation;
use widget::{WidgetContext, WidgetRef};

use crate::css::css_processor;
use crate::text::text_processor;
use crate::xml::{processable, processor_process};
use crate::{CssProcessorOptions, ProcessorOptions};

/// Issue the HTTP (or AJP/WAS/file) request for a widget and run the
/// response through the transformations of the effective view.
pub fn widget_http_request(
    ctx: &Rc<WidgetContext>,
    widget: &WidgetRef,
    handler: Box<dyn HttpResponseHandler>,
    cancel_ptr: &mut CancellablePointer,
) {
    let (address, method, uri, headers, body) = {
        let mut w = widget.borrow_mut();

        let Some(view) = w.get_address_view() else {
            drop(w);
            handler.on_error(StreamError::new(WidgetError::new(
                WidgetErrorCode::NoSuchView,
                "widget has no address view",
            )));
            return;
        };

        let stateful = w.cls.as_ref().map(|c| c.stateful).unwrap_or(false);

        let Some(base_path) = view.address.base_path() else {
            drop(w);
            handler.on_error(StreamError::new(WidgetError::new(
                WidgetErrorCode::Unspecified,
                "widget address is not requestable",
            )));
            return;
        };

        let mut uri = format!("{}{}", base_path, w.get_path_info(stateful));

        let query = {
            let template = w.from_template.query_string.as_deref();
            let request = if stateful {
                w.from_request.query_string.as_deref().filter(|s| !s.is_empty())
            } else {
                None
            };
            match (template, request) {
                (None, None) => None,
                (Some(t), None) => Some(t.to_string()),
                (None, Some(r)) => Some(r.to_string()),
                (Some(t), Some(r)) => Some(format!("{}&{}", t, r)),
            }
        };
        if let Some(query) = query {
            uri.push('?');
            uri.push_str(&query);
        }

        let headers = w.from_template.headers.clone().unwrap_or_default();
        let method = w.from_request.method.clone();
        let body = w.from_request.body.take();

        (view.address.clone(), method, uri, headers, body)
    };

    let response_handler = Box::new(WidgetResponseHandler {
        ctx: Rc::clone(ctx),
        widget: Rc::clone(widget),
    });

    ctx.resource_loader.send_request(
        &address,
        method,
        uri,
        headers,
        body,
        Box::new(ForwardingHandler {
            inner: Some(response_handler),
            outer: Some(handler),
        }),
        cancel_ptr,
    );
}

/// Applies transformations, then forwards to the original handler.
struct WidgetResponseHandler {
    ctx: Rc<WidgetContext>,
    widget: WidgetRef,
}

impl WidgetResponseHandler {
    fn transform(
        &self,
        status: StatusCode,
        mut headers: HeaderMap,
        body: Option<BoxIstream>,
    ) -> (StatusCode, HeaderMap, Option<BoxIstream>) {
        /* a pending session save happens once we know whether the
           response is processable */
        if self.widget.borrow().session_save_pending {
            if processable(&headers) {
                self.ctx.with_realm_session(|realm| {
                    widget::save_to_session(&self.widget, realm);
                });
            } else {
                self.widget.borrow_mut().session_save_pending = false;
            }
        }

        let Some(mut body) = body else {
            return (status, headers, None);
        };

        let Some(view) = self.widget.borrow().get_transformation_view() else {
            return (status, headers, Some(body));
        };

        let mut transformed = false;
        for transformation in &view.transformations {
            match transformation {
                Transformation::Process { options } => {
                    if processable(&headers) {
                        body = processor_process(
                            body,
                            &self.widget,
                            &self.ctx,
                            ProcessorOptions::from_bits_truncate(*options),
                        );
                        transformed = true;
                    }
                }
                Transformation::ProcessCss { options } => {
                    body = css_processor(
                        body,
                        &self.widget,
                        &self.ctx,
                        CssProcessorOptions::from_bits_truncate(*options),
                    );
                    transformed = true;
                }
                Transformation::ProcessText => {
                    body = text_processor(body, &self.widget, &self.ctx);
                    transformed = true;
                }
            }
        }

        if transformed {
            /* the transformed body has a new, unknown length */
            headers.remove(CONTENT_LENGTH);
        }

        (status, headers, Some(body))
    }
}

/// Boxed-handler plumbing: run the widget transformation, then hand
/// the result to the caller's handler.
struct ForwardingHandler {
    inner: Option<Box<WidgetResponseHandler>>,
    outer: Option<Box<dyn HttpResponseHandler>>,
}

impl HttpResponseHandler for ForwardingHandler {
    fn on_response(
        mut self: Box<Self>,
        status: StatusCode,
        headers: HeaderMap,
        body: Option<BoxIstream>,
    ) {
        let inner = self.inner.take().unwrap();
        let outer = self.outer.take().unwrap();

        let (status, headers, body) = inner.transform(status, headers, body);
        outer.on_response(status, headers, body);
    }

    fn on_error(mut self: Box<Self>, error: StreamError) {
        let outer = self.outer.take().unwrap();
        outer.on_error(error);
    }
}
