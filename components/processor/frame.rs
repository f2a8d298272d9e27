/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Frame requests: a widget addressed directly at the top level
//! (`frame=` argument), served without the surrounding template.

use std::rc::Rc;

use net::http::response::HttpResponseHandler;
use stream::cancellable::CancellablePointer;
use stream::error::StreamError;
use widget::approval::check_approval;
use widget::error::{WidgetError, WidgetErrorCode};
use widget::{WidgetContext, WidgetRef};

use crate::request::widget_http_request;

/// Serve the top-frame widget: approval/host/session checks, then
/// the backend request with the view's transformations.
pub fn frame_top_widget(
    ctx: &Rc<WidgetContext>,
    widget: &WidgetRef,
    handler: Box<dyn HttpResponseHandler>,
    cancel_ptr: &mut CancellablePointer,
) {
    debug_assert!(widget.borrow().cls.is_some());
    debug_assert!(widget.borrow().from_request.frame);

    if let Err(e) = check_approval(widget) {
        widget.borrow_mut().cancel();
        handler.on_error(StreamError::new(e));
        return;
    }

    if let Err(e) = widget
        .borrow()
        .check_host(ctx.untrusted_host.as_deref(), ctx.site_name.as_deref())
    {
        widget.borrow_mut().cancel();
        handler.on_error(StreamError::new(e));
        return;
    }

    if !widget.borrow().has_default_view() {
        widget.borrow_mut().cancel();
        handler.on_error(StreamError::new(WidgetError::new(
            WidgetErrorCode::NoSuchView,
            "no such view",
        )));
        return;
    }

    if widget.borrow().session_sync_pending {
        let synced = ctx
            .with_realm_session(|realm| {
                widget::load_from_session(widget, realm);
            })
            .is_some();
        if !synced {
            widget.borrow_mut().session_sync_pending = false;
        }
    }

    widget_http_request(ctx, widget, handler, cancel_ptr);
}

/// Check that a parent widget on the focus chain may forward a frame
/// request at all.
pub fn check_frame_parent(widget: &WidgetRef) -> Result<(), WidgetError> {
    if !widget.borrow().is_container() {
        /* a non-container cannot be the parent of a framed widget */
        return Err(WidgetError::new(
            WidgetErrorCode::NotAContainer,
            "frame within non-container requested",
        ));
    }

    check_approval(widget)
}
