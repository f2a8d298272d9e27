/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The inline-widget driver: throttles, resolves, checks approval
//! and content type, issues the backend request with a header
//! timeout, and delivers the (possibly re-processed) body into the
//! parent template stream.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap};
use http::StatusCode;
use log::debug;
use markup::escape::{EscapeClass, EscapeIstream};
use net::http::response::HttpResponseHandler;
use socket::event_loop::TimerEvent;
use socket::queue::{LimitedConcurrencyJob, LimitedConcurrencyQueue};
use socket::timeout::TimeoutIstream;
use stream::cancellable::CancellablePointer;
use stream::error::{StreamError, TimeoutError};
use stream::istream::BoxIstream;
use stream::{ConcatIstream, DelayedControl, istream_string, new_delayed};
use widget::approval::check_approval;
use widget::error::{WidgetError, WidgetErrorCode};
use widget::{WidgetContext, WidgetRef, resolve_widget};

use crate::request::widget_http_request;

const INLINE_WIDGET_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
pub const INLINE_WIDGET_BODY_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum concurrent child requests per parent widget.
const CHILD_CONCURRENCY_LIMIT: usize = 32;

fn child_throttler(ctx: &WidgetContext, parent: &WidgetRef) -> Rc<LimitedConcurrencyQueue> {
    let mut parent = parent.borrow_mut();
    parent
        .child_throttler
        .get_or_insert_with(|| {
            LimitedConcurrencyQueue::new(&ctx.event_loop, CHILD_CONCURRENCY_LIMIT)
        })
        .clone()
}

/// Ensure the response has the right type for embedding into a
/// HTML/XML document; text responses are converted, everything else
/// is refused.
fn widget_response_format(
    widget: &WidgetRef,
    headers: &HeaderMap,
    body: BoxIstream,
    plain_text: bool,
) -> Result<BoxIstream, WidgetError> {
    let content_encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    if let Some(encoding) = content_encoding {
        if !encoding.eq_ignore_ascii_case("identity") {
            return Err(WidgetError::new(
                WidgetErrorCode::UnsupportedEncoding,
                format!(
                    "widget '{}' sent non-identity response, cannot embed",
                    widget.borrow().log_name()
                ),
            ));
        }
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if plain_text {
        if !content_type.starts_with("text/plain") {
            return Err(WidgetError::new(
                WidgetErrorCode::WrongType,
                format!(
                    "widget '{}' sent non-text/plain response",
                    widget.borrow().log_name()
                ),
            ));
        }

        return Ok(body);
    }

    if !content_type.starts_with("text/")
        && !content_type.starts_with("application/xml")
        && !content_type.starts_with("application/xhtml+xml")
    {
        return Err(WidgetError::new(
            WidgetErrorCode::WrongType,
            format!(
                "widget '{}' sent non-text response",
                widget.borrow().log_name()
            ),
        ));
    }

    if content_type.starts_with("text/")
        && !content_type[5..].starts_with("html")
        && !content_type[5..].starts_with("xml")
    {
        /* convert plain text to HTML */
        debug!("converting text to HTML for widget '{}'", widget.borrow().log_name());

        let escaped = EscapeIstream::new(body, EscapeClass::Html);
        let parts: Vec<BoxIstream> = vec![
            istream_string("<pre class=\"beng_text_widget\">"),
            Box::new(escaped),
            istream_string("</pre>"),
        ];
        return Ok(Box::new(ConcatIstream::new(parts)));
    }

    Ok(body)
}

struct InlineWidget {
    ctx: Rc<WidgetContext>,
    widget: WidgetRef,
    plain_text: bool,
    control: DelayedControl,
    header_timer: Option<TimerEvent>,
    /// Concurrency slot in the parent's throttler.
    job: Option<LimitedConcurrencyJob>,
    /// Cancels the resolver or the backend request.
    cancel: CancellablePointer,
    done: bool,
}

impl InlineWidget {
    fn fail(&mut self, error: StreamError) {
        if self.done {
            return;
        }
        self.done = true;
        self.header_timer = None;
        self.job = None;
        self.control.set_error(error);
    }

    fn fail_widget(&mut self, error: WidgetError) {
        self.widget.borrow_mut().cancel();
        self.fail(StreamError::new(error));
    }
}

fn send_request(this: &Rc<RefCell<InlineWidget>>) {
    let (ctx, widget, _plain_text) = {
        let i = this.borrow();
        (Rc::clone(&i.ctx), Rc::clone(&i.widget), i.plain_text)
    };

    /* approval, host and view checks */

    if let Err(e) = check_approval(&widget) {
        this.borrow_mut().fail_widget(e);
        return;
    }

    if let Err(e) = widget
        .borrow()
        .check_host(ctx.untrusted_host.as_deref(), ctx.site_name.as_deref())
    {
        this.borrow_mut().fail_widget(e);
        return;
    }

    if !widget.borrow().has_default_view() {
        let view_name = widget.borrow().from_template.view_name.clone();
        this.borrow_mut().fail_widget(WidgetError::new(
            WidgetErrorCode::NoSuchView,
            format!("no such view: {}", view_name.unwrap_or_default()),
        ));
        return;
    }

    /* session sync */

    if widget.borrow().session_sync_pending {
        let synced = ctx
            .with_realm_session(|realm| {
                widget::load_from_session(&widget, realm);
            })
            .is_some();
        if !synced {
            widget.borrow_mut().session_sync_pending = false;
        }
    }

    /* the header timeout runs until the response status arrives */

    {
        let weak = Rc::downgrade(this);
        let timer = TimerEvent::new(&ctx.event_loop, move || {
            if let Some(this) = weak.upgrade() {
                let mut i = this.borrow_mut();
                i.cancel.cancel();
                i.widget.borrow_mut().cancel();
                i.fail(StreamError::new(TimeoutError("header timeout")));
            }
        });
        timer.schedule(INLINE_WIDGET_HEADER_TIMEOUT);
        this.borrow_mut().header_timer = Some(timer);
    }

    let handler = Box::new(InlineResponseHandler {
        inline: Rc::clone(this),
    });

    let mut cancel = CancellablePointer::new();
    widget_http_request(&ctx, &widget, handler, &mut cancel);
    if let Some(c) = cancel.take() {
        this.borrow_mut().cancel.set(c);
    }
}

struct InlineResponseHandler {
    inline: Rc<RefCell<InlineWidget>>,
}

impl HttpResponseHandler for InlineResponseHandler {
    fn on_response(
        self: Box<Self>,
        status: StatusCode,
        headers: HeaderMap,
        body: Option<BoxIstream>,
    ) {
        let mut i = self.inline.borrow_mut();
        i.header_timer = None;
        i.cancel.clear();

        if !status.is_success() {
            /* don't embed a failed widget into the template */
            let error = WidgetError::new(
                WidgetErrorCode::Unspecified,
                format!("response status {}", status.as_u16()),
            );
            let widget = Rc::clone(&i.widget);
            widget.borrow_mut().cancel();
            i.fail(StreamError::new(error));
            return;
        }

        match body {
            Some(body) => {
                let widget = Rc::clone(&i.widget);
                let plain_text = i.plain_text;
                match widget_response_format(&widget, &headers, body, plain_text) {
                    Ok(body) => {
                        i.done = true;
                        i.job = None;
                        i.control.set(body);
                    }
                    Err(e) => i.fail(StreamError::new(e)),
                }
            }
            None => {
                i.done = true;
                i.job = None;
                i.control.set_eof();
            }
        }
    }

    fn on_error(self: Box<Self>, error: StreamError) {
        let mut i = self.inline.borrow_mut();
        i.header_timer = None;
        i.cancel.clear();
        i.fail(error);
    }
}

/// Embed a widget into its parent's stream.  The returned istream is
/// immediately usable; the widget response fills it in later.
/// Errors are *not* propagated into the template: the caller wraps
/// this into a catch istream that logs and leaves the slot empty.
pub fn embed_inline_widget(
    ctx: &Rc<WidgetContext>,
    widget: &WidgetRef,
    plain_text: bool,
) -> BoxIstream {
    let (delayed, control) = new_delayed();

    let parent = widget
        .borrow()
        .parent
        .upgrade()
        .expect("inline widget without a parent");

    let inline = Rc::new(RefCell::new(InlineWidget {
        ctx: Rc::clone(ctx),
        widget: Rc::clone(widget),
        plain_text,
        control: control.clone(),
        header_timer: None,
        job: None,
        cancel: CancellablePointer::new(),
        done: false,
    }));

    /* the delayed istream's cancel slot keeps this object alive
       until the response arrives; dropping the istream cancels
       everything */
    {
        let inline = Rc::clone(&inline);
        control.set_cancel(move || {
            let mut i = inline.borrow_mut();
            i.done = true;
            i.header_timer = None;
            i.job = None;
            i.cancel.cancel();
            i.widget.borrow_mut().cancel();
        });
    }

    let need_resolver = widget.borrow().cls.is_none();

    /* throttle: no backend request before the queue grants a slot */
    let queue = child_throttler(ctx, &parent);
    let job = {
        let weak = Rc::downgrade(&inline);
        queue.schedule(Box::new(move || {
            if let Some(inline) = weak.upgrade() {
                let resolved = inline.borrow().widget.borrow().cls.is_some();
                let done = inline.borrow().done;
                if resolved && !done {
                    send_request(&inline);
                }
            }
        }))
    };
    inline.borrow_mut().job = Some(job);

    if need_resolver {
        let registry = match &ctx.widget_registry {
            Some(registry) => Rc::clone(registry),
            None => {
                inline.borrow_mut().fail(StreamError::new(WidgetError::new(
                    WidgetErrorCode::Unspecified,
                    "no widget registry",
                )));
                return wrap_timeout(ctx, delayed);
            }
        };

        let weak = Rc::downgrade(&inline);
        let mut cancel = CancellablePointer::new();
        resolve_widget(
            widget,
            &registry,
            Box::new(move || {
                let Some(inline) = weak.upgrade() else { return };

                let resolved = inline.borrow().widget.borrow().cls.is_some();
                if resolved {
                    let throttled = inline
                        .borrow()
                        .job
                        .as_ref()
                        .map(|j| j.is_running())
                        .unwrap_or(false);
                    if throttled {
                        send_request(&inline);
                    }
                } else {
                    let widget = Rc::clone(&inline.borrow().widget);
                    widget.borrow_mut().cancel();
                    inline.borrow_mut().fail(StreamError::new(WidgetError::new(
                        WidgetErrorCode::Unspecified,
                        "failed to look up widget class",
                    )));
                }
            }),
            &mut cancel,
        );
        if let Some(c) = cancel.take() {
            let mut i = inline.borrow_mut();
            if !i.done {
                i.cancel.set(c);
            }
        }
    }

    wrap_timeout(ctx, delayed)
}

fn wrap_timeout(ctx: &Rc<WidgetContext>, delayed: stream::DelayedIstream) -> BoxIstream {
    Box::new(TimeoutIstream::new(
        &ctx.event_loop,
        Box::new(delayed),
        INLINE_WIDGET_BODY_TIMEOUT,
    ))
}
