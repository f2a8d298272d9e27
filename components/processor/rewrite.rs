/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Widget URI rewriting: maps a relative URI found in a template to
//! the focus/partial/direct address of the widget, including the
//! untrusted-host family of authority rewrites.  When the widget
//! class is not resolved yet, the rewritten value is produced
//! asynchronously through a delayed istream.

use std::rc::Rc;

use log::debug;
use markup::escape::EscapeClass;
use socket::timeout::TimeoutIstream;
use stream::cancellable::CancellablePointer;
use stream::istream::BoxIstream;
use stream::{istream_memory, istream_null, istream_string, new_delayed};
use widget::uri::{
    uri_add_prefix, uri_add_raw_site_suffix, uri_add_site_suffix, uri_has_authority,
    uri_replace_hostname,
};
use widget::{WidgetContext, WidgetRef, resolve_widget};

use crate::inline::{INLINE_WIDGET_BODY_TIMEOUT, embed_inline_widget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteUriMode {
    /// Browser contacts the widget server directly.
    Direct,
    /// External template URI with `focus=`.
    Focus,
    /// Like focus, plus `frame=` for partial rendering.
    Partial,
    /// Substitute the widget's inline response for the URI.
    Response,
}

pub fn parse_uri_mode(s: &[u8]) -> RewriteUriMode {
    match s {
        b"direct" => RewriteUriMode::Direct,
        b"focus" => RewriteUriMode::Focus,
        b"partial" => RewriteUriMode::Partial,
        b"response" => RewriteUriMode::Response,
        _ => RewriteUriMode::Partial,
    }
}

/// The synchronous core: requires a resolved class.  Returns `None`
/// when the URI cannot (or need not) be rewritten.
fn do_rewrite_widget_uri(
    ctx: &WidgetContext,
    widget: &WidgetRef,
    value: &str,
    mode: RewriteUriMode,
    stateful: bool,
    view: Option<&str>,
) -> Option<String> {
    let w = widget.borrow();
    let cls = w.cls.as_ref()?;

    if let Some(local_uri) = &cls.local_uri {
        if let Some(suffix) = value.strip_prefix("@/") {
            /* relative to the widget's "local URI" */
            return Some(format!("{}{}", local_uri, suffix));
        }
    }

    let frame: Option<String>;

    let uri = match mode {
        RewriteUriMode::Direct => {
            let address_view = w.get_address_view()?;
            if !address_view.address.is_http() {
                /* the browser can only contact HTTP widgets
                   directly */
                return None;
            }

            return w.absolute_uri(stateful, Some(value));
        }

        RewriteUriMode::Focus => {
            frame = ctx.args_get("frame").map(str::to_string);
            w.external_uri(
                &ctx.external_base_uri,
                ctx.args.as_ref(),
                stateful,
                Some(value),
                frame.as_deref(),
                view,
            )
        }

        RewriteUriMode::Partial => {
            let id_path = w.get_id_path()?;
            if id_path.is_empty() {
                /* no widget path available, "frame=" not possible */
                return None;
            }
            frame = Some(id_path.to_string());
            w.external_uri(
                &ctx.external_base_uri,
                ctx.args.as_ref(),
                stateful,
                Some(value),
                frame.as_deref(),
                view,
            )
        }

        RewriteUriMode::Response => unreachable!("handled by the caller"),
    };

    let Some(uri) = uri else {
        if w.id.is_none() {
            debug!("cannot rewrite URI: no widget id");
        } else if w.get_id_path().is_none() {
            debug!("cannot rewrite URI: broken widget id chain");
        } else {
            debug!("base mismatch: {}", value);
        }
        return None;
    };

    /* untrusted-host post-processing */

    let uri = if let Some(untrusted_host) = &cls.untrusted_host {
        if ctx.untrusted_host.as_deref() != Some(untrusted_host.as_str()) {
            uri_replace_hostname(&uri, untrusted_host)
        } else {
            uri
        }
    } else if let Some(untrusted_prefix) = &cls.untrusted_prefix {
        uri_add_prefix(
            &uri,
            ctx.absolute_uri.as_deref(),
            ctx.untrusted_host.as_deref(),
            untrusted_prefix,
        )
    } else if let Some(suffix) = &cls.untrusted_site_suffix {
        uri_add_site_suffix(
            &uri,
            ctx.site_name.as_deref(),
            ctx.untrusted_host.as_deref(),
            suffix,
        )
    } else if let Some(suffix) = &cls.untrusted_raw_site_suffix {
        uri_add_raw_site_suffix(
            &uri,
            ctx.site_name.as_deref(),
            ctx.untrusted_host.as_deref(),
            suffix,
        )
    } else {
        uri
    };

    Some(uri)
}

/// Rewrite `value` for `widget`; returns `None` when the attribute
/// should be left alone.  `escape` is the context's escape rule,
/// applied to the output (and undone on the input when necessary).
pub fn rewrite_widget_uri(
    ctx: &Rc<WidgetContext>,
    widget: &WidgetRef,
    value: &[u8],
    mode: RewriteUriMode,
    stateful: bool,
    view: Option<&str>,
    escape: EscapeClass,
) -> Option<BoxIstream> {
    let value_str = String::from_utf8_lossy(value).into_owned();

    if uri_has_authority(&value_str) {
        /* can't rewrite absolute URIs */
        return None;
    }

    if mode == RewriteUriMode::Response {
        let istream = embed_inline_widget(ctx, widget, true);
        return Some(Box::new(markup::escape::EscapeIstream::new(
            istream, escape,
        )));
    }

    if widget.borrow().cls.is_some() {
        if !widget.borrow().has_default_view() {
            /* refuse to rewrite URIs when an invalid view name was
               specified */
            return None;
        }

        let unescaped = if escape.unescape_find(value) {
            String::from_utf8_lossy(&escape.unescape(value)).into_owned()
        } else {
            value_str
        };

        let uri = do_rewrite_widget_uri(ctx, widget, &unescaped, mode, stateful, view)?;

        let istream = istream_string(uri);
        Some(Box::new(markup::escape::EscapeIstream::new(
            istream, escape,
        )))
    } else {
        /* unresolved class: resolve first, deliver the value through
           a delayed istream */
        let (delayed, control) = new_delayed();

        let ctx2 = Rc::clone(ctx);
        let widget2 = Rc::clone(widget);
        let value2 = value.to_vec();
        let view2 = view.map(str::to_string);

        let registry = ctx
            .widget_registry
            .clone()
            .expect("rewrite without a registry");

        let control2 = control.clone();
        let mut resolver_cancel = CancellablePointer::new();
        resolve_widget(
            widget,
            &registry,
            Box::new(move || {
                let mut escape_flag = false;
                let mut out = String::from_utf8_lossy(&value2).into_owned();

                if widget2.borrow().cls.is_some() && widget2.borrow().has_default_view() {
                    if widget2.borrow().session_sync_pending {
                        let synced = ctx2
                            .with_realm_session(|realm| {
                                widget::load_from_session(&widget2, realm);
                            })
                            .is_some();
                        if !synced {
                            widget2.borrow_mut().session_sync_pending = false;
                        }
                    }

                    let unescaped = if escape.unescape_find(out.as_bytes()) {
                        String::from_utf8_lossy(&escape.unescape(out.as_bytes())).into_owned()
                    } else {
                        out.clone()
                    };

                    if let Some(uri) =
                        do_rewrite_widget_uri(&ctx2, &widget2, &unescaped, mode, stateful,
                                              view2.as_deref())
                    {
                        out = uri;
                        escape_flag = true;
                    }
                }

                if out.is_empty() {
                    control2.set(istream_null());
                } else if escape_flag {
                    control2.set(Box::new(markup::escape::EscapeIstream::new(
                        istream_string(out),
                        escape,
                    )));
                } else {
                    control2.set(istream_memory(out.into_bytes()));
                }
            }),
            &mut resolver_cancel,
        );

        /* abandoning the attribute stream must release the pending
           resolution */
        if let Some(c) = resolver_cancel.take() {
            control.set_cancel(move || c.borrow_mut().cancel());
        }

        let timeout = TimeoutIstream::new(
            &ctx.event_loop,
            Box::new(delayed),
            INLINE_WIDGET_BODY_TIMEOUT,
        );
        Some(Box::new(timeout))
    }
}
