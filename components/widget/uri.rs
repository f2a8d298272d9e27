/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The widget URI algebra: the absolute address a widget's server
//! sees, the relative form used in `path=` arguments, and the
//! external URI the browser navigates to (focus/partial modes).

use crate::args::{Args, args_escape, args_format};
use crate::Widget;

/// Does the URI carry an authority (`scheme://host` or `//host`)?
pub fn uri_has_authority(uri: &str) -> bool {
    if uri.starts_with("//") {
        return true;
    }

    if let Some(colon) = uri.find(':') {
        let scheme = &uri[..colon];
        if !scheme.is_empty()
            && scheme
                .bytes()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, b'+' | b'-' | b'.'))
            && uri[colon + 1..].starts_with("//")
        {
            return true;
        }
    }

    false
}

/// The host-and-port part of an absolute or scheme-relative URI.
pub fn uri_host_and_port(uri: &str) -> Option<(usize, usize)> {
    let after_scheme = if let Some(rest) = uri.strip_prefix("//") {
        (2, rest)
    } else if let Some(pos) = uri.find("://") {
        (pos + 3, &uri[pos + 3..])
    } else {
        return None;
    };

    let (start, rest) = after_scheme;
    let end = start
        + rest
            .find(|ch| ch == '/' || ch == '?' || ch == '#')
            .unwrap_or(rest.len());
    Some((start, end))
}

/// The path-query-fragment suffix of a URI, when it has an absolute
/// path.
pub fn uri_path_query_fragment(uri: &str) -> Option<&str> {
    if uri.starts_with('/') && !uri.starts_with("//") {
        return Some(uri);
    }

    let (_, host_end) = uri_host_and_port(uri)?;
    let suffix = &uri[host_end..];
    if suffix.starts_with('/') {
        Some(suffix)
    } else {
        None
    }
}

/// Remove "./" and "a/../" segments.
fn uri_compress(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing_slash = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&segments.join("/"));
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Resolve `relative` against `base` (a path).  An absolute
/// `relative` replaces the whole path; otherwise it replaces the
/// last segment.
fn uri_resolve(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        return base.to_string();
    }

    if relative.starts_with('/') {
        return uri_compress(relative);
    }

    let dir = match base.rfind('/') {
        Some(pos) => &base[..pos + 1],
        None => "/",
    };

    uri_compress(&format!("{}{}", dir, relative))
}

/// Split `uri` into (path, query-with-question-mark).
fn split_query(uri: &str) -> (&str, Option<&str>) {
    match uri.find('?') {
        Some(pos) => (&uri[..pos], Some(&uri[pos..])),
        None => (uri, None),
    }
}

fn combine_query(a: Option<&str>, b: Option<&str>) -> Option<String> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (Some(a), Some(b)) => Some(format!("{}&{}", a, b)),
    }
}

impl Widget {
    /// The base path of the widget's server address (no path_info,
    /// no query).
    fn address_base_path(&self) -> Option<String> {
        let view = self.get_address_view()?;
        view.address.base_path().map(str::to_string)
    }

    /// The widget's effective query string: template query string
    /// plus, when stateful, the one from the request/session.
    fn effective_query_string(&self, stateful: bool) -> Option<String> {
        let template = self.from_template.query_string.as_deref();
        let request = if stateful {
            self.from_request
                .query_string
                .as_deref()
                .filter(|s| !s.is_empty())
        } else {
            None
        };
        combine_query(template, request)
    }

    /// The absolute URI of the widget address (scheme, host, path
    /// incl. path_info and query string), with `relative` applied.
    /// Only possible for HTTP backends.
    pub fn absolute_uri(&self, stateful: bool, relative: Option<&str>) -> Option<String> {
        let view = self.get_address_view()?;
        let http = match &view.address {
            crate::ResourceAddress::Http(a) => a,
            _ => return None,
        };

        let base_path = format!("{}{}", http.path, self.get_path_info(stateful));
        let query = self.effective_query_string(stateful);

        let (path, extra_query) = match relative {
            None | Some("") => (uri_compress(&base_path), None),
            Some(relative) if relative.starts_with('?') => {
                (uri_compress(&base_path), Some(&relative[1..]))
            }
            Some(relative) => {
                let (rel_path, rel_query) = split_query(relative);
                (
                    uri_resolve(&base_path, rel_path),
                    rel_query.map(|q| &q[1..]),
                )
            }
        };

        let query = combine_query(query.as_deref(), extra_query);

        let mut uri = format!("{}://{}{}", http.scheme(), http.host_and_port, path);
        if let Some(query) = query {
            uri.push('?');
            uri.push_str(&query);
        }
        Some(uri)
    }

    /// The URI relative to the widget base address, for `path=`
    /// arguments.  `None` when `relative` escapes the widget's base
    /// (base mismatch).
    pub fn relative_uri(&self, stateful: bool, relative: &str) -> Option<String> {
        let base_path = self.address_base_path()?;

        let (rel_path, _) = split_query(relative);
        let full = if rel_path.starts_with('/') {
            uri_compress(rel_path)
        } else {
            uri_resolve(
                &format!("{}{}", base_path, self.get_path_info(stateful)),
                rel_path,
            )
        };

        full.strip_prefix(&base_path).map(str::to_string)
    }

    /// The external URI the browser uses to address this widget
    /// through the outer template, with focus/path/frame/view
    /// semicolon arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn external_uri(
        &self,
        external_base_uri: &str,
        args: Option<&Args>,
        stateful: bool,
        relative: Option<&str>,
        frame: Option<&str>,
        view: Option<&str>,
    ) -> Option<String> {
        let id_path = match self.get_id_path() {
            Some(p) if !p.is_empty() => p,
            _ => return None,
        };

        let (path_arg, query): (Option<String>, Option<String>) = match relative {
            None => (None, None),
            Some("") => {
                /* an empty URI re-addresses the current widget page,
                   so the request's query string survives */
                let rel = self.relative_uri(stateful, "")?;
                let query = if stateful {
                    self.from_request
                        .query_string
                        .as_deref()
                        .filter(|s| !s.is_empty())
                        .map(|q| format!("?{}", q))
                } else {
                    None
                };
                (Some(args_escape(&rel)), query)
            }
            Some(relative) => {
                let (_, query) = split_query(relative);
                let rel = self.relative_uri(stateful, relative)?;
                (Some(args_escape(&rel)), query.map(str::to_string))
            }
        };

        let formatted = args_format(
            args,
            &[
                ("focus", Some(id_path)),
                ("path", path_arg.as_deref()),
                ("frame", frame),
                ("view", view),
            ],
        );

        let mut uri =
            String::with_capacity(external_base_uri.len() + 1 + formatted.len() + 16);
        uri.push_str(external_base_uri);
        uri.push(';');
        uri.push_str(&formatted);
        if let Some(query) = query {
            uri.push_str(&query);
        }
        Some(uri)
    }
}

/// Replace the authority of `uri` with `hostname` (untrusted-host
/// rewrite).
pub fn uri_replace_hostname(uri: &str, hostname: &str) -> String {
    match uri_host_and_port(uri) {
        None => {
            if uri.starts_with('/') {
                format!("//{}{}", hostname, uri)
            } else {
                uri.to_string()
            }
        }
        Some((start, end)) => {
            let old_host = &uri[start..end];
            let host_end = start
                + old_host
                    .find(':')
                    .unwrap_or(old_host.len());
            format!("{}{}{}", &uri[..start], hostname, &uri[host_end..])
        }
    }
}

/// Insert `<prefix>.` before the authority (untrusted-prefix
/// rewrite).
pub fn uri_add_prefix(
    uri: &str,
    absolute_uri: Option<&str>,
    untrusted_host: Option<&str>,
    untrusted_prefix: &str,
) -> String {
    if untrusted_host.is_some() {
        /* already on an untrusted host */
        return uri.to_string();
    }

    if uri.starts_with('/') && !uri.starts_with("//") {
        let Some(absolute_uri) = absolute_uri else {
            return uri.to_string();
        };
        let Some((start, end)) = uri_host_and_port(absolute_uri) else {
            return uri.to_string();
        };
        return format!(
            "{}{}.{}{}",
            &absolute_uri[..start],
            untrusted_prefix,
            &absolute_uri[start..end],
            uri
        );
    }

    match uri_host_and_port(uri) {
        Some((start, end)) => format!(
            "{}{}.{}{}",
            &uri[..start],
            untrusted_prefix,
            &uri[start..end],
            &uri[end..]
        ),
        None => uri.to_string(),
    }
}

/// Produce `//<site>.<suffix><path>` (untrusted-site-suffix
/// rewrite).
pub fn uri_add_site_suffix(
    uri: &str,
    site_name: Option<&str>,
    untrusted_host: Option<&str>,
    untrusted_site_suffix: &str,
) -> String {
    if untrusted_host.is_some() {
        return uri.to_string();
    }

    let Some(site_name) = site_name else {
        return uri.to_string();
    };

    let Some(path) = uri_path_query_fragment(uri) else {
        return uri.to_string();
    };

    format!("//{}.{}{}", site_name, untrusted_site_suffix, path)
}

/// Produce `//<site><suffix><path>` (raw variant, no dot).
pub fn uri_add_raw_site_suffix(
    uri: &str,
    site_name: Option<&str>,
    untrusted_host: Option<&str>,
    untrusted_raw_site_suffix: &str,
) -> String {
    if untrusted_host.is_some() {
        return uri.to_string();
    }

    let Some(site_name) = site_name else {
        return uri.to_string();
    };

    let Some(path) = uri_path_query_fragment(uri) else {
        return uri.to_string();
    };

    format!("//{}{}{}", site_name, untrusted_raw_site_suffix, path)
}
