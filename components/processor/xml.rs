/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The XML/HTML template processor: rewrites URIs in well-known
//! attributes, expands `<c:widget>` elements into inline widget
//! responses, prefixes class/id names, and routes `<style>` contents
//! through the CSS processor.  Everything happens on the fly through
//! a [`ReplaceIstream`].

use std::cell::RefCell;
use std::rc::Rc;

use http::header::{CONTENT_TYPE, HeaderMap};
use log::debug;
use markup::escape::{EscapeClass, EscapeIstream};
use markup::syntax::{is_underscore_prefix, is_whitespace_or_null, underscore_prefix};
use markup::xml::{
    XmlParser, XmlParserAttribute, XmlParserHandler, XmlParserTag, XmlTagType,
};
use stream::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};
use stream::replace::{ReplaceCore, ReplaceIstream, ReplaceParser};
use stream::{CatchIstream, ConcatIstream, istream_memory, istream_string};
use widget::approval::init_approval;
use widget::error::{WidgetError, WidgetErrorCode};
use widget::uri::uri_has_authority;
use widget::{Display, WidgetContext, WidgetRef};

use crate::container::CurrentWidget;
use crate::css::css_processor;
use crate::inline::embed_inline_widget;
use crate::rewrite::{RewriteUriMode, parse_uri_mode, rewrite_widget_uri};
use crate::text::text_processor;
use crate::{CssProcessorOptions, ProcessorOptions};

/// Can this response be fed into the processor?
pub fn processable(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let Ok(content_type) = content_type.parse::<mime::Mime>() else {
        return false;
    };

    let ty = content_type.type_();
    let subtype = content_type.subtype();

    (ty == mime::TEXT && (subtype == "html" || subtype == "xml"))
        || (ty == mime::APPLICATION && subtype == "xml")
        || (ty == mime::APPLICATION
            && subtype == "xhtml"
            && content_type.suffix().map(|s| s.as_str()) == Some("xml"))
}

/// Process a template document: expand text entities, then run the
/// XML processor over it.
pub fn processor_process(
    input: BoxIstream,
    widget: &WidgetRef,
    ctx: &Rc<WidgetContext>,
    options: ProcessorOptions,
) -> BoxIstream {
    let input = text_processor(input, widget, ctx);

    Box::new(ReplaceIstream::new(
        input,
        XmlProcessorParser {
            parser: XmlParser::new(),
            state: ProcState::new(Rc::clone(widget), Rc::clone(ctx), options),
        },
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    None_,
    Ignore,
    Other,
    Widget,
    WidgetPathInfo,
    WidgetParam,
    WidgetHeader,
    WidgetView,
    A,
    Form,
    Img,
    Script,
    Param,
    RewriteUri,
    /// May morph into MetaRefresh/MetaUriContent when the matching
    /// attribute arrives.
    Meta,
    MetaRefresh,
    MetaUriContent,
    Style,
    /// CDATA is currently being fed into the CSS processor.
    StyleProcess,
}

fn is_link(tag: Tag) -> bool {
    matches!(
        tag,
        Tag::A
            | Tag::Form
            | Tag::Img
            | Tag::Script
            | Tag::Meta
            | Tag::MetaRefresh
            | Tag::MetaUriContent
            | Tag::Param
            | Tag::RewriteUri
    )
}

fn is_html(tag: Tag) -> bool {
    tag == Tag::Other || (is_link(tag) && tag != Tag::RewriteUri)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UriBase {
    Template,
    Widget,
    Child,
    Parent,
}

fn parse_uri_base(s: &[u8]) -> UriBase {
    match s {
        b"widget" => UriBase::Widget,
        b"child" => UriBase::Child,
        b"parent" => UriBase::Parent,
        _ => UriBase::Template,
    }
}

#[derive(Clone)]
pub(crate) struct UriRewrite {
    base: UriBase,
    mode: RewriteUriMode,
    view: Option<String>,
}

const MAX_POSTPONED_DELETES: usize = 4;

/// c:mode/c:base may appear before or after the URI attribute;
/// the rewrite is committed at tag end, and `c:*` attributes that
/// followed the URI attribute are deleted retroactively.
struct PostponedRewrite {
    pending: bool,
    uri_start: u64,
    uri_end: u64,
    value: Vec<u8>,
    deletes: Vec<(u64, u64)>,
}

/// Channel between the XML processor's CDATA events and the CSS
/// processor's input istream.
pub(crate) struct CdataChannel {
    buffer: Vec<u8>,
    pos: usize,
    eof: bool,
}

pub(crate) struct CdataSource {
    channel: Rc<RefCell<CdataChannel>>,
}

impl Istream for CdataSource {
    fn available(&self, partial: bool) -> Available {
        let channel = self.channel.borrow();
        if channel.eof || partial {
            Available::Exact((channel.buffer.len() - channel.pos) as u64)
        } else {
            Available::Unknown
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let mut channel = self.channel.borrow_mut();

        if channel.pos < channel.buffer.len() {
            let n = handler.on_data(&channel.buffer[channel.pos..]);
            if n == 0 {
                return ReadResult::Blocked;
            }
            channel.pos += n;
            if channel.pos == channel.buffer.len() {
                channel.buffer.clear();
                channel.pos = 0;
            }
            return ReadResult::Progress;
        }

        if channel.eof {
            drop(channel);
            handler.on_eof();
            return ReadResult::Eof;
        }

        ReadResult::Blocked
    }
}

pub(crate) struct ProcState {
    pub(crate) container: WidgetRef,
    pub(crate) ctx: Rc<WidgetContext>,
    pub(crate) options: ProcessorOptions,

    pub(crate) tag: Tag,

    uri_rewrite: UriRewrite,
    default_uri_rewrite: UriRewrite,
    postponed: PostponedRewrite,

    pub(crate) cwidget: CurrentWidget,

    /// Active `<style>` CDATA routing: the channel and the input
    /// offset where the CSS substitution started.
    cdata: Option<(Rc<RefCell<CdataChannel>>, u64)>,

    /// Tell the tokenizer to enter SCRIPT mode after this tag.
    enter_script: bool,
}

struct XmlProcessorParser {
    parser: XmlParser,
    state: ProcState,
}

impl ReplaceParser for XmlProcessorParser {
    fn parse(&mut self, core: &mut ReplaceCore, data: &[u8]) -> usize {
        let mut sink = Sink {
            core,
            state: &mut self.state,
        };
        self.parser.feed(data, &mut sink)
    }

    fn parse_end(&mut self, core: &mut ReplaceCore) {
        self.state.stop_cdata();

        /* the request body could not be submitted to the focused
           widget because we never found it; dispose it now */
        self.state.container.borrow_mut().discard_for_focused();

        core.finish();
    }
}

struct Sink<'a> {
    core: &'a mut ReplaceCore,
    state: &'a mut ProcState,
}

impl XmlParserHandler for Sink<'_> {
    fn on_tag_start(&mut self, tag: &XmlParserTag<'_>) -> bool {
        self.state.on_tag_start(tag)
    }

    fn on_tag_finished(&mut self, tag: &XmlParserTag<'_>) -> bool {
        self.state.on_tag_finished(self.core, tag)
    }

    fn enter_script_after_tag(&mut self) -> bool {
        std::mem::take(&mut self.state.enter_script)
    }

    fn on_attribute_finished(&mut self, attr: &XmlParserAttribute<'_>) {
        self.state.on_attribute_finished(self.core, attr)
    }

    fn on_cdata(&mut self, text: &[u8], _escaped: bool, start: u64) -> usize {
        self.state.on_cdata(self.core, text, start)
    }
}

/// Is this URI eligible for rewriting at all?  `rewrite_empty` is
/// only true for form actions.
fn can_rewrite_uri(uri: &[u8], rewrite_empty: bool) -> bool {
    if uri.is_empty() {
        /* an empty URI is a reference to the current document */
        return rewrite_empty;
    }

    if uri[0] == b'#' {
        /* URI fragments cannot be rewritten */
        return false;
    }

    if uri.starts_with(b"data:") || uri.starts_with(b"mailto:") || uri.starts_with(b"javascript:")
    {
        return false;
    }

    if uri_has_authority(&String::from_utf8_lossy(uri)) {
        /* absolute URIs stay as they are */
        return false;
    }

    true
}

fn find_underscore(value: &[u8], mut start: usize) -> Option<usize> {
    if start >= value.len() {
        return None;
    }

    if is_underscore_prefix(&value[start..]) {
        return Some(start);
    }

    loop {
        let rel = value[start + 1..].iter().position(|&ch| ch == b'_')?;
        let pos = start + 1 + rel;

        if is_whitespace_or_null(value[pos - 1]) && is_underscore_prefix(&value[pos..]) {
            return Some(pos);
        }

        start = pos;
    }
}

impl ProcState {
    fn new(container: WidgetRef, ctx: Rc<WidgetContext>, options: ProcessorOptions) -> ProcState {
        let mut default_uri_rewrite = UriRewrite {
            base: UriBase::Template,
            mode: RewriteUriMode::Partial,
            view: None,
        };

        if options.contains(ProcessorOptions::REWRITE_URL)
            && options.contains(ProcessorOptions::FOCUS_WIDGET)
        {
            default_uri_rewrite.base = UriBase::Widget;
            default_uri_rewrite.mode = RewriteUriMode::Focus;
        }

        ProcState {
            container,
            ctx,
            options,
            tag: Tag::None_,
            uri_rewrite: default_uri_rewrite.clone(),
            default_uri_rewrite,
            postponed: PostponedRewrite {
                pending: false,
                uri_start: 0,
                uri_end: 0,
                value: Vec::new(),
                deletes: Vec::new(),
            },
            cwidget: CurrentWidget::new(),
            cdata: None,
            enter_script: false,
        }
    }

    fn rewrite_enabled(&self) -> bool {
        self.options.contains(ProcessorOptions::REWRITE_URL)
    }

    fn prefix_class_enabled(&self) -> bool {
        self.options.contains(ProcessorOptions::PREFIX_CSS_CLASS)
    }

    fn prefix_id_enabled(&self) -> bool {
        self.options.contains(ProcessorOptions::PREFIX_XML_ID)
    }

    fn prefix_any_enabled(&self) -> bool {
        self.prefix_class_enabled() || self.prefix_id_enabled()
    }

    fn style_enabled(&self) -> bool {
        self.options.contains(ProcessorOptions::STYLE)
    }

    fn must_rewrite_empty_uri(&self) -> bool {
        self.tag == Tag::Form
    }

    fn init_uri_rewrite(&mut self, tag: Tag) {
        debug_assert!(!self.postponed.pending);

        self.tag = tag;
        self.uri_rewrite = self.default_uri_rewrite.clone();
    }

    /* CDATA routing into the CSS processor */

    pub(crate) fn stop_cdata(&mut self) {
        if self.tag != Tag::StyleProcess {
            return;
        }

        if let Some((channel, _)) = &self.cdata {
            channel.borrow_mut().eof = true;
        }
        self.cdata = None;
        self.tag = Tag::Style;
    }

    /* parser callbacks */

    fn on_processing_instruction(&mut self, name: &str) -> bool {
        if self.rewrite_enabled() && name == "cm4all-rewrite-uri" {
            self.init_uri_rewrite(Tag::RewriteUri);
            return true;
        }

        false
    }

    fn on_tag_start(&mut self, xml_tag: &XmlParserTag<'_>) -> bool {
        self.stop_cdata();

        if self.tag == Tag::Script && !xml_tag.name.eq_ignore_ascii_case("script") {
            /* workaround for bugged scripts: ignore all closing tags
               except </SCRIPT> */
            return false;
        }

        self.tag = Tag::Ignore;

        if xml_tag.tag_type == XmlTagType::Pi {
            return self.on_processing_instruction(xml_tag.name);
        }

        if self.cwidget.widget.is_some() {
            return self.on_start_element_in_widget(xml_tag.tag_type, xml_tag.name);
        }

        if self.on_tag_start2(xml_tag) {
            return true;
        }

        if xml_tag.name == "c:widget" {
            if !self.options.contains(ProcessorOptions::CONTAINER)
                || self.ctx.widget_registry.is_none()
            {
                return false;
            }

            if xml_tag.tag_type == XmlTagType::Close {
                debug_assert!(self.cwidget.widget.is_none());
                return false;
            }

            self.start_widget_element();
            return true;
        }

        false
    }

    /// The processor's own tag classification (before the container
    /// parser gets a chance).
    fn on_tag_start2(&mut self, xml_tag: &XmlParserTag<'_>) -> bool {
        let name = xml_tag.name;

        if name.eq_ignore_ascii_case("script") {
            self.init_uri_rewrite(Tag::Script);
            return true;
        }

        if name == "c:widget" {
            /* handled by the container logic */
            return false;
        }

        if self.style_enabled() && name.eq_ignore_ascii_case("style") {
            self.tag = Tag::Style;
            return true;
        }

        if self.rewrite_enabled() {
            if name.eq_ignore_ascii_case("a") || name.eq_ignore_ascii_case("link") {
                /* "link" is not an anchor, but only its HREF
                   interests us */
                self.init_uri_rewrite(Tag::A);
                return true;
            }
            if name.eq_ignore_ascii_case("form") {
                self.init_uri_rewrite(Tag::Form);
                return true;
            }
            if name.eq_ignore_ascii_case("img")
                || name.eq_ignore_ascii_case("iframe")
                || name.eq_ignore_ascii_case("embed")
                || name.eq_ignore_ascii_case("video")
                || name.eq_ignore_ascii_case("audio")
            {
                self.init_uri_rewrite(Tag::Img);
                return true;
            }
            if name.eq_ignore_ascii_case("param") {
                self.init_uri_rewrite(Tag::Param);
                return true;
            }
            if name.eq_ignore_ascii_case("meta") {
                self.init_uri_rewrite(Tag::Meta);
                return true;
            }
            if self.prefix_any_enabled() {
                self.tag = Tag::Other;
                return true;
            }

            self.tag = Tag::Ignore;
            return false;
        }

        if self.prefix_any_enabled() {
            self.tag = Tag::Other;
            return true;
        }

        false
    }

    /* URI rewrite bookkeeping */

    fn postpone_uri_rewrite(&mut self, start: u64, end: u64, value: &[u8]) {
        debug_assert!(start <= end);

        if self.postponed.pending {
            /* no more than one attribute per element */
            return;
        }

        if !can_rewrite_uri(value, self.must_rewrite_empty_uri()) {
            return;
        }

        self.postponed.uri_start = start;
        self.postponed.uri_end = end;
        self.postponed.value = value.to_vec();
        self.postponed.deletes.clear();
        self.postponed.pending = true;
    }

    fn postpone_refresh_rewrite(&mut self, attr: &XmlParserAttribute<'_>) {
        let Some(semi) = attr.value.iter().position(|&ch| ch == b';') else {
            return;
        };
        let p = &attr.value[semi + 1..];
        if p.len() < 7 || !p.starts_with(b"URL='") || !p.ends_with(b"'") {
            return;
        }

        let inner = &p[5..p.len() - 1];
        let delta = (semi + 1 + 5) as u64;

        self.postpone_uri_rewrite(
            attr.value_start + delta,
            attr.value_start + delta + inner.len() as u64,
            inner,
        );
    }

    fn delete_uri_rewrite(&mut self, core: &mut ReplaceCore, start: u64, end: u64) {
        if !self.postponed.pending {
            /* no URI attribute found yet: delete right away */
            core.add(start, end, None);
            return;
        }

        if self.postponed.deletes.len() < MAX_POSTPONED_DELETES {
            /* delete after the URI attribute has been replaced */
            self.postponed.deletes.push((start, end));
        }
    }

    fn commit_uri_rewrite(&mut self, core: &mut ReplaceCore) {
        debug_assert!(self.postponed.pending);
        self.postponed.pending = false;

        let value = std::mem::take(&mut self.postponed.value);
        let (start, end) = (self.postponed.uri_start, self.postponed.uri_end);
        let rewrite = self.uri_rewrite.clone();

        self.transform_uri_attribute(core, start, end, &value, rewrite);

        /* delete the c:* attributes that followed the URI */
        let deletes = std::mem::take(&mut self.postponed.deletes);
        for (start, end) in deletes {
            core.add(start, end, None);
        }
    }

    fn transform_uri_attribute(
        &mut self,
        core: &mut ReplaceCore,
        start: u64,
        end: u64,
        value: &[u8],
        rewrite: UriRewrite,
    ) {
        let mut value = value;

        let target: WidgetRef = match rewrite.base {
            UriBase::Template => {
                /* no rewriting relative to the template */
                return;
            }
            UriBase::Widget => Rc::clone(&self.container),
            UriBase::Child => {
                let slash = value.iter().position(|&ch| ch == b'/');
                let (child_id, suffix) = match slash {
                    Some(pos) => (&value[..pos], &value[pos + 1..]),
                    None => (value, &value[value.len()..]),
                };

                let child_id = String::from_utf8_lossy(child_id).into_owned();
                let Some(child) = widget::find_child(&self.container.borrow(), &child_id)
                else {
                    return;
                };

                value = suffix;
                child
            }
            UriBase::Parent => {
                let Some(parent) = self.container.borrow().parent.upgrade() else {
                    return;
                };
                parent
            }
        };

        {
            let t = target.borrow();
            if t.is_root() || (t.cls.is_none() && t.class_name.is_none()) {
                return;
            }
        }

        /* the fragment is detached before rewriting and re-appended
           HTML-escaped */
        let mut fragment: Option<Vec<u8>> = None;
        if let Some(hash) = value.iter().position(|&ch| ch == b'#') {
            fragment = Some(value[hash..].to_vec());
            value = &value[..hash];
        }

        let stateful = Rc::ptr_eq(&target, &self.container);

        let istream = rewrite_widget_uri(
            &self.ctx,
            &target,
            value,
            rewrite.mode,
            stateful,
            rewrite.view.as_deref(),
            EscapeClass::Html,
        );

        let Some(istream) = istream else { return };

        let istream = match fragment {
            Some(fragment) => {
                let escaped = EscapeIstream::new(istream_memory(fragment), EscapeClass::Html);
                let parts: Vec<BoxIstream> = vec![istream, Box::new(escaped)];
                Box::new(ConcatIstream::new(parts)) as BoxIstream
            }
            None => istream,
        };

        core.add(start, end, Some(istream));
    }

    /// Handle c:base/c:mode/c:view/xmlns:c on link tags; returns
    /// true when consumed.
    fn link_attribute_finished(
        &mut self,
        core: &mut ReplaceCore,
        attr: &XmlParserAttribute<'_>,
    ) -> bool {
        match attr.name {
            "c:base" => {
                self.uri_rewrite.base = parse_uri_base(attr.value);
                if self.tag != Tag::RewriteUri {
                    self.delete_uri_rewrite(core, attr.name_start, attr.end);
                }
                true
            }
            "c:mode" => {
                self.uri_rewrite.mode = parse_uri_mode(attr.value);
                if self.tag != Tag::RewriteUri {
                    self.delete_uri_rewrite(core, attr.name_start, attr.end);
                }
                true
            }
            "c:view" => {
                self.uri_rewrite.view =
                    Some(String::from_utf8_lossy(attr.value).into_owned());
                if self.tag != Tag::RewriteUri {
                    self.delete_uri_rewrite(core, attr.name_start, attr.end);
                }
                true
            }
            "xmlns:c" => {
                /* delete "xmlns:c" attributes */
                if self.tag != Tag::RewriteUri {
                    self.delete_uri_rewrite(core, attr.name_start, attr.end);
                }
                true
            }
            _ => false,
        }
    }

    /* class/id prefix substitution */

    fn handle_class_attribute(&mut self, core: &mut ReplaceCore, attr: &XmlParserAttribute<'_>) {
        let value = attr.value;
        let Some(mut u) = find_underscore(value, 0) else {
            return;
        };

        let mut buffer: Vec<u8> = Vec::with_capacity(value.len() + 16);
        let mut p = 0usize;

        loop {
            buffer.extend_from_slice(&value[p..u]);
            p = u;

            let n = underscore_prefix(&value[p..]);
            let container = self.container.borrow();
            if n == 3 && container.get_prefix().is_some() {
                buffer.extend_from_slice(container.get_prefix().unwrap().as_bytes());
                p += 3;
            } else if n == 2 && container.get_quoted_class_name().is_some() {
                buffer.extend_from_slice(container.get_quoted_class_name().unwrap().as_bytes());
                p += 2;
            } else {
                /* no match: skip the underscores and look further */
                let mut skip = u;
                while skip < value.len() && value[skip] == b'_' {
                    skip += 1;
                }
                buffer.extend_from_slice(&value[p..skip]);
                p = skip;
            }
            drop(container);

            match find_underscore(value, p) {
                Some(next) => u = next,
                None => break,
            }
        }

        buffer.extend_from_slice(&value[p..]);

        core.add(
            attr.value_start,
            attr.value_end,
            Some(istream_memory(buffer)),
        );
    }

    fn handle_id_attribute(&mut self, core: &mut ReplaceCore, attr: &XmlParserAttribute<'_>) {
        let n = underscore_prefix(attr.value);
        if n == 3 {
            /* triple underscore: widget path prefix */
            let Some(prefix) = self.container.borrow().get_prefix().map(str::to_string)
            else {
                return;
            };
            core.add(
                attr.value_start,
                attr.value_start + 3,
                Some(istream_string(prefix)),
            );
        } else if n == 2 {
            /* double underscore: class name prefix */
            let Some(class_name) = self
                .container
                .borrow()
                .get_quoted_class_name()
                .map(str::to_string)
            else {
                return;
            };
            core.add(
                attr.value_start,
                attr.value_start + 2,
                Some(istream_string(class_name)),
            );
        }
    }

    fn on_attribute_finished(&mut self, core: &mut ReplaceCore, attr: &XmlParserAttribute<'_>) {
        if is_link(self.tag) && self.link_attribute_finished(core, attr) {
            return;
        }

        if self.tag == Tag::Meta
            && attr.name.eq_ignore_ascii_case("http-equiv")
            && attr.value.eq_ignore_ascii_case(b"refresh")
        {
            /* morph into the refresh variant */
            self.tag = Tag::MetaRefresh;
            return;
        }

        if self.tag == Tag::Meta && is_meta_with_uri_content(attr.name, attr.value) {
            self.tag = Tag::MetaUriContent;
            return;
        }

        /* attribute editing is impossible once a URI attribute is
           postponed, because the substitutions would be emitted out
           of order */

        if self.prefix_class_enabled()
            && !self.postponed.pending
            && is_html(self.tag)
            && attr.name == "class"
        {
            self.handle_class_attribute(core, attr);
            return;
        }

        if self.prefix_id_enabled()
            && !self.postponed.pending
            && is_html(self.tag)
            && (attr.name == "id" || attr.name == "for")
        {
            self.handle_id_attribute(core, attr);
            return;
        }

        match self.tag {
            Tag::None_
            | Tag::Ignore
            | Tag::Other
            | Tag::Widget
            | Tag::WidgetParam
            | Tag::WidgetHeader
            | Tag::WidgetPathInfo
            | Tag::WidgetView => self.container_attr_finished(attr),

            Tag::Img => {
                if attr.name.eq_ignore_ascii_case("src") {
                    self.postpone_uri_rewrite(attr.value_start, attr.value_end, attr.value);
                }
            }

            Tag::A => {
                if attr.name.eq_ignore_ascii_case("href") {
                    self.postpone_uri_rewrite(attr.value_start, attr.value_end, attr.value);
                } else if self.prefix_id_enabled() && attr.name.eq_ignore_ascii_case("name") {
                    self.handle_id_attribute(core, attr);
                }
            }

            Tag::Form => {
                if attr.name.eq_ignore_ascii_case("action") {
                    self.postpone_uri_rewrite(attr.value_start, attr.value_end, attr.value);
                }
            }

            Tag::Script => {
                if self.rewrite_enabled() && attr.name.eq_ignore_ascii_case("src") {
                    self.postpone_uri_rewrite(attr.value_start, attr.value_end, attr.value);
                }
            }

            Tag::Param => {
                if attr.name == "value" {
                    self.postpone_uri_rewrite(attr.value_start, attr.value_end, attr.value);
                }
            }

            Tag::MetaRefresh => {
                if attr.name.eq_ignore_ascii_case("content") {
                    self.postpone_refresh_rewrite(attr);
                }
            }

            Tag::MetaUriContent => {
                if attr.name.eq_ignore_ascii_case("content") {
                    self.postpone_uri_rewrite(attr.value_start, attr.value_end, attr.value);
                }
            }

            Tag::RewriteUri | Tag::Style | Tag::StyleProcess | Tag::Meta => {}
        }
    }

    /* widget embedding */

    fn prepare_embed_widget(&mut self, child: WidgetRef) -> Result<WidgetRef, WidgetError> {
        if child.borrow().class_name.is_none() {
            return Err(WidgetError::new(
                WidgetErrorCode::Unspecified,
                "widget without a class",
            ));
        }

        /* enforce the SELF_CONTAINER flag */
        let self_container = self.options.contains(ProcessorOptions::SELF_CONTAINER);
        if !init_approval(&child, self_container) {
            return Err(WidgetError::new(
                WidgetErrorCode::Forbidden,
                format!(
                    "widget is not allowed to embed widget '{}'",
                    child.borrow().log_name()
                ),
            ));
        }

        if widget::check_recursion(&child) {
            return Err(WidgetError::new(
                WidgetErrorCode::Unspecified,
                format!(
                    "maximum widget depth exceeded for widget '{}'",
                    child.borrow().log_name()
                ),
            ));
        }

        if let Some(params) = self.take_widget_params() {
            child.borrow_mut().from_template.query_string = Some(params);
        }

        self.container.borrow_mut().children.push(Rc::clone(&child));
        Ok(child)
    }

    fn embed_widget(&mut self, child: WidgetRef) -> Option<BoxIstream> {
        debug_assert!(child.borrow().class_name.is_some());

        if widget::copy_from_request(&child).is_err() {
            child.borrow_mut().cancel();
            return None;
        }

        if child.borrow().display == Display::None {
            child.borrow_mut().cancel();
            return None;
        }

        let istream = embed_inline_widget(&self.ctx, &child, false);

        let log_name = child.borrow().log_name();
        Some(Box::new(CatchIstream::new(
            istream,
            Box::new(move |error| {
                debug!("widget '{}' failed: {}", log_name, error);
                None
            }),
        )))
    }

    fn open_widget_element(&mut self, child: WidgetRef) -> Option<BoxIstream> {
        debug_assert!(child.borrow().parent.upgrade().is_some());

        match self.prepare_embed_widget(child) {
            Ok(child) => self.embed_widget(child),
            Err(error) => {
                debug!("refusing to embed widget: {}", error);
                None
            }
        }
    }

    fn widget_element_finished(
        &mut self,
        core: &mut ReplaceCore,
        xml_tag: &XmlParserTag<'_>,
        child: WidgetRef,
    ) -> bool {
        let istream = self.open_widget_element(child);
        core.add(self.cwidget.start_offset, xml_tag.end, istream);
        true
    }

    fn on_tag_finished(&mut self, core: &mut ReplaceCore, xml_tag: &XmlParserTag<'_>) -> bool {
        if self.postponed.pending {
            self.commit_uri_rewrite(core);
        }

        if self.tag == Tag::Script {
            if xml_tag.tag_type == XmlTagType::Open {
                self.enter_script = true;
            } else {
                self.tag = Tag::None_;
            }
            return true;
        }

        if self.tag == Tag::RewriteUri {
            /* this tag's settings become the new default */
            self.default_uri_rewrite = self.uri_rewrite.clone();
            core.add(xml_tag.start, xml_tag.end, None);
            return true;
        }

        if self.tag == Tag::Style {
            if xml_tag.tag_type == XmlTagType::Open && self.style_enabled() {
                /* feed the contents of this style element into a CSS
                   processor */
                self.tag = Tag::StyleProcess;

                let mut css_options = CssProcessorOptions::empty();
                if self.options.contains(ProcessorOptions::REWRITE_URL) {
                    css_options |= CssProcessorOptions::REWRITE_URL;
                }
                if self.options.contains(ProcessorOptions::PREFIX_CSS_CLASS) {
                    css_options |= CssProcessorOptions::PREFIX_CLASS;
                }
                if self.options.contains(ProcessorOptions::PREFIX_XML_ID) {
                    css_options |= CssProcessorOptions::PREFIX_ID;
                }

                let channel = Rc::new(RefCell::new(CdataChannel {
                    buffer: Vec::new(),
                    pos: 0,
                    eof: false,
                }));
                let source = Box::new(CdataSource {
                    channel: Rc::clone(&channel),
                });

                let istream =
                    css_processor(source, &self.container, &self.ctx, css_options);

                /* the end offset is extended as CDATA arrives */
                self.cdata = Some((channel, xml_tag.end));
                core.add(xml_tag.end, xml_tag.end, Some(istream));
            }

            return true;
        }

        if self.tag == Tag::Widget {
            if xml_tag.tag_type == XmlTagType::Open || xml_tag.tag_type == XmlTagType::Short {
                self.cwidget.start_offset = xml_tag.start;
            } else if self.cwidget.widget.is_none() {
                return true;
            }

            debug_assert!(self.cwidget.widget.is_some());

            if xml_tag.tag_type == XmlTagType::Open {
                return true;
            }

            let child = self.cwidget.widget.take().unwrap();
            return self.widget_element_finished(core, xml_tag, child);
        }

        if self.tag == Tag::WidgetParam || self.tag == Tag::WidgetHeader {
            self.finish_widget_child_element(xml_tag.tag_type);
            return true;
        }

        true
    }

    fn on_cdata(&mut self, core: &mut ReplaceCore, text: &[u8], start: u64) -> usize {
        if self.tag == Tag::StyleProcess {
            let (channel, cdata_start) = self.cdata.as_ref().expect("no cdata channel");
            channel.borrow_mut().buffer.extend_from_slice(text);
            core.extend(*cdata_start, start + text.len() as u64);
        } else if self.cwidget.widget.is_none() {
            core.settle(start + text.len() as u64);
        }

        text.len()
    }
}

fn is_meta_property_with_link(property: &[u8]) -> bool {
    property.starts_with(b"og:")
        && (property.ends_with(b":url")
            || property == b"og:image"
            || property == b"og:audio"
            || property == b"og:video")
}

/// Does this attribute mark a `<meta>` element whose `content`
/// attribute carries a URI?
fn is_meta_with_uri_content(name: &str, value: &[u8]) -> bool {
    name.eq_ignore_ascii_case("property") && is_meta_property_with_link(value)
}
