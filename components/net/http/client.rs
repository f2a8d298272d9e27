/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The HTTP/1.x client: request framing, status/header/body parsing,
//! `Expect: 100-continue`, keep-alive and connection-lease
//! bookkeeping.  One instance serves exactly one request on a leased
//! socket.

use std::cell::{Cell, RefCell};
use std::os::fd::{OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use http::header::HeaderMap;
use http::{Method, StatusCode};
use log::{debug, warn};
use socket::buffered::{
    BufferedResult, BufferedSocket, BufferedSocketHandler, SocketIo, WriteResult,
};
use socket::event_loop::{EventLoop, Readiness, TimerEvent};
use socket::filter::SocketFilter;
use socket::lease::Lease;
use stream::cancellable::{Cancellable, CancellablePointer};
use stream::error::{StreamError, TimeoutError};
use stream::istream::{
    Available, BoxIstream, DirectResult, FdType, FdTypeMask, Istream, IstreamHandler, ReadResult,
};
use stream::{ChunkedIstream, ConcatIstream, GrowingBuffer, OptionalControl, new_optional};

use crate::error::ProtocolError;
use crate::headers::{header_parse_line, headers_write};
use crate::http::body::{BodyProgress, BodyReader};
use crate::http::response::HttpResponseHandler;
use crate::http::{method_is_empty, status_is_empty};

/// With a request body of this size or larger, we send
/// "Expect: 100-continue".
const EXPECT_100_THRESHOLD: u64 = 1024;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Status,
    Headers,
    Body,
    End,
}

struct ResponseState {
    read_state: ReadState,
    /// A HEAD request is in flight; the response never has a body.
    no_body: bool,
    http_1_0: bool,
    status: StatusCode,
    headers: HeaderMap,
    body: Option<BodyReader>,
    /// Staged for delivery through the body istream's next read.
    body_error: Option<StreamError>,
}

struct ClientState {
    event_loop: EventLoop,
    peer_name: String,
    lease: Option<Box<dyn Lease>>,
    keep_alive: bool,

    request_istream: Option<BoxIstream>,
    request_got_data: bool,
    optional_body: Option<OptionalControl>,
    handler: Option<Box<dyn HttpResponseHandler>>,

    response: ResponseState,

    /// Set by the body istream's destructor when the consumer walked
    /// away before EOF.
    body_abandoned: Rc<Cell<bool>>,

    self_weak: Weak<RefCell<HttpClient>>,
}

pub struct HttpClient {
    socket: BufferedSocket,
    state: ClientState,
    read_timer: Option<Rc<TimerEvent>>,
}

/// Start a HTTP request on a leased socket.  The `handler` receives
/// either the response (with a streamed body) or an error; the
/// socket is handed back to the lease with `reuse=true` only after a
/// clean keep-alive response end.
#[allow(clippy::too_many_arguments)]
pub fn http_client_request(
    event_loop: &EventLoop,
    fd: OwnedFd,
    fd_type: FdType,
    lease: Box<dyn Lease>,
    filter: Option<Box<dyn SocketFilter>>,
    peer_name: &str,
    method: Method,
    uri: &str,
    headers: HeaderMap,
    body: Option<BoxIstream>,
    expect_100: bool,
    handler: Box<dyn HttpResponseHandler>,
    cancel_ptr: &mut CancellablePointer,
) {
    if !uri_path_verify_quick(uri) {
        lease.release(fd, true);
        handler.on_error(StreamError::new(ProtocolError::unspecified(format!(
            "malformed request URI '{}'",
            uri
        ))));
        return;
    }

    /* request line and headers */

    let mut buffer = GrowingBuffer::with_capacity(1024);
    buffer.write_str(method.as_str());
    buffer.write(b" ");
    buffer.write_str(uri);
    buffer.write(b" HTTP/1.1\r\n");
    headers_write(&mut buffer, &headers);

    let no_body = method_is_empty(&method);

    let mut optional_control = None;
    let mut body = body;
    if let Some(b) = body.take() {
        let mut b = b;
        match b.available(false) {
            Available::Exact(content_length) => {
                buffer.write_str(&format!("content-length: {}\r\n", content_length));
            }
            Available::Unknown => {
                buffer.write(b"transfer-encoding: chunked\r\n");
                b = Box::new(ChunkedIstream::new(b));
            }
        }

        let announced = if expect_100 {
            b.available(true)
        } else {
            Available::Exact(0)
        };
        let wants_100 = match announced {
            Available::Unknown => true,
            Available::Exact(n) => expect_100 && n >= EXPECT_100_THRESHOLD,
        };
        if wants_100 {
            /* large request body: ask the server whether it is
               really interested before sending it */
            buffer.write(b"expect: 100-continue\r\n");
            let (optional, control) = new_optional(b);
            b = Box::new(optional);
            optional_control = Some(control);
        }

        body = Some(b);
    }

    buffer.write(b"\r\n");

    let mut parts: Vec<BoxIstream> = vec![buffer.into_istream()];
    if let Some(b) = body {
        parts.push(b);
    }
    let request_istream: BoxIstream = Box::new(ConcatIstream::new(parts));

    /* connection object */

    let mut socket = BufferedSocket::new(fd, fd_type);

    let client = Rc::new_cyclic(|self_weak| {
        RefCell::new(HttpClient {
            socket: {
                if let Some(filter) = filter {
                    socket = socket.with_filter(filter);
                }
                socket
            },
            state: ClientState {
                event_loop: event_loop.clone(),
                peer_name: peer_name.to_string(),
                lease: Some(lease),
                keep_alive: false,
                request_istream: Some(request_istream),
                request_got_data: false,
                optional_body: optional_control,
                handler: Some(handler),
                response: ResponseState {
                    read_state: ReadState::Status,
                    no_body,
                    http_1_0: false,
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: None,
                    body_error: None,
                },
                body_abandoned: Rc::new(Cell::new(false)),
                self_weak: self_weak.clone(),
            },
            read_timer: None,
        })
    });

    /* events: a strong reference keeps the client alive while the
       socket is registered */
    {
        let strong = Rc::clone(&client);
        let callback = Rc::new(RefCell::new(move |readiness: Readiness| {
            strong.borrow_mut().on_ready(readiness);
        }));
        let mut c = client.borrow_mut();
        if let Err(e) = c.socket.register(event_loop, callback) {
            let error = StreamError::new(e).prefixed("failed to register socket: ");
            c.abort_from_event(error);
            return;
        }

        let timer = Rc::new(TimerEvent::new(event_loop, {
            let weak = Rc::downgrade(&client);
            move || {
                if let Some(client) = weak.upgrade() {
                    client.borrow_mut().on_timeout_fired();
                }
            }
        }));
        c.socket
            .io
            .set_read_timeout(Some((HTTP_CLIENT_TIMEOUT, Rc::clone(&timer))));
        c.socket
            .io
            .set_write_timeout(Some((HTTP_CLIENT_TIMEOUT, Rc::clone(&timer))));
        c.read_timer = Some(timer);

        c.socket.io.schedule_read();

        /* kick off the request */
        let HttpClient { socket, state, .. } = &mut *c;
        state.pump_request(&mut socket.io);
    }

    cancel_ptr.set(Rc::new(RefCell::new(HttpClientCancel { client })));
}

fn uri_path_verify_quick(uri: &str) -> bool {
    uri.starts_with('/') && !uri.bytes().any(|ch| ch == b' ' || ch < 0x20)
}

struct HttpClientCancel {
    client: Rc<RefCell<HttpClient>>,
}

impl Cancellable for HttpClientCancel {
    fn cancel(&mut self) {
        let mut client = self.client.borrow_mut();
        let HttpClient { socket, state, .. } = &mut *client;

        /* cancelling is only allowed before the response was
           delivered */
        state.request_istream = None;
        state.handler = None;
        state.response.read_state = ReadState::End;
        state.release(&mut socket.io, false);
    }
}

impl HttpClient {
    fn on_ready(&mut self, readiness: Readiness) {
        let HttpClient { socket, state, .. } = self;

        if readiness.error {
            state.socket_error(
                &mut socket.io,
                StreamError::new(ProtocolError::io("socket error")),
            );
            return;
        }

        if readiness.writable && !state.pump_request(&mut socket.io) {
            return;
        }

        if readiness.readable && state.response.read_state != ReadState::End {
            socket.try_read(state);
        }
    }

    fn on_timeout_fired(&mut self) {
        let HttpClient { socket, state, .. } = self;
        state.socket_error(
            &mut socket.io,
            StreamError::new(TimeoutError("HTTP connection timed out")),
        );
    }

    fn abort_from_event(&mut self, error: StreamError) {
        let HttpClient { socket, state, .. } = self;
        state.socket_error(&mut socket.io, error);
    }

    /// The response-body istream pulls here.
    fn read_body(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        debug_assert_eq!(self.state.response.read_state, ReadState::Body);

        if let Some(error) = self.state.response.body_error.take() {
            self.state.response.read_state = ReadState::End;
            handler.on_error(error);
            return ReadResult::Error;
        }

        let mut progressed = false;

        loop {
            if self.socket.is_empty() {
                if !self.socket.io.connected() {
                    /* the peer has closed; is the body complete? */
                    let result = self
                        .state
                        .response
                        .body
                        .as_mut()
                        .unwrap()
                        .socket_eof();
                    self.state.response.read_state = ReadState::End;
                    return match result {
                        Ok(()) => {
                            handler.on_eof();
                            ReadResult::Eof
                        }
                        Err(e) => {
                            handler.on_error(e.prefixed(&error_prefix(&self.state.peer_name)));
                            ReadResult::Error
                        }
                    };
                }

                if self.socket.fill_without_dispatch() == 0 {
                    self.socket.io.schedule_read();
                    return if progressed {
                        ReadResult::Progress
                    } else {
                        ReadResult::Blocked
                    };
                }
                continue;
            }

            let feed_result = {
                let HttpClient { socket, state, .. } = self;
                state
                    .response
                    .body
                    .as_mut()
                    .unwrap()
                    .feed(socket.input(), handler)
            };

            match feed_result {
                Err(error) => {
                    let HttpClient { socket, state, .. } = self;
                    state.response.read_state = ReadState::End;
                    state.request_istream = None;
                    state.release(&mut socket.io, false);
                    handler.on_error(error.prefixed(&error_prefix(&self.state.peer_name)));
                    return ReadResult::Error;
                }
                Ok((consumed, progress)) => {
                    self.socket.consumed(consumed);
                    if consumed > 0 {
                        progressed = true;
                    }

                    match progress {
                        BodyProgress::Blocked => {
                            return if progressed {
                                ReadResult::Progress
                            } else {
                                ReadResult::Blocked
                            };
                        }
                        BodyProgress::More => continue,
                        BodyProgress::Eof => {
                            self.finish_response();
                            handler.on_eof();
                            return ReadResult::Eof;
                        }
                    }
                }
            }
        }
    }

    fn finish_response(&mut self) {
        let HttpClient { socket, state, .. } = self;

        if !socket.is_empty() {
            warn!("excess data after HTTP response from '{}'", state.peer_name);
            state.keep_alive = false;
        }

        let reuse = state.keep_alive && state.request_istream.is_none();
        state.request_istream = None;
        state.response.read_state = ReadState::End;
        state.release(&mut socket.io, reuse);
    }

    fn body_available(&self, partial: bool) -> Available {
        match &self.state.response.body {
            Some(body) => body.available(partial, self.socket.available()),
            None => Available::Exact(0),
        }
    }
}

fn error_prefix(peer_name: &str) -> String {
    format!("error on HTTP connection to '{}': ", peer_name)
}

impl ClientState {
    fn release(&mut self, io: &mut SocketIo, reuse: bool) {
        /* never reuse a socket with a filter in between; the filter
           state cannot be handed to the next request */
        let reuse = reuse && !io.has_filter();

        if let Some(fd) = io.abandon() {
            if let Some(lease) = self.lease.take() {
                lease.release(fd, reuse);
            }
        } else if let Some(lease) = self.lease.take() {
            drop(lease);
        }
    }

    fn abort_response_headers(&mut self, io: &mut SocketIo, error: StreamError) {
        debug_assert!(matches!(
            self.response.read_state,
            ReadState::Status | ReadState::Headers
        ));

        self.release(io, false);
        self.request_istream = None;
        self.response.read_state = ReadState::End;

        if let Some(handler) = self.handler.take() {
            handler.on_error(error.prefixed(&error_prefix(&self.peer_name)));
        }
    }

    fn abort_response_body(&mut self, io: &mut SocketIo, error: StreamError) {
        debug_assert_eq!(self.response.read_state, ReadState::Body);

        self.request_istream = None;
        self.release(io, false);

        /* the consumer learns about it on its next pull */
        self.response.body_error = Some(error);
    }

    fn socket_error(&mut self, io: &mut SocketIo, error: StreamError) {
        match self.response.read_state {
            ReadState::Status | ReadState::Headers => self.abort_response_headers(io, error),
            ReadState::Body => self.abort_response_body(io, error),
            ReadState::End => {}
        }
    }

    /// Drive the request istream into the socket.  Returns false
    /// when the connection died.
    fn pump_request(&mut self, io: &mut SocketIo) -> bool {
        let Some(istream) = &mut self.request_istream else {
            io.unschedule_write();
            return io.connected();
        };

        self.request_got_data = false;
        let mut outcome = WriteOutcome::None;
        let result = {
            let mut writer = RequestWriter {
                io: &mut *io,
                got_data: &mut self.request_got_data,
                outcome: &mut outcome,
            };
            istream.read(&mut writer)
        };

        match outcome {
            WriteOutcome::None => {}
            WriteOutcome::Broken => {
                /* the server closed the connection, probably because
                   it is not interested in our request body; wait for
                   its response anyway */
                self.keep_alive = false;
                self.request_istream = None;
                io.unschedule_write();
                return true;
            }
            WriteOutcome::Error(e) => {
                self.socket_error(
                    io,
                    StreamError::new(ProtocolError::io(format!("write error ({})", e))),
                );
                return false;
            }
        }

        match result {
            ReadResult::Eof => {
                self.request_istream = None;
                io.unschedule_write();
            }
            ReadResult::Error => {
                /* the request body producer failed */
                self.request_istream = None;
                self.socket_error(
                    io,
                    StreamError::new(ProtocolError::unspecified("request stream failed")),
                );
                return false;
            }
            ReadResult::Progress => {
                io.schedule_write();
            }
            ReadResult::Blocked => {
                if self.request_got_data {
                    io.schedule_write();
                } else {
                    io.unschedule_write();
                }
            }
        }

        true
    }

    fn parse_status_line(&mut self, line: &[u8]) -> Result<(), StreamError> {
        debug_assert_eq!(self.response.read_state, ReadState::Status);

        if line.len() < 10 || &line[..5] != b"HTTP/" {
            return Err(StreamError::new(ProtocolError::garbage(
                "malformed HTTP status line",
            )));
        }

        let Some(space) = line[6..].iter().position(|&ch| ch == b' ') else {
            return Err(StreamError::new(ProtocolError::garbage(
                "malformed HTTP status line",
            )));
        };

        self.response.http_1_0 = line[5] == b'1' && line[6] == b'.' && line[7] == b'0';

        let rest = &line[6 + space + 1..];
        if rest.len() < 3 || !rest[..3].iter().all(|ch| ch.is_ascii_digit()) {
            return Err(StreamError::new(ProtocolError::garbage(
                "no HTTP status found",
            )));
        }

        let code = (rest[0] - b'0') as u16 * 100
            + (rest[1] - b'0') as u16 * 10
            + (rest[2] - b'0') as u16;
        let status = StatusCode::from_u16(code).map_err(|_| {
            StreamError::new(ProtocolError::garbage(format!(
                "invalid HTTP status {}",
                code
            )))
        })?;

        self.response.status = status;
        self.response.read_state = ReadState::Headers;
        self.response.headers = HeaderMap::new();
        Ok(())
    }

    /// All header lines have arrived; decide the body framing.
    fn headers_finished(&mut self) -> Result<(), StreamError> {
        let headers = &mut self.response.headers;

        let connection = headers.remove(http::header::CONNECTION);
        self.keep_alive = match &connection {
            None => !self.response.http_1_0,
            Some(value) => value
                .to_str()
                .map(|v| v.eq_ignore_ascii_case("keep-alive"))
                .unwrap_or(false),
        };

        if status_is_empty(self.response.status) || self.response.no_body {
            self.response.body = None;
            self.response.read_state = ReadState::Body;
            return Ok(());
        }

        let transfer_encoding = headers.remove(http::header::TRANSFER_ENCODING);
        let content_length = headers.remove(http::header::CONTENT_LENGTH);

        /* remove the other hop-by-hop response headers */
        headers.remove(http::header::PROXY_AUTHENTICATE);
        headers.remove(http::header::UPGRADE);

        let chunked = transfer_encoding
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        let body = if chunked {
            BodyReader::chunked()
        } else {
            match content_length {
                None => {
                    if self.keep_alive {
                        return Err(StreamError::new(ProtocolError::unspecified(
                            "no Content-Length header in response",
                        )));
                    }
                    BodyReader::until_eof()
                }
                Some(value) => {
                    let length: u64 = value
                        .to_str()
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| {
                            StreamError::new(ProtocolError::unspecified(
                                "invalid Content-Length header in response",
                            ))
                        })?;

                    if length == 0 {
                        self.response.body = None;
                        self.response.read_state = ReadState::Body;
                        return Ok(());
                    }

                    BodyReader::with_length(length)
                }
            }
        };

        self.response.body = Some(body);
        self.response.read_state = ReadState::Body;
        Ok(())
    }

    fn feed_headers(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult) {
        let mut consumed = 0usize;

        while self.response.read_state == ReadState::Status
            || self.response.read_state == ReadState::Headers
        {
            let Some(rel) = data[consumed..].iter().position(|&ch| ch == b'\n') else {
                return (consumed, BufferedResult::More);
            };

            let mut line = &data[consumed..consumed + rel];
            while let [rest @ .., b'\r' | b' ' | b'\t'] = line {
                line = rest;
            }

            let result = if self.response.read_state == ReadState::Status {
                self.parse_status_line(line)
            } else if !line.is_empty() {
                header_parse_line(&mut self.response.headers, line);
                Ok(())
            } else {
                self.headers_finished()
            };

            consumed += rel + 1;

            if let Err(error) = result {
                self.abort_response_headers(io, error);
                return (consumed, BufferedResult::Closed);
            }
        }

        /* the headers are finished */
        debug_assert_eq!(self.response.read_state, ReadState::Body);

        if self.response.status == StatusCode::CONTINUE {
            return self.handle_100_continue(io, consumed, data.len());
        }

        if let Some(optional) = self.optional_body.take() {
            /* the server begins sending a response without waiting
               for the request body; it is not interested */
            optional.discard();
        }

        let status = self.response.status;
        let headers = std::mem::take(&mut self.response.headers);

        let body: Option<BoxIstream> = if self.response.body.is_some() {
            match self.self_weak.upgrade() {
                Some(client) => Some(Box::new(HttpBodyIstream {
                    client,
                    abandoned: Rc::clone(&self.body_abandoned),
                })),
                None => None,
            }
        } else {
            None
        };
        let has_body = body.is_some();

        if let Some(handler) = self.handler.take() {
            handler.on_response(status, headers, body);
        }

        if has_body {
            /* the consumer pulls the body through its istream */
            (consumed, BufferedResult::Blocking)
        } else {
            /* no body: the response is complete */
            if data.len() > consumed {
                warn!("excess data after HTTP response from '{}'", self.peer_name);
                self.keep_alive = false;
            }
            let reuse = self.keep_alive && self.request_istream.is_none();
            self.request_istream = None;
            self.response.read_state = ReadState::End;
            self.release(io, reuse);
            (consumed, BufferedResult::Closed)
        }
    }

    fn handle_100_continue(
        &mut self,
        io: &mut SocketIo,
        consumed: usize,
        _total: usize,
    ) -> (usize, BufferedResult) {
        debug_assert!(self.response.body.is_none());

        let Some(optional) = self.optional_body.take() else {
            self.response.read_state = ReadState::Status;
            self.abort_response_headers(
                io,
                StreamError::new(ProtocolError::unspecified("unexpected status 100")),
            );
            return (consumed, BufferedResult::Closed);
        };

        /* the server wants the request body now */
        self.response.read_state = ReadState::Status;
        optional.resume();

        if !io.connected() {
            self.abort_response_headers(
                io,
                StreamError::new(ProtocolError::unspecified(
                    "peer closed the socket prematurely after status 100",
                )),
            );
            return (consumed, BufferedResult::Closed);
        }

        io.schedule_write();
        (consumed, BufferedResult::AgainExpect)
    }
}

impl BufferedSocketHandler for ClientState {
    fn on_data(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult) {
        if self.body_abandoned.get() {
            /* the consumer dropped the body istream; tear down */
            self.request_istream = None;
            self.response.read_state = ReadState::End;
            self.release(io, false);
            return (0, BufferedResult::Closed);
        }

        match self.response.read_state {
            ReadState::Status | ReadState::Headers => self.feed_headers(io, data),
            ReadState::Body => {
                /* the body istream pulls these bytes itself */
                (0, BufferedResult::Blocking)
            }
            ReadState::End => (0, BufferedResult::Closed),
        }
    }

    fn on_closed(&mut self, io: &mut SocketIo, _remaining: usize) -> bool {
        debug!(
            "HTTP peer '{}' closed the connection",
            self.peer_name
        );

        if self.request_istream.is_some() {
            self.request_istream = None;
        }

        /* cannot reuse the socket; keep serving the input buffer */
        self.release(io, false);
        true
    }

    fn on_end(&mut self) {
        /* delivery of the remaining buffered body happens through
           the body istream; nothing to push here */
    }

    fn on_write(&mut self, io: &mut SocketIo) -> bool {
        self.pump_request(io)
    }

    fn on_error(&mut self, io: &mut SocketIo, error: StreamError) {
        self.socket_error(io, error);
    }
}

/// Writes the request istream into the socket.
struct RequestWriter<'a> {
    io: &'a mut SocketIo,
    got_data: &'a mut bool,
    outcome: &'a mut WriteOutcome,
}

enum WriteOutcome {
    None,
    Broken,
    Error(std::io::Error),
}

impl IstreamHandler for RequestWriter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        *self.got_data = true;

        match self.io.write(data) {
            WriteResult::Written(n) => {
                self.io.schedule_write();
                n
            }
            WriteResult::Blocking => 0,
            WriteResult::Broken => {
                *self.outcome = WriteOutcome::Broken;
                0
            }
            WriteResult::Error(e) => {
                *self.outcome = WriteOutcome::Error(e);
                0
            }
        }
    }

    fn direct_mask(&self) -> FdTypeMask {
        FdTypeMask::FILE | FdTypeMask::PIPE
    }

    fn on_direct(&mut self, fd: RawFd, fd_type: FdType, max: usize) -> DirectResult {
        *self.got_data = true;

        match self.io.write_from(fd, fd_type, max) {
            WriteResult::Written(n) => {
                self.io.schedule_write();
                DirectResult::Transferred(n)
            }
            WriteResult::Blocking => DirectResult::Blocking,
            WriteResult::Broken => {
                *self.outcome = WriteOutcome::Broken;
                DirectResult::Closed
            }
            WriteResult::Error(e) => {
                let errno = e.raw_os_error().unwrap_or(libc::EIO);
                *self.outcome = WriteOutcome::Error(e);
                DirectResult::Errno(errno)
            }
        }
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, _error: StreamError) {
        /* mapped to ReadResult::Error by the caller */
    }
}

/// The response body handed to the response handler; pulls straight
/// out of the connection's input buffer.
struct HttpBodyIstream {
    client: Rc<RefCell<HttpClient>>,
    abandoned: Rc<Cell<bool>>,
}

impl Istream for HttpBodyIstream {
    fn available(&self, partial: bool) -> Available {
        match self.client.try_borrow() {
            Ok(client) => client.body_available(partial),
            Err(_) => Available::Unknown,
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Ok(mut client) = self.client.try_borrow_mut() else {
            /* re-entrant read from inside the response handler:
               suspend, the outer dispatch continues */
            return ReadResult::Blocked;
        };

        client.read_body(handler)
    }
}

impl Drop for HttpBodyIstream {
    fn drop(&mut self) {
        let finished = match self.client.try_borrow() {
            Ok(client) => client.state.response.read_state == ReadState::End,
            Err(_) => false,
        };

        if finished {
            return;
        }

        self.abandoned.set(true);

        if let Ok(mut client) = self.client.try_borrow_mut() {
            let HttpClient { socket, state, .. } = &mut *client;
            state.request_istream = None;
            state.response.read_state = ReadState::End;
            state.release(&mut socket.io, false);
        }
    }
}
