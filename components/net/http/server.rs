/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The HTTP/1.x server connection: parses pipelined requests off a
//! buffered socket, hands each to a request handler, and streams the
//! response istream back out.

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

use http::header::HeaderMap;
use http::{Method, StatusCode, Version};
use log::debug;
use socket::buffered::{
    BufferedResult, BufferedSocket, BufferedSocketHandler, SocketIo, WriteResult,
};
use socket::event_loop::{EventLoop, Readiness, TimerEvent};
use stream::error::StreamError;
use stream::istream::{
    Available, BoxIstream, Istream, IstreamHandler, ReadResult,
};
use stream::{ChunkedIstream, ConcatIstream, GrowingBuffer};

use crate::error::ProtocolError;
use crate::headers::{header_parse_line, headers_write};
use crate::http::body::{BodyProgress, BodyReader};
use crate::http::{method_is_empty, status_is_empty};

const HTTP_SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpServerRequest {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<BoxIstream>,
}

pub trait HttpServerRequestHandler {
    fn on_request(&mut self, request: HttpServerRequest, sender: HttpResponseSender);

    /// The client went away (possibly mid-request).
    fn on_closed(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Waiting for the request line.
    Start,
    Headers,
    Body,
    /// The request is complete; the response may still be going out.
    End,
}

struct RequestParseState {
    read_state: ReadState,
    method: Method,
    uri: String,
    version: Version,
    headers: HeaderMap,
    body: Option<BodyReader>,
    body_error: Option<StreamError>,
    keep_alive: bool,
}

impl RequestParseState {
    fn new() -> RequestParseState {
        RequestParseState {
            read_state: ReadState::Start,
            method: Method::GET,
            uri: String::new(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: None,
            body_error: None,
            keep_alive: false,
        }
    }
}

struct ServerState {
    event_loop: EventLoop,
    handler: Box<dyn HttpServerRequestHandler>,
    request: RequestParseState,
    response_istream: Option<BoxIstream>,
    self_weak: Weak<RefCell<HttpServerConnection>>,
}

pub struct HttpServerConnection {
    socket: BufferedSocket,
    state: ServerState,
    idle_timer: Option<Rc<TimerEvent>>,
}

pub fn http_server_connection_new(
    event_loop: &EventLoop,
    fd: OwnedFd,
    fd_type: stream::istream::FdType,
    handler: Box<dyn HttpServerRequestHandler>,
) -> std::io::Result<Rc<RefCell<HttpServerConnection>>> {
    let connection = Rc::new_cyclic(|self_weak| {
        RefCell::new(HttpServerConnection {
            socket: BufferedSocket::new(fd, fd_type),
            state: ServerState {
                event_loop: event_loop.clone(),
                handler,
                request: RequestParseState::new(),
                response_istream: None,
                self_weak: self_weak.clone(),
            },
            idle_timer: None,
        })
    });

    {
        let strong = Rc::clone(&connection);
        let callback = Rc::new(RefCell::new(move |readiness: Readiness| {
            strong.borrow_mut().on_ready(readiness);
        }));
        let mut c = connection.borrow_mut();
        c.socket.register(event_loop, callback)?;

        let timer = Rc::new(TimerEvent::new(event_loop, {
            let weak = Rc::downgrade(&connection);
            move || {
                if let Some(connection) = weak.upgrade() {
                    connection.borrow_mut().close();
                }
            }
        }));
        c.socket
            .io
            .set_read_timeout(Some((HTTP_SERVER_IDLE_TIMEOUT, Rc::clone(&timer))));
        c.idle_timer = Some(timer);

        c.socket.io.schedule_read();
    }

    Ok(connection)
}

impl HttpServerConnection {
    fn on_ready(&mut self, readiness: Readiness) {
        if readiness.error {
            self.close();
            return;
        }

        if readiness.writable {
            self.pump_response();
        }

        if readiness.readable {
            let HttpServerConnection { socket, state, .. } = self;
            socket.try_read(state);
        }
    }

    fn close(&mut self) {
        self.socket.io.close();
        self.state.response_istream = None;
        self.state.handler.on_closed();
    }

    /// Drive the response istream into the socket.
    fn pump_response(&mut self) {
        let HttpServerConnection { socket, state, .. } = self;

        let Some(istream) = &mut state.response_istream else {
            socket.io.unschedule_write();
            return;
        };

        let mut broken = false;
        let result = {
            let mut writer = ResponseWriter {
                io: &mut socket.io,
                broken: &mut broken,
            };
            istream.read(&mut writer)
        };

        if broken {
            self.close();
            return;
        }

        match result {
            ReadResult::Eof => {
                state.response_istream = None;
                socket.io.unschedule_write();
                self.response_complete();
            }
            ReadResult::Error => {
                debug!("response stream failed; closing HTTP connection");
                self.close();
            }
            ReadResult::Progress => {
                socket.io.schedule_write();
            }
            ReadResult::Blocked => {
                /* keep write interest: the level-triggered loop will
                   call again and pick up newly produced bytes */
                socket.io.schedule_write();
            }
        }
    }

    /// The response went out completely; start over for the next
    /// pipelined request, if the connection survives.
    fn response_complete(&mut self) {
        let request_done = self.state.request.read_state == ReadState::End
            && self.state.request.body.is_none();

        if !self.state.request.keep_alive || !request_done {
            self.close();
            return;
        }

        self.state.request = RequestParseState::new();
        self.socket.io.schedule_read();
    }

    /// The request-body istream pulls here.
    fn read_request_body(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if let Some(error) = self.state.request.body_error.take() {
            handler.on_error(error);
            return ReadResult::Error;
        }

        let mut progressed = false;

        loop {
            if self.socket.is_empty() {
                if !self.socket.io.connected() {
                    let result = match self.state.request.body.as_mut() {
                        Some(body) => body.socket_eof(),
                        None => Ok(()),
                    };
                    self.state.request.body = None;
                    return match result {
                        Ok(()) => {
                            handler.on_eof();
                            ReadResult::Eof
                        }
                        Err(e) => {
                            handler.on_error(e);
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
                let HttpServerConnection { socket, state, .. } = self;
                state
                    .request
                    .body
                    .as_mut()
                    .unwrap()
                    .feed(socket.input(), handler)
            };

            match feed_result {
                Err(error) => {
                    self.state.request.body = None;
                    self.close();
                    handler.on_error(error);
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
                            self.state.request.body = None;
                            handler.on_eof();
                            return ReadResult::Eof;
                        }
                    }
                }
            }
        }
    }
}

impl ServerState {
    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), StreamError> {
        let line = std::str::from_utf8(line)
            .map_err(|_| StreamError::new(ProtocolError::garbage("malformed request line")))?;

        let mut parts = line.split(' ');
        let (Some(method), Some(uri), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(StreamError::new(ProtocolError::garbage(
                "malformed request line",
            )));
        };

        self.request.method = method
            .parse()
            .map_err(|_| StreamError::new(ProtocolError::garbage("unknown request method")))?;
        self.request.uri = uri.to_string();
        self.request.version = match version {
            "HTTP/1.0" => Version::HTTP_10,
            "HTTP/1.1" => Version::HTTP_11,
            _ => {
                return Err(StreamError::new(ProtocolError::garbage(
                    "unsupported HTTP version",
                )));
            }
        };

        self.request.read_state = ReadState::Headers;
        self.request.headers = HeaderMap::new();
        Ok(())
    }

    fn headers_finished(&mut self, io: &mut SocketIo) -> Result<(), StreamError> {
        let headers = &mut self.request.headers;

        let connection = headers.get(http::header::CONNECTION);
        self.request.keep_alive = match connection.and_then(|v| v.to_str().ok()) {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.request.version != Version::HTTP_10,
        };

        let chunked = headers
            .get(http::header::TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        let body = if chunked {
            Some(BodyReader::chunked())
        } else {
            match headers
                .get(http::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
            {
                Some(value) => {
                    let length: u64 = value.parse().map_err(|_| {
                        StreamError::new(ProtocolError::unspecified(
                            "invalid Content-Length header in request",
                        ))
                    })?;
                    if length > 0 {
                        Some(BodyReader::with_length(length))
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if headers
            .get(http::header::EXPECT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
        {
            /* trusting the handler to want the body */
            let _ = io.write(b"HTTP/1.1 100 Continue\r\n\r\n");
        }

        self.request.body = body;
        self.request.read_state = ReadState::Body;
        Ok(())
    }

    fn feed(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult) {
        let mut consumed = 0usize;

        while self.request.read_state == ReadState::Start
            || self.request.read_state == ReadState::Headers
        {
            let Some(rel) = data[consumed..].iter().position(|&ch| ch == b'\n') else {
                return (consumed, BufferedResult::More);
            };

            let mut line = &data[consumed..consumed + rel];
            while let [rest @ .., b'\r' | b' ' | b'\t'] = line {
                line = rest;
            }

            let result = match self.request.read_state {
                ReadState::Start => {
                    if line.is_empty() {
                        /* tolerate stray CRLF between pipelined
                           requests */
                        Ok(())
                    } else {
                        self.parse_request_line(line)
                    }
                }
                ReadState::Headers => {
                    if line.is_empty() {
                        self.headers_finished(io)
                    } else {
                        header_parse_line(&mut self.request.headers, line);
                        Ok(())
                    }
                }
                _ => unreachable!(),
            };

            consumed += rel + 1;

            if let Err(error) = result {
                debug!("malformed HTTP request: {}", error);
                let _ = io.write(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n");
                io.close();
                return (consumed, BufferedResult::Closed);
            }
        }

        if self.request.read_state != ReadState::Body {
            return (consumed, BufferedResult::More);
        }

        /* dispatch the request */

        let body: Option<BoxIstream> = if self.request.body.is_some() {
            self.self_weak.upgrade().map(|connection| {
                Box::new(RequestBodyIstream { connection }) as BoxIstream
            })
        } else {
            self.request.read_state = ReadState::End;
            None
        };

        let request = HttpServerRequest {
            method: self.request.method.clone(),
            uri: std::mem::take(&mut self.request.uri),
            version: self.request.version,
            headers: std::mem::take(&mut self.request.headers),
            body,
        };

        let sender = HttpResponseSender {
            connection: self.self_weak.clone(),
            event_loop: self.event_loop.clone(),
        };

        self.handler.on_request(request, sender);

        (consumed, BufferedResult::Blocking)
    }
}

impl BufferedSocketHandler for ServerState {
    fn on_data(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult) {
        match self.request.read_state {
            ReadState::Start | ReadState::Headers => self.feed(io, data),
            ReadState::Body | ReadState::End => {
                /* the request-body istream pulls these bytes */
                (0, BufferedResult::Blocking)
            }
        }
    }

    fn on_closed(&mut self, io: &mut SocketIo, _remaining: usize) -> bool {
        io.close();
        true
    }

    fn on_end(&mut self) {
        self.handler.on_closed();
    }

    fn on_write(&mut self, _io: &mut SocketIo) -> bool {
        /* handled by HttpServerConnection::pump_response */
        true
    }

    fn on_error(&mut self, io: &mut SocketIo, error: StreamError) {
        debug!("error on HTTP server connection: {}", error);
        io.close();
        self.handler.on_closed();
    }
}

struct ResponseWriter<'a> {
    io: &'a mut SocketIo,
    broken: &'a mut bool,
}

impl IstreamHandler for ResponseWriter<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        match self.io.write(data) {
            WriteResult::Written(n) => n,
            WriteResult::Blocking => 0,
            WriteResult::Broken | WriteResult::Error(_) => {
                *self.broken = true;
                0
            }
        }
    }

    fn on_eof(&mut self) {}

    fn on_error(&mut self, _error: StreamError) {}
}

/// Streams one request body out of the connection buffer.
struct RequestBodyIstream {
    connection: Rc<RefCell<HttpServerConnection>>,
}

impl Istream for RequestBodyIstream {
    fn available(&self, partial: bool) -> Available {
        match self.connection.try_borrow() {
            Ok(connection) => match &connection.state.request.body {
                Some(body) => body.available(partial, connection.socket.available()),
                None => Available::Exact(0),
            },
            Err(_) => Available::Unknown,
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Ok(mut connection) = self.connection.try_borrow_mut() else {
            return ReadResult::Blocked;
        };

        let result = connection.read_request_body(handler);
        if result == ReadResult::Eof {
            connection.state.request.read_state = ReadState::End;
        }
        result
    }
}

/// One-shot handle for sending the response to a request.
pub struct HttpResponseSender {
    connection: Weak<RefCell<HttpServerConnection>>,
    event_loop: EventLoop,
}

impl HttpResponseSender {
    pub fn send(self, status: StatusCode, headers: HeaderMap, body: Option<BoxIstream>) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };

        match connection.try_borrow_mut() {
            Ok(mut c) => Self::send_now(&mut c, status, headers, body),
            Err(_) => {
                /* called from inside the connection's own dispatch
                   (the handler answered synchronously): postpone one
                   loop iteration */
                let weak = self.connection.clone();
                self.event_loop.defer(move || {
                    if let Some(connection) = weak.upgrade() {
                        Self::send_now(&mut connection.borrow_mut(), status, headers, body);
                    }
                });
            }
        }
    }

    fn send_now(
        c: &mut HttpServerConnection,
        status: StatusCode,
        mut headers: HeaderMap,
        body: Option<BoxIstream>,
    ) {
        let keep_alive = c.state.request.keep_alive;
        let head_request = method_is_empty(&c.state.request.method);
        let version_1_0 = c.state.request.version == Version::HTTP_10;

        headers.remove(http::header::TRANSFER_ENCODING);
        headers.remove(http::header::CONTENT_LENGTH);

        let mut buffer = GrowingBuffer::with_capacity(512);
        buffer.write_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        ));

        let mut body = if head_request || status_is_empty(status) {
            None
        } else {
            body
        };

        let close_delimited = match &mut body {
            Some(b) => match b.available(false) {
                Available::Exact(length) => {
                    buffer.write_str(&format!("content-length: {}\r\n", length));
                    false
                }
                Available::Unknown => {
                    if version_1_0 {
                        true
                    } else {
                        buffer.write(b"transfer-encoding: chunked\r\n");
                        let b2 = std::mem::replace(b, stream::istream_null());
                        *b = Box::new(ChunkedIstream::new(b2));
                        false
                    }
                }
            },
            None => {
                if !status_is_empty(status) {
                    buffer.write(b"content-length: 0\r\n");
                }
                false
            }
        };

        if !keep_alive || close_delimited {
            c.state.request.keep_alive = false;
            buffer.write(b"connection: close\r\n");
        }

        headers_write(&mut buffer, &headers);
        buffer.write(b"\r\n");

        let mut parts: Vec<BoxIstream> = vec![buffer.into_istream()];
        if let Some(b) = body {
            parts.push(b);
        }

        c.state.response_istream = Some(Box::new(ConcatIstream::new(parts)));

        c.pump_response();
    }
}
