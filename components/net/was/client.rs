/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The WAS client: sends the request packet sequence on the control
//! channel, pumps the request body into the output pipe, and serves
//! the response body from the input pipe as an istream.

use std::cell::{Cell, RefCell};
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use log::debug;
use socket::buffered::BufferedSocket;
use socket::event_loop::{EventLoop, Readiness, SourceHandle, TimerEvent};
use stream::cancellable::{Cancellable, CancellablePointer};
use stream::error::{StreamError, TimeoutError};
use stream::istream::{
    Available, BoxIstream, FdType, Istream, IstreamHandler, ReadResult,
};
use stream::FifoBuffer;
use stream::slice_pool::global_pool;

use crate::error::ProtocolError;
use crate::http::response::HttpResponseHandler;
use crate::http::status_is_empty;
use crate::was::command;
use crate::was::control::{WasControlSender, parse_control_packets};

const WAS_CONTROL_TIMEOUT: Duration = Duration::from_secs(120);

/// The three fds of one WAS connection.
pub struct WasConnection {
    pub control: OwnedFd,
    pub input: OwnedFd,
    pub output: OwnedFd,
}

/// Returns the connection to its pool, or drops it.
pub trait WasLease {
    fn release(self: Box<Self>, connection: Option<WasConnection>, reuse: bool);
}

impl<F: FnOnce(Option<WasConnection>, bool)> WasLease for F {
    fn release(self: Box<Self>, connection: Option<WasConnection>, reuse: bool) {
        self(connection, reuse)
    }
}

struct WasInputState {
    fd: Option<OwnedFd>,
    source: Option<SourceHandle>,
    buffer: FifoBuffer,
    received: u64,
    /// Body length announced by a LENGTH packet.
    announced: Option<u64>,
    /// A PREMATURE packet said the body stops at this offset.
    premature: Option<u64>,
    eof: bool,
    error: Option<StreamError>,
}

impl WasInputState {
    fn known_complete(&self) -> bool {
        self.eof
            || self
                .announced
                .map(|length| self.received >= length)
                .unwrap_or(false)
    }
}

struct WasOutputState {
    fd: Option<OwnedFd>,
    source: Option<SourceHandle>,
    istream: Option<BoxIstream>,
    sent: u64,
    length_known: Option<u64>,
}

struct WasResponseState {
    status: StatusCode,
    headers: Option<HeaderMap>,
    /// DATA received; deliver the response once the control buffer
    /// drained.
    pending: bool,
    body_expected: bool,
}

struct WasClientState {
    lease: Option<Box<dyn WasLease>>,
    handler: Option<Box<dyn HttpResponseHandler>>,
    sender: WasControlSender,
    response: WasResponseState,
    finished: bool,
}

pub struct WasClient {
    control: BufferedSocket,
    input: WasInputState,
    output: WasOutputState,
    state: WasClientState,
    timer: Option<Rc<TimerEvent>>,
    body_abandoned: Rc<Cell<bool>>,
    self_weak: Weak<RefCell<WasClient>>,
}

/// Send one request over a WAS connection.
#[allow(clippy::too_many_arguments)]
pub fn was_client_request(
    event_loop: &EventLoop,
    connection: WasConnection,
    lease: Box<dyn WasLease>,
    method: Method,
    uri: &str,
    script_name: Option<&str>,
    path_info: Option<&str>,
    query_string: Option<&str>,
    headers: &HeaderMap,
    parameters: &[(String, String)],
    body: Option<BoxIstream>,
    handler: Box<dyn HttpResponseHandler>,
    cancel_ptr: &mut CancellablePointer,
) {
    let body_expected = !crate::http::method_is_empty(&method);
    let has_request_body = body.is_some();

    let client = Rc::new_cyclic(|self_weak| {
        RefCell::new(WasClient {
            control: BufferedSocket::new(connection.control, FdType::Socket),
            input: WasInputState {
                fd: Some(connection.input),
                source: None,
                buffer: FifoBuffer::from_pool(global_pool()),
                received: 0,
                announced: None,
                premature: None,
                eof: false,
                error: None,
            },
            output: WasOutputState {
                fd: Some(connection.output),
                source: None,
                istream: body,
                sent: 0,
                length_known: None,
            },
            state: WasClientState {
                lease: Some(lease),
                handler: Some(handler),
                sender: WasControlSender::new(),
                response: WasResponseState {
                    status: StatusCode::OK,
                    headers: Some(HeaderMap::new()),
                    pending: false,
                    body_expected,
                },
                finished: false,
            },
            timer: None,
            body_abandoned: Rc::new(Cell::new(false)),
            self_weak: self_weak.clone(),
        })
    });

    {
        let strong = Rc::clone(&client);
        let callback = Rc::new(RefCell::new(move |readiness: Readiness| {
            strong.borrow_mut().on_control_ready(readiness);
        }));
        let mut c = client.borrow_mut();
        if let Err(e) = c.control.register(event_loop, callback) {
            c.abort(StreamError::new(e));
            return;
        }

        let timer = Rc::new(TimerEvent::new(event_loop, {
            let weak = Rc::downgrade(&client);
            move || {
                if let Some(client) = weak.upgrade() {
                    client
                        .borrow_mut()
                        .abort(StreamError::new(TimeoutError("WAS control timeout")));
                }
            }
        }));
        c.control
            .io
            .set_read_timeout(Some((WAS_CONTROL_TIMEOUT, Rc::clone(&timer))));
        c.timer = Some(timer);

        /* register the body pipes */
        if let Some(fd) = c.output.fd.as_ref().map(|fd| fd.as_raw_fd()) {
            let weak = Rc::downgrade(&client);
            let callback = Rc::new(RefCell::new(move |_readiness: Readiness| {
                if let Some(client) = weak.upgrade() {
                    client.borrow_mut().pump_output();
                }
            }));
            match event_loop.register_fd(fd, false, false, callback) {
                Ok(source) => c.output.source = Some(source),
                Err(e) => {
                    c.abort(StreamError::new(e));
                    return;
                }
            }
        }

        if let Some(fd) = c.input.fd.as_ref().map(|fd| fd.as_raw_fd()) {
            let weak = Rc::downgrade(&client);
            let callback = Rc::new(RefCell::new(move |_readiness: Readiness| {
                if let Some(client) = weak.upgrade() {
                    /* fill the pipe buffer so the consumer finds the
                       bytes on its next pull */
                    client.borrow_mut().fill_input_buffer();
                }
            }));
            match event_loop.register_fd(fd, false, false, callback) {
                Ok(source) => c.input.source = Some(source),
                Err(e) => {
                    c.abort(StreamError::new(e));
                    return;
                }
            }
        }

        /* send the request packet group in one batch */
        let WasClient { control, state, .. } = &mut *c;
        let sender = &mut state.sender;
        sender.bulk_on();
        sender.send_empty(command::REQUEST);
        if method != Method::GET {
            sender.send_u32(command::METHOD, method_to_was(&method));
        }
        sender.send_string(command::URI, uri);
        if let Some(script_name) = script_name {
            sender.send_string(command::SCRIPT_NAME, script_name);
        }
        if let Some(path_info) = path_info {
            sender.send_string(command::PATH_INFO, path_info);
        }
        if let Some(query_string) = query_string {
            sender.send_string(command::QUERY_STRING, query_string);
        }
        sender.send_headers(command::HEADER, headers);
        for (name, value) in parameters {
            let mut payload = Vec::with_capacity(name.len() + 1 + value.len());
            payload.extend_from_slice(name.as_bytes());
            payload.push(b'=');
            payload.extend_from_slice(value.as_bytes());
            sender.send(command::PARAMETER, &payload);
        }
        sender.send_empty(if has_request_body {
            command::DATA
        } else {
            command::NO_DATA
        });
        sender.bulk_off();

        if !sender.flush(&mut control.io) {
            c.abort(StreamError::new(ProtocolError::io(
                "failed to send WAS request",
            )));
            return;
        }

        c.control.io.schedule_read();
        c.pump_output();
    }

    cancel_ptr.set(Rc::new(RefCell::new(WasClientCancel { client })));
}

fn method_to_was(method: &Method) -> u32 {
    match *method {
        Method::GET => 1,
        Method::HEAD => 2,
        Method::POST => 3,
        Method::PUT => 4,
        Method::DELETE => 5,
        Method::OPTIONS => 6,
        Method::TRACE => 7,
        _ => 0,
    }
}

struct WasClientCancel {
    client: Rc<RefCell<WasClient>>,
}

impl Cancellable for WasClientCancel {
    fn cancel(&mut self) {
        let mut client = self.client.borrow_mut();
        client.state.handler = None;
        client.release(false);
    }
}

impl WasClient {
    /// Tear everything down; `reuse` only after a completely clean
    /// exchange.
    fn release(&mut self, reuse: bool) {
        let control_fd = self.control.io.abandon();
        self.input.source = None;
        self.output.source = None;
        self.output.istream = None;
        self.state.finished = true;

        if let Some(lease) = self.state.lease.take() {
            let connection = if reuse {
                match (control_fd, self.input.fd.take(), self.output.fd.take()) {
                    (Some(control), Some(input), Some(output)) => Some(WasConnection {
                        control,
                        input,
                        output,
                    }),
                    _ => None,
                }
            } else {
                None
            };
            let reuse = reuse && connection.is_some();
            lease.release(connection, reuse);
        }

        self.input.fd = None;
        self.output.fd = None;
    }

    fn abort(&mut self, error: StreamError) {
        if self.state.finished {
            return;
        }

        self.release(false);

        if let Some(handler) = self.state.handler.take() {
            handler.on_error(error);
        } else if !self.input.eof {
            self.input.error = Some(error);
        }
    }

    fn on_control_ready(&mut self, readiness: Readiness) {
        if readiness.error {
            self.abort(StreamError::new(ProtocolError::io("control socket error")));
            return;
        }

        if readiness.writable {
            let WasClient { control, state, .. } = self;
            if !state.sender.flush(&mut control.io) {
                self.abort(StreamError::new(ProtocolError::io(
                    "write error on WAS control",
                )));
                return;
            }
        }

        if readiness.readable && !self.state.finished {
            self.consume_control();
        }
    }

    /// Read and dispatch control packets.
    fn consume_control(&mut self) {
        /* pull from the kernel into the socket buffer */
        self.control.fill_without_dispatch();

        loop {
            let mut actions: Vec<ControlAction> = Vec::new();
            let capacity = 8192;

            let consumed = {
                let data = self.control.input();
                if data.is_empty() {
                    break;
                }

                match parse_control_packets(data, capacity, &mut |packet| {
                    actions.push(ControlAction::from_packet(packet.command, packet.payload));
                    true
                }) {
                    Ok(n) => n,
                    Err(e) => {
                        self.abort(e);
                        return;
                    }
                }
            };

            self.control.consumed(consumed);

            if actions.is_empty() {
                break;
            }

            for action in actions {
                if !self.apply_control_action(action) {
                    return;
                }
            }
        }

        if self.state.finished {
            return;
        }

        /* the input buffer is drained */
        if self.state.response.pending {
            self.deliver_response_with_body();
            return;
        }

        self.control.io.schedule_read();
    }

    fn apply_control_action(&mut self, action: ControlAction) -> bool {
        match action {
            ControlAction::Nop => true,

            ControlAction::Unexpected(cmd) => {
                self.abort(StreamError::new(ProtocolError::unspecified(format!(
                    "unexpected WAS packet {}",
                    cmd
                ))));
                false
            }

            ControlAction::Header(payload) => {
                if self.state.handler.is_none() {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "response header was too late",
                    )));
                    return false;
                }

                let Some(eq) = payload.iter().position(|&ch| ch == b'=') else {
                    self.abort(StreamError::new(ProtocolError::garbage(
                        "malformed WAS HEADER packet",
                    )));
                    return false;
                };
                if eq == 0 {
                    self.abort(StreamError::new(ProtocolError::garbage(
                        "malformed WAS HEADER packet",
                    )));
                    return false;
                }

                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(&payload[..eq]),
                    HeaderValue::from_bytes(&payload[eq + 1..]),
                ) {
                    if let Some(headers) = &mut self.state.response.headers {
                        headers.append(name, value);
                    }
                }
                true
            }

            ControlAction::Status(payload) => {
                if self.state.handler.is_none() {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "STATUS after body start",
                    )));
                    return false;
                }

                if payload.len() != 4 {
                    self.abort(StreamError::new(ProtocolError::garbage(
                        "malformed STATUS",
                    )));
                    return false;
                }

                let code = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let Ok(status) = StatusCode::from_u16(code as u16) else {
                    self.abort(StreamError::new(ProtocolError::garbage(
                        "malformed STATUS",
                    )));
                    return false;
                };

                self.state.response.status = status;
                if status_is_empty(status) {
                    self.state.response.body_expected = false;
                }
                true
            }

            ControlAction::NoData => {
                if self.state.handler.is_none() {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "NO_DATA after body start",
                    )));
                    return false;
                }

                let status = self.state.response.status;
                let headers = self.state.response.headers.take().unwrap_or_default();
                let handler = self.state.handler.take().unwrap();

                self.release(false);
                handler.on_response(status, headers, None);
                false
            }

            ControlAction::Data => {
                if self.state.handler.is_none() {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "DATA after body start",
                    )));
                    return false;
                }

                if !self.state.response.body_expected {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "no response body allowed",
                    )));
                    return false;
                }

                self.state.response.pending = true;
                true
            }

            ControlAction::Length(payload) => {
                if self.state.handler.is_some() && !self.state.response.pending {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "LENGTH before DATA",
                    )));
                    return false;
                }

                if payload.len() != 8 {
                    self.abort(StreamError::new(ProtocolError::garbage(
                        "malformed LENGTH packet",
                    )));
                    return false;
                }

                let length = u64::from_le_bytes(payload.try_into().unwrap());
                if let Some(announced) = self.input.announced {
                    if announced != length {
                        self.abort(StreamError::new(ProtocolError::unspecified(
                            "inconsistent LENGTH packet",
                        )));
                        return false;
                    }
                } else if length < self.input.received {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "invalid LENGTH packet",
                    )));
                    return false;
                }

                self.input.announced = Some(length);
                true
            }

            ControlAction::Stop => {
                /* the peer wants us to stop sending the request
                   body; answer with PREMATURE and never reuse the
                   socket */
                self.output.istream = None;
                self.output.source = None;
                let sent = self.output.sent;
                let WasClient { control, state, .. } = self;
                state.sender.send_u64(command::PREMATURE, sent);
                if !state.sender.flush(&mut control.io) {
                    self.abort(StreamError::new(ProtocolError::io(
                        "write error on WAS control",
                    )));
                    return false;
                }
                true
            }

            ControlAction::Premature(payload) => {
                if payload.len() != 8 {
                    self.abort(StreamError::new(ProtocolError::garbage(
                        "malformed PREMATURE packet",
                    )));
                    return false;
                }

                let length = u64::from_le_bytes(payload.try_into().unwrap());
                self.input.premature = Some(length);
                self.input.announced = Some(length);

                if self.state.handler.is_some() {
                    self.abort(StreamError::new(ProtocolError::unspecified(
                        "PREMATURE before DATA",
                    )));
                    return false;
                }
                true
            }
        }
    }

    fn deliver_response_with_body(&mut self) {
        debug_assert!(self.state.response.pending);

        self.state.response.pending = false;

        let status = self.state.response.status;
        let headers = self.state.response.headers.take().unwrap_or_default();
        let Some(handler) = self.state.handler.take() else {
            return;
        };

        let body: Option<BoxIstream> = self.self_weak.upgrade().map(|client| {
            Box::new(WasBodyIstream {
                client,
                abandoned: Rc::clone(&self.body_abandoned),
            }) as BoxIstream
        });

        handler.on_response(status, headers, body);

        if !self.state.finished {
            self.control.io.schedule_read();
        }
    }

    /// Pump the request body into the output pipe.
    fn pump_output(&mut self) {
        let Some(fd) = self.output.fd.as_ref().map(|fd| fd.as_raw_fd()) else {
            return;
        };

        if self.output.istream.is_none() {
            return;
        }

        /* announce the length once it is known */
        if self.output.length_known.is_none() {
            if let Available::Exact(n) = self.output.istream.as_ref().unwrap().available(false) {
                let total = self.output.sent + n;
                self.output.length_known = Some(total);
                let WasClient { control, state, .. } = self;
                state.sender.send_u64(command::LENGTH, total);
                if !state.sender.flush(&mut control.io) {
                    self.abort(StreamError::new(ProtocolError::io(
                        "write error on WAS control",
                    )));
                    return;
                }
            }
        }

        let mut blocked = false;
        let mut failed = None;
        let result = {
            let istream = self.output.istream.as_mut().unwrap();
            let mut writer = crate::was::PipeWriter {
                fd,
                sent: &mut self.output.sent,
                blocked: &mut blocked,
                failed: &mut failed,
            };
            istream.read(&mut writer)
        };

        if let Some(e) = failed {
            self.abort(StreamError::new(e).prefixed("write error on WAS output pipe: "));
            return;
        }

        match result {
            ReadResult::Eof => {
                self.output.istream = None;
                self.output.source = None;
            }
            ReadResult::Error => {
                self.abort(StreamError::new(ProtocolError::unspecified(
                    "request body stream failed",
                )));
            }
            ReadResult::Progress | ReadResult::Blocked => {
                if let Some(source) = &self.output.source {
                    let _ = source.set_interest(false, blocked);
                }
            }
        }
    }

    fn fill_input_buffer(&mut self) {
        let Some(fd) = self.input.fd.as_ref().map(|fd| fd.as_raw_fd()) else {
            return;
        };

        let w = self.input.buffer.write();
        if w.is_empty() {
            if let Some(source) = &self.input.source {
                let _ = source.set_interest(false, false);
            }
            return;
        }

        let nbytes =
            unsafe { libc::read(fd, w.as_mut_ptr() as *mut libc::c_void, w.len()) };
        if nbytes > 0 {
            let nbytes = nbytes as usize;
            self.input.buffer.append(nbytes);
            self.input.received += nbytes as u64;
        } else if nbytes == 0 {
            self.input.eof = true;
        }
    }

    /// The response-body istream pulls here.
    fn read_input(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if let Some(error) = self.input.error.take() {
            handler.on_error(error);
            return ReadResult::Error;
        }

        let mut progressed = false;

        loop {
            let pending = self.input.buffer.read();
            if !pending.is_empty() {
                /* clip to the announced length */
                let limit = match self.input.announced {
                    Some(announced) => {
                        let before = self.input.received - pending.len() as u64;
                        ((announced - before.min(announced)) as usize).min(pending.len())
                    }
                    None => pending.len(),
                };

                if limit > 0 {
                    let nbytes = handler.on_data(&pending[..limit]);
                    self.input.buffer.consume(nbytes);
                    if nbytes == 0 {
                        return if progressed {
                            ReadResult::Progress
                        } else {
                            ReadResult::Blocked
                        };
                    }
                    progressed = true;
                    continue;
                }

                /* excess bytes beyond the announced length */
                let excess = pending.len();
                self.input.buffer.consume(excess);
            }

            if let Some(premature) = self.input.premature {
                if self.input.received >= premature {
                    handler.on_error(StreamError::new(ProtocolError::unspecified(
                        "premature end of WAS response body",
                    )));
                    self.finish_body(false);
                    return ReadResult::Error;
                }
            }

            if self.input.known_complete() {
                self.finish_body(self.input.premature.is_none());
                handler.on_eof();
                return ReadResult::Eof;
            }

            let before = self.input.received;
            self.fill_input_buffer();
            if self.input.received == before {
                if self.input.eof {
                    continue; /* known_complete above decides */
                }
                if let Some(source) = &self.input.source {
                    let _ = source.set_interest(true, false);
                }
                return if progressed {
                    ReadResult::Progress
                } else {
                    ReadResult::Blocked
                };
            }
        }
    }

    /// The response body ended; wind the connection down.
    fn finish_body(&mut self, clean: bool) {
        let request_done = self.output.istream.is_none();
        let control_idle = self.state.sender.is_empty() && self.control.is_empty();
        self.release(clean && request_done && control_idle);
    }
}

enum ControlAction {
    Nop,
    Unexpected(u8),
    Header(Vec<u8>),
    Status(Vec<u8>),
    NoData,
    Data,
    Length(Vec<u8>),
    Stop,
    Premature(Vec<u8>),
}

impl ControlAction {
    fn from_packet(cmd: u8, payload: &[u8]) -> ControlAction {
        match cmd {
            command::NOP => ControlAction::Nop,
            command::HEADER => ControlAction::Header(payload.to_vec()),
            command::STATUS => ControlAction::Status(payload.to_vec()),
            command::NO_DATA => ControlAction::NoData,
            command::DATA => ControlAction::Data,
            command::LENGTH => ControlAction::Length(payload.to_vec()),
            command::STOP => ControlAction::Stop,
            command::PREMATURE => ControlAction::Premature(payload.to_vec()),
            other => ControlAction::Unexpected(other),
        }
    }
}

struct WasBodyIstream {
    client: Rc<RefCell<WasClient>>,
    abandoned: Rc<Cell<bool>>,
}

impl Istream for WasBodyIstream {
    fn available(&self, partial: bool) -> Available {
        if let Ok(client) = self.client.try_borrow() {
            if let Some(announced) = client.input.announced {
                let delivered =
                    client.input.received - client.input.buffer.available() as u64;
                return Available::Exact(announced.saturating_sub(delivered));
            }
            if partial {
                return Available::Exact(client.input.buffer.available() as u64);
            }
        }
        Available::Unknown
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Ok(mut client) = self.client.try_borrow_mut() else {
            return ReadResult::Blocked;
        };
        client.read_input(handler)
    }
}

impl Drop for WasBodyIstream {
    fn drop(&mut self) {
        let finished = match self.client.try_borrow() {
            Ok(client) => client.state.finished,
            Err(_) => true,
        };
        if finished {
            return;
        }

        self.abandoned.set(true);
        if let Ok(mut client) = self.client.try_borrow_mut() {
            debug!("WAS response body abandoned");
            client.release(false);
        }
    }
}
