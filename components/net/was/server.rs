/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The WAS server side: accepts the request packet sequence, hands
//! the request to an application handler, and sends the response
//! sequence back.  Used to run weft itself as a WAS application and
//! to exercise the client codec end-to-end.

use std::cell::RefCell;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::{Rc, Weak};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use log::debug;
use socket::buffered::BufferedSocket;
use socket::event_loop::{EventLoop, Readiness, SourceHandle};
use stream::error::StreamError;
use stream::istream::{Available, BoxIstream, FdType, Istream, IstreamHandler, ReadResult};
use stream::FifoBuffer;
use stream::slice_pool::global_pool;

use crate::error::ProtocolError;
use crate::was::command;
use crate::was::control::{WasControlSender, parse_control_packets};

pub struct WasServerRequest {
    pub method: Method,
    pub uri: String,
    pub script_name: Option<String>,
    pub path_info: Option<String>,
    pub query_string: Option<String>,
    pub headers: HeaderMap,
    pub parameters: Vec<(String, String)>,
    pub body: Option<BoxIstream>,
}

pub trait WasServerHandler {
    fn on_request(&mut self, request: WasServerRequest, sender: WasResponseSender);

    fn on_closed(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    /// Waiting for REQUEST.
    Idle,
    /// Collecting request metadata packets.
    Metadata,
    /// DATA/NO_DATA received, the request is dispatched.
    Dispatched,
}

struct PendingRequest {
    method: Method,
    uri: Option<String>,
    script_name: Option<String>,
    path_info: Option<String>,
    query_string: Option<String>,
    headers: HeaderMap,
    parameters: Vec<(String, String)>,
}

impl PendingRequest {
    fn new() -> PendingRequest {
        PendingRequest {
            method: Method::GET,
            uri: None,
            script_name: None,
            path_info: None,
            query_string: None,
            headers: HeaderMap::new(),
            parameters: Vec::new(),
        }
    }
}

pub struct WasServer {
    event_loop: EventLoop,
    control: BufferedSocket,
    input_fd: Option<OwnedFd>,
    input_source: Option<SourceHandle>,
    input_buffer: FifoBuffer,
    input_received: u64,
    input_announced: Option<u64>,
    input_eof: bool,

    output_fd: Option<OwnedFd>,
    output_source: Option<SourceHandle>,
    output_istream: Option<BoxIstream>,
    output_sent: u64,
    output_stopped: bool,

    sender: WasControlSender,
    phase: RequestPhase,
    pending: PendingRequest,
    handler: Box<dyn WasServerHandler>,
    finished: bool,

    self_weak: Weak<RefCell<WasServer>>,
}

pub fn was_server_new(
    event_loop: &EventLoop,
    control: OwnedFd,
    input: OwnedFd,
    output: OwnedFd,
    handler: Box<dyn WasServerHandler>,
) -> io::Result<Rc<RefCell<WasServer>>> {
    let server = Rc::new_cyclic(|self_weak| {
        RefCell::new(WasServer {
            event_loop: event_loop.clone(),
            control: BufferedSocket::new(control, FdType::Socket),
            input_fd: Some(input),
            input_source: None,
            input_buffer: FifoBuffer::from_pool(global_pool()),
            input_received: 0,
            input_announced: None,
            input_eof: false,
            output_fd: Some(output),
            output_source: None,
            output_istream: None,
            output_sent: 0,
            output_stopped: false,
            sender: WasControlSender::new(),
            phase: RequestPhase::Idle,
            pending: PendingRequest::new(),
            handler,
            finished: false,
            self_weak: self_weak.clone(),
        })
    });

    {
        let strong = Rc::clone(&server);
        let callback = Rc::new(RefCell::new(move |readiness: Readiness| {
            strong.borrow_mut().on_control_ready(readiness);
        }));
        let mut s = server.borrow_mut();
        s.control.register(event_loop, callback)?;

        if let Some(fd) = s.output_fd.as_ref().map(|fd| fd.as_raw_fd()) {
            let weak = Rc::downgrade(&server);
            let callback = Rc::new(RefCell::new(move |_readiness: Readiness| {
                if let Some(server) = weak.upgrade() {
                    server.borrow_mut().pump_output();
                }
            }));
            s.output_source = Some(event_loop.register_fd(fd, false, false, callback)?);
        }

        if let Some(fd) = s.input_fd.as_ref().map(|fd| fd.as_raw_fd()) {
            let weak = Rc::downgrade(&server);
            let callback = Rc::new(RefCell::new(move |_readiness: Readiness| {
                if let Some(server) = weak.upgrade() {
                    server.borrow_mut().fill_input_buffer();
                }
            }));
            s.input_source = Some(event_loop.register_fd(fd, false, false, callback)?);
        }

        s.control.io.schedule_read();
    }

    Ok(server)
}

impl WasServer {
    fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.control.io.close();
        self.input_source = None;
        self.input_fd = None;
        self.output_source = None;
        self.output_fd = None;
        self.output_istream = None;
        self.handler.on_closed();
    }

    fn protocol_error(&mut self, message: &str) {
        debug!("was-server: {}", message);
        self.shutdown();
    }

    fn on_control_ready(&mut self, readiness: Readiness) {
        if readiness.error {
            self.shutdown();
            return;
        }

        if readiness.writable {
            let flushed = {
                let WasServer {
                    control, sender, ..
                } = self;
                sender.flush(&mut control.io)
            };
            if !flushed {
                self.shutdown();
                return;
            }
        }

        if readiness.readable && !self.finished {
            self.consume_control();
        }
    }

    fn consume_control(&mut self) {
        self.control.fill_without_dispatch();

        loop {
            let mut packets: Vec<(u8, Vec<u8>)> = Vec::new();

            let consumed = {
                let data = self.control.input();
                if data.is_empty() {
                    break;
                }

                match parse_control_packets(data, 8192, &mut |packet| {
                    packets.push((packet.command, packet.payload.to_vec()));
                    true
                }) {
                    Ok(n) => n,
                    Err(e) => {
                        debug!("was-server: {}", e);
                        self.shutdown();
                        return;
                    }
                }
            };

            self.control.consumed(consumed);

            if packets.is_empty() {
                break;
            }

            for (cmd, payload) in packets {
                if !self.apply_packet(cmd, &payload) {
                    return;
                }
            }
        }

        if !self.finished {
            self.control.io.schedule_read();
        }
    }

    fn apply_packet(&mut self, cmd: u8, payload: &[u8]) -> bool {
        match cmd {
            command::NOP => true,

            command::REQUEST => {
                if self.phase != RequestPhase::Idle {
                    self.protocol_error("misplaced REQUEST packet");
                    return false;
                }
                self.phase = RequestPhase::Metadata;
                self.pending = PendingRequest::new();
                true
            }

            command::METHOD => {
                if self.phase != RequestPhase::Metadata || payload.len() != 4 {
                    self.protocol_error("malformed METHOD packet");
                    return false;
                }
                let code = u32::from_le_bytes(payload.try_into().unwrap());
                self.pending.method = match code {
                    1 => Method::GET,
                    2 => Method::HEAD,
                    3 => Method::POST,
                    4 => Method::PUT,
                    5 => Method::DELETE,
                    6 => Method::OPTIONS,
                    7 => Method::TRACE,
                    _ => {
                        self.protocol_error("unknown METHOD");
                        return false;
                    }
                };
                true
            }

            command::URI | command::SCRIPT_NAME | command::PATH_INFO | command::QUERY_STRING => {
                if self.phase != RequestPhase::Metadata {
                    self.protocol_error("misplaced request packet");
                    return false;
                }
                let value = String::from_utf8_lossy(payload).into_owned();
                match cmd {
                    command::URI => self.pending.uri = Some(value),
                    command::SCRIPT_NAME => self.pending.script_name = Some(value),
                    command::PATH_INFO => self.pending.path_info = Some(value),
                    command::QUERY_STRING => self.pending.query_string = Some(value),
                    _ => unreachable!(),
                }
                true
            }

            command::HEADER => {
                if self.phase != RequestPhase::Metadata {
                    self.protocol_error("misplaced HEADER packet");
                    return false;
                }
                let Some(eq) = payload.iter().position(|&ch| ch == b'=') else {
                    self.protocol_error("malformed HEADER packet");
                    return false;
                };
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(&payload[..eq]),
                    HeaderValue::from_bytes(&payload[eq + 1..]),
                ) {
                    self.pending.headers.append(name, value);
                }
                true
            }

            command::PARAMETER => {
                if self.phase != RequestPhase::Metadata {
                    self.protocol_error("misplaced PARAMETER packet");
                    return false;
                }
                if let Some(eq) = payload.iter().position(|&ch| ch == b'=') {
                    self.pending.parameters.push((
                        String::from_utf8_lossy(&payload[..eq]).into_owned(),
                        String::from_utf8_lossy(&payload[eq + 1..]).into_owned(),
                    ));
                }
                true
            }

            command::DATA | command::NO_DATA => {
                if self.phase != RequestPhase::Metadata {
                    self.protocol_error("misplaced DATA/NO_DATA packet");
                    return false;
                }
                self.dispatch_request(cmd == command::DATA);
                true
            }

            command::LENGTH => {
                if payload.len() != 8 {
                    self.protocol_error("malformed LENGTH packet");
                    return false;
                }
                self.input_announced = Some(u64::from_le_bytes(payload.try_into().unwrap()));
                true
            }

            command::STOP => {
                /* cease sending our response body; answer with the
                   byte count */
                self.output_istream = None;
                self.output_stopped = true;
                let sent = self.output_sent;
                let flushed = {
                    let WasServer {
                        control, sender, ..
                    } = self;
                    sender.send_u64(command::PREMATURE, sent);
                    sender.flush(&mut control.io)
                };
                if !flushed {
                    self.shutdown();
                    return false;
                }
                true
            }

            command::PREMATURE => {
                if payload.len() != 8 {
                    self.protocol_error("malformed PREMATURE packet");
                    return false;
                }
                self.input_announced = Some(u64::from_le_bytes(payload.try_into().unwrap()));
                self.input_eof = true;
                true
            }

            _ => {
                self.protocol_error("unexpected WAS packet");
                false
            }
        }
    }

    fn dispatch_request(&mut self, has_body: bool) {
        self.phase = RequestPhase::Dispatched;

        let Some(uri) = self.pending.uri.take() else {
            self.protocol_error("request without URI");
            return;
        };

        let body: Option<BoxIstream> = if has_body {
            self.self_weak
                .upgrade()
                .map(|server| Box::new(WasRequestBodyIstream { server }) as BoxIstream)
        } else {
            None
        };

        let request = WasServerRequest {
            method: self.pending.method.clone(),
            uri,
            script_name: self.pending.script_name.take(),
            path_info: self.pending.path_info.take(),
            query_string: self.pending.query_string.take(),
            headers: std::mem::take(&mut self.pending.headers),
            parameters: std::mem::take(&mut self.pending.parameters),
            body,
        };

        let sender = WasResponseSender {
            server: self.self_weak.clone(),
            event_loop: self.event_loop.clone(),
        };

        self.handler.on_request(request, sender);
    }

    fn fill_input_buffer(&mut self) {
        let Some(fd) = self.input_fd.as_ref().map(|fd| fd.as_raw_fd()) else {
            return;
        };

        let w = self.input_buffer.write();
        if w.is_empty() {
            if let Some(source) = &self.input_source {
                let _ = source.set_interest(false, false);
            }
            return;
        }

        let nbytes = unsafe { libc::read(fd, w.as_mut_ptr() as *mut libc::c_void, w.len()) };
        if nbytes > 0 {
            let nbytes = nbytes as usize;
            self.input_buffer.append(nbytes);
            self.input_received += nbytes as u64;
        } else if nbytes == 0 {
            self.input_eof = true;
        }
    }

    fn read_request_body(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let mut progressed = false;

        loop {
            let pending = self.input_buffer.read();
            if !pending.is_empty() {
                let nbytes = handler.on_data(pending);
                self.input_buffer.consume(nbytes);
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

            if self
                .input_announced
                .map(|length| self.input_received >= length)
                .unwrap_or(false)
                || self.input_eof
            {
                handler.on_eof();
                return ReadResult::Eof;
            }

            let before = self.input_received;
            self.fill_input_buffer();
            if self.input_received == before && !self.input_eof {
                if let Some(source) = &self.input_source {
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

    fn pump_output(&mut self) {
        let Some(fd) = self.output_fd.as_ref().map(|fd| fd.as_raw_fd()) else {
            return;
        };

        if self.output_istream.is_none() {
            return;
        }

        let mut blocked = false;
        let mut failed = None;
        let result = {
            let istream = self.output_istream.as_mut().unwrap();
            let mut writer = crate::was::PipeWriter {
                fd,
                sent: &mut self.output_sent,
                blocked: &mut blocked,
                failed: &mut failed,
            };
            istream.read(&mut writer)
        };

        if failed.is_some() {
            self.shutdown();
            return;
        }

        match result {
            ReadResult::Eof => {
                self.output_istream = None;
                self.phase = RequestPhase::Idle;
            }
            ReadResult::Error => self.shutdown(),
            ReadResult::Progress | ReadResult::Blocked => {
                if let Some(source) = &self.output_source {
                    let _ = source.set_interest(false, blocked);
                }
            }
        }
    }
}

struct WasRequestBodyIstream {
    server: Rc<RefCell<WasServer>>,
}

impl Istream for WasRequestBodyIstream {
    fn available(&self, partial: bool) -> Available {
        if let Ok(server) = self.server.try_borrow() {
            if let Some(announced) = server.input_announced {
                let delivered =
                    server.input_received - server.input_buffer.available() as u64;
                return Available::Exact(announced.saturating_sub(delivered));
            }
            if partial {
                return Available::Exact(server.input_buffer.available() as u64);
            }
        }
        Available::Unknown
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Ok(mut server) = self.server.try_borrow_mut() else {
            return ReadResult::Blocked;
        };
        server.read_request_body(handler)
    }
}

/// One-shot handle for sending the response.
pub struct WasResponseSender {
    server: Weak<RefCell<WasServer>>,
    event_loop: EventLoop,
}

impl WasResponseSender {
    pub fn send(self, status: StatusCode, headers: &HeaderMap, body: Option<BoxIstream>) {
        let Some(server) = self.server.upgrade() else {
            return;
        };

        let Ok(mut s) = server.try_borrow_mut() else {
            /* answered synchronously from inside the dispatch:
               postpone one loop iteration */
            let weak = self.server.clone();
            let event_loop = self.event_loop.clone();
            let headers = headers.clone();
            self.event_loop.defer(move || {
                let sender = WasResponseSender {
                    server: weak,
                    event_loop,
                };
                sender.send(status, &headers, body);
            });
            return;
        };

        if s.finished {
            return;
        }

        let length = body.as_ref().and_then(|b| b.available(false).exact());

        {
            let WasServer {
                control, sender, ..
            } = &mut *s;
            sender.bulk_on();
            sender.send_headers(command::HEADER, headers);
            sender.send_u32(command::STATUS, status.as_u16() as u32);
            sender.send_empty(if body.is_some() {
                command::DATA
            } else {
                command::NO_DATA
            });
            if body.is_some() {
                if let Some(length) = length {
                    /* LENGTH is only valid after DATA */
                    sender.send_u64(command::LENGTH, length);
                }
            }
            sender.bulk_off();
            if !sender.flush(&mut control.io) {
                s.shutdown();
                return;
            }
        }

        match body {
            Some(body) => {
                s.output_istream = Some(body);
                s.output_sent = 0;
                s.pump_output();
            }
            None => {
                s.phase = RequestPhase::Idle;
            }
        }
    }
}
