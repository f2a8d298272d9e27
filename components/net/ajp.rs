/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! AJPv13 client: binary packet codec with header translation.
//! Request packets are `{0x12, 0x34, length16, payload}`; responses
//! come as `{'A', 'B', length16, payload}` with a prefix code as the
//! first payload byte.

use std::cell::{Cell, RefCell};
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use log::debug;
use socket::buffered::{
    BufferedResult, BufferedSocket, BufferedSocketHandler, SocketIo, WriteResult,
};
use socket::event_loop::{EventLoop, Readiness, TimerEvent};
use socket::lease::Lease;
use stream::cancellable::{Cancellable, CancellablePointer};
use stream::error::{StreamError, TimeoutError};
use stream::istream::{
    Available, BoxIstream, Istream, IstreamHandler, ReadResult,
};
use stream::{ConcatIstream, GrowingBuffer};

use crate::error::ProtocolError;
use crate::http::response::HttpResponseHandler;

const AJP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum payload of one body packet.
const AJP_BODY_CHUNK_MAX: usize = 8186;

mod code {
    pub const FORWARD_REQUEST: u8 = 2;
    pub const SEND_BODY_CHUNK: u8 = 3;
    pub const SEND_HEADERS: u8 = 4;
    pub const END_RESPONSE: u8 = 5;
    pub const GET_BODY_CHUNK: u8 = 6;
    pub const SHUTDOWN: u8 = 7;
    pub const CPONG: u8 = 9;
    pub const CPING: u8 = 10;
}

fn method_code(method: &Method) -> Option<u8> {
    Some(match *method {
        Method::OPTIONS => 1,
        Method::GET => 2,
        Method::HEAD => 3,
        Method::POST => 4,
        Method::PUT => 5,
        Method::DELETE => 6,
        Method::TRACE => 7,
        _ => return None,
    })
}

/// The `SC_REQ_*` header codes of the protocol.
const REQUEST_HEADER_CODES: &[(&str, u16)] = &[
    ("accept", 0xA001),
    ("accept-charset", 0xA002),
    ("accept-encoding", 0xA003),
    ("accept-language", 0xA004),
    ("authorization", 0xA005),
    ("connection", 0xA006),
    ("content-type", 0xA007),
    ("content-length", 0xA008),
    ("cookie", 0xA009),
    ("cookie2", 0xA00A),
    ("host", 0xA00B),
    ("pragma", 0xA00C),
    ("referer", 0xA00D),
    ("user-agent", 0xA00E),
];

/// The `SC_RES_*` header codes of the protocol.
const RESPONSE_HEADER_CODES: &[(u8, &str)] = &[
    (0x01, "content-type"),
    (0x02, "content-language"),
    (0x03, "content-length"),
    (0x04, "date"),
    (0x05, "last-modified"),
    (0x06, "location"),
    (0x07, "set-cookie"),
    (0x08, "set-cookie2"),
    (0x09, "servlet-engine"),
    (0x0A, "status"),
    (0x0B, "www-authenticate"),
];

fn write_ajp_string(buffer: &mut GrowingBuffer, s: &str) {
    buffer.write_u16_be(s.len() as u16);
    buffer.write_str(s);
    buffer.write_u8(0);
}

fn write_ajp_bytes(buffer: &mut GrowingBuffer, s: &[u8]) {
    buffer.write_u16_be(s.len() as u16);
    buffer.write(s);
    buffer.write_u8(0);
}

/// Assemble a FORWARD_REQUEST packet; the packet length is patched
/// in before the buffer is returned.
pub fn serialize_forward_request(
    method: &Method,
    uri: &str,
    headers: &HeaderMap,
    content_length: Option<u64>,
) -> Option<GrowingBuffer> {
    let method_code = method_code(method)?;

    let mut buffer = GrowingBuffer::with_capacity(512);
    buffer.write(&[0x12, 0x34]);
    let length_offset = buffer.reserve(2);

    buffer.write_u8(code::FORWARD_REQUEST);
    buffer.write_u8(method_code);
    write_ajp_string(&mut buffer, "http");
    write_ajp_string(&mut buffer, uri);
    write_ajp_string(&mut buffer, "127.0.0.1"); /* remote_addr */
    write_ajp_string(&mut buffer, "localhost"); /* remote_host */
    write_ajp_string(&mut buffer, "localhost"); /* server_name */
    buffer.write_u16_be(80); /* server_port */
    buffer.write_u8(0); /* is_ssl */

    let num_headers = headers.len() + content_length.map(|_| 1).unwrap_or(0);
    buffer.write_u16_be(num_headers as u16);

    for (name, value) in headers {
        match REQUEST_HEADER_CODES
            .iter()
            .find(|(n, _)| *n == name.as_str())
        {
            Some((_, header_code)) => buffer.write_u16_be(*header_code),
            None => write_ajp_string(&mut buffer, name.as_str()),
        }
        write_ajp_bytes(&mut buffer, value.as_bytes());
    }

    if let Some(content_length) = content_length {
        buffer.write_u16_be(0xA008);
        write_ajp_string(&mut buffer, &content_length.to_string());
    }

    /* attribute terminator */
    buffer.write_u8(0xFF);

    let payload_length = (buffer.len() - 4) as u16;
    buffer.patch(length_offset, &payload_length.to_be_bytes());

    Some(buffer)
}

/// Consumes the response stream.
pub trait AjpResponseSink {
    fn on_headers(&mut self, status: StatusCode, headers: HeaderMap);

    /// Body bytes; returning less than offered exerts back-pressure.
    fn on_body_data(&mut self, data: &[u8]) -> usize;

    fn on_end(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Begin,
    Body,
    End,
}

/// The packet-level response state machine, separated from the
/// socket plumbing so it can be fed byte chunks of any size.
pub struct AjpResponseParser {
    state: ParserState,
    /// Remaining payload bytes of the current SEND_BODY_CHUNK.
    chunk_length: usize,
    /// Padding after the chunk payload, discarded.
    junk_length: usize,
}

impl Default for AjpResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AjpResponseParser {
    pub fn new() -> AjpResponseParser {
        AjpResponseParser {
            state: ParserState::Begin,
            chunk_length: 0,
            junk_length: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParserState::End
    }

    pub fn in_body(&self) -> bool {
        self.state == ParserState::Body
    }

    /// Feed response bytes; returns how many were consumed.
    pub fn feed(
        &mut self,
        data: &[u8],
        sink: &mut dyn AjpResponseSink,
    ) -> Result<usize, StreamError> {
        let mut i = 0usize;

        loop {
            /* data left over from the current body chunk */
            if self.state == ParserState::Body {
                while self.chunk_length > 0 && i < data.len() {
                    let take = (data.len() - i).min(self.chunk_length);
                    let nbytes = sink.on_body_data(&data[i..i + take]);
                    i += nbytes;
                    self.chunk_length -= nbytes;
                    if nbytes == 0 {
                        return Ok(i);
                    }
                }
                if self.chunk_length > 0 {
                    return Ok(i);
                }

                let junk = (data.len() - i).min(self.junk_length);
                i += junk;
                self.junk_length -= junk;
                if self.junk_length > 0 {
                    return Ok(i);
                }
            }

            let rest = &data[i..];
            if rest.len() < 4 {
                return Ok(i);
            }

            if rest[0] != b'A' || rest[1] != b'B' {
                return Err(StreamError::new(ProtocolError::garbage(
                    "malformed AJP response packet",
                )));
            }

            let header_length = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            if header_length == 0 {
                return Err(StreamError::new(ProtocolError::garbage(
                    "malformed AJP response packet",
                )));
            }

            if rest.len() < 5 {
                /* we need the prefix code */
                return Ok(i);
            }

            let prefix = rest[4];

            if prefix == code::SEND_BODY_CHUNK {
                if self.state != ParserState::Body {
                    return Err(StreamError::new(ProtocolError::unspecified(
                        "unexpected SEND_BODY_CHUNK packet from AJP server",
                    )));
                }

                if rest.len() < 7 {
                    /* we need the chunk length */
                    return Ok(i);
                }

                let chunk_length = u16::from_be_bytes([rest[5], rest[6]]) as usize;
                if 3 + chunk_length > header_length {
                    return Err(StreamError::new(ProtocolError::garbage(
                        "malformed AJP SEND_BODY_CHUNK packet",
                    )));
                }

                self.chunk_length = chunk_length;
                self.junk_length = header_length - 3 - chunk_length;
                i += 7;
                continue;
            }

            if rest.len() < 4 + header_length {
                /* the packet is not complete yet; the caller decides
                   whether its buffer can ever hold it */
                return Ok(i);
            }

            let payload = &rest[5..4 + header_length];

            match prefix {
                code::SEND_HEADERS => {
                    if self.state != ParserState::Begin {
                        return Err(StreamError::new(ProtocolError::unspecified(
                            "unexpected SEND_HEADERS packet from AJP server",
                        )));
                    }

                    let (status, headers) = parse_send_headers(payload)?;
                    self.state = ParserState::Body;
                    self.chunk_length = 0;
                    self.junk_length = 0;
                    sink.on_headers(status, headers);
                }

                code::END_RESPONSE => {
                    self.state = ParserState::End;
                    sink.on_end();
                    return Ok(i + 4 + header_length);
                }

                code::GET_BODY_CHUNK | code::CPONG => {
                    /* flow control / keep-alive pings; accepted and
                       ignored */
                }

                code::FORWARD_REQUEST | code::SHUTDOWN | code::CPING => {
                    return Err(StreamError::new(ProtocolError::unspecified(
                        "unexpected request packet from AJP server",
                    )));
                }

                _ => {
                    return Err(StreamError::new(ProtocolError::garbage(
                        "unknown packet from AJP server",
                    )));
                }
            }

            i += 4 + header_length;
        }
    }
}

fn read_ajp_string(payload: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, StreamError> {
    let malformed = || StreamError::new(ProtocolError::garbage("malformed AJP string"));

    if payload.len() < *pos + 2 {
        return Err(malformed());
    }
    let length = u16::from_be_bytes([payload[*pos], payload[*pos + 1]]) as usize;
    *pos += 2;

    if length == 0xFFFF {
        return Ok(None);
    }

    if payload.len() < *pos + length + 1 {
        return Err(malformed());
    }
    let s = payload[*pos..*pos + length].to_vec();
    *pos += length + 1; /* skip the NUL terminator */
    Ok(Some(s))
}

fn parse_send_headers(payload: &[u8]) -> Result<(StatusCode, HeaderMap), StreamError> {
    let malformed = || {
        StreamError::new(ProtocolError::garbage(
            "malformed SEND_HEADERS packet from AJP server",
        ))
    };

    if payload.len() < 2 {
        return Err(malformed());
    }
    let status = u16::from_be_bytes([payload[0], payload[1]]);
    let status = StatusCode::from_u16(status).map_err(|_| malformed())?;

    let mut pos = 2;
    read_ajp_string(payload, &mut pos)?; /* status message, ignored */

    if payload.len() < pos + 2 {
        return Err(malformed());
    }
    let num_headers = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
    pos += 2;

    let mut headers = HeaderMap::new();
    for _ in 0..num_headers {
        if payload.len() < pos + 2 {
            return Err(malformed());
        }

        let name: Vec<u8> = if payload[pos] == 0xA0 {
            let header_code = payload[pos + 1];
            pos += 2;
            RESPONSE_HEADER_CODES
                .iter()
                .find(|(c, _)| *c == header_code)
                .map(|(_, n)| n.as_bytes().to_vec())
                .ok_or_else(malformed)?
        } else {
            read_ajp_string(payload, &mut pos)?.ok_or_else(malformed)?
        };

        let value = read_ajp_string(payload, &mut pos)?.ok_or_else(malformed)?;

        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(&name),
            HeaderValue::from_bytes(&value),
        ) {
            headers.append(name, value);
        }
    }

    Ok((status, headers))
}

/// Frames a request-body istream into AJP body packets, terminated
/// by an empty packet.
struct AjpBodyFramer {
    input: Option<BoxIstream>,
    pending: Vec<u8>,
    pending_pos: usize,
    missing_from_current_chunk: usize,
    input_eof: bool,
}

impl AjpBodyFramer {
    fn new(input: BoxIstream) -> AjpBodyFramer {
        AjpBodyFramer {
            input: Some(input),
            pending: Vec::new(),
            pending_pos: 0,
            missing_from_current_chunk: 0,
            input_eof: false,
        }
    }

    fn queue(&mut self, bytes: &[u8]) {
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
        self.pending.extend_from_slice(bytes);
    }

    fn flush(&mut self, handler: &mut dyn IstreamHandler, progressed: &mut bool) -> bool {
        while self.pending_pos < self.pending.len() {
            let n = handler.on_data(&self.pending[self.pending_pos..]);
            if n == 0 {
                return false;
            }
            self.pending_pos += n;
            *progressed = true;
        }
        true
    }
}

struct FramerAdapter<'a, 'b> {
    framer_pending: &'a mut Vec<u8>,
    framer_pending_pos: &'a mut usize,
    missing: &'a mut usize,
    input_eof: &'a mut bool,
    handler: &'b mut dyn IstreamHandler,
    progressed: &'b mut bool,
}

impl FramerAdapter<'_, '_> {
    fn queue(&mut self, bytes: &[u8]) {
        if *self.framer_pending_pos == self.framer_pending.len() {
            self.framer_pending.clear();
            *self.framer_pending_pos = 0;
        }
        self.framer_pending.extend_from_slice(bytes);
    }

    fn flush(&mut self) -> bool {
        while *self.framer_pending_pos < self.framer_pending.len() {
            let n = self
                .handler
                .on_data(&self.framer_pending[*self.framer_pending_pos..]);
            if n == 0 {
                return false;
            }
            *self.framer_pending_pos += n;
            *self.progressed = true;
        }
        true
    }
}

impl IstreamHandler for FramerAdapter<'_, '_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        if *self.missing == 0 {
            let n = data.len().min(AJP_BODY_CHUNK_MAX);
            let mut header = [0u8; 6];
            header[0] = 0x12;
            header[1] = 0x34;
            header[2..4].copy_from_slice(&((n + 2) as u16).to_be_bytes());
            header[4..6].copy_from_slice(&(n as u16).to_be_bytes());
            self.queue(&header);
            *self.missing = n;
        }

        if !self.flush() {
            return 0;
        }

        let take = data.len().min(*self.missing);
        let nbytes = self.handler.on_data(&data[..take]);
        if nbytes > 0 {
            *self.progressed = true;
        }
        *self.missing -= nbytes;
        nbytes
    }

    fn on_eof(&mut self) {
        debug_assert_eq!(*self.missing, 0);
        *self.input_eof = true;
        self.queue(&[0x12, 0x34, 0x00, 0x00]);
    }

    fn on_error(&mut self, error: StreamError) {
        self.handler.on_error(error);
    }
}

impl Istream for AjpBodyFramer {
    fn available(&self, partial: bool) -> Available {
        if partial {
            match &self.input {
                Some(input) => input.available(true),
                None => Available::Exact((self.pending.len() - self.pending_pos) as u64),
            }
        } else {
            Available::Unknown
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let mut progressed = false;

        if !self.flush(handler, &mut progressed) {
            return if progressed {
                ReadResult::Progress
            } else {
                ReadResult::Blocked
            };
        }

        if self.input_eof {
            handler.on_eof();
            return ReadResult::Eof;
        }

        let result = {
            let Self {
                input,
                pending,
                pending_pos,
                missing_from_current_chunk,
                input_eof,
            } = self;
            let mut adapter = FramerAdapter {
                framer_pending: pending,
                framer_pending_pos: pending_pos,
                missing: missing_from_current_chunk,
                input_eof,
                handler: &mut *handler,
                progressed: &mut progressed,
            };
            input.as_mut().unwrap().read(&mut adapter)
        };

        match result {
            ReadResult::Eof => {
                self.input = None;
                if self.flush(handler, &mut progressed) {
                    handler.on_eof();
                    ReadResult::Eof
                } else {
                    ReadResult::Progress
                }
            }
            ReadResult::Error => ReadResult::Error,
            ReadResult::Progress => ReadResult::Progress,
            ReadResult::Blocked => {
                if progressed {
                    ReadResult::Progress
                } else {
                    ReadResult::Blocked
                }
            }
        }
    }
}

/* connection plumbing */

struct AjpState {
    peer_name: String,
    lease: Option<Box<dyn Lease>>,
    request_istream: Option<BoxIstream>,
    handler: Option<Box<dyn HttpResponseHandler>>,
    parser: AjpResponseParser,
    body_error: Option<StreamError>,
    body_end: bool,
    body_abandoned: Rc<Cell<bool>>,
    self_weak: std::rc::Weak<RefCell<AjpClient>>,
}

pub struct AjpClient {
    socket: BufferedSocket,
    state: AjpState,
    timer: Option<Rc<TimerEvent>>,
}

/// Start an AJP request on a leased socket.  The request body (when
/// present) must have a known length; AJPv13 cannot express chunked
/// request bodies.
#[allow(clippy::too_many_arguments)]
pub fn ajp_client_request(
    event_loop: &EventLoop,
    fd: OwnedFd,
    fd_type: stream::istream::FdType,
    lease: Box<dyn Lease>,
    peer_name: &str,
    method: Method,
    uri: &str,
    headers: HeaderMap,
    body: Option<BoxIstream>,
    handler: Box<dyn HttpResponseHandler>,
    cancel_ptr: &mut CancellablePointer,
) {
    let content_length = match &body {
        Some(b) => match b.available(false) {
            Available::Exact(n) => Some(n),
            Available::Unknown => {
                lease.release(fd, true);
                handler.on_error(StreamError::new(ProtocolError::unspecified(
                    "AJPv13 does not support request bodies of unknown length",
                )));
                return;
            }
        },
        None => None,
    };

    let Some(packet) = serialize_forward_request(&method, uri, &headers, content_length) else {
        lease.release(fd, true);
        handler.on_error(StreamError::new(ProtocolError::unspecified(
            "method not supported by AJPv13",
        )));
        return;
    };

    let mut parts: Vec<BoxIstream> = vec![packet.into_istream()];
    if let Some(body) = body {
        parts.push(Box::new(AjpBodyFramer::new(body)));
    }
    let request_istream: BoxIstream = Box::new(ConcatIstream::new(parts));

    let client = Rc::new_cyclic(|self_weak| {
        RefCell::new(AjpClient {
            socket: BufferedSocket::new(fd, fd_type),
            state: AjpState {
                peer_name: peer_name.to_string(),
                lease: Some(lease),
                request_istream: Some(request_istream),
                handler: Some(handler),
                parser: AjpResponseParser::new(),
                body_error: None,
                body_end: false,
                body_abandoned: Rc::new(Cell::new(false)),
                self_weak: self_weak.clone(),
            },
            timer: None,
        })
    });

    {
        let strong = Rc::clone(&client);
        let callback = Rc::new(RefCell::new(move |readiness: Readiness| {
            strong.borrow_mut().on_ready(readiness);
        }));
        let mut c = client.borrow_mut();
        if let Err(e) = c.socket.register(event_loop, callback) {
            let error = StreamError::new(e);
            let AjpClient { socket, state, .. } = &mut *c;
            state.abort(&mut socket.io, error);
            return;
        }

        let timer = Rc::new(TimerEvent::new(event_loop, {
            let weak = Rc::downgrade(&client);
            move || {
                if let Some(client) = weak.upgrade() {
                    let mut c = client.borrow_mut();
                    let AjpClient { socket, state, .. } = &mut *c;
                    state.abort(
                        &mut socket.io,
                        StreamError::new(TimeoutError("AJP connection timed out")),
                    );
                }
            }
        }));
        c.socket
            .io
            .set_read_timeout(Some((AJP_TIMEOUT, Rc::clone(&timer))));
        c.timer = Some(timer);

        c.socket.io.schedule_read();

        let AjpClient { socket, state, .. } = &mut *c;
        state.pump_request(&mut socket.io);
    }

    cancel_ptr.set(Rc::new(RefCell::new(AjpClientCancel { client })));
}

struct AjpClientCancel {
    client: Rc<RefCell<AjpClient>>,
}

impl Cancellable for AjpClientCancel {
    fn cancel(&mut self) {
        let mut client = self.client.borrow_mut();
        let AjpClient { socket, state, .. } = &mut *client;
        state.request_istream = None;
        state.handler = None;
        state.release(&mut socket.io);
    }
}

impl AjpState {
    fn release(&mut self, io: &mut SocketIo) {
        /* this client never reuses connections */
        if let Some(fd) = io.abandon() {
            if let Some(lease) = self.lease.take() {
                lease.release(fd, false);
            }
        } else if let Some(lease) = self.lease.take() {
            drop(lease);
        }
    }

    fn abort(&mut self, io: &mut SocketIo, error: StreamError) {
        self.request_istream = None;
        self.release(io);

        let error = error.prefixed(&format!("error on AJP connection to '{}': ", self.peer_name));

        if let Some(handler) = self.handler.take() {
            handler.on_error(error);
        } else {
            self.body_error = Some(error);
        }
    }

    fn pump_request(&mut self, io: &mut SocketIo) -> bool {
        let Some(istream) = &mut self.request_istream else {
            io.unschedule_write();
            return io.connected();
        };

        let mut broken = false;
        let result = {
            let mut writer = AjpRequestWriter {
                io: &mut *io,
                broken: &mut broken,
            };
            istream.read(&mut writer)
        };

        if broken {
            self.abort(io, StreamError::new(ProtocolError::io("write error")));
            return false;
        }

        match result {
            ReadResult::Eof => {
                self.request_istream = None;
                io.unschedule_write();
            }
            ReadResult::Error => {
                self.abort(
                    io,
                    StreamError::new(ProtocolError::unspecified("request stream failed")),
                );
                return false;
            }
            ReadResult::Progress => io.schedule_write(),
            ReadResult::Blocked => io.schedule_write(),
        }

        true
    }
}

struct AjpRequestWriter<'a> {
    io: &'a mut SocketIo,
    broken: &'a mut bool,
}

impl IstreamHandler for AjpRequestWriter<'_> {
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

/// Bridges parser events to the HTTP response handler during the
/// header phase.
struct DispatchSink<'a> {
    response: Option<(StatusCode, HeaderMap)>,
    end: &'a mut bool,
}

impl AjpResponseSink for DispatchSink<'_> {
    fn on_headers(&mut self, status: StatusCode, headers: HeaderMap) {
        self.response = Some((status, headers));
    }

    fn on_body_data(&mut self, _data: &[u8]) -> usize {
        /* not consumed here; the body istream pulls */
        0
    }

    fn on_end(&mut self) {
        *self.end = true;
    }
}

impl BufferedSocketHandler for AjpState {
    fn on_data(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult) {
        if self.body_abandoned.get() {
            self.request_istream = None;
            self.release(io);
            return (0, BufferedResult::Closed);
        }

        if self.handler.is_some() {
            /* header phase */
            let mut end = false;
            let mut sink = DispatchSink {
                response: None,
                end: &mut end,
            };

            let consumed = match self.parser.feed(data, &mut sink) {
                Ok(n) => n,
                Err(e) => {
                    self.abort(io, e);
                    return (0, BufferedResult::Closed);
                }
            };

            let response = sink.response.take();

            if let Some((status, headers)) = response {
                let handler = self.handler.take().unwrap();

                if end || crate::http::status_is_empty(status) {
                    /* no response body */
                    self.release(io);
                    handler.on_response(status, headers, None);
                    return (consumed, BufferedResult::Closed);
                }

                let body: Option<BoxIstream> = self.self_weak.upgrade().map(|client| {
                    Box::new(AjpBodyIstream {
                        client,
                        abandoned: Rc::clone(&self.body_abandoned),
                    }) as BoxIstream
                });

                handler.on_response(status, headers, body);
                return (consumed, BufferedResult::Blocking);
            }

            if consumed == 0 && data.len() >= 4 {
                /* maybe the packet is too large for the buffer */
                let header_length = u16::from_be_bytes([data[2], data[3]]) as usize;
                if 4 + header_length > 8192 {
                    self.abort(
                        io,
                        StreamError::new(ProtocolError::garbage(
                            "too large packet from AJP server",
                        )),
                    );
                    return (0, BufferedResult::Closed);
                }
            }

            return (consumed, BufferedResult::More);
        }

        /* body phase: the istream pulls */
        (0, BufferedResult::Blocking)
    }

    fn on_closed(&mut self, io: &mut SocketIo, _remaining: usize) -> bool {
        debug!("AJP server '{}' closed the connection", self.peer_name);
        self.request_istream = None;
        self.release(io);
        true
    }

    fn on_write(&mut self, io: &mut SocketIo) -> bool {
        self.pump_request(io)
    }

    fn on_error(&mut self, io: &mut SocketIo, error: StreamError) {
        self.abort(io, error);
    }
}

impl AjpClient {
    fn on_ready(&mut self, readiness: Readiness) {
        let AjpClient { socket, state, .. } = self;

        if readiness.error {
            state.abort(
                &mut socket.io,
                StreamError::new(ProtocolError::io("socket error")),
            );
            return;
        }

        if readiness.writable && !state.pump_request(&mut socket.io) {
            return;
        }

        if readiness.readable && !state.parser.is_finished() {
            socket.try_read(state);
        }
    }

    /// The response-body istream pulls here.
    fn read_body(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if let Some(error) = self.state.body_error.take() {
            handler.on_error(error);
            return ReadResult::Error;
        }

        if self.state.body_end {
            handler.on_eof();
            return ReadResult::Eof;
        }

        let mut progressed = false;

        loop {
            if self.socket.is_empty() {
                if !self.socket.io.connected() {
                    if self.state.parser.is_finished() {
                        self.state.body_end = true;
                        handler.on_eof();
                        return ReadResult::Eof;
                    }
                    handler.on_error(StreamError::new(ProtocolError::unspecified(
                        "AJP server closed the connection prematurely",
                    )));
                    return ReadResult::Error;
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

            let mut end = false;
            let feed_result = {
                let AjpClient { socket, state, .. } = self;
                let mut sink = PullSink {
                    handler: &mut *handler,
                    end: &mut end,
                    delivered: false,
                };
                let r = state.parser.feed(socket.input(), &mut sink);
                (r, sink.delivered)
            };

            match feed_result {
                (Err(error), _) => {
                    let AjpClient { socket, state, .. } = self;
                    state.request_istream = None;
                    state.release(&mut socket.io);
                    handler.on_error(error);
                    return ReadResult::Error;
                }
                (Ok(consumed), delivered) => {
                    self.socket.consumed(consumed);
                    if consumed > 0 {
                        progressed = true;
                    }

                    if end {
                        let AjpClient { socket, state, .. } = self;
                        state.body_end = true;
                        state.request_istream = None;
                        state.release(&mut socket.io);
                        handler.on_eof();
                        return ReadResult::Eof;
                    }

                    if consumed == 0 && !delivered {
                        /* need more data or the consumer blocked */
                        return if progressed {
                            ReadResult::Progress
                        } else {
                            ReadResult::Blocked
                        };
                    }
                }
            }
        }
    }
}

struct PullSink<'a, 'b> {
    handler: &'b mut dyn IstreamHandler,
    end: &'a mut bool,
    delivered: bool,
}

impl AjpResponseSink for PullSink<'_, '_> {
    fn on_headers(&mut self, _status: StatusCode, _headers: HeaderMap) {
        unreachable!("headers already dispatched");
    }

    fn on_body_data(&mut self, data: &[u8]) -> usize {
        let n = self.handler.on_data(data);
        if n > 0 {
            self.delivered = true;
        }
        n
    }

    fn on_end(&mut self) {
        *self.end = true;
    }
}

struct AjpBodyIstream {
    client: Rc<RefCell<AjpClient>>,
    abandoned: Rc<Cell<bool>>,
}

impl Istream for AjpBodyIstream {
    fn available(&self, partial: bool) -> Available {
        if partial {
            if let Ok(client) = self.client.try_borrow() {
                return Available::Exact(
                    client.state.parser.chunk_length.min(client.socket.available()) as u64,
                );
            }
        }
        Available::Unknown
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Ok(mut client) = self.client.try_borrow_mut() else {
            return ReadResult::Blocked;
        };
        client.read_body(handler)
    }
}

impl Drop for AjpBodyIstream {
    fn drop(&mut self) {
        let finished = match self.client.try_borrow() {
            Ok(client) => client.state.body_end,
            Err(_) => false,
        };
        if finished {
            return;
        }

        self.abandoned.set(true);
        if let Ok(mut client) = self.client.try_borrow_mut() {
            let AjpClient { socket, state, .. } = &mut *client;
            state.request_istream = None;
            state.release(&mut socket.io);
        }
    }
}
