/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Memcached binary-protocol client: fixed 24-byte header, then
//! extras / key / value regions whose sizes the header announces.
//! The value is streamed to the consumer as an istream.

use std::cell::{Cell, RefCell};
use std::os::fd::OwnedFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

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

const MEMCACHED_TIMEOUT: Duration = Duration::from_secs(5);

pub const MEMCACHED_EXTRAS_MAX: usize = 0xff;
pub const MEMCACHED_KEY_MAX: usize = 250;

/// All requests carry this fixed opaque value.
pub const MEMCACHED_OPAQUE: u32 = 0x1234;

const MAGIC_REQUEST: u8 = 0x80;
const MAGIC_RESPONSE: u8 = 0x81;

pub mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const QUIT: u8 = 0x07;
    pub const FLUSH: u8 = 0x08;
    pub const NOOP: u8 = 0x0a;
    pub const VERSION: u8 = 0x0b;
    pub const STAT: u8 = 0x10;
}

pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemcachedResponseHeader {
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub status: u16,
    pub body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl MemcachedResponseHeader {
    fn parse(data: &[u8]) -> Result<MemcachedResponseHeader, StreamError> {
        debug_assert!(data.len() >= HEADER_SIZE);

        if data[0] != MAGIC_RESPONSE {
            return Err(StreamError::new(ProtocolError::garbage(
                "memcached protocol error",
            )));
        }

        Ok(MemcachedResponseHeader {
            opcode: data[1],
            key_length: u16::from_be_bytes([data[2], data[3]]),
            extras_length: data[4],
            status: u16::from_be_bytes([data[6], data[7]]),
            body_length: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            opaque: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            cas: u64::from_be_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        })
    }
}

/// Build one request packet as an istream.  Returns None when the
/// value length is unknown (the header must announce it).
pub fn memcached_request_packet(
    opcode: u8,
    extras: &[u8],
    key: &[u8],
    value: Option<BoxIstream>,
) -> Option<BoxIstream> {
    assert!(extras.len() <= MEMCACHED_EXTRAS_MAX);
    assert!(key.len() <= MEMCACHED_KEY_MAX);

    let value_length = match &value {
        Some(v) => match v.available(false) {
            Available::Exact(n) => n,
            Available::Unknown => return None,
        },
        None => 0,
    };

    let body_length = extras.len() as u64 + key.len() as u64 + value_length;

    let mut buffer = GrowingBuffer::with_capacity(HEADER_SIZE + extras.len() + key.len());
    buffer.write_u8(MAGIC_REQUEST);
    buffer.write_u8(opcode);
    buffer.write_u16_be(key.len() as u16);
    buffer.write_u8(extras.len() as u8);
    buffer.write_u8(0); /* data type */
    buffer.write_u16_be(0); /* vbucket */
    buffer.write_u32_be(body_length as u32);
    buffer.write_u32_be(MEMCACHED_OPAQUE);
    buffer.write(&[0u8; 8]); /* cas */
    buffer.write(extras);
    buffer.write(key);

    let mut parts: Vec<BoxIstream> = vec![buffer.into_istream()];
    if let Some(value) = value {
        parts.push(value);
    }
    Some(Box::new(ConcatIstream::new(parts)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Header,
    Extras,
    Key,
    Value,
    End,
}

/// The staged response parser, separated from the socket so it can
/// be fed arbitrary byte chunks.
pub struct MemcachedResponseParser {
    state: ParserState,
    header_buffer: Vec<u8>,
    header: MemcachedResponseHeader,
    extras: Vec<u8>,
    key: Vec<u8>,
    /// Value bytes still expected.
    remaining: usize,
}

impl Default for MemcachedResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MemcachedResponseParser {
    pub fn new() -> MemcachedResponseParser {
        MemcachedResponseParser {
            state: ParserState::Header,
            header_buffer: Vec::with_capacity(HEADER_SIZE),
            header: MemcachedResponseHeader::default(),
            extras: Vec::new(),
            key: Vec::new(),
            remaining: 0,
        }
    }

    pub fn header(&self) -> &MemcachedResponseHeader {
        &self.header
    }

    pub fn extras(&self) -> &[u8] {
        &self.extras
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Is the metadata (header, extras, key) complete?
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ParserState::Value | ParserState::End)
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParserState::End
    }

    pub fn value_remaining(&self) -> usize {
        self.remaining
    }

    /// Feed bytes for the header/extras/key phases.  Returns the
    /// number consumed; check [`is_ready`](Self::is_ready)
    /// afterwards.
    pub fn feed_meta(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        let mut i = 0usize;

        loop {
            match self.state {
                ParserState::Header => {
                    let need = HEADER_SIZE - self.header_buffer.len();
                    let take = need.min(data.len() - i);
                    self.header_buffer.extend_from_slice(&data[i..i + take]);
                    i += take;

                    if self.header_buffer.len() < HEADER_SIZE {
                        return Ok(i);
                    }

                    self.header = MemcachedResponseHeader::parse(&self.header_buffer)?;
                    let body_length = self.header.body_length as usize;
                    let meta_length =
                        self.header.extras_length as usize + self.header.key_length as usize;
                    if meta_length > body_length {
                        return Err(StreamError::new(ProtocolError::garbage(
                            "memcached protocol error",
                        )));
                    }

                    self.remaining = body_length;
                    self.state = ParserState::Extras;
                }

                ParserState::Extras => {
                    let need = self.header.extras_length as usize - self.extras.len();
                    let take = need.min(data.len() - i);
                    self.extras.extend_from_slice(&data[i..i + take]);
                    i += take;
                    self.remaining -= take;

                    if self.extras.len() < self.header.extras_length as usize {
                        return Ok(i);
                    }

                    self.state = ParserState::Key;
                }

                ParserState::Key => {
                    let need = self.header.key_length as usize - self.key.len();
                    let take = need.min(data.len() - i);
                    self.key.extend_from_slice(&data[i..i + take]);
                    i += take;
                    self.remaining -= take;

                    if self.key.len() < self.header.key_length as usize {
                        return Ok(i);
                    }

                    if self.remaining == 0 {
                        self.state = ParserState::End;
                    } else {
                        self.state = ParserState::Value;
                    }
                    return Ok(i);
                }

                ParserState::Value | ParserState::End => return Ok(i),
            }
        }
    }

    /// Feed value bytes to the consumer.  Returns the number
    /// consumed.
    pub fn feed_value(&mut self, data: &[u8], handler: &mut dyn IstreamHandler) -> usize {
        debug_assert_eq!(self.state, ParserState::Value);

        let take = data.len().min(self.remaining);
        let nbytes = handler.on_data(&data[..take]);
        self.remaining -= nbytes;

        if self.remaining == 0 {
            self.state = ParserState::End;
        }

        nbytes
    }
}

pub trait MemcachedResponseHandler {
    fn on_response(
        self: Box<Self>,
        status: u16,
        extras: Vec<u8>,
        key: Vec<u8>,
        value: Option<BoxIstream>,
    );

    fn on_error(self: Box<Self>, error: StreamError);
}

struct MemcachedState {
    lease: Option<Box<dyn Lease>>,
    request_istream: Option<BoxIstream>,
    handler: Option<Box<dyn MemcachedResponseHandler>>,
    parser: MemcachedResponseParser,
    value_error: Option<StreamError>,
    value_abandoned: Rc<Cell<bool>>,
    self_weak: Weak<RefCell<MemcachedClient>>,
}

pub struct MemcachedClient {
    socket: BufferedSocket,
    state: MemcachedState,
    timer: Option<Rc<TimerEvent>>,
}

/// Send one memcached request on a leased socket.
#[allow(clippy::too_many_arguments)]
pub fn memcached_client_invoke(
    event_loop: &EventLoop,
    fd: OwnedFd,
    fd_type: stream::istream::FdType,
    lease: Box<dyn Lease>,
    opcode: u8,
    extras: &[u8],
    key: &[u8],
    value: Option<BoxIstream>,
    handler: Box<dyn MemcachedResponseHandler>,
    cancel_ptr: &mut CancellablePointer,
) {
    let Some(request) = memcached_request_packet(opcode, extras, key, value) else {
        lease.release(fd, true);
        handler.on_error(StreamError::new(ProtocolError::unspecified(
            "failed to generate memcached request packet",
        )));
        return;
    };

    let client = Rc::new_cyclic(|self_weak| {
        RefCell::new(MemcachedClient {
            socket: BufferedSocket::new(fd, fd_type),
            state: MemcachedState {
                lease: Some(lease),
                request_istream: Some(request),
                handler: Some(handler),
                parser: MemcachedResponseParser::new(),
                value_error: None,
                value_abandoned: Rc::new(Cell::new(false)),
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
            let MemcachedClient { socket, state, .. } = &mut *c;
            state.abort(&mut socket.io, StreamError::new(e));
            return;
        }

        let timer = Rc::new(TimerEvent::new(event_loop, {
            let weak = Rc::downgrade(&client);
            move || {
                if let Some(client) = weak.upgrade() {
                    let mut c = client.borrow_mut();
                    let MemcachedClient { socket, state, .. } = &mut *c;
                    state.abort(
                        &mut socket.io,
                        StreamError::new(TimeoutError("memcached connection timed out")),
                    );
                }
            }
        }));
        c.socket
            .io
            .set_write_timeout(Some((MEMCACHED_TIMEOUT, Rc::clone(&timer))));
        c.timer = Some(timer);

        c.socket.io.schedule_read();

        let MemcachedClient { socket, state, .. } = &mut *c;
        state.pump_request(&mut socket.io);
    }

    cancel_ptr.set(Rc::new(RefCell::new(MemcachedClientCancel { client })));
}

struct MemcachedClientCancel {
    client: Rc<RefCell<MemcachedClient>>,
}

impl Cancellable for MemcachedClientCancel {
    fn cancel(&mut self) {
        let mut client = self.client.borrow_mut();
        let MemcachedClient { socket, state, .. } = &mut *client;
        state.request_istream = None;
        state.handler = None;
        state.release(&mut socket.io, false);
    }
}

impl MemcachedState {
    fn release(&mut self, io: &mut SocketIo, reuse: bool) {
        if let Some(fd) = io.abandon() {
            if let Some(lease) = self.lease.take() {
                lease.release(fd, reuse);
            }
        } else if let Some(lease) = self.lease.take() {
            drop(lease);
        }
    }

    fn abort(&mut self, io: &mut SocketIo, error: StreamError) {
        self.request_istream = None;
        self.release(io, false);

        let error = error.prefixed("memcached connection failed: ");

        if let Some(handler) = self.handler.take() {
            handler.on_error(error);
        } else {
            self.value_error = Some(error);
        }
    }

    fn pump_request(&mut self, io: &mut SocketIo) -> bool {
        let Some(istream) = &mut self.request_istream else {
            io.unschedule_write();
            return io.connected();
        };

        let mut broken = false;
        let result = {
            let mut writer = PacketWriter {
                io: &mut *io,
                broken: &mut broken,
            };
            istream.read(&mut writer)
        };

        if broken {
            self.abort(
                io,
                StreamError::new(ProtocolError::io("write error on memcached connection")),
            );
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
            ReadResult::Progress | ReadResult::Blocked => io.schedule_write(),
        }

        true
    }
}

struct PacketWriter<'a> {
    io: &'a mut SocketIo,
    broken: &'a mut bool,
}

impl IstreamHandler for PacketWriter<'_> {
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

impl BufferedSocketHandler for MemcachedState {
    fn on_data(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult) {
        if self.value_abandoned.get() {
            self.request_istream = None;
            self.release(io, false);
            return (0, BufferedResult::Closed);
        }

        if self.handler.is_none() {
            /* value phase: the istream pulls */
            return (0, BufferedResult::Blocking);
        }

        let consumed = match self.parser.feed_meta(data) {
            Ok(n) => n,
            Err(e) => {
                self.abort(io, e);
                return (0, BufferedResult::Closed);
            }
        };

        if !self.parser.is_ready() {
            return (consumed, BufferedResult::More);
        }

        if self.request_istream.is_some() {
            self.abort(
                io,
                StreamError::new(ProtocolError::unspecified(
                    "memcached server sends response too early",
                )),
            );
            return (0, BufferedResult::Closed);
        }

        let handler = self.handler.take().unwrap();
        let status = self.parser.header().status;
        let extras = std::mem::take(&mut self.parser.extras);
        let key = std::mem::take(&mut self.parser.key);

        if self.parser.value_remaining() > 0 {
            let value: Option<BoxIstream> = self.self_weak.upgrade().map(|client| {
                Box::new(MemcachedValueIstream {
                    client,
                    abandoned: Rc::clone(&self.value_abandoned),
                }) as BoxIstream
            });

            handler.on_response(status, extras, key, value);
            (consumed, BufferedResult::Blocking)
        } else {
            let reuse = data.len() == consumed;
            self.release(io, reuse);
            handler.on_response(status, extras, key, None);
            (consumed, BufferedResult::Closed)
        }
    }

    fn on_closed(&mut self, io: &mut SocketIo, _remaining: usize) -> bool {
        debug!("memcached server closed the connection");
        self.release(io, false);
        true
    }

    fn on_write(&mut self, io: &mut SocketIo) -> bool {
        self.pump_request(io)
    }

    fn on_error(&mut self, io: &mut SocketIo, error: StreamError) {
        self.abort(io, error);
    }
}

impl MemcachedClient {
    fn on_ready(&mut self, readiness: Readiness) {
        let MemcachedClient { socket, state, .. } = self;

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

    fn read_value(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if let Some(error) = self.state.value_error.take() {
            handler.on_error(error);
            return ReadResult::Error;
        }

        if self.state.parser.is_finished() {
            handler.on_eof();
            return ReadResult::Eof;
        }

        let mut progressed = false;

        loop {
            if self.socket.is_empty() {
                if !self.socket.io.connected() {
                    handler.on_error(StreamError::new(ProtocolError::unspecified(
                        "memcached server closed the connection prematurely",
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

            let nbytes = {
                let MemcachedClient { socket, state, .. } = self;
                state.parser.feed_value(socket.input(), handler)
            };
            self.socket.consumed(nbytes);

            if nbytes == 0 {
                return if progressed {
                    ReadResult::Progress
                } else {
                    ReadResult::Blocked
                };
            }
            progressed = true;

            if self.state.parser.is_finished() {
                let reuse = self.socket.is_empty();
                let MemcachedClient { socket, state, .. } = self;
                state.release(&mut socket.io, reuse);
                handler.on_eof();
                return ReadResult::Eof;
            }
        }
    }
}

struct MemcachedValueIstream {
    client: Rc<RefCell<MemcachedClient>>,
    abandoned: Rc<Cell<bool>>,
}

impl Istream for MemcachedValueIstream {
    fn available(&self, _partial: bool) -> Available {
        match self.client.try_borrow() {
            Ok(client) => Available::Exact(client.state.parser.value_remaining() as u64),
            Err(_) => Available::Unknown,
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        let Ok(mut client) = self.client.try_borrow_mut() else {
            return ReadResult::Blocked;
        };
        client.read_value(handler)
    }
}

impl Drop for MemcachedValueIstream {
    fn drop(&mut self) {
        let finished = match self.client.try_borrow() {
            Ok(client) => client.state.parser.is_finished(),
            Err(_) => false,
        };
        if finished {
            return;
        }

        self.abandoned.set(true);
        if let Ok(mut client) = self.client.try_borrow_mut() {
            let MemcachedClient { socket, state, .. } = &mut *client;
            state.request_istream = None;
            state.release(&mut socket.io, false);
        }
    }
}
