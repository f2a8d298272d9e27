/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! A non-blocking socket with input buffer management, the substrate
//! under every protocol client.
//!
//! States: uninitialised → connected → disconnected (the peer or we
//! closed the fd, but the residual input buffer is still being
//! served) → ended → destroyed.  The handler dispatch lives in
//! [`BufferedSocket::try_read`]; the plain fd side
//! ([`SocketIo`]) is a separate struct so a handler can write,
//! re-arm or abandon the socket while it is being fed input.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;

use log::debug;
use stream::error::StreamError;
use stream::istream::FdType;
use stream::slice_pool::global_pool;
use stream::FifoBuffer;

use crate::event_loop::{EventLoop, SourceHandle, TimerEvent};
use crate::filter::SocketFilter;

/// What the handler did with the bytes it was fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedResult {
    /// All consumable bytes were taken; deliver again when more
    /// arrive.
    Ok,
    /// The frame is incomplete; more data from the socket is needed
    /// before anything can happen.
    More,
    /// Some bytes were consumed, the rest cannot be taken right now.
    Partial,
    /// Nothing was consumed; the consumer is exerting back-pressure
    /// and will ask again via an explicit read.
    Blocking,
    /// Parsing advanced to a new stage; feed the remaining buffer
    /// again even though no new data arrived.
    AgainExpect,
    /// Like [`AgainExpect`](Self::AgainExpect), but it is fine to
    /// wait for new data instead.
    AgainOptional,
    /// The handler closed/destroyed this object.
    Closed,
}

/// Result of a zero-copy receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDirectResult {
    Ok,
    /// The destination blocks.
    Blocking,
    /// The source (our socket) has nothing to read.
    Empty,
    /// The stream ended.
    End,
    /// The socket was closed during the callback.
    Closed,
    Errno(i32),
}

pub trait BufferedSocketHandler {
    /// Data from the input buffer.  Returns the number of bytes
    /// consumed and what to do next.
    fn on_data(&mut self, io: &mut SocketIo, data: &[u8]) -> (usize, BufferedResult);

    /// The socket is readable, the input buffer is empty and direct
    /// mode is enabled: transfer bytes yourself.
    fn on_direct(&mut self, _io: &mut SocketIo, _fd: RawFd, _fd_type: FdType) -> SocketDirectResult {
        SocketDirectResult::Blocking
    }

    /// The peer has closed the connection.  `remaining` bytes are
    /// still in the input buffer.  Return false to stop all further
    /// delivery (no `on_end()` either).
    fn on_closed(&mut self, _io: &mut SocketIo, _remaining: usize) -> bool {
        true
    }

    /// The input buffer has drained after the peer closed.
    fn on_end(&mut self) {}

    /// The socket is ready for writing.  Return false when the
    /// socket has been closed.
    fn on_write(&mut self, io: &mut SocketIo) -> bool;

    /// A deadline expired.  Return false to treat it as fatal (the
    /// caller delivers a timeout error).
    fn on_timeout(&mut self, _io: &mut SocketIo) -> bool {
        false
    }

    fn on_error(&mut self, io: &mut SocketIo, error: StreamError);
}

/// The result of [`SocketIo::write`].
#[derive(Debug)]
pub enum WriteResult {
    Written(usize),
    /// The kernel buffer is full.
    Blocking,
    /// The peer is gone (EPIPE/ECONNRESET); not necessarily fatal
    /// for protocols that can still read a response.
    Broken,
    Error(io::Error),
}

/// The plain fd side of a buffered socket: writing, event interest
/// and teardown.  Separated so the input-dispatch path can hand it
/// to the handler.
pub struct SocketIo {
    fd: Option<OwnedFd>,
    fd_type: FdType,
    source: Option<SourceHandle>,
    want_read: bool,
    want_write: bool,

    filter: Option<Box<dyn SocketFilter>>,
    /// Encoded output queued by the filter.
    filter_out: Vec<u8>,

    read_timeout: Option<(Duration, Rc<TimerEvent>)>,
    write_timeout: Option<(Duration, Rc<TimerEvent>)>,
}

impl SocketIo {
    fn update_interest(&mut self) {
        if let Some(source) = &self.source {
            let _ = source.set_interest(self.want_read, self.want_write);
        }
    }

    pub fn connected(&self) -> bool {
        self.fd.is_some()
    }

    pub fn fd_type(&self) -> FdType {
        self.fd_type
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn schedule_read(&mut self) {
        self.want_read = true;
        self.update_interest();
        if let Some((duration, timer)) = &self.read_timeout {
            timer.schedule(*duration);
        }
    }

    pub fn unschedule_read(&mut self) {
        self.want_read = false;
        self.update_interest();
        if let Some((_, timer)) = &self.read_timeout {
            timer.cancel();
        }
    }

    pub fn schedule_write(&mut self) {
        self.want_write = true;
        self.update_interest();
        if let Some((duration, timer)) = &self.write_timeout {
            timer.schedule(*duration);
        }
    }

    pub fn unschedule_write(&mut self) {
        self.want_write = false;
        self.update_interest();
        if let Some((_, timer)) = &self.write_timeout {
            timer.cancel();
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<(Duration, Rc<TimerEvent>)>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<(Duration, Rc<TimerEvent>)>) {
        self.write_timeout = timeout;
    }

    /// Write bytes to the socket (through the filter when present).
    pub fn write(&mut self, data: &[u8]) -> WriteResult {
        let Some(fd) = &self.fd else {
            return WriteResult::Broken;
        };
        let fd = fd.as_raw_fd();

        if self.filter.is_some() {
            if self.filter_out.len() >= 64 * 1024 {
                return WriteResult::Blocking;
            }
            let consumed = self
                .filter
                .as_mut()
                .unwrap()
                .encrypt(data, &mut self.filter_out);
            let _ = self.flush_filter_out(fd);
            return WriteResult::Written(consumed);
        }

        raw_write(fd, data)
    }

    fn flush_filter_out(&mut self, fd: RawFd) -> bool {
        while !self.filter_out.is_empty() {
            match raw_write(fd, &self.filter_out) {
                WriteResult::Written(n) => {
                    self.filter_out.drain(..n);
                }
                WriteResult::Blocking => {
                    self.schedule_write();
                    return false;
                }
                _ => return false,
            }
        }
        true
    }

    /// Zero-copy transfer from `src_fd` into this socket, using
    /// splice(2) for pipes and sendfile(2) for regular files.
    pub fn write_from(&mut self, src_fd: RawFd, src_type: FdType, max: usize) -> WriteResult {
        let Some(fd) = &self.fd else {
            return WriteResult::Broken;
        };
        let dest = fd.as_raw_fd();

        let nbytes = match src_type {
            FdType::File => unsafe {
                libc::sendfile(dest, src_fd, std::ptr::null_mut(), max)
            },
            FdType::Pipe | FdType::Socket => unsafe {
                libc::splice(
                    src_fd,
                    std::ptr::null_mut(),
                    dest,
                    std::ptr::null_mut(),
                    max,
                    libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK,
                )
            },
        };

        if nbytes >= 0 {
            return WriteResult::Written(nbytes as usize);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => WriteResult::Blocking,
            Some(libc::EPIPE) | Some(libc::ECONNRESET) => WriteResult::Broken,
            _ => WriteResult::Error(err),
        }
    }

    /// Stop using the socket but keep the fd alive for the caller
    /// (typically to hand it back to its lease).
    pub fn abandon(&mut self) -> Option<OwnedFd> {
        self.source = None;
        if let Some((_, timer)) = &self.read_timeout {
            timer.cancel();
        }
        if let Some((_, timer)) = &self.write_timeout {
            timer.cancel();
        }
        self.fd.take()
    }

    /// Close the fd.
    pub fn close(&mut self) {
        drop(self.abandon());
    }
}

fn raw_write(fd: RawFd, data: &[u8]) -> WriteResult {
    let nbytes = unsafe {
        libc::send(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
        )
    };

    if nbytes >= 0 {
        return WriteResult::Written(nbytes as usize);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) => WriteResult::Blocking,
        Some(libc::EPIPE) | Some(libc::ECONNRESET) => WriteResult::Broken,
        _ => WriteResult::Error(err),
    }
}

enum FillResult {
    Ok,
    Blocked,
    Full,
    Disconnected(bool),
    Error,
}

pub struct BufferedSocket {
    pub io: SocketIo,
    input: FifoBuffer,

    /// Attempt zero-copy transfers?
    pub direct: bool,

    ended: bool,
}

impl BufferedSocket {
    pub fn new(fd: OwnedFd, fd_type: FdType) -> BufferedSocket {
        BufferedSocket {
            io: SocketIo {
                fd: Some(fd),
                fd_type,
                source: None,
                want_read: false,
                want_write: false,
                filter: None,
                filter_out: Vec::new(),
                read_timeout: None,
                write_timeout: None,
            },
            input: FifoBuffer::from_pool(global_pool()),
            direct: false,
            ended: false,
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn SocketFilter>) -> BufferedSocket {
        self.io.filter = Some(filter);
        self
    }

    /// Hook the socket into the event loop.  `callback` receives
    /// readiness events; it is expected to call
    /// [`try_read`](Self::try_read) / drive the write side.
    pub fn register(
        &mut self,
        event_loop: &EventLoop,
        callback: crate::event_loop::ReadyCallback,
    ) -> io::Result<()> {
        let fd = self.io.raw_fd().expect("register on closed socket");
        self.io.source = Some(event_loop.register_fd(fd, false, false, callback)?);
        Ok(())
    }

    /// Is the object still usable?  The fd may be gone while the
    /// input buffer still holds data.
    pub fn valid(&self) -> bool {
        self.io.connected() || !self.input.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.input.is_full()
    }

    pub fn available(&self) -> usize {
        self.input.available()
    }

    fn fill_buffer(&mut self, handler: &mut dyn BufferedSocketHandler) -> FillResult {
        debug_assert!(self.io.connected());

        let fd = self.io.raw_fd().unwrap();

        if self.io.filter.is_some() {
            let mut raw = [0u8; 8192];
            let nbytes = unsafe {
                libc::recv(
                    fd,
                    raw.as_mut_ptr() as *mut libc::c_void,
                    raw.len().min(self.input.write().len().max(1)),
                    libc::MSG_DONTWAIT,
                )
            };
            return self.handle_recv_result(handler, nbytes, |this, n| {
                let filter = this.io.filter.as_mut().unwrap();
                filter.decrypt(&raw[..n], &mut this.input);
            });
        }

        let w = self.input.write();
        if w.is_empty() {
            self.io.unschedule_read();
            return FillResult::Full;
        }

        let nbytes = unsafe {
            libc::recv(
                fd,
                w.as_mut_ptr() as *mut libc::c_void,
                w.len(),
                libc::MSG_DONTWAIT,
            )
        };
        self.handle_recv_result(handler, nbytes, |this, n| this.input.append(n))
    }

    fn handle_recv_result(
        &mut self,
        handler: &mut dyn BufferedSocketHandler,
        nbytes: isize,
        commit: impl FnOnce(&mut Self, usize),
    ) -> FillResult {
        if nbytes > 0 {
            commit(self, nbytes as usize);
            return FillResult::Ok;
        }

        if nbytes == 0 {
            /* the peer has finished sending */
            if let Some(filter) = &mut self.io.filter {
                filter.closed();
            }

            let remaining = self.input.available();
            if !handler.on_closed(&mut self.io, remaining) {
                return FillResult::Disconnected(false);
            }

            if self.input.is_empty() {
                self.ended = true;
                handler.on_end();
                return FillResult::Disconnected(false);
            }

            return FillResult::Disconnected(true);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            self.io.schedule_read();
            return FillResult::Blocked;
        }

        debug!("recv() failed: {}", err);
        handler.on_error(&mut self.io, StreamError::new(err).prefixed("recv() failed: "));
        FillResult::Error
    }

    /// Deliver buffered bytes to the handler.  `None` when the
    /// object was closed/ended during delivery; otherwise whether
    /// reading on from the socket makes sense.
    fn submit_from_buffer(&mut self, handler: &mut dyn BufferedSocketHandler) -> Option<bool> {
        loop {
            let data_len = self.input.available();
            if data_len == 0 {
                if !self.io.connected() {
                    if !self.ended {
                        self.ended = true;
                        handler.on_end();
                    }
                    return None;
                }
                return Some(true);
            }

            let (consumed, result) = {
                let Self { io, input, .. } = self;
                handler.on_data(io, input.read())
            };
            debug_assert!(consumed <= data_len);
            self.input.consume(consumed);

            match result {
                BufferedResult::Ok | BufferedResult::More => {
                    if self.input.is_empty() {
                        continue; /* reach the empty/disconnected check */
                    }
                    /* an incomplete frame remains buffered; wait for
                       more data from the socket */
                    return Some(true);
                }
                BufferedResult::Partial | BufferedResult::Blocking => {
                    /* back-pressure: the consumer pulls via its own
                       read path, so stop pushing */
                    return Some(false);
                }
                BufferedResult::AgainExpect | BufferedResult::AgainOptional => {
                    continue;
                }
                BufferedResult::Closed => return None,
            }
        }
    }

    /// The caller wants more data.  Implements the per-readiness
    /// cycle: serve the buffer, then either zero-copy or fill from
    /// the kernel, then re-arm read interest.
    pub fn try_read(&mut self, handler: &mut dyn BufferedSocketHandler) -> bool {
        debug_assert!(!self.ended);

        if !self.io.connected() {
            self.submit_from_buffer(handler);
            return false;
        }

        if self.direct {
            /* empty the buffer before switching to zero-copy */
            if self.submit_from_buffer(handler).is_none() {
                return false;
            }

            if !self.direct {
                /* the handler reverted the flag; try again buffered */
                return self.try_read(handler);
            }

            if !self.input.is_empty() {
                /* the handler is not ready to consume the rest */
                self.io.unschedule_read();
                return true;
            }

            if !self.io.connected() {
                return false;
            }

            let fd = self.io.raw_fd().unwrap();
            let fd_type = self.io.fd_type;
            match handler.on_direct(&mut self.io, fd, fd_type) {
                SocketDirectResult::Ok | SocketDirectResult::Empty => {}
                SocketDirectResult::Blocking => {
                    self.io.unschedule_read();
                    return true;
                }
                SocketDirectResult::End | SocketDirectResult::Closed => return false,
                SocketDirectResult::Errno(e) => {
                    handler.on_error(
                        &mut self.io,
                        StreamError::new(io::Error::from_raw_os_error(e)),
                    );
                    return false;
                }
            }

            if self.io.connected() {
                self.io.schedule_read();
            }
            true
        } else {
            match self.fill_buffer(handler) {
                FillResult::Ok | FillResult::Blocked | FillResult::Full => {}
                FillResult::Disconnected(true) => {
                    self.submit_from_buffer(handler);
                    return false;
                }
                FillResult::Disconnected(false) | FillResult::Error => return false,
            }

            match self.submit_from_buffer(handler) {
                None => return false,
                Some(true) => {
                    if self.io.connected() && !self.input.is_full() {
                        self.io.schedule_read();
                    }
                }
                Some(false) => {
                    /* the consumer pulls; do not push more */
                    self.io.unschedule_read();
                }
            }
            true
        }
    }

    /// Serve residual buffered data after the fd is gone.
    pub fn read_buffered(&mut self, handler: &mut dyn BufferedSocketHandler) -> bool {
        self.submit_from_buffer(handler).is_some()
    }

    /// Direct access for consumers that pull out of the input buffer
    /// outside a handler dispatch (response body istreams).
    pub fn input(&self) -> &[u8] {
        self.input.read()
    }

    pub fn consumed(&mut self, nbytes: usize) {
        self.input.consume(nbytes);
    }

    /// Try to read from the kernel without dispatching to a handler;
    /// returns the number of new bytes (0 on EAGAIN/closed).
    pub fn fill_without_dispatch(&mut self) -> usize {
        let Some(fd) = self.io.raw_fd() else { return 0 };

        if self.io.filter.is_some() {
            return 0;
        }

        let w = self.input.write();
        if w.is_empty() {
            return 0;
        }

        let nbytes = unsafe {
            libc::recv(
                fd,
                w.as_mut_ptr() as *mut libc::c_void,
                w.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if nbytes > 0 {
            self.input.append(nbytes as usize);
            nbytes as usize
        } else {
            0
        }
    }
}
