/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The pull-based byte stream contract.  A consumer owns an
//! [`Istream`] and drives it by calling [`Istream::read`] with a
//! handler; the producer delivers bytes synchronously through the
//! handler or reports [`ReadResult::Blocked`] and waits for its
//! external edge (socket readiness, a timer, or a renewed `read()`).

use std::os::fd::{OwnedFd, RawFd};

use bitflags::bitflags;

use crate::error::StreamError;

pub type BoxIstream = Box<dyn Istream>;

/// How many bytes remain in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Available {
    /// The exact remaining byte count; with `partial=true` this may
    /// be an optimistic lower bound instead.
    Exact(u64),
    Unknown,
}

impl Available {
    pub fn exact(self) -> Option<u64> {
        match self {
            Available::Exact(n) => Some(n),
            Available::Unknown => None,
        }
    }
}

/// The outcome of one [`Istream::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// At least one byte was delivered or skipped.
    Progress,
    /// Nothing could be delivered; either the producer has no data
    /// yet or the handler consumed zero bytes.  The producer must not
    /// retry without a new external edge.
    Blocked,
    /// `on_eof()` was invoked; the stream is spent.
    Eof,
    /// `on_error()` was invoked; the stream is spent.
    Error,
}

/// The kind of file descriptor offered on the zero-copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdType {
    File,
    Pipe,
    Socket,
}

bitflags! {
    /// Which [`FdType`]s a handler accepts on its direct path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdTypeMask: u32 {
        const FILE = 1 << 0;
        const PIPE = 1 << 1;
        const SOCKET = 1 << 2;
    }
}

impl FdTypeMask {
    pub fn accepts(&self, fd_type: FdType) -> bool {
        match fd_type {
            FdType::File => self.contains(FdTypeMask::FILE),
            FdType::Pipe => self.contains(FdTypeMask::PIPE),
            FdType::Socket => self.contains(FdTypeMask::SOCKET),
        }
    }
}

/// Result of a zero-copy transfer attempt.  The sentinels are a
/// closed set; everything else is a byte count or an errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectResult {
    /// This many bytes were moved.
    Transferred(usize),
    /// The destination cannot accept data right now.
    Blocking,
    /// The consumer was closed during the callback.
    Closed,
    /// The source reported end-of-file.
    Eof,
    /// A kernel error, identified by errno.
    Errno(i32),
}

/// The four-callback consumer contract (spec: on_data / on_direct /
/// on_eof / on_error).  Exactly one of `on_eof`/`on_error` fires per
/// stream, after which the stream must only be dropped.
pub trait IstreamHandler {
    /// Consume bytes; returning 0 signals back-pressure (or that the
    /// consumer went away during the callback).
    fn on_data(&mut self, data: &[u8]) -> usize;

    /// Which fd types may be offered to `on_direct()`.
    fn direct_mask(&self) -> FdTypeMask {
        FdTypeMask::empty()
    }

    /// Zero-copy path: move up to `max` bytes out of `fd` yourself.
    fn on_direct(&mut self, _fd: RawFd, _fd_type: FdType, _max: usize) -> DirectResult {
        DirectResult::Blocking
    }

    fn on_eof(&mut self);

    fn on_error(&mut self, error: StreamError);
}

/// A pull-based byte source.  Dropping an istream closes it without
/// an EOF callback.
pub trait Istream {
    /// Remaining byte count; `partial` permits an optimistic lower
    /// bound.  A producer must never deliver more bytes than its
    /// last non-partial `available()` answer.
    fn available(&self, partial: bool) -> Available;

    /// Produce bytes through `handler`.  Must either deliver at least
    /// one byte (or EOF/error) synchronously or return
    /// [`ReadResult::Blocked`].
    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult;

    /// Discard up to `n` bytes; returns how many were discarded.
    fn skip(&mut self, _n: u64) -> u64 {
        0
    }

    /// Surrender an equivalent file descriptor to the consumer; on
    /// success the istream is spent and must be dropped.
    fn as_fd(&mut self) -> Option<OwnedFd> {
        None
    }
}

impl Istream for BoxIstream {
    fn available(&self, partial: bool) -> Available {
        (**self).available(partial)
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        (**self).read(handler)
    }

    fn skip(&mut self, n: u64) -> u64 {
        (**self).skip(n)
    }

    fn as_fd(&mut self) -> Option<OwnedFd> {
        (**self).as_fd()
    }
}
