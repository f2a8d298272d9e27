/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An istream reading from a file descriptor, with the zero-copy
//! direct path for handlers that can take the fd (e.g. a socket
//! sender using `sendfile`).

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use crate::error::StreamError;
use crate::istream::{
    Available, DirectResult, FdType, FdTypeMask, Istream, IstreamHandler, ReadResult,
};

pub struct FileIstream {
    fd: Option<OwnedFd>,

    /// Remaining bytes, when known.
    remaining: Option<u64>,

    /// Bytes read from the fd but not yet consumed by the handler.
    stash: Vec<u8>,
    stash_pos: usize,
}

impl FileIstream {
    pub fn open(path: &Path) -> io::Result<FileIstream> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(FileIstream {
            fd: Some(file.into()),
            remaining: Some(size),
            stash: Vec::new(),
            stash_pos: 0,
        })
    }

    pub fn from_fd(fd: OwnedFd, length: Option<u64>) -> FileIstream {
        FileIstream {
            fd: Some(fd),
            remaining: length,
            stash: Vec::new(),
            stash_pos: 0,
        }
    }

    fn stash_len(&self) -> usize {
        self.stash.len() - self.stash_pos
    }

    fn fill_stash(&mut self) -> io::Result<usize> {
        debug_assert_eq!(self.stash_len(), 0);
        self.stash.clear();
        self.stash_pos = 0;
        self.stash.resize(8192, 0);

        let fd = self.fd.as_ref().unwrap();
        let nbytes = unsafe {
            libc::read(
                fd.as_raw_fd(),
                self.stash.as_mut_ptr() as *mut libc::c_void,
                self.stash.len(),
            )
        };
        if nbytes < 0 {
            self.stash.clear();
            return Err(io::Error::last_os_error());
        }

        self.stash.truncate(nbytes as usize);
        Ok(nbytes as usize)
    }
}

impl Istream for FileIstream {
    fn available(&self, _partial: bool) -> Available {
        match self.remaining {
            Some(n) => Available::Exact(n + self.stash_len() as u64),
            None => Available::Unknown,
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        /* serve stashed bytes first */
        if self.stash_len() > 0 {
            let n = handler.on_data(&self.stash[self.stash_pos..]);
            if n == 0 {
                return ReadResult::Blocked;
            }
            self.stash_pos += n;
            if self.stash_len() > 0 {
                return ReadResult::Progress;
            }
        }

        if self.remaining == Some(0) {
            handler.on_eof();
            return ReadResult::Eof;
        }

        if handler.direct_mask().contains(FdTypeMask::FILE) {
            let fd = self.fd.as_ref().unwrap().as_raw_fd();
            let max = self.remaining.unwrap_or(u64::MAX).min(1 << 20) as usize;
            return match handler.on_direct(fd, FdType::File, max) {
                DirectResult::Transferred(n) => {
                    if let Some(r) = &mut self.remaining {
                        *r -= n as u64;
                    }
                    if self.remaining == Some(0) {
                        handler.on_eof();
                        ReadResult::Eof
                    } else {
                        ReadResult::Progress
                    }
                }
                DirectResult::Blocking => ReadResult::Blocked,
                DirectResult::Closed => ReadResult::Blocked,
                DirectResult::Eof => {
                    handler.on_eof();
                    ReadResult::Eof
                }
                DirectResult::Errno(e) => {
                    handler.on_error(StreamError::new(io::Error::from_raw_os_error(e)));
                    ReadResult::Error
                }
            };
        }

        match self.fill_stash() {
            Ok(0) => {
                handler.on_eof();
                ReadResult::Eof
            }
            Ok(nbytes) => {
                if let Some(r) = &mut self.remaining {
                    *r = r.saturating_sub(nbytes as u64);
                }
                let n = handler.on_data(&self.stash[..]);
                self.stash_pos = n;
                if n == 0 { ReadResult::Blocked } else { ReadResult::Progress }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadResult::Blocked,
            Err(e) => {
                handler.on_error(e.into());
                ReadResult::Error
            }
        }
    }

    fn skip(&mut self, n: u64) -> u64 {
        let take = (n as usize).min(self.stash_len());
        self.stash_pos += take;
        take as u64
    }

    fn as_fd(&mut self) -> Option<OwnedFd> {
        if self.stash_len() > 0 {
            return None;
        }
        self.fd.take()
    }
}
