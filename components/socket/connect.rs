/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Non-blocking TCP connect.  The returned fd is still establishing
//! the connection; the first writability event (or a failed write)
//! reports the outcome, which is exactly how the protocol clients'
//! write pumps behave anyway.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};

pub fn tcp_connect(address: SocketAddr) -> io::Result<OwnedFd> {
    let stream = mio::net::TcpStream::connect(address)?;
    let fd = stream.into_raw_fd();
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
