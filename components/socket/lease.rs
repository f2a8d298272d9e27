/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::os::fd::OwnedFd;

/// A borrowed socket handle from a connection pool.  The borrower
/// returns it exactly once: `reuse=true` after a clean keep-alive
/// end, `reuse=false` after an error or protocol violation.
pub trait Lease {
    fn release(self: Box<Self>, fd: OwnedFd, reuse: bool);
}

/// The trivial lease: the connection belongs to nobody and is simply
/// closed on release.
pub struct CloseLease;

impl Lease for CloseLease {
    fn release(self: Box<Self>, fd: OwnedFd, _reuse: bool) {
        drop(fd);
    }
}

impl<F: FnOnce(OwnedFd, bool)> Lease for F {
    fn release(self: Box<Self>, fd: OwnedFd, reuse: bool) {
        self(fd, reuse)
    }
}
