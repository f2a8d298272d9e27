/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The non-blocking socket substrate: a single-threaded event loop
//! (readiness callbacks, coarse timers, deferred callbacks), the
//! buffered socket every protocol client sits on, the pluggable
//! socket filter seam, and the lease contract for borrowed
//! connections.

pub mod buffered;
pub mod connect;
pub mod event_loop;
pub mod filter;
pub mod lease;
pub mod queue;
pub mod timeout;

pub use buffered::{BufferedResult, BufferedSocket, BufferedSocketHandler, SocketDirectResult};
pub use event_loop::{DeferEvent, EventLoop, Readiness, SourceHandle, TimerEvent};
pub use filter::{NopSocketFilter, SocketFilter};
pub use lease::Lease;
pub use queue::{LimitedConcurrencyJob, LimitedConcurrencyQueue};
pub use timeout::TimeoutIstream;
