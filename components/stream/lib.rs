/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The streaming-I/O substrate: fixed-capacity FIFO buffers backed by
//! a process-global slice pool, and the pull-based [`Istream`] byte
//! stream with its combinator family.  Everything above this crate
//! (sockets, protocol codecs, template processors) moves response
//! bodies through these types without ever holding them in memory as
//! a whole.

pub mod cancellable;
pub mod catch;
pub mod chunked;
pub mod concat;
pub mod delayed;
pub mod error;
pub mod expansible_buffer;
pub mod fifo_buffer;
pub mod file;
pub mod growing_buffer;
pub mod istream;
pub mod memory;
pub mod optional;
pub mod replace;
pub mod sink;
pub mod slice_pool;

pub use cancellable::{Cancellable, CancellablePointer};
pub use catch::CatchIstream;
pub use chunked::ChunkedIstream;
pub use concat::ConcatIstream;
pub use delayed::{DelayedControl, DelayedIstream, new_delayed};
pub use error::{StreamError, TimeoutError};
pub use expansible_buffer::ExpansibleBuffer;
pub use fifo_buffer::FifoBuffer;
pub use file::FileIstream;
pub use growing_buffer::GrowingBuffer;
pub use istream::{
    Available, BoxIstream, DirectResult, FdType, FdTypeMask, Istream, IstreamHandler, ReadResult,
};
pub use memory::{MemoryIstream, NullIstream, istream_memory, istream_null, istream_string};
pub use optional::{OptionalControl, OptionalIstream, new_optional};
pub use replace::{ReplaceCore, ReplaceIstream, ReplaceParser};
pub use sink::StringSink;
pub use slice_pool::{SliceAllocation, SlicePool};
