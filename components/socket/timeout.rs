/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An istream wrapper that fails the stream with a timeout error if
//! the producer stays silent for too long.  The inline-widget driver
//! wraps widget response bodies in this.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use stream::error::{StreamError, TimeoutError};
use stream::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

use crate::event_loop::{EventLoop, TimerEvent};

pub struct TimeoutIstream {
    input: Option<BoxIstream>,
    timer: TimerEvent,
    expired: Rc<Cell<bool>>,
    duration: Duration,
}

impl TimeoutIstream {
    pub fn new(event_loop: &EventLoop, input: BoxIstream, duration: Duration) -> TimeoutIstream {
        let expired = Rc::new(Cell::new(false));
        let expired2 = Rc::clone(&expired);
        let timer = TimerEvent::new(event_loop, move || {
            expired2.set(true);
        });

        TimeoutIstream {
            input: Some(input),
            timer,
            expired,
            duration,
        }
    }
}

impl Istream for TimeoutIstream {
    fn available(&self, partial: bool) -> Available {
        match &self.input {
            Some(input) => input.available(partial),
            None => Available::Exact(0),
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        if self.expired.get() {
            self.input = None;
            handler.on_error(StreamError::new(TimeoutError("body timeout")));
            return ReadResult::Error;
        }

        let Some(input) = &mut self.input else {
            handler.on_eof();
            return ReadResult::Eof;
        };

        let result = input.read(handler);
        match result {
            ReadResult::Progress => {
                /* the producer is alive: restart the deadline */
                self.timer.schedule(self.duration);
            }
            ReadResult::Blocked => {
                if !self.timer.is_pending() {
                    self.timer.schedule(self.duration);
                }
            }
            ReadResult::Eof | ReadResult::Error => {
                self.input = None;
                self.timer.cancel();
            }
        }
        result
    }

    fn skip(&mut self, n: u64) -> u64 {
        match &mut self.input {
            Some(input) => input.skip(n),
            None => 0,
        }
    }
}
