/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! An istream that withholds its input until the producer decides
//! whether it is wanted.  The HTTP client parks "Expect:
//! 100-continue" request bodies here: `resume()` when the server
//! sends 100 Continue, `discard()` when it answers with a final
//! response instead.

use std::cell::Cell;
use std::rc::Rc;

use crate::istream::{Available, BoxIstream, Istream, IstreamHandler, ReadResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OptionalState {
    Withheld,
    Resumed,
    Discarded,
}

pub struct OptionalIstream {
    input: Option<BoxIstream>,
    state: Rc<Cell<OptionalState>>,
}

#[derive(Clone)]
pub struct OptionalControl {
    state: Rc<Cell<OptionalState>>,
}

pub fn new_optional(input: BoxIstream) -> (OptionalIstream, OptionalControl) {
    let state = Rc::new(Cell::new(OptionalState::Withheld));

    (
        OptionalIstream {
            input: Some(input),
            state: Rc::clone(&state),
        },
        OptionalControl { state },
    )
}

impl OptionalControl {
    /// Let the withheld bytes flow.
    pub fn resume(&self) {
        if self.state.get() == OptionalState::Withheld {
            self.state.set(OptionalState::Resumed);
        }
    }

    /// Throw the input away; the stream reports EOF without ever
    /// delivering a byte.
    pub fn discard(&self) {
        if self.state.get() == OptionalState::Withheld {
            self.state.set(OptionalState::Discarded);
        }
    }
}

impl Istream for OptionalIstream {
    fn available(&self, partial: bool) -> Available {
        match self.state.get() {
            OptionalState::Discarded => Available::Exact(0),
            _ => match &self.input {
                Some(input) => input.available(partial),
                None => Available::Exact(0),
            },
        }
    }

    fn read(&mut self, handler: &mut dyn IstreamHandler) -> ReadResult {
        match self.state.get() {
            OptionalState::Withheld => ReadResult::Blocked,
            OptionalState::Resumed => match &mut self.input {
                Some(input) => input.read(handler),
                None => {
                    handler.on_eof();
                    ReadResult::Eof
                }
            },
            OptionalState::Discarded => {
                self.input = None;
                handler.on_eof();
                ReadResult::Eof
            }
        }
    }

    fn skip(&mut self, n: u64) -> u64 {
        match (self.state.get(), &mut self.input) {
            (OptionalState::Resumed, Some(input)) => input.skip(n),
            _ => 0,
        }
    }
}
