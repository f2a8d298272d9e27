/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::error::Error;
use std::fmt;
use std::io;

/// The error type carried by istream chains.  A boxed source error
/// plus an optional chain of context prefixes, so a protocol client
/// can prepend its peer name without losing the original kind.
pub struct StreamError {
    prefix: Option<String>,
    inner: Box<dyn Error + 'static>,
}

impl StreamError {
    pub fn new<E: Error + 'static>(inner: E) -> Self {
        StreamError {
            prefix: None,
            inner: Box::new(inner),
        }
    }

    /// A plain message error, for conditions that have no richer
    /// type.
    pub fn message<S: Into<String>>(msg: S) -> Self {
        StreamError::new(MessageError(msg.into()))
    }

    /// Prepend context, e.g. the peer name of a failed connection.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        match &mut self.prefix {
            Some(p) => {
                let mut s = String::with_capacity(prefix.len() + p.len());
                s.push_str(prefix);
                s.push_str(p);
                *p = s;
            }
            None => self.prefix = Some(prefix.to_string()),
        }
        self
    }

    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{}", prefix)?;
        }
        write!(f, "{}", self.inner)
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamError({})", self)
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        StreamError::new(e)
    }
}

struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageError({:?})", self.0)
    }
}

impl Error for MessageError {}

/// A deadline expired before the peer produced the next byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError(pub &'static str);

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Error for TimeoutError {}
