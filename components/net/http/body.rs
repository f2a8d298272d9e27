/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Message-body framing shared by the HTTP client and server: an
//! exact-length reader, a chunked-transfer decoder, and the
//! read-until-EOF fallback.

use stream::error::StreamError;
use stream::istream::{Available, IstreamHandler};

use crate::error::ProtocolError;

/// How far one `feed` call got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyProgress {
    /// The consumer took nothing (back-pressure).
    Blocked,
    /// More input is needed.
    More,
    /// The body is complete.
    Eof,
}

enum Framing {
    Length(u64),
    Chunked(ChunkedDecoder),
    UntilEof,
}

pub struct BodyReader {
    framing: Framing,
    eof: bool,
}

impl BodyReader {
    pub fn with_length(length: u64) -> BodyReader {
        BodyReader {
            framing: Framing::Length(length),
            eof: length == 0,
        }
    }

    pub fn chunked() -> BodyReader {
        BodyReader {
            framing: Framing::Chunked(ChunkedDecoder::new()),
            eof: false,
        }
    }

    pub fn until_eof() -> BodyReader {
        BodyReader {
            framing: Framing::UntilEof,
            eof: false,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// May the socket be reused after this body (i.e. do we know
    /// where it ends)?
    pub fn has_end(&self) -> bool {
        !matches!(self.framing, Framing::UntilEof)
    }

    pub fn available(&self, partial: bool, buffered: usize) -> Available {
        match &self.framing {
            Framing::Length(remaining) => Available::Exact(*remaining),
            Framing::Chunked(_) | Framing::UntilEof => {
                if partial {
                    Available::Exact(buffered as u64)
                } else {
                    Available::Unknown
                }
            }
        }
    }

    /// Feed socket-buffer bytes through to the consumer.  Returns
    /// the number of *input* bytes consumed and the progress.
    pub fn feed(
        &mut self,
        data: &[u8],
        handler: &mut dyn IstreamHandler,
    ) -> Result<(usize, BodyProgress), StreamError> {
        debug_assert!(!self.eof);

        match &mut self.framing {
            Framing::Length(remaining) => {
                let take = data.len().min(*remaining as usize);
                let nbytes = handler.on_data(&data[..take]);
                *remaining -= nbytes as u64;
                if *remaining == 0 {
                    self.eof = true;
                    Ok((nbytes, BodyProgress::Eof))
                } else if nbytes == 0 {
                    Ok((0, BodyProgress::Blocked))
                } else {
                    Ok((nbytes, BodyProgress::More))
                }
            }

            Framing::Chunked(decoder) => {
                let (consumed, progress) = decoder.feed(data, handler)?;
                if progress == BodyProgress::Eof {
                    self.eof = true;
                }
                Ok((consumed, progress))
            }

            Framing::UntilEof => {
                let nbytes = handler.on_data(data);
                if nbytes == 0 && !data.is_empty() {
                    Ok((0, BodyProgress::Blocked))
                } else {
                    Ok((nbytes, BodyProgress::More))
                }
            }
        }
    }

    /// The socket has ended.  For the until-EOF framing this is the
    /// regular end; for the others it means the peer quit early.
    pub fn socket_eof(&mut self) -> Result<(), StreamError> {
        match &self.framing {
            Framing::UntilEof => {
                self.eof = true;
                Ok(())
            }
            Framing::Length(0) => Ok(()),
            _ => Err(StreamError::new(ProtocolError::unspecified(
                "premature end of socket in response body",
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    TrailerStart,
    Trailer,
    TrailerLf,
    End,
}

/// Incremental chunked-transfer decoder.
pub struct ChunkedDecoder {
    state: ChunkState,
    remaining: u64,
    seen_digit: bool,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> ChunkedDecoder {
        ChunkedDecoder {
            state: ChunkState::Size,
            remaining: 0,
            seen_digit: false,
        }
    }

    pub fn feed(
        &mut self,
        data: &[u8],
        handler: &mut dyn IstreamHandler,
    ) -> Result<(usize, BodyProgress), StreamError> {
        let mut i = 0;

        while i < data.len() {
            match self.state {
                ChunkState::Size => {
                    let ch = data[i];
                    if let Some(digit) = (ch as char).to_digit(16) {
                        self.remaining = self
                            .remaining
                            .checked_mul(16)
                            .and_then(|v| v.checked_add(digit as u64))
                            .ok_or_else(|| {
                                StreamError::new(ProtocolError::garbage(
                                    "chunk size overflow",
                                ))
                            })?;
                        self.seen_digit = true;
                        i += 1;
                    } else if ch == b'\r' {
                        if !self.seen_digit {
                            return Err(StreamError::new(ProtocolError::garbage(
                                "missing chunk size",
                            )));
                        }
                        self.state = ChunkState::SizeLf;
                        i += 1;
                    } else if ch == b';' || ch == b' ' {
                        /* chunk extension, skipped until CR */
                        i += 1;
                    } else {
                        return Err(StreamError::new(ProtocolError::garbage(
                            "malformed chunk size",
                        )));
                    }
                }

                ChunkState::SizeLf => {
                    if data[i] != b'\n' {
                        return Err(StreamError::new(ProtocolError::garbage(
                            "malformed chunk header",
                        )));
                    }
                    i += 1;
                    if self.remaining == 0 {
                        self.state = ChunkState::TrailerStart;
                    } else {
                        self.state = ChunkState::Data;
                    }
                }

                ChunkState::Data => {
                    let take = (data.len() - i).min(self.remaining as usize);
                    let nbytes = handler.on_data(&data[i..i + take]);
                    self.remaining -= nbytes as u64;
                    i += nbytes;
                    if nbytes == 0 {
                        return Ok((i, if i == 0 {
                            BodyProgress::Blocked
                        } else {
                            BodyProgress::More
                        }));
                    }
                    if self.remaining == 0 {
                        self.state = ChunkState::DataCr;
                    }
                }

                ChunkState::DataCr => {
                    if data[i] != b'\r' {
                        return Err(StreamError::new(ProtocolError::garbage(
                            "missing CR after chunk",
                        )));
                    }
                    i += 1;
                    self.state = ChunkState::DataLf;
                }

                ChunkState::DataLf => {
                    if data[i] != b'\n' {
                        return Err(StreamError::new(ProtocolError::garbage(
                            "missing LF after chunk",
                        )));
                    }
                    i += 1;
                    self.state = ChunkState::Size;
                    self.remaining = 0;
                    self.seen_digit = false;
                }

                ChunkState::TrailerStart => {
                    if data[i] == b'\r' {
                        self.state = ChunkState::TrailerLf;
                        i += 1;
                    } else {
                        /* a trailer header line, ignored */
                        self.state = ChunkState::Trailer;
                    }
                }

                ChunkState::Trailer => match data[i..].iter().position(|&ch| ch == b'\n') {
                    Some(rel) => {
                        i += rel + 1;
                        self.state = ChunkState::TrailerStart;
                    }
                    None => {
                        i = data.len();
                    }
                },

                ChunkState::TrailerLf => {
                    if data[i] != b'\n' {
                        return Err(StreamError::new(ProtocolError::garbage(
                            "malformed chunked trailer",
                        )));
                    }
                    i += 1;
                    self.state = ChunkState::End;
                    return Ok((i, BodyProgress::Eof));
                }

                ChunkState::End => break,
            }
        }

        Ok((
            i,
            if self.state == ChunkState::End {
                BodyProgress::Eof
            } else {
                BodyProgress::More
            },
        ))
    }
}
