//! JSONL framing of envelopes.

use std::io::{self, Read};

use thiserror::Error;

use crate::PROTOCOL_VERSION;
use crate::message::Envelope;

/// Largest accepted line, newline included.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Errors raised while framing or parsing envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Reading from the stream failed.
    #[error("failed to read frame: {0}")]
    Io(#[from] io::Error),
    /// A line exceeded the configured limit.
    #[error("frame exceeds {limit} bytes")]
    LineTooLong {
        /// Limit that was exceeded.
        limit: usize,
    },
    /// An envelope is too large to be fragmented.
    #[error("envelope of {bytes} bytes cannot be fragmented")]
    TooLarge {
        /// Serialised size.
        bytes: usize,
    },
    /// The line was not a valid envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The peer speaks another protocol version.
    #[error("unsupported protocol version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found on the envelope.
        found: u16,
        /// Version this build speaks.
        expected: u16,
    },
}

/// Serialises `envelope` as a newline-terminated JSON line.
pub fn encode_line(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

/// Parses one line into an envelope and checks its version.
pub fn decode_line(line: &[u8]) -> Result<Envelope, CodecError> {
    let envelope: Envelope = serde_json::from_slice(line.trim_ascii())?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: envelope.version,
            expected: PROTOCOL_VERSION,
        });
    }
    Ok(envelope)
}

/// Splits a byte stream into bounded lines.
///
/// Blank lines are skipped. A final line without a terminating newline is
/// returned when the stream ends.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    pending: Vec<u8>,
    limit: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wraps `inner` with the default [`MAX_LINE_BYTES`] limit.
    pub const fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_LINE_BYTES)
    }

    /// Wraps `inner` with a custom line limit.
    pub const fn with_limit(inner: R, limit: usize) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            limit,
        }
    }

    /// Returns the next non-blank line, or `None` at end of stream.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        let mut chunk = [0_u8; 8192];
        loop {
            if let Some(line) = self.take_buffered_line()? {
                if line.trim_ascii().is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            let read = read_with_retry(&mut self.inner, &mut chunk)?;
            if read == 0 {
                let rest = std::mem::take(&mut self.pending);
                return Ok((!rest.trim_ascii().is_empty()).then_some(rest));
            }
            self.pending.extend(chunk.iter().take(read));
        }
    }

    /// Reads and decodes the next envelope.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, CodecError> {
        self.next_line()?.map(|line| decode_line(&line)).transpose()
    }

    fn take_buffered_line(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        match self.pending.iter().position(|byte| *byte == b'\n') {
            Some(position) => {
                if position >= self.limit {
                    return Err(CodecError::LineTooLong { limit: self.limit });
                }
                let rest = self.pending.split_off(position.saturating_add(1));
                Ok(Some(std::mem::replace(&mut self.pending, rest)))
            }
            None if self.pending.len() > self.limit => {
                Err(CodecError::LineTooLong { limit: self.limit })
            }
            None => Ok(None),
        }
    }
}

fn read_with_retry(reader: &mut impl Read, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}
