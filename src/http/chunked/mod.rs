//! Decoder for `Transfer-Encoding: chunked` bodies (RFC 7230 section 4.1).
//!
//! Each chunk is a hexadecimal size line, that many payload bytes, and a
//! two-byte delimiter. A zero size ends the body. Trailer fields after the
//! last chunk are not read; they stay in the stream for whoever owns it next.
//!
//! Only one chunk is ever held in memory, and payload buffers grow with the
//! bytes actually received rather than the size the peer declared.

pub mod types;

use std::cmp::min;
use std::io::{BufRead, Read};

use types::{ChunkError, FramingError};

/// Longest size line accepted, terminator included.
pub const MAX_SIZE_LINE: usize = 128;

// Cap on up-front allocation for a declared chunk size
const PREALLOC_LIMIT: u64 = 64 * 1024;

/// Reads one size line and parses it as a base-16 integer.
pub fn next_chunk_size<R: BufRead>(stream: &mut R) -> Result<u64, ChunkError> {
    let mut line = Vec::with_capacity(16);
    (&mut *stream)
        .take(MAX_SIZE_LINE as u64 + 1)
        .read_until(b'\n', &mut line)?;

    if line.last() != Some(&b'\n') {
        let err = if line.len() > MAX_SIZE_LINE {
            FramingError::LineTooLong(MAX_SIZE_LINE)
        } else {
            FramingError::Unterminated
        };
        return Err(err.into());
    }

    let text = String::from_utf8_lossy(&line);
    let digits = text.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FramingError::InvalidSize(digits.to_string()).into());
    }

    // Only overflow can fail here
    u64::from_str_radix(digits, 16)
        .map_err(|_| FramingError::InvalidSize(digits.to_string()).into())
}

/// Reads a `size`-byte payload, then consumes the two delimiter bytes that
/// follow it without looking at them.
pub fn read_chunk<R: Read>(stream: &mut R, size: u64) -> Result<Vec<u8>, ChunkError> {
    let mut payload = Vec::with_capacity(min(size, PREALLOC_LIMIT) as usize);
    let received = (&mut *stream).take(size).read_to_end(&mut payload)? as u64;
    if received < size {
        return Err(ChunkError::Truncated {
            expected: size.saturating_add(2),
            received,
        });
    }

    let mut delimiter = Vec::with_capacity(2);
    let tail = (&mut *stream).take(2).read_to_end(&mut delimiter)? as u64;
    if tail < 2 {
        return Err(ChunkError::Truncated {
            expected: size.saturating_add(2),
            received: size.saturating_add(tail),
        });
    }

    Ok(payload)
}

/// Pull-based decoder over one chunked body.
///
/// Single pass: once the terminal chunk has been seen or an error returned,
/// the decoder yields nothing further.
pub struct ChunkDecoder<R> {
    stream: R,
    max_chunk_size: Option<u64>,
    finished: bool,
}

impl<R: BufRead> ChunkDecoder<R> {
    pub fn new(stream: R) -> ChunkDecoder<R> {
        ChunkDecoder {
            stream,
            max_chunk_size: None,
            finished: false,
        }
    }

    /// Rejects any chunk declaring more than `limit` bytes. `None` disables
    /// the check.
    pub fn with_max_chunk_size(mut self, limit: Option<u64>) -> ChunkDecoder<R> {
        self.max_chunk_size = limit;
        self
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool { self.finished }

    /// Payload of the next chunk, or `None` once the terminal chunk is read.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ChunkError> {
        if self.finished {
            return Ok(None);
        }

        let result = self.pull();
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    fn pull(&mut self) -> Result<Option<Vec<u8>>, ChunkError> {
        let size = next_chunk_size(&mut self.stream)?;
        if size == 0 {
            return Ok(None);
        }
        if let Some(limit) = self.max_chunk_size {
            if size > limit {
                return Err(ChunkError::ChunkTooLarge { size, limit });
            }
        }
        read_chunk(&mut self.stream, size).map(Some)
    }

    /// Hands back the stream, positioned after the last byte consumed.
    #[cfg(test)]
    pub fn into_inner(self) -> R { self.stream }
}

impl<R: BufRead> Iterator for ChunkDecoder<R> {
    type Item = Result<Vec<u8>, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> { self.next_chunk().transpose() }
}

#[cfg(test)]
pub(crate) fn encode_chunks(chunks: &[&[u8]]) -> Vec<u8> {
    let mut wire = Vec::new();
    for chunk in chunks {
        wire.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        wire.extend_from_slice(chunk);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}
