use std::io;

use thiserror::Error;

/// The chunk-size line could not be understood.
#[derive(Debug, Error, PartialEq)]
pub enum FramingError {
    #[error("chunk size {0:?} is not a hexadecimal number")]
    InvalidSize(String),

    #[error("stream ended before the chunk size line was terminated")]
    Unterminated,

    #[error("chunk size line longer than {0} bytes")]
    LineTooLong(usize),
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("stream truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("chunk of {size} bytes exceeds the limit of {limit} bytes")]
    ChunkTooLarge { size: u64, limit: u64 },

    #[error("I/O error while decoding chunks: {0}")]
    Io(#[from] io::Error),
}
