use std::io::{self, BufReader, Chain, Cursor, Read};

use thiserror::Error;

use crate::http::chunked::types::ChunkError;
use crate::http::chunked::ChunkDecoder;
use crate::http::http_core::HttpRequest;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request body exceeds {0} bytes")]
    TooLarge(u64),

    #[error("request body ended after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("{0}")]
    Chunked(#[from] ChunkError),

    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type BodyStream<R> = BufReader<Chain<Cursor<Vec<u8>>, R>>;

/// The body as it arrives: bytes that came in with the request head first,
/// then the rest of the connection.
pub fn replay<R: Read>(leftover: Vec<u8>, reader: R) -> BodyStream<R> {
    BufReader::new(Cursor::new(leftover).chain(reader))
}

/// Reads a whole, small request body into memory. Chunked bodies are decoded,
/// otherwise Content-Length decides; a request with neither has no body.
pub fn read_body<R: Read>(
    req: &HttpRequest,
    leftover: Vec<u8>,
    reader: R,
    limit: u64,
) -> Result<Vec<u8>, BodyError> {
    let stream = replay(leftover, reader);

    if req.is_chunked() {
        let mut body = Vec::new();
        for chunk in ChunkDecoder::new(stream).with_max_chunk_size(Some(limit)) {
            let chunk = chunk?;
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(BodyError::TooLarge(limit));
            }
            body.extend_from_slice(&chunk);
        }
        return Ok(body);
    }

    match req.content_length() {
        Some(len) if len > limit => Err(BodyError::TooLarge(limit)),
        Some(len) => {
            let mut body = Vec::with_capacity(len as usize);
            let received = stream.take(len).read_to_end(&mut body)? as u64;
            if received < len {
                return Err(BodyError::Incomplete {
                    expected: len,
                    received,
                });
            }
            Ok(body)
        }
        None => Ok(Vec::new()),
    }
}
