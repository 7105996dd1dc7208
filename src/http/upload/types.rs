use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::http::chunked::types::ChunkError;
use crate::http::http_core::types::HeadError;
use crate::http::http_core::HttpStatus;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("bad request head: {0}")]
    Head(#[from] HeadError),

    #[error("could not decode body: {0}")]
    Decode(#[from] ChunkError),

    #[error("upload exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("could not open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not write upload: {0}")]
    Write(#[source] io::Error),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl UploadError {
    /// Status for the optional error page sent before the connection drops.
    pub fn status(&self) -> HttpStatus {
        match self {
            UploadError::Head(e) => e.status().unwrap_or(HttpStatus::BadRequest),
            UploadError::Decode(ChunkError::ChunkTooLarge { .. }) | UploadError::TooLarge { .. } => {
                HttpStatus::PayloadTooLarge
            }
            UploadError::Decode(_) => HttpStatus::BadRequest,
            UploadError::Open { .. } | UploadError::Write(_) | UploadError::Io(_) => {
                HttpStatus::ServerError
            }
        }
    }
}
