use std::fmt;
use std::fs;
use std::io;

use thiserror::Error;

use super::HttpStatus;

/// Request headers in arrival order. Names compare case-insensitively and a
/// repeated name replaces the earlier value in place.
#[derive(Default, Clone, Debug)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let key = key.trim();
        let value = value.trim().to_string();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Failure to obtain a usable request head from a connection.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection closed before the request head was complete")]
    ConnectionClosed,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request line: {0:?}")]
    BadRequestLine(String),

    #[error("unsupported HTTP version: {0}")]
    UnsupportedVersion(String),

    #[error("request head is not valid UTF-8")]
    NotUtf8,

    #[error("I/O error while reading request head: {0}")]
    Io(#[from] io::Error),
}

impl HeadError {
    /// Status to report back, if the peer is still there to hear it.
    pub fn status(&self) -> Option<HttpStatus> {
        match self {
            HeadError::ConnectionClosed | HeadError::Io(_) => None,
            HeadError::TooLarge(_) => Some(HttpStatus::RequestHeadersTooLarge),
            HeadError::UnsupportedVersion(_) => Some(HttpStatus::HttpVersionNotSupported),
            HeadError::BadRequestLine(_) | HeadError::NotUtf8 => Some(HttpStatus::BadRequest),
        }
    }
}

pub enum ResponseBody {
    Bytes(Vec<u8>),
    // File positioned at the first byte to send, plus how many bytes to send
    File(fs::File, u64),
    None,
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match self {
            ResponseBody::Bytes(b) => b.len() as u64,
            ResponseBody::File(_, len) => *len,
            ResponseBody::None => 0,
        }
    }
}
