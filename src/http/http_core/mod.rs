use regex::bytes::{Captures, Regex};

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::str::from_utf8;

use crate::http::boyer_moore::find_body_start;

pub mod types;
use types::{HeadError, HeaderMap, ResponseBody};

/// Largest request head (request line plus headers) we are willing to buffer.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

pub const SERVER_NAME: &str = "chunkdrop";

#[derive(PartialEq, Clone, Debug)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    Other(String),
}

impl HttpMethod {
    fn from_verb(verb: &str) -> HttpMethod {
        match verb {
            "GET" => HttpMethod::GET,
            "HEAD" => HttpMethod::HEAD,
            "POST" => HttpMethod::POST,
            other => HttpMethod::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::POST => "POST",
            HttpMethod::Other(verb) => verb,
        }
    }
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum HttpVersion {
    Http1_0,
    Http1_1,
}

pub fn version_to_str(v: &HttpVersion) -> &'static str {
    match v {
        HttpVersion::Http1_0 => "HTTP/1.0",
        HttpVersion::Http1_1 => "HTTP/1.1",
    }
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum HttpStatus {
    Continue,                // 100
    OK,                      // 200
    PartialContent,          // 206
    BadRequest,              // 400
    NotFound,                // 404
    MethodNotAllowed,        // 405
    PayloadTooLarge,         // 413
    RangeNotSatisfiable,     // 416
    RequestHeadersTooLarge,  // 431
    ServerError,             // 500
    NotImplemented,          // 501
    HttpVersionNotSupported, // 505
}

pub fn status_to_code(status: &HttpStatus) -> u16 {
    match status {
        HttpStatus::Continue => 100,
        HttpStatus::OK => 200,
        HttpStatus::PartialContent => 206,
        HttpStatus::BadRequest => 400,
        HttpStatus::NotFound => 404,
        HttpStatus::MethodNotAllowed => 405,
        HttpStatus::PayloadTooLarge => 413,
        HttpStatus::RangeNotSatisfiable => 416,
        HttpStatus::RequestHeadersTooLarge => 431,
        HttpStatus::ServerError => 500,
        HttpStatus::NotImplemented => 501,
        HttpStatus::HttpVersionNotSupported => 505,
    }
}

pub fn status_to_message(status: &HttpStatus) -> &'static str {
    match status {
        HttpStatus::Continue => "Continue",
        HttpStatus::OK => "OK",
        HttpStatus::PartialContent => "Partial Content",
        HttpStatus::BadRequest => "Bad Request",
        HttpStatus::NotFound => "Not Found",
        HttpStatus::MethodNotAllowed => "Method Not Allowed",
        HttpStatus::PayloadTooLarge => "Payload Too Large",
        HttpStatus::RangeNotSatisfiable => "Range Not Satisfiable",
        HttpStatus::RequestHeadersTooLarge => "Request Header Fields Too Large",
        HttpStatus::ServerError => "Internal Server Error",
        HttpStatus::NotImplemented => "Not Implemented",
        HttpStatus::HttpVersionNotSupported => "HTTP Version Not Supported",
    }
}

#[derive(Debug)]
pub struct HttpRequest {
    /// Request target exactly as sent, percent-encoding intact.
    pub path: String,
    pub method: HttpMethod,
    pub version: HttpVersion,
    pub headers: HeaderMap,
}

impl HttpRequest {
    pub fn new(head: &str) -> Result<HttpRequest, HeadError> {
        /* POST /upload HTTP/1.1
         * Header: value
         *
         */
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or("");
        let first: Vec<&str> = request_line.split(' ').collect();
        if first.len() != 3 || first[0].is_empty() || first[1].is_empty() {
            return Err(HeadError::BadRequestLine(request_line.to_string()));
        }

        let version = match first[2] {
            "HTTP/1.0" => HttpVersion::Http1_0,
            "HTTP/1.1" => HttpVersion::Http1_1,
            other => return Err(HeadError::UnsupportedVersion(other.to_string())),
        };

        let mut headers = HeaderMap::new();
        for header_line in lines {
            if header_line.is_empty() {
                continue;
            }
            // Lines without a colon are ignored, not fatal
            if let Some((key, value)) = header_line.split_once(':') {
                headers.insert(key, value);
            }
        }

        Ok(HttpRequest {
            path: first[1].to_string(),
            method: HttpMethod::from_verb(first[0]),
            version,
            headers,
        })
    }

    pub fn get_header(&self, key: &str) -> Option<&str> { self.headers.get(key) }

    /// Path component of the target with percent-encoding undone and any
    /// query string dropped.
    pub fn decoded_path(&self) -> String {
        let path = match self.path.find('?') {
            Some(idx) => &self.path[..idx],
            None => &self.path[..],
        };
        undo_percent_encoding(path)
    }

    pub fn is_chunked(&self) -> bool {
        match self.get_header("transfer-encoding") {
            Some(te) => te
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked")),
            None => false,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get_header("content-length")?.parse().ok()
    }

    pub fn expects_continue(&self) -> bool {
        self.version == HttpVersion::Http1_1
            && match self.get_header("expect") {
                Some(value) => value.eq_ignore_ascii_case("100-continue"),
                None => false,
            }
    }
}

/// Reads from `reader` until a complete request head has arrived. Returns the
/// parsed request along with whatever body bytes were read past the head.
pub fn read_request<R: Read>(
    reader: &mut R,
    limit: usize,
) -> Result<(HttpRequest, Vec<u8>), HeadError> {
    let mut buffer = vec![0u8; limit];
    let mut filled = 0;

    loop {
        if let Some(body_start) = find_body_start(&buffer[..filled]) {
            let head = from_utf8(&buffer[..body_start]).map_err(|_| HeadError::NotUtf8)?;
            let request = HttpRequest::new(head)?;
            return Ok((request, buffer[body_start..filled].to_vec()));
        }

        if filled == limit {
            return Err(HeadError::TooLarge(limit));
        }

        filled += match reader.read(&mut buffer[filled..]) {
            Ok(0) => return Err(HeadError::ConnectionClosed),
            Ok(size) => size,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
    }
}

fn get_byte_from_hex(hi: u8, lo: u8) -> u8 {
    fn digit(d: u8) -> u8 {
        match d {
            b'0'..=b'9' => d - b'0',
            b'a'..=b'f' => d - b'a' + 10,
            _ => d - b'A' + 10,
        }
    }

    (digit(hi) << 4) | digit(lo)
}

fn undo_percent_encoding(path: &str) -> String {
    lazy_static! {
        static ref RE: Regex = Regex::new("%([0-9a-fA-F])([0-9a-fA-F])").unwrap();
    }
    let decoded: Cow<[u8]> = RE.replace_all(path.as_bytes(), |caps: &Captures| {
        vec![get_byte_from_hex(caps[1][0], caps[2][0])]
    });
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Writes the interim response a client waits for after sending
/// `Expect: 100-continue`.
pub fn write_continue<W: Write>(stream: &mut W, version: &HttpVersion) -> io::Result<()> {
    write!(
        stream,
        "{} {} {}\r\n\r\n",
        version_to_str(version),
        status_to_code(&HttpStatus::Continue),
        status_to_message(&HttpStatus::Continue)
    )?;
    stream.flush()
}

/// A complete response. Every response closes the connection.
pub struct HttpResponse {
    status: HttpStatus,
    version: HttpVersion,
    headers: Vec<(String, String)>,
    data: ResponseBody,
    send_body: bool,
}

impl HttpResponse {
    pub fn new(status: HttpStatus) -> HttpResponse {
        HttpResponse {
            status,
            version: HttpVersion::Http1_1,
            headers: vec![("Server".to_string(), SERVER_NAME.to_string())],
            data: ResponseBody::None,
            send_body: true,
        }
    }

    pub fn html(status: HttpStatus, body: String) -> HttpResponse {
        let mut resp = HttpResponse::new(status);
        resp.add_header("Content-Type", "text/html; charset=utf-8".to_string());
        resp.add_body(ResponseBody::Bytes(body.into_bytes()));
        resp
    }

    pub fn json(status: HttpStatus, body: &serde_json::Value) -> HttpResponse {
        let mut resp = HttpResponse::new(status);
        resp.add_header("Content-Type", "application/json".to_string());
        resp.add_body(ResponseBody::Bytes(body.to_string().into_bytes()));
        resp
    }

    pub fn add_body(&mut self, data: ResponseBody) { self.data = data; }

    /// Keeps Content-Length but sends no payload, as HEAD requires.
    pub fn omit_body(&mut self) { self.send_body = false; }

    pub fn add_header(&mut self, key: &str, value: String) {
        self.headers.push((key.to_string(), value));
    }

    pub fn status(&self) -> HttpStatus { self.status }

    pub fn write_to<W: Write>(self, stream: &mut W) -> io::Result<()> {
        let mut head = format!(
            "{version} {code} {message}\r\n",
            version = version_to_str(&self.version),
            code = status_to_code(&self.status),
            message = status_to_message(&self.status)
        );
        for (key, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.data.len()));
        head.push_str("Connection: close\r\n\r\n");
        stream.write_all(head.as_bytes())?;

        if self.send_body {
            match self.data {
                ResponseBody::Bytes(bytes) => stream.write_all(&bytes)?,
                ResponseBody::File(file, len) => {
                    io::copy(&mut file.take(len), stream)?;
                }
                ResponseBody::None => {}
            }
        }

        stream.flush()
    }
}
