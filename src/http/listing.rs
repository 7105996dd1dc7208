use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;

use thiserror::Error;
use tracing::{debug, error};

use crate::http::body;
use crate::http::http_core::types::{HeadError, ResponseBody};
use crate::http::http_core::{
    self, read_request, HttpMethod, HttpRequest, HttpResponse, HttpStatus, MAX_HEAD_SIZE,
};
use crate::http::notify::{self, NotificationError, MAX_NOTIFICATION_BODY, NOTIFICATION_PATH};
use crate::http::rendering;
use crate::http::Service;
use crate::store::UploadDir;

/// Extensions shown on the listing page.
pub const MEDIA_EXTENSIONS: [&str; 2] = [".mp4", ".mkv"];

/// URL prefix stored files are served under.
pub const MEDIA_ROUTE: &str = "/static/uploads/";

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("bad request head: {0}")]
    Head(#[from] HeadError),

    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, PartialEq)]
enum ByteRange {
    Satisfiable(u64, u64),
    Unsatisfiable,
    // Malformed or multi-range; the whole file is sent instead
    Ignored,
}

/// Parses a single `bytes=` range against a file of `len` bytes. The end of
/// a satisfiable range is inclusive and clamped to the file.
fn parse_range(header: &str, len: u64) -> ByteRange {
    let ranges = match header.trim().strip_prefix("bytes=") {
        Some(ranges) if !ranges.contains(',') => ranges.trim(),
        _ => return ByteRange::Ignored,
    };
    let (first, last) = match ranges.split_once('-') {
        Some(parts) => parts,
        None => return ByteRange::Ignored,
    };

    if first.is_empty() {
        // Suffix form: the final `n` bytes
        return match last.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if len == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Satisfiable(len.saturating_sub(n), len - 1),
            Err(_) => ByteRange::Ignored,
        };
    }

    let start = match first.parse::<u64>() {
        Ok(start) => start,
        Err(_) => return ByteRange::Ignored,
    };
    let end = if last.is_empty() {
        u64::MAX
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return ByteRange::Ignored,
        }
    };

    if start >= len {
        ByteRange::Unsatisfiable
    } else {
        ByteRange::Satisfiable(start, end.min(len - 1))
    }
}

fn content_type(name: &str) -> &'static str {
    if name.ends_with(".mp4") {
        "video/mp4"
    } else if name.ends_with(".mkv") {
        "video/x-matroska"
    } else {
        "application/octet-stream"
    }
}

fn error_page(status: HttpStatus, msg: Option<String>) -> HttpResponse {
    HttpResponse::html(status, rendering::render_error(&status, msg))
}

fn method_not_allowed(allow: &str) -> HttpResponse {
    let mut resp = error_page(HttpStatus::MethodNotAllowed, None);
    resp.add_header("Allow", allow.to_string());
    resp
}

/// The browsing endpoint: an HTML listing of uploaded videos, the files
/// themselves, and the JSON notification hook.
pub struct ListingService {
    store: UploadDir,
}

impl ListingService {
    pub fn new(store: UploadDir) -> ListingService { ListingService { store } }

    pub fn handle<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<(), ListingError> {
        let (req, leftover) = match read_request(&mut reader, MAX_HEAD_SIZE) {
            Ok(parsed) => parsed,
            Err(e) => {
                if let Some(status) = e.status() {
                    let _ = error_page(status, Some(e.to_string())).write_to(&mut writer);
                }
                return Err(e.into());
            }
        };
        debug!(method = req.method.as_str(), path = %req.path, "listing request");

        let mut resp = match self.route(&req, leftover, reader) {
            Ok(resp) => resp,
            Err(e) => {
                error!(path = %req.path, error = %e, "could not read upload directory");
                error_page(HttpStatus::ServerError, None)
            }
        };
        if req.method == HttpMethod::HEAD {
            resp.omit_body();
        }
        debug!(
            path = %req.path,
            status = http_core::status_to_code(&resp.status()),
            "listing response"
        );
        resp.write_to(&mut writer)?;
        Ok(())
    }

    fn route<R: Read>(
        &self,
        req: &HttpRequest,
        leftover: Vec<u8>,
        reader: R,
    ) -> io::Result<HttpResponse> {
        let path = req.decoded_path();
        let readable = matches!(req.method, HttpMethod::GET | HttpMethod::HEAD);

        if path == NOTIFICATION_PATH {
            return Ok(match req.method {
                HttpMethod::GET | HttpMethod::POST => notify::acknowledge(
                    body::read_body(req, leftover, reader, MAX_NOTIFICATION_BODY)
                        .map_err(NotificationError::from)
                        .and_then(|bytes| notify::parse_notification(&bytes)),
                ),
                _ => method_not_allowed("GET, POST"),
            });
        }

        if path == "/" {
            if !readable {
                return Ok(method_not_allowed("GET, HEAD"));
            }
            let videos: Vec<_> = self
                .store
                .list_entries()?
                .into_iter()
                .filter(|entry| entry.has_extension(&MEDIA_EXTENSIONS))
                .collect();
            return Ok(HttpResponse::html(
                HttpStatus::OK,
                rendering::render_listing(&videos, MEDIA_ROUTE),
            ));
        }

        if let Some(name) = path.strip_prefix(MEDIA_ROUTE) {
            if !readable {
                return Ok(method_not_allowed("GET, HEAD"));
            }
            return self.serve_media(req, name);
        }

        Ok(error_page(
            HttpStatus::NotFound,
            Some(format!("Nothing is served at {}", path)),
        ))
    }

    fn serve_media(&self, req: &HttpRequest, name: &str) -> io::Result<HttpResponse> {
        let (mut file, len) = match self.store.open_entry(name)? {
            Some(found) => found,
            None => {
                return Ok(error_page(
                    HttpStatus::NotFound,
                    Some(format!("No uploaded file named {}", name)),
                ))
            }
        };

        let range = match req.get_header("range") {
            Some(header) => parse_range(header, len),
            None => ByteRange::Ignored,
        };

        let mut resp = match range {
            ByteRange::Satisfiable(start, end) => {
                file.seek(SeekFrom::Start(start))?;
                let mut resp = HttpResponse::new(HttpStatus::PartialContent);
                resp.add_header("Content-Range", format!("bytes {}-{}/{}", start, end, len));
                resp.add_body(ResponseBody::File(file, end - start + 1));
                resp
            }
            ByteRange::Unsatisfiable => {
                let mut resp = HttpResponse::new(HttpStatus::RangeNotSatisfiable);
                resp.add_header("Content-Range", format!("bytes */{}", len));
                return Ok(resp);
            }
            ByteRange::Ignored => {
                let mut resp = HttpResponse::new(HttpStatus::OK);
                resp.add_body(ResponseBody::File(file, len));
                resp
            }
        };
        resp.add_header("Content-Type", content_type(name).to_string());
        resp.add_header("Accept-Ranges", "bytes".to_string());
        Ok(resp)
    }
}

impl Service for ListingService {
    type Error = ListingError;

    fn name(&self) -> &'static str { "listing" }

    fn serve(&self, stream: &TcpStream) -> Result<(), ListingError> { self.handle(stream, stream) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::chunked::encode_chunks;
    use crate::http::{shutdown_pipe, Endpoint};
    use std::fs;
    use std::io::Cursor;
    use std::thread;
    use tempfile::tempdir;

    fn request(svc: &ListingService, raw: &[u8]) -> String {
        let mut out = Vec::new();
        svc.handle(Cursor::new(raw.to_vec()), &mut out).unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    fn service_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, ListingService) {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let svc = ListingService::new(UploadDir::open(dir.path()).unwrap());
        (dir, svc)
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range("bytes=0-3", 10), ByteRange::Satisfiable(0, 3));
        assert_eq!(parse_range("bytes=4-", 10), ByteRange::Satisfiable(4, 9));
        assert_eq!(parse_range("bytes=8-100", 10), ByteRange::Satisfiable(8, 9));
        assert_eq!(parse_range("bytes=-3", 10), ByteRange::Satisfiable(7, 9));
        assert_eq!(parse_range("bytes=-30", 10), ByteRange::Satisfiable(0, 9));
        assert_eq!(parse_range("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=5-2", 10), ByteRange::Ignored);
        assert_eq!(parse_range("bytes=0-1,4-5", 10), ByteRange::Ignored);
        assert_eq!(parse_range("items=0-1", 10), ByteRange::Ignored);
    }

    #[test]
    fn listing_shows_only_videos() {
        let (_dir, svc) = service_with(&[
            ("b.mkv", b"22"),
            ("a.mp4", b"1"),
            ("notes.txt", b"hidden"),
        ]);
        let reply = request(&svc, b"GET / HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("/static/uploads/a.mp4"));
        assert!(reply.contains("/static/uploads/b.mkv"));
        assert!(!reply.contains("notes.txt"));
        let a = reply.find(">a.mp4<").unwrap();
        let b = reply.find(">b.mkv<").unwrap();
        assert!(a < b);
    }

    #[test]
    fn head_listing_has_no_body() {
        let (_dir, svc) = service_with(&[("a.mp4", b"1")]);
        let reply = request(&svc, b"HEAD / HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("\r\n\r\n"));
    }

    #[test]
    fn serves_file_whole_and_by_range() {
        let (_dir, svc) = service_with(&[("clip.mp4", b"0123456789")]);
        let reply = request(&svc, b"GET /static/uploads/clip.mp4 HTTP/1.1\r\n\r\n");
        assert!(reply.contains("Content-Type: video/mp4\r\n"));
        assert!(reply.contains("Accept-Ranges: bytes\r\n"));
        assert!(reply.ends_with("\r\n\r\n0123456789"));

        let reply = request(
            &svc,
            b"GET /static/uploads/clip.mp4 HTTP/1.1\r\nRange: bytes=2-5\r\n\r\n",
        );
        assert!(reply.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(reply.contains("Content-Range: bytes 2-5/10\r\n"));
        assert!(reply.contains("Content-Length: 4\r\n"));
        assert!(reply.ends_with("\r\n\r\n2345"));

        let reply = request(
            &svc,
            b"GET /static/uploads/clip.mp4 HTTP/1.1\r\nRange: bytes=20-\r\n\r\n",
        );
        assert!(reply.starts_with("HTTP/1.1 416 Range Not Satisfiable\r\n"));
        assert!(reply.contains("Content-Range: bytes */10\r\n"));
    }

    #[test]
    fn encoded_names_and_escapes() {
        let (_dir, svc) = service_with(&[("my clip.mkv", b"abc")]);
        let reply = request(&svc, b"GET /static/uploads/my%20clip.mkv HTTP/1.1\r\n\r\n");
        assert!(reply.contains("Content-Type: video/x-matroska\r\n"));
        assert!(reply.ends_with("abc"));

        let reply = request(&svc, b"GET /static/uploads/..%2Fsecret HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn unknown_paths_and_methods() {
        let (_dir, svc) = service_with(&[]);
        let reply = request(&svc, b"GET /nowhere HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 404 Not Found\r\n"));
        let reply = request(&svc, b"POST / HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(reply.contains("Allow: GET, HEAD\r\n"));
        let reply = request(&svc, b"DELETE /receive_notification HTTP/1.1\r\n\r\n");
        assert!(reply.contains("Allow: GET, POST\r\n"));
    }

    #[test]
    fn notification_with_content_length() {
        let (_dir, svc) = service_with(&[]);
        let body = br#"{"camera":"porch"}"#;
        let mut raw = format!(
            "POST /receive_notification HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(body);
        let reply = request(&svc, &raw);
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with(r#"{"message":"Notification received successfully"}"#));
    }

    #[test]
    fn notification_bad_json_and_chunked() {
        let (_dir, svc) = service_with(&[]);
        let reply = request(
            &svc,
            b"POST /receive_notification HTTP/1.1\r\nContent-Length: 3\r\n\r\n{{{",
        );
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(reply.contains(r#"{"error":"#));

        let mut raw =
            b"POST /receive_notification HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        raw.extend_from_slice(&encode_chunks(&[b"{\"ok\":", b"true}"]));
        let reply = request(&svc, &raw);
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn serves_over_a_real_socket() {
        let (_dir, svc) = service_with(&[("live.mp4", b"frames")]);
        let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap(), svc, None).unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (trigger, signal) = shutdown_pipe().unwrap();
        let handle = thread::spawn(move || endpoint.run(signal));

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET /static/uploads/live.mp4 HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("frames"));

        trigger.trigger();
        handle.join().unwrap().unwrap();
    }
}
