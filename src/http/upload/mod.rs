pub mod filename;
pub mod types;

use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::http::body;
use crate::http::chunked::ChunkDecoder;
use crate::http::http_core::{
    read_request, write_continue, HttpMethod, HttpRequest, HttpResponse, HttpStatus,
    MAX_HEAD_SIZE,
};
use crate::http::rendering;
use crate::http::Service;
use crate::opts::types::ServerConfig;
use crate::store::{UploadDir, UploadFile};

use filename::FilenameResolver;
use types::UploadError;

/// The raw upload endpoint. A POST body is always read as chunked transfer
/// encoding and written, chunk by chunk, to a file in the upload directory.
pub struct UploadReceiver {
    store: UploadDir,
    filenames: FilenameResolver,
    max_chunk_size: Option<u64>,
    size_limit: Option<u64>,
    report_errors: bool,
}

impl UploadReceiver {
    pub fn new(config: &ServerConfig, store: UploadDir) -> UploadReceiver {
        UploadReceiver {
            store,
            filenames: FilenameResolver::new(config.sanitize_filenames),
            max_chunk_size: config.max_chunk_size,
            size_limit: config.upload_size_limit,
            report_errors: config.report_upload_errors,
        }
    }

    /// Handles the single request on a connection.
    pub fn handle<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<(), UploadError> {
        let (req, leftover) = match read_request(&mut reader, MAX_HEAD_SIZE) {
            Ok(parsed) => parsed,
            Err(e) => {
                if let Some(status) = e.status() {
                    let _ = send_error(&mut writer, status, e.to_string());
                }
                return Err(e.into());
            }
        };

        match req.method {
            HttpMethod::GET => {
                debug!(path = %req.path, "GET on upload endpoint");
                HttpResponse::html(HttpStatus::OK, format!("GET request for {}", req.path))
                    .write_to(&mut writer)?;
                Ok(())
            }
            HttpMethod::POST => self.receive(&req, leftover, reader, &mut writer),
            ref other => {
                let msg = format!("Unsupported method ('{}')", other.as_str());
                send_error(&mut writer, HttpStatus::NotImplemented, msg)?;
                Ok(())
            }
        }
    }

    fn receive<R: Read, W: Write>(
        &self,
        req: &HttpRequest,
        leftover: Vec<u8>,
        reader: R,
        writer: &mut W,
    ) -> Result<(), UploadError> {
        info!("POST request,\nPath: {}\nHeaders:\n{}", req.path, req.headers);

        let filename = self.filenames.resolve(&req.headers, Utc::now());
        if req.expects_continue() {
            write_continue(writer, &req.version)?;
        }

        match self.store_body(&filename, leftover, reader) {
            Ok(_) => {
                let msg = format!(
                    "POST request for {} received and saved as {}",
                    req.path, filename
                );
                HttpResponse::html(HttpStatus::OK, msg).write_to(writer)?;
                Ok(())
            }
            Err(e) => {
                if self.report_errors {
                    let _ = send_error(writer, e.status(), e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Streams the body into `filename`. On failure the partial file stays
    /// where it is.
    fn store_body<R: Read>(&self, filename: &str, leftover: Vec<u8>, reader: R) -> Result<u64, UploadError> {
        let mut file = self
            .store
            .create_or_truncate(filename)
            .map_err(|source| UploadError::Open {
                path: self.store.path().join(filename),
                source,
            })?;

        let mut decoder = ChunkDecoder::new(body::replay(leftover, reader))
            .with_max_chunk_size(self.max_chunk_size);

        if let Err(e) = self.pump(&mut decoder, &mut file) {
            warn!(
                path = %file.path().display(),
                bytes_written = file.bytes_written(),
                error = %e,
                "upload aborted, partial file left in place"
            );
            return Err(e);
        }

        file.close().map_err(UploadError::Write)
    }

    fn pump<B: BufRead>(
        &self,
        decoder: &mut ChunkDecoder<B>,
        file: &mut UploadFile,
    ) -> Result<(), UploadError> {
        while let Some(chunk) = decoder.next_chunk()? {
            if let Some(limit) = self.size_limit {
                if file.bytes_written() + chunk.len() as u64 > limit {
                    return Err(UploadError::TooLarge { limit });
                }
            }
            file.append(&chunk).map_err(UploadError::Write)?;
        }
        Ok(())
    }
}

fn send_error<W: Write>(writer: &mut W, status: HttpStatus, msg: String) -> io::Result<()> {
    HttpResponse::html(status, rendering::render_error(&status, Some(msg))).write_to(writer)
}

impl Service for UploadReceiver {
    type Error = UploadError;

    fn name(&self) -> &'static str { "upload" }

    fn serve(&self, stream: &TcpStream) -> Result<(), UploadError> { self.handle(stream, stream) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::chunked::encode_chunks;
    use crate::http::chunked::types::{ChunkError, FramingError};
    use std::fs;
    use std::io::Cursor;
    use std::net::SocketAddr;
    use std::path::Path;
    use tempfile::tempdir;

    fn config(dir: &Path) -> ServerConfig {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        ServerConfig {
            upload_dir: dir.to_path_buf(),
            upload_addr: any,
            listing_addr: any,
            read_timeout: None,
            max_chunk_size: None,
            upload_size_limit: None,
            sanitize_filenames: false,
            report_upload_errors: false,
        }
    }

    fn receiver(config: &ServerConfig) -> UploadReceiver {
        UploadReceiver::new(config, UploadDir::open(&config.upload_dir).unwrap())
    }

    fn post(headers: &str, body: &[u8]) -> Cursor<Vec<u8>> {
        let mut wire = format!(
            "POST /upload HTTP/1.1\r\nHost: cam\r\nTransfer-Encoding: chunked\r\n{}\r\n",
            headers
        )
        .into_bytes();
        wire.extend_from_slice(body);
        Cursor::new(wire)
    }

    fn run(rx: &UploadReceiver, input: Cursor<Vec<u8>>) -> (Result<(), UploadError>, String) {
        let mut out = Vec::new();
        let res = rx.handle(input, &mut out);
        (res, String::from_utf8(out).unwrap())
    }

    #[test]
    fn stores_named_upload() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let body = encode_chunks(&[b"first part,", b"second part"]);
        let (res, reply) = run(
            &rx,
            post("Content-Disposition: attachment; filename=\"clip.mp4\"\r\n", &body),
        );
        res.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("POST request for /upload received and saved as clip.mp4"));
        assert_eq!(
            fs::read(dir.path().join("clip.mp4")).unwrap(),
            b"first part,second part"
        );
    }

    #[test]
    fn terminal_chunk_only_creates_empty_file() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, _) = run(
            &rx,
            post("Content-Disposition: attachment; filename=empty.mp4\r\n", b"0\r\n\r\n"),
        );
        res.unwrap();
        assert_eq!(fs::read(dir.path().join("empty.mp4")).unwrap().len(), 0);
    }

    #[test]
    fn malformed_size_drops_connection_silently() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, reply) = run(
            &rx,
            post("Content-Disposition: attachment; filename=bad.mp4\r\n", b"zz\r\nabc\r\n0\r\n\r\n"),
        );
        assert!(matches!(
            res,
            Err(UploadError::Decode(ChunkError::Framing(FramingError::InvalidSize(_))))
        ));
        assert!(reply.is_empty());
        // The file was opened before decoding started
        assert!(dir.path().join("bad.mp4").exists());
    }

    #[test]
    fn truncated_body_leaves_partial_file() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, _) = run(
            &rx,
            post(
                "Content-Disposition: attachment; filename=cut.mp4\r\n",
                b"4\r\nfull\r\na\r\nabc",
            ),
        );
        assert!(matches!(
            res,
            Err(UploadError::Decode(ChunkError::Truncated { .. }))
        ));
        assert_eq!(fs::read(dir.path().join("cut.mp4")).unwrap(), b"full");
    }

    #[test]
    fn missing_disposition_uses_timestamp_name() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let before = Utc::now().timestamp();
        let (res, reply) = run(&rx, post("", &encode_chunks(&[b"frames"])));
        let after = Utc::now().timestamp();
        res.unwrap();

        let stored = (before..=after)
            .map(|ts| format!("video_{}.mp4", ts))
            .find(|name| dir.path().join(name).exists())
            .expect("no timestamped file written");
        assert!(reply.ends_with(&format!("saved as {}", stored)));
    }

    #[test]
    fn disposition_without_filename_uses_fallback() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, reply) = run(
            &rx,
            post("Content-Disposition: attachment\r\n", &encode_chunks(&[b"x"])),
        );
        res.unwrap();
        assert!(reply.ends_with("saved as output_file"));
        assert_eq!(fs::read(dir.path().join("output_file")).unwrap(), b"x");
    }

    #[test]
    fn same_name_overwrites_previous_upload() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let header = "Content-Disposition: attachment; filename=same.mp4\r\n";
        run(&rx, post(header, &encode_chunks(&[b"a much longer first upload"]))).0.unwrap();
        run(&rx, post(header, &encode_chunks(&[b"short"]))).0.unwrap();
        assert_eq!(fs::read(dir.path().join("same.mp4")).unwrap(), b"short");
    }

    #[test]
    fn get_is_answered_without_touching_the_directory() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, reply) = run(
            &rx,
            Cursor::new(b"GET /anything?x=1 HTTP/1.1\r\nHost: cam\r\n\r\n".to_vec()),
        );
        res.unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("GET request for /anything?x=1"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn other_methods_are_not_implemented() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, reply) = run(&rx, Cursor::new(b"PUT /x HTTP/1.1\r\n\r\n".to_vec()));
        res.unwrap();
        assert!(reply.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert!(reply.contains("Unsupported method (&#39;PUT&#39;)"));
    }

    #[test]
    fn errors_are_reported_when_enabled() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.report_upload_errors = true;
        let rx = receiver(&cfg);
        let (res, reply) = run(&rx, post("", b"nothex\r\n"));
        assert!(res.is_err());
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(reply.contains("<h1>400 Bad Request</h1>"));
    }

    #[test]
    fn size_and_chunk_limits_apply() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.upload_size_limit = Some(8);
        cfg.report_upload_errors = true;
        let rx = receiver(&cfg);
        let (res, reply) = run(
            &rx,
            post(
                "Content-Disposition: attachment; filename=big.mp4\r\n",
                &encode_chunks(&[b"12345", b"67890"]),
            ),
        );
        assert!(matches!(res, Err(UploadError::TooLarge { limit: 8 })));
        assert!(reply.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert_eq!(fs::read(dir.path().join("big.mp4")).unwrap(), b"12345");

        let mut cfg = config(dir.path());
        cfg.max_chunk_size = Some(4);
        let rx = receiver(&cfg);
        let (res, _) = run(&rx, post("", &encode_chunks(&[b"12345"])));
        assert!(matches!(
            res,
            Err(UploadError::Decode(ChunkError::ChunkTooLarge { size: 5, limit: 4 }))
        ));
    }

    #[test]
    fn continue_is_sent_before_final_response() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, reply) = run(
            &rx,
            post(
                "Expect: 100-continue\r\nContent-Disposition: attachment; filename=c.mp4\r\n",
                &encode_chunks(&[b"ok"]),
            ),
        );
        res.unwrap();
        assert!(reply.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn bad_head_gets_error_page() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let (res, reply) = run(&rx, Cursor::new(b"GET / HTTP/3\r\n\r\n".to_vec()));
        assert!(matches!(res, Err(UploadError::Head(_))));
        assert!(reply.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));
    }

    /// Hands out at most one byte per read.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = buf.len().min(1);
            self.0.read(&mut buf[..end])
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let input = post(
            "Content-Disposition: attachment; filename=slow.mkv\r\n",
            &encode_chunks(&[&payload[..1000], &payload[1000..]]),
        );
        let mut out = Vec::new();
        rx.handle(Trickle(input), &mut out).unwrap();
        assert_eq!(fs::read(dir.path().join("slow.mkv")).unwrap(), payload);
    }

    #[test]
    fn upload_over_a_real_socket() {
        use crate::http::{shutdown_pipe, Endpoint};
        use std::thread;

        let dir = tempdir().unwrap();
        let rx = receiver(&config(dir.path()));
        let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap(), rx, None).unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (trigger, signal) = shutdown_pipe().unwrap();
        let handle = thread::spawn(move || endpoint.run(signal));

        let mut client = TcpStream::connect(addr).unwrap();
        let mut wire = post(
            "Content-Disposition: form-data; filename=\"net.mp4\"\r\n",
            &encode_chunks(&[b"over ", b"the wire"]),
        )
        .into_inner();
        client.write_all(&wire).unwrap();
        wire.clear();
        client.read_to_end(&mut wire).unwrap();
        let reply = String::from_utf8(wire).unwrap();
        assert!(reply.ends_with("saved as net.mp4"));
        assert_eq!(fs::read(dir.path().join("net.mp4")).unwrap(), b"over the wire");

        trigger.trigger();
        handle.join().unwrap().unwrap();
    }
}
