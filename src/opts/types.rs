use clap::Parser;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Parser, Clone, Debug)]
#[clap(
    version,
    author = "James Houghton <jamesthoughton@gmail.com>",
    about = "Receives chunked video uploads and serves a listing of them"
)]
pub struct Opts {
    #[clap(
        short,
        long,
        default_value = "static/uploads",
        help = "Directory uploads are written to and listed from. Created if missing."
    )]
    pub directory: String,
    #[clap(short, long, default_value = "5000", help = "Port of the raw upload endpoint")]
    pub port: u16,
    #[clap(
        short = 'l',
        long = "listing-port",
        default_value = "5001",
        help = "Port of the listing and notification endpoint"
    )]
    pub listing_port: u16,
    #[clap(short = 'm', long, default_value = "0.0.0.0")]
    pub hostmask: String,
    #[clap(
        long = "read-timeout",
        default_value = "0",
        help = "In seconds, how long a connection may go without sending data before it is \
                dropped. Specify 0 for no limit."
    )]
    pub read_timeout: u64,
    #[clap(
        long = "max-chunk-size",
        default_value = "0",
        help = "Largest accepted chunk in bytes. Specify 0 for no limit."
    )]
    pub max_chunk_size: u64,
    #[clap(
        long = "upload-size-limit",
        default_value = "0",
        help = "Uploaded file size limit in bytes. Specify 0 for no limit."
    )]
    pub size_limit: u64,
    #[clap(
        long = "sanitize-filenames",
        help = "Keep only the last path component of client-supplied filenames"
    )]
    pub sanitize_filenames: bool,
    #[clap(
        long = "report-upload-errors",
        help = "Send an error page before closing a failed upload instead of just dropping the \
                connection"
    )]
    pub report_upload_errors: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid hostmask {0:?}")]
    InvalidHostmask(String),

    #[error("upload and listing endpoints cannot share port {0}")]
    PortClash(u16),
}

/// Settings fixed at startup and handed to each service when it is built.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub upload_dir: PathBuf,
    pub upload_addr: SocketAddr,
    pub listing_addr: SocketAddr,
    pub read_timeout: Option<Duration>,
    pub max_chunk_size: Option<u64>,
    pub upload_size_limit: Option<u64>,
    pub sanitize_filenames: bool,
    pub report_upload_errors: bool,
}

fn nonzero(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

impl ServerConfig {
    pub fn from_opts(opts: &Opts) -> Result<ServerConfig, ConfigError> {
        let ip: IpAddr = opts
            .hostmask
            .parse()
            .map_err(|_| ConfigError::InvalidHostmask(opts.hostmask.clone()))?;

        // Port 0 asks the OS for a free port, so two of them never clash
        if opts.port == opts.listing_port && opts.port != 0 {
            return Err(ConfigError::PortClash(opts.port));
        }

        Ok(ServerConfig {
            upload_dir: PathBuf::from(&opts.directory),
            upload_addr: SocketAddr::new(ip, opts.port),
            listing_addr: SocketAddr::new(ip, opts.listing_port),
            read_timeout: nonzero(opts.read_timeout).map(Duration::from_secs),
            max_chunk_size: nonzero(opts.max_chunk_size),
            upload_size_limit: nonzero(opts.size_limit),
            sanitize_filenames: opts.sanitize_filenames,
            report_upload_errors: opts.report_upload_errors,
        })
    }
}
