pub mod body;
mod boyer_moore;
pub mod chunked;
pub mod http_core;
pub mod listing;
pub mod notify;
pub mod rendering;
pub mod types;
pub mod upload;

use std::error::Error;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::select::{select, FdSet};
use nix::unistd;
use tracing::{debug, info, warn};

use types::ServerError;

/// What one listening socket speaks. Every accepted connection is passed to
/// `serve` on a thread of its own and closed once `serve` returns.
pub trait Service: Send + Sync + 'static {
    type Error: Error + Send + 'static;

    fn name(&self) -> &'static str;

    fn serve(&self, stream: &TcpStream) -> Result<(), Self::Error>;
}

struct PipeEnd(RawFd);

impl Drop for PipeEnd {
    fn drop(&mut self) { let _ = unistd::close(self.0); }
}

/// Write end of the shutdown pipe. Triggering (or dropping) it closes the
/// pipe, which every endpoint watching the read end sees as end-of-file.
pub struct ShutdownTrigger {
    _write_end: PipeEnd,
}

impl ShutdownTrigger {
    pub fn trigger(self) {}
}

#[derive(Clone)]
pub struct ShutdownSignal {
    read_end: Arc<PipeEnd>,
}

pub fn shutdown_pipe() -> Result<(ShutdownTrigger, ShutdownSignal), ServerError> {
    let (read_fd, write_fd) = unistd::pipe().map_err(ServerError::Pipe)?;
    Ok((
        ShutdownTrigger {
            _write_end: PipeEnd(write_fd),
        },
        ShutdownSignal {
            read_end: Arc::new(PipeEnd(read_fd)),
        },
    ))
}

pub struct Endpoint<S: Service> {
    listener: TcpListener,
    service: Arc<S>,
    read_timeout: Option<Duration>,
}

impl<S: Service> Endpoint<S> {
    pub fn bind(
        addr: SocketAddr,
        service: S,
        read_timeout: Option<Duration>,
    ) -> Result<Endpoint<S>, ServerError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Endpoint {
            listener,
            service: Arc::new(service),
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    pub fn name(&self) -> &'static str { self.service.name() }

    /// Accepts connections until `shutdown` fires. Connections already handed
    /// to a worker are left to finish on their own.
    pub fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let l_raw_fd = self.listener.as_raw_fd();
        let pipe_read = shutdown.read_end.0;
        info!(
            service = self.service.name(),
            addr = %self.local_addr()?,
            "listening"
        );

        'main: loop {
            let mut r_fds = FdSet::new();
            r_fds.insert(l_raw_fd);
            r_fds.insert(pipe_read);

            match select(None, Some(&mut r_fds), None, None, None) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ServerError::Select(e)),
            }

            if r_fds.contains(pipe_read) {
                let mut buf: [u8; 1] = [0; 1];
                match unistd::read(pipe_read, &mut buf[..]) {
                    // Any byte is just a wakeup; EOF means stop
                    Ok(size) if size > 0 => {}
                    _ => break 'main,
                }
            }

            if r_fds.contains(l_raw_fd) {
                match self.listener.accept() {
                    Ok((stream, peer)) => self.spawn_worker(stream, peer)?,
                    Err(e) => warn!(service = self.service.name(), error = %e, "accept failed"),
                }
            }
        }

        info!(service = self.service.name(), "stopped accepting connections");
        Ok(())
    }

    fn spawn_worker(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        let service = Arc::clone(&self.service);
        let read_timeout = self.read_timeout;
        debug!(service = service.name(), peer = %peer, "accepted connection");

        thread::Builder::new()
            .name(format!("{}-{}", service.name(), peer))
            .spawn(move || {
                if let Err(e) = stream.set_read_timeout(read_timeout) {
                    warn!(peer = %peer, error = %e, "could not set read timeout");
                    return;
                }
                match service.serve(&stream) {
                    Ok(()) => debug!(service = service.name(), peer = %peer, "connection done"),
                    Err(ref e) if is_disconnect(e) => {
                        debug!(service = service.name(), peer = %peer, error = %e, "peer went away")
                    }
                    Err(e) => info!(
                        service = service.name(),
                        peer = %peer,
                        error = %e,
                        "connection terminated"
                    ),
                }
            })
            .map(|_| ())
            .map_err(ServerError::Spawn)
    }
}

/// Broken pipes and resets are the peer hanging up, not a server fault.
fn is_disconnect(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            );
        }
        current = e.source();
    }
    false
}
