use std::io;
use std::net::SocketAddr;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("select failed: {0}")]
    Select(#[source] Errno),

    #[error("could not create shutdown pipe: {0}")]
    Pipe(#[source] Errno),

    #[error("could not spawn connection worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}
