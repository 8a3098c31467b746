use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Socket(#[from] anyhow::Error),
    #[error("traversal to {target} failed")]
    TraversalFailed { target: SocketAddr },
    #[error("relay target {target} unreachable")]
    RelayConnectFailed {
        target: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;
