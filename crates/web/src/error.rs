use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures of the socket driver. Request level problems never surface here.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("no address to listen on")]
    MissingAddress,

    #[error("failed to bind {addresses:?}: {source}")]
    Bind {
        addresses: Vec<SocketAddr>,
        #[source]
        source: io::Error,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}
