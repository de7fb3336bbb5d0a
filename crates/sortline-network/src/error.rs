use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while bringing a transport up.
///
/// Once running, transports never return errors to callers: failed sends
/// are reported as `false` and read failures are logged.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind a listening socket
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
