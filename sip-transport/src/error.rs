//! Transport-layer errors (Section 4.1).

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("destination could not be resolved: {0}")]
    Unresolved(String),

    #[error("connect to {0} failed: {1}")]
    ConnectFailed(SocketAddr, #[source] io::Error),

    #[error("write to {0} failed: {1}")]
    WriteFailed(SocketAddr, #[source] io::Error),

    #[error("transport is closed")]
    TransportClosed,

    #[error("message exceeds maximum transport payload size")]
    TooLarge,

    #[error("stream transport requires Content-Length on every message")]
    MissingContentLength,

    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("message framing error: {0}")]
    Framing(#[from] uasip_sip_types::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
