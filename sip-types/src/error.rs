//! Error types for sip-types
//!
//! The parser/builder in this crate is deliberately small: the dialog and
//! transaction layers treat message syntax as an external concern and only
//! need a structured value to read and write. Malformed input is reported
//! through this error so callers can drop the message per RFC 3261 (no
//! response is sent to a request the core cannot parse).

use thiserror::Error;

/// Errors produced while parsing or building a [`crate::Message`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed header {name}: {reason}")]
    MalformedHeader { name: String, reason: String },

    #[error("malformed URI: {0}")]
    MalformedUri(String),

    #[error("message exceeds maximum size")]
    TooLarge,

    #[error("incomplete message")]
    Incomplete,
}

pub type Result<T> = std::result::Result<T, Error>;
