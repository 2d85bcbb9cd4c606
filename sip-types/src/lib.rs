//! Minimal SIP message types: URIs, methods, status codes, headers, and
//! request/response framing.
//!
//! This crate deliberately does not implement a complete RFC 3261 grammar.
//! The transaction and dialog layers built on top of it treat message syntax
//! as an external concern: a message either parses into the fields those
//! layers need, or it is dropped. Full grammar conformance (escaping rules,
//! every header production, SDP) is out of scope here.

pub mod error;
pub mod headers;
pub mod message;
pub mod method;
pub mod status;
pub mod uri;

pub use error::{Error, Result};
pub use headers::{CSeq, HeaderName, NameAddr, TypedHeader, Via};
pub use message::{Message, Request, Response, MAX_MESSAGE_SIZE};
pub use method::Method;
pub use status::StatusCode;
pub use uri::Uri;

/// Common imports for crates built on top of `sip-types`.
pub mod prelude {
    pub use crate::{
        CSeq, Error, HeaderName, Message, Method, NameAddr, Request, Response, Result,
        StatusCode, TypedHeader, Uri, Via,
    };
}
