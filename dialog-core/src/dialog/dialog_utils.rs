//! Small helpers shared by the dialog and transaction layers: URI
//! extraction, address resolution, and tag/branch generation.

use std::net::SocketAddr;

use rand::Rng;
use uasip_sip_types::{NameAddr, Uri};

use crate::errors::{DialogError, DialogResult};

pub fn extract_uri_from_contact(contact: &NameAddr) -> DialogResult<Uri> {
    Ok(contact.uri.clone())
}

/// Resolves a URI's host:port to a socket address. Literal IPs resolve
/// immediately; hostnames go through the system resolver via
/// `tokio::net::lookup_host`. Returns `None` rather than erroring since
/// callers treat this as best-effort (Section 4.1: the transport layer owns
/// hard resolution failures).
pub async fn resolve_uri_to_socketaddr(uri: &Uri) -> Option<SocketAddr> {
    let port = uri.port.unwrap_or(5060);
    let host_port = format!("{}:{port}", uri.host);

    if let Ok(addr) = host_port.parse::<SocketAddr>() {
        return Some(addr);
    }

    tokio::net::lookup_host(host_port).await.ok()?.next()
}

/// A random 31-bit initial CSeq value (Section 9: "initial local CSeq
/// should be a random 31-bit value; subsequent values increment by one").
pub fn generate_initial_cseq() -> u32 {
    rand::thread_rng().gen_range(0..(1u32 << 31))
}

/// A random 32-bit hex tag, used for `From`/`To` tags.
pub fn generate_tag() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08x}", rng.gen::<u32>())
}

/// A RFC 3261 `z9hG4bK`-prefixed branch parameter, globally unique per
/// transaction (Section 4.2.1).
pub fn generate_branch() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16)
        .map(|_| {
            let c = rng.gen_range(0..36);
            std::char::from_digit(c, 36).unwrap()
        })
        .collect();
    format!("z9hG4bK-{suffix}")
}

/// Reject a branch that doesn't carry the RFC 3261 magic cookie. The spec's
/// non-goals exclude supporting legacy (RFC 2543) branch matching.
pub fn is_rfc3261_branch(branch: &str) -> bool {
    branch.starts_with("z9hG4bK")
}

pub fn require_header<T>(opt: Option<T>, name: &'static str) -> DialogResult<T> {
    opt.ok_or_else(|| DialogError::invalid_message(format!("missing required header: {name}")))
}
