//! Runtime configuration for a [`crate::Stack`] instance. Deliberately
//! narrow: the facade only needs enough to bind a transport and build a
//! local `Contact`; everything else (timers, retransmission backoff) is the
//! transaction layer's own default (Section 4.2.7).

use std::net::SocketAddr;
use std::time::Duration;

use uasip_sip_transport::factory::TransportType;
use uasip_sip_types::Uri;

#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Local address to bind the primary transport to.
    pub bind_addr: SocketAddr,
    /// Which transport to bind (Section 4.1).
    pub transport: TransportType,
    /// User part of the local `Contact`/`From` URI, e.g. `"alice"` for
    /// `sip:alice@<bind_addr>`.
    pub contact_user: String,
    /// How often the transaction-table sweeper runs (Section 5: "one tick
    /// per ~30s").
    pub sweeper_interval: Duration,
}

impl StackConfig {
    pub fn new(bind_addr: SocketAddr, contact_user: impl Into<String>) -> Self {
        StackConfig {
            bind_addr,
            transport: TransportType::Udp,
            contact_user: contact_user.into(),
            sweeper_interval: Duration::from_secs(30),
        }
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_sweeper_interval(mut self, interval: Duration) -> Self {
        self.sweeper_interval = interval;
        self
    }

    /// The local `Contact`/`From` URI this configuration implies, bound to
    /// whatever address the transport actually ends up on (which may differ
    /// from `bind_addr` if it specified port 0).
    pub fn contact_uri(&self, bound_addr: SocketAddr) -> Uri {
        Uri::sip(format!("{}@{bound_addr}", self.contact_user))
    }
}
