//! SIP transport layer: UDP, TCP, and TLS framing and connection
//! management (Section 4.1). Reads/writes [`uasip_sip_types::Message`]
//! values; syntax is the types crate's concern, not this one's.

pub mod error;
pub mod events;
pub mod factory;
pub mod manager;
pub mod transport;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
pub use transport::tcp::TcpTransport;
pub use transport::tls::TlsTransport;
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Binds a UDP transport with the default event channel capacity.
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Binds a TCP transport with default channel capacity and idle timeout.
pub async fn bind_tcp(
    addr: std::net::SocketAddr,
) -> Result<(TcpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    TcpTransport::bind(addr, None, None).await
}

pub mod prelude {
    pub use crate::{
        bind_tcp, bind_udp, events::TransportEventAdapter, factory::TransportFactory,
        manager::TransportManager, Error, Result, TcpTransport, TlsTransport, Transport,
        TransportEvent, UdpTransport,
    };
}
