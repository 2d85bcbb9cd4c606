//! Constructs individual transports by type without the bookkeeping
//! [`crate::manager::TransportManager`] adds on top.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::tcp::TcpTransport;
use crate::transport::udp::UdpTransport;
use crate::transport::{Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Udp,
    Tcp,
    Tls,
}

impl TransportType {
    /// TCP and TLS are reliable; UDP is not (Section 4.1).
    pub fn reliable(&self) -> bool {
        matches!(self, TransportType::Tcp | TransportType::Tls)
    }
}

pub struct TransportFactory;

impl TransportFactory {
    /// Creates and binds a transport of the given type. TLS is not
    /// available here since it requires certificate material; build it
    /// directly with [`crate::transport::tls::TlsTransport::bind`].
    pub async fn create(
        kind: TransportType,
        bind_addr: SocketAddr,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
        match kind {
            TransportType::Udp => {
                let (transport, rx) = UdpTransport::bind(bind_addr, None).await?;
                Ok((Arc::new(transport), rx))
            }
            TransportType::Tcp => {
                let (transport, rx) = TcpTransport::bind(bind_addr, None, None).await?;
                Ok((Arc::new(transport), rx))
            }
            TransportType::Tls => Err(Error::UnsupportedTransport(
                "TLS transport requires certificate configuration; use TlsTransport::bind".into(),
            )),
        }
    }
}
