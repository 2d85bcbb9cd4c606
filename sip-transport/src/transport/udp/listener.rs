use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::Result;

/// Owns the bound UDP socket. The sender half clones the same `Arc` so both
/// sides share one underlying file descriptor.
#[derive(Debug)]
pub struct UdpListener {
    socket: Arc<UdpSocket>,
}

impl UdpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpListener {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn clone_socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Receive one datagram. Returns the payload, the peer address, and this
    /// listener's local address (one datagram is one message, Section 4.1).
    pub async fn receive(&self) -> Result<(Vec<u8>, SocketAddr, SocketAddr)> {
        let mut buf = vec![0u8; uasip_sip_types::MAX_MESSAGE_SIZE];
        let (len, src) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        let local = self.socket.local_addr()?;
        Ok((buf, src, local))
    }

    /// A closed, never-bound-for-traffic listener backing `UdpTransport::default()`.
    #[cfg(test)]
    pub fn default() -> Self {
        let std_socket =
            std::net::UdpSocket::bind("127.0.0.1:0").expect("bind dummy udp socket");
        std_socket
            .set_nonblocking(true)
            .expect("set dummy socket nonblocking");
        let socket = UdpSocket::from_std(std_socket).expect("adopt dummy socket into tokio");
        UdpListener {
            socket: Arc::new(socket),
        }
    }
}

