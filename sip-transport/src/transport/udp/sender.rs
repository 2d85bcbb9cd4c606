use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};

/// Sends datagrams through a socket shared with [`super::UdpListener`].
#[derive(Debug, Clone)]
pub struct UdpSender {
    socket: Arc<UdpSocket>,
}

impl UdpSender {
    pub fn new(socket: Arc<UdpSocket>) -> Result<Self> {
        Ok(UdpSender { socket })
    }

    pub async fn send(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        if bytes.len() > uasip_sip_types::MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge);
        }
        self.socket
            .send_to(bytes, destination)
            .await
            .map_err(|e| Error::WriteFailed(destination, e))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn default() -> Self {
        let std_socket =
            std::net::UdpSocket::bind("127.0.0.1:0").expect("bind dummy udp socket");
        std_socket
            .set_nonblocking(true)
            .expect("set dummy socket nonblocking");
        let socket = UdpSocket::from_std(std_socket).expect("adopt dummy socket into tokio");
        UdpSender {
            socket: Arc::new(socket),
        }
    }
}
