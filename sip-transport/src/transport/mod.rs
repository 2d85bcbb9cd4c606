//! Transport trait and the event types transports report upward.

pub mod tcp;
pub mod tls;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use uasip_sip_types::Message;

use crate::error::Result;

/// A framed network transport for SIP messages (Section 4.1).
///
/// Implementations own whatever connection state they need; the transaction
/// layer only ever sees `send_message`/events, never raw sockets.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn local_addr(&self) -> Result<SocketAddr>;

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// True if this transport needs no application-level retransmission
    /// timers (TCP, TLS). UDP is unreliable and defaults to `false`.
    fn reliable(&self) -> bool {
        false
    }
}

/// Events a transport pushes upward: received messages, parse/IO errors, and
/// its own lifecycle.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
    },
    /// A stream connection was established, inbound or outbound.
    ConnectionOpened { peer: SocketAddr },
    /// A stream connection closed, by the peer or by idle timeout.
    ConnectionClosed { peer: SocketAddr },
    Error {
        error: String,
    },
    Closed,
}
