mod listener;
mod sender;

pub use listener::UdpListener;
pub use sender::UdpSender;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use uasip_sip_types::Message;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// UDP transport for SIP messages. Unreliable: the transaction layer is
/// responsible for retransmission (Section 4.1).
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    sender: UdpSender,
    listener: Arc<UdpListener>,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl UdpTransport {
    /// Binds a UDP socket and starts its receive loop.
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let listener = UdpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let sender = UdpSender::new(listener.clone_socket())?;

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                sender,
                listener: Arc::new(listener),
                closed: AtomicBool::new(false),
                events_tx: events_tx.clone(),
            }),
        };

        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    /// A closed dummy transport, for tests that need a `Transport` value but
    /// never send through it.
    #[cfg(test)]
    pub fn default() -> Self {
        let (events_tx, _) = mpsc::channel(1);
        let listener = UdpListener::default();
        let sender = UdpSender::default();

        UdpTransport {
            inner: Arc::new(UdpTransportInner {
                sender,
                listener: Arc::new(listener),
                closed: AtomicBool::new(true),
                events_tx,
            }),
        }
    }

    fn spawn_receive_loop(&self) {
        let transport = self.clone();

        tokio::spawn(async move {
            let inner = &transport.inner;
            let listener = inner.listener.clone();

            while !inner.closed.load(Ordering::Relaxed) {
                match listener.receive().await {
                    Ok((packet, src, local_addr)) => {
                        debug!("Received {} byte datagram from {}", packet.len(), src);

                        match Message::parse(&packet) {
                            Ok((message, _consumed)) => {
                                let event = TransportEvent::MessageReceived {
                                    message,
                                    source: src,
                                    destination: local_addr,
                                };
                                if let Err(e) = inner.events_tx.send(event).await {
                                    error!("Error delivering transport event: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                // Malformed datagrams are dropped, never answered (Section 4.1).
                                warn!("Dropping unparsable datagram from {}: {}", src, e);
                                let _ = inner
                                    .events_tx
                                    .send(TransportEvent::Error {
                                        error: format!("parse error from {src}: {e}"),
                                    })
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("Error receiving UDP datagram: {}", e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("receive error: {e}"),
                            })
                            .await;
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.listener.local_addr()
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let bytes = message.to_bytes();
        debug!("Sending {} byte message to {}", bytes.len(), destination);

        self.inner.sender.send(&bytes, destination).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn reliable(&self) -> bool {
        false
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.listener.local_addr() {
            Ok(addr) => write!(f, "UdpTransport({addr})"),
            Err(_) => write!(f, "UdpTransport(<closed>)"),
        }
    }
}
