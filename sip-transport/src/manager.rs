//! Registers the transports a stack actually has bound and dispatches sends
//! across them.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uasip_sip_types::Message;

use crate::error::{Error, Result};
use crate::factory::TransportType;
use crate::transport::tcp::TcpTransport;
use crate::transport::udp::UdpTransport;
use crate::transport::{Transport, TransportEvent};

/// Owns one transport per [`TransportType`] and forwards all of their events
/// onto a single shared channel.
pub struct TransportManager {
    transports: DashMap<TransportType, Arc<dyn Transport>>,
    default: RwLock<Option<TransportType>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TransportManager {
    pub async fn with_defaults() -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(256);
        Ok((
            TransportManager {
                transports: DashMap::new(),
                default: RwLock::new(None),
                events_tx,
            },
            events_rx,
        ))
    }

    /// Binds a new transport of `kind` and registers it. Returns the bound
    /// local address.
    pub async fn create_transport(&self, kind: TransportType, bind_addr: SocketAddr) -> Result<SocketAddr> {
        let (transport, local_addr): (Arc<dyn Transport>, SocketAddr) = match kind {
            TransportType::Udp => {
                let (transport, rx) = UdpTransport::bind(bind_addr, None).await?;
                let addr = transport.local_addr()?;
                self.forward_events(rx);
                (Arc::new(transport), addr)
            }
            TransportType::Tcp => {
                let (transport, rx) = TcpTransport::bind(bind_addr, None, None).await?;
                let addr = transport.local_addr()?;
                self.forward_events(rx);
                (Arc::new(transport), addr)
            }
            TransportType::Tls => {
                return Err(Error::UnsupportedTransport(
                    "TLS transport requires certificate configuration; register it with add_transport".into(),
                ));
            }
        };

        self.transports.insert(kind, transport);
        *self.default.write() = Some(kind);
        Ok(local_addr)
    }

    /// Registers an already-bound transport (used for TLS, which needs
    /// certificate material the manager doesn't own).
    pub fn add_transport(&self, kind: TransportType, transport: Arc<dyn Transport>, events_rx: mpsc::Receiver<TransportEvent>) {
        self.forward_events(events_rx);
        self.transports.insert(kind, transport);
        *self.default.write() = Some(kind);
    }

    fn forward_events(&self, mut rx: mpsc::Receiver<TransportEvent>) {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if events_tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Sends through the most recently created transport. Stacks that run
    /// more than one transport type concurrently should prefer
    /// [`Self::send_via`] instead.
    pub async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        let kind = (*self.default.read()).ok_or(Error::TransportClosed)?;
        self.send_via(kind, message, destination).await
    }

    pub async fn send_via(&self, kind: TransportType, message: Message, destination: SocketAddr) -> Result<()> {
        let transport = self
            .transports
            .get(&kind)
            .ok_or_else(|| Error::UnsupportedTransport(format!("{kind:?} not registered")))?
            .clone();
        transport.send_message(message, destination).await
    }

    pub fn transport(&self, kind: TransportType) -> Option<Arc<dyn Transport>> {
        self.transports.get(&kind).map(|entry| entry.clone())
    }

    pub async fn close_all(&self) -> Result<()> {
        for entry in self.transports.iter() {
            entry.value().close().await?;
        }
        Ok(())
    }
}
