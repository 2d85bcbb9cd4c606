//! TLS transport: reuses TCP's CRLF/Content-Length framing over a
//! `rustls`-encrypted stream (Section 4.1, reliable transports).

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rustls::pki_types::ServerName;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::{debug, error, info, warn};

use uasip_sip_types::Message;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const READ_CHUNK: usize = 8192;

type TlsTcpStream = TlsStream<TcpStream>;

struct PooledConnection {
    writer: AsyncMutex<WriteHalf<TlsTcpStream>>,
    last_used: std::sync::Mutex<Instant>,
}

impl PooledConnection {
    fn new(writer: WriteHalf<TlsTcpStream>) -> Self {
        PooledConnection {
            writer: AsyncMutex::new(writer),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().unwrap().elapsed()
    }
}

/// TLS transport. Built with an acceptor (for inbound connections), a
/// connector (for outbound), or both.
#[derive(Clone)]
pub struct TlsTransport {
    inner: Arc<TlsTransportInner>,
}

struct TlsTransportInner {
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    connector: Option<TlsConnector>,
    connections: DashMap<SocketAddr, Arc<PooledConnection>>,
    events_tx: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
    idle_timeout: Duration,
}

impl TlsTransport {
    pub async fn bind(
        addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        connector: Option<TlsConnector>,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("SIP TLS transport bound to {}", local_addr);

        let transport = TlsTransport {
            inner: Arc::new(TlsTransportInner {
                local_addr,
                acceptor: acceptor.clone(),
                connector,
                connections: DashMap::new(),
                events_tx,
                closed: AtomicBool::new(false),
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
            }),
        };

        if acceptor.is_some() {
            transport.spawn_accept_loop(listener);
        }
        transport.spawn_idle_sweeper();

        Ok((transport, events_rx))
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                if transport.inner.closed.load(Ordering::Relaxed) {
                    break;
                }
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if transport.inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("Error accepting TCP connection for TLS: {}", e);
                        continue;
                    }
                };

                let acceptor = transport
                    .inner
                    .acceptor
                    .clone()
                    .expect("accept loop only runs when an acceptor is configured");
                let transport = transport.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            transport.adopt_stream(TlsStream::Server(tls_stream), peer);
                        }
                        Err(e) => {
                            warn!("TLS handshake with {} failed: {}", peer, e);
                        }
                    }
                });
            }
        });
    }

    fn spawn_idle_sweeper(&self) {
        let transport = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if transport.inner.closed.load(Ordering::Relaxed) {
                    break;
                }
                let idle_timeout = transport.inner.idle_timeout;
                let stale: Vec<SocketAddr> = transport
                    .inner
                    .connections
                    .iter()
                    .filter(|entry| entry.value().idle_for() > idle_timeout)
                    .map(|entry| *entry.key())
                    .collect();
                for peer in stale {
                    transport.inner.connections.remove(&peer);
                    let _ = transport
                        .inner
                        .events_tx
                        .send(TransportEvent::ConnectionClosed { peer })
                        .await;
                }
            }
        });
    }

    fn adopt_stream(&self, stream: TlsTcpStream, peer: SocketAddr) {
        let (read_half, write_half) = split(stream);
        self.inner
            .connections
            .insert(peer, Arc::new(PooledConnection::new(write_half)));

        let events_tx = self.inner.events_tx.clone();
        tokio::spawn(async move {
            let _ = events_tx.send(TransportEvent::ConnectionOpened { peer }).await;
        });

        let transport = self.clone();
        tokio::spawn(async move { transport.read_loop(read_half, peer).await });
    }

    async fn get_or_connect(&self, destination: SocketAddr, host: &str) -> Result<Arc<PooledConnection>> {
        if let Some(conn) = self.inner.connections.get(&destination) {
            return Ok(conn.clone());
        }

        let connector = self
            .inner
            .connector
            .clone()
            .ok_or_else(|| Error::Tls("no TLS connector configured for outbound connections".into()))?;

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name {host}: {e}")))?;

        let tcp_stream = TcpStream::connect(destination)
            .await
            .map_err(|e| Error::ConnectFailed(destination, e))?;
        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake with {destination} failed: {e}")))?;

        let (read_half, write_half) = split(TlsStream::Client(tls_stream));
        let conn = Arc::new(PooledConnection::new(write_half));
        self.inner.connections.insert(destination, conn.clone());

        let _ = self
            .inner
            .events_tx
            .send(TransportEvent::ConnectionOpened { peer: destination })
            .await;

        let transport = self.clone();
        tokio::spawn(async move { transport.read_loop(read_half, destination).await });

        Ok(conn)
    }

    async fn read_loop(self, mut read_half: ReadHalf<TlsTcpStream>, peer: SocketAddr) {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            match read_half.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if !self.drain_messages(&mut buf, peer).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Error reading TLS stream from {}: {}", peer, e);
                    break;
                }
            }
        }

        self.inner.connections.remove(&peer);
        let _ = self
            .inner
            .events_tx
            .send(TransportEvent::ConnectionClosed { peer })
            .await;
    }

    async fn drain_messages(&self, buf: &mut Vec<u8>, peer: SocketAddr) -> bool {
        loop {
            match Message::parse(buf) {
                Ok((message, consumed)) => {
                    buf.drain(..consumed);
                    if let Some(conn) = self.inner.connections.get(&peer) {
                        conn.touch();
                    }
                    let event = TransportEvent::MessageReceived {
                        message,
                        source: peer,
                        destination: self.inner.local_addr,
                    };
                    if self.inner.events_tx.send(event).await.is_err() {
                        return false;
                    }
                }
                Err(uasip_sip_types::Error::Incomplete) => return true,
                Err(e) => {
                    warn!("Dropping TLS connection to {} after framing error: {}", peer, e);
                    let _ = self
                        .inner
                        .events_tx
                        .send(TransportEvent::Error {
                            error: format!("framing error from {peer}: {e}"),
                        })
                        .await;
                    return false;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for TlsTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }

        let bytes = message.to_bytes();
        // SNI falls back to the resolved IP; callers that need certificate
        // validation against a hostname should connect with that name already
        // resolved to `destination` before calling send_message.
        let conn = self.get_or_connect(destination, &destination.ip().to_string()).await?;
        {
            let mut writer = conn.writer.lock().await;
            writer
                .write_all(&bytes)
                .await
                .map_err(|e| Error::WriteFailed(destination, e))?;
        }
        conn.touch();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.connections.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn reliable(&self) -> bool {
        true
    }
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlsTransport({})", self.inner.local_addr)
    }
}
