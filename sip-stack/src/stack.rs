//! [`Stack`]: the top-level facade (Section 6) that wires the transport,
//! transaction, and dialog layers together. A TU talks to this and to the
//! [`crate::DialogHandle`]s it hands out; it never touches
//! `uasip_dialog_core`/`uasip_sip_transport` directly.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use uasip_dialog_core::{DialogEvent, DialogId, DialogManager, DialogState, TransactionManager};
use uasip_sip_transport::factory::TransportType;
use uasip_sip_transport::manager::TransportManager;
use uasip_sip_transport::transport::{Transport, TransportEvent};
use uasip_sip_types::{Message, Method, Request, Response, Uri};

use crate::config::StackConfig;
use crate::dialog_handle::DialogHandle;
use crate::error::{StackError, StackResult};

/// An out-of-dialog request handler (Section 6: `OnRequest`). Synchronous
/// and non-fallible by design: anything that needs to suspend or fail
/// belongs in dialog/transaction logic instead, which this hook never sees
/// (INVITE, CANCEL, and all in-dialog methods are routed to the dialog
/// layer before a handler registered here is consulted).
type RequestHandler = Arc<dyn Fn(Request) -> Response + Send + Sync>;

pub struct Stack {
    config: StackConfig,
    transport: Arc<TransportManager>,
    dialogs: Arc<DialogManager>,
    transactions: Arc<TransactionManager>,
    local_uri: Uri,
    request_handlers: DashMap<Method, RequestHandler>,
    state_channels: DashMap<DialogId, broadcast::Sender<DialogState>>,
    body_channels: DashMap<DialogId, broadcast::Sender<Vec<u8>>>,
    destinations: DashMap<DialogId, SocketAddr>,
    incoming_tx: mpsc::Sender<DialogHandle>,
}

impl Stack {
    /// Binds the configured transport and starts the background tasks that
    /// drive it (Section 6: `Stack.Start`). Returns the stack handle plus
    /// the channel of incoming dialogs a TU consumes in place of
    /// `OnIncomingDialog`.
    pub async fn start(config: StackConfig) -> StackResult<(Arc<Stack>, mpsc::Receiver<DialogHandle>)> {
        let (transport_manager, transport_events) = TransportManager::with_defaults().await?;
        let transport_manager = Arc::new(transport_manager);
        let bound_addr = transport_manager.create_transport(config.transport, config.bind_addr).await?;
        let local_uri = config.contact_uri(bound_addr);

        let transactions = TransactionManager::new();
        transactions.spawn_sweeper(config.sweeper_interval);

        let (dialogs, dialog_events) = DialogManager::new(transactions.clone(), local_uri.clone());

        let (incoming_tx, incoming_rx) = mpsc::channel(32);

        let stack = Arc::new(Stack {
            config,
            transport: transport_manager,
            dialogs,
            transactions,
            local_uri,
            request_handlers: DashMap::new(),
            state_channels: DashMap::new(),
            body_channels: DashMap::new(),
            destinations: DashMap::new(),
            incoming_tx,
        });

        tokio::spawn(stack.clone().drive_transport(transport_events));
        tokio::spawn(stack.clone().drive_dialog_events(dialog_events));

        Ok((stack, incoming_rx))
    }

    /// Closes every bound transport, which in turn fails every transaction
    /// still in flight with `transport_failure` (Section 5).
    pub async fn shutdown(&self) -> StackResult<()> {
        self.transport.close_all().await?;
        Ok(())
    }

    pub fn local_uri(&self) -> &Uri {
        &self.local_uri
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.dialog_count()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Registers a handler for an out-of-dialog method (Section 6:
    /// `Stack.OnRequest`). INVITE, CANCEL, and any method matching an
    /// existing dialog are always routed to the dialog layer first; a
    /// handler here only ever sees requests that land on no dialog.
    pub fn on_request<F>(&self, method: Method, handler: F)
    where
        F: Fn(Request) -> Response + Send + Sync + 'static,
    {
        self.request_handlers.insert(method, Arc::new(handler));
    }

    /// Starts a new call (Section 6: `Stack.NewInvite`). Resolves `target`
    /// to a destination address, sends the INVITE, and returns a handle
    /// immediately; subscribe to [`DialogHandle::on_state_change`] to
    /// follow `Trying -> Early -> Confirmed`.
    pub async fn new_invite(self: &Arc<Self>, target: Uri) -> StackResult<DialogHandle> {
        let destination = resolve(&target).await?;
        let transport = self.primary_transport()?;

        let id = self
            .dialogs
            .new_invite(self.local_uri.clone(), target, destination, transport);

        Ok(self.make_handle(id, destination))
    }

    fn primary_transport(&self) -> StackResult<Arc<dyn Transport>> {
        self.transport
            .transport(self.config.transport)
            .ok_or(StackError::NotStarted)
    }

    fn make_handle(self: &Arc<Self>, id: DialogId, destination: SocketAddr) -> DialogHandle {
        let (state_tx, state_rx) = broadcast::channel(32);
        let (body_tx, body_rx) = broadcast::channel(32);
        self.state_channels.insert(id, state_tx);
        self.body_channels.insert(id, body_tx);
        self.destinations.insert(id, destination);

        DialogHandle {
            id,
            dialogs: self.dialogs.clone(),
            transport: self.transport.transport(self.config.transport).expect("primary transport bound in Stack::start"),
            destination,
            state_rx,
            body_rx,
        }
    }

    async fn drive_transport(self: Arc<Self>, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::MessageReceived { message, source, .. } => {
                    self.clone().handle_inbound(message, source).await;
                }
                TransportEvent::Error { error } => warn!(%error, "transport error"),
                TransportEvent::ConnectionOpened { .. } | TransportEvent::ConnectionClosed { .. } => {}
                TransportEvent::Closed => break,
            }
        }
    }

    async fn handle_inbound(self: Arc<Self>, message: Message, source: SocketAddr) {
        if let Message::Request(request) = &message {
            // An out-of-dialog handler only applies to methods the dialog
            // layer has no opinion about; INVITE/CANCEL and anything that
            // matches a live dialog still go through `handle_inbound` below.
            let dialog_owned = matches!(request.method, Method::Invite | Method::Cancel | Method::Ack | Method::Bye | Method::Refer | Method::Notify)
                || self.dialogs.has_dialog_for(request);
            if !dialog_owned {
                if let Some(handler) = self.request_handlers.get(&request.method) {
                    let response = handler(request.clone());
                    if let Ok(transport) = self.primary_transport() {
                        let _ = transport.send_message(Message::Response(response), source).await;
                    }
                    return;
                }
            }
        }

        let Ok(transport) = self.primary_transport() else { return };
        self.dialogs.handle_inbound(message, source, transport).await;
    }

    async fn drive_dialog_events(self: Arc<Self>, mut rx: mpsc::Receiver<DialogEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                DialogEvent::IncomingInvite { dialog, request: _, source } => {
                    let handle = self.make_handle(dialog, source);
                    if self.incoming_tx.send(handle).await.is_err() {
                        break;
                    }
                }
                DialogEvent::IncomingRequest { dialog, request, .. } => {
                    if let Some(tx) = self.body_channels.get(&dialog) {
                        let _ = tx.send(request.body.clone());
                    }
                }
                DialogEvent::StateChanged { dialog, state } => {
                    if let Some(tx) = self.state_channels.get(&dialog) {
                        let _ = tx.send(state);
                    }
                }
                DialogEvent::DialogTerminated { dialog } | DialogEvent::CallFailed { dialog, .. } => {
                    if let Some(tx) = self.state_channels.get(&dialog) {
                        let _ = tx.send(DialogState::Terminated);
                    }
                    self.state_channels.remove(&dialog);
                    self.body_channels.remove(&dialog);
                    self.destinations.remove(&dialog);
                }
            }
        }
    }
}

/// Resolves a SIP URI's host/port to a destination address. DNS SRV/NAPTR
/// resolution per RFC 3263 is out of scope (Section 1); this does plain
/// forward resolution with the default SIP port.
async fn resolve(uri: &Uri) -> StackResult<SocketAddr> {
    let port = uri.port.unwrap_or(5060);
    let host = format!("{}:{port}", uri.host);
    tokio::net::lookup_host(&host)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| StackError::UnresolvedDestination(host))
}
