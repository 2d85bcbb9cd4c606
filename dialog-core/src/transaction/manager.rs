//! Owns the transaction lookup table, matches inbound messages to existing
//! transactions (Section 4.2.1), and creates new ones on behalf of the
//! dialog layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use uasip_sip_types::{Message, Method, Request, Response};
use uasip_sip_transport::Transport;

use super::client_invite::ClientInviteTransaction;
use super::client_non_invite::ClientNonInviteTransaction;
use super::key::{TransactionKey, TransactionRole};
use super::server_invite::ServerInviteTransaction;
use super::server_non_invite::ServerNonInviteTransaction;
use super::state::ServerInviteState;
use super::timer::TimerSettings;
use super::TransactionEvent;

/// One entry in the transaction table. Holds enough to route inbound
/// messages and to query state; retransmission/timer logic all lives inside
/// each FSM's own task (Section 4.2).
#[derive(Clone)]
enum TransactionHandle {
    ClientInvite(ClientInviteTransaction),
    ClientNonInvite(ClientNonInviteTransaction),
    ServerInvite(ServerInviteTransaction),
    ServerNonInvite(ServerNonInviteTransaction),
}

impl TransactionHandle {
    fn is_terminated(&self) -> bool {
        match self {
            TransactionHandle::ClientInvite(t) => t.is_terminated(),
            TransactionHandle::ClientNonInvite(t) => t.is_terminated(),
            TransactionHandle::ServerInvite(t) => t.is_terminated(),
            TransactionHandle::ServerNonInvite(t) => t.is_terminated(),
        }
    }
}

/// What happened to an inbound message once handed to the transaction layer.
pub enum RouteOutcome {
    /// Matched an existing transaction; it has been notified.
    Delivered,
    /// A request that does not match any transaction: the TU (dialog
    /// manager) should create a new server transaction for it.
    NewServerRequest(Request, SocketAddr),
    /// An ACK for a 2xx response. These never match a transaction (Section
    /// 4.2.1) and go straight to the dialog layer.
    AckForSuccess(Request, SocketAddr),
    /// A response that matches no outstanding client transaction; dropped
    /// per Section 7 (unmatched messages are not errors worth surfacing).
    Unmatched,
}

pub struct TransactionManager {
    table: DashMap<TransactionKey, TransactionHandle>,
    timers: TimerSettings,
}

impl TransactionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(TransactionManager {
            table: DashMap::new(),
            timers: TimerSettings::default(),
        })
    }

    pub fn with_timers(timers: TimerSettings) -> Arc<Self> {
        Arc::new(TransactionManager {
            table: DashMap::new(),
            timers,
        })
    }

    /// Sends `request` as a new INVITE client transaction.
    pub fn send_invite(
        self: &Arc<Self>,
        request: Request,
        destination: SocketAddr,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> ClientInviteTransaction {
        let txn = ClientInviteTransaction::spawn(request, destination, transport, self.timers, events_tx);
        self.table.insert(txn.key().clone(), TransactionHandle::ClientInvite(txn.clone()));
        txn
    }

    /// Sends `request` as a new non-INVITE client transaction (BYE, REFER,
    /// CANCEL, ...).
    pub fn send_non_invite(
        self: &Arc<Self>,
        request: Request,
        destination: SocketAddr,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> ClientNonInviteTransaction {
        let txn = ClientNonInviteTransaction::spawn(request, destination, transport, self.timers, events_tx);
        self.table.insert(txn.key().clone(), TransactionHandle::ClientNonInvite(txn.clone()));
        txn
    }

    /// Creates a server transaction for a freshly-received INVITE.
    pub fn receive_invite(
        self: &Arc<Self>,
        request: Request,
        source: SocketAddr,
        transport: Arc<dyn Transport>,
        auto_trying: bool,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> ServerInviteTransaction {
        let txn = ServerInviteTransaction::spawn(request, source, transport, self.timers, auto_trying, events_tx);
        self.table.insert(txn.key().clone(), TransactionHandle::ServerInvite(txn.clone()));
        txn
    }

    /// Creates a server transaction for a freshly-received non-INVITE
    /// request.
    pub fn receive_non_invite(
        self: &Arc<Self>,
        request: Request,
        source: SocketAddr,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> ServerNonInviteTransaction {
        let txn = ServerNonInviteTransaction::spawn(request, source, transport, self.timers, events_tx);
        self.table.insert(txn.key().clone(), TransactionHandle::ServerNonInvite(txn.clone()));
        txn
    }

    /// Routes an inbound message to the transaction it matches, if any
    /// (Section 4.2.1).
    pub async fn route_inbound(&self, message: Message, source: SocketAddr) -> RouteOutcome {
        match message {
            Message::Response(response) => {
                let method = response.cseq().map(|c| c.method.clone());
                let branch = response.via().and_then(|v| v.branch()).map(str::to_string);
                let (Some(method), Some(branch)) = (method, branch) else {
                    trace!("dropping response missing CSeq or Via branch");
                    return RouteOutcome::Unmatched;
                };

                let key = TransactionKey::new(branch, method, TransactionRole::Client);
                if let Some(handle) = self.table.get(&key) {
                    match handle.value() {
                        TransactionHandle::ClientInvite(t) => t.deliver_response(response).await,
                        TransactionHandle::ClientNonInvite(t) => t.deliver_response(response).await,
                        _ => return RouteOutcome::Unmatched,
                    }
                    RouteOutcome::Delivered
                } else {
                    RouteOutcome::Unmatched
                }
            }
            Message::Request(request) => {
                let branch = request.via().and_then(|v| v.branch()).unwrap_or_default().to_string();

                if request.method == Method::Ack {
                    let key = TransactionKey::for_ack(branch, TransactionRole::Server);
                    if let Some(handle) = self.table.get(&key) {
                        if let TransactionHandle::ServerInvite(t) = handle.value() {
                            if t.state() == ServerInviteState::Completed {
                                t.notify_ack().await;
                                return RouteOutcome::Delivered;
                            }
                        }
                    }
                    // No matching INVITE server transaction awaiting ACK:
                    // this is an ACK for a 2xx, a dialog-layer duty.
                    return RouteOutcome::AckForSuccess(request, source);
                }

                let key = TransactionKey::new(branch, request.method.clone(), TransactionRole::Server);
                if let Some(handle) = self.table.get(&key) {
                    match handle.value() {
                        TransactionHandle::ServerInvite(t) => t.notify_request_retransmit().await,
                        TransactionHandle::ServerNonInvite(t) => t.notify_request_retransmit().await,
                        _ => {}
                    }
                    RouteOutcome::Delivered
                } else {
                    RouteOutcome::NewServerRequest(request, source)
                }
            }
        }
    }

    /// Looks up the client INVITE transaction with the given branch, for
    /// CANCEL gating (Section 4.2.6: only permitted while `Proceeding`).
    pub fn find_client_invite(&self, branch: &str) -> Option<ClientInviteTransaction> {
        let key = TransactionKey::new(branch, Method::Invite, TransactionRole::Client);
        match self.table.get(&key)?.value() {
            TransactionHandle::ClientInvite(t) => Some(t.clone()),
            _ => None,
        }
    }

    /// Looks up the server INVITE transaction with the given branch, so an
    /// inbound CANCEL can be matched to the INVITE it targets.
    pub fn find_server_invite(&self, branch: &str) -> Option<ServerInviteTransaction> {
        let key = TransactionKey::new(branch, Method::Invite, TransactionRole::Server);
        match self.table.get(&key)?.value() {
            TransactionHandle::ServerInvite(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Removes every transaction that has reached `Terminated`. Intended to
    /// be run on a timer (Section 5: "one tick per ~30s").
    pub fn sweep_terminated(&self) {
        let before = self.table.len();
        self.table.retain(|_, handle| !handle.is_terminated());
        let removed = before - self.table.len();
        if removed > 0 {
            debug!(removed, "swept terminated transactions");
        }
    }

    /// Spawns the background sweeper described in Section 5.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.sweep_terminated();
            }
        });
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager {
            table: DashMap::new(),
            timers: TimerSettings::default(),
        }
    }
}
