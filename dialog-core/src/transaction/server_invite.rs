//! INVITE server transaction (Section 4.2.4): `Proceeding -> Completed ->
//! Confirmed -> Terminated`, with a direct `Proceeding -> Terminated`
//! shortcut on 2xx (the dialog layer then owns 2xx retransmission and its
//! ACK, per Section 9).

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use uasip_sip_types::{Message, Method, Request, Response, StatusCode};
use uasip_sip_transport::Transport;

use super::key::{TransactionKey, TransactionRole};
use super::state::ServerInviteState;
use super::timer::{Timer, TimerName, TimerSettings};
use super::TransactionEvent;

enum Input {
    /// A retransmitted INVITE from the network.
    RequestRetransmit,
    /// The ACK matched to this transaction's branch.
    Ack,
    /// A response the TU (dialog layer) wants sent.
    SendResponse(Response),
    TimerFired(TimerName),
}

struct Inner {
    key: TransactionKey,
    state: RwLock<ServerInviteState>,
    last_response: RwLock<Option<Response>>,
}

#[derive(Clone)]
pub struct ServerInviteTransaction {
    inner: Arc<Inner>,
    to_fsm: mpsc::Sender<Input>,
}

impl ServerInviteTransaction {
    /// Creates the FSM for a freshly received INVITE. `source` is where
    /// responses and retransmitted requests get sent/received.
    pub fn spawn(
        request: Request,
        source: SocketAddr,
        transport: Arc<dyn Transport>,
        timers: TimerSettings,
        auto_trying: bool,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> Self {
        let branch = request.via().and_then(|v| v.branch()).unwrap_or_default().to_string();
        let key = TransactionKey::new(branch, Method::Invite, TransactionRole::Server);
        let reliable = transport.reliable();

        let inner = Arc::new(Inner {
            key: key.clone(),
            state: RwLock::new(ServerInviteState::Proceeding),
            last_response: RwLock::new(None),
        });

        let (to_fsm, rx) = mpsc::channel(32);
        let handle = ServerInviteTransaction {
            inner: inner.clone(),
            to_fsm: to_fsm.clone(),
        };

        if auto_trying {
            let trying = Response::for_status(StatusCode::TRYING);
            let transport2 = transport.clone();
            tokio::spawn(async move {
                let _ = transport2.send_message(Message::Response(trying), source).await;
            });
        }

        tokio::spawn(run(inner, source, transport, reliable, timers, to_fsm, rx, events_tx));

        handle
    }

    pub fn key(&self) -> &TransactionKey {
        &self.inner.key
    }

    pub fn state(&self) -> ServerInviteState {
        *self.inner.state.read()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    /// The dialog layer sends its response (1xx/2xx/final) through here.
    pub async fn send_response(&self, response: Response) {
        let _ = self.to_fsm.send(Input::SendResponse(response)).await;
    }

    /// Called by the manager when an INVITE retransmit for this branch
    /// arrives: resend the last response, absorbing the duplicate.
    pub async fn notify_request_retransmit(&self) {
        let _ = self.to_fsm.send(Input::RequestRetransmit).await;
    }

    /// Called by the manager when the matching ACK arrives (non-2xx case
    /// only; ACK for 2xx never reaches this transaction, Section 4.2.1).
    pub async fn notify_ack(&self) {
        let _ = self.to_fsm.send(Input::Ack).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    inner: Arc<Inner>,
    source: SocketAddr,
    transport: Arc<dyn Transport>,
    reliable: bool,
    timers: TimerSettings,
    self_tx: mpsc::Sender<Input>,
    mut rx: mpsc::Receiver<Input>,
    events_tx: mpsc::Sender<TransactionEvent>,
) {
    let key = inner.key.clone();
    debug!(%key, "server INVITE transaction starting");

    let mut timer_g_interval = timers.t1;
    let mut timer_g: Option<Timer> = None;
    let mut timer_h: Option<Timer> = None;
    let mut timer_i: Option<Timer> = None;

    while let Some(input) = rx.recv().await {
        let state = *inner.state.read();
        match input {
            Input::SendResponse(response) => {
                let status = response.status;
                let _ = transport.send_message(Message::Response(response.clone()), source).await;
                *inner.last_response.write() = Some(response.clone());

                if status.is_provisional() {
                    if state == ServerInviteState::Proceeding {
                        let _ = events_tx.send(TransactionEvent::Provisional(response)).await;
                    }
                } else if status.is_success() {
                    *inner.state.write() = ServerInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Success(response)).await;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                } else {
                    *inner.state.write() = ServerInviteState::Completed;
                    if !reliable {
                        timer_g = Some(Timer::schedule(
                            TimerName::G,
                            timer_g_interval,
                            self_tx.clone(),
                            Input::TimerFired(TimerName::G),
                        ));
                    }
                    timer_h = Some(Timer::schedule(
                        TimerName::H,
                        timers.timer_h(),
                        self_tx.clone(),
                        Input::TimerFired(TimerName::H),
                    ));
                    let _ = events_tx.send(TransactionEvent::Failure(response)).await;
                }
            }
            Input::RequestRetransmit => {
                if matches!(state, ServerInviteState::Proceeding | ServerInviteState::Completed) {
                    trace!(%key, "retransmitted INVITE, resending last response");
                    if let Some(resp) = inner.last_response.read().clone() {
                        let _ = transport.send_message(Message::Response(resp), source).await;
                    }
                }
            }
            Input::Ack => {
                if state == ServerInviteState::Completed {
                    timer_g.take();
                    timer_h.take();
                    *inner.state.write() = ServerInviteState::Confirmed;
                    timer_i = Some(Timer::schedule(
                        TimerName::I,
                        timers.timer_i(reliable),
                        self_tx.clone(),
                        Input::TimerFired(TimerName::I),
                    ));
                }
            }
            Input::TimerFired(TimerName::G) => {
                if state == ServerInviteState::Completed {
                    if let Some(resp) = inner.last_response.read().clone() {
                        let _ = transport.send_message(Message::Response(resp), source).await;
                    }
                    timer_g_interval = timers.backoff(timer_g_interval);
                    timer_g = Some(Timer::schedule(
                        TimerName::G,
                        timer_g_interval,
                        self_tx.clone(),
                        Input::TimerFired(TimerName::G),
                    ));
                }
            }
            Input::TimerFired(TimerName::H) => {
                if state == ServerInviteState::Completed {
                    debug!(%key, "Timer H fired, no ACK received");
                    *inner.state.write() = ServerInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Timeout).await;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(TimerName::I) => {
                if state == ServerInviteState::Confirmed {
                    *inner.state.write() = ServerInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(_) => {}
        }
    }

    warn_if_no_response(&inner);
    timer_g.take();
    timer_h.take();
    timer_i.take();
    debug!(%key, "server INVITE transaction terminated");
}

fn warn_if_no_response(inner: &Inner) {
    if inner.last_response.read().is_none() && *inner.state.read() == ServerInviteState::Terminated {
        trace!(key = %inner.key, "server INVITE transaction terminated without a final response");
    }
}
