//! Non-INVITE server transaction (Section 4.2.5): `Trying -> Proceeding ->
//! Completed -> Terminated`. Used for BYE, REFER, CANCEL, and every other
//! non-INVITE request this UA receives.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use uasip_sip_types::{Message, Method, Request, Response};
use uasip_sip_transport::Transport;

use super::key::{TransactionKey, TransactionRole};
use super::state::ServerNonInviteState;
use super::timer::{Timer, TimerName, TimerSettings};
use super::TransactionEvent;

enum Input {
    RequestRetransmit,
    SendResponse(Response),
    TimerFired(TimerName),
}

struct Inner {
    key: TransactionKey,
    state: RwLock<ServerNonInviteState>,
    last_response: RwLock<Option<Response>>,
}

#[derive(Clone)]
pub struct ServerNonInviteTransaction {
    inner: Arc<Inner>,
    to_fsm: mpsc::Sender<Input>,
}

impl ServerNonInviteTransaction {
    pub fn spawn(
        request: Request,
        source: SocketAddr,
        transport: Arc<dyn Transport>,
        timers: TimerSettings,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> Self {
        let branch = request.via().and_then(|v| v.branch()).unwrap_or_default().to_string();
        let method = request.method.clone();
        let key = TransactionKey::new(branch, method, TransactionRole::Server);
        let reliable = transport.reliable();

        let inner = Arc::new(Inner {
            key: key.clone(),
            state: RwLock::new(ServerNonInviteState::Trying),
            last_response: RwLock::new(None),
        });

        let (to_fsm, rx) = mpsc::channel(32);
        let handle = ServerNonInviteTransaction {
            inner: inner.clone(),
            to_fsm: to_fsm.clone(),
        };

        tokio::spawn(run(inner, source, transport, reliable, timers, to_fsm, rx, events_tx));

        handle
    }

    pub fn key(&self) -> &TransactionKey {
        &self.inner.key
    }

    pub fn state(&self) -> ServerNonInviteState {
        *self.inner.state.read()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub async fn send_response(&self, response: Response) {
        let _ = self.to_fsm.send(Input::SendResponse(response)).await;
    }

    pub async fn notify_request_retransmit(&self) {
        let _ = self.to_fsm.send(Input::RequestRetransmit).await;
    }
}

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
    debug!(%key, "server non-INVITE transaction starting");

    let mut timer_j: Option<Timer> = None;

    while let Some(input) = rx.recv().await {
        let state = *inner.state.read();
        match input {
            Input::SendResponse(response) => {
                let status = response.status;
                let _ = transport.send_message(Message::Response(response.clone()), source).await;
                *inner.last_response.write() = Some(response.clone());

                if status.is_provisional() {
                    if state == ServerNonInviteState::Trying {
                        *inner.state.write() = ServerNonInviteState::Proceeding;
                    }
                    let _ = events_tx.send(TransactionEvent::Provisional(response)).await;
                } else {
                    *inner.state.write() = ServerNonInviteState::Completed;
                    timer_j = Some(Timer::schedule(
                        TimerName::J,
                        timers.timer_j(reliable),
                        self_tx.clone(),
                        Input::TimerFired(TimerName::J),
                    ));
                    let event = if status.is_success() {
                        TransactionEvent::Success(response)
                    } else {
                        TransactionEvent::Failure(response)
                    };
                    let _ = events_tx.send(event).await;
                }
            }
            Input::RequestRetransmit => {
                if matches!(state, ServerNonInviteState::Proceeding | ServerNonInviteState::Completed) {
                    trace!(%key, "retransmitted request, resending last response");
                    if let Some(resp) = inner.last_response.read().clone() {
                        let _ = transport.send_message(Message::Response(resp), source).await;
                    }
                }
            }
            Input::TimerFired(TimerName::J) => {
                if state == ServerNonInviteState::Completed {
                    *inner.state.write() = ServerNonInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(_) => {}
        }
    }

    timer_j.take();
    debug!(%key, "server non-INVITE transaction terminated");
}
