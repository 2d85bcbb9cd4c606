//! Non-INVITE client transaction (Section 4.2.3): `Trying -> Proceeding ->
//! Completed -> Terminated`. Used for BYE, REFER, CANCEL, and every other
//! non-INVITE request this UA sends.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use uasip_sip_types::{Message, Request, Response};
use uasip_sip_transport::Transport;

use super::key::{TransactionKey, TransactionRole};
use super::state::ClientNonInviteState;
use super::timer::{Timer, TimerName, TimerSettings};
use super::TransactionEvent;

enum Input {
    Response(Response),
    TimerFired(TimerName),
}

struct Inner {
    key: TransactionKey,
    state: RwLock<ClientNonInviteState>,
}

#[derive(Clone)]
pub struct ClientNonInviteTransaction {
    inner: Arc<Inner>,
    to_fsm: mpsc::Sender<Input>,
}

impl ClientNonInviteTransaction {
    pub fn spawn(
        request: Request,
        destination: SocketAddr,
        transport: Arc<dyn Transport>,
        timers: TimerSettings,
        events_tx: mpsc::Sender<TransactionEvent>,
    ) -> Self {
        let branch = request
            .via()
            .and_then(|v| v.branch())
            .unwrap_or_default()
            .to_string();
        let method = request.method.clone();
        let key = TransactionKey::new(branch, method, TransactionRole::Client);
        let reliable = transport.reliable();

        let inner = Arc::new(Inner {
            key: key.clone(),
            state: RwLock::new(ClientNonInviteState::Trying),
        });

        let (to_fsm, rx) = mpsc::channel(32);
        let handle = ClientNonInviteTransaction {
            inner: inner.clone(),
            to_fsm: to_fsm.clone(),
        };

        tokio::spawn(run(inner, request, destination, transport, reliable, timers, to_fsm, rx, events_tx));

        handle
    }

    pub fn key(&self) -> &TransactionKey {
        &self.inner.key
    }

    pub fn state(&self) -> ClientNonInviteState {
        *self.inner.state.read()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub async fn deliver_response(&self, response: Response) {
        let _ = self.to_fsm.send(Input::Response(response)).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    inner: Arc<Inner>,
    request: Request,
    destination: SocketAddr,
    transport: Arc<dyn Transport>,
    reliable: bool,
    timers: TimerSettings,
    self_tx: mpsc::Sender<Input>,
    mut rx: mpsc::Receiver<Input>,
    events_tx: mpsc::Sender<TransactionEvent>,
) {
    let key = inner.key.clone();
    debug!(%key, "client non-INVITE transaction starting");

    if let Err(e) = transport.send_message(Message::Request(request.clone()), destination).await {
        warn!(%key, error = %e, "failed to send request");
        let _ = events_tx.send(TransactionEvent::TransportError(e.to_string())).await;
        *inner.state.write() = ClientNonInviteState::Terminated;
        let _ = events_tx.send(TransactionEvent::Terminated).await;
        return;
    }

    let mut timer_e_interval = timers.t1;
    let mut timer_e = (!reliable).then(|| {
        Timer::schedule(TimerName::E, timer_e_interval, self_tx.clone(), Input::TimerFired(TimerName::E))
    });
    let mut timer_f = Some(Timer::schedule(
        TimerName::F,
        timers.timer_f(),
        self_tx.clone(),
        Input::TimerFired(TimerName::F),
    ));
    let mut timer_k: Option<Timer> = None;

    while let Some(input) = rx.recv().await {
        let state = *inner.state.read();
        match input {
            Input::Response(response) => {
                let status = response.status;
                match state {
                    ClientNonInviteState::Trying | ClientNonInviteState::Proceeding if status.is_provisional() => {
                        *inner.state.write() = ClientNonInviteState::Proceeding;
                        let _ = events_tx.send(TransactionEvent::Provisional(response)).await;
                    }
                    ClientNonInviteState::Trying | ClientNonInviteState::Proceeding => {
                        timer_e.take();
                        timer_f.take();
                        *inner.state.write() = ClientNonInviteState::Completed;
                        timer_k = Some(Timer::schedule(
                            TimerName::K,
                            timers.timer_k(reliable),
                            self_tx.clone(),
                            Input::TimerFired(TimerName::K),
                        ));
                        let event = if status.is_success() {
                            TransactionEvent::Success(response)
                        } else {
                            TransactionEvent::Failure(response)
                        };
                        let _ = events_tx.send(event).await;
                    }
                    _ => {}
                }
            }
            Input::TimerFired(TimerName::E) => {
                if matches!(state, ClientNonInviteState::Trying | ClientNonInviteState::Proceeding) {
                    trace!(%key, "Timer E fired, retransmitting request");
                    let _ = transport.send_message(Message::Request(request.clone()), destination).await;
                    let t2 = timers.t2;
                    timer_e_interval = std::cmp::min(timer_e_interval * 2, t2);
                    timer_e = Some(Timer::schedule(
                        TimerName::E,
                        timer_e_interval,
                        self_tx.clone(),
                        Input::TimerFired(TimerName::E),
                    ));
                }
            }
            Input::TimerFired(TimerName::F) => {
                if matches!(state, ClientNonInviteState::Trying | ClientNonInviteState::Proceeding) {
                    debug!(%key, "Timer F fired, transaction timed out");
                    *inner.state.write() = ClientNonInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Timeout).await;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(TimerName::K) => {
                if state == ClientNonInviteState::Completed {
                    *inner.state.write() = ClientNonInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(_) => {}
        }
    }

    timer_e.take();
    timer_f.take();
    timer_k.take();
    debug!(%key, "client non-INVITE transaction terminated");
}
