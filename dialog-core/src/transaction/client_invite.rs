//! INVITE client transaction (Section 4.2.2): `Calling -> Proceeding ->
//! Completed -> Terminated`, with a direct `Calling/Proceeding -> Terminated`
//! shortcut on 2xx.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use uasip_sip_types::{Method, Request, Response, TypedHeader};
use uasip_sip_transport::Transport;

use super::key::{TransactionKey, TransactionRole};
use super::state::ClientInviteState;
use super::timer::{Timer, TimerName, TimerSettings};
use super::TransactionEvent;

enum Input {
    Response(Response),
    TimerFired(TimerName),
}

struct Inner {
    key: TransactionKey,
    state: RwLock<ClientInviteState>,
}

/// Handle to a running INVITE client transaction. The FSM itself lives in a
/// spawned task; this handle only exposes what the dialog layer and CANCEL
/// need: the current state and the branch to reuse.
#[derive(Clone)]
pub struct ClientInviteTransaction {
    inner: Arc<Inner>,
    to_fsm: mpsc::Sender<Input>,
}

impl ClientInviteTransaction {
    /// Sends `request` and spawns its FSM. `events_tx` receives every
    /// `TransactionEvent` this transaction reports upward (Section 4.2).
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
        let key = TransactionKey::new(branch, Method::Invite, TransactionRole::Client);
        let reliable = transport.reliable();

        let inner = Arc::new(Inner {
            key: key.clone(),
            state: RwLock::new(ClientInviteState::Calling),
        });

        let (to_fsm, rx) = mpsc::channel(32);

        let handle = ClientInviteTransaction {
            inner: inner.clone(),
            to_fsm: to_fsm.clone(),
        };

        tokio::spawn(run(
            inner, request, destination, transport, reliable, timers, to_fsm, rx, events_tx,
        ));

        handle
    }

    pub fn key(&self) -> &TransactionKey {
        &self.inner.key
    }

    pub fn branch(&self) -> &str {
        &self.inner.key.branch
    }

    pub fn state(&self) -> ClientInviteState {
        *self.inner.state.read()
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    /// Permitted once the INVITE has received at least one provisional
    /// response (Section 4.2.6: CANCEL targets an INVITE in `Proceeding`).
    pub fn can_cancel(&self) -> bool {
        matches!(self.state(), ClientInviteState::Proceeding)
    }

    /// Delivers an inbound response matched to this transaction.
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
    debug!(%key, "client INVITE transaction starting");

    if let Err(e) = transport
        .send_message(uasip_sip_types::Message::Request(request.clone()), destination)
        .await
    {
        warn!(%key, error = %e, "failed to send initial INVITE");
        let _ = events_tx
            .send(TransactionEvent::TransportError(e.to_string()))
            .await;
        *inner.state.write() = ClientInviteState::Terminated;
        let _ = events_tx.send(TransactionEvent::Terminated).await;
        return;
    }

    let mut timer_a_interval = timers.t1;
    let mut timer_a = (!reliable).then(|| {
        Timer::schedule(
            TimerName::A,
            timer_a_interval,
            self_tx.clone(),
            Input::TimerFired(TimerName::A),
        )
    });
    let mut timer_b = Some(Timer::schedule(
        TimerName::B,
        timers.timer_b(),
        self_tx.clone(),
        Input::TimerFired(TimerName::B),
    ));
    let mut timer_d: Option<Timer> = None;

    while let Some(input) = rx.recv().await {
        let state = *inner.state.read();
        match input {
            Input::Response(response) => {
                let status = response.status;
                match state {
                    ClientInviteState::Calling | ClientInviteState::Proceeding if status.is_provisional() => {
                        timer_a.take();
                        *inner.state.write() = ClientInviteState::Proceeding;
                        let _ = events_tx.send(TransactionEvent::Provisional(response)).await;
                    }
                    ClientInviteState::Calling | ClientInviteState::Proceeding if status.is_success() => {
                        timer_a.take();
                        timer_b.take();
                        *inner.state.write() = ClientInviteState::Terminated;
                        let _ = events_tx.send(TransactionEvent::Success(response)).await;
                        let _ = events_tx.send(TransactionEvent::Terminated).await;
                        break;
                    }
                    ClientInviteState::Calling | ClientInviteState::Proceeding => {
                        // 3xx-6xx: send ACK ourselves, start Timer D.
                        timer_a.take();
                        timer_b.take();
                        send_ack_for_non_2xx(&transport, &request, &response, destination).await;
                        *inner.state.write() = ClientInviteState::Completed;
                        timer_d = Some(Timer::schedule(
                            TimerName::D,
                            timers.timer_d(reliable),
                            self_tx.clone(),
                            Input::TimerFired(TimerName::D),
                        ));
                        let _ = events_tx.send(TransactionEvent::Failure(response)).await;
                    }
                    ClientInviteState::Completed if !status.is_success() => {
                        trace!(%key, "retransmitted non-2xx final, resending ACK");
                        send_ack_for_non_2xx(&transport, &request, &response, destination).await;
                    }
                    _ => {}
                }
            }
            Input::TimerFired(TimerName::A) => {
                if state == ClientInviteState::Calling {
                    trace!(%key, "Timer A fired, retransmitting INVITE");
                    let _ = transport
                        .send_message(uasip_sip_types::Message::Request(request.clone()), destination)
                        .await;
                    timer_a_interval = timers.backoff(timer_a_interval);
                    timer_a = Some(Timer::schedule(
                        TimerName::A,
                        timer_a_interval,
                        self_tx.clone(),
                        Input::TimerFired(TimerName::A),
                    ));
                }
            }
            Input::TimerFired(TimerName::B) => {
                if matches!(state, ClientInviteState::Calling | ClientInviteState::Proceeding) {
                    debug!(%key, "Timer B fired, INVITE transaction timed out");
                    *inner.state.write() = ClientInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Timeout).await;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(TimerName::D) => {
                if state == ClientInviteState::Completed {
                    *inner.state.write() = ClientInviteState::Terminated;
                    let _ = events_tx.send(TransactionEvent::Terminated).await;
                    break;
                }
            }
            Input::TimerFired(_) => {}
        }
    }

    timer_a.take();
    timer_b.take();
    timer_d.take();
    debug!(%key, "client INVITE transaction terminated");
}

/// Builds and sends the ACK for a non-2xx final response (Section 4.2.2):
/// same Via/From/Call-ID/CSeq-number/Route as the INVITE, the response's To
/// (with its tag), `ACK` method, Max-Forwards 70, no body. This is a
/// transaction-layer duty, unlike the ACK for 2xx which belongs to the
/// dialog (Section 9).
async fn send_ack_for_non_2xx(
    transport: &Arc<dyn Transport>,
    invite: &Request,
    response: &Response,
    destination: SocketAddr,
) {
    let mut ack = Request::new(Method::Ack, invite.uri.clone());
    if let Some(via) = invite.via() {
        ack.push_header(TypedHeader::Via(via.clone()));
    }
    if let Some(from) = invite.from_header() {
        ack.push_header(TypedHeader::From(from.clone()));
    }
    if let Some(to) = response.to_header() {
        ack.push_header(TypedHeader::To(to.clone()));
    }
    if let Some(call_id) = invite.call_id() {
        ack.push_header(TypedHeader::CallId(call_id.to_string()));
    }
    let cseq_number = invite.cseq().map(|c| c.sequence).unwrap_or(1);
    ack.push_header(TypedHeader::CSeq(uasip_sip_types::CSeq {
        sequence: cseq_number,
        method: Method::Ack,
    }));
    for route in invite.routes() {
        ack.push_header(TypedHeader::Route(vec![route]));
    }
    ack.push_header(TypedHeader::MaxForwards(70));

    let _ = transport
        .send_message(uasip_sip_types::Message::Request(ack), destination)
        .await;
}
