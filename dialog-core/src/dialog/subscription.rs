//! The REFER subscription (RFC 3515, spec Section 4.3.7): tracks the
//! progress of a blind or attended transfer via NOTIFY `message/sipfrag`
//! bodies.

use tokio::sync::{mpsc, Notify};

use uasip_sip_types::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Active,
    Terminated,
}

impl SubscriptionState {
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "active" => SubscriptionState::Active,
            "terminated" => SubscriptionState::Terminated,
            _ => SubscriptionState::Pending,
        }
    }
}

/// A single update delivered to the caller of [`super::Dialog::send_refer`]
/// (or the handle returned from it): the latest progress of the transferred
/// call, parsed from a NOTIFY's sip-frag body.
#[derive(Debug, Clone)]
pub struct ReferProgress {
    pub state: SubscriptionState,
    pub last_status: Option<StatusCode>,
}

/// Live state for one outstanding REFER (Section 3: at most one per
/// dialog). `id` disambiguates when `Refer-To`'s NOTIFY carries an `;id=`
/// parameter (RFC 3515 Section 2.4.4).
pub struct ReferSubscription {
    pub id: String,
    state: parking_lot::RwLock<SubscriptionState>,
    last_status: parking_lot::RwLock<Option<StatusCode>>,
    progress_tx: mpsc::Sender<ReferProgress>,
    done: std::sync::Arc<Notify>,
    /// Resolves once the REFER itself has a final response (2xx or
    /// non-2xx), independent of `done` which tracks the NOTIFY-driven
    /// subscription lifetime. This is what `WaitRefer` (Section 4.3.7)
    /// blocks on.
    settled: std::sync::Arc<Notify>,
    rejected: std::sync::atomic::AtomicBool,
}

impl ReferSubscription {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::Receiver<ReferProgress>) {
        let (progress_tx, progress_rx) = mpsc::channel(16);
        (
            ReferSubscription {
                id: id.into(),
                state: parking_lot::RwLock::new(SubscriptionState::Pending),
                last_status: parking_lot::RwLock::new(None),
                progress_tx,
                done: std::sync::Arc::new(Notify::new()),
                settled: std::sync::Arc::new(Notify::new()),
                rejected: std::sync::atomic::AtomicBool::new(false),
            },
            progress_rx,
        )
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.read()
    }

    pub fn last_status(&self) -> Option<StatusCode> {
        *self.last_status.read()
    }

    /// True once the REFER received a non-2xx final response (Section
    /// 4.3.7: "On non-2xx: caller receives the error; no subscription").
    pub fn was_rejected(&self) -> bool {
        self.rejected.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn activate(&self) {
        *self.state.write() = SubscriptionState::Active;
        self.settled.notify_waiters();
    }

    /// REFER got a non-2xx final response: no subscription is created.
    pub fn reject(&self) {
        self.rejected.store(true, std::sync::atomic::Ordering::SeqCst);
        *self.state.write() = SubscriptionState::Terminated;
        self.settled.notify_waiters();
        self.done.notify_waiters();
    }

    /// Resolves once the REFER's final response has been processed
    /// (`activate` or `reject`), or immediately if it already has.
    pub async fn wait_settled(&self) {
        if self.state() != SubscriptionState::Pending {
            return;
        }
        self.settled.notified().await;
    }

    /// Applies a NOTIFY's `Subscription-State` and sip-frag status, pushes
    /// the update to the caller, and closes the completion signal on
    /// termination (Section 4.3.7).
    pub async fn apply_notify(&self, state: SubscriptionState, status: Option<StatusCode>) {
        *self.state.write() = state;
        if let Some(status) = status {
            *self.last_status.write() = Some(status);
        }
        let _ = self
            .progress_tx
            .send(ReferProgress {
                state,
                last_status: *self.last_status.read(),
            })
            .await;
        if state == SubscriptionState::Terminated {
            self.done.notify_waiters();
        }
    }

    /// Resolves once the subscription reaches `Terminated`, or immediately
    /// if it already has.
    pub async fn wait_done(&self) {
        if self.state() == SubscriptionState::Terminated {
            return;
        }
        self.done.notified().await;
    }

    /// Signals completion without a final NOTIFY, e.g. when the owning
    /// dialog terminates (Section 5: "Dialog termination triggers closure
    /// of any outstanding REFER subscription signals").
    pub fn close(&self) {
        *self.state.write() = SubscriptionState::Terminated;
        self.done.notify_waiters();
        self.settled.notify_waiters();
    }
}

/// Parses a `message/sipfrag` NOTIFY body's status line (e.g. `SIP/2.0 200
/// OK`) into its status code.
pub fn parse_sipfrag_status(body: &[u8]) -> Option<StatusCode> {
    let text = std::str::from_utf8(body).ok()?;
    let line = text.lines().next()?.trim();
    let mut parts = line.splitn(3, ' ');
    let version = parts.next()?;
    if !version.starts_with("SIP/2.0") {
        return None;
    }
    let code: u16 = parts.next()?.parse().ok()?;
    Some(StatusCode(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sipfrag_status_line() {
        assert_eq!(parse_sipfrag_status(b"SIP/2.0 200 OK\r\n"), Some(StatusCode::OK));
        assert_eq!(parse_sipfrag_status(b"SIP/2.0 180 Ringing"), Some(StatusCode::RINGING));
        assert_eq!(parse_sipfrag_status(b"garbage"), None);
    }

    #[test]
    fn subscription_state_from_token_defaults_to_pending() {
        assert_eq!(SubscriptionState::from_token("active"), SubscriptionState::Active);
        assert_eq!(SubscriptionState::from_token("terminated"), SubscriptionState::Terminated);
        assert_eq!(SubscriptionState::from_token("whatever"), SubscriptionState::Pending);
    }

    #[tokio::test]
    async fn wait_done_resolves_after_terminated_notify() {
        let (sub, mut rx) = ReferSubscription::new("abc");
        sub.activate();
        assert_eq!(sub.state(), SubscriptionState::Active);

        sub.apply_notify(SubscriptionState::Active, Some(StatusCode::OK)).await;
        assert_eq!(rx.recv().await.unwrap().last_status, Some(StatusCode::OK));

        sub.apply_notify(SubscriptionState::Terminated, None).await;
        sub.wait_done().await;
        assert_eq!(sub.state(), SubscriptionState::Terminated);
    }
}
