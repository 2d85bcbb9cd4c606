//! [`DialogHandle`]: the per-call facade a TU drives (Section 6). It wraps a
//! [`DialogId`] together with the manager/transport it was created against,
//! so call sites read `handle.accept().await` instead of threading a bare
//! `DialogId` through every operation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;

use uasip_dialog_core::{DialogError, DialogId, DialogInfo, DialogManager, DialogState, ReferOptions, ReferSubscription};
use uasip_sip_transport::transport::Transport;
use uasip_sip_types::{StatusCode, Uri};

use crate::cancellation::{run_cancellable, CancellationToken};
use crate::error::StackResult;

/// A dialog the stack is tracking on the TU's behalf: either a freshly
/// arrived INVITE awaiting Accept/Reject, or an already-confirmed call.
pub struct DialogHandle {
    pub(crate) id: DialogId,
    pub(crate) dialogs: Arc<DialogManager>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) destination: SocketAddr,
    pub(crate) state_rx: broadcast::Receiver<DialogState>,
    pub(crate) body_rx: broadcast::Receiver<Vec<u8>>,
}

impl DialogHandle {
    pub fn id(&self) -> DialogId {
        self.id
    }

    /// A read-only snapshot of the dialog's identity and current state.
    pub fn info(&self) -> StackResult<DialogInfo> {
        Ok(self.dialogs.info(self.id)?)
    }

    pub fn state(&self) -> StackResult<DialogState> {
        Ok(self.info()?.state)
    }

    /// Accepts an incoming INVITE with 200 OK (Section 4.3.8).
    pub async fn accept(&self, cancel: Option<&CancellationToken>) -> StackResult<()> {
        run_cancellable(cancel, self.dialogs.accept(self.id, StatusCode::OK)).await
    }

    /// Accepts with a caller-chosen 2xx/1xx status (e.g. 183 Session
    /// Progress before the final 200).
    pub async fn accept_with_status(&self, status: StatusCode, cancel: Option<&CancellationToken>) -> StackResult<()> {
        run_cancellable(cancel, self.dialogs.accept(self.id, status)).await
    }

    /// Rejects an incoming INVITE with `status` and its default reason
    /// phrase (Section 4.3.8).
    pub async fn reject(&self, status: StatusCode, cancel: Option<&CancellationToken>) -> StackResult<()> {
        run_cancellable(cancel, self.dialogs.reject(self.id, status)).await
    }

    /// Rejects with a caller-supplied reason phrase.
    pub async fn reject_with_reason(
        &self,
        status: StatusCode,
        reason: impl Into<String>,
        cancel: Option<&CancellationToken>,
    ) -> StackResult<()> {
        run_cancellable(cancel, self.dialogs.reject_with_reason(self.id, status, reason)).await
    }

    /// Sends BYE, ending an established call (Section 4.3.8).
    pub async fn bye(&self, cancel: Option<&CancellationToken>) -> StackResult<()> {
        run_cancellable(
            cancel,
            self.dialogs.bye(self.id, self.transport.clone(), self.destination),
        )
        .await
    }

    /// Sends CANCEL for a still-ringing outgoing call (Section 4.2.6).
    pub async fn cancel_invite(&self, cancel: Option<&CancellationToken>) -> StackResult<()> {
        run_cancellable(
            cancel,
            self.dialogs.cancel(self.id, self.transport.clone(), self.destination),
        )
        .await
    }

    /// Sends a REFER (RFC 3515) and returns the subscription tracking its
    /// progress once the REFER itself is accepted (Section 4.3.7).
    pub async fn send_refer(
        &self,
        target: Uri,
        opts: ReferOptions,
        cancel: Option<&CancellationToken>,
    ) -> StackResult<Arc<ReferSubscription>> {
        run_cancellable(
            cancel,
            self.dialogs
                .send_refer(self.id, target, opts, self.transport.clone(), self.destination),
        )
        .await
    }

    /// Blocks for the REFER's final response (Section 4.3.7: `WaitRefer`).
    pub async fn wait_refer(
        &self,
        subscription: Arc<ReferSubscription>,
        cancel: Option<&CancellationToken>,
    ) -> StackResult<Arc<ReferSubscription>> {
        run_cancellable(cancel, wait_refer_result(&self.dialogs, subscription)).await
    }

    /// Subscribes to this dialog's state-change notifications. Ordering
    /// within one dialog matches the order transitions actually happened
    /// (Section 5); a receiver created after some transitions only sees
    /// ones that happen from here on, so call this promptly after creating
    /// or receiving the handle.
    pub fn on_state_change(&self) -> broadcast::Receiver<DialogState> {
        self.state_rx.resubscribe()
    }

    /// Subscribes to request bodies the stack delivers in this dialog
    /// (re-INVITE/UPDATE offers, INFO payloads, ...). REFER/NOTIFY bodies
    /// are not republished here; they drive the REFER subscription instead.
    pub fn on_body(&self) -> broadcast::Receiver<Vec<u8>> {
        self.body_rx.resubscribe()
    }
}

async fn wait_refer_result(
    dialogs: &DialogManager,
    subscription: Arc<ReferSubscription>,
) -> Result<Arc<ReferSubscription>, DialogError> {
    dialogs.wait_refer(subscription).await
}
