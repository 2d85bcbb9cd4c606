//! Orchestrates dialogs over the transaction layer (Sections 4.3, 6): owns
//! the dialog table, re-keys dialogs once their peer's tag is known, routes
//! inbound messages to the dialog (or server transaction) they belong to,
//! and exposes the operations a TU drives a dialog with (Accept, Reject,
//! Bye, SendRefer, ...).

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use uasip_sip_types::{CSeq, Message, Method, NameAddr, Request, Response, StatusCode, TypedHeader, Uri, Via};
use uasip_sip_transport::Transport;

use super::dialog_id::{DialogId, DialogKey};
use super::dialog_impl::Dialog;
use super::dialog_state::DialogState;
use super::dialog_utils::generate_tag;
use super::subscription::{parse_sipfrag_status, ReferSubscription, SubscriptionState};
use crate::errors::{DialogError, DialogResult};
use crate::transaction::manager::{RouteOutcome, TransactionManager};
use crate::transaction::{ServerInviteTransaction, TransactionEvent};

/// Events the manager reports upward to the TU (the `sip-stack` facade, or
/// a test harness standing in for it). Mirrors the five external
/// interfaces named in Section 6.
#[derive(Debug, Clone)]
pub enum DialogEvent {
    /// A new INVITE arrived with no matching dialog: the TU must Accept or
    /// Reject it. `source` is the address it arrived from, which a TU
    /// normally wants to remember as the destination for later in-dialog
    /// requests it originates (BYE, REFER, CANCEL).
    IncomingInvite { dialog: DialogId, request: Request, source: SocketAddr },
    /// An in-dialog request other than ACK/BYE arrived (REFER, re-INVITE,
    /// UPDATE, ...); the TU decides how to respond.
    IncomingRequest { dialog: DialogId, method: Method, request: Request },
    /// The peer sent BYE; the dialog is now `Terminated`.
    DialogTerminated { dialog: DialogId },
    /// A dialog's state changed, e.g. `Early` -> `Confirmed`.
    StateChanged { dialog: DialogId, state: DialogState },
    /// The INVITE this dialog started failed (non-2xx final, or Timer B/F).
    CallFailed { dialog: DialogId, status: Option<StatusCode> },
}

struct DialogEntry {
    dialog: Mutex<Dialog>,
}

/// Owns every dialog this UA instance currently knows about.
pub struct DialogManager {
    dialogs: DashMap<DialogKey, Arc<DialogEntry>>,
    by_id: DashMap<DialogId, DialogKey>,
    server_invites: DashMap<DialogId, ServerInviteTransaction>,
    /// INVITE branch -> dialog, so an incoming CANCEL (which is matched by
    /// branch at the transaction layer, never by dialog key) can still
    /// terminate the dialog it targets.
    invite_branch_to_dialog: DashMap<String, DialogId>,
    transactions: Arc<TransactionManager>,
    local_contact: Uri,
    events_tx: mpsc::Sender<DialogEvent>,
}

impl DialogManager {
    pub fn new(transactions: Arc<TransactionManager>, local_contact: Uri) -> (Arc<Self>, mpsc::Receiver<DialogEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Arc::new(DialogManager {
                dialogs: DashMap::new(),
                by_id: DashMap::new(),
                server_invites: DashMap::new(),
                invite_branch_to_dialog: DashMap::new(),
                transactions,
                local_contact,
                events_tx,
            }),
            events_rx,
        )
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    /// A read-only snapshot of a dialog's identity, for logging or for a
    /// TU that needs to build its own request against the dialog (e.g. a
    /// NOTIFY for an out-of-band REFER subscription it is driving).
    pub fn info(&self, id: DialogId) -> DialogResult<DialogInfo> {
        let entry = self.entry_by_id(id)?;
        let dialog = entry.dialog.lock();
        Ok(DialogInfo {
            call_id: dialog.call_id.clone(),
            local_uri: dialog.local_uri.clone(),
            remote_uri: dialog.remote_uri.clone(),
            local_tag: dialog.local_tag.clone(),
            remote_tag: dialog.remote_tag.clone(),
            remote_target: dialog.remote_target.clone(),
            state: dialog.state,
        })
    }

    /// Builds a request in this dialog's context (correct Call-ID, tags,
    /// route set, and next local CSeq) without sending it, for a TU-driven
    /// method the manager has no dedicated operation for (e.g. NOTIFY).
    pub fn build_request(&self, id: DialogId, method: Method) -> DialogResult<Request> {
        let entry = self.entry_by_id(id)?;
        let mut dialog = entry.dialog.lock();
        dialog.build_request(method)
    }

    fn insert(&self, dialog: Dialog) -> (DialogId, Arc<DialogEntry>) {
        let id = dialog.id;
        let key = dialog.provisional_key();
        let entry = Arc::new(DialogEntry {
            dialog: Mutex::new(dialog),
        });
        self.dialogs.insert(key.clone(), entry.clone());
        self.by_id.insert(id, key);
        (id, entry)
    }

    /// Re-keys a dialog once its peer's tag becomes known, per the
    /// exactly-once re-key rule in Section 4.3.2. No-op if the dialog is
    /// already keyed under `new_key`.
    fn rekey(&self, id: DialogId, new_key: DialogKey) {
        if let Some(old_key) = self.by_id.get(&id).map(|r| r.clone()) {
            if old_key == new_key {
                return;
            }
            if let Some((_, entry)) = self.dialogs.remove(&old_key) {
                self.dialogs.insert(new_key.clone(), entry);
                self.by_id.insert(id, new_key);
            }
        }
    }

    fn entry_by_id(&self, id: DialogId) -> DialogResult<Arc<DialogEntry>> {
        let key = self
            .by_id
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| DialogError::dialog_not_found(id.to_string()))?;
        self.dialogs
            .get(&key)
            .map(|r| r.clone())
            .ok_or_else(|| DialogError::dialog_not_found(id.to_string()))
    }

    /// Drops a `Terminated` dialog from every index (Section 3: "destroyed
    /// on `Terminated`") and closes any outstanding REFER subscription
    /// signal it was carrying (Section 5: dialog termination closes REFER
    /// subscription signals regardless of which side or path terminated
    /// it). Idempotent: a dialog already removed (e.g. by a concurrent
    /// termination path) is simply a no-op, and closing an already-closed
    /// subscription is harmless.
    fn remove_dialog(&self, id: DialogId) {
        if let Some((_, key)) = self.by_id.remove(&id) {
            if let Some((_, entry)) = self.dialogs.remove(&key) {
                let dialog = entry.dialog.lock();
                for sub in dialog.refer_subscriptions.values() {
                    sub.close();
                }
            }
        }
        self.server_invites.remove(&id);
    }

    /// Whether `request` matches a dialog this manager already tracks.
    /// Lets a TU (Section 6: `OnRequest`) tell an out-of-dialog request
    /// apart from one that belongs to an existing dialog, for methods this
    /// manager does not itself special-case (e.g. INFO, MESSAGE).
    pub fn has_dialog_for(&self, request: &Request) -> bool {
        Self::key_for_request(request, true)
            .map(|key| self.dialogs.contains_key(&key))
            .unwrap_or(false)
    }

    /// Derives the dialog key an in-dialog message belongs to. `inbound`
    /// flips which party's tag is "local": a dialog's own To/From swap
    /// depending on which side sent the message.
    fn key_for_request(request: &Request, inbound: bool) -> DialogResult<DialogKey> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::invalid_message("missing Call-ID"))?
            .to_string();
        let from = request.from_header().ok_or_else(|| DialogError::invalid_message("missing From"))?;
        let to = request.to_header().ok_or_else(|| DialogError::invalid_message("missing To"))?;
        let (local_tag, remote_tag) = if inbound {
            (to.tag().unwrap_or_default().to_string(), from.tag().unwrap_or_default().to_string())
        } else {
            (from.tag().unwrap_or_default().to_string(), to.tag().unwrap_or_default().to_string())
        };
        Ok(DialogKey::new(call_id, local_tag, remote_tag))
    }

    // ---- Outbound: starting a call -----------------------------------

    /// Starts a new UAC dialog with an INVITE (Section 6: `NewInvite`).
    pub fn new_invite(
        self: &Arc<Self>,
        local_uri: Uri,
        remote_uri: Uri,
        destination: SocketAddr,
        transport: Arc<dyn Transport>,
    ) -> DialogId {
        let call_id = uuid::Uuid::new_v4().to_string();
        let mut dialog = Dialog::new_uac(call_id, local_uri, remote_uri, self.local_contact.clone());
        let request = dialog
            .build_request(Method::Invite)
            .expect("fresh dialog cannot overflow CSeq");
        dialog.pending_invite_branch = request.via().and_then(|v| v.branch()).map(str::to_string);
        dialog.transition(DialogState::Trying).expect("Init -> Trying is always legal");

        let (id, entry) = self.insert(dialog);

        let (events_tx, events_rx) = mpsc::channel(16);
        self.transactions.send_invite(request.clone(), destination, transport.clone(), events_tx);

        let manager = self.clone();
        tokio::spawn(manager.drive_client_invite(id, entry, request, events_rx, transport, destination));

        id
    }

    async fn drive_client_invite(
        self: Arc<Self>,
        id: DialogId,
        entry: Arc<DialogEntry>,
        invite: Request,
        mut events_rx: mpsc::Receiver<TransactionEvent>,
        transport: Arc<dyn Transport>,
        destination: SocketAddr,
    ) {
        let invite_cseq = invite.cseq().map(|c| c.sequence).unwrap_or(1);

        while let Some(event) = events_rx.recv().await {
            match event {
                TransactionEvent::Provisional(response) => {
                    let state_change = {
                        let mut dialog = entry.dialog.lock();
                        if let Some(tag) = response.to_header().and_then(|to| to.tag()) {
                            dialog.set_remote_tag(tag.to_string());
                            self.rekey(id, dialog.key());
                        }
                        if dialog.state == DialogState::Trying {
                            let _ = dialog.transition(DialogState::Early);
                            Some(dialog.state)
                        } else {
                            None
                        }
                    };
                    if let Some(state) = state_change {
                        let _ = self.events_tx.send(DialogEvent::StateChanged { dialog: id, state }).await;
                    }
                }
                TransactionEvent::Success(response) => {
                    let (state, ack) = {
                        let mut dialog = entry.dialog.lock();
                        if let Some(tag) = response.to_header().and_then(|to| to.tag()) {
                            dialog.set_remote_tag(tag.to_string());
                            self.rekey(id, dialog.key());
                        }
                        dialog.freeze_route_set(response.record_routes(), true);
                        if let Some(contact) = response.contacts().and_then(|c| c.first()) {
                            dialog.refresh_remote_target(&contact.uri);
                        }
                        let _ = dialog.transition(DialogState::Confirmed);
                        (dialog.state, dialog.build_ack_for_2xx(invite_cseq))
                    };
                    let _ = transport.send_message(Message::Request(ack), destination).await;
                    let _ = self.events_tx.send(DialogEvent::StateChanged { dialog: id, state }).await;
                }
                TransactionEvent::Failure(response) => {
                    let mut dialog = entry.dialog.lock();
                    let _ = dialog.transition(DialogState::Terminated);
                    drop(dialog);
                    self.remove_dialog(id);
                    let _ = self
                        .events_tx
                        .send(DialogEvent::CallFailed { dialog: id, status: Some(response.status) })
                        .await;
                }
                TransactionEvent::Timeout => {
                    let mut dialog = entry.dialog.lock();
                    let _ = dialog.transition(DialogState::Terminated);
                    drop(dialog);
                    self.remove_dialog(id);
                    let _ = self.events_tx.send(DialogEvent::CallFailed { dialog: id, status: None }).await;
                }
                TransactionEvent::TransportError(err) => {
                    warn!(%err, "transport error on client INVITE");
                }
                TransactionEvent::Terminated => break,
            }
        }
    }

    /// Sends CANCEL for a still-ringing dialog (Section 4.2.6).
    pub async fn cancel(&self, id: DialogId, transport: Arc<dyn Transport>, destination: SocketAddr) -> DialogResult<()> {
        let branch = {
            let entry = self.entry_by_id(id)?;
            let dialog = entry.dialog.lock();
            dialog
                .pending_invite_branch
                .clone()
                .ok_or_else(|| DialogError::invalid_state("no pending INVITE to cancel"))?
        };
        let invite_txn = self
            .transactions
            .find_client_invite(&branch)
            .ok_or_else(|| DialogError::transaction_not_found(branch.clone()))?;
        if !invite_txn.can_cancel() {
            return Err(DialogError::invalid_state("INVITE is not yet Proceeding, cannot CANCEL"));
        }

        let cancel_request = {
            let entry = self.entry_by_id(id)?;
            let dialog = entry.dialog.lock();
            build_cancel(&dialog, &branch)
        };
        let (events_tx, _events_rx) = mpsc::channel(8);
        self.transactions.send_non_invite(cancel_request, destination, transport, events_tx);
        Ok(())
    }

    // ---- Inbound routing ------------------------------------------------

    /// Hands an inbound message to the transaction layer, then to whichever
    /// dialog (if any) it belongs to (Section 6: `OnRequest`).
    pub async fn handle_inbound(self: &Arc<Self>, message: Message, source: SocketAddr, transport: Arc<dyn Transport>) {
        match self.transactions.route_inbound(message, source).await {
            RouteOutcome::Delivered | RouteOutcome::Unmatched => {}
            RouteOutcome::NewServerRequest(request, source) => {
                self.handle_new_server_request(request, source, transport).await;
            }
            RouteOutcome::AckForSuccess(request, _source) => {
                self.handle_ack_for_success(request).await;
            }
        }
    }

    async fn handle_new_server_request(self: &Arc<Self>, request: Request, source: SocketAddr, transport: Arc<dyn Transport>) {
        match &request.method {
            Method::Invite => {
                let existing = Self::key_for_request(&request, true).ok().and_then(|key| self.dialogs.get(&key).map(|r| r.clone()));
                match existing {
                    Some(entry) => self.handle_reinvite(entry, request, source, transport).await,
                    None => self.handle_new_invite(request, source, transport).await,
                }
            }
            Method::Cancel => self.handle_cancel(request, source, transport).await,
            _ => self.handle_in_dialog_request(request, source, transport).await,
        }
    }

    /// A target-refreshing INVITE on an already-established dialog (Section
    /// 4.3.4). Unlike a brand-new INVITE this must not create a second
    /// dialog; it reuses the existing one, replacing its server INVITE
    /// transaction so Accept/Reject still resolve to the right transaction.
    async fn handle_reinvite(self: &Arc<Self>, entry: Arc<DialogEntry>, request: Request, source: SocketAddr, transport: Arc<dyn Transport>) {
        let dialog_id = entry.dialog.lock().id;
        let cseq = request.cseq().map(|c| c.sequence).unwrap_or(0);
        if let Err(e) = entry.dialog.lock().validate_incoming_cseq(cseq, &request.method) {
            warn!(error = %e, "rejecting out-of-order re-INVITE");
            let (events_tx, mut events_rx) = mpsc::channel(8);
            let txn = self.transactions.receive_invite(request, source, transport, true, events_tx);
            tokio::spawn(async move { while events_rx.recv().await.is_some() {} });
            txn.send_response(Response::for_status(StatusCode::SERVER_INTERNAL_ERROR)).await;
            return;
        }
        {
            let mut dialog = entry.dialog.lock();
            dialog.update_remote_cseq(cseq);
            if let Some(contact) = request.contacts().and_then(|c| c.first()) {
                dialog.refresh_remote_target(&contact.uri);
            }
        }

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let txn = self.transactions.receive_invite(request.clone(), source, transport, true, events_tx);
        tokio::spawn(async move { while events_rx.recv().await.is_some() {} });
        self.server_invites.insert(dialog_id, txn);

        let _ = self
            .events_tx
            .send(DialogEvent::IncomingRequest { dialog: dialog_id, method: Method::Invite, request })
            .await;
    }

    async fn handle_new_invite(self: &Arc<Self>, request: Request, source: SocketAddr, transport: Arc<dyn Transport>) {
        let dialog = match Dialog::new_uas(&request, self.local_contact.clone()) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "rejecting malformed INVITE");
                return;
            }
        };
        let (id, _entry) = self.insert(dialog);

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let txn = self.transactions.receive_invite(request.clone(), source, transport, true, events_tx);
        if let Some(branch) = request.via().and_then(|v| v.branch()) {
            self.invite_branch_to_dialog.insert(branch.to_string(), id);
        }
        self.server_invites.insert(id, txn);

        // Drain transaction-terminal events so the channel doesn't back up;
        // dialog-level ACK handling arrives separately via AckForSuccess.
        tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

        let _ = self.events_tx.send(DialogEvent::IncomingInvite { dialog: id, request, source }).await;
    }

    async fn handle_cancel(self: &Arc<Self>, request: Request, source: SocketAddr, transport: Arc<dyn Transport>) {
        let branch = request.via().and_then(|v| v.branch()).unwrap_or_default().to_string();

        let mut ok = Response::new(StatusCode::OK, "");
        copy_dialog_headers(&request, &mut ok);
        let _ = transport.send_message(Message::Response(ok), source).await;

        if let Some(invite_txn) = self.transactions.find_server_invite(&branch) {
            let terminated = Response::for_status(StatusCode::REQUEST_TERMINATED);
            invite_txn.send_response(terminated).await;
        }

        if let Some((_, dialog_id)) = self.invite_branch_to_dialog.remove(&branch) {
            if let Ok(entry) = self.entry_by_id(dialog_id) {
                let mut dialog = entry.dialog.lock();
                let _ = dialog.transition(DialogState::Terminated);
                drop(dialog);
                self.remove_dialog(dialog_id);
                let _ = self.events_tx.send(DialogEvent::CallFailed { dialog: dialog_id, status: Some(StatusCode::REQUEST_TERMINATED) }).await;
            }
        }
    }

    async fn handle_in_dialog_request(self: &Arc<Self>, request: Request, source: SocketAddr, transport: Arc<dyn Transport>) {
        let key = match Self::key_for_request(&request, true) {
            Ok(k) => k,
            Err(e) => {
                warn!(error = %e, "dropping in-dialog request with malformed headers");
                return;
            }
        };
        let Some(entry) = self.dialogs.get(&key).map(|r| r.clone()) else {
            debug!(%key, method = %request.method, "no dialog for in-dialog request");
            return;
        };

        let dialog_id = entry.dialog.lock().id;
        let cseq = request.cseq().map(|c| c.sequence).unwrap_or(0);
        if let Err(e) = entry.dialog.lock().validate_incoming_cseq(cseq, &request.method) {
            warn!(error = %e, "rejecting out-of-order in-dialog request");
            return;
        }
        entry.dialog.lock().update_remote_cseq(cseq);

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let txn = self.transactions.receive_non_invite(request.clone(), source, transport, events_tx);
        tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

        match &request.method {
            Method::Bye => {
                txn.send_response(Response::new(StatusCode::OK, "")).await;
                let mut dialog = entry.dialog.lock();
                let _ = dialog.transition(DialogState::Terminating);
                let _ = dialog.transition(DialogState::Terminated);
                drop(dialog);
                self.remove_dialog(dialog_id);
                let _ = self.events_tx.send(DialogEvent::DialogTerminated { dialog: dialog_id }).await;
            }
            Method::Notify => {
                txn.send_response(Response::new(StatusCode::OK, "")).await;
                self.handle_notify(&entry, &request).await;
            }
            _ => {
                txn.send_response(Response::for_status(StatusCode::ACCEPTED)).await;
                let _ = self
                    .events_tx
                    .send(DialogEvent::IncomingRequest { dialog: dialog_id, method: request.method.clone(), request })
                    .await;
            }
        }
    }

    async fn handle_notify(&self, entry: &Arc<DialogEntry>, request: &Request) {
        let state = match request.header(uasip_sip_types::HeaderName::SubscriptionState) {
            Some(TypedHeader::SubscriptionState { state, .. }) => SubscriptionState::from_token(state),
            _ => SubscriptionState::Active,
        };
        let status = parse_sipfrag_status(&request.body);

        let sub = entry.dialog.lock().find_refer_subscription(None);
        if let Some(sub) = sub {
            sub.apply_notify(state, status).await;
        }
    }

    async fn handle_ack_for_success(&self, request: Request) {
        let Ok(key) = Self::key_for_request(&request, true) else {
            return;
        };
        if let Some(entry) = self.dialogs.get(&key) {
            let mut dialog = entry.dialog.lock();
            dialog.ack_received = true;
            if matches!(dialog.state, DialogState::Early | DialogState::Trying) {
                let _ = dialog.transition(DialogState::Confirmed);
            }
        }
    }

    // ---- TU-driven operations (Section 6) ------------------------------

    /// Accepts an incoming INVITE with `status` (typically 200 OK).
    pub async fn accept(&self, id: DialogId, status: StatusCode) -> DialogResult<()> {
        self.answer_invite(id, status, None).await
    }

    /// Rejects an incoming INVITE with a non-2xx final response, using the
    /// status code's default reason phrase.
    pub async fn reject(&self, id: DialogId, status: StatusCode) -> DialogResult<()> {
        self.answer_invite(id, status, None).await
    }

    /// Rejects an incoming INVITE with a caller-supplied reason phrase
    /// (Section 4.3.8: `Reject(code, reason)`).
    pub async fn reject_with_reason(&self, id: DialogId, status: StatusCode, reason: impl Into<String>) -> DialogResult<()> {
        self.answer_invite(id, status, Some(reason.into())).await
    }

    async fn answer_invite(&self, id: DialogId, status: StatusCode, reason: Option<String>) -> DialogResult<()> {
        let txn = self
            .server_invites
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| DialogError::transaction_not_found(id.to_string()))?;
        let entry = self.entry_by_id(id)?;

        let mut response = match reason {
            Some(reason) => Response::new(status, reason),
            None => Response::for_status(status),
        };
        let mut event_to_send = None;
        let mut dialog_done = false;
        {
            let mut dialog = entry.dialog.lock();
            if dialog.local_tag.is_empty() {
                dialog.set_local_tag(generate_tag());
                self.rekey(id, dialog.key());
            }

            let mut to = NameAddr::new(dialog.local_uri.clone());
            to.set_tag(dialog.local_tag.clone());
            response.push_header(TypedHeader::To(to));

            if status.is_success() || status.is_provisional() {
                response.push_header(TypedHeader::Contact(vec![NameAddr::new(dialog.local_contact.clone())]));
            }

            if status.is_success() {
                // A re-INVITE's 200 OK finds the dialog already `Confirmed`;
                // only attempt the transition the first time (Section
                // 4.3.1: Confirmed -> Confirmed is not a listed edge).
                if dialog.state != DialogState::Confirmed {
                    let _ = dialog.transition(DialogState::Confirmed);
                    event_to_send = Some(DialogEvent::StateChanged { dialog: id, state: DialogState::Confirmed });
                }
                dialog.last_sent_2xx = Some(response.clone());
                if let Some(branch) = &dialog.pending_invite_branch {
                    self.invite_branch_to_dialog.remove(branch);
                }
            } else if status.is_provisional() {
                if dialog.state == DialogState::Trying {
                    let _ = dialog.transition(DialogState::Early);
                    event_to_send = Some(DialogEvent::StateChanged { dialog: id, state: DialogState::Early });
                }
            } else if dialog.state == DialogState::Confirmed {
                // Rejecting a re-INVITE fails that request only; the
                // dialog it refreshed stays `Confirmed` (Section 4.3.1
                // has no dialog-level edge triggered by a failed re-INVITE).
            } else {
                let _ = dialog.transition(DialogState::Terminated);
                if let Some(branch) = &dialog.pending_invite_branch {
                    self.invite_branch_to_dialog.remove(branch);
                }
                event_to_send = Some(DialogEvent::CallFailed { dialog: id, status: Some(status) });
                dialog_done = true;
            }
        }

        if dialog_done {
            self.remove_dialog(id);
        }
        if let Some(event) = event_to_send {
            let _ = self.events_tx.send(event).await;
        }

        txn.send_response(response).await;
        Ok(())
    }

    /// Sends BYE for an established dialog.
    pub async fn bye(self: &Arc<Self>, id: DialogId, transport: Arc<dyn Transport>, destination: SocketAddr) -> DialogResult<()> {
        let entry = self.entry_by_id(id)?;
        let request = {
            let mut dialog = entry.dialog.lock();
            if dialog.is_terminated() {
                return Err(DialogError::dialog_terminated(id.to_string()));
            }
            let request = dialog.build_request(Method::Bye)?;
            let _ = dialog.transition(DialogState::Terminating);
            request
        };
        let (events_tx, mut events_rx) = mpsc::channel(8);
        self.transactions.send_non_invite(request, destination, transport, events_tx);

        let manager = self.clone();
        let entry_for_task = entry.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    TransactionEvent::Success(_) | TransactionEvent::Timeout => {
                        let mut dialog = entry_for_task.dialog.lock();
                        let _ = dialog.transition(DialogState::Terminated);
                        drop(dialog);
                        manager.remove_dialog(id);
                        let _ = manager.events_tx.send(DialogEvent::DialogTerminated { dialog: id }).await;
                    }
                    TransactionEvent::Terminated => break,
                    _ => {}
                }
            }
        });
        Ok(())
    }

    /// Sends a REFER (RFC 3515) and returns the subscription handle
    /// tracking its progress. Returns as soon as the request is sent; call
    /// [`DialogManager::wait_refer`] to block for the final response
    /// (Section 4.3.7: `SendRefer` / `WaitRefer` are separate operations).
    pub async fn send_refer(
        &self,
        id: DialogId,
        refer_to: Uri,
        opts: ReferOptions,
        transport: Arc<dyn Transport>,
        destination: SocketAddr,
    ) -> DialogResult<Arc<ReferSubscription>> {
        let entry = self.entry_by_id(id)?;

        if entry.dialog.lock().has_pending_refer() {
            return Err(DialogError::ReferPending);
        }

        let sub_id = uuid::Uuid::new_v4().to_string();
        let (subscription, _progress_rx) = ReferSubscription::new(sub_id);
        let subscription = Arc::new(subscription);

        let mut request = {
            let mut dialog = entry.dialog.lock();
            let request = dialog.build_request(Method::Refer)?;
            dialog.insert_refer_subscription(subscription.clone());
            request
        };
        let refer_to = match &opts.replaces {
            Some(replaces) => refer_to.with_header("Replaces", replaces.clone()),
            None => refer_to,
        };
        request.push_header(TypedHeader::ReferTo(NameAddr::new(refer_to)));
        if opts.no_subscription {
            request.push_header(TypedHeader::Other { name: "Refer-Sub".to_string(), value: "false".to_string() });
        }

        let (events_tx, mut events_rx) = mpsc::channel(8);
        self.transactions.send_non_invite(request, destination, transport, events_tx);
        let sub_for_task = subscription.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    TransactionEvent::Success(_) => sub_for_task.activate(),
                    TransactionEvent::Failure(_) | TransactionEvent::Timeout => sub_for_task.reject(),
                    TransactionEvent::Terminated => break,
                    _ => {}
                }
            }
        });

        Ok(subscription)
    }

    /// Blocks for the final response to an outstanding REFER (Section
    /// 4.3.7: `WaitRefer`). Returns the subscription once active, or
    /// [`DialogError::ReferRejected`] if the REFER got a non-2xx.
    pub async fn wait_refer(&self, subscription: Arc<ReferSubscription>) -> DialogResult<Arc<ReferSubscription>> {
        subscription.wait_settled().await;
        if subscription.was_rejected() {
            let status = subscription.last_status().map(|s| s.to_string()).unwrap_or_else(|| "no response".into());
            return Err(DialogError::ReferRejected(status));
        }
        Ok(subscription)
    }
}

/// Snapshot returned by [`DialogManager::info`].
#[derive(Debug, Clone)]
pub struct DialogInfo {
    pub call_id: String,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    pub local_tag: String,
    pub remote_tag: String,
    pub remote_target: Uri,
    pub state: DialogState,
}

/// Options for [`DialogManager::send_refer`] (Section 4.3.7).
#[derive(Debug, Clone, Default)]
pub struct ReferOptions {
    /// Sets `Refer-Sub: false` (RFC 4488): no implicit subscription.
    pub no_subscription: bool,
    /// Pre-encoded `Replaces` value (RFC 3891) embedded in `Refer-To` for
    /// attended transfer, e.g. `"<call-id>;to-tag=<tag>;from-tag=<tag>"`.
    pub replaces: Option<String>,
}

/// Builds a CANCEL matching the outstanding INVITE's branch, Call-ID, tags,
/// and CSeq number (Section 4.2.6: CANCEL reuses the INVITE's branch so the
/// UAS can match it to the INVITE it targets).
fn build_cancel(dialog: &Dialog, branch: &str) -> Request {
    let mut cancel = Request::new(Method::Cancel, dialog.remote_target.clone());
    cancel.push_header(TypedHeader::Via(Via::new("UDP", "0.0.0.0:0", branch.to_string())));
    let mut from = NameAddr::new(dialog.local_uri.clone());
    from.set_tag(dialog.local_tag.clone());
    cancel.push_header(TypedHeader::From(from));
    cancel.push_header(TypedHeader::To(NameAddr::new(dialog.remote_uri.clone())));
    cancel.push_header(TypedHeader::CallId(dialog.call_id.clone()));
    cancel.push_header(TypedHeader::CSeq(CSeq {
        sequence: dialog.local_cseq,
        method: Method::Cancel,
    }));
    cancel.push_header(TypedHeader::MaxForwards(70));
    cancel
}

/// Copies Via/From/To/Call-ID/CSeq from `request` onto `response`, the
/// minimum needed for a CANCEL 200 OK to match back up at the peer.
fn copy_dialog_headers(request: &Request, response: &mut Response) {
    if let Some(via) = request.via() {
        response.push_header(TypedHeader::Via(via.clone()));
    }
    if let Some(from) = request.from_header() {
        response.push_header(TypedHeader::From(from.clone()));
    }
    if let Some(to) = request.to_header() {
        response.push_header(TypedHeader::To(to.clone()));
    }
    if let Some(call_id) = request.call_id() {
        response.push_header(TypedHeader::CallId(call_id.to_string()));
    }
    if let Some(cseq) = request.cseq() {
        response.push_header(TypedHeader::CSeq(*cseq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_for_request_swaps_tags_for_inbound_vs_outbound() {
        let mut request = Request::new(Method::Bye, Uri::parse("sip:bob@example.com").unwrap());
        request.push_header(TypedHeader::CallId("call-1".to_string()));
        let mut from = NameAddr::new(Uri::parse("sip:alice@example.com").unwrap());
        from.set_tag("ta");
        request.push_header(TypedHeader::From(from));
        let mut to = NameAddr::new(Uri::parse("sip:bob@example.com").unwrap());
        to.set_tag("tb");
        request.push_header(TypedHeader::To(to));

        let inbound = DialogManager::key_for_request(&request, true).unwrap();
        assert_eq!(inbound.local_tag, "tb");
        assert_eq!(inbound.remote_tag, "ta");

        let outbound = DialogManager::key_for_request(&request, false).unwrap();
        assert_eq!(outbound.local_tag, "ta");
        assert_eq!(outbound.remote_tag, "tb");
    }
}
