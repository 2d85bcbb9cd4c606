//! The [`Dialog`] value: the RFC 3261 dialog state, its CSeq counters,
//! route set, and remote target, plus the pure (non-I/O) logic that keeps
//! them consistent (Section 4.3). Sending and receiving lives one layer up,
//! in [`super::manager::DialogManager`]; this module never touches a
//! transport or a transaction.

use std::collections::HashMap;
use std::sync::Arc;

use uasip_sip_types::{CSeq, HeaderName, Method, NameAddr, Request, Response, TypedHeader, Uri};

use crate::dialog::dialog_id::{DialogId, DialogKey};
use crate::dialog::dialog_state::DialogState;
use crate::dialog::dialog_utils::{extract_uri_from_contact, generate_branch, generate_initial_cseq, generate_tag};
use crate::dialog::subscription::ReferSubscription;
use crate::errors::{DialogError, DialogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogRole {
    Uac,
    Uas,
}

/// An RFC 3261 dialog (Section 3 data model). Mutable state is gathered
/// here so [`super::manager::DialogManager`] can guard the whole thing
/// with one per-dialog lock, matching the "per-object lock" rule in
/// Section 5.
pub struct Dialog {
    pub id: DialogId,
    pub role: DialogRole,
    pub state: DialogState,

    pub call_id: String,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    pub local_tag: String,
    pub remote_tag: String,

    pub local_cseq: u32,
    pub remote_cseq: Option<u32>,

    pub remote_target: Uri,
    pub local_contact: Uri,

    route_set: Vec<Uri>,
    route_set_frozen: bool,

    /// Branch of the outstanding (client) INVITE transaction, retained so a
    /// CANCEL can reuse it (Section 3 invariant).
    pub pending_invite_branch: Option<String>,

    /// The 2xx this UAS last sent to the peer's INVITE, cached so it can be
    /// retransmitted at the dialog layer until ACK arrives (Section 4.3.8);
    /// the INVITE server transaction itself has already terminated by then.
    pub last_sent_2xx: Option<Response>,
    pub ack_received: bool,

    pub refer_subscriptions: HashMap<String, Arc<ReferSubscription>>,
}

impl Dialog {
    /// Builds the UAC side of a not-yet-sent dialog: `Init`, with our own
    /// tag assigned and the remote tag still unknown.
    pub fn new_uac(call_id: impl Into<String>, local_uri: Uri, remote_uri: Uri, local_contact: Uri) -> Self {
        let remote_target = remote_uri.clone();
        Dialog {
            id: DialogId::new(),
            role: DialogRole::Uac,
            state: DialogState::Init,
            call_id: call_id.into(),
            local_uri,
            remote_uri,
            local_tag: generate_tag(),
            remote_tag: String::new(),
            local_cseq: generate_initial_cseq(),
            remote_cseq: None,
            remote_target,
            local_contact,
            route_set: Vec::new(),
            route_set_frozen: false,
            pending_invite_branch: None,
            last_sent_2xx: None,
            ack_received: false,
            refer_subscriptions: HashMap::new(),
        }
    }

    /// Builds the UAS side of a dialog from a freshly-received INVITE:
    /// `Trying`, remote tag known immediately (the request's `From` tag),
    /// our own tag not yet assigned, route set frozen as-is from the
    /// request's `Record-Route` (Section 4.3.5).
    pub fn new_uas(request: &Request, local_contact: Uri) -> DialogResult<Self> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::invalid_message("missing Call-ID"))?
            .to_string();
        let from = request
            .from_header()
            .ok_or_else(|| DialogError::invalid_message("missing From"))?;
        let to = request
            .to_header()
            .ok_or_else(|| DialogError::invalid_message("missing To"))?;
        let cseq = request
            .cseq()
            .ok_or_else(|| DialogError::invalid_message("missing CSeq"))?;
        let remote_tag = from
            .tag()
            .ok_or_else(|| DialogError::invalid_message("INVITE From missing tag"))?
            .to_string();

        let remote_target = request
            .contacts()
            .and_then(|c| c.first())
            .map(extract_uri_from_contact)
            .transpose()?
            .unwrap_or_else(|| from.uri.clone());

        let mut dialog = Dialog {
            id: DialogId::new(),
            role: DialogRole::Uas,
            state: DialogState::Trying,
            call_id,
            local_uri: to.uri.clone(),
            remote_uri: from.uri.clone(),
            local_tag: String::new(),
            remote_tag,
            local_cseq: generate_initial_cseq(),
            remote_cseq: Some(cseq.sequence),
            remote_target,
            local_contact,
            route_set: Vec::new(),
            route_set_frozen: false,
            pending_invite_branch: request.via().and_then(|v| v.branch()).map(str::to_string),
            last_sent_2xx: None,
            ack_received: false,
            refer_subscriptions: HashMap::new(),
        };
        dialog.freeze_route_set(request.record_routes(), false);
        Ok(dialog)
    }

    pub fn key(&self) -> DialogKey {
        DialogKey::new(self.call_id.clone(), self.local_tag.clone(), self.remote_tag.clone())
    }

    /// The provisional key this dialog is stored under until its other
    /// side's tag becomes known (Section 4.3.2).
    pub fn provisional_key(&self) -> DialogKey {
        match self.role {
            DialogRole::Uac => DialogKey::provisional(self.call_id.clone(), self.local_tag.clone()),
            DialogRole::Uas => DialogKey::provisional_remote(self.call_id.clone(), self.remote_tag.clone()),
        }
    }

    pub fn is_fully_keyed(&self) -> bool {
        !self.local_tag.is_empty() && !self.remote_tag.is_empty()
    }

    /// Applies the legal-transition check from Section 4.3.1.
    pub fn transition(&mut self, next: DialogState) -> DialogResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DialogError::invalid_state(format!(
                "cannot transition dialog from {} to {next}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Sets the remote tag the first time it becomes known (the UAC
    /// learning it from a tag-bearing response). Triggers the one-time
    /// re-key in the manager; this method only updates local state.
    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        if self.remote_tag.is_empty() {
            self.remote_tag = tag.into();
        }
    }

    /// Assigns our own tag the first time the UAS sends a tag-bearing
    /// response.
    pub fn set_local_tag(&mut self, tag: impl Into<String>) {
        if self.local_tag.is_empty() {
            self.local_tag = tag.into();
        }
    }

    pub fn route_set(&self) -> &[Uri] {
        &self.route_set
    }

    /// Freezes the route set exactly once (Section 4.3.5). `reverse` is
    /// true for the UAC path (Record-Route of the response, reversed);
    /// false for the UAS path (Record-Route of the request, as-is).
    pub fn freeze_route_set(&mut self, record_routes: Vec<Uri>, reverse: bool) {
        if self.route_set_frozen {
            return;
        }
        self.route_set = if reverse {
            record_routes.into_iter().rev().collect()
        } else {
            record_routes
        };
        self.route_set_frozen = true;
    }

    /// Refreshes the remote target from `Contact`, per the message classes
    /// named in Section 4.3.4. Callers gate this on the response/request
    /// class; this method just performs the replacement.
    pub fn refresh_remote_target(&mut self, contact: &Uri) {
        self.remote_target = contact.clone();
    }

    /// Allocates the next local CSeq for a new in-dialog request (Section
    /// 4.3.3 step 1): the dialog's initial CSeq is a random 31-bit value
    /// (Section 9), each request after that increments by one. Rejects at
    /// the `u32::MAX` boundary rather than silently wrapping (Section 8
    /// boundary property).
    pub fn next_local_cseq(&mut self) -> DialogResult<u32> {
        if self.local_cseq == u32::MAX {
            return Err(DialogError::invalid_state("local CSeq would overflow u32"));
        }
        let cseq = self.local_cseq;
        self.local_cseq += 1;
        Ok(cseq)
    }

    /// Validates an incoming in-dialog request's CSeq (Section 4.3.6).
    /// Retransmissions (equal number) and ACK are accepted; anything lower
    /// than the stored remote CSeq is rejected.
    pub fn validate_incoming_cseq(&self, cseq: u32, method: &Method) -> DialogResult<()> {
        if *method == Method::Ack {
            return Ok(());
        }
        if let Some(remote_cseq) = self.remote_cseq {
            if cseq < remote_cseq {
                return Err(DialogError::cseq_out_of_order(format!(
                    "incoming CSeq {cseq} precedes stored {remote_cseq}"
                )));
            }
        }
        Ok(())
    }

    pub fn update_remote_cseq(&mut self, cseq: u32) {
        match self.remote_cseq {
            Some(current) if cseq <= current => {}
            _ => self.remote_cseq = Some(cseq),
        }
    }

    /// Builds a new in-dialog request per the route-set rules of Section
    /// 4.3.3. Does not send it; that is the manager's job, once it also has
    /// a transaction to hand the request to.
    pub fn build_request(&mut self, method: Method) -> DialogResult<Request> {
        let cseq_number = self.next_local_cseq()?;
        self.build_request_with_cseq(method, cseq_number)
    }

    fn build_request_with_cseq(&self, method: Method, cseq_number: u32) -> DialogResult<Request> {
        let (request_uri, route_headers) = self.route_headers_for_request();

        let mut request = Request::new(method.clone(), request_uri);

        let branch = generate_branch();
        request.push_header(TypedHeader::Via(uasip_sip_types::Via::new("UDP", "0.0.0.0:0", branch)));

        let mut from = NameAddr::new(self.local_uri.clone());
        from.set_tag(self.local_tag.clone());
        request.push_header(TypedHeader::From(from));

        let mut to = NameAddr::new(self.remote_uri.clone());
        if !self.remote_tag.is_empty() {
            to.set_tag(self.remote_tag.clone());
        }
        request.push_header(TypedHeader::To(to));

        request.push_header(TypedHeader::CallId(self.call_id.clone()));
        request.push_header(TypedHeader::CSeq(CSeq {
            sequence: cseq_number,
            method: method.clone(),
        }));
        request.push_header(TypedHeader::MaxForwards(70));

        for route in route_headers {
            request.push_header(TypedHeader::Route(vec![route]));
        }

        if method.is_target_refresh() {
            request.push_header(TypedHeader::Contact(vec![NameAddr::new(self.local_contact.clone())]));
        }

        Ok(request)
    }

    /// Section 4.3.3 step 2: derive the request-URI and the `Route` headers
    /// (in order) to attach, from the frozen route set and remote target.
    fn route_headers_for_request(&self) -> (Uri, Vec<Uri>) {
        match self.route_set.split_first() {
            None => (self.remote_target.clone(), Vec::new()),
            Some((first, rest)) if first.is_loose_routing() => {
                let mut routes = vec![first.clone()];
                routes.extend(rest.iter().cloned());
                (self.remote_target.clone(), routes)
            }
            Some((first, rest)) => {
                let mut routes: Vec<Uri> = rest.to_vec();
                routes.push(self.remote_target.clone());
                (first.clone(), routes)
            }
        }
    }

    /// Builds the ACK for a 2xx response (Section 4.3.3): a dialog-level
    /// request, not a transaction (Section 9). Reuses the INVITE's CSeq
    /// number with method `ACK`, a fresh Via branch, and the response's To
    /// tag.
    pub fn build_ack_for_2xx(&self, invite_cseq: u32) -> Request {
        let mut ack = Request::new(Method::Ack, self.remote_target.clone());

        let branch = generate_branch();
        ack.push_header(TypedHeader::Via(uasip_sip_types::Via::new("UDP", "0.0.0.0:0", branch)));

        let mut from = NameAddr::new(self.local_uri.clone());
        from.set_tag(self.local_tag.clone());
        ack.push_header(TypedHeader::From(from));

        let mut to = NameAddr::new(self.remote_uri.clone());
        to.set_tag(self.remote_tag.clone());
        ack.push_header(TypedHeader::To(to));

        ack.push_header(TypedHeader::CallId(self.call_id.clone()));
        ack.push_header(TypedHeader::CSeq(CSeq {
            sequence: invite_cseq,
            method: Method::Ack,
        }));
        ack.push_header(TypedHeader::MaxForwards(70));

        for route in &self.route_set {
            ack.push_header(TypedHeader::Route(vec![route.clone()]));
        }

        ack
    }

    pub fn is_terminated(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_pending_refer(&self) -> bool {
        self.refer_subscriptions
            .values()
            .any(|s| s.state() != crate::dialog::subscription::SubscriptionState::Terminated)
    }

    pub fn insert_refer_subscription(&mut self, sub: Arc<ReferSubscription>) {
        self.refer_subscriptions.insert(sub.id.clone(), sub);
    }

    pub fn find_refer_subscription(&self, id: Option<&str>) -> Option<Arc<ReferSubscription>> {
        match id {
            Some(id) => self.refer_subscriptions.get(id).cloned(),
            None => {
                if self.refer_subscriptions.len() == 1 {
                    self.refer_subscriptions.values().next().cloned()
                } else {
                    // No id and more than one outstanding subscription: fall
                    // back to the most recently inserted isn't tracked, so
                    // pick any non-terminated one (Section 3: normally at
                    // most one is active anyway).
                    self.refer_subscriptions
                        .values()
                        .find(|s| s.state() != crate::dialog::subscription::SubscriptionState::Terminated)
                        .cloned()
                }
            }
        }
    }
}

/// Extracts a header that must be present or fails with `invalid_message`.
pub fn require_header_present<'a>(request: &'a Request, name: HeaderName) -> DialogResult<&'a TypedHeader> {
    request
        .header(name)
        .ok_or_else(|| DialogError::invalid_message(format!("missing {name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uasip_sip_types::Uri;

    fn uac_dialog() -> Dialog {
        Dialog::new_uac(
            "call-1",
            Uri::parse("sip:alice@example.com").unwrap(),
            Uri::parse("sip:bob@example.com").unwrap(),
            Uri::parse("sip:alice@10.0.0.1:5060").unwrap(),
        )
    }

    #[test]
    fn new_uac_dialog_has_local_tag_and_no_remote_tag() {
        let dialog = uac_dialog();
        assert!(!dialog.local_tag.is_empty());
        assert!(dialog.remote_tag.is_empty());
        assert_eq!(dialog.state, DialogState::Init);
    }

    #[test]
    fn local_cseq_strictly_increases() {
        let mut dialog = uac_dialog();
        let first = dialog.next_local_cseq().unwrap();
        let second = dialog.next_local_cseq().unwrap();
        assert!(second > first);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn cseq_overflow_is_rejected_not_wrapped() {
        let mut dialog = uac_dialog();
        dialog.local_cseq = u32::MAX;
        assert!(dialog.next_local_cseq().is_err());
    }

    #[test]
    fn route_set_freezes_exactly_once() {
        let mut dialog = uac_dialog();
        let first = vec![Uri::parse("sip:p1.example.com;lr").unwrap()];
        let second = vec![Uri::parse("sip:p2.example.com;lr").unwrap()];
        dialog.freeze_route_set(first.clone(), true);
        dialog.freeze_route_set(second, true);
        assert_eq!(dialog.route_set(), first.into_iter().rev().collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn loose_routing_keeps_remote_target_as_request_uri() {
        let mut dialog = uac_dialog();
        dialog.remote_target = Uri::parse("sip:bob@1.2.3.4").unwrap();
        dialog.freeze_route_set(
            vec![
                Uri::parse("sip:p1.example.com;lr").unwrap(),
                Uri::parse("sip:p2.example.com;lr").unwrap(),
            ],
            false,
        );
        dialog.remote_tag = "tb".to_string();

        let request = dialog.build_request(Method::Invite).unwrap();
        assert_eq!(request.uri, Uri::parse("sip:bob@1.2.3.4").unwrap());
        assert_eq!(request.routes().len(), 2);
    }

    #[test]
    fn strict_routing_appends_remote_target_as_last_route() {
        let mut dialog = uac_dialog();
        dialog.remote_target = Uri::parse("sip:bob@1.2.3.4").unwrap();
        dialog.freeze_route_set(vec![Uri::parse("sip:p1.example.com").unwrap()], false);
        dialog.remote_tag = "tb".to_string();

        let request = dialog.build_request(Method::Bye).unwrap();
        assert_eq!(request.uri, Uri::parse("sip:p1.example.com").unwrap());
        let routes = request.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0], Uri::parse("sip:bob@1.2.3.4").unwrap());
    }

    #[test]
    fn cseq_validation_rejects_decrease_but_allows_retransmit() {
        let mut dialog = uac_dialog();
        dialog.update_remote_cseq(5);
        assert!(dialog.validate_incoming_cseq(5, &Method::Bye).is_ok());
        assert!(dialog.validate_incoming_cseq(4, &Method::Bye).is_err());
        assert!(dialog.validate_incoming_cseq(6, &Method::Bye).is_ok());
        assert!(dialog.validate_incoming_cseq(4, &Method::Ack).is_ok());
    }
}
