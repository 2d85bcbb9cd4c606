//! CANCEL of a ringing INVITE (Section 4.2.6) and rejection of in-dialog
//! requests with a decreasing CSeq (Section 4.3.6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use uasip_dialog_core::{DialogEvent, DialogManager, DialogState, TransactionManager};
use uasip_sip_transport::factory::TransportType;
use uasip_sip_transport::manager::TransportManager;
use uasip_sip_transport::transport::{Transport, TransportEvent};
use uasip_sip_types::{CSeq, Method, StatusCode, TypedHeader, Uri};

struct Agent {
    addr: SocketAddr,
    transport: Arc<TransportManager>,
    dialogs: Arc<DialogManager>,
    events: mpsc::Receiver<DialogEvent>,
}

impl Agent {
    async fn bind(contact_user: &str) -> Self {
        let (tm, transport_rx) = TransportManager::with_defaults().await.unwrap();
        let tm = Arc::new(tm);
        let addr = tm.create_transport(TransportType::Udp, "127.0.0.1:0".parse().unwrap()).await.unwrap();

        let contact = Uri::parse(&format!("sip:{contact_user}@{addr}")).unwrap();
        let (dialogs, events) = DialogManager::new(TransactionManager::new(), contact);

        let dialogs_for_bridge = dialogs.clone();
        let tm_for_bridge = tm.clone();
        tokio::spawn(async move {
            let mut rx = transport_rx;
            while let Some(event) = rx.recv().await {
                if let TransportEvent::MessageReceived { message, source, .. } = event {
                    let handle = tm_for_bridge.transport(TransportType::Udp).unwrap();
                    dialogs_for_bridge.handle_inbound(message, source, handle).await;
                }
            }
        });

        Agent { addr, transport: tm, dialogs, events }
    }

    fn transport_handle(&self) -> Arc<dyn Transport> {
        self.transport.transport(TransportType::Udp).unwrap()
    }

    async fn recv(&mut self) -> DialogEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for dialog event")
            .expect("dialog event channel closed")
    }
}

#[tokio::test]
async fn cancel_after_ringing_terminates_both_sides_with_487() {
    let mut uac = Agent::bind("alice").await;
    let mut uas = Agent::bind("bob").await;

    let local_uri = Uri::parse("sip:alice@uac.example").unwrap();
    let remote_uri = Uri::parse(&format!("sip:bob@{}", uas.addr)).unwrap();
    let uac_id = uac.dialogs.new_invite(local_uri, remote_uri, uas.addr, uac.transport_handle());

    let uas_id = match uas.recv().await {
        DialogEvent::IncomingInvite { dialog, .. } => dialog,
        other => panic!("expected IncomingInvite, got {other:?}"),
    };

    // Ring before the caller hangs up: CANCEL is only valid once the
    // client INVITE transaction has seen a provisional response.
    uas.dialogs.accept(uas_id, StatusCode::RINGING).await.unwrap();
    assert!(matches!(uac.recv().await, DialogEvent::StateChanged { state: DialogState::Early, .. }));
    assert!(matches!(uas.recv().await, DialogEvent::StateChanged { state: DialogState::Early, .. }));

    uac.dialogs.cancel(uac_id, uac.transport_handle(), uas.addr).await.unwrap();

    match uas.recv().await {
        DialogEvent::CallFailed { status, .. } => assert_eq!(status, Some(StatusCode::REQUEST_TERMINATED)),
        other => panic!("expected CallFailed on the UAS side, got {other:?}"),
    }
    match uac.recv().await {
        DialogEvent::CallFailed { status, .. } => assert_eq!(status, Some(StatusCode::REQUEST_TERMINATED)),
        other => panic!("expected CallFailed on the UAC side, got {other:?}"),
    }
}

#[tokio::test]
async fn in_dialog_request_with_stale_cseq_is_silently_dropped() {
    let mut uac = Agent::bind("alice").await;
    let mut uas = Agent::bind("bob").await;

    let local_uri = Uri::parse("sip:alice@uac.example").unwrap();
    let remote_uri = Uri::parse(&format!("sip:bob@{}", uas.addr)).unwrap();
    let uac_id = uac.dialogs.new_invite(local_uri, remote_uri, uas.addr, uac.transport_handle());

    let uas_id = match uas.recv().await {
        DialogEvent::IncomingInvite { dialog, .. } => dialog,
        other => panic!("expected IncomingInvite, got {other:?}"),
    };
    uas.dialogs.accept(uas_id, StatusCode::OK).await.unwrap();
    assert!(matches!(uac.recv().await, DialogEvent::StateChanged { state: DialogState::Confirmed, .. }));
    assert!(matches!(uas.recv().await, DialogEvent::StateChanged { state: DialogState::Confirmed, .. }));

    // A legitimate in-dialog request first, to give the UAS a remote CSeq
    // baseline to validate against.
    let mut first = uac.dialogs.build_request(uac_id, Method::Info).unwrap();
    let first_cseq = first.cseq().unwrap().sequence;
    uac.transport_handle()
        .send_message(uasip_sip_types::Message::Request(first.clone()), uas.addr)
        .await
        .unwrap();
    assert!(matches!(uas.recv().await, DialogEvent::IncomingRequest { method: Method::Info, .. }));

    // Replay it with a lower CSeq than already seen: the UAS must drop it
    // without surfacing a dialog event or crashing the read loop.
    first.remove_headers(uasip_sip_types::HeaderName::CSeq);
    first.push_header(TypedHeader::CSeq(CSeq { sequence: first_cseq.saturating_sub(1), method: Method::Info }));
    uac.transport_handle().send_message(uasip_sip_types::Message::Request(first), uas.addr).await.unwrap();

    // Prove the UAS is still alive by sending one more, well-formed
    // request and observing it arrive.
    let next = uac.dialogs.build_request(uac_id, Method::Info).unwrap();
    uac.transport_handle().send_message(uasip_sip_types::Message::Request(next), uas.addr).await.unwrap();
    assert!(matches!(uas.recv().await, DialogEvent::IncomingRequest { method: Method::Info, .. }));
}
