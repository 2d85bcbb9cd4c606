//! Blind transfer (RFC 3515): SendRefer/WaitRefer, the UAS's generic
//! 202-Accepted handling of in-dialog REFER, and NOTIFY-driven
//! subscription progress.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use uasip_dialog_core::{DialogEvent, DialogManager, DialogState, ReferOptions, SubscriptionState, TransactionManager};
use uasip_sip_transport::factory::TransportType;
use uasip_sip_transport::manager::TransportManager;
use uasip_sip_transport::transport::{Transport, TransportEvent};
use uasip_sip_types::{Method, StatusCode, TypedHeader, Uri};

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

async fn establish(uac: &mut Agent, uas: &mut Agent) -> (uasip_dialog_core::DialogId, uasip_dialog_core::DialogId) {
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
    (uac_id, uas_id)
}

#[tokio::test]
async fn blind_transfer_activates_then_terminates_on_final_notify() {
    let mut uac = Agent::bind("alice").await;
    let mut uas = Agent::bind("bob").await;
    let (uac_id, uas_id) = establish(&mut uac, &mut uas).await;

    let refer_to = Uri::parse("sip:carol@transfer-target.example").unwrap();
    let subscription = uac
        .dialogs
        .send_refer(uac_id, refer_to, ReferOptions::default(), uac.transport_handle(), uas.addr)
        .await
        .unwrap();

    // The UAS's generic in-dialog handler answers REFER with 202 Accepted
    // and reports it to its own TU.
    match uas.recv().await {
        DialogEvent::IncomingRequest { method, .. } => assert_eq!(method, Method::Refer),
        other => panic!("expected IncomingRequest(REFER), got {other:?}"),
    }

    let subscription = uac.dialogs.wait_refer(subscription).await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Active);
    assert!(!subscription.was_rejected());

    // The UAS plays transferor-notifier: build and send a NOTIFY carrying
    // the transferred call's final status, in-dialog, from its side.
    let mut notify = uas.dialogs.build_request(uas_id, Method::Notify).unwrap();
    notify.push_header(TypedHeader::Event { package: "refer".to_string(), id: None });
    notify.push_header(TypedHeader::SubscriptionState {
        state: "terminated".to_string(),
        params: vec![("reason".to_string(), Some("noresource".to_string()))],
    });
    notify.push_header(TypedHeader::ContentType("message/sipfrag".to_string()));
    notify.body = b"SIP/2.0 200 OK".to_vec();
    notify.push_header(TypedHeader::ContentLength(notify.body.len()));
    uas.transport_handle().send_message(uasip_sip_types::Message::Request(notify), uac.addr).await.unwrap();

    subscription.wait_done().await;
    assert_eq!(subscription.state(), SubscriptionState::Terminated);
    assert_eq!(subscription.last_status(), Some(StatusCode::OK));
}

#[tokio::test]
async fn second_refer_while_pending_is_rejected() {
    let mut uac = Agent::bind("alice").await;
    let mut uas = Agent::bind("bob").await;
    let (uac_id, _uas_id) = establish(&mut uac, &mut uas).await;

    let refer_to = Uri::parse("sip:carol@transfer-target.example").unwrap();
    let _first = uac
        .dialogs
        .send_refer(uac_id, refer_to.clone(), ReferOptions::default(), uac.transport_handle(), uas.addr)
        .await
        .unwrap();

    let second = uac.dialogs.send_refer(uac_id, refer_to, ReferOptions::default(), uac.transport_handle(), uas.addr).await;
    assert!(matches!(second, Err(uasip_dialog_core::DialogError::ReferPending)));
}
