//! Drives two real `DialogManager`s over loopback UDP, the way a UAC and a
//! UAS would see each other on the wire: INVITE, 200 OK, ACK, BYE.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use uasip_dialog_core::{DialogEvent, DialogManager, DialogState, TransactionManager};
use uasip_sip_transport::factory::TransportType;
use uasip_sip_transport::manager::TransportManager;
use uasip_sip_transport::transport::{Transport, TransportEvent};
use uasip_sip_types::{StatusCode, Uri};

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

        spawn_inbound_bridge(dialogs.clone(), tm.clone(), transport_rx);

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

fn spawn_inbound_bridge(dialogs: Arc<DialogManager>, transport: Arc<TransportManager>, mut rx: mpsc::Receiver<TransportEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let TransportEvent::MessageReceived { message, source, .. } = event {
                let handle = transport.transport(TransportType::Udp).unwrap();
                dialogs.handle_inbound(message, source, handle).await;
            }
        }
    });
}

#[tokio::test]
async fn invite_to_confirmed_then_bye_terminates_both_sides() {
    let mut uac = Agent::bind("alice").await;
    let mut uas = Agent::bind("bob").await;

    let local_uri = Uri::parse("sip:alice@uac.example").unwrap();
    let remote_uri = Uri::parse(&format!("sip:bob@{}", uas.addr)).unwrap();

    let uac_dialog_id = uac.dialogs.new_invite(local_uri, remote_uri, uas.addr, uac.transport_handle());

    let (uas_dialog_id, _invite) = match uas.recv().await {
        DialogEvent::IncomingInvite { dialog, request, .. } => (dialog, request),
        other => panic!("expected IncomingInvite, got {other:?}"),
    };

    uas.dialogs.accept(uas_dialog_id, StatusCode::OK).await.unwrap();

    assert!(matches!(
        uac.recv().await,
        DialogEvent::StateChanged { state: DialogState::Confirmed, .. }
    ));
    assert!(matches!(
        uas.recv().await,
        DialogEvent::StateChanged { state: DialogState::Confirmed, .. }
    ));

    uac.dialogs.bye(uac_dialog_id, uac.transport_handle(), uas.addr).await.unwrap();

    assert!(matches!(uas.recv().await, DialogEvent::DialogTerminated { dialog } if dialog == uas_dialog_id));
    assert!(matches!(uac.recv().await, DialogEvent::DialogTerminated { dialog } if dialog == uac_dialog_id));
}

#[tokio::test]
async fn reject_sends_uac_call_failed() {
    let mut uac = Agent::bind("alice").await;
    let mut uas = Agent::bind("bob").await;

    let local_uri = Uri::parse("sip:alice@uac.example").unwrap();
    let remote_uri = Uri::parse(&format!("sip:bob@{}", uas.addr)).unwrap();

    uac.dialogs.new_invite(local_uri, remote_uri, uas.addr, uac.transport_handle());

    let uas_dialog_id = match uas.recv().await {
        DialogEvent::IncomingInvite { dialog, .. } => dialog,
        other => panic!("expected IncomingInvite, got {other:?}"),
    };

    uas.dialogs.reject(uas_dialog_id, StatusCode::BUSY_HERE).await.unwrap();

    match uac.recv().await {
        DialogEvent::CallFailed { status, .. } => assert_eq!(status, Some(StatusCode::BUSY_HERE)),
        other => panic!("expected CallFailed, got {other:?}"),
    }
}
