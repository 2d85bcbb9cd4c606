//! Drives two real `Stack`s over loopback UDP end to end: `new_invite` on one
//! side, `accept` on the other (received through the incoming-dialog
//! channel), then `bye`, matching SPEC_FULL.md's "Facade round trip"
//! scenario.

use std::time::Duration;

use uasip_sip_stack::{DialogState, Stack, StackConfig, StatusCode};

async fn start(contact_user: &str) -> (std::sync::Arc<Stack>, tokio::sync::mpsc::Receiver<uasip_sip_stack::DialogHandle>) {
    let config = StackConfig::new("127.0.0.1:0".parse().unwrap(), contact_user);
    Stack::start(config).await.unwrap()
}

async fn recv_handle(
    rx: &mut tokio::sync::mpsc::Receiver<uasip_sip_stack::DialogHandle>,
) -> uasip_sip_stack::DialogHandle {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for an incoming dialog")
        .expect("incoming-dialog channel closed")
}

async fn next_state(rx: &mut tokio::sync::broadcast::Receiver<DialogState>) -> DialogState {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a state change")
        .expect("state channel closed")
}

#[tokio::test]
async fn call_established_then_byed_on_both_sides() {
    let (alice, _alice_incoming) = start("alice").await;
    let (bob, mut bob_incoming) = start("bob").await;

    let target = bob.local_uri().clone();
    let call = alice.new_invite(target).await.unwrap();
    let mut alice_states = call.on_state_change();

    let incoming = recv_handle(&mut bob_incoming).await;
    let mut bob_states = incoming.on_state_change();

    incoming.accept(None).await.unwrap();

    assert_eq!(next_state(&mut alice_states).await, DialogState::Confirmed);
    assert_eq!(next_state(&mut bob_states).await, DialogState::Confirmed);
    assert_eq!(call.state().unwrap(), DialogState::Confirmed);
    assert_eq!(incoming.state().unwrap(), DialogState::Confirmed);

    call.bye(None).await.unwrap();

    assert_eq!(next_state(&mut bob_states).await, DialogState::Terminated);
    assert_eq!(next_state(&mut alice_states).await, DialogState::Terminated);

    // Dialog-table entries are pruned on termination (Section 5: "Resource
    // release").
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.dialog_count(), 0);
    assert_eq!(bob.dialog_count(), 0);
}

#[tokio::test]
async fn rejected_call_delivers_call_failed_and_no_dialog_survives() {
    let (alice, _alice_incoming) = start("alice").await;
    let (bob, mut bob_incoming) = start("bob").await;

    let target = bob.local_uri().clone();
    let call = alice.new_invite(target).await.unwrap();
    let mut alice_states = call.on_state_change();

    let incoming = recv_handle(&mut bob_incoming).await;
    incoming.reject(StatusCode::BUSY_HERE, None).await.unwrap();

    assert_eq!(next_state(&mut alice_states).await, DialogState::Terminated);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.dialog_count(), 0);
    assert_eq!(bob.dialog_count(), 0);
}

#[tokio::test]
async fn cancelling_an_accept_returns_cancelled_without_sending() {
    let (alice, _alice_incoming) = start("alice").await;
    let (bob, mut bob_incoming) = start("bob").await;

    let target = bob.local_uri().clone();
    let _call = alice.new_invite(target).await.unwrap();
    let incoming = recv_handle(&mut bob_incoming).await;

    let cancel = uasip_sip_stack::CancellationToken::new();
    cancel.cancel();

    let result = incoming.accept(Some(&cancel)).await;
    assert!(matches!(result, Err(uasip_sip_stack::StackError::Cancelled)));
}
