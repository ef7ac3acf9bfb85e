#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Random matchmaking: the first requester waits, the second completes the
//! pair, and both end up keyed in the same room with opposite roles.

mod common;

use common::{FakeRelay, spawn_peer, test_config};
use veil_client::session::{Command, Origin, SessionEvent, SessionOptions};
use veil_client::tunnel::ClientEvent;
use veil_proto::Role;

fn found(event: &SessionEvent) -> Option<(String, Role)> {
    match event {
        SessionEvent::MatchFound { room_id, role } => Some((room_id.clone(), *role)),
        _ => None,
    }
}

fn secure_code(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::SecureChannelReady { verification_code } => Some(verification_code.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn matched_peers_get_complementary_roles() {
    let relay = FakeRelay::new();
    let mut first = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    first.send(Command::FindMatch).await;
    first
        .wait_session(|e| matches!(e, SessionEvent::MatchWaiting).then_some(()))
        .await;

    let mut second = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    second.send(Command::FindMatch).await;

    let (room_a, role_a) = first.wait_session(found).await;
    let (room_b, role_b) = second.wait_session(found).await;
    assert_eq!(room_a, room_b);
    assert_eq!(role_a, Role::Initiator);
    assert_eq!(role_b, role_a.peer());

    let code_a = first.wait_session(secure_code).await;
    let code_b = second.wait_session(secure_code).await;
    assert_eq!(code_a, code_b);

    second
        .send(Command::SendText {
            text: "hi stranger".into(),
            self_destruct: false,
        })
        .await;
    let text = first
        .wait_session(|e| match e {
            SessionEvent::MessageAppended { message, .. } if message.origin == Origin::Remote => {
                Some(message.text.clone())
            }
            _ => None,
        })
        .await;
    assert_eq!(text, "hi stranger");
}

#[tokio::test]
async fn only_the_initiator_may_place_a_call() {
    let relay = FakeRelay::new();
    let mut first = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    first.send(Command::FindMatch).await;
    first
        .wait_session(|e| matches!(e, SessionEvent::MatchWaiting).then_some(()))
        .await;
    let mut second = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    second.send(Command::FindMatch).await;
    second.wait_session(secure_code).await;

    second.send(Command::StartCall).await;
    let reason = second
        .wait_for(|e| match e {
            ClientEvent::CommandRejected { reason } => Some(reason.clone()),
            _ => None,
        })
        .await;
    assert!(reason.contains("initiator"), "{reason}");

    // The initiator's call asks the host to prepare media first.
    first.wait_session(secure_code).await;
    first.send(Command::StartCall).await;
    first
        .wait_for(|e| matches!(e, ClientEvent::Media(_)).then_some(()))
        .await;
}
