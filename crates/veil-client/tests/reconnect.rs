#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Connection handling: backoff on failure, a fresh session after an
//! abnormal drop, and no reconnect after a normal close.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FakeRelay, RefusingConnector, spawn_peer, test_config};
use veil_client::session::{Command, SessionEvent, SessionOptions};
use veil_client::tunnel::{ClientEvent, CloseKind, TunnelClientError};

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let connector = RefusingConnector::default();
    let attempts = connector.attempts.clone();
    let mut peer = spawn_peer(connector, test_config(SessionOptions::default()));

    let mut delays = Vec::new();
    for _ in 0..5 {
        let (attempt, delay) = peer
            .wait_for(|e| match e {
                ClientEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .await;
        delays.push((attempt, delay));
    }
    assert_eq!(
        delays,
        (1..=5)
            .map(|n| (n, Duration::from_millis(1 << (n - 1))))
            .collect::<Vec<_>>()
    );

    let result = peer.finish().await;
    assert!(matches!(
        result,
        Err(TunnelClientError::RetriesExhausted { attempts: 5 })
    ));
    // The first try plus five retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn abnormal_drop_starts_a_fresh_session() {
    let relay = FakeRelay::new();
    let mut peer = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    peer.wait_for(|e| matches!(e, ClientEvent::Connected).then_some(()))
        .await;

    peer.send(Command::CreateRoom { duration_secs: 300 }).await;
    peer.wait_session(|e| matches!(e, SessionEvent::RoomCreated { .. }).then_some(()))
        .await;

    relay.drop_connection(0, CloseKind::Abnormal);
    let attempt = peer
        .wait_for(|e| match e {
            ClientEvent::Reconnecting { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .await;
    assert_eq!(attempt, 1);
    peer.wait_for(|e| matches!(e, ClientEvent::Connected).then_some(()))
        .await;
    assert_eq!(relay.connects(), 2);

    // The old room did not survive; a new one can be created.
    peer.send(Command::CreateRoom { duration_secs: 300 }).await;
    let passcode = peer
        .wait_session(|e| match e {
            SessionEvent::RoomCreated { passcode, .. } => Some(passcode.clone()),
            _ => None,
        })
        .await;
    assert_eq!(passcode, "ROOM2");

    peer.send(Command::Close).await;
    assert!(peer.finish().await.is_ok());
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let relay = FakeRelay::new();
    let mut peer = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    peer.wait_for(|e| matches!(e, ClientEvent::Connected).then_some(()))
        .await;

    relay.drop_connection(0, CloseKind::Normal);
    assert!(peer.finish().await.is_ok());
    assert_eq!(relay.connects(), 1);
}

#[tokio::test]
async fn shutdown_signal_stops_the_runner() {
    let relay = FakeRelay::new();
    let mut peer = spawn_peer(relay.clone(), test_config(SessionOptions::default()));
    peer.wait_for(|e| matches!(e, ClientEvent::Connected).then_some(()))
        .await;

    peer.shutdown.send(true).unwrap();
    assert!(peer.finish().await.is_ok());
    assert_eq!(relay.connects(), 1);
}
