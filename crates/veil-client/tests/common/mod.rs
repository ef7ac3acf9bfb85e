//! In-memory relay and transport shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use veil_client::session::{SessionEvent, SessionOptions};
use veil_client::tunnel::{
    ClientEvent, ClientHandle, CloseKind, Connector, Inbound, ReconnectPolicy, TransportError,
    Transport, TunnelClient, TunnelClientError, TunnelConfig, client_channels,
};
use veil_proto::{Frame, RelayMessage, Role, decode, encode};

pub const WAIT: Duration = Duration::from_secs(5);

/// Client side of an in-memory connection.
pub struct MemTransport {
    to_relay: mpsc::UnboundedSender<String>,
    from_relay: mpsc::UnboundedReceiver<Inbound>,
}

impl Transport for MemTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.to_relay
            .send(frame)
            .map_err(|_| TransportError::Send("relay gone".into()))
    }

    async fn recv(&mut self) -> Inbound {
        self.from_relay
            .recv()
            .await
            .unwrap_or(Inbound::Closed(CloseKind::Abnormal))
    }

    async fn close(&mut self) {
        self.from_relay.close();
    }
}

#[derive(Default)]
struct RelayState {
    conns: HashMap<usize, mpsc::UnboundedSender<Inbound>>,
    /// Room key -> members, creator first.
    rooms: HashMap<String, Vec<usize>>,
    member_of: HashMap<usize, String>,
    waiting: Option<usize>,
    frames: Vec<(usize, String)>,
    next_room: usize,
}

impl RelayState {
    fn push(&self, conn: usize, msg: &RelayMessage) {
        self.push_raw(conn, encode(msg).unwrap());
    }

    fn push_raw(&self, conn: usize, frame: String) {
        if let Some(tx) = self.conns.get(&conn) {
            let _ = tx.send(Inbound::Frame(frame));
        }
    }

    fn join(&mut self, key: &str, conn: usize) {
        self.rooms.entry(key.to_string()).or_default().push(conn);
        self.member_of.insert(conn, key.to_string());
    }

    fn handle(&mut self, conn: usize, raw: String) {
        self.frames.push((conn, raw.clone()));
        let Ok(Frame::Message(msg)) = decode(&raw) else {
            return;
        };
        match msg {
            RelayMessage::RoomCreate { duration_seconds } => {
                self.next_room += 1;
                let passcode = format!("ROOM{}", self.next_room);
                self.join(&passcode, conn);
                self.push(
                    conn,
                    &RelayMessage::RoomCreated {
                        passcode,
                        duration_seconds,
                    },
                );
            }
            RelayMessage::RoomJoin { passcode } => {
                let creator = match self.rooms.get(&passcode) {
                    Some(members) if members.len() == 1 => Some(members[0]),
                    _ => None,
                };
                if let Some(creator) = creator {
                    self.join(&passcode, conn);
                    self.push(
                        conn,
                        &RelayMessage::RoomJoinResult {
                            success: true,
                            error: None,
                        },
                    );
                    self.push(creator, &RelayMessage::PeerJoined);
                } else {
                    self.push(
                        conn,
                        &RelayMessage::RoomJoinResult {
                            success: false,
                            error: Some("Room not found".into()),
                        },
                    );
                }
            }
            RelayMessage::MatchRequest => match self.waiting.take() {
                Some(first) => {
                    self.next_room += 1;
                    let room_id = format!("match-{}", self.next_room);
                    self.join(&room_id, first);
                    self.join(&room_id, conn);
                    self.push(
                        first,
                        &RelayMessage::MatchFound {
                            room_id: room_id.clone(),
                            assigned_role: Role::Initiator,
                        },
                    );
                    self.push(
                        conn,
                        &RelayMessage::MatchFound {
                            room_id,
                            assigned_role: Role::Responder,
                        },
                    );
                }
                None => {
                    self.waiting = Some(conn);
                    self.push(conn, &RelayMessage::MatchWaiting);
                }
            },
            _ => {
                let Some(key) = self.member_of.get(&conn) else {
                    return;
                };
                for &peer in self.rooms.get(key).into_iter().flatten() {
                    if peer != conn {
                        self.push_raw(peer, raw.clone());
                    }
                }
            }
        }
    }

    fn disconnect(&mut self, conn: usize) {
        self.conns.remove(&conn);
        if self.waiting == Some(conn) {
            self.waiting = None;
        }
    }
}

/// A relay that pairs peers, forwards their frames verbatim and records
/// everything it sees.
#[derive(Clone, Default)]
pub struct FakeRelay {
    state: Arc<Mutex<RelayState>>,
    connects: Arc<AtomicUsize>,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame received from clients, in arrival order.
    pub fn frames(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.frames.iter().map(|(_, f)| f.clone()).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Authoritatively end every session.
    pub fn expire_all(&self, reason: &str) {
        let state = self.state.lock().unwrap();
        for &conn in state.conns.keys() {
            state.push(
                conn,
                &RelayMessage::SessionExpired {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Close one connection from the relay side.
    pub fn drop_connection(&self, conn: usize, kind: CloseKind) {
        let mut state = self.state.lock().unwrap();
        if let Some(tx) = state.conns.get(&conn) {
            let _ = tx.send(Inbound::Closed(kind));
        }
        state.disconnect(conn);
    }

    fn accept(&self) -> MemTransport {
        let conn = self.connects.fetch_add(1, Ordering::SeqCst);
        let (to_client, from_relay) = mpsc::unbounded_channel();
        let (to_relay, mut inbox) = mpsc::unbounded_channel::<String>();
        self.state.lock().unwrap().conns.insert(conn, to_client);

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                state.lock().unwrap().handle(conn, frame);
            }
            state.lock().unwrap().disconnect(conn);
        });

        MemTransport {
            to_relay,
            from_relay,
        }
    }
}

impl Connector for FakeRelay {
    type Transport = MemTransport;

    async fn connect(&self) -> Result<MemTransport, TransportError> {
        Ok(self.accept())
    }
}

/// A connector whose relay is never reachable.
#[derive(Clone, Default)]
pub struct RefusingConnector {
    pub attempts: Arc<AtomicUsize>,
}

impl Connector for RefusingConnector {
    type Transport = MemTransport;

    async fn connect(&self) -> Result<MemTransport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Connect("connection refused".into()))
    }
}

pub fn test_config(options: SessionOptions) -> TunnelConfig {
    TunnelConfig {
        relay_addr: "memory".into(),
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_attempts: 5,
        },
        session: options,
    }
}

/// A running client plus the host side of its channels.
pub struct Peer {
    pub handle: ClientHandle,
    pub shutdown: watch::Sender<bool>,
    pub task: JoinHandle<Result<(), TunnelClientError>>,
}

pub fn spawn_peer<C>(connector: C, config: TunnelConfig) -> Peer
where
    C: Connector + 'static,
{
    let (io, handle) = client_channels(16);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let client = TunnelClient::new(config, connector);
    let task = tokio::spawn(async move { client.run(io, shutdown_rx).await });
    Peer {
        handle,
        shutdown,
        task,
    }
}

impl Peer {
    /// Next event matching `pick`, skipping everything else.
    pub async fn wait_for<T>(&mut self, mut pick: impl FnMut(&ClientEvent) -> Option<T>) -> T {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.handle.events.recv().await.expect("runner stopped");
                if let Some(found) = pick(&event) {
                    return found;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Next session event matching `pick`.
    pub async fn wait_session<T>(&mut self, mut pick: impl FnMut(&SessionEvent) -> Option<T>) -> T {
        self.wait_for(|event| match event {
            ClientEvent::Session(event) => pick(event),
            _ => None,
        })
        .await
    }

    pub async fn send(&self, command: veil_client::session::Command) {
        self.handle.commands.send(command).await.unwrap();
    }

    /// Wait for the runner to finish.
    pub async fn finish(self) -> Result<(), TunnelClientError> {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("runner did not stop")
            .unwrap()
    }
}
