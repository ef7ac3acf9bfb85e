//! Tunnel client that connects a session to the relay and keeps it connected.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until};
use tracing::{debug, error, info, warn};
use veil_proto::encode;

use super::config::TunnelConfig;
use super::error::{TransportError, TunnelClientError};
use super::transport::{CloseKind, Connector, Inbound, Transport};

use crate::session::{
    Command, LifecycleState, MediaCommand, MediaEvent, Outbound, Session, SessionEvent,
};

/// What the runner reports to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A fresh connection is up with a new, empty session.
    Connected,
    /// The connection dropped abnormally; waiting before the next attempt.
    Reconnecting { attempt: u32, delay: Duration },
    Session(SessionEvent),
    /// Work for the media stack. Answer through the media event channel.
    Media(MediaCommand),
    /// A local command could not be carried out.
    CommandRejected { reason: String },
}

/// Channels between the runner and its host. They outlive individual
/// connections.
#[derive(Debug)]
pub struct ClientIo {
    pub commands: mpsc::Receiver<Command>,
    pub media_events: mpsc::Receiver<MediaEvent>,
    pub events: mpsc::UnboundedSender<ClientEvent>,
}

/// Host side of [`ClientIo`].
#[derive(Debug)]
pub struct ClientHandle {
    pub commands: mpsc::Sender<Command>,
    pub media_events: mpsc::Sender<MediaEvent>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

/// Create a connected pair of runner and host channels.
pub fn client_channels(capacity: usize) -> (ClientIo, ClientHandle) {
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (media_tx, media_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ClientIo {
            commands: cmd_rx,
            media_events: media_rx,
            events: event_tx,
        },
        ClientHandle {
            commands: cmd_tx,
            media_events: media_tx,
            events: event_rx,
        },
    )
}

/// How one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Normal close from either side; do not reconnect.
    Normal,
    Abnormal,
    Shutdown,
}

impl From<CloseKind> for SessionEnd {
    fn from(kind: CloseKind) -> Self {
        match kind {
            CloseKind::Normal => Self::Normal,
            CloseKind::Abnormal => Self::Abnormal,
        }
    }
}

/// Tunnel client that keeps one session alive per relay connection.
pub struct TunnelClient<C> {
    config: TunnelConfig,
    connector: C,
}

impl<C: Connector> TunnelClient<C> {
    pub const fn new(config: TunnelConfig, connector: C) -> Self {
        Self { config, connector }
    }

    /// Run the tunnel client with automatic reconnection.
    ///
    /// Every connection starts a brand-new [`Session`]; nothing carries over.
    /// An authoritative expiry also replaces the session, keeping the
    /// connection open so the host can create, join or match again.
    /// A normal close or a `Close` command ends the run. An abnormal close or
    /// a failed connect is retried with exponential backoff until the policy
    /// gives up.
    pub async fn run(
        &self,
        mut io: ClientIo,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TunnelClientError> {
        let policy = self.config.reconnect;
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Tunnel client shutting down");
                return Ok(());
            }

            match self.connector.connect().await {
                Ok(transport) => {
                    attempt = 0;
                    info!(relay = %self.config.relay_addr, "Connected to relay");
                    emit(&io, ClientEvent::Connected);
                    match self.run_session(transport, &mut io, &mut shutdown).await {
                        SessionEnd::Normal => {
                            info!("Relay connection closed normally");
                            return Ok(());
                        }
                        SessionEnd::Shutdown => {
                            info!("Tunnel client shutting down");
                            return Ok(());
                        }
                        SessionEnd::Abnormal => {
                            warn!("Relay connection lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Failed to connect to relay");
                }
            }

            attempt = attempt.saturating_add(1);
            if !policy.should_retry(attempt) {
                error!(attempts = policy.max_attempts, "Max reconnect attempts reached");
                return Err(TunnelClientError::RetriesExhausted {
                    attempts: policy.max_attempts,
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting");
            emit(&io, ClientEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Tunnel client shutting down during reconnect wait");
                    return Ok(());
                }
            }
        }
    }

    /// Drive one session until its connection ends.
    async fn run_session(
        &self,
        mut transport: C::Transport,
        io: &mut ClientIo,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut session = Session::new(self.config.session);
        let mut media_open = true;
        debug!(sender_id = session.sender_id(), "New session");

        loop {
            let wake = session.next_deadline().map_or_else(
                || tokio::time::Instant::now() + Duration::from_secs(3600),
                tokio::time::Instant::from_std,
            );

            let outputs = tokio::select! {
                inbound = transport.recv() => match inbound {
                    Inbound::Frame(raw) => session.handle_frame(&raw, Instant::now()),
                    Inbound::Closed(kind) => {
                        let outputs = session.close();
                        forward_local(outputs, io);
                        return kind.into();
                    }
                },
                command = io.commands.recv() => match command {
                    Some(Command::Close) | None => {
                        let outputs = session.close();
                        forward_local(outputs, io);
                        transport.close().await;
                        return SessionEnd::Normal;
                    }
                    Some(command) => match session.handle_command(command, Instant::now()) {
                        Ok(outputs) => outputs,
                        Err(e) => {
                            debug!(error = %e, "Command rejected");
                            emit(io, ClientEvent::CommandRejected { reason: e.to_string() });
                            Vec::new()
                        }
                    },
                },
                event = io.media_events.recv(), if media_open => match event {
                    Some(event) => session.on_media_event(event),
                    None => {
                        media_open = false;
                        Vec::new()
                    }
                },
                () = sleep_until(wake) => session.on_timers(Instant::now()),
                _ = shutdown.changed() => {
                    let outputs = session.close();
                    forward_local(outputs, io);
                    transport.close().await;
                    return SessionEnd::Shutdown;
                }
            };

            if let Err(e) = deliver(outputs, &mut transport, io).await {
                warn!(error = %e, "Relay send failed");
                let outputs = session.close();
                forward_local(outputs, io);
                return SessionEnd::Abnormal;
            }

            // An expired session is spent; the connection carries on with a new one.
            if matches!(session.state(), LifecycleState::Expired { .. }) {
                session = Session::new(self.config.session);
                info!(sender_id = session.sender_id(), "Session expired; starting a fresh one");
            }
        }
    }
}

fn emit(io: &ClientIo, event: ClientEvent) {
    if io.events.send(event).is_err() {
        debug!("Host event channel closed");
    }
}

/// Carry out session effects in order. Relay frames go to the transport,
/// everything else to the host.
async fn deliver<T: Transport>(
    outputs: Vec<Outbound>,
    transport: &mut T,
    io: &ClientIo,
) -> Result<(), TransportError> {
    for output in outputs {
        match output {
            Outbound::Relay(msg) => match encode(&msg) {
                Ok(frame) => transport.send(frame).await?,
                Err(e) => warn!(tag = msg.tag(), error = %e, "Failed to encode frame"),
            },
            Outbound::Media(command) => emit(io, ClientEvent::Media(command)),
            Outbound::Event(event) => emit(io, ClientEvent::Session(event)),
        }
    }
    Ok(())
}

/// Forward teardown effects once the transport is gone.
fn forward_local(outputs: Vec<Outbound>, io: &ClientIo) {
    for output in outputs {
        match output {
            Outbound::Relay(msg) => debug!(tag = msg.tag(), "Dropping frame after close"),
            Outbound::Media(command) => emit(io, ClientEvent::Media(command)),
            Outbound::Event(event) => emit(io, ClientEvent::Session(event)),
        }
    }
}
