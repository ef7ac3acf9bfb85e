//! `veil` CLI
//!
//! Opens an ephemeral room through the relay and runs an end-to-end
//! encrypted chat on the terminal. Lines typed on stdin are sent to the
//! peer; session events are printed to stdout, logs go to stderr.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use veil_client::session::{
    Command, MediaAction, MediaCommand, MediaEvent, MediaEventKind, Origin, SessionEvent,
};
use veil_client::tunnel::{ClientEvent, TcpConnector, TunnelClient, TunnelConfig, client_channels};
use veil_core::config::load_config;
use veil_core::tracing_init::{default_filter, init_tracing};

/// Reason reported for every media step; the terminal has no media stack.
const MEDIA_UNAVAILABLE: &str = "media unavailable";

#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(version, about = "Veil - ephemeral end-to-end encrypted rooms over an untrusted relay")]
struct Args {
    /// Settings file layered over the global settings
    #[arg(long, env = "VEIL_CONFIG")]
    config: Option<PathBuf>,

    /// Relay address (host:port)
    #[arg(long)]
    relay: Option<String>,

    /// Cipher suite for sealed payloads ("chacha20" or "chacha20-poly1305")
    #[arg(long)]
    cipher_suite: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Create a room and share its passcode
    Create {
        /// Room lifetime in seconds (60-3600)
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Join a room by passcode
    Join { passcode: String },
    /// Get paired with a random peer
    Match,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(relay) = args.relay {
        config.relay.addr = relay;
    }
    if let Some(suite) = args.cipher_suite {
        config.session.cipher_suite = suite;
    }
    if args.log_json {
        config.log.json = true;
    }
    config.validate()?;

    let log_filter = format!(
        "{},veil={}",
        default_filter("veil_client", &config.log),
        config.log.level
    );
    init_tracing(&log_filter, config.log.json);

    let default_duration = config.session.default_duration_secs;
    let initial = match args.mode {
        Mode::Create { duration } => Command::CreateRoom {
            duration_secs: duration.unwrap_or(default_duration),
        },
        Mode::Join { passcode } => Command::JoinRoom { passcode },
        Mode::Match => Command::FindMatch,
    };

    let tunnel_config = TunnelConfig::from_config(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %tunnel_config.relay_addr,
        cipher_suite = %tunnel_config.session.cipher_suite,
        "Starting veil"
    );

    let connector = TcpConnector::new(tunnel_config.relay_addr.clone());
    let client = TunnelClient::new(tunnel_config, connector);
    let (client_io, mut handle) = client_channels(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut runner = tokio::spawn(async move { client.run(client_io, shutdown_rx).await });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut events_open = true;
    let mut out = io::stdout();

    let outcome = loop {
        tokio::select! {
            result = &mut runner => break result?,
            event = handle.events.recv(), if events_open => match event {
                Some(ClientEvent::Connected) => {
                    writeln!(out, "Connected to relay")?;
                    if handle.commands.send(initial.clone()).await.is_err() {
                        debug!("Runner stopped before the initial command");
                    }
                }
                Some(ClientEvent::Media(command)) => {
                    if let Some(event) = refuse_media(&command)
                        && handle.media_events.send(event).await.is_err()
                    {
                        debug!("Runner stopped before the media reply");
                    }
                }
                Some(event) => render(&mut out, &event)?,
                None => events_open = false,
            },
            line = stdin.next_line(), if stdin_open => {
                let command = match line {
                    Ok(Some(line)) => parse_input(&line, default_duration),
                    Ok(None) => {
                        stdin_open = false;
                        Some(Command::Close)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                        Some(Command::Close)
                    }
                };
                if let Some(command) = command
                    && handle.commands.send(command).await.is_err()
                {
                    debug!("Runner stopped; input dropped");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
                let _ = shutdown_tx.send(true);
            }
        }
    };

    while let Ok(event) = handle.events.try_recv() {
        render(&mut out, &event)?;
    }

    outcome?;
    info!("veil stopped");
    Ok(())
}

/// Turn one line of user input into a command. Blank lines are ignored.
///
/// `default_duration` applies to `/create` without an argument. A malformed
/// slash command is sent as text so nothing typed is silently lost.
fn parse_input(line: &str, default_duration: u32) -> Option<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut words = line.split_whitespace();
    let command = match (words.next(), words.next(), words.next()) {
        (None, ..) => return None,
        (Some("/quit"), None, _) => Some(Command::Close),
        (Some("/call"), None, _) => Some(Command::StartCall),
        (Some("/hangup"), None, _) => Some(Command::EndCall),
        (Some("/match"), None, _) => Some(Command::FindMatch),
        (Some("/create"), None, _) => Some(Command::CreateRoom {
            duration_secs: default_duration,
        }),
        (Some("/create"), Some(secs), None) => secs
            .parse()
            .ok()
            .map(|duration_secs| Command::CreateRoom { duration_secs }),
        (Some("/join"), Some(passcode), None) => Some(Command::JoinRoom {
            passcode: passcode.to_string(),
        }),
        (Some("/verify"), Some(code), None) => Some(Command::VerifyCode {
            code: code.to_string(),
        }),
        _ => None,
    };
    if command.is_some() {
        return command;
    }
    if let Some(text) = line.strip_prefix("/sd ") {
        return Some(Command::SendText {
            text: text.to_string(),
            self_destruct: true,
        });
    }
    Some(Command::SendText {
        text: line.to_string(),
        self_destruct: false,
    })
}

/// Answer a media step on a host without a media stack.
fn refuse_media(command: &MediaCommand) -> Option<MediaEvent> {
    if command.action == MediaAction::Close {
        return None;
    }
    Some(MediaEvent {
        call_id: command.call_id,
        kind: MediaEventKind::Failed {
            reason: MEDIA_UNAVAILABLE.to_string(),
        },
    })
}

fn render(out: &mut impl Write, event: &ClientEvent) -> io::Result<()> {
    match event {
        ClientEvent::Connected => writeln!(out, "Connected to relay"),
        ClientEvent::Reconnecting { attempt, delay } => writeln!(
            out,
            "Connection lost. Reconnecting in {}s (attempt {attempt})",
            delay.as_secs_f32()
        ),
        ClientEvent::CommandRejected { reason } => writeln!(out, "! {reason}"),
        ClientEvent::Media(_) => Ok(()),
        ClientEvent::Session(event) => render_session(out, event),
    }
}

fn render_session(out: &mut impl Write, event: &SessionEvent) -> io::Result<()> {
    match event {
        SessionEvent::RoomCreated {
            passcode,
            duration_secs,
        } => writeln!(
            out,
            "Room created. Passcode: {passcode} (expires in {duration_secs}s)"
        ),
        SessionEvent::RoomJoined { passcode } => writeln!(out, "Joined room {passcode}"),
        SessionEvent::JoinRejected { reason } => writeln!(out, "Join rejected: {reason}"),
        SessionEvent::MatchWaiting => writeln!(out, "Waiting for a match..."),
        SessionEvent::MatchFound { room_id, role } => {
            writeln!(out, "Matched into room {room_id} as {role}")
        }
        SessionEvent::PeerJoined => writeln!(out, "Peer joined"),
        SessionEvent::SecureChannelReady { verification_code } => writeln!(
            out,
            "Secure channel ready. Verification code: {verification_code}"
        ),
        SessionEvent::KeyExchangeFailed { reason } => {
            writeln!(out, "Key exchange failed: {reason}")
        }
        SessionEvent::CodeChecked { matches: true } => writeln!(out, "Verification code matches"),
        SessionEvent::CodeChecked { matches: false } => {
            writeln!(out, "Verification code MISMATCH: the channel may be intercepted")
        }
        SessionEvent::MessageAppended {
            id,
            message,
            self_destruct,
        } => {
            let who = match message.origin {
                Origin::Local => "you",
                Origin::Remote => "peer",
            };
            let marker = if *self_destruct { " (self-destruct)" } else { "" };
            writeln!(out, "{id} {who}: {}{marker}", message.text)
        }
        SessionEvent::MessageEvicted { id } => writeln!(out, "{id} destroyed"),
        SessionEvent::CountdownTick { remaining_secs } => {
            if remaining_secs % 60 == 0 || *remaining_secs <= 10 {
                writeln!(out, "{remaining_secs}s left")
            } else {
                Ok(())
            }
        }
        SessionEvent::CallStateChanged { call_id, state } => {
            writeln!(out, "{call_id}: {state:?}")
        }
        SessionEvent::SessionExpired { reason } => writeln!(
            out,
            "Session ended: {reason}. Use /create, /join or /match to start again"
        ),
        SessionEvent::ProtocolError { reason } => writeln!(out, "Relay error: {reason}"),
    }
}
