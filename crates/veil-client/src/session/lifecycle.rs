//! Room lifecycle: creation, join, matchmaking, countdown and expiry.
//!
//! The room authority is remote. This machine only records what was asked
//! and reacts to what the authority answers; it never allocates rooms itself.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use veil_proto::{RelayMessage, Role, normalize_passcode, validate_duration};

use super::types::SessionError;

/// How a room was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomAddress {
    Passcode(String),
    Matched { room_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRoom {
    pub role: Role,
    pub address: RoomAddress,
    /// Local countdown target. Only known to the side that created the room.
    pub expires_at: Option<Instant>,
    pub peer_present: bool,
}

impl ActiveRoom {
    /// Seconds left on the local countdown, rounded up.
    pub fn remaining_secs(&self, now: Instant) -> Option<u64> {
        self.expires_at.map(|at| {
            let left = at.saturating_duration_since(now);
            left.as_secs() + u64::from(left.subsec_nanos() > 0)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    NoRoom,
    CreatingRoom { duration_secs: u32 },
    JoiningRoom { passcode: String },
    Matchmaking { waiting: bool },
    RoomActive(ActiveRoom),
    Expired { reason: String },
    Closed,
}

impl LifecycleState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NoRoom => "no_room",
            Self::CreatingRoom { .. } => "creating_room",
            Self::JoiningRoom { .. } => "joining_room",
            Self::Matchmaking { .. } => "matchmaking",
            Self::RoomActive(_) => "room_active",
            Self::Expired { .. } => "expired",
            Self::Closed => "closed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired { .. } | Self::Closed)
    }
}

/// Result of a `room_join_result` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { passcode: String },
    Rejected { reason: String },
}

#[derive(Debug)]
pub struct SessionLifecycle {
    state: LifecycleState,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub const fn new() -> Self {
        Self {
            state: LifecycleState::NoRoom,
        }
    }

    pub const fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub const fn active_room(&self) -> Option<&ActiveRoom> {
        match &self.state {
            LifecycleState::RoomActive(room) => Some(room),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.active_room().map(|room| room.role)
    }

    fn require_no_room(&self, op: &str) -> Result<(), SessionError> {
        if self.state == LifecycleState::NoRoom {
            Ok(())
        } else {
            Err(SessionError::InvalidState(format!(
                "cannot {op} while {}",
                self.state.name()
            )))
        }
    }

    fn unexpected(&self, tag: &str) -> SessionError {
        SessionError::InvalidState(format!("unexpected {tag} while {}", self.state.name()))
    }

    /// Validate the duration and build the request. Out-of-range durations
    /// never reach the authority.
    pub fn request_create(&mut self, duration_secs: u32) -> Result<RelayMessage, SessionError> {
        self.require_no_room("create a room")?;
        let duration_secs = validate_duration(duration_secs)?;
        self.state = LifecycleState::CreatingRoom { duration_secs };
        Ok(RelayMessage::RoomCreate { duration_seconds: duration_secs })
    }

    pub fn request_join(&mut self, passcode: &str) -> Result<RelayMessage, SessionError> {
        self.require_no_room("join a room")?;
        let passcode = normalize_passcode(passcode)?;
        self.state = LifecycleState::JoiningRoom {
            passcode: passcode.clone(),
        };
        Ok(RelayMessage::RoomJoin { passcode })
    }

    pub fn request_match(&mut self) -> Result<RelayMessage, SessionError> {
        self.require_no_room("request a match")?;
        self.state = LifecycleState::Matchmaking { waiting: false };
        Ok(RelayMessage::MatchRequest)
    }

    /// The authority allocated our room. The creator is always the Initiator.
    pub fn on_room_created(
        &mut self,
        passcode: &str,
        duration_secs: u32,
        now: Instant,
    ) -> Result<&ActiveRoom, SessionError> {
        let LifecycleState::CreatingRoom { duration_secs: requested } = self.state else {
            return Err(self.unexpected("room_created"));
        };
        if requested != duration_secs {
            debug!(requested, granted = duration_secs, "Authority adjusted room duration");
        }
        info!(passcode, duration_secs, "Room created");
        self.state = LifecycleState::RoomActive(ActiveRoom {
            role: Role::Initiator,
            address: RoomAddress::Passcode(passcode.to_string()),
            expires_at: Some(now + Duration::from_secs(u64::from(duration_secs))),
            peer_present: false,
        });
        self.active_room()
            .ok_or_else(|| SessionError::InvalidState("room vanished".into()))
    }

    pub fn on_join_result(
        &mut self,
        success: bool,
        error: Option<String>,
    ) -> Result<JoinOutcome, SessionError> {
        let LifecycleState::JoiningRoom { passcode } = &self.state else {
            return Err(self.unexpected("room_join_result"));
        };
        let passcode = passcode.clone();
        if success {
            info!(passcode = %passcode, "Joined room");
            self.state = LifecycleState::RoomActive(ActiveRoom {
                role: Role::Responder,
                address: RoomAddress::Passcode(passcode.clone()),
                expires_at: None,
                peer_present: true,
            });
            Ok(JoinOutcome::Joined { passcode })
        } else {
            let reason = error.unwrap_or_else(|| "room not found".to_string());
            info!(passcode = %passcode, reason = %reason, "Room join rejected");
            self.state = LifecycleState::NoRoom;
            Ok(JoinOutcome::Rejected { reason })
        }
    }

    pub fn on_match_waiting(&mut self) -> Result<(), SessionError> {
        let LifecycleState::Matchmaking { waiting } = &mut self.state else {
            return Err(self.unexpected("match_waiting"));
        };
        *waiting = true;
        Ok(())
    }

    /// Matched peers are both present from the start; no passcode is involved.
    pub fn on_match_found(&mut self, room_id: &str, role: Role) -> Result<&ActiveRoom, SessionError> {
        if !matches!(self.state, LifecycleState::Matchmaking { .. }) {
            return Err(self.unexpected("match_found"));
        }
        info!(room_id, %role, "Match found");
        self.state = LifecycleState::RoomActive(ActiveRoom {
            role,
            address: RoomAddress::Matched {
                room_id: room_id.to_string(),
            },
            expires_at: None,
            peer_present: true,
        });
        self.active_room()
            .ok_or_else(|| SessionError::InvalidState("room vanished".into()))
    }

    /// Returns `true` if this changed our view of the room.
    pub fn on_peer_joined(&mut self) -> Result<bool, SessionError> {
        let LifecycleState::RoomActive(room) = &mut self.state else {
            return Err(self.unexpected("peer_joined"));
        };
        let changed = !room.peer_present;
        room.peer_present = true;
        Ok(changed)
    }

    /// Remaining countdown seconds. Zero is informational only; expiry comes
    /// from the authority.
    pub fn tick(&self, now: Instant) -> Option<u64> {
        self.active_room().and_then(|room| room.remaining_secs(now))
    }

    /// Authoritative expiry. Applies once, from any non-terminal state.
    pub fn on_expired(&mut self, reason: &str) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = LifecycleState::Expired {
            reason: reason.to_string(),
        };
        true
    }

    /// An authority error aborts a pending request. Returns `true` if it did.
    pub fn on_protocol_error(&mut self) -> bool {
        match self.state {
            LifecycleState::CreatingRoom { .. }
            | LifecycleState::JoiningRoom { .. }
            | LifecycleState::Matchmaking { .. } => {
                self.state = LifecycleState::NoRoom;
                true
            }
            _ => false,
        }
    }

    pub fn close(&mut self) {
        self.state = LifecycleState::Closed;
    }
}
