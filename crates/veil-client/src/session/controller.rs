//! Per-connection session: dispatches relay frames to the key exchange,
//! envelope cipher, lifecycle, signaling and message store.
//!
//! The session is synchronous and clock-injected. Every entry point takes the
//! current `Instant` and returns the [`Outbound`] effects for the runner to
//! carry out, in order.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use veil_crypto::{
    CryptoError, EncryptedEnvelope, EnvelopeCipher, KeyExchangeState, constant_time_str_eq,
};
use veil_proto::{
    DescriptionKind, Frame, IceCandidate, ProtoError, RelayMessage, Role, SessionDescription,
    WireEnvelope, decode,
};

use super::ephemeral::EphemeralMessageStore;
use super::lifecycle::{JoinOutcome, LifecycleState, SessionLifecycle};
use super::signaling::{
    CallId, MediaEvent, SignalOutput, SignalPayload, SignalingSession, SignalingState,
};
use super::timers::{TimerKind, TimerService};
use super::types::{
    ChatMessage, Command, Origin, Outbound, SessionError, SessionEvent, SessionOptions,
};

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// One session per transport connection. Dropped, never resumed, when the
/// connection goes away.
pub struct Session {
    sender_id: String,
    options: SessionOptions,
    exchange: KeyExchangeState,
    cipher: Option<EnvelopeCipher>,
    verification_code: Option<String>,
    key_init_sent: bool,
    lifecycle: SessionLifecycle,
    signaling: Option<SignalingSession>,
    next_call_id: u64,
    store: EphemeralMessageStore,
    timers: TimerService,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sender_id", &self.sender_id)
            .field("state", &self.lifecycle.state().name())
            .field("keyed", &self.cipher.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_sender_id(options, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_sender_id(options: SessionOptions, sender_id: String) -> Self {
        Self {
            sender_id,
            options,
            exchange: KeyExchangeState::new(),
            cipher: None,
            verification_code: None,
            key_init_sent: false,
            lifecycle: SessionLifecycle::new(),
            signaling: None,
            next_call_id: 0,
            store: EphemeralMessageStore::new(options.self_destruct_after),
            timers: TimerService::new(),
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn role(&self) -> Option<Role> {
        self.lifecycle.role()
    }

    pub const fn state(&self) -> &LifecycleState {
        self.lifecycle.state()
    }

    pub const fn store(&self) -> &EphemeralMessageStore {
        &self.store
    }

    pub fn signaling_state(&self) -> Option<SignalingState> {
        self.signaling.as_ref().map(SignalingSession::state)
    }

    pub fn verification_code(&self) -> Option<&str> {
        self.verification_code.as_deref()
    }

    pub const fn is_keyed(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // ---- local commands ----

    pub fn handle_command(
        &mut self,
        command: Command,
        now: Instant,
    ) -> Result<Vec<Outbound>, SessionError> {
        let mut out = Vec::new();
        match command {
            Command::CreateRoom { duration_secs } => {
                out.push(Outbound::Relay(self.lifecycle.request_create(duration_secs)?));
            }
            Command::JoinRoom { passcode } => {
                out.push(Outbound::Relay(self.lifecycle.request_join(&passcode)?));
            }
            Command::FindMatch => {
                out.push(Outbound::Relay(self.lifecycle.request_match()?));
            }
            Command::SendText {
                text,
                self_destruct,
            } => self.send_text(text, self_destruct, now, &mut out)?,
            Command::StartCall => self.start_call(&mut out)?,
            Command::EndCall => {
                let signaling = self
                    .live_signaling()
                    .ok_or_else(|| SessionError::InvalidState("no call in progress".into()))?;
                let outputs = signaling.end_call();
                self.apply_signal_outputs(outputs, &mut out);
            }
            Command::VerifyCode { code } => {
                let ours = self
                    .verification_code
                    .as_deref()
                    .ok_or(SessionError::NotKeyed)?;
                let matches = constant_time_str_eq(ours, &code.trim().to_ascii_lowercase());
                if !matches {
                    warn!("Verification code mismatch");
                }
                out.push(Outbound::Event(SessionEvent::CodeChecked { matches }));
            }
            Command::Close => out = self.close(),
        }
        Ok(out)
    }

    fn send_text(
        &mut self,
        text: String,
        self_destruct: bool,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        if self.lifecycle.active_room().is_none() {
            return Err(SessionError::NotInRoom);
        }
        let envelope = self.seal(text.as_bytes())?;
        out.push(Outbound::Relay(RelayMessage::ChatText {
            envelope,
            self_destruct,
            sender_id: self.sender_id.clone(),
        }));
        let message = ChatMessage {
            text,
            origin: Origin::Local,
            sender_id: self.sender_id.clone(),
        };
        self.append(message, self_destruct, now, out);
        Ok(())
    }

    fn start_call(&mut self, out: &mut Vec<Outbound>) -> Result<(), SessionError> {
        let role = self.lifecycle.role().ok_or(SessionError::NotInRoom)?;
        if role != Role::Initiator {
            return Err(SessionError::RoleMismatch {
                required: Role::Initiator,
            });
        }
        if !self.is_keyed() {
            return Err(SessionError::NotKeyed);
        }
        let mut outputs = Vec::new();
        if self.live_signaling().is_none() {
            outputs.push(self.begin_signaling(role));
        }
        if let Some(signaling) = self.signaling.as_mut() {
            outputs.extend(signaling.start_call()?);
        }
        self.apply_signal_outputs(outputs, out);
        Ok(())
    }

    // ---- inbound frames ----

    /// Decode and dispatch one wire frame. Bad frames are logged and dropped.
    pub fn handle_frame(&mut self, raw: &str, now: Instant) -> Vec<Outbound> {
        match decode(raw) {
            Ok(Frame::Message(msg)) => self.handle_message(msg, now),
            Ok(Frame::Unknown { tag }) => {
                debug!(tag = %tag, "Ignoring frame with unknown tag");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                Vec::new()
            }
        }
    }

    pub fn handle_message(&mut self, msg: RelayMessage, now: Instant) -> Vec<Outbound> {
        let tag = msg.tag();
        let mut out = Vec::new();
        if self.lifecycle.state() == &LifecycleState::Closed {
            debug!(tag, "Dropping frame for closed session");
            return out;
        }
        if msg.is_encrypted() && !self.is_keyed() {
            debug!(tag, "Dropping sealed frame before keys are established");
            return out;
        }
        if let Err(e) = self.dispatch(msg, now, &mut out) {
            warn!(tag, error = %e, "Dropping frame");
        }
        out
    }

    fn dispatch(
        &mut self,
        msg: RelayMessage,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        match msg {
            RelayMessage::KeyExchangeInit { public_key } => {
                self.require_role(Role::Responder)?;
                self.on_peer_key(&public_key, out)?;
                out.push(Outbound::Relay(RelayMessage::KeyExchangeAck {
                    public_key: self.exchange.public_bytes().to_vec(),
                }));
            }
            RelayMessage::KeyExchangeAck { public_key } => {
                self.require_role(Role::Initiator)?;
                if !self.key_init_sent {
                    return Err(SessionError::InvalidState(
                        "key exchange ack without init".into(),
                    ));
                }
                self.on_peer_key(&public_key, out)?;
            }
            RelayMessage::ChatText {
                envelope,
                self_destruct,
                sender_id,
            } => {
                if sender_id == self.sender_id {
                    debug!("Ignoring echo of own chat message");
                    return Ok(());
                }
                let plaintext = self.open(&envelope)?;
                let message = ChatMessage {
                    text: String::from_utf8_lossy(&plaintext).into_owned(),
                    origin: Origin::Remote,
                    sender_id,
                };
                self.append(message, self_destruct, now, out);
            }
            RelayMessage::SignalOffer { envelope } => {
                let offer = self.open_description(&envelope, DescriptionKind::Offer)?;
                let role = self.require_role(Role::Responder)?;
                if self.live_signaling().is_none() {
                    let prepare = self.begin_signaling(role);
                    self.apply_signal_outputs(vec![prepare], out);
                }
                let outputs = self
                    .live_signaling()
                    .ok_or_else(|| SessionError::InvalidState("no call in progress".into()))?
                    .on_remote_offer(offer)?;
                self.apply_signal_outputs(outputs, out);
            }
            RelayMessage::SignalAnswer { envelope } => {
                let answer = self.open_description(&envelope, DescriptionKind::Answer)?;
                self.require_role(Role::Initiator)?;
                let outputs = self
                    .live_signaling()
                    .ok_or_else(|| SessionError::InvalidState("no call in progress".into()))?
                    .on_remote_answer(answer)?;
                self.apply_signal_outputs(outputs, out);
            }
            RelayMessage::SignalCandidate { envelope } => {
                let bytes = self.open(&envelope)?;
                let candidate = IceCandidate::from_json(&bytes)?;
                let outputs = self
                    .live_signaling()
                    .ok_or_else(|| SessionError::InvalidState("no call in progress".into()))?
                    .on_remote_candidate(candidate);
                self.apply_signal_outputs(outputs, out);
            }
            RelayMessage::RoomCreated {
                passcode,
                duration_seconds,
            } => {
                self.lifecycle
                    .on_room_created(&passcode, duration_seconds, now)?;
                self.timers
                    .schedule(TimerKind::CountdownTick, now + COUNTDOWN_STEP);
                out.push(Outbound::Event(SessionEvent::RoomCreated {
                    passcode,
                    duration_secs: duration_seconds,
                }));
            }
            RelayMessage::RoomJoinResult { success, error } => {
                match self.lifecycle.on_join_result(success, error)? {
                    JoinOutcome::Joined { passcode } => {
                        out.push(Outbound::Event(SessionEvent::RoomJoined { passcode }));
                    }
                    JoinOutcome::Rejected { reason } => {
                        out.push(Outbound::Event(SessionEvent::JoinRejected { reason }));
                    }
                }
            }
            RelayMessage::PeerJoined => {
                if self.lifecycle.on_peer_joined()? {
                    out.push(Outbound::Event(SessionEvent::PeerJoined));
                }
                self.maybe_start_key_exchange(out);
            }
            RelayMessage::MatchWaiting => {
                self.lifecycle.on_match_waiting()?;
                out.push(Outbound::Event(SessionEvent::MatchWaiting));
            }
            RelayMessage::MatchFound {
                room_id,
                assigned_role,
            } => {
                self.lifecycle.on_match_found(&room_id, assigned_role)?;
                out.push(Outbound::Event(SessionEvent::MatchFound {
                    room_id,
                    role: assigned_role,
                }));
                self.maybe_start_key_exchange(out);
            }
            RelayMessage::SessionExpired { reason } => self.expire(reason, out),
            RelayMessage::ProtocolError { reason } => {
                if self.lifecycle.on_protocol_error() {
                    info!(reason = %reason, "Request aborted by room authority");
                }
                out.push(Outbound::Event(SessionEvent::ProtocolError { reason }));
            }
            RelayMessage::RoomCreate { .. }
            | RelayMessage::RoomJoin { .. }
            | RelayMessage::MatchRequest => {
                debug!("Ignoring request frame addressed to the room authority");
            }
        }
        Ok(())
    }

    fn require_role(&self, required: Role) -> Result<Role, SessionError> {
        let role = self.lifecycle.role().ok_or(SessionError::NotInRoom)?;
        if role == required {
            Ok(role)
        } else {
            Err(SessionError::RoleMismatch { required })
        }
    }

    // ---- key exchange ----

    fn maybe_start_key_exchange(&mut self, out: &mut Vec<Outbound>) {
        let Some(room) = self.lifecycle.active_room() else {
            return;
        };
        if room.role != Role::Initiator || !room.peer_present || self.key_init_sent {
            return;
        }
        info!("Starting key exchange");
        self.key_init_sent = true;
        out.push(Outbound::Relay(RelayMessage::KeyExchangeInit {
            public_key: self.exchange.public_bytes().to_vec(),
        }));
    }

    fn on_peer_key(
        &mut self,
        peer_public: &[u8],
        out: &mut Vec<Outbound>,
    ) -> Result<(), SessionError> {
        let secret = match self.exchange.complete(peer_public) {
            Ok(secret) => secret,
            Err(CryptoError::AlreadyDerived) => return Err(CryptoError::AlreadyDerived.into()),
            Err(e) => {
                out.push(Outbound::Event(SessionEvent::KeyExchangeFailed {
                    reason: e.to_string(),
                }));
                return Err(e.into());
            }
        };
        let cipher = EnvelopeCipher::new(&secret, self.options.cipher_suite)?;
        let code = secret.verification_code();
        info!(
            suite = %cipher.suite(),
            authenticated = cipher.suite().is_authenticated(),
            "Secure channel established"
        );
        self.cipher = Some(cipher);
        self.verification_code = Some(code.clone());
        out.push(Outbound::Event(SessionEvent::SecureChannelReady {
            verification_code: code,
        }));
        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<WireEnvelope, SessionError> {
        let cipher = self.cipher.as_ref().ok_or(SessionError::NotKeyed)?;
        let (nonce, content) = cipher.seal(plaintext)?.to_hex();
        Ok(WireEnvelope { nonce, content })
    }

    fn open(&self, envelope: &WireEnvelope) -> Result<Vec<u8>, SessionError> {
        let cipher = self.cipher.as_ref().ok_or(SessionError::NotKeyed)?;
        let sealed = EncryptedEnvelope::from_hex(&envelope.nonce, &envelope.content)?;
        Ok(cipher.open(&sealed)?)
    }

    fn open_description(
        &self,
        envelope: &WireEnvelope,
        expected: DescriptionKind,
    ) -> Result<SessionDescription, SessionError> {
        let bytes = self.open(envelope)?;
        let desc = SessionDescription::from_json(&bytes)?;
        if desc.kind != expected {
            return Err(ProtoError::MalformedMessage(format!(
                "expected {expected:?} description, got {:?}",
                desc.kind
            ))
            .into());
        }
        Ok(desc)
    }

    // ---- signaling ----

    fn live_signaling(&mut self) -> Option<&mut SignalingSession> {
        self.signaling
            .as_mut()
            .filter(|signaling| !signaling.state().is_terminal())
    }

    fn begin_signaling(&mut self, role: Role) -> SignalOutput {
        self.next_call_id += 1;
        let call_id = CallId(self.next_call_id);
        info!(%call_id, %role, "Starting call negotiation");
        let (signaling, prepare) = SignalingSession::new(call_id, role);
        self.signaling = Some(signaling);
        prepare
    }

    /// Feed an event from the media stack.
    pub fn on_media_event(&mut self, event: MediaEvent) -> Vec<Outbound> {
        let mut out = Vec::new();
        let Some(signaling) = self.signaling.as_mut() else {
            debug!(call_id = %event.call_id, "Ignoring media event with no call");
            return out;
        };
        let outputs = signaling.on_media_event(event);
        self.apply_signal_outputs(outputs, &mut out);
        out
    }

    fn apply_signal_outputs(&mut self, outputs: Vec<SignalOutput>, out: &mut Vec<Outbound>) {
        let Some(call_id) = self.signaling.as_ref().map(SignalingSession::call_id) else {
            return;
        };
        for output in outputs {
            match output {
                SignalOutput::Send(payload) => match self.seal_signal(&payload) {
                    Ok(msg) => out.push(Outbound::Relay(msg)),
                    Err(e) => warn!(%call_id, error = %e, "Failed to seal signaling payload"),
                },
                SignalOutput::Media(command) => out.push(Outbound::Media(command)),
                SignalOutput::StateChanged(state) => {
                    out.push(Outbound::Event(SessionEvent::CallStateChanged { call_id, state }));
                }
            }
        }
    }

    fn seal_signal(&self, payload: &SignalPayload) -> Result<RelayMessage, SessionError> {
        Ok(match payload {
            SignalPayload::Offer(desc) => RelayMessage::SignalOffer {
                envelope: self.seal(&desc.to_json()?)?,
            },
            SignalPayload::Answer(desc) => RelayMessage::SignalAnswer {
                envelope: self.seal(&desc.to_json()?)?,
            },
            SignalPayload::Candidate(candidate) => RelayMessage::SignalCandidate {
                envelope: self.seal(&candidate.to_json()?)?,
            },
        })
    }

    fn end_signaling(&mut self, out: &mut Vec<Outbound>) {
        if let Some(signaling) = self.live_signaling() {
            let outputs = signaling.end_call();
            self.apply_signal_outputs(outputs, out);
        }
    }

    // ---- message log and timers ----

    fn append(
        &mut self,
        message: ChatMessage,
        self_destruct: bool,
        now: Instant,
        out: &mut Vec<Outbound>,
    ) {
        let (id, destruct_at) = self.store.append(message.clone(), self_destruct, now);
        if let Some(at) = destruct_at {
            self.timers.schedule(TimerKind::SelfDestruct(id), at);
        }
        out.push(Outbound::Event(SessionEvent::MessageAppended {
            id,
            message,
            self_destruct,
        }));
    }

    /// Fire every timer due at `now`.
    pub fn on_timers(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        for due in self.timers.pop_due(now) {
            match due.kind {
                TimerKind::CountdownTick => {
                    if let Some(remaining_secs) = self.lifecycle.tick(now) {
                        out.push(Outbound::Event(SessionEvent::CountdownTick {
                            remaining_secs,
                        }));
                        if remaining_secs > 0 {
                            self.timers.schedule(
                                TimerKind::CountdownTick,
                                due.deadline + COUNTDOWN_STEP,
                            );
                        }
                    }
                }
                TimerKind::SelfDestruct(id) => {
                    if self.store.evict(id).is_some() {
                        debug!(entry = %id, "Self-destruct message evicted");
                        out.push(Outbound::Event(SessionEvent::MessageEvicted { id }));
                    }
                }
            }
        }
        out
    }

    // ---- teardown ----

    fn teardown(&mut self, out: &mut Vec<Outbound>) {
        self.end_signaling(out);
        self.timers.cancel_all();
        self.store.clear();
        self.cipher = None;
        self.verification_code = None;
    }

    fn expire(&mut self, reason: String, out: &mut Vec<Outbound>) {
        if !self.lifecycle.on_expired(&reason) {
            return;
        }
        info!(reason = %reason, "Session expired");
        self.teardown(out);
        out.push(Outbound::Event(SessionEvent::SessionExpired { reason }));
    }

    /// Close the session: end any call, cancel timers and drop all messages.
    pub fn close(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.lifecycle.state() == &LifecycleState::Closed {
            return out;
        }
        self.teardown(&mut out);
        self.lifecycle.close();
        out
    }
}
