//! Call negotiation state machine.
//!
//! Sequences offer, answer and candidate exchange between the two peers. The
//! relay carries the payloads sealed; the actual media stack is an external
//! collaborator driven through [`MediaCommand`] and answering with
//! [`MediaEvent`]. Each negotiation has its own [`CallId`] so late events from
//! a cancelled call are recognisable.
//!
//! Ordering rules:
//! - Remote candidates that arrive before the remote description is set are
//!   buffered and flushed in arrival order right after it is set.
//! - While a media step is in flight, inbound offers and answers queue up in
//!   arrival order and are replayed once the step resolves.

use std::collections::VecDeque;

use tracing::{debug, info, warn};
use veil_proto::{IceCandidate, Role, SessionDescription};

use super::types::SessionError;

/// Identity of one negotiation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    LocalReady,
    OfferSent,
    AwaitingOffer,
    RemoteDescriptionSet,
    Connected,
    Closed,
    Failed,
}

impl SignalingState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    const fn remote_description_set(self) -> bool {
        matches!(self, Self::RemoteDescriptionSet | Self::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAction {
    /// Acquire local capture and transport resources.
    Prepare,
    CreateOffer,
    /// Apply the remote offer and produce a matching answer.
    AcceptOffer { offer: SessionDescription },
    ApplyAnswer { answer: SessionDescription },
    AddCandidate { candidate: IceCandidate },
    /// Release everything held for this call.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub call_id: CallId,
    pub action: MediaAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventKind {
    LocalReady,
    OfferCreated { offer: SessionDescription },
    AnswerCreated { answer: SessionDescription },
    RemoteDescriptionApplied,
    LocalCandidate { candidate: IceCandidate },
    /// The media stack refused one remote candidate. Negotiation continues.
    CandidateRejected { reason: String },
    Connected,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub call_id: CallId,
    pub kind: MediaEventKind,
}

/// Payload to seal and send to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutput {
    Send(SignalPayload),
    Media(MediaCommand),
    StateChanged(SignalingState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStep {
    Prepare,
    CreateOffer,
    AcceptOffer,
    ApplyAnswer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteDescription {
    Offer(SessionDescription),
    Answer(SessionDescription),
}

/// One call's negotiation. Created lazily when signaling begins.
#[derive(Debug)]
pub struct SignalingSession {
    call_id: CallId,
    role: Role,
    state: SignalingState,
    pending: Option<PendingStep>,
    offer_requested: bool,
    local_description_set: bool,
    queued: VecDeque<RemoteDescription>,
    pending_candidates: Vec<IceCandidate>,
}

impl SignalingSession {
    /// Start a negotiation. The returned command asks the media stack to
    /// acquire local resources.
    pub fn new(call_id: CallId, role: Role) -> (Self, SignalOutput) {
        let session = Self {
            call_id,
            role,
            state: SignalingState::Idle,
            pending: Some(PendingStep::Prepare),
            offer_requested: false,
            local_description_set: false,
            queued: VecDeque::new(),
            pending_candidates: Vec::new(),
        };
        let prepare = session.command(MediaAction::Prepare);
        (session, prepare)
    }

    pub const fn call_id(&self) -> CallId {
        self.call_id
    }

    pub const fn state(&self) -> SignalingState {
        self.state
    }

    pub const fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    pub const fn remote_description_set(&self) -> bool {
        self.state.remote_description_set()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn command(&self, action: MediaAction) -> SignalOutput {
        SignalOutput::Media(MediaCommand {
            call_id: self.call_id,
            action,
        })
    }

    fn transition(&mut self, to: SignalingState, out: &mut Vec<SignalOutput>) {
        if self.state != to {
            debug!(call_id = %self.call_id, from = ?self.state, to = ?to, "Signaling transition");
            self.state = to;
            out.push(SignalOutput::StateChanged(to));
        }
    }

    /// Initiator only: place the call. If local resources are not ready yet
    /// the offer is created as soon as they are.
    pub fn start_call(&mut self) -> Result<Vec<SignalOutput>, SessionError> {
        if self.role != Role::Initiator {
            return Err(SessionError::RoleMismatch {
                required: Role::Initiator,
            });
        }
        match self.state {
            SignalingState::Idle => {
                self.offer_requested = true;
                Ok(Vec::new())
            }
            SignalingState::LocalReady if self.pending.is_none() => {
                self.pending = Some(PendingStep::CreateOffer);
                Ok(vec![self.command(MediaAction::CreateOffer)])
            }
            other => Err(SessionError::InvalidState(format!(
                "cannot start a call while {other:?}"
            ))),
        }
    }

    /// Responder only: the peer's offer arrived.
    pub fn on_remote_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<Vec<SignalOutput>, SessionError> {
        if self.role != Role::Responder {
            return Err(SessionError::RoleMismatch {
                required: Role::Responder,
            });
        }
        let mut out = Vec::new();
        self.accept_remote(RemoteDescription::Offer(offer), &mut out)?;
        Ok(out)
    }

    /// Initiator only: the peer's answer arrived.
    pub fn on_remote_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<Vec<SignalOutput>, SessionError> {
        if self.role != Role::Initiator {
            return Err(SessionError::RoleMismatch {
                required: Role::Initiator,
            });
        }
        let mut out = Vec::new();
        self.accept_remote(RemoteDescription::Answer(answer), &mut out)?;
        Ok(out)
    }

    fn accept_remote(
        &mut self,
        desc: RemoteDescription,
        out: &mut Vec<SignalOutput>,
    ) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::InvalidState(format!(
                "call already {:?}",
                self.state
            )));
        }
        if self.pending.is_some() || self.state == SignalingState::Idle {
            debug!(call_id = %self.call_id, "Queueing remote description until the current step resolves");
            self.queued.push_back(desc);
            return Ok(());
        }
        match (desc, self.state) {
            (RemoteDescription::Offer(offer), SignalingState::AwaitingOffer) => {
                self.pending = Some(PendingStep::AcceptOffer);
                out.push(self.command(MediaAction::AcceptOffer { offer }));
                Ok(())
            }
            (RemoteDescription::Answer(answer), SignalingState::OfferSent) => {
                self.pending = Some(PendingStep::ApplyAnswer);
                out.push(self.command(MediaAction::ApplyAnswer { answer }));
                Ok(())
            }
            (RemoteDescription::Offer(_), state) => Err(SessionError::InvalidState(format!(
                "unexpected offer while {state:?}"
            ))),
            (RemoteDescription::Answer(_), state) => Err(SessionError::InvalidState(format!(
                "unexpected answer while {state:?}"
            ))),
        }
    }

    /// A remote candidate arrived. Applied now if the remote description is
    /// set, buffered otherwise.
    pub fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Vec<SignalOutput> {
        if self.state.is_terminal() {
            debug!(call_id = %self.call_id, "Dropping candidate for finished call");
            return Vec::new();
        }
        if self.state.remote_description_set() {
            vec![self.command(MediaAction::AddCandidate { candidate })]
        } else {
            self.pending_candidates.push(candidate);
            Vec::new()
        }
    }

    /// Feed an event from the media stack. Events for another call are ignored.
    pub fn on_media_event(&mut self, event: MediaEvent) -> Vec<SignalOutput> {
        let mut out = Vec::new();
        if event.call_id != self.call_id {
            debug!(call_id = %self.call_id, stale = %event.call_id, "Ignoring media event for stale call");
            return out;
        }
        if self.state.is_terminal() {
            debug!(call_id = %self.call_id, "Ignoring media event for finished call");
            return out;
        }

        match event.kind {
            MediaEventKind::LocalReady => {
                if self.pending == Some(PendingStep::Prepare) {
                    self.pending = None;
                    self.transition(SignalingState::LocalReady, &mut out);
                    match self.role {
                        Role::Initiator if self.offer_requested => {
                            self.pending = Some(PendingStep::CreateOffer);
                            out.push(self.command(MediaAction::CreateOffer));
                        }
                        Role::Initiator => {}
                        Role::Responder => {
                            self.transition(SignalingState::AwaitingOffer, &mut out);
                        }
                    }
                }
            }
            MediaEventKind::OfferCreated { offer } => {
                if self.pending == Some(PendingStep::CreateOffer) {
                    self.pending = None;
                    self.local_description_set = true;
                    self.transition(SignalingState::OfferSent, &mut out);
                    out.push(SignalOutput::Send(SignalPayload::Offer(offer)));
                }
            }
            MediaEventKind::AnswerCreated { answer } => {
                if self.pending == Some(PendingStep::AcceptOffer) {
                    self.pending = None;
                    self.local_description_set = true;
                    self.transition(SignalingState::RemoteDescriptionSet, &mut out);
                    out.push(SignalOutput::Send(SignalPayload::Answer(answer)));
                    self.flush_candidates(&mut out);
                }
            }
            MediaEventKind::RemoteDescriptionApplied => {
                if self.pending == Some(PendingStep::ApplyAnswer) {
                    self.pending = None;
                    self.transition(SignalingState::RemoteDescriptionSet, &mut out);
                    self.flush_candidates(&mut out);
                }
            }
            MediaEventKind::LocalCandidate { candidate } => {
                out.push(SignalOutput::Send(SignalPayload::Candidate(candidate)));
            }
            MediaEventKind::CandidateRejected { reason } => {
                warn!(call_id = %self.call_id, reason = %reason, "Remote candidate rejected by media stack");
            }
            MediaEventKind::Connected => {
                if self.state == SignalingState::RemoteDescriptionSet {
                    info!(call_id = %self.call_id, "Call connected");
                    self.transition(SignalingState::Connected, &mut out);
                }
            }
            MediaEventKind::Failed { reason } => {
                self.fail(&reason, &mut out);
                return out;
            }
        }

        self.replay_queued(&mut out);
        out
    }

    fn flush_candidates(&mut self, out: &mut Vec<SignalOutput>) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            out.push(self.command(MediaAction::AddCandidate { candidate }));
        }
    }

    fn replay_queued(&mut self, out: &mut Vec<SignalOutput>) {
        while self.pending.is_none()
            && !self.state.is_terminal()
            && self.state != SignalingState::Idle
        {
            let Some(desc) = self.queued.pop_front() else {
                break;
            };
            if let Err(e) = self.accept_remote(desc, out) {
                warn!(call_id = %self.call_id, error = %e, "Dropping queued remote description");
            }
        }
    }

    /// Negotiation failed: move to `Failed` and release resources.
    pub fn fail(&mut self, reason: &str, out: &mut Vec<SignalOutput>) {
        if self.state.is_terminal() {
            return;
        }
        warn!(call_id = %self.call_id, reason, "Negotiation failed");
        self.release();
        self.transition(SignalingState::Failed, out);
        out.push(self.command(MediaAction::Close));
    }

    /// Hang up. Cancels any in-flight step and discards buffered input.
    pub fn end_call(&mut self) -> Vec<SignalOutput> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }
        self.release();
        self.transition(SignalingState::Closed, &mut out);
        out.push(self.command(MediaAction::Close));
        out
    }

    fn release(&mut self) {
        self.pending = None;
        self.offer_requested = false;
        self.queued.clear();
        self.pending_candidates.clear();
    }
}
