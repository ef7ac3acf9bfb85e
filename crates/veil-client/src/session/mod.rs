//! Secure session protocol core.
//!
//! One [`Session`] per transport connection, driven by a single control loop.
//! Everything here is synchronous; time is passed in by the caller.

mod controller;
mod ephemeral;
mod lifecycle;
mod signaling;
mod timers;
mod types;

pub use controller::Session;
pub use ephemeral::{DEFAULT_SELF_DESTRUCT, EntryId, EphemeralEntry, EphemeralMessageStore};
pub use lifecycle::{ActiveRoom, JoinOutcome, LifecycleState, RoomAddress, SessionLifecycle};
pub use signaling::{
    CallId, MediaAction, MediaCommand, MediaEvent, MediaEventKind, SignalOutput, SignalPayload,
    SignalingSession, SignalingState,
};
pub use timers::{DueTimer, TimerId, TimerKind, TimerService};
pub use types::{
    ChatMessage, Command, Origin, Outbound, SessionError, SessionEvent, SessionOptions,
};
