//! Per-track media buffer admission.
//!
//! A [`BufferController`] sits between the fetch layer, which delivers
//! encoded initialization and media payloads, and a [`BufferSink`], which
//! holds decoded-ready media in a quota-limited store. It serializes sink
//! operations, re-primes the sink on quality switches, keeps tracks from
//! running too far ahead of each other, and recovers from quota rejection by
//! evicting media behind the playback position.

pub mod admission;
pub mod controller;
pub mod eviction;
pub mod level;
pub mod queue;
pub mod signals;
pub mod sink;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

#[cfg(test)]
mod tests;

pub use admission::{Admission, InitCompletion, WaitReason};
pub use controller::{
    BufferController, BufferStatus, Collaborators, PlaybackTick, QualityChange,
    RepresentationUpdate, SinkOperation,
};
pub use eviction::{QuotaRecovery, RecoveryProgress};
pub use level::{GapTransition, TrackLevels, decide_target_buffer};
pub use queue::{InitCache, PendingQueue};
pub use signals::{BufferSignal, SignalBus, TrackSignal};
pub use sink::{BufferSink, FetchTracker, PlaybackClock, SinkError};
pub use state::{AdmissionPhase, BufferState, InFlight, OperationTicket};
pub use types::{Quality, Segment, TimeRange, TrackKind};

/// Errors surfaced by the buffer controller actor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    /// The controller actor is no longer running.
    #[error("Buffer controller has shut down")]
    ControllerShutdown,

    /// The controller has no sink bound.
    #[error("Buffer controller for {track} has no sink bound")]
    NotInitialized { track: TrackKind },

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}
