//! Command definitions for the buffer controller actor.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::buffer::{
    BufferError, BufferSink, BufferStatus, OperationTicket, PlaybackTick, Quality, QualityChange,
    RepresentationUpdate, SinkError, TimeRange, TrackKind,
};

/// Commands that can be sent to the buffer controller actor.
///
/// Upstream signals are fire-and-forget; queries and lifecycle changes carry
/// a responder so the caller can await the actor's answer.
pub enum BufferCommand {
    /// An initialization payload finished downloading.
    InitSegmentLoaded { quality: Quality, bytes: Bytes },
    /// A media payload finished downloading.
    MediaSegmentLoaded {
        quality: Quality,
        index: u64,
        bytes: Bytes,
    },
    /// The fetch layer delivered the final segment of the stream.
    StreamCompleted { last_index: u64 },
    QualityChanged { change: QualityChange },
    RepresentationUpdated { update: RepresentationUpdate },
    Playback { tick: PlaybackTick },
    PlaybackRateChanged,
    ScheduledTimeOccurred { track: TrackKind },
    SetTargetBuffer { seconds: f64 },
    /// Bind a fresh sink after a reset.
    Initialize {
        sink: Arc<dyn BufferSink>,
        responder: oneshot::Sender<()>,
    },
    Reset {
        errored: bool,
        responder: oneshot::Sender<()>,
    },
    GetStatus {
        responder: oneshot::Sender<BufferStatus>,
    },
    GetBufferedRanges {
        responder: oneshot::Sender<Result<Vec<TimeRange>, BufferError>>,
    },
    /// Shutdown the controller actor gracefully.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Outcomes of sink work the actor spawned on the controller's behalf.
#[derive(Debug)]
pub enum SinkCompletion {
    Appended {
        ticket: OperationTicket,
        result: Result<(), SinkError>,
    },
    Removed {
        ticket: OperationTicket,
        result: Result<TimeRange, SinkError>,
    },
    RetryElapsed {
        ticket: OperationTicket,
    },
}
