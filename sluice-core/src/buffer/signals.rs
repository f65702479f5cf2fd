//! Typed notifications emitted by buffer controllers.

use tokio::sync::broadcast;

use super::types::{Quality, TimeRange, TrackKind};

/// Notification emitted by a controller for its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferSignal {
    /// Buffer level was recomputed (seconds ahead of playback).
    LevelUpdated { level: f64 },
    /// Sufficiency verdict changed.
    LevelStateChanged { sufficient: bool },
    /// Track got too far ahead of the least buffered track.
    LevelOutrun,
    /// Track is back within the allowed gap.
    LevelBalanced,
    /// Media was evicted from the sink.
    BufferCleared { range: TimeRange },
    /// A media segment landed in the sink.
    BytesAppended { index: u64 },
    /// The final media segment has been appended.
    BufferingCompleted,
    /// The sink rejected an append for lack of space.
    QuotaExceeded { index: Option<u64> },
    /// An append failed for another reason and the segment was dropped.
    AppendDropped {
        quality: Quality,
        index: Option<u64>,
    },
    /// The init payload for a quality must be fetched.
    InitRequested { quality: Quality },
    /// Target buffer duration changed.
    MinBufferTimeUpdated { seconds: f64 },
}

impl BufferSignal {
    /// Returns a stable name for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferSignal::LevelUpdated { .. } => "LevelUpdated",
            BufferSignal::LevelStateChanged { .. } => "LevelStateChanged",
            BufferSignal::LevelOutrun => "LevelOutrun",
            BufferSignal::LevelBalanced => "LevelBalanced",
            BufferSignal::BufferCleared { .. } => "BufferCleared",
            BufferSignal::BytesAppended { .. } => "BytesAppended",
            BufferSignal::BufferingCompleted => "BufferingCompleted",
            BufferSignal::QuotaExceeded { .. } => "QuotaExceeded",
            BufferSignal::AppendDropped { .. } => "AppendDropped",
            BufferSignal::InitRequested { .. } => "InitRequested",
            BufferSignal::MinBufferTimeUpdated { .. } => "MinBufferTimeUpdated",
        }
    }
}

/// A signal tagged with the track that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSignal {
    pub track: TrackKind,
    pub signal: BufferSignal,
}

/// Fan-out channel shared by all controllers of a player.
///
/// Publishing never blocks; with no subscribers signals are dropped and
/// slow subscribers observe `RecvError::Lagged` instead of stalling a
/// controller.
#[derive(Debug, Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<TrackSignal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a signal on behalf of `track`.
    pub fn publish(&self, track: TrackKind, signal: BufferSignal) {
        let _ = self.sender.send(TrackSignal { track, signal });
    }

    /// Subscribes to every signal published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackSignal> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(256)
    }
}
