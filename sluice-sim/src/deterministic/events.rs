//! Events driving a buffer simulation.

use std::cmp::Ordering;
use std::time::Duration;

use bytes::Bytes;
use sluice_core::buffer::{OperationTicket, Quality, TimeRange, TrackKind};

/// Ordering of events scheduled for the same instant.
///
/// Lower numeric values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Sink completions
    Sink = 0,
    /// Segment downloads
    Network = 1,
    /// Playback clock ticks and timers
    Clock = 2,
}

/// Something that happens at a point in simulated time.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// An initialization payload finished downloading
    InitLoaded { track: TrackKind, quality: Quality },
    /// A media segment finished downloading
    SegmentLoaded {
        track: TrackKind,
        quality: Quality,
        index: u64,
    },
    /// The sink finished applying an append
    SinkAppendDone {
        track: TrackKind,
        ticket: OperationTicket,
        bytes: Bytes,
    },
    /// The sink finished applying a removal
    SinkRemoveDone {
        track: TrackKind,
        ticket: OperationTicket,
        range: TimeRange,
    },
    /// An eviction backoff timer fired
    RetryElapsed {
        track: TrackKind,
        ticket: OperationTicket,
    },
    /// The playback clock ticked
    PlaybackTick,
}

impl EventType {
    /// Returns string representation of event type for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InitLoaded { .. } => "InitLoaded",
            EventType::SegmentLoaded { .. } => "SegmentLoaded",
            EventType::SinkAppendDone { .. } => "SinkAppendDone",
            EventType::SinkRemoveDone { .. } => "SinkRemoveDone",
            EventType::RetryElapsed { .. } => "RetryElapsed",
            EventType::PlaybackTick => "PlaybackTick",
        }
    }

    /// Returns the track the event belongs to, if any.
    pub fn track(&self) -> Option<TrackKind> {
        match self {
            EventType::InitLoaded { track, .. }
            | EventType::SegmentLoaded { track, .. }
            | EventType::SinkAppendDone { track, .. }
            | EventType::SinkRemoveDone { track, .. }
            | EventType::RetryElapsed { track, .. } => Some(*track),
            EventType::PlaybackTick => None,
        }
    }
}

/// Scheduled event.
#[derive(Debug, Clone)]
pub struct SimulationEvent {
    /// Unique event ID for deterministic ordering
    pub id: u64,
    pub timestamp: Duration,
    pub event_type: EventType,
    pub priority: EventPriority,
}

impl SimulationEvent {
    pub fn new(
        id: u64,
        timestamp: Duration,
        event_type: EventType,
        priority: EventPriority,
    ) -> Self {
        Self {
            id,
            timestamp,
            event_type,
            priority,
        }
    }
}

impl Eq for SimulationEvent {}

impl PartialEq for SimulationEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for SimulationEvent {
    // Reversed so that `BinaryHeap` pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for SimulationEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
