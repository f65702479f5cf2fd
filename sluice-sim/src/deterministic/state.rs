//! Observable simulation state and metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use sluice_core::buffer::{BufferSignal, TrackKind};

use super::invariants::InvariantViolation;

/// What the invariants can see of one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSnapshot {
    /// Sink operations issued and not yet completed
    pub outstanding_operations: usize,
    pub max_appended_index: Option<u64>,
    /// Value of `max_appended_index` before the latest event
    pub previous_max_appended_index: Option<u64>,
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub buffering_completed_signals: u32,
    pub buffer_level: f64,
    pub quota_exceeded: bool,
}

/// State checked by invariants after every event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationState {
    /// Simulated time of the latest event
    pub elapsed: Duration,
    pub tracks: BTreeMap<TrackKind, TrackSnapshot>,
    pub position: f64,
    pub playing: bool,
    pub ended: bool,
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_mut(&mut self, track: TrackKind) -> &mut TrackSnapshot {
        self.tracks.entry(track).or_default()
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    pub events_processed: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub signals_by_type: BTreeMap<String, u64>,
    pub segments_fetched: u64,
    pub segments_appended: u64,
    pub quota_rejections: u64,
    pub dropped_appends: u64,
    pub evicted_seconds: f64,
    pub quality_switches: u64,
    /// Playback ticks spent waiting for media after playback started
    pub stall_ticks: u64,
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event_type: &str) {
        self.events_processed += 1;
        *self
            .events_by_type
            .entry(event_type.to_string())
            .or_insert(0) += 1;
    }

    /// Folds a controller signal into the counters.
    pub fn record_signal(&mut self, signal: &BufferSignal) {
        *self
            .signals_by_type
            .entry(signal.as_str().to_string())
            .or_insert(0) += 1;

        match signal {
            BufferSignal::BytesAppended { .. } => self.segments_appended += 1,
            BufferSignal::QuotaExceeded { .. } => self.quota_rejections += 1,
            BufferSignal::AppendDropped { .. } => self.dropped_appends += 1,
            BufferSignal::BufferCleared { range } => self.evicted_seconds += range.duration(),
            _ => {}
        }
    }

    pub fn record_invariant_violation(&mut self, violation: InvariantViolation) {
        self.invariant_violations.push(violation);
    }

    pub fn signal_count(&self, name: &str) -> u64 {
        self.signals_by_type.get(name).copied().unwrap_or(0)
    }
}
