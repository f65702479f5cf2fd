//! Buffer level evaluation and cross-track balancing.
//!
//! The level itself comes from the sink; this module turns it into the
//! sufficiency and outrun decisions and keeps the shared registry that lets
//! each track see how far its peers have buffered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::state::BufferState;
use super::types::TrackKind;

/// Transition of the outrun gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapTransition {
    /// Track got too far ahead of the least buffered track; suspend appends.
    Outrun,
    /// Gap closed again; appends may resume.
    Balanced,
}

/// Re-evaluates the outrun gate against the least buffered track.
///
/// The gate closes at `gap >= target * outrun_factor` and only reopens once
/// the gap is observed below that threshold, using the target in force at
/// the time of the check.
pub fn evaluate_gap(
    state: &mut BufferState,
    least_level: f64,
    outrun_factor: f64,
) -> Option<GapTransition> {
    let acceptable_gap = state.target_buffer * outrun_factor;
    let actual_gap = state.buffer_level - least_level;

    if actual_gap >= acceptable_gap && !state.level_outrun {
        state.level_outrun = true;
        Some(GapTransition::Outrun)
    } else if actual_gap < acceptable_gap && state.level_outrun {
        state.level_outrun = false;
        Some(GapTransition::Balanced)
    } else {
        None
    }
}

/// Sufficiency policy.
///
/// A track is short of buffer when it holds less than the target and either
/// the period still has more than the target left to play, or the final
/// segment has not been appended yet.
pub fn has_sufficient_buffer(
    buffer_level: f64,
    target_buffer: f64,
    time_to_period_end: f64,
    buffering_complete: bool,
) -> bool {
    let short = buffer_level < target_buffer
        && (target_buffer < time_to_period_end || !buffering_complete);
    !short
}

/// Records a sufficiency verdict, returning it only if it changed.
pub fn update_sufficiency(state: &mut BufferState, sufficient: bool) -> Option<bool> {
    if state.sufficient_buffer == Some(sufficient) {
        return None;
    }
    state.sufficient_buffer = Some(sufficient);
    Some(sufficient)
}

/// Chooses the target buffer duration for a representation.
///
/// `default_min_buffer_time` bounds short manifest values from below while
/// the period is long enough, and the period bounds everything from above.
pub fn decide_target_buffer(
    min_buffer_time: f64,
    period_duration: Option<f64>,
    default_min_buffer_time: f64,
) -> f64 {
    match period_duration {
        None => default_min_buffer_time.max(min_buffer_time),
        Some(period) if default_min_buffer_time < period && min_buffer_time < period => {
            default_min_buffer_time.max(min_buffer_time)
        }
        Some(period) if min_buffer_time >= period => period.min(default_min_buffer_time),
        Some(period) => period.min(min_buffer_time),
    }
}

/// Latest buffer level published by every active track.
///
/// Each controller writes only its own entry and reads the others.
#[derive(Debug, Clone, Default)]
pub struct TrackLevels {
    levels: Arc<RwLock<HashMap<TrackKind, f64>>>,
}

impl TrackLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the level of one track.
    pub fn publish(&self, track: TrackKind, level: f64) {
        self.levels.write().insert(track, level);
    }

    /// Removes a track that is being torn down.
    pub fn remove(&self, track: TrackKind) {
        self.levels.write().remove(&track);
    }

    pub fn level(&self, track: TrackKind) -> Option<f64> {
        self.levels.read().get(&track).copied()
    }

    /// Returns the lowest level across all tracks, if any published.
    pub fn least_level(&self) -> Option<f64> {
        self.levels.read().values().copied().reduce(f64::min)
    }

    pub fn track_count(&self) -> usize {
        self.levels.read().len()
    }
}
