//! Simulated playback clock and fetch history.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sluice_core::buffer::{FetchTracker, PlaybackClock, TimeRange, TrackKind};

#[derive(Debug)]
struct PlaybackState {
    position: f64,
    period_duration: f64,
    playing: bool,
}

/// Playback position advanced explicitly by the simulation.
#[derive(Debug, Clone)]
pub struct SimulatedPlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl SimulatedPlayback {
    pub fn new(period_duration: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaybackState {
                position: 0.0,
                period_duration,
                playing: false,
            })),
        }
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    /// Moves the position forward, stopping at the end of the period.
    ///
    /// Returns the new position.
    pub fn advance(&self, seconds: f64) -> f64 {
        let mut state = self.state.lock();
        state.position = (state.position + seconds).min(state.period_duration);
        state.position
    }

    /// Jumps to `position`, clamped to the period.
    pub fn seek(&self, position: f64) {
        let mut state = self.state.lock();
        state.position = position.clamp(0.0, state.period_duration);
    }

    pub fn is_ended(&self) -> bool {
        let state = self.state.lock();
        state.position >= state.period_duration
    }
}

impl PlaybackClock for SimulatedPlayback {
    fn current_time(&self) -> f64 {
        self.position()
    }

    fn time_to_period_end(&self) -> f64 {
        let state = self.state.lock();
        (state.period_duration - state.position).max(0.0)
    }

    fn period_duration(&self) -> Option<f64> {
        Some(self.state.lock().period_duration)
    }
}

/// Record of the segment requests the simulated fetcher executed.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFetch {
    executed: Arc<RwLock<HashMap<TrackKind, Vec<TimeRange>>>>,
}

impl SimulatedFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed request covering `span`.
    pub fn record(&self, track: TrackKind, span: TimeRange) {
        self.executed.write().entry(track).or_default().push(span);
    }

    /// Forgets the requests of `track`, as after a seek.
    pub fn clear(&self, track: TrackKind) {
        self.executed.write().remove(&track);
    }

    pub fn request_count(&self, track: TrackKind) -> usize {
        self.executed.read().get(&track).map_or(0, Vec::len)
    }
}

impl FetchTracker for SimulatedFetch {
    fn executed_request_start(&self, track: TrackKind, time: f64) -> Option<f64> {
        self.executed
            .read()
            .get(&track)?
            .iter()
            .rev()
            .find(|span| span.contains(time))
            .map(|span| span.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_clamps_to_period() {
        let playback = SimulatedPlayback::new(10.0);
        assert_eq!(playback.time_to_period_end(), 10.0);
        assert_eq!(playback.advance(4.0), 4.0);
        assert_eq!(playback.time_to_period_end(), 6.0);
        assert_eq!(playback.advance(20.0), 10.0);
        assert!(playback.is_ended());

        playback.seek(-3.0);
        assert_eq!(playback.current_time(), 0.0);
    }

    #[test]
    fn test_fetch_finds_request_covering_time() {
        let fetch = SimulatedFetch::new();
        fetch.record(TrackKind::Video, TimeRange::new(0.0, 2.0));
        fetch.record(TrackKind::Video, TimeRange::new(2.0, 4.0));

        assert_eq!(fetch.executed_request_start(TrackKind::Video, 3.0), Some(2.0));
        assert_eq!(fetch.executed_request_start(TrackKind::Video, 9.0), None);
        assert_eq!(fetch.executed_request_start(TrackKind::Audio, 1.0), None);

        fetch.clear(TrackKind::Video);
        assert_eq!(fetch.request_count(TrackKind::Video), 0);
    }
}
