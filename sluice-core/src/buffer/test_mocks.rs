//! In-memory collaborators for exercising controllers in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::controller::Collaborators;
use super::level::TrackLevels;
use super::signals::SignalBus;
use super::sink::{BufferSink, FetchTracker, PlaybackClock, SinkError};
use super::types::{TimeRange, TrackKind};

#[derive(Debug, Default)]
struct MockSinkState {
    appended: Vec<Bytes>,
    removed: Vec<TimeRange>,
    append_results: VecDeque<Result<(), SinkError>>,
    remove_results: VecDeque<Result<TimeRange, SinkError>>,
    ranges: Vec<TimeRange>,
    level: f64,
    offset: f64,
    offset_writes: usize,
    aborted: bool,
    detached: bool,
}

/// Scriptable sink that records every call.
///
/// Appends succeed and removals clear exactly the requested range unless a
/// result was queued with `fail_next_append` or `fail_next_remove`.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<MockSinkState>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next append.
    pub fn fail_next_append(&self, error: SinkError) {
        self.state.lock().append_results.push_back(Err(error));
    }

    /// Queues the result of the next removal.
    pub fn fail_next_remove(&self, error: SinkError) {
        self.state.lock().remove_results.push_back(Err(error));
    }

    pub fn set_level(&self, level: f64) {
        self.state.lock().level = level;
    }

    pub fn set_ranges(&self, ranges: Vec<TimeRange>) {
        self.state.lock().ranges = ranges;
    }

    pub fn appended(&self) -> Vec<Bytes> {
        self.state.lock().appended.clone()
    }

    pub fn removed(&self) -> Vec<TimeRange> {
        self.state.lock().removed.clone()
    }

    pub fn offset_writes(&self) -> usize {
        self.state.lock().offset_writes
    }

    pub fn was_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    pub fn was_detached(&self) -> bool {
        self.state.lock().detached
    }

    /// Outcome of the next append, consuming a queued failure if any.
    pub fn next_append_result(&self, bytes: Bytes) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        let result = state.append_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.appended.push(bytes);
        }
        result
    }

    /// Outcome of the next removal, consuming a queued failure if any.
    pub fn next_remove_result(&self, range: TimeRange) -> Result<TimeRange, SinkError> {
        let mut state = self.state.lock();
        let result = state.remove_results.pop_front().unwrap_or(Ok(range));
        if let Ok(removed) = result {
            state.removed.push(removed);
        }
        result
    }
}

#[async_trait]
impl BufferSink for MockSink {
    async fn append(&self, bytes: Bytes) -> Result<(), SinkError> {
        self.next_append_result(bytes)
    }

    async fn remove(&self, range: TimeRange) -> Result<TimeRange, SinkError> {
        self.next_remove_result(range)
    }

    fn buffered_ranges(&self) -> Vec<TimeRange> {
        self.state.lock().ranges.clone()
    }

    fn buffer_length(&self, _at: f64) -> f64 {
        self.state.lock().level
    }

    fn timestamp_offset(&self) -> f64 {
        self.state.lock().offset
    }

    fn set_timestamp_offset(&self, offset: f64) {
        let mut state = self.state.lock();
        state.offset = offset;
        state.offset_writes += 1;
    }

    fn abort(&self) {
        self.state.lock().aborted = true;
    }

    fn detach(&self) {
        self.state.lock().detached = true;
    }
}

#[derive(Debug)]
struct ClockState {
    current_time: f64,
    time_to_period_end: f64,
    period_duration: Option<f64>,
}

/// Manually driven playback clock.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                current_time: 0.0,
                time_to_period_end: 600.0,
                period_duration: None,
            })),
        }
    }

    pub fn set_time(&self, time: f64) {
        self.state.lock().current_time = time;
    }

    pub fn set_time_to_period_end(&self, seconds: f64) {
        self.state.lock().time_to_period_end = seconds;
    }

    pub fn set_period_duration(&self, seconds: Option<f64>) {
        self.state.lock().period_duration = seconds;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MockClock {
    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn time_to_period_end(&self) -> f64 {
        self.state.lock().time_to_period_end
    }

    fn period_duration(&self) -> Option<f64> {
        self.state.lock().period_duration
    }
}

/// Fetch tracker answering with a fixed request start.
#[derive(Debug, Clone, Default)]
pub struct MockFetch {
    request_start: Arc<Mutex<Option<f64>>>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_request_start(&self, start: Option<f64>) {
        *self.request_start.lock() = start;
    }
}

impl FetchTracker for MockFetch {
    fn executed_request_start(&self, _track: TrackKind, _time: f64) -> Option<f64> {
        *self.request_start.lock()
    }
}

/// Bundles mock collaborators with the handles tests use to steer them.
#[derive(Clone)]
pub struct MockEnvironment {
    pub clock: MockClock,
    pub fetch: MockFetch,
    pub levels: TrackLevels,
    pub signals: SignalBus,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            clock: MockClock::new(),
            fetch: MockFetch::new(),
            levels: TrackLevels::new(),
            signals: SignalBus::new(1024),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            clock: Arc::new(self.clock.clone()),
            fetch: Arc::new(self.fetch.clone()),
            levels: self.levels.clone(),
            signals: self.signals.clone(),
        }
    }
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
