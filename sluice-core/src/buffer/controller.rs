//! Per-track buffer admission controller.
//!
//! [`BufferController`] owns the pending queue, the init cache and the
//! track state, and reacts to upstream signals and sink completions. It
//! performs no I/O of its own: every append, remove and retry timer it wants
//! is queued as a [`SinkOperation`] for the driver (the actor in
//! `crate::engine`, or a simulator) to execute, and the outcome is fed back
//! through the `on_*_completed` methods with the operation's ticket.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::admission::{
    self, Admission, InitCompletion, complete_init, complete_media, next_init_admission,
    next_media_admission, reject_for_quota,
};
use super::eviction::{QuotaRecovery, RecoveryProgress, eviction_range};
use super::level::{
    GapTransition, TrackLevels, decide_target_buffer, evaluate_gap, has_sufficient_buffer,
    update_sufficiency,
};
use super::queue::{InitCache, PendingQueue};
use super::signals::{BufferSignal, SignalBus};
use super::sink::{BufferSink, FetchTracker, PlaybackClock, SinkError};
use super::state::{AdmissionPhase, BufferState, InFlight, OperationTicket};
use super::types::{Quality, Segment, TimeRange, TrackKind};
use crate::config::ControllerConfig;

/// Shortest wait between eviction rounds, used when the target buffer is
/// zero or not a valid duration.
pub const MIN_EVICTION_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Work the controller asks its driver to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOperation {
    /// Append `bytes` and report through `on_append_completed`.
    Append {
        ticket: OperationTicket,
        bytes: Bytes,
    },
    /// Remove `range` and report through `on_remove_completed`.
    Remove {
        ticket: OperationTicket,
        range: TimeRange,
    },
    /// Wait `delay`, then call `on_eviction_retry_elapsed`.
    ArmRetry {
        ticket: OperationTicket,
        delay: Duration,
    },
}

/// Collaborators shared with the rest of the player.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn PlaybackClock>,
    pub fetch: Arc<dyn FetchTracker>,
    pub levels: TrackLevels,
    pub signals: SignalBus,
}

/// Quality selection change announced by the representation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityChange {
    pub track: TrackKind,
    pub old_quality: Quality,
    pub new_quality: Quality,
    /// Presentation offset of the newly selected representation
    pub timestamp_offset: Option<f64>,
}

/// Representation metadata refresh (quality switch or manifest update).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepresentationUpdate {
    pub timestamp_offset: f64,
    /// Manifest `minBufferTime` in seconds
    pub min_buffer_time: f64,
}

/// Playback clock notifications that refresh the buffer level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackTick {
    Progress,
    Seeking { target: f64 },
    TimeUpdated,
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferStatus {
    pub track: TrackKind,
    pub phase: AdmissionPhase,
    pub buffer_level: f64,
    pub target_buffer: f64,
    pub sufficient_buffer: Option<bool>,
    pub level_outrun: bool,
    pub quota_exceeded: bool,
    pub pending_segments: usize,
    pub pending_bytes: usize,
    pub cached_inits: usize,
    pub current_quality: Quality,
    pub required_init_quality: Option<Quality>,
    pub max_appended_index: Option<u64>,
    pub last_index: Option<u64>,
    pub buffering_complete: bool,
    pub bound: bool,
}

/// Buffer admission controller for one track.
pub struct BufferController {
    track: TrackKind,
    config: ControllerConfig,
    initial_quality: Quality,
    state: BufferState,
    queue: PendingQueue,
    init_cache: InitCache,
    recovery: QuotaRecovery,
    sink: Option<Arc<dyn BufferSink>>,
    collaborators: Collaborators,
    operations: Vec<SinkOperation>,
}

impl BufferController {
    /// Creates a controller bound to `sink`.
    ///
    /// The track starts out waiting for the init payload of
    /// `initial_quality`.
    pub fn new(
        track: TrackKind,
        initial_quality: Quality,
        sink: Arc<dyn BufferSink>,
        collaborators: Collaborators,
        config: ControllerConfig,
    ) -> Self {
        let state = BufferState::new(initial_quality, config.initial_target_buffer_secs);
        collaborators.levels.publish(track, 0.0);
        info!("Initialized {} buffer controller at {}", track, initial_quality);

        Self {
            track,
            config,
            initial_quality,
            state,
            queue: PendingQueue::new(),
            init_cache: InitCache::new(),
            recovery: QuotaRecovery::new(),
            sink: Some(sink),
            collaborators,
            operations: Vec::new(),
        }
    }

    /// Binds a fresh sink, discarding all earlier bookkeeping.
    pub fn initialize(&mut self, sink: Arc<dyn BufferSink>) {
        self.discard_bookkeeping();
        self.sink = Some(sink);
        self.collaborators.levels.publish(self.track, 0.0);
        info!(
            "Re-initialized {} buffer controller (generation {})",
            self.track,
            self.state.generation()
        );
    }

    /// Tears the controller down.
    ///
    /// Operations already issued to the sink are not cancelled; their
    /// completions are ignored. The sink is aborted and detached unless the
    /// track is in an error state, where the host has already invalidated it.
    pub fn reset(&mut self, errored: bool) {
        self.discard_bookkeeping();
        self.collaborators.levels.remove(self.track);

        if let Some(sink) = self.sink.take() {
            if !errored {
                sink.abort();
                sink.detach();
            }
        }
        info!("Reset {} buffer controller (errored: {})", self.track, errored);
    }

    fn discard_bookkeeping(&mut self) {
        let target = self.state.target_buffer;
        self.state.restart(self.initial_quality, target);
        self.queue.clear();
        self.init_cache.clear();
        self.recovery.finish();
        self.operations.clear();
    }

    /// Drains the sink operations queued since the last call.
    pub fn take_operations(&mut self) -> Vec<SinkOperation> {
        std::mem::take(&mut self.operations)
    }

    // --- Upstream signals ---

    /// Caches an init payload and appends it if the track is waiting for it.
    pub fn on_init_segment_loaded(&mut self, quality: Quality, bytes: Bytes) {
        if !self.is_bound() {
            return;
        }
        debug!("Init segment loaded for {} at {}", self.track, quality);
        if !self.init_cache.insert(quality, bytes) {
            trace!("Keeping cached init for {} at {}", self.track, quality);
        }

        if quality != self.state.current_quality || !self.state.awaiting_init() {
            return;
        }
        self.switch_init();
    }

    /// Queues a media segment and admits it if possible.
    pub fn on_media_segment_loaded(&mut self, quality: Quality, index: u64, bytes: Bytes) {
        if !self.is_bound() {
            return;
        }
        self.queue.push_back(Segment::media(quality, index, bytes));
        self.append_next_media();
    }

    /// Records the segment count once the fetch layer reached the end.
    pub fn on_stream_completed(&mut self, last_index: u64) {
        if !self.is_bound() {
            return;
        }
        debug!("Stream for {} completed at index {}", self.track, last_index);
        self.state.last_index = Some(last_index);
        if admission::check_buffering_complete(&mut self.state) {
            self.signal_buffering_completed();
        }
    }

    /// Switches to a new quality and re-primes the sink with its init payload.
    pub fn on_quality_changed(&mut self, change: QualityChange) {
        if change.track != self.track || !self.is_bound() {
            return;
        }
        if change.new_quality == self.state.current_quality {
            return;
        }

        info!(
            "Switching {} from {} to {}",
            self.track, change.old_quality, change.new_quality
        );
        if let Some(offset) = change.timestamp_offset {
            self.apply_timestamp_offset(offset);
        }
        self.state.current_quality = change.new_quality;
        self.state.required_init_quality = Some(change.new_quality);
        self.switch_init();
    }

    /// Applies refreshed representation metadata.
    pub fn on_representation_updated(&mut self, update: RepresentationUpdate) {
        if !self.is_bound() {
            return;
        }
        self.apply_timestamp_offset(update.timestamp_offset);

        let target = decide_target_buffer(
            update.min_buffer_time,
            self.collaborators.clock.period_duration(),
            self.config.default_min_buffer_time_secs,
        );
        self.set_target_buffer(target);
    }

    /// Refreshes the level, or nudges a stalled eviction loop.
    pub fn on_playback_tick(&mut self, tick: PlaybackTick) {
        if let PlaybackTick::Seeking { target } = tick {
            self.state.seek_target = Some(target);
        }
        if !self.is_bound() {
            return;
        }

        if self.state.quota_exceeded {
            let round_pending =
                self.state.is_operation_in_flight() || self.recovery.is_retry_pending();
            if !round_pending {
                debug!("Restarting stalled eviction for {}", self.track);
                if !self.recovery.is_active() {
                    self.recovery.begin();
                }
                self.run_eviction_round();
            }
        } else {
            self.update_buffer_level();
        }
    }

    /// Re-runs the sufficiency policy after a playback rate change.
    pub fn on_playback_rate_changed(&mut self) {
        if self.is_bound() {
            self.check_sufficient_buffer();
        }
    }

    /// Re-runs the sufficiency policy when the scheduler wakes for this track.
    pub fn on_scheduled_time_occurred(&mut self, track: TrackKind) {
        if track == self.track && self.is_bound() {
            self.check_sufficient_buffer();
        }
    }

    /// Changes the target buffer duration and re-evaluates the level.
    pub fn set_target_buffer(&mut self, seconds: f64) {
        if self.state.target_buffer == seconds {
            return;
        }
        info!("Target buffer for {} is now {:.2}s", self.track, seconds);
        self.state.target_buffer = seconds;
        self.publish(BufferSignal::MinBufferTimeUpdated { seconds });

        if self.is_bound() {
            self.evaluate_level();
        }
    }

    // --- Sink completions ---

    /// Handles the outcome of an append.
    pub fn on_append_completed(&mut self, ticket: OperationTicket, result: Result<(), SinkError>) {
        if !self.is_bound() || !self.state.is_current(ticket) {
            debug!("Ignoring stale append completion {} for {}", ticket, self.track);
            return;
        }
        let segment = match self.state.in_flight.take() {
            Some(InFlight::Append { segment, .. }) => segment,
            other => {
                self.state.in_flight = other;
                return;
            }
        };

        match result {
            Ok(()) => self.on_appended_to_sink(segment),
            Err(e) if e.is_quota_exceeded() => self.on_quota_exceeded(segment),
            Err(e) => {
                // Dropped, not retried: the failure cause is unknown.
                warn!("Dropping {} for {}: {}", segment, self.track, e);
                self.publish(BufferSignal::AppendDropped {
                    quality: segment.quality,
                    index: segment.index,
                });
                self.continue_admission();
            }
        }
    }

    /// Handles the outcome of an eviction round.
    pub fn on_remove_completed(
        &mut self,
        ticket: OperationTicket,
        result: Result<TimeRange, SinkError>,
    ) {
        if !self.is_bound() || !self.state.is_current(ticket) {
            debug!("Ignoring stale remove completion {} for {}", ticket, self.track);
            return;
        }
        match self.state.in_flight.take() {
            Some(InFlight::Remove { .. }) => {}
            other => {
                self.state.in_flight = other;
                return;
            }
        }

        let removed = match result {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Eviction for {} stalled: {}", self.track, e);
                return;
            }
        };

        self.publish(BufferSignal::BufferCleared { range: removed });
        match self
            .recovery
            .record_removed(removed, self.state.target_buffer)
        {
            RecoveryProgress::Recovered { removed_seconds } => {
                info!(
                    "Recovered {} from quota exceeded after {} rounds ({:.2}s removed)",
                    self.track,
                    self.recovery.rounds(),
                    removed_seconds
                );
                self.state.quota_exceeded = false;
                self.recovery.finish();
                self.resume_admission();
            }
            RecoveryProgress::Continue { removed_seconds } => {
                debug!(
                    "Removed {:.2}s of {:.2}s needed for {}",
                    removed_seconds, self.state.target_buffer, self.track
                );
                self.arm_eviction_retry();
            }
        }
    }

    /// Starts the next eviction round once the backoff elapsed.
    pub fn on_eviction_retry_elapsed(&mut self, ticket: OperationTicket) {
        if !self.recovery.take_retry(ticket) {
            return;
        }
        if self.state.quota_exceeded && self.is_bound() {
            self.run_eviction_round();
        }
    }

    // --- Admission ---

    fn append_next_media(&mut self) {
        if !self.is_bound() {
            return;
        }
        loop {
            match next_media_admission(&self.state, &mut self.queue) {
                Admission::Append(segment) => {
                    self.issue_append(segment);
                    return;
                }
                Admission::Discard(segment) => {
                    debug!(
                        "Discarding {} for {}, current quality is {}",
                        segment, self.track, self.state.current_quality
                    );
                    self.on_media_appended(segment.index);
                }
                Admission::Wait(reason) => {
                    trace!("{} admission waiting: {:?}", self.track, reason);
                    return;
                }
                Admission::RequestInit(_) => return,
            }
        }
    }

    fn switch_init(&mut self) {
        if !self.is_bound() {
            return;
        }
        match next_init_admission(&self.state, &self.init_cache) {
            Admission::Append(segment) => self.issue_append(segment),
            Admission::RequestInit(quality) => {
                debug!("Requesting init segment for {} at {}", self.track, quality);
                self.publish(BufferSignal::InitRequested { quality });
            }
            Admission::Wait(reason) => {
                trace!("{} init append deferred: {:?}", self.track, reason);
            }
            Admission::Discard(_) => {}
        }
    }

    fn resume_admission(&mut self) {
        self.update_buffer_level();
        self.continue_admission();
    }

    /// Issues whatever comes next once the sink is free: a deferred init
    /// payload takes precedence over queued media.
    fn continue_admission(&mut self) {
        if self.state.awaiting_init() {
            self.switch_init();
        } else {
            self.append_next_media();
        }
    }

    fn issue_append(&mut self, segment: Segment) {
        let ticket = self.state.issue_ticket();
        debug!("Appending {} to {} sink ({})", segment, self.track, ticket);
        let bytes = segment.bytes.clone();
        self.state.in_flight = Some(InFlight::Append { ticket, segment });
        self.operations.push(SinkOperation::Append { ticket, bytes });
    }

    fn on_appended_to_sink(&mut self, segment: Segment) {
        self.state.quota_exceeded = false;
        self.refresh_level();
        self.log_buffered_ranges();

        match segment.index {
            Some(index) => {
                self.on_media_appended(Some(index));
                self.publish(BufferSignal::BytesAppended { index });
                self.evaluate_level();
                self.continue_admission();
            }
            None => {
                self.evaluate_level();
                match complete_init(&mut self.state, segment.quality) {
                    InitCompletion::Satisfied => {
                        debug!("Init for {} at {} appended", self.track, segment.quality);
                        self.append_next_media();
                    }
                    InitCompletion::Superseded { required } => {
                        debug!(
                            "Init at {} superseded by {} for {}",
                            segment.quality, required, self.track
                        );
                        self.switch_init();
                    }
                }
            }
        }
    }

    fn on_media_appended(&mut self, index: Option<u64>) {
        let Some(index) = index else {
            return;
        };
        if complete_media(&mut self.state, index) {
            self.signal_buffering_completed();
        }
    }

    fn signal_buffering_completed(&mut self) {
        info!("Buffering completed for {}", self.track);
        self.publish(BufferSignal::BufferingCompleted);
    }

    // --- Quota recovery ---

    fn on_quota_exceeded(&mut self, segment: Segment) {
        let index = segment.index;
        warn!("Quota exceeded appending {} to {}", segment, self.track);
        reject_for_quota(&mut self.state, &mut self.queue, segment);
        self.publish(BufferSignal::QuotaExceeded { index });

        self.recovery.begin();
        self.run_eviction_round();
    }

    fn run_eviction_round(&mut self) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let now = self.collaborators.clock.current_time();
        let buffered = sink.buffered_ranges();
        let request_start = self
            .collaborators
            .fetch
            .executed_request_start(self.track, now);

        match eviction_range(&buffered, now, request_start, self.state.seek_target) {
            Some(range) if !range.is_empty() => {
                let ticket = self.state.issue_ticket();
                debug!("Evicting {} from {} sink ({})", range, self.track, ticket);
                self.state.in_flight = Some(InFlight::Remove { ticket, range });
                self.operations.push(SinkOperation::Remove { ticket, range });
            }
            _ => {
                debug!("Nothing behind playback to evict for {}", self.track);
                self.arm_eviction_retry();
            }
        }
    }

    fn arm_eviction_retry(&mut self) {
        let ticket = self.state.issue_ticket();
        let delay = Duration::try_from_secs_f64(self.state.target_buffer)
            .unwrap_or(Duration::ZERO)
            .max(MIN_EVICTION_RETRY_DELAY);
        self.recovery.arm_retry(ticket);
        self.operations.push(SinkOperation::ArmRetry { ticket, delay });
    }

    // --- Level monitoring ---

    fn update_buffer_level(&mut self) {
        if self.refresh_level() {
            self.evaluate_level();
        }
    }

    fn refresh_level(&mut self) -> bool {
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };
        let now = self.collaborators.clock.current_time();
        let level = sink.buffer_length(now);

        self.state.buffer_level = level;
        self.collaborators.levels.publish(self.track, level);
        self.publish(BufferSignal::LevelUpdated { level });
        true
    }

    fn evaluate_level(&mut self) {
        self.check_gap_between_buffers();
        self.check_sufficient_buffer();
        if self.state.buffer_level < self.config.stall_threshold_secs {
            self.report_sufficiency(false);
        }
    }

    fn check_gap_between_buffers(&mut self) {
        let least_level = self
            .collaborators
            .levels
            .least_level()
            .unwrap_or(self.state.buffer_level);

        match evaluate_gap(&mut self.state, least_level, self.config.outrun_factor) {
            Some(GapTransition::Outrun) => {
                info!(
                    "{} buffer outran least buffered track ({:.2}s vs {:.2}s)",
                    self.track, self.state.buffer_level, least_level
                );
                self.publish(BufferSignal::LevelOutrun);
            }
            Some(GapTransition::Balanced) => {
                info!("{} buffer balanced again", self.track);
                self.publish(BufferSignal::LevelBalanced);
                self.append_next_media();
            }
            None => {}
        }
    }

    fn check_sufficient_buffer(&mut self) {
        let time_to_end = self.collaborators.clock.time_to_period_end();
        let sufficient = has_sufficient_buffer(
            self.state.buffer_level,
            self.state.target_buffer,
            time_to_end,
            self.state.buffering_complete,
        );
        self.report_sufficiency(sufficient);
    }

    fn report_sufficiency(&mut self, sufficient: bool) {
        let Some(sufficient) = update_sufficiency(&mut self.state, sufficient) else {
            return;
        };
        if sufficient {
            info!("Got enough {} buffer to start", self.track);
        } else {
            info!("Waiting for more {} buffer before starting playback", self.track);
        }
        self.publish(BufferSignal::LevelStateChanged { sufficient });
    }

    fn apply_timestamp_offset(&mut self, offset: f64) {
        if let Some(sink) = self.sink.as_ref() {
            if sink.timestamp_offset() != offset {
                debug!("Setting {} timestamp offset to {}", self.track, offset);
                sink.set_timestamp_offset(offset);
            }
        }
        self.state.timestamp_offset = Some(offset);
    }

    fn log_buffered_ranges(&self) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        for range in sink.buffered_ranges() {
            debug!("Buffered {} range: {}", self.track, range);
        }
    }

    fn publish(&self, signal: BufferSignal) {
        self.collaborators.signals.publish(self.track, signal);
    }

    // --- Queries ---

    pub fn track(&self) -> TrackKind {
        self.track
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_bound(&self) -> bool {
        self.sink.is_some()
    }

    /// Returns the bound sink, if any.
    pub fn sink(&self) -> Option<Arc<dyn BufferSink>> {
        self.sink.clone()
    }

    pub fn state(&self) -> &BufferState {
        &self.state
    }

    pub fn buffer_level(&self) -> f64 {
        self.state.buffer_level
    }

    pub fn target_buffer(&self) -> f64 {
        self.state.target_buffer
    }

    pub fn is_buffering_complete(&self) -> bool {
        self.state.buffering_complete
    }

    pub fn sufficient_buffer(&self) -> Option<bool> {
        self.state.sufficient_buffer
    }

    pub fn current_quality(&self) -> Quality {
        self.state.current_quality
    }

    pub fn phase(&self) -> AdmissionPhase {
        self.state.phase()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Iterates queued segments from head to tail.
    pub fn pending_segments(&self) -> impl Iterator<Item = &Segment> {
        self.queue.iter()
    }

    /// Returns true if an eviction retry timer is armed.
    pub fn is_eviction_retry_pending(&self) -> bool {
        self.recovery.is_retry_pending()
    }

    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            track: self.track,
            phase: self.state.phase(),
            buffer_level: self.state.buffer_level,
            target_buffer: self.state.target_buffer,
            sufficient_buffer: self.state.sufficient_buffer,
            level_outrun: self.state.level_outrun,
            quota_exceeded: self.state.quota_exceeded,
            pending_segments: self.queue.len(),
            pending_bytes: self.queue.queued_bytes(),
            cached_inits: self.init_cache.len(),
            current_quality: self.state.current_quality,
            required_init_quality: self.state.required_init_quality,
            max_appended_index: self.state.max_appended_index,
            last_index: self.state.last_index,
            buffering_complete: self.state.buffering_complete,
            bound: self.is_bound(),
        }
    }
}
