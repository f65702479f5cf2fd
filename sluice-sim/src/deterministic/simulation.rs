//! Discrete-event simulation of a player feeding buffer controllers.
//!
//! Each track gets a real [`BufferController`] bound to a
//! [`SimulatedSink`]. The simulation plays the parts around it: a fetcher
//! that downloads segments one at a time, a playback clock that advances
//! while every track has media at the playhead, and the sink executing the
//! operations the controllers queue. Everything runs on simulated time, so
//! a seed fully determines the outcome.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;
use std::time::Duration;

use sluice_core::buffer::{
    BufferController, BufferSignal, BufferSink, Collaborators, PlaybackTick, Quality, QualityChange,
    RepresentationUpdate, SignalBus, SinkOperation, TimeRange, TrackKind, TrackLevels,
    TrackSignal,
};
use sluice_core::config::{ControllerConfig, SimulationConfig};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

use super::clock::{DeterministicClock, DeterministicRng};
use super::events::{EventPriority, EventType, SimulationEvent};
use super::invariants::{
    Invariant, MonotonicAppendInvariant, QuotaInvariant, SingleCompletionInvariant,
    SingleOperationInvariant,
};
use super::state::{SimulationMetrics, SimulationState};
use crate::codec;
use crate::playback::{SimulatedFetch, SimulatedPlayback};
use crate::sink::SimulatedSink;

/// Maximum number of events that can be scheduled.
const MAX_EVENT_QUEUE_SIZE: usize = 100_000;

/// Maximum number of invariant violations before stopping simulation.
const MAX_INVARIANT_VIOLATIONS: usize = 10;

const PLAYBACK_TICK: Duration = Duration::from_millis(250);

/// Declared size of every initialization payload.
const INIT_SEGMENT_BYTES: u64 = 4_096;

/// Audio bitrate as a fraction of the lowest video bitrate.
const AUDIO_BITRATE_DIVISOR: u64 = 4;

/// Relative spread applied to download times.
const DOWNLOAD_JITTER: f64 = 0.25;

/// Manifest `minBufferTime` announced for every representation.
const MANIFEST_MIN_BUFFER_TIME: f64 = 2.0;

/// Segments a controller may hold queued before the fetcher pauses.
const MAX_QUEUED_SEGMENTS: usize = 2;

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("No deterministic seed provided")]
    NoDeterministicSeed,

    #[error("Event queue overflow: {count} events scheduled")]
    EventQueueOverflow { count: usize },

    #[error("Simulation time limit exceeded: {elapsed:?}")]
    TimeLimitExceeded { elapsed: Duration },

    #[error("Simulated time cannot move from {now:?} back to {target:?}")]
    TimeWentBackwards { now: Duration, target: Duration },

    #[error("Too many invariant violations: {count}")]
    TooManyInvariantViolations { count: usize },

    #[error("No simulated {track} track")]
    UnknownTrack { track: TrackKind },

    #[error("Invalid simulation config: {reason}")]
    InvalidConfig { reason: String },
}

/// Result of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Simulated time the run took
    pub duration: Duration,
    pub metrics: SimulationMetrics,
    pub final_state: SimulationState,
    pub event_count: u64,
    /// Playback reached the end and no invariant was violated
    pub success: bool,
}

impl SimulationReport {
    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Simulation Report (seed: {})\n", self.seed));
        summary.push_str(&format!("Simulated duration: {:?}\n", self.duration));
        summary.push_str(&format!("Events processed: {}\n", self.event_count));
        summary.push_str(&format!(
            "Playback position: {:.2}s (ended: {})\n",
            self.final_state.position, self.final_state.ended
        ));
        summary.push_str(&format!("Success: {}\n", self.success));

        summary.push_str(&format!(
            "\nSegments fetched: {}\nSegments appended: {}\nQuota rejections: {}\n\
             Dropped appends: {}\nEvicted: {:.2}s\nQuality switches: {}\nStall ticks: {}\n",
            self.metrics.segments_fetched,
            self.metrics.segments_appended,
            self.metrics.quota_rejections,
            self.metrics.dropped_appends,
            self.metrics.evicted_seconds,
            self.metrics.quality_switches,
            self.metrics.stall_ticks,
        ));

        summary.push_str("\nEvent breakdown:\n");
        for (event_type, count) in &self.metrics.events_by_type {
            summary.push_str(&format!("  {event_type}: {count}\n"));
        }

        summary.push_str("\nSignal breakdown:\n");
        for (signal, count) in &self.metrics.signals_by_type {
            summary.push_str(&format!("  {signal}: {count}\n"));
        }

        summary.push_str("\nFinal tracks:\n");
        for (track, snapshot) in &self.final_state.tracks {
            summary.push_str(&format!(
                "  {}: level {:.2}s, sink {}/{} bytes, last appended {:?}\n",
                track,
                snapshot.buffer_level,
                snapshot.used_bytes,
                snapshot.quota_bytes,
                snapshot.max_appended_index
            ));
        }

        if !self.metrics.invariant_violations.is_empty() {
            summary.push_str("\nInvariant violations:\n");
            for violation in &self.metrics.invariant_violations {
                summary.push_str(&format!("  - {violation}\n"));
            }
        }

        summary
    }
}

/// One simulated track: the controller under test plus its fetcher.
struct TrackRuntime {
    controller: BufferController,
    sink: SimulatedSink,
    bytes_per_second: u64,
    next_index: u64,
    fetching: bool,
    init_requests: BTreeSet<Quality>,
}

/// Deterministic simulation of an audio and a video track sharing a
/// playback clock.
pub struct BufferSimulation {
    config: SimulationConfig,
    clock: DeterministicClock,
    rng: DeterministicRng,
    event_queue: BinaryHeap<SimulationEvent>,
    next_event_id: u64,
    tracks: BTreeMap<TrackKind, TrackRuntime>,
    playback: SimulatedPlayback,
    fetch: SimulatedFetch,
    signals: broadcast::Receiver<TrackSignal>,
    state: SimulationState,
    metrics: SimulationMetrics,
    invariants: Vec<Arc<dyn Invariant>>,
    period_duration: f64,
}

impl BufferSimulation {
    /// Creates a simulation with the default invariants installed.
    ///
    /// # Errors
    /// - `SimulationError::NoDeterministicSeed` - No seed provided in config
    /// - `SimulationError::InvalidConfig` - Segment or quality settings are unusable
    pub fn new(
        config: SimulationConfig,
        controller_config: ControllerConfig,
    ) -> Result<Self, SimulationError> {
        let seed = config
            .deterministic_seed
            .ok_or(SimulationError::NoDeterministicSeed)?;
        validate(&config)?;

        let period_duration = config.segment_count as f64 * config.segment_duration_secs;
        let playback = SimulatedPlayback::new(period_duration);
        let fetch = SimulatedFetch::new();
        let bus = SignalBus::new(controller_config.signal_capacity.max(4_096));
        let signals = bus.subscribe();
        let collaborators = Collaborators {
            clock: Arc::new(playback.clone()),
            fetch: Arc::new(fetch.clone()),
            levels: TrackLevels::new(),
            signals: bus,
        };

        let mut tracks = BTreeMap::new();
        for (track, bytes_per_second) in [
            (
                TrackKind::Audio,
                config.bitrate_bytes_per_sec / AUDIO_BITRATE_DIVISOR,
            ),
            (TrackKind::Video, config.bitrate_bytes_per_sec),
        ] {
            let sink = SimulatedSink::new(config.sink_quota_bytes);
            let controller = BufferController::new(
                track,
                Quality::new(0),
                Arc::new(sink.clone()),
                collaborators.clone(),
                controller_config.clone(),
            );
            tracks.insert(
                track,
                TrackRuntime {
                    controller,
                    sink,
                    bytes_per_second,
                    next_index: 0,
                    fetching: false,
                    init_requests: BTreeSet::new(),
                },
            );
        }

        let mut state = SimulationState::new();
        for (track, runtime) in &tracks {
            state.track_mut(*track).quota_bytes = runtime.sink.snapshot().quota_bytes;
        }

        Ok(Self {
            config,
            clock: DeterministicClock::new(),
            rng: DeterministicRng::from_seed(seed),
            event_queue: BinaryHeap::new(),
            next_event_id: 0,
            tracks,
            playback,
            fetch,
            signals,
            state,
            metrics: SimulationMetrics::new(),
            invariants: vec![
                Arc::new(SingleOperationInvariant),
                Arc::new(MonotonicAppendInvariant),
                Arc::new(QuotaInvariant),
                Arc::new(SingleCompletionInvariant),
            ],
            period_duration,
        })
    }

    /// Returns the seed used for this simulation.
    pub fn simulation_seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn simulation_elapsed(&self) -> Duration {
        self.clock.now()
    }

    /// Adds an invariant to check during simulation.
    pub fn add_invariant(&mut self, invariant: Arc<dyn Invariant>) {
        self.invariants.push(invariant);
    }

    /// Returns the sink of `track`.
    pub fn sink(&self, track: TrackKind) -> Option<&SimulatedSink> {
        self.tracks.get(&track).map(|runtime| &runtime.sink)
    }

    /// Returns the controller of `track`.
    pub fn controller(&self, track: TrackKind) -> Option<&BufferController> {
        self.tracks.get(&track).map(|runtime| &runtime.controller)
    }

    /// Plays the whole period, or until `time_limit` of simulated time.
    ///
    /// # Errors
    /// - `SimulationError::TimeLimitExceeded` - Playback did not finish in time
    /// - `SimulationError::TooManyInvariantViolations` - Too many invariant violations
    /// - `SimulationError::EventQueueOverflow` - Too many events scheduled
    pub fn run(&mut self, time_limit: Duration) -> Result<SimulationReport, SimulationError> {
        info!(
            "Starting buffer simulation: seed {}, {} segments of {:.1}s, quota {} bytes",
            self.simulation_seed(),
            self.config.segment_count,
            self.config.segment_duration_secs,
            self.config.sink_quota_bytes
        );
        self.start()?;

        while let Some(event) = self.event_queue.pop() {
            if event.timestamp > time_limit {
                return Err(SimulationError::TimeLimitExceeded {
                    elapsed: self.clock.now(),
                });
            }

            self.clock.advance_to(event.timestamp)?;
            self.process_event(event.event_type.clone())?;
            self.metrics.record_event(event.event_type.as_str());

            self.schedule_fetches()?;
            self.drain_signals()?;
            self.refresh_state();
            self.check_invariants()?;

            if self.state.ended {
                break;
            }
        }

        info!(
            "Simulation finished at {:?} (playback {:.2}s)",
            self.clock.now(),
            self.playback.position()
        );
        Ok(self.generate_report())
    }

    /// Schedules the initial init downloads and the playback clock.
    fn start(&mut self) -> Result<(), SimulationError> {
        let tracks: Vec<TrackKind> = self.tracks.keys().copied().collect();
        for track in tracks {
            let runtime = self.runtime(track)?;
            runtime
                .controller
                .on_representation_updated(RepresentationUpdate {
                    timestamp_offset: 0.0,
                    min_buffer_time: MANIFEST_MIN_BUFFER_TIME,
                });
            let quality = runtime.controller.current_quality();
            self.request_init(track, quality)?;
            self.dispatch(track)?;
        }
        self.schedule_delayed(PLAYBACK_TICK, EventType::PlaybackTick, EventPriority::Clock)?;
        self.schedule_fetches()?;
        self.drain_signals()?;
        self.refresh_state();
        Ok(())
    }

    fn process_event(&mut self, event: EventType) -> Result<(), SimulationError> {
        match event {
            EventType::InitLoaded { track, quality } => {
                let runtime = self.runtime(track)?;
                runtime.init_requests.remove(&quality);
                let bytes = codec::encode_init(quality, INIT_SEGMENT_BYTES);
                runtime.controller.on_init_segment_loaded(quality, bytes);
                self.dispatch(track)?;
            }
            EventType::SegmentLoaded {
                track,
                quality,
                index,
            } => self.deliver_segment(track, quality, index)?,
            EventType::SinkAppendDone {
                track,
                ticket,
                bytes,
            } => {
                self.state.track_mut(track).outstanding_operations -= 1;
                let runtime = self.runtime(track)?;
                let result = runtime.sink.try_append(&bytes);
                runtime.controller.on_append_completed(ticket, result);
                self.dispatch(track)?;
            }
            EventType::SinkRemoveDone {
                track,
                ticket,
                range,
            } => {
                self.state.track_mut(track).outstanding_operations -= 1;
                let runtime = self.runtime(track)?;
                let result = runtime.sink.try_remove(range);
                runtime.controller.on_remove_completed(ticket, result);
                self.dispatch(track)?;
            }
            EventType::RetryElapsed { track, ticket } => {
                self.runtime(track)?
                    .controller
                    .on_eviction_retry_elapsed(ticket);
                self.dispatch(track)?;
            }
            EventType::PlaybackTick => self.tick_playback()?,
        }
        Ok(())
    }

    fn deliver_segment(
        &mut self,
        track: TrackKind,
        quality: Quality,
        index: u64,
    ) -> Result<(), SimulationError> {
        let segment_duration = self.config.segment_duration_secs;
        let last_index = self.config.segment_count - 1;
        let start = index as f64 * segment_duration;
        self.fetch
            .record(track, TimeRange::new(start, start + segment_duration));
        self.metrics.segments_fetched += 1;

        let runtime = self.runtime(track)?;
        runtime.fetching = false;
        let size = segment_size(runtime.bytes_per_second, quality, segment_duration);
        let bytes = codec::encode_media(start, segment_duration, size);
        runtime
            .controller
            .on_media_segment_loaded(quality, index, bytes);
        if index == last_index {
            runtime.controller.on_stream_completed(last_index);
        }
        self.dispatch(track)
    }

    /// Advances the playhead if every track has media there, then lets the
    /// controllers refresh their levels.
    fn tick_playback(&mut self) -> Result<(), SimulationError> {
        if self.playback.is_playing() {
            let position = self.playback.position();
            let can_play = self
                .tracks
                .values()
                .all(|runtime| runtime.sink.buffer_length(position) > 0.0);
            if can_play {
                self.playback.advance(PLAYBACK_TICK.as_secs_f64());
            } else {
                self.metrics.stall_ticks += 1;
            }
        } else if self.ready_to_play() {
            info!("Starting playback at {:?}", self.clock.now());
            self.playback.set_playing(true);
        }

        let tracks: Vec<TrackKind> = self.tracks.keys().copied().collect();
        for track in tracks {
            self.runtime(track)?
                .controller
                .on_playback_tick(PlaybackTick::TimeUpdated);
            self.dispatch(track)?;
        }

        if self.playback.is_ended() {
            self.state.ended = true;
        } else {
            self.schedule_delayed(PLAYBACK_TICK, EventType::PlaybackTick, EventPriority::Clock)?;
        }
        Ok(())
    }

    fn ready_to_play(&self) -> bool {
        self.tracks.values().all(|runtime| {
            let controller = &runtime.controller;
            controller.sufficient_buffer() == Some(true)
                || controller.state().quota_exceeded
                || controller.is_buffering_complete()
        })
    }

    /// Starts a download on every idle fetcher that may fetch ahead.
    fn schedule_fetches(&mut self) -> Result<(), SimulationError> {
        let position = self.playback.position();
        let segment_duration = self.config.segment_duration_secs;
        let segment_count = self.config.segment_count;
        let max_ahead = self.config.max_buffer_ahead_secs;
        let tracks: Vec<TrackKind> = self.tracks.keys().copied().collect();

        for track in tracks {
            let runtime = self.runtime(track)?;
            let controller = &runtime.controller;
            let fetched_until = runtime.next_index as f64 * segment_duration;
            let may_fetch = !runtime.fetching
                && runtime.next_index < segment_count
                && controller.pending_count() < MAX_QUEUED_SEGMENTS
                && !controller.state().level_outrun
                && fetched_until - position < max_ahead;
            if !may_fetch {
                continue;
            }

            if track == TrackKind::Video {
                self.maybe_switch_quality(track)?;
            }

            let runtime = self.runtime(track)?;
            let index = runtime.next_index;
            let quality = runtime.controller.current_quality();
            let size = segment_size(runtime.bytes_per_second, quality, segment_duration);
            runtime.next_index += 1;
            runtime.fetching = true;

            let delay = self.download_time(size);
            self.schedule_delayed(
                delay,
                EventType::SegmentLoaded {
                    track,
                    quality,
                    index,
                },
                EventPriority::Network,
            )?;
        }
        Ok(())
    }

    /// Occasionally picks a new quality, only while nothing of the old
    /// quality is queued or being applied.
    fn maybe_switch_quality(&mut self, track: TrackKind) -> Result<(), SimulationError> {
        let levels = u64::from(self.config.quality_levels);
        if !self.rng.random_bool(self.config.quality_switch_rate) {
            return Ok(());
        }
        let new_quality = Quality::new(self.rng.random_range(0, levels) as u32);

        let runtime = self.runtime(track)?;
        let controller = &runtime.controller;
        let settled = controller.pending_count() == 0
            && !controller.state().is_operation_in_flight()
            && !controller.state().quota_exceeded;
        let old_quality = controller.current_quality();
        if !settled || new_quality == old_quality {
            return Ok(());
        }

        debug!("Simulated switch of {} from {} to {}", track, old_quality, new_quality);
        runtime.controller.on_quality_changed(QualityChange {
            track,
            old_quality,
            new_quality,
            timestamp_offset: Some(0.0),
        });
        self.metrics.quality_switches += 1;
        self.dispatch(track)
    }

    fn request_init(&mut self, track: TrackKind, quality: Quality) -> Result<(), SimulationError> {
        if !self.runtime(track)?.init_requests.insert(quality) {
            return Ok(());
        }
        let delay = self.download_time(INIT_SEGMENT_BYTES);
        self.schedule_delayed(
            delay,
            EventType::InitLoaded { track, quality },
            EventPriority::Network,
        )
    }

    fn download_time(&mut self, bytes: u64) -> Duration {
        let seconds = bytes as f64 / self.config.download_speed as f64;
        let seconds = self.rng.jitter(seconds, DOWNLOAD_JITTER).max(0.001);
        Duration::from_secs_f64(seconds)
    }

    /// Turns the operations a controller queued into sink events.
    fn dispatch(&mut self, track: TrackKind) -> Result<(), SimulationError> {
        let operations = self.runtime(track)?.controller.take_operations();
        let latency = Duration::from_millis(self.config.sink_latency_ms);

        for operation in operations {
            match operation {
                SinkOperation::Append { ticket, bytes } => {
                    self.state.track_mut(track).outstanding_operations += 1;
                    self.schedule_delayed(
                        latency,
                        EventType::SinkAppendDone {
                            track,
                            ticket,
                            bytes,
                        },
                        EventPriority::Sink,
                    )?;
                }
                SinkOperation::Remove { ticket, range } => {
                    self.state.track_mut(track).outstanding_operations += 1;
                    self.schedule_delayed(
                        latency,
                        EventType::SinkRemoveDone {
                            track,
                            ticket,
                            range,
                        },
                        EventPriority::Sink,
                    )?;
                }
                SinkOperation::ArmRetry { ticket, delay } => {
                    self.schedule_delayed(
                        delay,
                        EventType::RetryElapsed { track, ticket },
                        EventPriority::Clock,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn drain_signals(&mut self) -> Result<(), SimulationError> {
        loop {
            match self.signals.try_recv() {
                Ok(TrackSignal { track, signal }) => {
                    self.metrics.record_signal(&signal);
                    match signal {
                        BufferSignal::InitRequested { quality } => {
                            self.request_init(track, quality)?;
                        }
                        BufferSignal::BufferingCompleted => {
                            self.state.track_mut(track).buffering_completed_signals += 1;
                        }
                        _ => {}
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Simulation missed {} controller signals", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    fn refresh_state(&mut self) {
        self.state.elapsed = self.clock.now();
        self.state.position = self.playback.position();
        self.state.playing = self.playback.is_playing();

        for (track, runtime) in &self.tracks {
            let status = runtime.controller.status();
            let used_bytes = runtime.sink.used_bytes();
            let snapshot = self.state.track_mut(*track);
            snapshot.previous_max_appended_index = snapshot.max_appended_index;
            snapshot.max_appended_index = status.max_appended_index;
            snapshot.used_bytes = used_bytes;
            snapshot.buffer_level = status.buffer_level;
            snapshot.quota_exceeded = status.quota_exceeded;
        }
    }

    fn check_invariants(&mut self) -> Result<(), SimulationError> {
        for invariant in &self.invariants {
            if let Err(violation) = invariant.check(&self.state) {
                warn!("{}", violation);
                self.metrics.record_invariant_violation(violation);

                if self.metrics.invariant_violations.len() >= MAX_INVARIANT_VIOLATIONS {
                    return Err(SimulationError::TooManyInvariantViolations {
                        count: self.metrics.invariant_violations.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn schedule_delayed(
        &mut self,
        delay: Duration,
        event_type: EventType,
        priority: EventPriority,
    ) -> Result<(), SimulationError> {
        if self.event_queue.len() >= MAX_EVENT_QUEUE_SIZE {
            return Err(SimulationError::EventQueueOverflow {
                count: self.event_queue.len(),
            });
        }

        let event = SimulationEvent::new(
            self.next_event_id,
            self.clock.now() + delay,
            event_type,
            priority,
        );
        self.next_event_id += 1;
        self.event_queue.push(event);
        Ok(())
    }

    fn runtime(&mut self, track: TrackKind) -> Result<&mut TrackRuntime, SimulationError> {
        self.tracks
            .get_mut(&track)
            .ok_or(SimulationError::UnknownTrack { track })
    }

    fn generate_report(&self) -> SimulationReport {
        SimulationReport {
            seed: self.simulation_seed(),
            duration: self.clock.now(),
            metrics: self.metrics.clone(),
            final_state: self.state.clone(),
            event_count: self.metrics.events_processed,
            success: self.state.ended && self.metrics.invariant_violations.is_empty(),
        }
    }

    /// Simulated time after which a run is considered stuck.
    pub fn default_time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.period_duration * 4.0 + 300.0)
    }
}

fn validate(config: &SimulationConfig) -> Result<(), SimulationError> {
    let reason = if config.segment_count == 0 {
        "segment count must be positive"
    } else if !(config.segment_duration_secs.is_finite() && config.segment_duration_secs > 0.0) {
        "segment duration must be positive"
    } else if config.quality_levels == 0 {
        "at least one quality level is required"
    } else if config.download_speed == 0 {
        "download speed must be positive"
    } else if config.bitrate_bytes_per_sec < AUDIO_BITRATE_DIVISOR {
        "bitrate is too low"
    } else {
        return Ok(());
    };
    Err(SimulationError::InvalidConfig {
        reason: reason.to_string(),
    })
}

/// Bytes of one segment; every quality step adds the base bitrate again.
fn segment_size(bytes_per_second: u64, quality: Quality, segment_duration: f64) -> u64 {
    let per_second = bytes_per_second * u64::from(quality.level() + 1);
    (per_second as f64 * segment_duration).round() as u64
}
