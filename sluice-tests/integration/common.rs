//! Shared wiring for the integration tests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sluice_core::buffer::{
    BufferController, BufferSignal, BufferStatus, Collaborators, Quality, SignalBus, TrackKind,
    TrackLevels, TrackSignal,
};
use sluice_core::config::ControllerConfig;
use sluice_core::{BufferControllerHandle, spawn_buffer_controller};
use sluice_sim::codec;
use sluice_sim::{SimulatedFetch, SimulatedPlayback, SimulatedSink};
use tokio::sync::broadcast;

pub const SEGMENT_DURATION: f64 = 2.0;
pub const SEGMENT_BYTES: u64 = 100;

/// Simulated player surroundings shared by every controller of a test.
pub struct Harness {
    pub playback: SimulatedPlayback,
    pub fetch: SimulatedFetch,
    pub levels: TrackLevels,
    pub signals: SignalBus,
}

impl Harness {
    pub fn new(period_duration: f64) -> Self {
        Self {
            playback: SimulatedPlayback::new(period_duration),
            fetch: SimulatedFetch::new(),
            levels: TrackLevels::new(),
            signals: SignalBus::new(1024),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            clock: Arc::new(self.playback.clone()),
            fetch: Arc::new(self.fetch.clone()),
            levels: self.levels.clone(),
            signals: self.signals.clone(),
        }
    }

    pub fn spawn(&self, track: TrackKind, sink: &SimulatedSink) -> BufferControllerHandle {
        let controller = BufferController::new(
            track,
            Quality::new(0),
            Arc::new(sink.clone()),
            self.collaborators(),
            ControllerConfig::default(),
        );
        spawn_buffer_controller(controller)
    }
}

pub fn init(quality: u32) -> Bytes {
    codec::encode_init(Quality::new(quality), 16)
}

pub fn media(index: u64) -> Bytes {
    codec::encode_media(index as f64 * SEGMENT_DURATION, SEGMENT_DURATION, SEGMENT_BYTES)
}

/// Sends media segments `indexes` at quality 0.
pub async fn feed(handle: &BufferControllerHandle, indexes: std::ops::Range<u64>) {
    for index in indexes {
        handle
            .media_segment_loaded(Quality::new(0), index, media(index))
            .await
            .unwrap();
    }
}

/// Polls the status until `predicate` holds or the attempts run out.
pub async fn wait_for(
    handle: &BufferControllerHandle,
    predicate: impl Fn(&BufferStatus) -> bool,
) -> BufferStatus {
    for _ in 0..400 {
        let status = handle.status().await.unwrap();
        if predicate(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.status().await.unwrap()
}

/// Collects the signals of `track` published so far.
pub fn drain(
    receiver: &mut broadcast::Receiver<TrackSignal>,
    track: TrackKind,
) -> Vec<BufferSignal> {
    let mut signals = Vec::new();
    while let Ok(tagged) = receiver.try_recv() {
        if tagged.track == track {
            signals.push(tagged.signal);
        }
    }
    signals
}
