//! Handle for communicating with the buffer controller actor.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::commands::BufferCommand;
use crate::buffer::{
    BufferError, BufferSink, BufferStatus, PlaybackTick, Quality, QualityChange,
    RepresentationUpdate, TimeRange, TrackKind,
};

/// Handle for communicating with one buffer controller actor.
///
/// Cloning the handle is cheap; the actor stops once every clone has been
/// dropped or `shutdown` is called.
#[derive(Clone)]
pub struct BufferControllerHandle {
    track: TrackKind,
    sender: mpsc::Sender<BufferCommand>,
}

impl BufferControllerHandle {
    /// Creates a new handle with the given command sender.
    pub fn new(track: TrackKind, sender: mpsc::Sender<BufferCommand>) -> Self {
        Self { track, sender }
    }

    /// Track the controller behind this handle serves.
    pub fn track(&self) -> TrackKind {
        self.track
    }

    async fn send(&self, command: BufferCommand) -> Result<(), BufferError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| BufferError::ControllerShutdown)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> BufferCommand,
    ) -> Result<T, BufferError> {
        let (responder, rx) = oneshot::channel();
        self.send(command(responder)).await?;
        rx.await.map_err(|_| BufferError::ControllerShutdown)
    }

    /// Delivers a downloaded initialization payload.
    ///
    /// # Errors
    /// - `BufferError::ControllerShutdown` - The actor is no longer running
    pub async fn init_segment_loaded(
        &self,
        quality: Quality,
        bytes: Bytes,
    ) -> Result<(), BufferError> {
        self.send(BufferCommand::InitSegmentLoaded { quality, bytes })
            .await
    }

    /// Delivers a downloaded media payload.
    ///
    /// # Errors
    /// - `BufferError::ControllerShutdown` - The actor is no longer running
    pub async fn media_segment_loaded(
        &self,
        quality: Quality,
        index: u64,
        bytes: Bytes,
    ) -> Result<(), BufferError> {
        self.send(BufferCommand::MediaSegmentLoaded {
            quality,
            index,
            bytes,
        })
        .await
    }

    /// Announces the number of segments in the stream.
    pub async fn stream_completed(&self, last_index: u64) -> Result<(), BufferError> {
        self.send(BufferCommand::StreamCompleted { last_index })
            .await
    }

    pub async fn quality_changed(&self, change: QualityChange) -> Result<(), BufferError> {
        self.send(BufferCommand::QualityChanged { change }).await
    }

    pub async fn representation_updated(
        &self,
        update: RepresentationUpdate,
    ) -> Result<(), BufferError> {
        self.send(BufferCommand::RepresentationUpdated { update })
            .await
    }

    pub async fn playback_tick(&self, tick: PlaybackTick) -> Result<(), BufferError> {
        self.send(BufferCommand::Playback { tick }).await
    }

    pub async fn playback_rate_changed(&self) -> Result<(), BufferError> {
        self.send(BufferCommand::PlaybackRateChanged).await
    }

    pub async fn scheduled_time_occurred(&self, track: TrackKind) -> Result<(), BufferError> {
        self.send(BufferCommand::ScheduledTimeOccurred { track })
            .await
    }

    pub async fn set_target_buffer(&self, seconds: f64) -> Result<(), BufferError> {
        self.send(BufferCommand::SetTargetBuffer { seconds }).await
    }

    /// Binds a fresh sink and waits until the controller adopted it.
    pub async fn initialize(&self, sink: Arc<dyn BufferSink>) -> Result<(), BufferError> {
        self.request(|responder| BufferCommand::Initialize { sink, responder })
            .await
    }

    /// Resets the controller and waits until it is done.
    ///
    /// Pass `errored = true` when the media pipeline already failed; the sink
    /// is then released without being aborted or detached.
    pub async fn reset(&self, errored: bool) -> Result<(), BufferError> {
        self.request(|responder| BufferCommand::Reset { errored, responder })
            .await
    }

    /// Gets a point-in-time snapshot of the controller.
    pub async fn status(&self) -> Result<BufferStatus, BufferError> {
        self.request(|responder| BufferCommand::GetStatus { responder })
            .await
    }

    /// Gets the ranges currently held by the bound sink.
    ///
    /// # Errors
    /// - `BufferError::NotInitialized` - No sink is bound
    /// - `BufferError::ControllerShutdown` - The actor is no longer running
    pub async fn buffered_ranges(&self) -> Result<Vec<TimeRange>, BufferError> {
        self.request(|responder| BufferCommand::GetBufferedRanges { responder })
            .await?
    }

    /// Shuts down the controller actor gracefully.
    ///
    /// After this call, all subsequent operations will return
    /// `BufferError::ControllerShutdown`.
    pub async fn shutdown(&self) -> Result<(), BufferError> {
        self.request(|responder| BufferCommand::Shutdown { responder })
            .await
    }

    /// Checks if the controller actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
