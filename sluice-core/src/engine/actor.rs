//! Actor implementation for the buffer controller.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::commands::{BufferCommand, SinkCompletion};
use super::handle::BufferControllerHandle;
use crate::buffer::{BufferController, BufferError, SinkOperation};

/// Spawns the controller as an actor and returns its handle.
///
/// The actor owns the controller outright. Commands and sink completions are
/// processed one at a time, so the controller never sees concurrent calls.
/// Sink appends and removals run as separate tasks and report back through
/// an internal channel.
///
/// # Examples
/// ```rust,no_run
/// use sluice_core::buffer::{BufferController, PlaybackTick};
/// use sluice_core::engine::spawn_buffer_controller;
///
/// async fn start(controller: BufferController) {
///     let handle = spawn_buffer_controller(controller);
///     let _ = handle.playback_tick(PlaybackTick::Progress).await;
/// }
/// ```
pub fn spawn_buffer_controller(controller: BufferController) -> BufferControllerHandle {
    let track = controller.track();
    let capacity = controller.config().command_channel_capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);
    let (completion_sender, completion_receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        run_actor_loop(controller, receiver, completion_sender, completion_receiver).await;
    });

    BufferControllerHandle::new(track, sender)
}

/// Runs the main actor message processing loop.
///
/// The loop ends on a shutdown command or when every handle has been
/// dropped. Sink tasks still running at that point finish on their own and
/// their completions are discarded.
async fn run_actor_loop(
    mut controller: BufferController,
    mut receiver: mpsc::Receiver<BufferCommand>,
    completion_sender: mpsc::UnboundedSender<SinkCompletion>,
    mut completions: mpsc::UnboundedReceiver<SinkCompletion>,
) {
    tracing::debug!("Buffer controller actor for {} started", controller.track());
    let mut retry_timer: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    break;
                };
                let keep_running = handle_command(&mut controller, command, &mut retry_timer);
                dispatch_operations(&mut controller, &completion_sender, &mut retry_timer);
                if !keep_running {
                    break;
                }
            }
            Some(completion) = completions.recv() => {
                handle_completion(&mut controller, completion);
                dispatch_operations(&mut controller, &completion_sender, &mut retry_timer);
            }
        }
    }

    if let Some(timer) = retry_timer.take() {
        timer.abort();
    }
    tracing::debug!("Buffer controller actor for {} stopped", controller.track());
}

/// Handles a single command for the controller.
/// Returns true to continue processing, false to shutdown.
fn handle_command(
    controller: &mut BufferController,
    command: BufferCommand,
    retry_timer: &mut Option<JoinHandle<()>>,
) -> bool {
    match command {
        BufferCommand::InitSegmentLoaded { quality, bytes } => {
            controller.on_init_segment_loaded(quality, bytes);
        }

        BufferCommand::MediaSegmentLoaded {
            quality,
            index,
            bytes,
        } => {
            controller.on_media_segment_loaded(quality, index, bytes);
        }

        BufferCommand::StreamCompleted { last_index } => {
            controller.on_stream_completed(last_index);
        }

        BufferCommand::QualityChanged { change } => controller.on_quality_changed(change),

        BufferCommand::RepresentationUpdated { update } => {
            controller.on_representation_updated(update);
        }

        BufferCommand::Playback { tick } => controller.on_playback_tick(tick),

        BufferCommand::PlaybackRateChanged => controller.on_playback_rate_changed(),

        BufferCommand::ScheduledTimeOccurred { track } => {
            controller.on_scheduled_time_occurred(track);
        }

        BufferCommand::SetTargetBuffer { seconds } => controller.set_target_buffer(seconds),

        BufferCommand::Initialize { sink, responder } => {
            cancel_retry(retry_timer);
            controller.initialize(sink);
            let _ = responder.send(());
        }

        BufferCommand::Reset { errored, responder } => {
            cancel_retry(retry_timer);
            controller.reset(errored);
            let _ = responder.send(());
        }

        BufferCommand::GetStatus { responder } => {
            let _ = responder.send(controller.status());
        }

        BufferCommand::GetBufferedRanges { responder } => {
            let result = controller
                .sink()
                .map(|sink| sink.buffered_ranges())
                .ok_or(BufferError::NotInitialized {
                    track: controller.track(),
                });
            let _ = responder.send(result);
        }

        BufferCommand::Shutdown { responder } => {
            tracing::debug!("Buffer controller actor for {} shutting down", controller.track());
            let _ = responder.send(());
            return false;
        }
    }
    true
}

fn handle_completion(controller: &mut BufferController, completion: SinkCompletion) {
    match completion {
        SinkCompletion::Appended { ticket, result } => {
            controller.on_append_completed(ticket, result);
        }
        SinkCompletion::Removed { ticket, result } => {
            controller.on_remove_completed(ticket, result);
        }
        SinkCompletion::RetryElapsed { ticket } => {
            controller.on_eviction_retry_elapsed(ticket);
        }
    }
}

/// Starts the sink work the controller queued.
fn dispatch_operations(
    controller: &mut BufferController,
    completion_sender: &mpsc::UnboundedSender<SinkCompletion>,
    retry_timer: &mut Option<JoinHandle<()>>,
) {
    for operation in controller.take_operations() {
        match operation {
            SinkOperation::Append { ticket, bytes } => {
                let Some(sink) = controller.sink() else {
                    continue;
                };
                let sender = completion_sender.clone();
                tokio::spawn(async move {
                    let result = sink.append(bytes).await;
                    let _ = sender.send(SinkCompletion::Appended { ticket, result });
                });
            }
            SinkOperation::Remove { ticket, range } => {
                let Some(sink) = controller.sink() else {
                    continue;
                };
                let sender = completion_sender.clone();
                tokio::spawn(async move {
                    let result = sink.remove(range).await;
                    let _ = sender.send(SinkCompletion::Removed { ticket, result });
                });
            }
            SinkOperation::ArmRetry { ticket, delay } => {
                cancel_retry(retry_timer);
                let sender = completion_sender.clone();
                *retry_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(SinkCompletion::RetryElapsed { ticket });
                }));
            }
        }
    }
}

fn cancel_retry(retry_timer: &mut Option<JoinHandle<()>>) {
    if let Some(timer) = retry_timer.take() {
        timer.abort();
    }
}
