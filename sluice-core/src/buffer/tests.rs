use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;
use tokio::sync::broadcast;

use super::test_mocks::{MockEnvironment, MockSink};
use super::*;
use crate::config::ControllerConfig;

fn payload(tag: &str) -> Bytes {
    Bytes::from(tag.to_string())
}

fn controller_at(env: &MockEnvironment, sink: &MockSink, quality: u32) -> BufferController {
    BufferController::new(
        TrackKind::Video,
        Quality::new(quality),
        Arc::new(sink.clone()),
        env.collaborators(),
        ControllerConfig::default(),
    )
}

/// Controller whose initial init payload is already in the sink.
fn ready_controller(env: &MockEnvironment, sink: &MockSink, quality: u32) -> BufferController {
    let mut controller = controller_at(env, sink, quality);
    controller.on_init_segment_loaded(Quality::new(quality), payload(&format!("init-{quality}")));
    drive(&mut controller, sink);
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
    controller
}

/// Executes queued operations against the mock sink until none are left.
///
/// Returns the tickets of retry timers the controller armed.
fn drive(controller: &mut BufferController, sink: &MockSink) -> Vec<(OperationTicket, Duration)> {
    let mut retries = Vec::new();
    loop {
        let operations = controller.take_operations();
        if operations.is_empty() {
            return retries;
        }
        for operation in operations {
            match operation {
                SinkOperation::Append { ticket, bytes } => {
                    let result = sink.next_append_result(bytes);
                    controller.on_append_completed(ticket, result);
                }
                SinkOperation::Remove { ticket, range } => {
                    let result = sink.next_remove_result(range);
                    controller.on_remove_completed(ticket, result);
                }
                SinkOperation::ArmRetry { ticket, delay } => retries.push((ticket, delay)),
            }
        }
    }
}

fn drain(receiver: &mut broadcast::Receiver<TrackSignal>) -> Vec<BufferSignal> {
    let mut signals = Vec::new();
    while let Ok(tagged) = receiver.try_recv() {
        signals.push(tagged.signal);
    }
    signals
}

fn count(signals: &[BufferSignal], name: &str) -> usize {
    signals.iter().filter(|s| s.as_str() == name).count()
}

#[test]
fn test_media_waits_for_initial_init() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = controller_at(&env, &sink, 1);

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    assert!(controller.take_operations().is_empty());
    assert_eq!(controller.pending_count(), 1);
    assert_eq!(controller.phase(), AdmissionPhase::AwaitingInit);

    controller.on_init_segment_loaded(Quality::new(1), payload("i1"));
    drive(&mut controller, &sink);

    assert_eq!(sink.appended(), vec![payload("i1"), payload("m0")]);
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(controller.state().max_appended_index, Some(0));
}

#[test]
fn test_append_success_emits_bytes_appended() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    drive(&mut controller, &sink);

    let signals = drain(&mut signals);
    assert!(signals.contains(&BufferSignal::BytesAppended { index: 0 }));
    assert_eq!(controller.state().max_appended_index, Some(0));
    assert_eq!(controller.pending_count(), 0);
}

#[test]
fn test_init_append_emits_no_bytes_appended() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut signals = env.signals.subscribe();
    let _controller = ready_controller(&env, &sink, 1);

    assert_eq!(count(&drain(&mut signals), "BytesAppended"), 0);
}

#[test]
fn test_missing_init_is_requested() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Video,
        old_quality: Quality::new(1),
        new_quality: Quality::new(2),
        timestamp_offset: None,
    });

    assert!(drain(&mut signals).contains(&BufferSignal::InitRequested {
        quality: Quality::new(2)
    }));
    assert_eq!(controller.phase(), AdmissionPhase::AwaitingInit);
}

#[test]
fn test_only_one_operation_in_flight() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    controller.on_media_segment_loaded(Quality::new(1), 1, payload("m1"));
    controller.on_media_segment_loaded(Quality::new(1), 2, payload("m2"));

    let operations = controller.take_operations();
    assert_eq!(operations.len(), 1);
    assert_eq!(controller.pending_count(), 2);
    assert_eq!(controller.phase(), AdmissionPhase::Appending);

    let SinkOperation::Append { ticket, .. } = &operations[0] else {
        panic!("expected an append, got {operations:?}");
    };
    controller.on_append_completed(*ticket, Ok(()));
    assert_eq!(controller.take_operations().len(), 1);
}

#[test]
fn test_quota_exceeded_requeues_and_starts_eviction() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    sink.set_ranges(vec![TimeRange::new(0.0, 30.0)]);
    env.clock.set_time(12.7);
    env.fetch.set_request_start(Some(10.0));
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 5, payload("m5"));
    let operations = controller.take_operations();
    let SinkOperation::Append { ticket, bytes } = operations[0].clone() else {
        panic!("expected an append");
    };
    controller.on_append_completed(ticket, sink.next_append_result(bytes));

    assert_eq!(controller.phase(), AdmissionPhase::QuotaBlocked);
    assert_eq!(
        controller.pending_segments().next().and_then(|s| s.index),
        Some(5)
    );
    assert!(drain(&mut signals).contains(&BufferSignal::QuotaExceeded { index: Some(5) }));

    let operations = controller.take_operations();
    assert!(matches!(
        operations.as_slice(),
        [SinkOperation::Remove { range, .. }] if *range == TimeRange::new(0.0, 10.0)
    ));
}

#[test]
fn test_quota_recovery_resumes_admission() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    sink.set_ranges(vec![TimeRange::new(0.0, 30.0)]);
    env.clock.set_time(12.0);
    env.fetch.set_request_start(Some(10.0));
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 5, payload("m5"));
    drive(&mut controller, &sink);

    // 10s removed against an 8s target: one round is enough
    assert_eq!(sink.removed(), vec![TimeRange::new(0.0, 10.0)]);
    assert_eq!(sink.appended().last(), Some(&payload("m5")));
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
    assert!(!controller.status().quota_exceeded);

    let signals = drain(&mut signals);
    assert!(signals.contains(&BufferSignal::BufferCleared {
        range: TimeRange::new(0.0, 10.0)
    }));
    assert!(signals.contains(&BufferSignal::BytesAppended { index: 5 }));
}

#[test]
fn test_eviction_rounds_accumulate_until_target() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    sink.set_ranges(vec![TimeRange::new(0.0, 30.0)]);
    env.clock.set_time(3.0);
    env.fetch.set_request_start(Some(3.0));
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 2, payload("m2"));
    let retries = drive(&mut controller, &sink);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].1, Duration::from_secs(8));
    assert!(controller.is_eviction_retry_pending());
    assert_eq!(controller.phase(), AdmissionPhase::QuotaBlocked);

    // Playback moved on; the next round clears up to the new request start
    sink.set_ranges(vec![TimeRange::new(3.0, 30.0)]);
    env.clock.set_time(9.0);
    env.fetch.set_request_start(Some(9.0));
    controller.on_eviction_retry_elapsed(retries[0].0);
    let retries = drive(&mut controller, &sink);

    assert!(retries.is_empty());
    assert_eq!(
        sink.removed(),
        vec![TimeRange::new(0.0, 3.0), TimeRange::new(3.0, 9.0)]
    );
    assert_eq!(sink.appended().last(), Some(&payload("m2")));
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
}

#[test]
fn test_empty_sink_arms_retry_instead_of_removing() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    let retries = drive(&mut controller, &sink);

    assert_eq!(retries.len(), 1);
    assert!(sink.removed().is_empty());
    assert!(!controller.state().is_operation_in_flight());
}

#[test]
fn test_remove_failure_stalls_until_playback_tick() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    sink.set_ranges(vec![TimeRange::new(0.0, 30.0)]);
    env.clock.set_time(12.0);
    env.fetch.set_request_start(Some(10.0));
    sink.fail_next_append(SinkError::QuotaExceeded);
    sink.fail_next_remove(SinkError::RemoveFailed {
        reason: "busy".to_string(),
    });

    controller.on_media_segment_loaded(Quality::new(1), 5, payload("m5"));
    let retries = drive(&mut controller, &sink);
    assert!(retries.is_empty());
    assert_eq!(controller.phase(), AdmissionPhase::QuotaBlocked);
    assert!(!controller.state().is_operation_in_flight());

    controller.on_playback_tick(PlaybackTick::Progress);
    drive(&mut controller, &sink);

    assert_eq!(sink.removed(), vec![TimeRange::new(0.0, 10.0)]);
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
}

#[test]
fn test_generic_append_failure_drops_segment() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    sink.fail_next_append(SinkError::AppendFailed {
        reason: "decode error".to_string(),
    });
    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    drive(&mut controller, &sink);

    assert!(drain(&mut signals).contains(&BufferSignal::AppendDropped {
        quality: Quality::new(1),
        index: Some(0),
    }));
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(controller.state().max_appended_index, None);
    assert_eq!(controller.phase(), AdmissionPhase::Idle);

    // The next arrival flows normally
    controller.on_media_segment_loaded(Quality::new(1), 1, payload("m1"));
    drive(&mut controller, &sink);
    assert_eq!(controller.state().max_appended_index, Some(1));
}

#[test]
fn test_dropped_append_moves_on_to_queued_segment() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    sink.fail_next_append(SinkError::AppendFailed {
        reason: "decode error".to_string(),
    });
    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    controller.on_media_segment_loaded(Quality::new(1), 1, payload("m1"));
    assert_eq!(controller.pending_count(), 1);

    drive(&mut controller, &sink);
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(controller.state().max_appended_index, Some(1));
}

/// Loads media 0 at q1, holds its append, then switches to q2 so the init
/// append has to wait for the media completion.
fn switch_during_media_append(
    controller: &mut BufferController,
) -> (OperationTicket, Bytes) {
    controller.on_init_segment_loaded(Quality::new(2), payload("init-2"));
    assert!(controller.take_operations().is_empty());

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    let mut held = controller.take_operations();
    assert_eq!(held.len(), 1);
    let Some(SinkOperation::Append { ticket, bytes }) = held.pop() else {
        panic!("expected media append");
    };

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Video,
        old_quality: Quality::new(1),
        new_quality: Quality::new(2),
        timestamp_offset: None,
    });
    assert!(controller.take_operations().is_empty());
    (ticket, bytes)
}

#[test]
fn test_switch_init_follows_in_flight_media_append() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let (ticket, bytes) = switch_during_media_append(&mut controller);

    controller.on_append_completed(ticket, sink.next_append_result(bytes));
    drive(&mut controller, &sink);

    assert_eq!(sink.appended().last(), Some(&payload("init-2")));
    assert_eq!(controller.state().max_appended_index, Some(0));
    assert_eq!(controller.state().required_init_quality, None);
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
}

#[test]
fn test_switch_init_follows_dropped_media_append() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();
    let (ticket, _) = switch_during_media_append(&mut controller);

    controller.on_append_completed(
        ticket,
        Err(SinkError::AppendFailed {
            reason: "decode error".to_string(),
        }),
    );
    drive(&mut controller, &sink);

    assert!(drain(&mut signals).contains(&BufferSignal::AppendDropped {
        quality: Quality::new(1),
        index: Some(0),
    }));
    assert_eq!(sink.appended().last(), Some(&payload("init-2")));
    assert_eq!(controller.state().required_init_quality, None);

    // Media at the new quality flows once the init has landed
    controller.on_media_segment_loaded(Quality::new(2), 1, payload("m1"));
    drive(&mut controller, &sink);
    assert_eq!(sink.appended().last(), Some(&payload("m1")));
    assert_eq!(controller.state().max_appended_index, Some(1));
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
}

#[test]
fn test_zero_target_buffer_keeps_retry_delay_positive() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    controller.set_target_buffer(0.0);
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    let retries = drive(&mut controller, &sink);

    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].1, controller::MIN_EVICTION_RETRY_DELAY);
}

#[test]
fn test_buffering_completes_exactly_once() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    controller.on_stream_completed(10);
    for index in 0..10 {
        controller.on_media_segment_loaded(Quality::new(1), index, payload("m"));
        drive(&mut controller, &sink);
    }
    // A late duplicate must not re-signal
    controller.on_media_segment_loaded(Quality::new(1), 9, payload("m"));
    drive(&mut controller, &sink);

    assert_eq!(count(&drain(&mut signals), "BufferingCompleted"), 1);
    assert!(controller.is_buffering_complete());
}

#[test]
fn test_stream_completion_after_final_append() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    controller.on_media_segment_loaded(Quality::new(1), 2, payload("m2"));
    drive(&mut controller, &sink);
    assert!(!controller.is_buffering_complete());

    controller.on_stream_completed(3);
    assert!(controller.is_buffering_complete());
    assert_eq!(count(&drain(&mut signals), "BufferingCompleted"), 1);
}

#[test]
fn test_empty_stream_completes_on_announcement() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    controller.on_stream_completed(0);
    controller.on_stream_completed(0);

    assert!(controller.is_buffering_complete());
    assert_eq!(count(&drain(&mut signals), "BufferingCompleted"), 1);
}

#[test]
fn test_stale_quality_segment_is_discarded() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    // Hold one append in flight so the next segment stays queued
    controller.on_media_segment_loaded(Quality::new(1), 2, payload("m2"));
    let held = controller.take_operations();
    controller.on_media_segment_loaded(Quality::new(1), 3, payload("stale"));

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Video,
        old_quality: Quality::new(1),
        new_quality: Quality::new(2),
        timestamp_offset: None,
    });
    for operation in held {
        if let SinkOperation::Append { ticket, bytes } = operation {
            controller.on_append_completed(ticket, sink.next_append_result(bytes));
        }
    }
    controller.on_init_segment_loaded(Quality::new(2), payload("init-2"));
    drive(&mut controller, &sink);

    assert!(!sink.appended().contains(&payload("stale")));
    assert_eq!(sink.appended().last(), Some(&payload("init-2")));
    assert_eq!(controller.state().max_appended_index, Some(3));
    assert_eq!(controller.pending_count(), 0);
    // Discards complete silently
    assert!(!drain(&mut signals).contains(&BufferSignal::BytesAppended { index: 3 }));
}

#[test]
fn test_rapid_switches_end_on_latest_init() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    controller.on_init_segment_loaded(Quality::new(2), payload("init-2"));
    controller.on_init_segment_loaded(Quality::new(3), payload("init-3"));
    assert!(controller.take_operations().is_empty());

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Video,
        old_quality: Quality::new(1),
        new_quality: Quality::new(2),
        timestamp_offset: None,
    });
    let init_two = controller.take_operations();
    assert_eq!(init_two.len(), 1);

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Video,
        old_quality: Quality::new(2),
        new_quality: Quality::new(3),
        timestamp_offset: None,
    });
    // q3 init waits for the q2 init to land
    assert!(controller.take_operations().is_empty());

    let SinkOperation::Append { ticket, bytes } = init_two[0].clone() else {
        panic!("expected init append");
    };
    controller.on_append_completed(ticket, sink.next_append_result(bytes));
    assert_eq!(
        controller.state().required_init_quality,
        Some(Quality::new(3))
    );

    drive(&mut controller, &sink);
    assert_eq!(sink.appended().last(), Some(&payload("init-3")));
    assert_eq!(controller.state().required_init_quality, None);
    assert_eq!(controller.phase(), AdmissionPhase::Idle);
}

#[test]
fn test_quality_change_for_other_track_is_ignored() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Audio,
        old_quality: Quality::new(1),
        new_quality: Quality::new(4),
        timestamp_offset: Some(3.0),
    });

    assert_eq!(controller.current_quality(), Quality::new(1));
    assert_eq!(sink.offset_writes(), 0);
}

#[test]
fn test_quality_change_applies_timestamp_offset() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    controller.on_quality_changed(QualityChange {
        track: TrackKind::Video,
        old_quality: Quality::new(1),
        new_quality: Quality::new(2),
        timestamp_offset: Some(-4.0),
    });
    assert_eq!(sink.timestamp_offset(), -4.0);
    assert_eq!(sink.offset_writes(), 1);

    // Unchanged offsets are not rewritten
    controller.on_representation_updated(RepresentationUpdate {
        timestamp_offset: -4.0,
        min_buffer_time: 2.0,
    });
    assert_eq!(sink.offset_writes(), 1);
}

#[test]
fn test_outrun_hysteresis_across_target_changes() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    env.levels.publish(TrackKind::Audio, 0.0);
    sink.set_level(20.0);
    controller.on_playback_tick(PlaybackTick::Progress);
    assert!(drain(&mut signals).contains(&BufferSignal::LevelOutrun));

    // Outrun blocks media admission
    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    assert!(controller.take_operations().is_empty());

    // Shrinking the target keeps the gate closed
    controller.set_target_buffer(4.0);
    let after_shrink = drain(&mut signals);
    assert!(after_shrink.contains(&BufferSignal::MinBufferTimeUpdated { seconds: 4.0 }));
    assert_eq!(count(&after_shrink, "LevelBalanced"), 0);

    env.levels.publish(TrackKind::Audio, 10.0);
    controller.on_playback_tick(PlaybackTick::TimeUpdated);
    assert_eq!(count(&drain(&mut signals), "LevelBalanced"), 0);

    env.levels.publish(TrackKind::Audio, 14.0);
    controller.on_playback_tick(PlaybackTick::TimeUpdated);
    assert!(drain(&mut signals).contains(&BufferSignal::LevelBalanced));
    assert_eq!(controller.take_operations().len(), 1);
}

#[test]
fn test_sufficiency_transitions_are_deduplicated() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    // Ready controllers start out short of buffer
    assert_eq!(controller.sufficient_buffer(), Some(false));

    sink.set_level(9.0);
    controller.on_playback_tick(PlaybackTick::Progress);
    controller.on_playback_tick(PlaybackTick::Progress);
    sink.set_level(2.0);
    controller.on_playback_tick(PlaybackTick::Progress);
    controller.on_playback_rate_changed();

    let changes: Vec<_> = drain(&mut signals)
        .into_iter()
        .filter(|s| matches!(s, BufferSignal::LevelStateChanged { .. }))
        .collect();
    assert_eq!(
        changes,
        vec![
            BufferSignal::LevelStateChanged { sufficient: true },
            BufferSignal::LevelStateChanged { sufficient: false },
        ]
    );
    assert_eq!(controller.sufficient_buffer(), Some(false));
}

#[test]
fn test_stall_guard_forces_insufficient() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    // Buffering complete near the period end: policy alone says sufficient
    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    drive(&mut controller, &sink);
    controller.on_stream_completed(1);
    env.clock.set_time_to_period_end(0.3);
    sink.set_level(0.3);

    controller.on_playback_tick(PlaybackTick::Progress);
    assert_eq!(controller.sufficient_buffer(), Some(false));

    controller.on_scheduled_time_occurred(TrackKind::Video);
    assert_eq!(controller.sufficient_buffer(), Some(true));
}

#[test]
fn test_representation_update_derives_target() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    let mut signals = env.signals.subscribe();

    env.clock.set_period_duration(Some(6.0));
    controller.on_representation_updated(RepresentationUpdate {
        timestamp_offset: 0.0,
        min_buffer_time: 4.0,
    });
    assert_eq!(controller.target_buffer(), 4.0);

    // Same decision again: no duplicate notification
    controller.on_representation_updated(RepresentationUpdate {
        timestamp_offset: 0.0,
        min_buffer_time: 4.0,
    });
    assert_eq!(count(&drain(&mut signals), "MinBufferTimeUpdated"), 1);
}

#[test]
fn test_seek_into_unbuffered_time_evicts_everything() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    sink.set_ranges(vec![TimeRange::new(0.0, 10.0), TimeRange::new(12.0, 20.0)]);
    env.clock.set_time(40.0);
    controller.on_playback_tick(PlaybackTick::Seeking { target: 40.0 });
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 20, payload("m20"));
    drive(&mut controller, &sink);

    assert_eq!(sink.removed(), vec![TimeRange::new(0.0, 20.0)]);
}

#[test]
fn test_reset_ignores_late_completions() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    let in_flight = controller.take_operations();
    controller.reset(false);

    assert!(sink.was_aborted());
    assert!(sink.was_detached());
    assert!(!controller.is_bound());
    assert_eq!(env.levels.level(TrackKind::Video), None);

    let fresh = MockSink::new();
    controller.initialize(Arc::new(fresh.clone()));
    for operation in in_flight {
        if let SinkOperation::Append { ticket, .. } = operation {
            controller.on_append_completed(ticket, Ok(()));
        }
    }

    assert_eq!(controller.state().max_appended_index, None);
    assert_eq!(controller.phase(), AdmissionPhase::AwaitingInit);
    assert!(controller.state().generation() > 0);
}

#[test]
fn test_errored_reset_leaves_sink_alone() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);

    controller.reset(true);
    assert!(!sink.was_aborted());
    assert!(!sink.was_detached());

    // Unbound controllers ignore arrivals
    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    assert_eq!(controller.pending_count(), 0);
}

#[test]
fn test_reset_cancels_pending_retry() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = ready_controller(&env, &sink, 1);
    sink.fail_next_append(SinkError::QuotaExceeded);

    controller.on_media_segment_loaded(Quality::new(1), 0, payload("m0"));
    let retries = drive(&mut controller, &sink);
    assert_eq!(retries.len(), 1);

    controller.reset(false);
    controller.initialize(Arc::new(MockSink::new()));
    controller.on_eviction_retry_elapsed(retries[0].0);

    assert!(controller.take_operations().is_empty());
    assert!(!controller.status().quota_exceeded);
}

#[test]
fn test_status_snapshot() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let mut controller = controller_at(&env, &sink, 2);
    controller.on_media_segment_loaded(Quality::new(2), 0, payload("m0"));

    let status = controller.status();
    assert_eq!(status.track, TrackKind::Video);
    assert_eq!(status.phase, AdmissionPhase::AwaitingInit);
    assert_eq!(status.pending_segments, 1);
    assert_eq!(status.pending_bytes, 2);
    assert_eq!(status.required_init_quality, Some(Quality::new(2)));
    assert!(status.bound);
}

#[derive(Debug, Clone)]
enum Step {
    Media { quality: u32, index: u64 },
    Init { quality: u32 },
    Switch { quality: u32 },
    Tick { level: f64 },
    CompleteOne { quota: bool },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0u32..3, 0u64..40).prop_map(|(quality, index)| Step::Media { quality, index }),
        1 => (0u32..3).prop_map(|quality| Step::Init { quality }),
        1 => (0u32..3).prop_map(|quality| Step::Switch { quality }),
        1 => (0.0f64..30.0).prop_map(|level| Step::Tick { level }),
        3 => any::<bool>().prop_map(|quota| Step::CompleteOne { quota }),
    ]
}

proptest! {
    #[test]
    fn prop_single_flight_and_monotonic_index(steps in prop::collection::vec(step_strategy(), 1..80)) {
        let env = MockEnvironment::new();
        let sink = MockSink::new();
        sink.set_ranges(vec![TimeRange::new(0.0, 60.0)]);
        env.clock.set_time(30.0);
        let mut controller = controller_at(&env, &sink, 0);
        let mut outstanding: Vec<SinkOperation> = Vec::new();
        let mut previous_max: Option<u64> = None;
        let mut current = 0u32;

        for step in steps {
            match step {
                Step::Media { quality, index } => {
                    controller.on_media_segment_loaded(Quality::new(quality), index, Bytes::from_static(b"m"));
                }
                Step::Init { quality } => {
                    controller.on_init_segment_loaded(Quality::new(quality), Bytes::from_static(b"i"));
                }
                Step::Switch { quality } => {
                    controller.on_quality_changed(QualityChange {
                        track: TrackKind::Video,
                        old_quality: Quality::new(current),
                        new_quality: Quality::new(quality),
                        timestamp_offset: None,
                    });
                    current = quality;
                }
                Step::Tick { level } => {
                    sink.set_level(level);
                    controller.on_playback_tick(PlaybackTick::Progress);
                }
                Step::CompleteOne { quota } => {
                    if let Some(position) = outstanding
                        .iter()
                        .position(|op| !matches!(op, SinkOperation::ArmRetry { .. }))
                    {
                        match outstanding.remove(position) {
                            SinkOperation::Append { ticket, .. } => {
                                let result = if quota { Err(SinkError::QuotaExceeded) } else { Ok(()) };
                                controller.on_append_completed(ticket, result);
                            }
                            SinkOperation::Remove { ticket, range } => {
                                controller.on_remove_completed(ticket, Ok(range));
                            }
                            SinkOperation::ArmRetry { .. } => {}
                        }
                    } else if let Some(position) = outstanding
                        .iter()
                        .position(|op| matches!(op, SinkOperation::ArmRetry { .. }))
                    {
                        if let SinkOperation::ArmRetry { ticket, .. } = outstanding.remove(position) {
                            controller.on_eviction_retry_elapsed(ticket);
                        }
                    }
                }
            }

            outstanding.extend(controller.take_operations());
            let sink_ops = outstanding
                .iter()
                .filter(|op| !matches!(op, SinkOperation::ArmRetry { .. }))
                .count();
            prop_assert!(sink_ops <= 1, "{} sink operations outstanding", sink_ops);

            let max = controller.state().max_appended_index;
            if let (Some(before), Some(after)) = (previous_max, max) {
                prop_assert!(after >= before);
            }
            prop_assert!(!(previous_max.is_some() && max.is_none()));
            previous_max = max;
        }
    }
}
