//! Quota rejections and the eviction loop against a full simulated sink.

use std::sync::Arc;
use std::time::Duration;

use sluice_core::buffer::test_mocks::{MockEnvironment, MockSink};
use sluice_core::buffer::{
    AdmissionPhase, BufferController, BufferSignal, BufferSink, PlaybackTick, Quality, SinkError,
    TimeRange, TrackKind,
};
use sluice_core::config::ControllerConfig;
use sluice_core::spawn_buffer_controller;
use sluice_sim::SimulatedSink;

use crate::common::{Harness, SEGMENT_BYTES, drain, feed, init, media, wait_for};

/// Room for exactly five segments.
const QUOTA: u64 = 5 * SEGMENT_BYTES;

async fn wait_for_removals(sink: &SimulatedSink, removals: u64) {
    for _ in 0..400 {
        if sink.snapshot().removals >= removals {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_segment_lands_after_eviction() {
    let harness = Harness::new(60.0);
    let sink = SimulatedSink::new(QUOTA);
    let handle = harness.spawn(TrackKind::Video, &sink);
    let mut signals = harness.signals.subscribe();

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&handle, 0..6).await;

    let status = wait_for(&handle, |s| s.quota_exceeded).await;
    assert_eq!(status.phase, AdmissionPhase::QuotaBlocked);
    assert_eq!(status.max_appended_index, Some(4));
    assert_eq!(status.pending_segments, 1);
    // Playback has not moved, so the first round found nothing to evict
    assert_eq!(sink.snapshot().removals, 0);

    harness.playback.advance(9.0);
    harness
        .fetch
        .record(TrackKind::Video, TimeRange::new(8.0, 10.0));
    tokio::time::sleep(Duration::from_secs(9)).await;

    let status = wait_for(&handle, |s| s.max_appended_index == Some(5)).await;
    assert!(!status.quota_exceeded);
    assert_eq!(sink.buffered_ranges(), vec![TimeRange::new(8.0, 12.0)]);
    assert_eq!(sink.used_bytes(), 2 * SEGMENT_BYTES);

    let signals = drain(&mut signals, TrackKind::Video);
    assert!(signals.contains(&BufferSignal::QuotaExceeded { index: Some(5) }));
    assert!(signals.contains(&BufferSignal::BufferCleared {
        range: TimeRange::new(0.0, 8.0)
    }));

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_eviction_rounds_accumulate_until_target() {
    let harness = Harness::new(60.0);
    let sink = SimulatedSink::new(QUOTA);
    let handle = harness.spawn(TrackKind::Video, &sink);
    let mut signals = harness.signals.subscribe();

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&handle, 0..6).await;
    wait_for(&handle, |s| s.quota_exceeded).await;

    // First round frees 4s of the 8s target
    harness.playback.advance(5.0);
    harness
        .fetch
        .record(TrackKind::Video, TimeRange::new(4.0, 6.0));
    tokio::time::sleep(Duration::from_secs(9)).await;
    wait_for_removals(&sink, 1).await;

    let status = handle.status().await.unwrap();
    assert!(status.quota_exceeded);
    assert_eq!(sink.buffered_ranges(), vec![TimeRange::new(4.0, 10.0)]);

    // Second round covers the rest
    harness.playback.advance(4.0);
    harness
        .fetch
        .record(TrackKind::Video, TimeRange::new(8.0, 10.0));
    tokio::time::sleep(Duration::from_secs(9)).await;

    let status = wait_for(&handle, |s| s.max_appended_index == Some(5)).await;
    assert!(!status.quota_exceeded);

    let cleared: Vec<TimeRange> = drain(&mut signals, TrackKind::Video)
        .into_iter()
        .filter_map(|signal| match signal {
            BufferSignal::BufferCleared { range } => Some(range),
            _ => None,
        })
        .collect();
    assert_eq!(
        cleared,
        vec![TimeRange::new(0.0, 4.0), TimeRange::new(4.0, 8.0)]
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_detached_sink_drops_appends() {
    let harness = Harness::new(60.0);
    let sink = SimulatedSink::new(QUOTA);
    let handle = harness.spawn(TrackKind::Audio, &sink);
    let mut signals = harness.signals.subscribe();

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    wait_for(&handle, |s| s.phase == AdmissionPhase::Idle).await;

    // The host tore the sink down behind the controller's back
    sink.detach();
    feed(&handle, 0..2).await;

    let status = wait_for(&handle, |s| {
        s.pending_segments == 0 && s.phase == AdmissionPhase::Idle
    })
    .await;
    assert_eq!(status.max_appended_index, None);

    let dropped = drain(&mut signals, TrackKind::Audio)
        .into_iter()
        .filter(|signal| matches!(signal, BufferSignal::AppendDropped { .. }))
        .count();
    assert_eq!(dropped, 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_removal_resumes_on_next_tick() {
    let env = MockEnvironment::new();
    let sink = MockSink::new();
    let controller = BufferController::new(
        TrackKind::Video,
        Quality::new(0),
        Arc::new(sink.clone()),
        env.collaborators(),
        ControllerConfig::default(),
    );
    let handle = spawn_buffer_controller(controller);

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    wait_for(&handle, |s| s.phase == AdmissionPhase::Idle).await;

    sink.set_ranges(vec![TimeRange::new(0.0, 20.0)]);
    env.clock.set_time(10.0);
    sink.fail_next_append(SinkError::QuotaExceeded);
    sink.fail_next_remove(SinkError::RemoveFailed {
        reason: "source busy".to_string(),
    });
    handle
        .media_segment_loaded(Quality::new(0), 0, media(0))
        .await
        .unwrap();

    // The failed round leaves the track blocked with nothing in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = handle.status().await.unwrap();
    assert!(status.quota_exceeded);
    assert!(sink.removed().is_empty());

    handle.playback_tick(PlaybackTick::Progress).await.unwrap();
    let status = wait_for(&handle, |s| s.max_appended_index == Some(0)).await;
    assert!(!status.quota_exceeded);
    assert_eq!(sink.removed(), vec![TimeRange::new(0.0, 10.0)]);

    handle.shutdown().await.unwrap();
}
