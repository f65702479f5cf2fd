//! Controller actors appending into the simulated sink.

use std::sync::Arc;

use sluice_core::buffer::{
    AdmissionPhase, BufferSignal, BufferSink, Quality, QualityChange, TimeRange, TrackKind,
};
use sluice_sim::SimulatedSink;

use crate::common::{Harness, drain, feed, init, media, wait_for};

#[tokio::test]
async fn test_actor_buffers_simulated_segments() {
    let harness = Harness::new(60.0);
    let sink = SimulatedSink::new(10_000);
    let handle = harness.spawn(TrackKind::Video, &sink);

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&handle, 0..5).await;

    let status = wait_for(&handle, |s| s.max_appended_index == Some(4)).await;
    assert_eq!(status.phase, AdmissionPhase::Idle);
    assert_eq!(status.buffer_level, 10.0);
    assert_eq!(status.sufficient_buffer, Some(true));
    assert_eq!(
        handle.buffered_ranges().await.unwrap(),
        vec![TimeRange::new(0.0, 10.0)]
    );
    assert_eq!(harness.levels.level(TrackKind::Video), Some(10.0));
    assert_eq!(sink.used_bytes(), 500);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_completion_announced_after_final_segment() {
    let harness = Harness::new(6.0);
    let sink = SimulatedSink::new(10_000);
    let handle = harness.spawn(TrackKind::Audio, &sink);
    let mut signals = harness.signals.subscribe();

    handle.stream_completed(2).await.unwrap();
    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&handle, 0..3).await;

    let status = wait_for(&handle, |s| s.buffering_complete).await;
    assert_eq!(status.last_index, Some(2));

    let signals = drain(&mut signals, TrackKind::Audio);
    let appended: Vec<u64> = signals
        .iter()
        .filter_map(|signal| match signal {
            BufferSignal::BytesAppended { index } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(appended, vec![0, 1, 2]);
    assert_eq!(
        signals
            .iter()
            .filter(|signal| **signal == BufferSignal::BufferingCompleted)
            .count(),
        1
    );

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_quality_switch_replays_cached_init() {
    let harness = Harness::new(60.0);
    let sink = SimulatedSink::new(10_000);
    let handle = harness.spawn(TrackKind::Video, &sink);
    let mut signals = harness.signals.subscribe();

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    handle
        .init_segment_loaded(Quality::new(1), init(1))
        .await
        .unwrap();
    feed(&handle, 0..2).await;
    wait_for(&handle, |s| s.max_appended_index == Some(1)).await;

    handle
        .quality_changed(QualityChange {
            track: TrackKind::Video,
            old_quality: Quality::new(0),
            new_quality: Quality::new(1),
            timestamp_offset: None,
        })
        .await
        .unwrap();
    handle
        .media_segment_loaded(Quality::new(1), 2, media(2))
        .await
        .unwrap();

    let status = wait_for(&handle, |s| s.max_appended_index == Some(2)).await;
    assert_eq!(status.current_quality, Quality::new(1));
    assert_eq!(status.required_init_quality, None);
    assert_eq!(sink.snapshot().init_quality, Some(Quality::new(1)));

    handle
        .quality_changed(QualityChange {
            track: TrackKind::Video,
            old_quality: Quality::new(1),
            new_quality: Quality::new(0),
            timestamp_offset: None,
        })
        .await
        .unwrap();
    wait_for(&handle, |s| s.phase == AdmissionPhase::Idle).await;
    assert_eq!(sink.snapshot().init_quality, Some(Quality::new(0)));

    let requested = drain(&mut signals, TrackKind::Video)
        .into_iter()
        .any(|signal| matches!(signal, BufferSignal::InitRequested { .. }));
    assert!(!requested);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reset_detaches_and_initialize_rebinds() {
    let harness = Harness::new(60.0);
    let first = SimulatedSink::new(10_000);
    let handle = harness.spawn(TrackKind::Video, &first);

    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&handle, 0..2).await;
    wait_for(&handle, |s| s.max_appended_index == Some(1)).await;

    handle.reset(false).await.unwrap();
    assert!(first.snapshot().detached);
    assert_eq!(harness.levels.level(TrackKind::Video), None);
    assert!(!handle.status().await.unwrap().bound);

    let second = SimulatedSink::new(10_000);
    handle.initialize(Arc::new(second.clone())).await.unwrap();
    handle
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&handle, 0..1).await;

    let status = wait_for(&handle, |s| s.max_appended_index == Some(0)).await;
    assert!(status.bound);
    assert_eq!(second.buffered_ranges(), vec![TimeRange::new(0.0, 2.0)]);
    assert_eq!(first.snapshot().appends, 3);

    handle.shutdown().await.unwrap();
}
