//! Two tracks sharing a level registry.

use futures::future::join_all;
use sluice_core::buffer::{BufferSignal, PlaybackTick, Quality, TrackKind};
use sluice_sim::SimulatedSink;

use crate::common::{Harness, drain, feed, init, wait_for};

#[tokio::test]
async fn test_video_waits_for_audio_to_catch_up() {
    let harness = Harness::new(120.0);
    let audio_sink = SimulatedSink::new(100_000);
    let video_sink = SimulatedSink::new(100_000);
    let audio = harness.spawn(TrackKind::Audio, &audio_sink);
    let video = harness.spawn(TrackKind::Video, &video_sink);
    let mut signals = harness.signals.subscribe();

    audio
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&audio, 0..1).await;
    wait_for(&audio, |s| s.max_appended_index == Some(0)).await;

    video
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&video, 0..10).await;

    // 18s of video against 2s of audio reaches the 16s gap
    let status = wait_for(&video, |s| s.level_outrun).await;
    assert_eq!(status.max_appended_index, Some(8));
    assert_eq!(status.pending_segments, 1);
    assert_eq!(harness.levels.least_level(), Some(2.0));

    feed(&audio, 1..5).await;
    wait_for(&audio, |s| s.max_appended_index == Some(4)).await;

    video.playback_tick(PlaybackTick::Progress).await.unwrap();
    let status = wait_for(&video, |s| s.max_appended_index == Some(9)).await;
    assert!(!status.level_outrun);
    assert_eq!(status.pending_segments, 0);

    let video_signals = drain(&mut signals, TrackKind::Video);
    assert!(video_signals.contains(&BufferSignal::LevelOutrun));
    assert!(video_signals.contains(&BufferSignal::LevelBalanced));

    let results = join_all([audio.shutdown(), video.shutdown()]).await;
    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_reset_track_leaves_level_registry() {
    let harness = Harness::new(120.0);
    let audio_sink = SimulatedSink::new(100_000);
    let video_sink = SimulatedSink::new(100_000);
    let audio = harness.spawn(TrackKind::Audio, &audio_sink);
    let video = harness.spawn(TrackKind::Video, &video_sink);

    video
        .init_segment_loaded(Quality::new(0), init(0))
        .await
        .unwrap();
    feed(&video, 0..3).await;
    wait_for(&video, |s| s.max_appended_index == Some(2)).await;
    assert_eq!(harness.levels.least_level(), Some(0.0));

    audio.reset(false).await.unwrap();
    wait_for(&audio, |s| !s.bound).await;
    assert_eq!(harness.levels.level(TrackKind::Audio), None);
    assert_eq!(harness.levels.least_level(), Some(6.0));

    let results = join_all([audio.shutdown(), video.shutdown()]).await;
    assert!(results.iter().all(Result::is_ok));
}
