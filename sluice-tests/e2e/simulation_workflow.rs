//! Whole-period playback through every named scenario.

use proptest::prelude::*;
use sluice_core::buffer::TrackKind;
use sluice_core::config::ControllerConfig;
use sluice_sim::{Scenario, SimulationReport};
use tokio_test::assert_ok;

fn play(scenario: Scenario, seed: u64) -> SimulationReport {
    let mut sim = assert_ok!(scenario.build(seed, ControllerConfig::default()));
    let limit = sim.default_time_limit();
    assert_ok!(sim.run(limit))
}

/// Seeds the scenarios are tuned against.
fn reference_seed(scenario: Scenario) -> u64 {
    match scenario {
        Scenario::ConstrainedSink => 7,
        Scenario::SlowNetwork => 3,
        Scenario::Steady | Scenario::QualityChurn => 42,
    }
}

#[test]
fn test_every_scenario_plays_to_the_end() {
    for scenario in Scenario::ALL {
        let report = play(scenario, reference_seed(scenario));
        assert!(report.success, "{scenario}: {}", report.summary());
        assert!(report.final_state.ended, "{scenario} did not end");

        for (track, snapshot) in &report.final_state.tracks {
            assert_eq!(
                snapshot.buffering_completed_signals, 1,
                "{scenario}: {track} completion count"
            );
            assert!(snapshot.used_bytes <= snapshot.quota_bytes);
        }
    }
}

#[test]
fn test_both_tracks_take_part() {
    let report = play(Scenario::Steady, 42);
    let tracks: Vec<TrackKind> = report.final_state.tracks.keys().copied().collect();
    assert_eq!(tracks, vec![TrackKind::Audio, TrackKind::Video]);
}

#[test]
fn test_constrained_sink_evicts_behind_playhead() {
    let report = play(Scenario::ConstrainedSink, reference_seed(Scenario::ConstrainedSink));
    assert!(report.success, "{}", report.summary());
    assert!(report.metrics.quota_rejections > 0);
    assert!(report.metrics.signal_count("BufferCleared") > 0);
    assert_eq!(report.metrics.dropped_appends, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_steady_playback_completes_for_any_seed(seed in any::<u64>()) {
        let report = play(Scenario::Steady, seed);
        prop_assert!(report.success, "{}", report.summary());
        prop_assert_eq!(report.metrics.quota_rejections, 0);
        prop_assert!(report.metrics.invariant_violations.is_empty());
    }
}
