//! Integration tests for Sluice
//!
//! These tests run buffer controller actors against the simulated sink,
//! playback clock and fetch history, covering the hand-off between the
//! actor runtime, the controller and a sink that enforces a real quota.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/actor_pipeline.rs"]
mod actor_pipeline;
#[path = "integration/quota_recovery.rs"]
mod quota_recovery;
#[path = "integration/track_balancing.rs"]
mod track_balancing;
