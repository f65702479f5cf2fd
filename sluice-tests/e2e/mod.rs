//! End-to-end tests for Sluice
//!
//! These tests play whole periods through the deterministic simulation:
//! two tracks, real controllers, a quota-limited sink and a playback clock
//! that only advances while every track has media at the playhead.

mod simulation_workflow;
