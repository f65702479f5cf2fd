//! Invariants checked after every simulation event.

use std::fmt;
use std::time::Duration;

use super::state::SimulationState;

/// Violation of a simulation invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub invariant: String,
    pub description: String,
    /// Simulated time at which the violation was seen
    pub timestamp: Duration,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated at {:?}: {}",
            self.invariant, self.timestamp, self.description
        )
    }
}

/// Property that must hold after every event.
pub trait Invariant: Send + Sync {
    /// Checks the invariant against the current state.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation>;

    fn name(&self) -> &str;

    fn violation(&self, state: &SimulationState, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: self.name().to_string(),
            description,
            timestamp: state.elapsed,
        }
    }
}

/// A track never has more than one sink operation outstanding.
pub struct SingleOperationInvariant;

impl Invariant for SingleOperationInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        for (track, snapshot) in &state.tracks {
            if snapshot.outstanding_operations > 1 {
                return Err(self.violation(
                    state,
                    format!(
                        "{} has {} sink operations outstanding",
                        track, snapshot.outstanding_operations
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SingleOperation"
    }
}

/// The highest appended media index never moves backwards.
pub struct MonotonicAppendInvariant;

impl Invariant for MonotonicAppendInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        for (track, snapshot) in &state.tracks {
            if snapshot.max_appended_index < snapshot.previous_max_appended_index {
                return Err(self.violation(
                    state,
                    format!(
                        "{} appended index went from {:?} to {:?}",
                        track, snapshot.previous_max_appended_index, snapshot.max_appended_index
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MonotonicAppend"
    }
}

/// No sink holds more bytes than its quota.
pub struct QuotaInvariant;

impl Invariant for QuotaInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        for (track, snapshot) in &state.tracks {
            if snapshot.used_bytes > snapshot.quota_bytes {
                return Err(self.violation(
                    state,
                    format!(
                        "{} sink holds {} bytes, quota is {}",
                        track, snapshot.used_bytes, snapshot.quota_bytes
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Quota"
    }
}

/// Buffering completion is announced at most once per track.
pub struct SingleCompletionInvariant;

impl Invariant for SingleCompletionInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        for (track, snapshot) in &state.tracks {
            if snapshot.buffering_completed_signals > 1 {
                return Err(self.violation(
                    state,
                    format!(
                        "{} announced buffering completion {} times",
                        track, snapshot.buffering_completed_signals
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SingleCompletion"
    }
}
