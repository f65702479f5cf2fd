//! Deterministic simulation of buffer controllers on simulated time.
//!
//! Runs are reproducible from their seed, and a set of invariants is
//! checked after every event.

mod clock;
mod events;
mod invariants;
mod simulation;
mod state;

pub use clock::{DeterministicClock, DeterministicRng};
pub use events::{EventPriority, EventType, SimulationEvent};
pub use invariants::{
    Invariant, InvariantViolation, MonotonicAppendInvariant, QuotaInvariant,
    SingleCompletionInvariant, SingleOperationInvariant,
};
pub use simulation::{BufferSimulation, SimulationError, SimulationReport};
pub use state::{SimulationMetrics, SimulationState, TrackSnapshot};
