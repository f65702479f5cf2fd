//! Sluice simulation - deterministic runs of the buffer controllers.
//!
//! Provides a quota-limited in-memory sink, a simulated playback clock and
//! fetch history, and a discrete-event simulation that plays a whole period
//! through real controllers on simulated time.
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice_core::config::ControllerConfig;
//! use sluice_sim::Scenario;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sim = Scenario::ConstrainedSink.build(7, ControllerConfig::default())?;
//! let limit = sim.default_time_limit();
//! let report = sim.run(limit)?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod deterministic;
pub mod playback;
pub mod scenarios;
pub mod sink;

pub use codec::{CodecError, SegmentHeader};
pub use deterministic::{
    BufferSimulation, DeterministicClock, DeterministicRng, EventPriority, EventType, Invariant,
    InvariantViolation, SimulationError, SimulationEvent, SimulationMetrics, SimulationReport,
    SimulationState,
};
pub use playback::{SimulatedFetch, SimulatedPlayback};
pub use scenarios::Scenario;
pub use sink::{SimulatedSink, SinkSnapshot};
// Re-export config from core for convenience
pub use sluice_core::config::SimulationConfig;
